//! Pairwise-distance clustering and deduplication for feature vectors.
//!
//! Items (an id plus a feature vector, typically a colour histogram) are
//! compared all-pairs on a worker pool, and the resulting distances feed
//! one of three consumers:
//!
//! - [`pachinko`]: greedy threshold bucketing, closest pairs first
//! - [`dedupe`]: transitive duplicate groups
//! - [`nearest`]: arg-min assignment to a fixed set of centers
//!
//! [`pipeline`] wires the two phases together, [`trace`] dumps the
//! intermediate results and [`relocate`] moves the files afterwards.
//!
//! ```
//! use simbucket::{run_buckets, BucketConfig, DistanceEngine, EngineConfig, Item};
//!
//! let engine = DistanceEngine::new(EngineConfig::default()).unwrap();
//! let items = vec![
//!     Item::new("a.png", vec![1.0, 0.0, 0.0]),
//!     Item::new("b.png", vec![0.9, 0.1, 0.0]),
//!     Item::new("c.png", vec![0.0, 0.0, 1.0]),
//! ];
//! let config = BucketConfig {
//!     metric: "Euclidean".into(),
//!     threshold: 0.2,
//!     ..Default::default()
//! };
//!
//! let run = run_buckets(&engine, &items, &config).unwrap();
//! assert_eq!(run.buckets.len(), 1);
//! assert_eq!(run.unbucketed, vec!["c.png".to_string()]);
//! ```

pub mod config;
pub mod dedupe;
pub mod distance;
pub mod error;
pub mod item;
pub mod metric;
pub mod nearest;
pub mod pachinko;
pub mod pipeline;
pub mod relocate;
pub mod trace;

pub use config::{BucketConfig, DedupeConfig, EngineConfig, NearestConfig};
pub use dedupe::{DedupeGroup, DedupeIndex};
pub use distance::{
    DistanceEngine, DistanceIndex, DistanceRecord, DistanceRun, PairFailure, PairMode,
    ProcessedPairs,
};
pub use error::{ConfigError, FeatureError, InvariantViolation, MetricError};
pub use item::{collect_features, FeatureCollection, FeatureProvider, Item, ItemId, MemoryFeatures};
pub use metric::{Direction, Metric, Threshold};
pub use nearest::{assign_nearest, CenterBucket, NearestRun};
pub use pachinko::{assign_buckets, check_partition, Bucket, BucketAssignment, Pachinko, Placement};
pub use pipeline::{run_buckets, run_dedupe, run_nearest, BucketRun, DedupeRun};
