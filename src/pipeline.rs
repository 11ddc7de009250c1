//! Two-phase runs: compute every distance, then cluster.
//!
//! Each run owns its coordinator state (distance index, bucket map, dedupe
//! index) for its whole duration; workers only ever see immutable items.

use crate::config::{BucketConfig, DedupeConfig, NearestConfig};
use crate::dedupe::{DedupeGroup, DedupeIndex};
use crate::distance::{DistanceEngine, DistanceIndex, DistanceRecord, PairFailure, PairMode};
use crate::item::{Item, ItemId};
use crate::nearest::{assign_nearest, NearestRun};
use crate::pachinko::{assign_buckets, check_partition, sort_best_first, Bucket};
use crate::trace::{self, TraceWriter};
use anyhow::Result;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct BucketRun {
    /// Buckets that met the minimum size, in creation order.
    pub buckets: Vec<Bucket>,
    /// Buckets discarded for being under the minimum size.
    pub dropped_buckets: usize,
    /// Accepted pairs, closest first.
    pub accepted: Vec<DistanceRecord>,
    /// Number of distances computed.
    pub evaluated: usize,
    pub failures: Vec<PairFailure>,
    /// Items not in any returned bucket.
    pub unbucketed: Vec<ItemId>,
}

#[derive(Debug, Default)]
pub struct DedupeRun {
    pub groups: Vec<DedupeGroup>,
    /// Accepted duplicate links, closest first.
    pub links: Vec<DistanceRecord>,
    pub evaluated: usize,
    pub failures: Vec<PairFailure>,
}

/// Cluster `items` into buckets of mutually similar items.
pub fn run_buckets(
    engine: &DistanceEngine,
    items: &[Item],
    config: &BucketConfig,
) -> Result<BucketRun> {
    let metric = config.metric()?;
    let threshold = config.threshold()?;
    let tracer = config
        .trace_dir
        .as_deref()
        .map(TraceWriter::new)
        .transpose()?;

    let mut index = DistanceIndex::new();
    let mut accepted = Vec::new();
    let distances = engine.pairwise(items, &metric, config.pair_mode, None, |record| {
        if threshold.accepts(record.distance) {
            index.insert(&record.a, &record.b, record.distance);
            accepted.push(record.clone());
        }
    });

    sort_best_first(&mut accepted, metric.direction());
    log::info!(
        "Accepted {} of {} pairs at {} {}",
        accepted.len(),
        distances.records.len(),
        metric.name(),
        config.threshold
    );

    if let Some(tracer) = &tracer {
        tracer.dump(trace::RESULTS, &distances.results_map())?;
        let values: Vec<(f64, &str, &str)> = accepted
            .iter()
            .map(|r| (r.distance, r.a.as_str(), r.b.as_str()))
            .collect();
        tracer.dump(trace::VALUES_INDEX, &values)?;
    }

    let bar = engine
        .config()
        .progress_bar(accepted.len() as u64, "Pachinko");
    let assignment = assign_buckets(&accepted, &index, metric.direction(), &bar);
    check_partition(&assignment, &accepted)?;

    if let Some(tracer) = &tracer {
        tracer.dump(trace::BUCKETS, &assignment.buckets)?;
    }

    let total = assignment.buckets.len();
    let buckets: Vec<Bucket> = assignment
        .buckets
        .into_iter()
        .filter(|b| b.len() >= config.min_bucket_size)
        .collect();
    let dropped_buckets = total - buckets.len();
    if dropped_buckets > 0 {
        log::info!(
            "Dropped {} buckets smaller than {}",
            dropped_buckets,
            config.min_bucket_size
        );
    }

    let kept: HashSet<&str> = buckets
        .iter()
        .flat_map(|b| b.members().iter().map(String::as_str))
        .collect();
    let unbucketed = items
        .iter()
        .filter(|i| !kept.contains(i.id.as_str()))
        .map(|i| i.id.clone())
        .collect();

    Ok(BucketRun {
        buckets,
        dropped_buckets,
        accepted,
        evaluated: distances.records.len(),
        failures: distances.failures,
        unbucketed,
    })
}

/// Group transitively duplicated items.
pub fn run_dedupe(
    engine: &DistanceEngine,
    items: &[Item],
    config: &DedupeConfig,
) -> Result<DedupeRun> {
    let metric = config.metric();
    let threshold = config.threshold()?;
    let tracer = config
        .trace_dir
        .as_deref()
        .map(TraceWriter::new)
        .transpose()?;

    let mut links = Vec::new();
    let distances = engine.pairwise(items, &metric, PairMode::Slim, None, |record| {
        if threshold.accepts(record.distance) {
            links.push(record.clone());
        }
    });
    sort_best_first(&mut links, metric.direction());

    let bar = engine
        .config()
        .progress_bar(links.len() as u64, "Marking dupes");
    let mut index = DedupeIndex::new();
    for link in &links {
        index.add_pair(&link.a, &link.b);
        bar.inc(1);
    }
    bar.finish_and_clear();

    let groups = index.groups();
    crate::dedupe::check_groups(&groups)?;
    log::info!(
        "Found {} duplicate groups from {} links",
        groups.len(),
        links.len()
    );

    if let Some(tracer) = &tracer {
        tracer.dump(trace::DUPE_INDEX, &index.to_map())?;
        tracer.dump(trace::RESULTS, &distances.results_map())?;
    }

    Ok(DedupeRun {
        groups,
        links,
        evaluated: distances.records.len(),
        failures: distances.failures,
    })
}

/// Assign each item to its closest center.
pub fn run_nearest(
    engine: &DistanceEngine,
    items: &[Item],
    centers: &[Item],
    config: &NearestConfig,
) -> Result<NearestRun> {
    let metric = config.metric()?;
    let tracer = config
        .trace_dir
        .as_deref()
        .map(TraceWriter::new)
        .transpose()?;

    let run = assign_nearest(engine, items, centers, &metric);

    if let Some(tracer) = &tracer {
        tracer.dump(trace::RESULTS, &run.results)?;
        tracer.dump(trace::BUCKETS_INDEX, &run.buckets_index())?;
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::fs;
    use tempfile::TempDir;

    fn engine() -> DistanceEngine {
        DistanceEngine::new(EngineConfig {
            workers: 2,
            show_progress: false,
        })
        .unwrap()
    }

    fn euclidean(threshold: f64) -> BucketConfig {
        BucketConfig {
            metric: "Euclidean".to_string(),
            threshold,
            pair_mode: PairMode::Slim,
            ..Default::default()
        }
    }

    fn abc() -> Vec<Item> {
        vec![
            Item::new("A", vec![1.0, 0.0, 0.0]),
            Item::new("B", vec![0.9, 0.1, 0.0]),
            Item::new("C", vec![0.0, 0.0, 1.0]),
        ]
    }

    #[test]
    fn test_close_pair_bucketed_far_item_left_out() {
        let run = run_buckets(&engine(), &abc(), &euclidean(0.2)).unwrap();

        assert_eq!(run.evaluated, 3);
        assert_eq!(run.accepted.len(), 1);
        assert_eq!(run.buckets.len(), 1);
        assert_eq!(run.buckets[0].members(), ["A".to_string(), "B".to_string()]);
        assert_eq!(run.unbucketed, vec!["C".to_string()]);
    }

    #[test]
    fn test_min_bucket_size_drops_small_buckets() {
        let items = vec![
            Item::new("a1", vec![0.0, 0.0]),
            Item::new("a2", vec![0.0, 0.1]),
            Item::new("a3", vec![0.1, 0.0]),
            Item::new("b1", vec![5.0, 5.0]),
            Item::new("b2", vec![5.0, 5.1]),
        ];
        let config = BucketConfig {
            min_bucket_size: 3,
            ..euclidean(0.5)
        };
        let run = run_buckets(&engine(), &items, &config).unwrap();

        assert_eq!(run.buckets.len(), 1);
        assert_eq!(run.buckets[0].len(), 3);
        assert_eq!(run.dropped_buckets, 1);
        assert_eq!(run.unbucketed, vec!["b1".to_string(), "b2".to_string()]);
    }

    #[test]
    fn test_full_mode_with_asymmetric_metric() {
        let items = vec![
            Item::new("x", vec![0.5, 0.5]),
            Item::new("y", vec![0.45, 0.55]),
            Item::new("z", vec![0.9, 0.1]),
        ];
        let config = BucketConfig {
            metric: "Chi-Squared".to_string(),
            threshold: 0.05,
            ..Default::default()
        };
        let run = run_buckets(&engine(), &items, &config).unwrap();

        assert_eq!(run.evaluated, 6);
        assert_eq!(run.accepted.len(), 2);
        assert_eq!(run.buckets.len(), 1);
        assert_eq!(run.unbucketed, vec!["z".to_string()]);
    }

    #[test]
    fn test_tighter_threshold_never_grows_results() {
        let items: Vec<Item> = (0..8)
            .map(|i| Item::new(format!("img{}", i), vec![(i * i) as f32 * 0.1, 1.0]))
            .collect();

        let mut previous: Option<(usize, usize, usize)> = None;
        for threshold in [3.0, 1.5, 0.8, 0.3, 0.1] {
            let run = run_buckets(&engine(), &items, &euclidean(threshold)).unwrap();
            let bucketed: usize = run.buckets.iter().map(Bucket::len).sum();
            let current = (run.accepted.len(), run.buckets.len(), bucketed);
            if let Some(prev) = previous {
                assert!(current.0 <= prev.0);
                assert!(current.2 <= prev.2);
            }
            previous = Some(current);
        }
    }

    #[test]
    fn test_unknown_metric_is_an_error() {
        let config = BucketConfig {
            metric: "Cosine".to_string(),
            ..Default::default()
        };
        assert!(run_buckets(&engine(), &abc(), &config).is_err());
    }

    #[test]
    fn test_bucket_traces_written() {
        let temp_dir = TempDir::new().unwrap();
        let config = BucketConfig {
            trace_dir: Some(temp_dir.path().to_path_buf()),
            ..euclidean(0.2)
        };
        run_buckets(&engine(), &abc(), &config).unwrap();

        for name in [trace::RESULTS, trace::VALUES_INDEX, trace::BUCKETS] {
            assert!(temp_dir.path().join(name).exists(), "missing {}", name);
        }
        let buckets: Vec<Vec<String>> = serde_json::from_str(
            &fs::read_to_string(temp_dir.path().join(trace::BUCKETS)).unwrap(),
        )
        .unwrap();
        assert_eq!(buckets, vec![vec!["A".to_string(), "B".to_string()]]);

        let values: Vec<(f64, String, String)> = serde_json::from_str(
            &fs::read_to_string(temp_dir.path().join(trace::VALUES_INDEX)).unwrap(),
        )
        .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].1, "A");
    }

    #[test]
    fn test_exact_duplicates_grouped() {
        let items = vec![
            Item::new("x.png", vec![0.2, 0.3, 0.5]),
            Item::new("y.png", vec![0.2, 0.3, 0.5]),
            Item::new("other.png", vec![0.6, 0.3, 0.1]),
            Item::new("z.png", vec![0.2, 0.3, 0.5]),
        ];
        let run = run_dedupe(&engine(), &items, &DedupeConfig::default()).unwrap();

        assert_eq!(run.evaluated, 6);
        assert_eq!(run.links.len(), 3);
        assert_eq!(run.groups.len(), 1);
        assert_eq!(run.groups[0].representative, "x.png");
        assert_eq!(
            run.groups[0].members,
            vec!["y.png".to_string(), "z.png".to_string()]
        );
    }

    #[test]
    fn test_dedupe_traces_written() {
        let temp_dir = TempDir::new().unwrap();
        let config = DedupeConfig {
            threshold: 0.0,
            trace_dir: Some(temp_dir.path().to_path_buf()),
        };
        let items = vec![
            Item::new("x.png", vec![0.5, 0.5]),
            Item::new("y.png", vec![0.5, 0.5]),
        ];
        run_dedupe(&engine(), &items, &config).unwrap();

        let raw = fs::read_to_string(temp_dir.path().join(trace::DUPE_INDEX)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["x.png"][0], "y.png");
    }

    #[test]
    fn test_nearest_traces_written() {
        let temp_dir = TempDir::new().unwrap();
        let config = NearestConfig {
            metric: "Euclidean".to_string(),
            trace_dir: Some(temp_dir.path().to_path_buf()),
        };
        let centers = vec![Item::new("red", vec![1.0, 0.0]), Item::new("blue", vec![0.0, 1.0])];
        let items = vec![Item::new("a.jpg", vec![0.1, 0.9])];

        let run = run_nearest(&engine(), &items, &centers, &config).unwrap();
        assert_eq!(run.center_of("a.jpg"), Some("blue"));
        assert!(temp_dir.path().join(trace::BUCKETS_INDEX).exists());
        assert!(temp_dir.path().join(trace::RESULTS).exists());
    }
}
