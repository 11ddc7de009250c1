use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Feature vector unavailable for {id}: {reason}")]
    Unavailable { id: String, reason: String },

    #[error("Duplicate item id: {id}")]
    DuplicateId { id: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Cannot compare empty feature vectors")]
    EmptyVector,

    #[error("Metric {metric} produced a non-finite value")]
    NonFinite { metric: String },

    #[error("Unknown metric: {name}")]
    UnknownMetric { name: String },

    #[error("Metric computation failed: {message}")]
    ComputationFailed { message: String },
}

/// Broken internal state. Never expected in correct operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("Item {id} is assigned to buckets {first} and {second}")]
    ItemInTwoBuckets {
        id: String,
        first: usize,
        second: usize,
    },

    #[error("Bucket {bucket} holds {id}, which is not part of any accepted pair")]
    UnknownBucketMember { id: String, bucket: usize },

    #[error("Accepted item {id} was left without a bucket")]
    Unbucketed { id: String },

    #[error("Dedupe id {id} appears in groups {first} and {second}")]
    IdInTwoGroups {
        id: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Metric(#[from] MetricError),
}
