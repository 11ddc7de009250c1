//! Metric descriptors: a distance function paired with the direction in
//! which its values mean "more similar".

use crate::error::MetricError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Which end of a metric's range means "closer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Smaller values are closer (`d <= cutoff` accepts).
    Ascending,
    /// Larger values are closer (`d >= cutoff` accepts).
    Descending,
}

impl Direction {
    /// Ordering that puts the closer of two values first.
    pub fn best_first(self, a: f64, b: f64) -> Ordering {
        match self {
            Direction::Ascending => a.total_cmp(&b),
            Direction::Descending => b.total_cmp(&a),
        }
    }

    /// True when `a` is strictly closer than `b`.
    pub fn is_better(self, a: f64, b: f64) -> bool {
        self.best_first(a, b) == Ordering::Less
    }

    /// The closer of two values; `a` on ties.
    pub fn better(self, a: f64, b: f64) -> f64 {
        if self.is_better(b, a) { b } else { a }
    }
}

pub type MetricFn = dyn Fn(&[f32], &[f32]) -> Result<f64, MetricError> + Send + Sync;

/// A named distance function with its comparison direction.
///
/// Cheap to clone; the function is shared behind an `Arc` so a metric can
/// travel with every unit of work handed to the worker pool.
#[derive(Clone)]
pub struct Metric {
    name: String,
    direction: Direction,
    func: Arc<MetricFn>,
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .finish()
    }
}

impl Metric {
    pub fn new<F>(name: impl Into<String>, direction: Direction, func: F) -> Self
    where
        F: Fn(&[f32], &[f32]) -> Result<f64, MetricError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            direction,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Evaluate the metric, rejecting non-finite results.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f64, MetricError> {
        let d = (self.func)(a, b)?;
        if !d.is_finite() {
            return Err(MetricError::NonFinite {
                metric: self.name.clone(),
            });
        }
        Ok(d)
    }

    pub fn correlation() -> Self {
        Self::new("Correlation", Direction::Descending, correlation)
    }

    pub fn chi_squared() -> Self {
        Self::new("Chi-Squared", Direction::Ascending, chi_squared)
    }

    pub fn intersection() -> Self {
        Self::new("Intersection", Direction::Descending, intersection)
    }

    pub fn hellinger() -> Self {
        Self::new("Hellinger", Direction::Ascending, hellinger)
    }

    pub fn euclidean() -> Self {
        Self::new("Euclidean", Direction::Ascending, euclidean)
    }

    /// Resolve a built-in metric by name. Case, spaces, hyphens and
    /// underscores are ignored.
    pub fn by_name(name: &str) -> Result<Self, MetricError> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "correlation" | "correl" => Ok(Self::correlation()),
            "chisquared" | "chisqr" => Ok(Self::chi_squared()),
            "intersection" | "intersect" => Ok(Self::intersection()),
            "hellinger" | "bhattacharyya" => Ok(Self::hellinger()),
            "euclidean" | "l2" => Ok(Self::euclidean()),
            _ => Err(MetricError::UnknownMetric {
                name: name.to_string(),
            }),
        }
    }
}

impl Default for Metric {
    fn default() -> Self {
        Self::chi_squared()
    }
}

/// Inclusive cutoff whose comparison follows the metric's direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub cutoff: f64,
    pub direction: Direction,
}

impl Threshold {
    pub fn new(cutoff: f64, direction: Direction) -> Self {
        Self { cutoff, direction }
    }

    pub fn for_metric(cutoff: f64, metric: &Metric) -> Self {
        Self::new(cutoff, metric.direction())
    }

    pub fn accepts(&self, distance: f64) -> bool {
        match self.direction {
            Direction::Ascending => distance <= self.cutoff,
            Direction::Descending => distance >= self.cutoff,
        }
    }
}

fn check_dims(a: &[f32], b: &[f32]) -> Result<(), MetricError> {
    if a.len() != b.len() {
        return Err(MetricError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(MetricError::EmptyVector);
    }
    Ok(())
}

fn correlation(a: &[f32], b: &[f32]) -> Result<f64, MetricError> {
    check_dims(a, b)?;
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&x| x as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&x| x as f64).sum::<f64>() / n;

    let (mut num, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        let da = x as f64 - mean_a;
        let db = y as f64 - mean_b;
        num += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let scale = var_a * var_b;
    // Flat histograms correlate perfectly.
    if scale.abs() <= f64::EPSILON {
        return Ok(1.0);
    }
    Ok(num / scale.sqrt())
}

fn chi_squared(a: &[f32], b: &[f32]) -> Result<f64, MetricError> {
    check_dims(a, b)?;
    let mut sum = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let x = x as f64;
        let y = y as f64;
        if x.abs() > f64::EPSILON {
            sum += (x - y) * (x - y) / x;
        }
    }
    Ok(sum)
}

fn intersection(a: &[f32], b: &[f32]) -> Result<f64, MetricError> {
    check_dims(a, b)?;
    Ok(a.iter().zip(b).map(|(&x, &y)| x.min(y) as f64).sum())
}

fn hellinger(a: &[f32], b: &[f32]) -> Result<f64, MetricError> {
    check_dims(a, b)?;
    let (mut s1, mut s2, mut overlap) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        let x = x as f64;
        let y = y as f64;
        s1 += x;
        s2 += y;
        overlap += (x * y).sqrt();
    }

    let norm = s1 * s2;
    let scale = if norm > f32::EPSILON as f64 {
        1.0 / norm.sqrt()
    } else {
        1.0
    };
    Ok((1.0 - overlap * scale).max(0.0).sqrt())
}

fn euclidean(a: &[f32], b: &[f32]) -> Result<f64, MetricError> {
    check_dims(a, b)?;
    Ok(a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt())
}
