//! Parallel distance computation and the adjacency index built from it.

use crate::config::EngineConfig;
use crate::error::{ConfigError, MetricError};
use crate::item::{Item, ItemId};
use crate::metric::Metric;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One evaluated pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceRecord {
    pub distance: f64,
    pub a: ItemId,
    pub b: ItemId,
}

/// How many orderings of each pair get evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairMode {
    /// Each unordered pair once.
    Slim,
    /// `(a, b)` and `(b, a)` independently.
    Full,
}

/// Ordered pairs that have already been evaluated.
#[derive(Debug, Clone, Default)]
pub struct ProcessedPairs {
    pairs: HashMap<ItemId, HashSet<ItemId>>,
    len: usize,
}

impl ProcessedPairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, a: &str, b: &str) {
        if self.pairs.entry(a.to_string()).or_default().insert(b.to_string()) {
            self.len += 1;
        }
    }

    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.pairs.get(a).is_some_and(|row| row.contains(b))
    }

    /// Whether the pair must be skipped under `mode`.
    fn covers(&self, a: &str, b: &str, mode: PairMode) -> bool {
        match mode {
            PairMode::Slim => self.contains(a, b) || self.contains(b, a),
            PairMode::Full => self.contains(a, b),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A single comparison that could not be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct PairFailure {
    pub a: ItemId,
    pub b: ItemId,
    pub error: MetricError,
}

/// Everything one batch produced.
#[derive(Debug, Default)]
pub struct DistanceRun {
    pub records: Vec<DistanceRecord>,
    pub failures: Vec<PairFailure>,
}

impl DistanceRun {
    /// `a -> b -> distance`, the layout of the results trace.
    pub fn results_map(&self) -> BTreeMap<ItemId, BTreeMap<ItemId, f64>> {
        let mut map: BTreeMap<ItemId, BTreeMap<ItemId, f64>> = BTreeMap::new();
        for record in &self.records {
            map.entry(record.a.clone())
                .or_default()
                .insert(record.b.clone(), record.distance);
        }
        map
    }
}

/// Unit of work handed to the pool. Holds no shared mutable state.
struct PairTask<'a> {
    a: &'a Item,
    b: &'a Item,
}

/// Fans distance computations out over a fixed worker pool.
///
/// Work is scheduled one row at a time (item `a` against every candidate
/// `b`); the row's comparisons run in parallel and the caller's handler is
/// invoked on the calling thread once the row has drained. Rows are
/// processed in item order, so slim mode sees every earlier row's pairs
/// before scheduling the next row and never evaluates a pair twice.
pub struct DistanceEngine {
    pool: ThreadPool,
    config: EngineConfig,
}

impl DistanceEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let pool = config.build_pool()?;
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Compare every item against every other item.
    ///
    /// Pairs already present in `processed` are skipped (either ordering in
    /// slim mode, the exact ordering in full mode); every evaluated pair is
    /// added to it. Without a set, full mode keeps no pair bookkeeping.
    pub fn pairwise<F>(
        &self,
        items: &[Item],
        metric: &Metric,
        mode: PairMode,
        processed: Option<&mut ProcessedPairs>,
        mut on_record: F,
    ) -> DistanceRun
    where
        F: FnMut(&DistanceRecord),
    {
        let mut run = DistanceRun::default();
        if items.len() < 2 {
            return run;
        }

        // Within a single call only slim mode can skip a pair, so full mode
        // tracks nothing unless the caller carries a set across calls.
        let mut local = ProcessedPairs::new();
        let mut processed = match processed {
            Some(set) => Some(set),
            None if mode == PairMode::Slim => Some(&mut local),
            None => None,
        };

        let n = items.len() as u64;
        let total = match mode {
            PairMode::Slim => n * (n - 1) / 2,
            PairMode::Full => n * (n - 1),
        };
        let bar = self.config.progress_bar(total, "Calculating distances");

        for a in items {
            let tasks: Vec<PairTask> = items
                .iter()
                .filter(|b| {
                    b.id != a.id
                        && !processed
                            .as_deref()
                            .is_some_and(|set| set.covers(&a.id, &b.id, mode))
                })
                .map(|b| PairTask { a, b })
                .collect();

            for (task, result) in self.evaluate(&tasks, metric) {
                if let Some(set) = processed.as_deref_mut() {
                    set.insert(&task.a.id, &task.b.id);
                }
                self.absorb(task, result, &mut run, &mut on_record);
                bar.inc(1);
            }
        }

        bar.finish_and_clear();
        log::info!(
            "Computed {} distances with {} ({} failed)",
            run.records.len(),
            metric.name(),
            run.failures.len()
        );
        run
    }

    /// Compare every item against every center. The populations are
    /// disjoint so no symmetric elision applies.
    pub fn cross<F>(
        &self,
        items: &[Item],
        centers: &[Item],
        metric: &Metric,
        mut on_record: F,
    ) -> DistanceRun
    where
        F: FnMut(&DistanceRecord),
    {
        let mut run = DistanceRun::default();
        let total = (items.len() * centers.len()) as u64;
        let bar = self.config.progress_bar(total, "Calculating distances");

        for a in items {
            let tasks: Vec<PairTask> = centers.iter().map(|b| PairTask { a, b }).collect();
            for (task, result) in self.evaluate(&tasks, metric) {
                self.absorb(task, result, &mut run, &mut on_record);
                bar.inc(1);
            }
        }

        bar.finish_and_clear();
        log::info!(
            "Compared {} items against {} centers ({} failed)",
            items.len(),
            centers.len(),
            run.failures.len()
        );
        run
    }

    fn evaluate<'t, 'a>(
        &self,
        tasks: &'t [PairTask<'a>],
        metric: &Metric,
    ) -> Vec<(&'t PairTask<'a>, Result<f64, MetricError>)> {
        self.pool.install(|| {
            tasks
                .par_iter()
                .map(|task| (task, metric.distance(&task.a.vector, &task.b.vector)))
                .collect()
        })
    }

    fn absorb<F>(
        &self,
        task: &PairTask,
        result: Result<f64, MetricError>,
        run: &mut DistanceRun,
        on_record: &mut F,
    ) where
        F: FnMut(&DistanceRecord),
    {
        match result {
            Ok(distance) => {
                let record = DistanceRecord {
                    distance,
                    a: task.a.id.clone(),
                    b: task.b.id.clone(),
                };
                on_record(&record);
                run.records.push(record);
            }
            Err(error) => {
                log::warn!("Failed to compare {} and {}: {}", task.a.id, task.b.id, error);
                run.failures.push(PairFailure {
                    a: task.a.id.clone(),
                    b: task.b.id.clone(),
                    error,
                });
            }
        }
    }
}

/// Symmetric `id -> id -> distance` lookup.
#[derive(Debug, Clone, Default)]
pub struct DistanceIndex {
    adjacency: HashMap<ItemId, HashMap<ItemId, f64>>,
}

impl DistanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `distance` for both orderings of the pair.
    pub fn insert(&mut self, a: &str, b: &str, distance: f64) {
        self.adjacency
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string(), distance);
        self.adjacency
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string(), distance);
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.adjacency.get(a).and_then(|row| row.get(b)).copied()
    }

    pub fn contains_item(&self, id: &str) -> bool {
        self.adjacency.contains_key(id)
    }

    /// Number of items with at least one known distance.
    pub fn item_count(&self) -> usize {
        self.adjacency.len()
    }
}
