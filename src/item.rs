use crate::error::FeatureError;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub type ItemId = String;

/// An identifier and its feature vector. Equality is by id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub vector: Vec<f32>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Item {}

/// Produces feature vectors on demand, e.g. by decoding an image and
/// computing its colour histogram.
pub trait FeatureProvider: Send + Sync {
    fn features(&self, id: &str) -> Result<Vec<f32>, FeatureError>;
}

/// In-memory [`FeatureProvider`], handy for precomputed vectors and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeatures {
    vectors: HashMap<ItemId, Vec<f32>>,
}

impl MemoryFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<ItemId>, vector: Vec<f32>) {
        self.vectors.insert(id.into(), vector);
    }
}

impl FeatureProvider for MemoryFeatures {
    fn features(&self, id: &str) -> Result<Vec<f32>, FeatureError> {
        self.vectors
            .get(id)
            .cloned()
            .ok_or_else(|| FeatureError::Unavailable {
                id: id.to_string(),
                reason: "no vector registered".to_string(),
            })
    }
}

#[derive(Debug, Default)]
pub struct FeatureCollection {
    /// Items whose vectors were produced, in request order.
    pub items: Vec<Item>,
    /// Items excluded from every comparison.
    pub unavailable: Vec<FeatureError>,
}

/// Fetch vectors for `ids` in parallel. Failing ids are logged and
/// excluded; a repeated id keeps its first occurrence.
pub fn collect_features<P: FeatureProvider + ?Sized>(
    ids: &[ItemId],
    provider: &P,
    pool: &ThreadPool,
) -> FeatureCollection {
    let results: Vec<(&ItemId, Result<Vec<f32>, FeatureError>)> = pool.install(|| {
        ids.par_iter()
            .map(|id| (id, provider.features(id)))
            .collect()
    });

    let mut seen = HashSet::new();
    let mut collection = FeatureCollection::default();
    for (id, result) in results {
        if !seen.insert(id.as_str()) {
            log::warn!("Skipping duplicate item id {}", id);
            collection
                .unavailable
                .push(FeatureError::DuplicateId { id: id.clone() });
            continue;
        }
        match result {
            Ok(vector) => collection.items.push(Item::new(id.clone(), vector)),
            Err(e) => {
                log::warn!("Excluding {}: {}", id, e);
                collection.unavailable.push(e);
            }
        }
    }

    log::info!(
        "Collected {} feature vectors ({} unavailable)",
        collection.items.len(),
        collection.unavailable.len()
    );
    collection
}
