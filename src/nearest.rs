//! Nearest-center labelling: every item goes to whichever of a fixed set
//! of centers it is closest to, with no threshold.

use crate::distance::{DistanceEngine, PairFailure};
use crate::item::{Item, ItemId};
use crate::metric::Metric;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Items that landed on one center, with their distance to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CenterBucket {
    pub label: ItemId,
    pub members: Vec<(ItemId, f64)>,
}

#[derive(Debug, Default)]
pub struct NearestRun {
    /// Non-empty buckets, in center order.
    pub buckets: Vec<CenterBucket>,
    /// Items for which every comparison failed.
    pub unassigned: Vec<ItemId>,
    pub failures: Vec<PairFailure>,
    /// `item -> center -> distance`, for tracing.
    pub results: BTreeMap<ItemId, BTreeMap<ItemId, f64>>,
}

impl NearestRun {
    pub fn center_of(&self, id: &str) -> Option<&str> {
        self.buckets
            .iter()
            .find(|b| b.members.iter().any(|(m, _)| m == id))
            .map(|b| b.label.as_str())
    }

    /// `label -> item -> distance`, the layout of the buckets trace.
    pub fn buckets_index(&self) -> BTreeMap<ItemId, BTreeMap<ItemId, f64>> {
        self.buckets
            .iter()
            .map(|b| (b.label.clone(), b.members.iter().cloned().collect()))
            .collect()
    }
}

/// Centers with distinct ids, first occurrence kept.
fn unique_centers(centers: &[Item]) -> Vec<Item> {
    let mut seen = HashSet::new();
    centers
        .iter()
        .filter(|c| {
            let fresh = seen.insert(c.id.as_str());
            if !fresh {
                log::warn!("Skipping duplicate center id {}", c.id);
            }
            fresh
        })
        .cloned()
        .collect()
}

/// Assign every item to its closest center, whatever the distance.
///
/// Each item is independent; no clustering state carries over between
/// items. Ties go to the center listed first. A repeated center id is
/// ignored after its first occurrence.
pub fn assign_nearest(
    engine: &DistanceEngine,
    items: &[Item],
    centers: &[Item],
    metric: &Metric,
) -> NearestRun {
    let unique = unique_centers(centers);
    let centers = unique.as_slice();
    let direction = metric.direction();
    let slot_of: HashMap<&str, usize> = centers
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    // item -> (center slot, distance)
    let mut best: HashMap<ItemId, (usize, f64)> = HashMap::new();
    let run = engine.cross(items, centers, metric, |record| {
        let Some(&slot) = slot_of.get(record.b.as_str()) else {
            return;
        };
        match best.get_mut(&record.a) {
            Some(current) if direction.is_better(record.distance, current.1) => {
                *current = (slot, record.distance);
            }
            Some(_) => {}
            None => {
                best.insert(record.a.clone(), (slot, record.distance));
            }
        }
    });

    let mut members: Vec<Vec<(ItemId, f64)>> = vec![Vec::new(); centers.len()];
    let mut unassigned = Vec::new();
    for item in items {
        match best.get(&item.id) {
            Some(&(slot, distance)) => members[slot].push((item.id.clone(), distance)),
            None => {
                log::warn!("No center could be compared with {}", item.id);
                unassigned.push(item.id.clone());
            }
        }
    }

    let buckets: Vec<CenterBucket> = centers
        .iter()
        .zip(members)
        .filter(|(_, m)| !m.is_empty())
        .map(|(center, members)| CenterBucket {
            label: center.id.clone(),
            members,
        })
        .collect();

    log::info!(
        "Assigned {} items to {} of {} centers",
        items.len() - unassigned.len(),
        buckets.len(),
        centers.len()
    );

    NearestRun {
        buckets,
        unassigned,
        results: run.results_map(),
        failures: run.failures,
    }
}
