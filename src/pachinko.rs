//! Greedy bucket assignment over best-first accepted pairs.
//!
//! Pairs are dropped through the existing buckets one at a time, closest
//! first. A pair with one member already placed follows that member; a
//! pair with neither placed lands in the bucket it is closest to, or starts
//! a new one.

use crate::distance::{DistanceIndex, DistanceRecord};
use crate::error::InvariantViolation;
use crate::item::ItemId;
use crate::metric::Direction;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Members of one cluster, in insertion order. The first two are the pair
/// that founded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bucket {
    members: Vec<ItemId>,
}

impl Bucket {
    fn founded_by(a: &str, b: &str) -> Self {
        Self {
            members: vec![a.to_string(), b.to_string()],
        }
    }

    pub fn members(&self) -> &[ItemId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }
}

/// What happened to a single pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Both items were already placed.
    Skipped,
    /// One item followed its already-placed partner into `bucket`.
    Attached { bucket: usize },
    /// Both items joined the closest existing `bucket`.
    Joined { bucket: usize },
    /// The pair founded `bucket`.
    Created { bucket: usize },
}

/// Final buckets plus the item -> bucket index.
#[derive(Debug, Clone, Default)]
pub struct BucketAssignment {
    pub buckets: Vec<Bucket>,
    pub assignment: HashMap<ItemId, usize>,
}

/// Sort accepted pairs closest-first. Stable, so equal distances keep
/// their incoming order.
pub fn sort_best_first(records: &mut [DistanceRecord], direction: Direction) {
    records.sort_by(|x, y| direction.best_first(x.distance, y.distance));
}

/// Incremental assignment state. The distance index is read-only here; the
/// bucket list and `already_in_bucket` map are owned by this value.
pub struct Pachinko<'a> {
    index: &'a DistanceIndex,
    direction: Direction,
    buckets: Vec<Bucket>,
    already_in_bucket: HashMap<ItemId, usize>,
}

impl<'a> Pachinko<'a> {
    pub fn new(index: &'a DistanceIndex, direction: Direction) -> Self {
        Self {
            index,
            direction,
            buckets: Vec::new(),
            already_in_bucket: HashMap::new(),
        }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn bucket_of(&self, id: &str) -> Option<usize> {
        self.already_in_bucket.get(id).copied()
    }

    pub fn place(&mut self, record: &DistanceRecord) -> Placement {
        let (a, b) = (record.a.as_str(), record.b.as_str());
        if a == b {
            return Placement::Skipped;
        }

        match (self.bucket_of(a), self.bucket_of(b)) {
            (Some(_), Some(_)) => Placement::Skipped,
            (Some(bucket), None) => {
                self.push(bucket, b);
                Placement::Attached { bucket }
            }
            (None, Some(bucket)) => {
                self.push(bucket, a);
                Placement::Attached { bucket }
            }
            (None, None) => match self.closest_bucket(a, b) {
                Some(bucket) => {
                    self.push(bucket, a);
                    self.push(bucket, b);
                    Placement::Joined { bucket }
                }
                None => {
                    let bucket = self.buckets.len();
                    self.buckets.push(Bucket::founded_by(a, b));
                    self.already_in_bucket.insert(a.to_string(), bucket);
                    self.already_in_bucket.insert(b.to_string(), bucket);
                    Placement::Created { bucket }
                }
            },
        }
    }

    /// Best bucket for an unplaced pair. Buckets where some member has a
    /// known distance to both items (prime) beat buckets where only one
    /// distance is known (subprime); within a tier the closest score wins
    /// and the first bucket encountered wins ties.
    fn closest_bucket(&self, a: &str, b: &str) -> Option<usize> {
        let mut prime: Option<(f64, usize)> = None;
        let mut subprime: Option<(f64, usize)> = None;

        for (idx, bucket) in self.buckets.iter().enumerate() {
            for k in &bucket.members {
                let (tier, score) = match (self.index.get(a, k), self.index.get(b, k)) {
                    (Some(ad), Some(bd)) => (&mut prime, self.direction.better(ad, bd)),
                    (Some(d), None) | (None, Some(d)) => (&mut subprime, d),
                    (None, None) => continue,
                };
                let replace = match *tier {
                    Some((best, _)) => self.direction.is_better(score, best),
                    None => true,
                };
                if replace {
                    *tier = Some((score, idx));
                }
            }
        }

        prime.or(subprime).map(|(_, idx)| idx)
    }

    fn push(&mut self, bucket: usize, id: &str) {
        self.buckets[bucket].members.push(id.to_string());
        self.already_in_bucket.insert(id.to_string(), bucket);
    }

    pub fn finish(self) -> BucketAssignment {
        BucketAssignment {
            buckets: self.buckets,
            assignment: self.already_in_bucket,
        }
    }
}

/// Run the whole assignment over pairs that are already sorted best-first.
pub fn assign_buckets(
    accepted: &[DistanceRecord],
    index: &DistanceIndex,
    direction: Direction,
    bar: &ProgressBar,
) -> BucketAssignment {
    let mut pachinko = Pachinko::new(index, direction);
    for record in accepted {
        let placement = pachinko.place(record);
        log::debug!("{} / {} -> {:?}", record.a, record.b, placement);
        bar.inc(1);
    }
    bar.finish_and_clear();

    let result = pachinko.finish();
    log::info!(
        "Placed {} items into {} buckets",
        result.assignment.len(),
        result.buckets.len()
    );
    result
}

/// Verify that buckets partition exactly the items of the accepted pairs.
pub fn check_partition(
    result: &BucketAssignment,
    accepted: &[DistanceRecord],
) -> Result<(), InvariantViolation> {
    let known: HashSet<&str> = accepted
        .iter()
        .flat_map(|r| [r.a.as_str(), r.b.as_str()])
        .collect();

    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (idx, bucket) in result.buckets.iter().enumerate() {
        for id in &bucket.members {
            if let Some(first) = owner.insert(id, idx) {
                return Err(InvariantViolation::ItemInTwoBuckets {
                    id: id.clone(),
                    first,
                    second: idx,
                });
            }
            if !known.contains(id.as_str()) {
                return Err(InvariantViolation::UnknownBucketMember {
                    id: id.clone(),
                    bucket: idx,
                });
            }
        }
    }

    for id in known {
        if result.assignment.get(id) != owner.get(id) || !owner.contains_key(id) {
            return Err(InvariantViolation::Unbucketed { id: id.to_string() });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(distance: f64, a: &str, b: &str) -> DistanceRecord {
        DistanceRecord {
            distance,
            a: a.to_string(),
            b: b.to_string(),
        }
    }

    fn index_of(records: &[DistanceRecord]) -> DistanceIndex {
        let mut index = DistanceIndex::new();
        for r in records {
            index.insert(&r.a, &r.b, r.distance);
        }
        index
    }

    fn run(records: &[DistanceRecord], direction: Direction) -> BucketAssignment {
        let index = index_of(records);
        assign_buckets(records, &index, direction, &ProgressBar::hidden())
    }

    fn members(bucket: &Bucket) -> Vec<&str> {
        bucket.members().iter().map(String::as_str).collect()
    }

    #[test]
    fn test_chain_collapses_into_one_bucket() {
        let records = vec![
            record(1.0, "A", "B"),
            record(2.0, "A", "C"),
            record(3.0, "B", "D"),
        ];
        let result = run(&records, Direction::Ascending);

        assert_eq!(result.buckets.len(), 1);
        assert_eq!(members(&result.buckets[0]), vec!["A", "B", "C", "D"]);
        check_partition(&result, &records).unwrap();
    }

    #[test]
    fn test_disconnected_pairs_found_separate_buckets() {
        let records = vec![record(0.1, "A", "B"), record(0.2, "C", "D")];
        let result = run(&records, Direction::Ascending);

        assert_eq!(result.buckets.len(), 2);
        assert_eq!(members(&result.buckets[0]), vec!["A", "B"]);
        assert_eq!(members(&result.buckets[1]), vec!["C", "D"]);
        assert_eq!(result.assignment["D"], 1);
    }

    #[test]
    fn test_both_placed_is_skipped() {
        let records = vec![
            record(0.1, "A", "B"),
            record(0.2, "C", "D"),
            record(0.3, "B", "C"),
        ];
        let index = index_of(&records);
        let mut pachinko = Pachinko::new(&index, Direction::Ascending);

        assert_eq!(pachinko.place(&records[0]), Placement::Created { bucket: 0 });
        // B-C is already indexed, so C drags D into bucket 0.
        assert_eq!(pachinko.place(&records[1]), Placement::Joined { bucket: 0 });
        assert_eq!(pachinko.place(&records[2]), Placement::Skipped);
        assert_eq!(pachinko.buckets().len(), 1);
    }

    #[test]
    fn test_unrelated_pair_creates_bucket() {
        let records = vec![record(0.1, "A", "B"), record(0.2, "C", "D")];
        let index = index_of(&records);
        let mut pachinko = Pachinko::new(&index, Direction::Ascending);

        pachinko.place(&records[0]);
        assert_eq!(pachinko.place(&records[1]), Placement::Created { bucket: 1 });
        assert_eq!(pachinko.bucket_of("C"), Some(1));
    }

    #[test]
    fn test_prime_candidates_beat_closer_subprime() {
        let mut index = DistanceIndex::new();
        index.insert("p", "q", 0.01);
        index.insert("r", "s", 0.02);
        index.insert("a", "b", 0.05);
        // Only `a` knows bucket 0, and closely.
        index.insert("a", "p", 0.1);
        // Both `a` and `b` know bucket 1.
        index.insert("a", "r", 0.5);
        index.insert("b", "r", 0.6);

        let mut pachinko = Pachinko::new(&index, Direction::Ascending);
        pachinko.place(&record(0.01, "p", "q"));
        pachinko.place(&record(0.02, "r", "s"));

        assert_eq!(
            pachinko.place(&record(0.05, "a", "b")),
            Placement::Joined { bucket: 1 }
        );
    }

    #[test]
    fn test_subprime_used_when_no_prime() {
        let mut index = DistanceIndex::new();
        index.insert("p", "q", 0.01);
        index.insert("r", "s", 0.02);
        index.insert("a", "b", 0.05);
        index.insert("a", "p", 0.3);
        index.insert("b", "s", 0.2);

        let mut pachinko = Pachinko::new(&index, Direction::Ascending);
        pachinko.place(&record(0.01, "p", "q"));
        pachinko.place(&record(0.02, "r", "s"));

        assert_eq!(
            pachinko.place(&record(0.05, "a", "b")),
            Placement::Joined { bucket: 1 }
        );
        assert_eq!(members(&pachinko.buckets()[1]), vec!["r", "s", "a", "b"]);
    }

    #[test]
    fn test_descending_metric_prefers_largest_score() {
        let mut index = DistanceIndex::new();
        index.insert("p", "q", 0.99);
        index.insert("r", "s", 0.98);
        index.insert("a", "b", 0.97);
        index.insert("a", "p", 0.8);
        index.insert("b", "p", 0.85);
        index.insert("a", "r", 0.9);
        index.insert("b", "r", 0.7);

        let mut pachinko = Pachinko::new(&index, Direction::Descending);
        pachinko.place(&record(0.99, "p", "q"));
        pachinko.place(&record(0.98, "r", "s"));

        // Prime scores: bucket 0 -> 0.85, bucket 1 -> 0.9.
        assert_eq!(
            pachinko.place(&record(0.97, "a", "b")),
            Placement::Joined { bucket: 1 }
        );
    }

    #[test]
    fn test_ties_go_to_first_bucket() {
        let mut index = DistanceIndex::new();
        index.insert("p", "q", 0.01);
        index.insert("r", "s", 0.02);
        index.insert("a", "b", 0.05);
        index.insert("a", "q", 0.3);
        index.insert("a", "s", 0.3);

        let mut pachinko = Pachinko::new(&index, Direction::Ascending);
        pachinko.place(&record(0.01, "p", "q"));
        pachinko.place(&record(0.02, "r", "s"));

        assert_eq!(
            pachinko.place(&record(0.05, "a", "b")),
            Placement::Joined { bucket: 0 }
        );
    }

    #[test]
    fn test_zero_distance_counts_as_known() {
        let mut index = DistanceIndex::new();
        index.insert("p", "q", 0.0);
        index.insert("a", "b", 0.0);
        index.insert("a", "p", 0.0);

        let mut pachinko = Pachinko::new(&index, Direction::Ascending);
        pachinko.place(&record(0.0, "p", "q"));

        assert_eq!(
            pachinko.place(&record(0.0, "a", "b")),
            Placement::Joined { bucket: 0 }
        );
    }

    #[test]
    fn test_sort_is_stable_and_directional() {
        let mut records = vec![
            record(0.3, "A", "B"),
            record(0.1, "C", "D"),
            record(0.3, "E", "F"),
        ];
        sort_best_first(&mut records, Direction::Ascending);
        let order: Vec<&str> = records.iter().map(|r| r.a.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "E"]);

        sort_best_first(&mut records, Direction::Descending);
        let order: Vec<&str> = records.iter().map(|r| r.a.as_str()).collect();
        assert_eq!(order, vec!["A", "E", "C"]);
    }

    #[test]
    fn test_partition_check_catches_double_assignment() {
        let records = vec![record(0.1, "A", "B"), record(0.2, "C", "D")];
        let result = BucketAssignment {
            buckets: vec![
                Bucket::founded_by("A", "B"),
                Bucket::founded_by("B", "C"),
            ],
            assignment: HashMap::new(),
        };

        assert!(matches!(
            check_partition(&result, &records),
            Err(InvariantViolation::ItemInTwoBuckets { .. })
        ));
    }

    #[test]
    fn test_partition_check_catches_foreign_member() {
        let records = vec![record(0.1, "A", "B")];
        let result = BucketAssignment {
            buckets: vec![Bucket::founded_by("A", "Z")],
            assignment: HashMap::new(),
        };

        assert!(matches!(
            check_partition(&result, &records),
            Err(InvariantViolation::UnknownBucketMember { .. })
        ));
    }
}
