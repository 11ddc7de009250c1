//! Transitive duplicate grouping.
//!
//! Backed by a union-find over item ids: every id resolves to the root of
//! its group, and linking two ids merges their roots. The larger group's
//! root survives a merge; on equal sizes the root seen first survives, so
//! the first id of a chain stays its representative.

use crate::error::InvariantViolation;
use crate::item::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A representative and the ids judged duplicates of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeGroup {
    pub representative: ItemId,
    pub members: Vec<ItemId>,
}

impl DedupeGroup {
    /// Representative first, then members.
    pub fn all(&self) -> impl Iterator<Item = &ItemId> {
        std::iter::once(&self.representative).chain(self.members.iter())
    }

    /// Number of ids in the group, representative included. Never zero.
    pub fn size(&self) -> usize {
        self.members.len() + 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupeIndex {
    ids: Vec<ItemId>,
    slots: HashMap<ItemId, usize>,
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DedupeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, id: &str) -> usize {
        if let Some(&slot) = self.slots.get(id) {
            return slot;
        }
        let slot = self.ids.len();
        self.ids.push(id.to_string());
        self.slots.insert(id.to_string(), slot);
        self.parent.push(slot);
        self.size.push(1);
        slot
    }

    fn find(&mut self, slot: usize) -> usize {
        let mut root = slot;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = slot;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Link `a` and `b` as duplicates. Returns false when they were already
    /// in the same group.
    pub fn add_pair(&mut self, a: &str, b: &str) -> bool {
        let sa = self.slot(a);
        let sb = self.slot(b);
        let ra = self.find(sa);
        let rb = self.find(sb);
        if ra == rb {
            return false;
        }

        let (keep, absorb) = if self.size[ra] > self.size[rb]
            || (self.size[ra] == self.size[rb] && ra < rb)
        {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[absorb] = keep;
        self.size[keep] += self.size[absorb];
        log::debug!("Merged {} into {}", self.ids[absorb], self.ids[keep]);
        true
    }

    /// Representative of `id`'s group, if `id` has been seen.
    pub fn representative(&mut self, id: &str) -> Option<&str> {
        let slot = *self.slots.get(id)?;
        let root = self.find(slot);
        Some(self.ids[root].as_str())
    }

    pub fn same_group(&mut self, a: &str, b: &str) -> bool {
        match (self.slots.get(a).copied(), self.slots.get(b).copied()) {
            (Some(sa), Some(sb)) => self.find(sa) == self.find(sb),
            _ => false,
        }
    }

    /// Number of distinct ids seen.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Materialize every group. Groups are ordered by their representative's
    /// first appearance, members by their own first appearance.
    pub fn groups(&mut self) -> Vec<DedupeGroup> {
        let mut order: Vec<usize> = Vec::new();
        let mut by_root: HashMap<usize, DedupeGroup> = HashMap::new();

        for slot in 0..self.ids.len() {
            let root = self.find(slot);
            let group = by_root.entry(root).or_insert_with(|| {
                order.push(root);
                DedupeGroup {
                    representative: self.ids[root].clone(),
                    members: Vec::new(),
                }
            });
            if slot != root {
                group.members.push(self.ids[slot].clone());
            }
        }

        order.sort_unstable();
        order
            .into_iter()
            .filter_map(|root| by_root.remove(&root))
            .collect()
    }

    /// `representative -> members`, the layout of the dedupe trace.
    pub fn to_map(&mut self) -> BTreeMap<ItemId, Vec<ItemId>> {
        self.groups()
            .into_iter()
            .map(|g| (g.representative, g.members))
            .collect()
    }

    /// Every id must appear exactly once across all groups.
    pub fn check(&mut self) -> Result<(), InvariantViolation> {
        check_groups(&self.groups())
    }
}

pub fn check_groups(groups: &[DedupeGroup]) -> Result<(), InvariantViolation> {
    let mut owner: HashMap<&str, &str> = HashMap::new();
    for group in groups {
        for id in group.all() {
            if let Some(first) = owner.insert(id, &group.representative) {
                return Err(InvariantViolation::IdInTwoGroups {
                    id: id.clone(),
                    first: first.to_string(),
                    second: group.representative.clone(),
                });
            }
        }
    }
    Ok(())
}
