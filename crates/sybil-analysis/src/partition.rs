//! Account → community mappings.
//!
//! A [`Partition`] is the only place community membership lives; a
//! community's member list is always derived by inverting the mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Community label. Local labels are dense per detector run; global labels
/// come from a [`LabelAllocator`] and are never reused.
pub type CommunityId = u64;

/// Mapping from account address to community label.
///
/// Accounts without an assignment are absent; there is no sentinel label.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    assignments: BTreeMap<String, CommunityId>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account: &str) -> Option<CommunityId> {
        self.assignments.get(account).copied()
    }

    pub fn assign(&mut self, account: impl Into<String>, community: CommunityId) {
        self.assignments.insert(account.into(), community);
    }

    pub fn remove(&mut self, account: &str) -> Option<CommunityId> {
        self.assignments.remove(account)
    }

    pub fn contains(&self, account: &str) -> bool {
        self.assignments.contains_key(account)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Assignments in account order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, CommunityId)> {
        self.assignments.iter().map(|(a, c)| (a.as_str(), *c))
    }

    /// Invert the mapping: community label → sorted member list.
    pub fn communities(&self) -> BTreeMap<CommunityId, Vec<String>> {
        let mut communities: BTreeMap<CommunityId, Vec<String>> = BTreeMap::new();
        for (account, community) in &self.assignments {
            communities
                .entry(*community)
                .or_default()
                .push(account.clone());
        }
        communities
    }

    /// Members of one community, sorted.
    pub fn members(&self, community: CommunityId) -> Vec<String> {
        self.assignments
            .iter()
            .filter(|(_, c)| **c == community)
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// Number of distinct labels in use.
    pub fn community_count(&self) -> usize {
        self.communities().len()
    }
}

impl FromIterator<(String, CommunityId)> for Partition {
    fn from_iter<I: IntoIterator<Item = (String, CommunityId)>>(iter: I) -> Self {
        Self {
            assignments: iter.into_iter().collect(),
        }
    }
}

/// Monotonic source of fresh global community labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelAllocator {
    next: CommunityId,
}

impl LabelAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after the labels already present in `partition`.
    pub fn after(partition: &Partition) -> Self {
        let next = partition.iter().map(|(_, c)| c + 1).max().unwrap_or(0);
        Self { next }
    }

    pub fn allocate(&mut self) -> CommunityId {
        let label = self.next;
        self.next += 1;
        label
    }

    /// The label the next call to [`allocate`](Self::allocate) returns.
    pub fn peek(&self) -> CommunityId {
        self.next
    }
}
