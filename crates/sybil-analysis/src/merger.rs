//! Folding a batch-local partition into the global partition.
//!
//! Local community ids mean nothing outside the detector run that produced
//! them. For every local community the merger looks at the global labels
//! its members already carry:
//!
//! - no labelled member: the community is new and gets a fresh label
//! - one label: the community grew, its members take that label
//! - several labels: the label with the largest overlap survives (ties go
//!   to the numerically smaller label) and the touched members of the other
//!   communities move to it
//!
//! A surviving label must hold at least half of the community's labelled
//! members. When none does, the community is ambiguous and falls back to a
//! fresh label. Several local communities may resolve to the same label;
//! they are then united under it.
//!
//! Only touched accounts are ever relabelled. Accounts outside the batch
//! keep their label even when their community merged with another one.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::PipelineError;
use crate::partition::{CommunityId, LabelAllocator, Partition};
use crate::transfer_graph::{EdgeId, Subgraph};

/// Result of one merge. Nothing is applied until the caller swaps it in.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    /// The complete new global partition.
    pub partition: Partition,
    /// Allocator state after any fresh labels were handed out.
    pub labels: LabelAllocator,
    /// Fresh global labels allocated by this merge, in allocation order.
    pub new_labels: Vec<CommunityId>,
    /// Local communities that joined an existing global community.
    pub continued: usize,
    /// Local communities that spanned more than one global community.
    pub merged: usize,
    /// Local communities with no majority label that fell back to a fresh one.
    pub conflicts: usize,
}

struct Claim {
    local: CommunityId,
    members: Vec<String>,
    /// Label with the largest overlap and how many members carried it.
    best: Option<(CommunityId, usize)>,
    /// Members that already carried any global label.
    labelled: usize,
    overlapped: usize,
}

impl Claim {
    /// The label this community resolves to, or the error explaining why
    /// it has none. `Ok(None)` means nothing was labelled before.
    fn survivor(&self) -> Result<Option<CommunityId>, PipelineError> {
        match self.best {
            None => Ok(None),
            Some((label, overlap)) if overlap * 2 >= self.labelled => Ok(Some(label)),
            Some((label, overlap)) => Err(PipelineError::MergeConflictAmbiguous {
                local: self.local,
                best: label,
                overlap,
                labelled: self.labelled,
            }),
        }
    }
}

/// Merge `local` into `global` for the accounts touched by this batch.
pub fn merge(
    local: &Partition,
    global: &Partition,
    touched_edges: &BTreeSet<EdgeId>,
    subgraph: &Subgraph,
    labels: &LabelAllocator,
) -> MergeOutcome {
    let touched = touched_accounts(touched_edges, subgraph);
    let mut labels = labels.clone();
    let mut partition = global.clone();
    let mut outcome_labels = Vec::new();

    // Ascending local ids keep fresh label allocation deterministic.
    let claims: Vec<Claim> = local
        .communities()
        .into_iter()
        .map(|(local_id, members)| {
            let members: Vec<String> = members
                .into_iter()
                .filter(|m| touched.contains(m.as_str()))
                .collect();
            claim_for(local_id, members, global)
        })
        .filter(|claim| !claim.members.is_empty())
        .collect();

    if global.is_empty() {
        tracing::debug!(communities = claims.len(), "initial batch, adopting local partition");
    }

    let mut joined: HashSet<CommunityId> = HashSet::new();
    let mut continued = 0;
    let mut merged = 0;
    let mut conflicts = 0;

    for claim in &claims {
        let label = match claim.survivor() {
            Ok(Some(global_label)) => {
                continued += 1;
                if !joined.insert(global_label) {
                    tracing::debug!(
                        local = claim.local,
                        survivor = global_label,
                        "local community joins a label already claimed in this batch"
                    );
                }
                if claim.overlapped > 1 {
                    merged += 1;
                    tracing::debug!(
                        local = claim.local,
                        survivor = global_label,
                        overlapped = claim.overlapped,
                        "local community spans several global communities"
                    );
                }
                global_label
            }
            Ok(None) => {
                let fresh = labels.allocate();
                outcome_labels.push(fresh);
                fresh
            }
            Err(err) => {
                conflicts += 1;
                tracing::warn!(error = %err, "falling back to a new community");
                let fresh = labels.allocate();
                outcome_labels.push(fresh);
                fresh
            }
        };

        for member in &claim.members {
            partition.assign(member.as_str(), label);
        }
    }

    MergeOutcome {
        partition,
        labels,
        new_labels: outcome_labels,
        continued,
        merged,
        conflicts,
    }
}

fn claim_for(local: CommunityId, members: Vec<String>, global: &Partition) -> Claim {
    let mut overlap: BTreeMap<CommunityId, usize> = BTreeMap::new();
    for member in &members {
        if let Some(label) = global.get(member) {
            *overlap.entry(label).or_insert(0) += 1;
        }
    }

    // BTreeMap iterates labels ascending, so keeping only strictly larger
    // counts leaves the smaller label on ties.
    let mut best: Option<(CommunityId, usize)> = None;
    for (&label, &count) in &overlap {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((label, count));
        }
    }

    Claim {
        local,
        members,
        best,
        labelled: overlap.values().sum(),
        overlapped: overlap.len(),
    }
}

fn touched_accounts<'a>(edges: &'a BTreeSet<EdgeId>, subgraph: &'a Subgraph) -> HashSet<&'a str> {
    let mut touched: HashSet<&str> = subgraph.nodes().iter().map(String::as_str).collect();
    for edge in edges {
        touched.insert(edge.from.as_str());
        touched.insert(edge.to.as_str());
    }
    touched
}
