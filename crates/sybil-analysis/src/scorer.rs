//! Suspicion heuristics over the global partition.
//!
//! Three signals, any one of which flags a community:
//!
//! 1. **Weight ratio**: transfers inside the community outweigh transfers
//!    crossing its boundary by more than `suspicion_ratio` (strictly).
//! 2. **Low diversity**: some member moves a lot of value through very few
//!    counterparties (distinct neighbors / incident weight below threshold).
//! 3. **Young and busy**: a member younger than `min_account_age_days`
//!    already has more than `max_young_account_activity` counterparties.
//!    Needs an [`AccountAgeOracle`]; skipped without one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::error::PipelineError;
use crate::partition::{CommunityId, Partition};
use crate::transfer_graph::TransferGraph;

/// Source of account ages, e.g. first-seen block timestamps from an indexer.
pub trait AccountAgeOracle {
    /// Age of the account, or `None` if unknown.
    fn account_age(&self, account: &str) -> Option<chrono::Duration>;
}

/// Why a community was flagged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "heuristic", rename_all = "snake_case")]
pub enum SuspicionReason {
    WeightRatio { ratio: f64 },
    LowDiversity { account: String, diversity: f64 },
    YoungActiveAccount { account: String, age_days: i64, counterparties: usize },
}

/// One flagged community, reported once per scoring pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub community: CommunityId,
    pub members: Vec<String>,
    pub intra_weight: f64,
    pub inter_weight: f64,
    pub reasons: Vec<SuspicionReason>,
}

/// Edge weight inside and across the boundary of one community.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CommunityWeights {
    pub intra: f64,
    pub inter: f64,
}

#[derive(Clone, Debug)]
pub struct SuspicionScorer {
    suspicion_ratio: f64,
    diversity_threshold: f64,
    min_account_age: chrono::Duration,
    max_young_account_activity: usize,
}

impl Default for SuspicionScorer {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

impl SuspicionScorer {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            suspicion_ratio: config.suspicion_ratio,
            diversity_threshold: config.diversity_threshold,
            min_account_age: chrono::Duration::days(config.min_account_age_days),
            max_young_account_activity: config.max_young_account_activity,
        }
    }

    /// Score every community of `partition` against `graph`.
    ///
    /// Findings come back ordered by community id, one per community.
    pub fn score(
        &self,
        partition: &Partition,
        graph: &TransferGraph,
        oracle: Option<&dyn AccountAgeOracle>,
    ) -> Vec<Finding> {
        if oracle.is_none() {
            let err = PipelineError::HeuristicDataUnavailable {
                heuristic: "account_age",
                reason: "no account age oracle configured".to_string(),
            };
            tracing::debug!(error = %err);
        }

        let weights = community_weights(partition, graph);
        let mut findings = Vec::new();

        for (community, members) in partition.communities() {
            let totals = weights.get(&community).copied().unwrap_or_default();
            let mut reasons = Vec::new();

            if totals.intra > self.suspicion_ratio * totals.inter {
                let ratio = if totals.inter > 0.0 {
                    totals.intra / totals.inter
                } else {
                    f64::INFINITY
                };
                reasons.push(SuspicionReason::WeightRatio { ratio });
            }

            if let Some(reason) = self.low_diversity(&members, graph) {
                reasons.push(reason);
            }

            if let Some(oracle) = oracle {
                if let Some(reason) = self.young_active(&members, graph, oracle) {
                    reasons.push(reason);
                }
            }

            if !reasons.is_empty() {
                tracing::debug!(
                    community,
                    members = members.len(),
                    intra = totals.intra,
                    inter = totals.inter,
                    "community flagged"
                );
                findings.push(Finding {
                    community,
                    members,
                    intra_weight: totals.intra,
                    inter_weight: totals.inter,
                    reasons,
                });
            }
        }

        findings
    }

    fn low_diversity(&self, members: &[String], graph: &TransferGraph) -> Option<SuspicionReason> {
        members.iter().find_map(|account| {
            let stats = graph.node_stats(account)?;
            let diversity = if stats.incident_weight > 0.0 {
                stats.distinct_neighbors as f64 / stats.incident_weight
            } else {
                0.0
            };
            (diversity < self.diversity_threshold).then(|| SuspicionReason::LowDiversity {
                account: account.clone(),
                diversity,
            })
        })
    }

    fn young_active(
        &self,
        members: &[String],
        graph: &TransferGraph,
        oracle: &dyn AccountAgeOracle,
    ) -> Option<SuspicionReason> {
        members.iter().find_map(|account| {
            let age = oracle.account_age(account)?;
            let counterparties = graph.node_stats(account)?.distinct_neighbors;
            (age < self.min_account_age && counterparties > self.max_young_account_activity).then(
                || SuspicionReason::YoungActiveAccount {
                    account: account.clone(),
                    age_days: age.num_days(),
                    counterparties,
                },
            )
        })
    }
}

/// Intra and inter weight of every labelled community in one pass over the edges.
///
/// An edge counts as intra when both endpoints share a label, and as inter
/// for each labelled endpoint otherwise.
pub fn community_weights(
    partition: &Partition,
    graph: &TransferGraph,
) -> BTreeMap<CommunityId, CommunityWeights> {
    let mut weights: BTreeMap<CommunityId, CommunityWeights> = BTreeMap::new();

    for (from, to, edge) in graph.edges() {
        match (partition.get(from), partition.get(to)) {
            (Some(a), Some(b)) if a == b => weights.entry(a).or_default().intra += edge.weight,
            (a, b) => {
                for community in [a, b].into_iter().flatten() {
                    weights.entry(community).or_default().inter += edge.weight;
                }
            }
        }
    }

    weights
}
