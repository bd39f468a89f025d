//! Global transfer graph construction from batches of transfer records.
//!
//! Nodes are account addresses. Unlike a per-transaction transfer graph,
//! repeated transfers between the same ordered pair are folded into one
//! aggregated edge carrying cumulative weight and running statistics, so
//! the graph grows with the number of counterparty pairs rather than the
//! number of events.
//!
//! The graph is a petgraph `StableDiGraph` so that indices stay valid
//! while the retention window removes aged edges.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use sybil_data::TransferRecord;

use crate::partition::{CommunityId, Partition};

/// Identifier of an aggregated edge: the ordered (from, to) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId {
    pub from: String,
    pub to: String,
}

impl EdgeId {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Node weight: one account.
#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    /// Account address.
    pub address: String,
    /// Current global community label, if assigned.
    pub community: Option<CommunityId>,
}

/// Aggregated transfers between one ordered pair of accounts.
///
/// Weight and variance are updated together by [`TransferEdge::observe`]
/// using Welford's online algorithm.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferEdge {
    /// Cumulative transferred value.
    pub weight: f64,
    /// Number of observed transfers.
    pub count: u64,
    /// Running mean of per-transfer amounts.
    pub mean: f64,
    /// Sum of squared deviations from the running mean.
    m2: f64,
    /// Transfer records still retained in storage that contributed to this edge.
    pub live_records: u64,
}

impl TransferEdge {
    /// Fold one transfer amount into the running statistics.
    pub fn observe(&mut self, amount: f64) {
        self.count += 1;
        self.weight += amount;
        let delta = amount - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (amount - self.mean);
        self.live_records += 1;
    }

    /// Population variance of the observed amounts.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Degree statistics of one account, direction ignored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeStats {
    /// Distinct counterparties.
    pub distinct_neighbors: usize,
    /// Sum of weights of all incident edges.
    pub incident_weight: f64,
}

/// The process-wide weighted transfer graph.
#[derive(Default)]
pub struct TransferGraph {
    graph: StableDiGraph<Account, TransferEdge>,
    addr_to_ix: HashMap<String, NodeIndex>,
    edge_to_ix: HashMap<EdgeId, EdgeIndex>,
}

impl TransferGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_account(&self, address: &str) -> bool {
        self.addr_to_ix.contains_key(address)
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&TransferEdge> {
        self.edge_to_ix.get(id).and_then(|&ix| self.graph.edge_weight(ix))
    }

    pub fn account(&self, address: &str) -> Option<&Account> {
        self.addr_to_ix
            .get(address)
            .and_then(|&ix| self.graph.node_weight(ix))
    }

    /// All accounts, in index order.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.graph.node_indices().map(move |ix| &self.graph[ix])
    }

    /// All aggregated edges as `(from, to, edge)`.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &TransferEdge)> {
        self.graph.edge_references().map(move |e| {
            (
                self.graph[e.source()].address.as_str(),
                self.graph[e.target()].address.as_str(),
                e.weight(),
            )
        })
    }

    /// Fold a batch of transfer records into the graph.
    ///
    /// Creates accounts on first reference and returns the ids of every
    /// edge created or updated by this call.
    pub fn ingest(&mut self, batch: &[TransferRecord]) -> BTreeSet<EdgeId> {
        let mut touched = BTreeSet::new();

        for record in batch {
            let from_ix = self.get_or_add_node(&record.from);
            let to_ix = self.get_or_add_node(&record.to);
            let id = EdgeId::new(record.from.as_str(), record.to.as_str());

            let edge_ix = match self.edge_to_ix.get(&id) {
                Some(&ix) => ix,
                None => {
                    let ix = self.graph.add_edge(from_ix, to_ix, TransferEdge::default());
                    self.edge_to_ix.insert(id.clone(), ix);
                    ix
                }
            };
            self.graph[edge_ix].observe(record.amount);
            touched.insert(id);
        }

        touched
    }

    /// Minimal subgraph spanning exactly `edge_ids` and their endpoints.
    ///
    /// Nodes are numbered in order of first appearance while walking the
    /// (sorted) edge ids, which keeps detection deterministic. Unknown ids
    /// are skipped.
    pub fn induced_subgraph(&self, edge_ids: &BTreeSet<EdgeId>) -> Subgraph {
        let mut subgraph = Subgraph::new();
        for id in edge_ids {
            if let Some(edge) = self.edge(id) {
                subgraph.add_edge(&id.from, &id.to, edge.weight);
            }
        }
        subgraph
    }

    /// Retire the backing records of evicted transfers.
    ///
    /// Returns the edges left with no retained records; those are the ones
    /// the retention window should remove.
    pub fn release(&mut self, records: &[TransferRecord]) -> BTreeSet<EdgeId> {
        let mut exhausted = BTreeSet::new();
        for record in records {
            let id = EdgeId::new(record.from.as_str(), record.to.as_str());
            let Some(&ix) = self.edge_to_ix.get(&id) else {
                continue;
            };
            let edge = &mut self.graph[ix];
            edge.live_records = edge.live_records.saturating_sub(1);
            if edge.live_records == 0 {
                exhausted.insert(id);
            } else {
                exhausted.remove(&id);
            }
        }
        exhausted
    }

    /// Remove the given edges, then every endpoint left with degree zero.
    ///
    /// Returns the addresses of removed accounts.
    pub fn remove_edges_and_orphan_nodes(&mut self, edge_ids: &BTreeSet<EdgeId>) -> Vec<String> {
        let mut endpoints = BTreeSet::new();
        for id in edge_ids {
            let Some(ix) = self.edge_to_ix.remove(id) else {
                continue;
            };
            self.graph.remove_edge(ix);
            endpoints.insert(id.from.clone());
            endpoints.insert(id.to.clone());
        }

        let mut removed = Vec::new();
        for address in endpoints {
            let Some(&ix) = self.addr_to_ix.get(&address) else {
                continue;
            };
            if self.graph.neighbors_undirected(ix).next().is_none() {
                self.graph.remove_node(ix);
                self.addr_to_ix.remove(&address);
                removed.push(address);
            }
        }
        removed
    }

    /// Distinct counterparties and incident weight of an account.
    pub fn node_stats(&self, address: &str) -> Option<NodeStats> {
        let &ix = self.addr_to_ix.get(address)?;
        let mut neighbors = HashSet::new();
        let mut incident_weight = 0.0;

        for direction in [Direction::Outgoing, Direction::Incoming] {
            for edge in self.graph.edges_directed(ix, direction) {
                let other = if edge.source() == ix {
                    edge.target()
                } else {
                    edge.source()
                };
                if other != ix {
                    neighbors.insert(other);
                }
                incident_weight += edge.weight().weight;
            }
        }

        Some(NodeStats {
            distinct_neighbors: neighbors.len(),
            incident_weight,
        })
    }

    /// Copy global community labels onto the account nodes.
    pub fn apply_partition(&mut self, partition: &Partition) {
        for account in self.graph.node_weights_mut() {
            account.community = partition.get(&account.address);
        }
    }

    fn get_or_add_node(&mut self, address: &str) -> NodeIndex {
        if let Some(&ix) = self.addr_to_ix.get(address) {
            return ix;
        }
        let ix = self.graph.add_node(Account {
            address: address.to_string(),
            community: None,
        });
        self.addr_to_ix.insert(address.to_string(), ix);
        ix
    }
}

/// A compact weighted subgraph handed to the community detector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Subgraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<(usize, usize, f64)>,
}

impl Subgraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(from, to, weight)` triples, in order.
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = (&'a str, &'a str, f64)>) -> Self {
        let mut subgraph = Self::new();
        for (from, to, weight) in edges {
            subgraph.add_edge(from, to, weight);
        }
        subgraph
    }

    /// Add an isolated node (no-op if present). Returns its local index.
    pub fn add_node(&mut self, address: &str) -> usize {
        if let Some(&ix) = self.index.get(address) {
            return ix;
        }
        let ix = self.nodes.len();
        self.nodes.push(address.to_string());
        self.index.insert(address.to_string(), ix);
        ix
    }

    pub fn add_edge(&mut self, from: &str, to: &str, weight: f64) {
        let u = self.add_node(from);
        let v = self.add_node(to);
        self.edges.push((u, v, weight));
    }

    /// Node addresses in insertion order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Directed weighted edges over local node indices.
    pub fn edges(&self) -> &[(usize, usize, f64)] {
        &self.edges
    }

    pub fn node_index(&self, address: &str) -> Option<usize> {
        self.index.get(address).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains_key(address)
    }
}
