//! Louvain community detection over a batch's induced subgraph.
//!
//! Edge direction is ignored: `a → b` and `b → a` contribute to the same
//! undirected affinity. Each level runs local moving (every node, in fixed
//! index order, joins the neighboring community with the largest positive
//! modularity gain) and then contracts communities into super-nodes. The
//! run stops when a level moves nothing or the iteration cap is reached.
//!
//! Ties are broken towards the node's current community, then towards the
//! neighbor community seen first, so identical inputs always produce
//! identical partitions.

use std::collections::{BTreeMap, HashMap};

use crate::partition::{CommunityId, Partition};
use crate::transfer_graph::Subgraph;

/// Gains smaller than this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

/// Modularity-maximizing clustering of a [`Subgraph`].
#[derive(Clone, Debug)]
pub struct CommunityDetector {
    max_iterations: usize,
}

impl Default for CommunityDetector {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

impl CommunityDetector {
    /// `max_iterations` caps both the local-moving sweeps per level and the
    /// number of aggregation levels.
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    /// Assign every subgraph node a run-local community id.
    ///
    /// Ids are dense and numbered by first appearance in node order. A
    /// subgraph without weighted edges yields singleton communities.
    pub fn detect(&self, subgraph: &Subgraph) -> Partition {
        let n = subgraph.node_count();
        let mut graph = LevelGraph::from_subgraph(subgraph);
        // original node -> node of the current level
        let mut membership: Vec<usize> = (0..n).collect();

        if graph.total_weight > 0.0 {
            for level in 0..self.max_iterations {
                let (community, moved) = self.local_moving(&graph);
                if !moved {
                    tracing::trace!(level, "no improving move, stopping");
                    break;
                }
                let (dense, count) = renumber(&community);
                for node in membership.iter_mut() {
                    *node = dense[*node];
                }
                graph = graph.aggregate(&dense, count);
            }
        }

        let (labels, count) = renumber(&membership);
        tracing::debug!(
            nodes = n,
            edges = subgraph.edge_count(),
            communities = count,
            "louvain finished"
        );

        subgraph
            .nodes()
            .iter()
            .zip(labels)
            .map(|(address, label)| (address.clone(), label as CommunityId))
            .collect()
    }

    fn local_moving(&self, graph: &LevelGraph) -> (Vec<usize>, bool) {
        let n = graph.node_count();
        let two_m = 2.0 * graph.total_weight;
        let mut community: Vec<usize> = (0..n).collect();
        let mut totals = graph.degrees.clone();
        let mut moved_any = false;

        for _ in 0..self.max_iterations {
            let mut moved = false;

            for node in 0..n {
                let current = community[node];
                let degree = graph.degrees[node];
                let links = neighbor_community_weights(graph, &community, node);

                totals[current] -= degree;
                let own_links = links
                    .iter()
                    .find(|(c, _)| *c == current)
                    .map_or(0.0, |(_, w)| *w);
                let mut best = current;
                let mut best_gain = own_links - totals[current] * degree / two_m;

                for &(candidate, weight) in &links {
                    if candidate == current {
                        continue;
                    }
                    let gain = weight - totals[candidate] * degree / two_m;
                    if gain > best_gain + MIN_GAIN {
                        best = candidate;
                        best_gain = gain;
                    }
                }

                totals[best] += degree;
                if best != current {
                    community[node] = best;
                    moved = true;
                    moved_any = true;
                }
            }

            if !moved {
                break;
            }
        }

        (community, moved_any)
    }
}

/// Newman modularity of `partition` over `subgraph`, direction ignored.
///
/// Nodes missing from the partition count as singletons.
pub fn modularity(subgraph: &Subgraph, partition: &Partition) -> f64 {
    let graph = LevelGraph::from_subgraph(subgraph);
    if graph.total_weight <= 0.0 {
        return 0.0;
    }
    let two_m = 2.0 * graph.total_weight;

    let mut keys: HashMap<(bool, u64), usize> = HashMap::new();
    let community: Vec<usize> = subgraph
        .nodes()
        .iter()
        .enumerate()
        .map(|(i, address)| {
            let key = match partition.get(address) {
                Some(c) => (true, c),
                None => (false, i as u64),
            };
            let next = keys.len();
            *keys.entry(key).or_insert(next)
        })
        .collect();

    let mut internal = vec![0.0; keys.len()];
    let mut totals = vec![0.0; keys.len()];
    for node in 0..graph.node_count() {
        let c = community[node];
        totals[c] += graph.degrees[node];
        internal[c] += 2.0 * graph.self_loops[node];
        for &(other, weight) in &graph.adjacency[node] {
            if community[other] == c {
                internal[c] += weight;
            }
        }
    }

    internal
        .iter()
        .zip(&totals)
        .map(|(inside, total)| inside / two_m - (total / two_m).powi(2))
        .sum()
}

/// Undirected weighted graph of one Louvain level.
struct LevelGraph {
    /// Symmetric adjacency without self-loops, neighbors sorted.
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    /// Weighted degree; self-loops count twice.
    degrees: Vec<f64>,
    total_weight: f64,
}

impl LevelGraph {
    fn from_subgraph(subgraph: &Subgraph) -> Self {
        let n = subgraph.node_count();
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
        let mut self_loops = vec![0.0; n];

        for &(u, v, weight) in subgraph.edges() {
            if u == v {
                self_loops[u] += weight;
            } else {
                *links[u].entry(v).or_insert(0.0) += weight;
                *links[v].entry(u).or_insert(0.0) += weight;
            }
        }

        Self::build(links, self_loops)
    }

    fn build(links: Vec<BTreeMap<usize, f64>>, self_loops: Vec<f64>) -> Self {
        let adjacency: Vec<Vec<(usize, f64)>> = links
            .into_iter()
            .map(|neighbors| neighbors.into_iter().collect())
            .collect();
        let degrees: Vec<f64> = adjacency
            .iter()
            .zip(&self_loops)
            .map(|(neighbors, own)| neighbors.iter().map(|(_, w)| w).sum::<f64>() + 2.0 * own)
            .collect();
        let total_weight = degrees.iter().sum::<f64>() / 2.0;

        Self {
            adjacency,
            self_loops,
            degrees,
            total_weight,
        }
    }

    fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Contract each community into one super-node.
    fn aggregate(&self, community: &[usize], count: usize) -> Self {
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
        let mut self_loops = vec![0.0; count];

        for node in 0..self.node_count() {
            let c = community[node];
            self_loops[c] += self.self_loops[node];
            for &(other, weight) in &self.adjacency[node] {
                let d = community[other];
                if c == d {
                    // each undirected edge is visited from both ends
                    self_loops[c] += weight / 2.0;
                } else {
                    *links[c].entry(d).or_insert(0.0) += weight;
                }
            }
        }

        Self::build(links, self_loops)
    }
}

/// Weight from `node` to each neighboring community, in first-seen order.
fn neighbor_community_weights(
    graph: &LevelGraph,
    community: &[usize],
    node: usize,
) -> Vec<(usize, f64)> {
    let mut weights: Vec<(usize, f64)> = Vec::new();
    for &(other, weight) in &graph.adjacency[node] {
        let c = community[other];
        match weights.iter_mut().find(|(seen, _)| *seen == c) {
            Some((_, total)) => *total += weight,
            None => weights.push((c, weight)),
        }
    }
    weights
}

/// Relabel densely by first appearance. Returns the labels and their count.
fn renumber(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let dense = labels
        .iter()
        .map(|label| {
            let next = mapping.len();
            *mapping.entry(*label).or_insert(next)
        })
        .collect();
    (dense, mapping.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two dense triangles joined by one weak bridge.
    fn two_triangles() -> Subgraph {
        Subgraph::from_edges([
            ("a", "b", 5.0),
            ("b", "c", 5.0),
            ("c", "a", 5.0),
            ("d", "e", 5.0),
            ("e", "f", 5.0),
            ("f", "d", 5.0),
            ("c", "d", 0.1),
        ])
    }

    #[test]
    fn separates_weakly_bridged_triangles() {
        let partition = CommunityDetector::default().detect(&two_triangles());

        assert_eq!(partition.len(), 6);
        assert_eq!(partition.get("a"), partition.get("b"));
        assert_eq!(partition.get("b"), partition.get("c"));
        assert_eq!(partition.get("d"), partition.get("e"));
        assert_eq!(partition.get("e"), partition.get("f"));
        assert_ne!(partition.get("a"), partition.get("d"));
        // dense, first-appearance numbering
        assert_eq!(partition.get("a"), Some(0));
        assert_eq!(partition.get("d"), Some(1));
    }

    #[test]
    fn detection_is_deterministic() {
        let subgraph = two_triangles();
        let detector = CommunityDetector::new(10);
        assert_eq!(detector.detect(&subgraph), detector.detect(&subgraph));
    }

    #[test]
    fn edgeless_subgraph_yields_singletons() {
        let mut subgraph = Subgraph::new();
        subgraph.add_node("x");
        subgraph.add_node("y");
        subgraph.add_node("z");

        let partition = CommunityDetector::default().detect(&subgraph);
        assert_eq!(partition.get("x"), Some(0));
        assert_eq!(partition.get("y"), Some(1));
        assert_eq!(partition.get("z"), Some(2));
    }

    #[test]
    fn empty_subgraph_yields_empty_partition() {
        let partition = CommunityDetector::default().detect(&Subgraph::new());
        assert!(partition.is_empty());
    }

    #[test]
    fn single_edge_forms_one_community() {
        let subgraph = Subgraph::from_edges([("a", "b", 3.0)]);
        let partition = CommunityDetector::default().detect(&subgraph);
        assert_eq!(partition.get("a"), Some(0));
        assert_eq!(partition.get("b"), Some(0));
    }

    #[test]
    fn opposite_directions_share_affinity() {
        let subgraph = Subgraph::from_edges([("a", "b", 1.0), ("b", "a", 1.0), ("b", "c", 1.0)]);
        let partition = CommunityDetector::default().detect(&subgraph);
        assert_eq!(partition.get("a"), partition.get("b"));
    }

    #[test]
    fn detected_partition_beats_singletons() {
        let subgraph = two_triangles();
        let detected = CommunityDetector::default().detect(&subgraph);
        let singletons: Partition = subgraph
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, a)| (a.clone(), i as CommunityId))
            .collect();

        let q = modularity(&subgraph, &detected);
        assert!(q > modularity(&subgraph, &singletons));
        assert!(q > 0.4, "two clean triangles should score well, got {q}");
    }

    #[test]
    fn whole_graph_in_one_community_has_zero_modularity() {
        let subgraph = two_triangles();
        let one: Partition = subgraph.nodes().iter().map(|a| (a.clone(), 0)).collect();
        assert!(modularity(&subgraph, &one).abs() < 1e-12);
    }

    #[test]
    fn iteration_cap_of_one_still_assigns_every_node() {
        let partition = CommunityDetector::new(1).detect(&two_triangles());
        assert_eq!(partition.len(), 6);
    }
}
