use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::graph::Dataset;
use crate::types::NodeId;

/// Per-node access counters.
pub struct NodeAccessLog {
    counts: Vec<AtomicU64>,
}

/// One row of a [`NodeAccessSummary`].
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NodeAccess {
    /// Node id.
    pub node: NodeId,
    /// Times the node appeared in a batch's input set.
    pub count: u64,
    /// In-degree of the node.
    pub in_degree: u32,
    /// Out-degree of the node.
    pub out_degree: u32,
}

/// Access frequency digest.
#[derive(Clone, Debug, Serialize)]
pub struct NodeAccessSummary {
    /// Sum of all counters.
    pub total_accesses: u64,
    /// Nodes accessed at least once.
    pub distinct_nodes: usize,
    /// Most accessed nodes, highest first.
    pub top: Vec<NodeAccess>,
}

impl NodeAccessLog {
    /// Counters for `num_nodes` nodes.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            counts: (0..num_nodes).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Counts one access per listed node.
    pub fn record(&self, nodes: &[NodeId]) {
        for node in nodes {
            if let Some(counter) = self.counts.get(*node as usize) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Current counter of `node`.
    pub fn count(&self, node: NodeId) -> u64 {
        self.counts
            .get(node as usize)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Digest with the `top_k` most accessed nodes.
    pub fn summary(&self, graph: &Dataset, top_k: usize) -> NodeAccessSummary {
        let mut rows: Vec<(NodeId, u64)> = self
            .counts
            .iter()
            .enumerate()
            .map(|(node, c)| (node as NodeId, c.load(Ordering::Relaxed)))
            .filter(|(_, c)| *c > 0)
            .collect();
        let total_accesses = rows.iter().map(|(_, c)| *c).sum();
        let distinct_nodes = rows.len();
        rows.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let top = rows
            .into_iter()
            .take(top_k)
            .map(|(node, count)| NodeAccess {
                node,
                count,
                in_degree: graph.in_degrees().get(node as usize).copied().unwrap_or(0),
                out_degree: graph.out_degrees().get(node as usize).copied().unwrap_or(0),
            })
            .collect();
        NodeAccessSummary {
            total_accesses,
            distinct_nodes,
            top,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DatasetBuilder;

    #[test]
    fn summary_ranks_by_count() {
        let graph = DatasetBuilder::new(4).edges([(0, 3), (1, 3)]).build().unwrap();
        let log = NodeAccessLog::new(4);
        log.record(&[3, 1, 3, 3, 1, 0]);
        log.record(&[7]);
        let summary = log.summary(&graph, 2);
        assert_eq!(summary.total_accesses, 6);
        assert_eq!(summary.distinct_nodes, 3);
        assert_eq!(summary.top[0].node, 3);
        assert_eq!(summary.top[0].in_degree, 2);
        assert_eq!(summary.top[1].count, 2);
    }
}
