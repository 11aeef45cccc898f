use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashSet;
use tracing::info;

use super::presample::presample_ranking;
use crate::config::{CachePolicy, RunConfig};
use crate::graph::{Dataset, CACHE_BY_DEGREE_FILE, CACHE_BY_HEURISTIC_FILE};
use crate::types::{NodeId, Result};

/// Nodes ordered by in-degree, highest first; ties by smaller id.
pub fn rank_by_degree(graph: &Dataset) -> Vec<NodeId> {
    if let Some(stored) = &graph.stored_rankings().by_degree {
        return stored.clone();
    }
    let degrees = graph.in_degrees();
    let mut nodes: Vec<NodeId> = (0..graph.num_nodes() as NodeId).collect();
    nodes.sort_by(|a, b| degrees[*b as usize].cmp(&degrees[*a as usize]).then(a.cmp(b)));
    nodes
}

/// Train nodes, then their one-hop neighbors, then the rest; each tier
/// by in-degree, highest first.
pub fn rank_by_heuristic(graph: &Dataset) -> Vec<NodeId> {
    if let Some(stored) = &graph.stored_rankings().by_heuristic {
        return stored.clone();
    }
    let n = graph.num_nodes();
    let mut tier = vec![2u8; n];
    let train: FxHashSet<NodeId> = graph.train_set().iter().copied().collect();
    for &v in &train {
        for &u in graph.neighbors(v) {
            tier[u as usize] = tier[u as usize].min(1);
        }
    }
    for &v in &train {
        tier[v as usize] = 0;
    }
    let degrees = graph.in_degrees();
    let mut nodes: Vec<NodeId> = (0..n as NodeId).collect();
    nodes.sort_by(|a, b| {
        let (ai, bi) = (*a as usize, *b as usize);
        tier[ai]
            .cmp(&tier[bi])
            .then(degrees[bi].cmp(&degrees[ai]))
            .then(a.cmp(b))
    });
    nodes
}

/// Ranking for `config.cache_policy`; `None` for the dynamic policy.
pub fn compute_ranking(graph: &Arc<Dataset>, config: &RunConfig) -> Result<Option<Arc<[NodeId]>>> {
    let started = Instant::now();
    let ranking = match config.cache_policy {
        CachePolicy::ByDegree => rank_by_degree(graph),
        CachePolicy::ByHeuristic => rank_by_heuristic(graph),
        CachePolicy::ByPreSample => presample_ranking(graph, config)?,
        CachePolicy::Dynamic => return Ok(None),
    };
    info!(
        policy = %config.cache_policy,
        nodes = ranking.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "cache.ranking.done"
    );
    Ok(Some(Arc::from(ranking)))
}

/// Writes degree and heuristic rankings into a dataset directory.
pub fn persist_rankings(graph: &Dataset, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    crate::graph::write_ranking(dir, CACHE_BY_DEGREE_FILE, &rank_by_degree(graph))?;
    crate::graph::write_ranking(dir, CACHE_BY_HEURISTIC_FILE, &rank_by_heuristic(graph))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DatasetBuilder;

    fn graph() -> Dataset {
        // in-degrees: 0 -> 0, 1 -> 1, 2 -> 3, 3 -> 2
        DatasetBuilder::new(5)
            .edges([(0, 2), (1, 2), (3, 2), (0, 3), (4, 3), (4, 1)])
            .train_set(vec![4])
            .build()
            .unwrap()
    }

    #[test]
    fn degree_ranking_is_descending() {
        assert_eq!(rank_by_degree(&graph()), vec![2, 3, 1, 0, 4]);
    }

    #[test]
    fn heuristic_puts_train_tier_first() {
        // 4 is train, its neighbors 3 and 1 come next
        assert_eq!(rank_by_heuristic(&graph()), vec![4, 3, 1, 2, 0]);
    }
}
