use rustc_hash::FxHashMap;

use crate::types::NodeId;

/// Insertion-ordered set of node ids with dense local indices.
///
/// The first time an id is inserted it receives the next local index;
/// later inserts of the same id are no-ops. `nodes()[local] == global`
/// for every mapped id.
#[derive(Debug, Default, Clone)]
pub struct OrderedIdTable {
    index: FxHashMap<NodeId, u32>,
    nodes: Vec<NodeId>,
}

impl OrderedIdTable {
    /// Empty table sized for `capacity` ids.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Forgets every id but keeps allocations.
    pub fn reset(&mut self) {
        self.index.clear();
        self.nodes.clear();
    }

    /// Inserts `id`, returning its local index.
    #[inline]
    pub fn insert(&mut self, id: NodeId) -> u32 {
        let next = self.nodes.len() as u32;
        let local = *self.index.entry(id).or_insert(next);
        if local == next {
            self.nodes.push(id);
        }
        local
    }

    /// Inserts every id in order.
    pub fn extend(&mut self, ids: &[NodeId]) {
        self.index.reserve(ids.len());
        for &id in ids {
            self.insert(id);
        }
    }

    /// Local index of `id`, if present.
    #[inline]
    pub fn local(&self, id: NodeId) -> Option<u32> {
        self.index.get(&id).copied()
    }

    /// Maps every id in `ids` to its local index.
    ///
    /// Returns `None` at the first id that was never inserted.
    pub fn map_all(&self, ids: &[NodeId]) -> Option<Vec<u32>> {
        ids.iter().map(|id| self.local(*id)).collect()
    }

    /// Global ids in local-index order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Number of distinct ids.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
