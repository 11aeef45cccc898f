use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::RwLock;

use crate::types::{NodeId, EMPTY_KEY};

/// Least-recently-used slot table filled on the hot path.
///
/// Slot ownership lives in `node_of_slot`; the LRU maps ids to slots and
/// decides the victim when no slot is free.
pub(crate) struct DynamicTable {
    state: RwLock<DynamicState>,
    feat_dim: usize,
}

struct DynamicState {
    lru: Option<LruCache<NodeId, u32>>,
    free: Vec<u32>,
    node_of_slot: Vec<NodeId>,
    rows: Vec<f32>,
}

/// Outcome of [`DynamicTable::insert`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct InsertOutcome {
    pub(crate) inserted: usize,
    pub(crate) evicted: usize,
}

impl DynamicTable {
    pub(crate) fn new(capacity: usize, feat_dim: usize) -> Self {
        let lru = NonZeroUsize::new(capacity).map(LruCache::new);
        Self {
            state: RwLock::new(DynamicState {
                lru,
                free: (0..capacity as u32).rev().collect(),
                node_of_slot: vec![EMPTY_KEY; capacity],
                rows: vec![0.0; capacity * feat_dim],
            }),
            feat_dim,
        }
    }

    /// Looks up each id, promoting hits. `on_hit(position, slot)` and
    /// `on_miss(position)` see the partition as of this call.
    pub(crate) fn classify(
        &self,
        ids: &[NodeId],
        mut on_hit: impl FnMut(usize, u32),
        mut on_miss: impl FnMut(usize),
    ) {
        let mut state = self.state.write();
        let Some(lru) = state.lru.as_mut() else {
            (0..ids.len()).for_each(on_miss);
            return;
        };
        for (pos, id) in ids.iter().enumerate() {
            match lru.get(id) {
                Some(slot) => on_hit(pos, *slot),
                None => on_miss(pos),
            }
        }
    }

    /// Copies the row of `slot` into `out` if `slot` still belongs to `id`.
    pub(crate) fn copy_rows(
        &self,
        requests: impl Iterator<Item = (NodeId, u32)>,
        mut write: impl FnMut(usize, Option<&[f32]>),
    ) {
        let state = self.state.read();
        let dim = self.feat_dim;
        for (i, (id, slot)) in requests.enumerate() {
            let slot = slot as usize;
            if state.node_of_slot.get(slot) == Some(&id) {
                write(i, Some(&state.rows[slot * dim..(slot + 1) * dim]));
            } else {
                write(i, None);
            }
        }
    }

    /// Inserts rows for ids not yet cached, evicting the least recently
    /// used entries once no slot is free.
    pub(crate) fn insert(&self, ids: &[NodeId], rows: &[f32]) -> InsertOutcome {
        let dim = self.feat_dim;
        let mut state = self.state.write();
        let DynamicState {
            lru,
            free,
            node_of_slot,
            rows: slots,
        } = &mut *state;
        let Some(lru) = lru.as_mut() else {
            return InsertOutcome::default();
        };
        let mut outcome = InsertOutcome::default();
        for (i, id) in ids.iter().enumerate() {
            if lru.get(id).is_some() {
                continue;
            }
            let slot = match free.pop() {
                Some(slot) => slot,
                None => match lru.pop_lru() {
                    Some((victim, slot)) => {
                        debug_assert_eq!(node_of_slot[slot as usize], victim);
                        outcome.evicted += 1;
                        slot
                    }
                    None => break,
                },
            };
            let s = slot as usize;
            node_of_slot[s] = *id;
            slots[s * dim..(s + 1) * dim].copy_from_slice(&rows[i * dim..(i + 1) * dim]);
            lru.put(*id, slot);
            outcome.inserted += 1;
        }
        outcome
    }

    pub(crate) fn len(&self) -> usize {
        self.state.read().lru.as_ref().map_or(0, LruCache::len)
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.state
            .read()
            .lru
            .as_ref()
            .is_some_and(|lru| lru.contains(&id))
    }

    /// Every cached id owns exactly the slot the LRU maps it to.
    pub(crate) fn is_consistent(&self) -> bool {
        let state = self.state.read();
        let Some(lru) = state.lru.as_ref() else {
            return true;
        };
        let owned = state.node_of_slot.iter().filter(|n| **n != EMPTY_KEY).count();
        owned == lru.len()
            && lru
                .iter()
                .all(|(id, slot)| state.node_of_slot[*slot as usize] == *id)
    }
}
