//! Device-resident feature cache.
//!
//! A [`CacheManager`] owns a fixed number of feature slots tagged with the
//! trainer's device. Static policies fill the slots once from a node
//! ranking; the dynamic policy starts empty and admits missed rows as
//! batches are extracted, evicting the least recently used entries.

mod dynamic;
mod presample;
mod ranking;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{CachePolicy, RunConfig};
use crate::graph::Dataset;
use crate::profiler::{LogStepItem, Profiler};
use crate::types::{BatchKey, Context, GnnError, NodeId, Result, EMPTY_KEY};

use dynamic::DynamicTable;

pub use ranking::{compute_ranking, persist_rankings, rank_by_degree, rank_by_heuristic};

/// Slots for `fraction` of `num_nodes`, rounded down.
pub fn cache_capacity(num_nodes: usize, fraction: f64) -> usize {
    ((num_nodes as f64) * fraction.clamp(0.0, 1.0)).floor() as usize
}

/// Hit/miss partition of one request, in request order.
///
/// `hit_positions` and `miss_positions` are disjoint and together cover
/// `0..num_requested()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheClassification {
    /// Cached ids.
    pub hit_ids: Vec<NodeId>,
    /// Slot of each cached id at classification time.
    pub hit_slots: Vec<u32>,
    /// Output row of each cached id.
    pub hit_positions: Vec<usize>,
    /// Ids to fetch from host memory.
    pub miss_ids: Vec<NodeId>,
    /// Output row of each missed id.
    pub miss_positions: Vec<usize>,
}

impl CacheClassification {
    /// Every request is a miss.
    pub fn all_miss(ids: &[NodeId]) -> Self {
        Self {
            miss_ids: ids.to_vec(),
            miss_positions: (0..ids.len()).collect(),
            ..Self::default()
        }
    }

    /// Ids classified.
    pub fn num_requested(&self) -> usize {
        self.hit_ids.len() + self.miss_ids.len()
    }

    /// Bytes served from the cache for rows of `feat_dim` floats.
    pub fn hit_bytes(&self, feat_dim: usize) -> usize {
        self.hit_ids.len() * feat_dim * std::mem::size_of::<f32>()
    }

    /// Bytes fetched from host memory for rows of `feat_dim` floats.
    pub fn miss_bytes(&self, feat_dim: usize) -> usize {
        self.miss_ids.len() * feat_dim * std::mem::size_of::<f32>()
    }

    /// Share of requests served from the cache.
    pub fn hit_rate(&self) -> f64 {
        match self.num_requested() {
            0 => 0.0,
            n => self.hit_ids.len() as f64 / n as f64,
        }
    }

    fn push_hit(&mut self, id: NodeId, slot: u32, position: usize) {
        self.hit_ids.push(id);
        self.hit_slots.push(slot);
        self.hit_positions.push(position);
    }

    fn push_miss(&mut self, id: NodeId, position: usize) {
        self.miss_ids.push(id);
        self.miss_positions.push(position);
    }
}

/// Result of [`CacheManager::copy_hits`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HitCopy {
    /// Rows written from the cache.
    pub copied: usize,
    /// Indices into the classification's hit lists whose slot was
    /// reassigned after classification; the caller fetches them from host.
    pub stale: Vec<usize>,
}

/// Snapshot of the cache counters.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CacheStats {
    /// Policy in use.
    pub policy: CachePolicy,
    /// Slot count.
    pub capacity: usize,
    /// Ids currently cached.
    pub cached: usize,
    /// Rows served from the cache.
    pub hits: u64,
    /// Rows fetched from host memory.
    pub misses: u64,
    /// Bytes served from the cache.
    pub hit_bytes: u64,
    /// Bytes fetched from host memory.
    pub miss_bytes: u64,
    /// Rows admitted by the dynamic policy.
    pub inserts: u64,
    /// Rows evicted by the dynamic policy.
    pub evictions: u64,
    /// `hits / (hits + misses)`.
    pub hit_rate: f64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    hit_bytes: AtomicU64,
    miss_bytes: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
}

struct StaticTable {
    slot_of: Vec<u32>,
    nodes: Vec<NodeId>,
    rows: Vec<f32>,
}

enum Table {
    Static(StaticTable),
    Dynamic(DynamicTable),
}

/// Bounded feature cache shared by every extractor of a run.
pub struct CacheManager {
    policy: CachePolicy,
    ctx: Context,
    feat_dim: usize,
    capacity: usize,
    table: Table,
    counters: Counters,
    profiler: Option<Arc<Profiler>>,
}

impl CacheManager {
    /// Builds the cache `config` asks for, computing the ranking if the
    /// policy needs one.
    pub fn from_config(graph: &Arc<Dataset>, config: &RunConfig) -> Result<Self> {
        let ranking = compute_ranking(graph, config)?;
        Self::new(
            graph,
            config.cache_policy,
            config.cache_percentage,
            config.trainer_ctx,
            ranking.as_deref(),
        )
    }

    /// Builds a cache over `graph` holding `fraction` of its nodes.
    ///
    /// Static policies copy the first `capacity` ids of `ranking`; the
    /// dynamic policy ignores it.
    pub fn new(
        graph: &Dataset,
        policy: CachePolicy,
        fraction: f64,
        ctx: Context,
        ranking: Option<&[NodeId]>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(GnnError::InvalidConfig(format!(
                "cache_percentage {fraction} outside [0, 1]"
            )));
        }
        let started = Instant::now();
        let capacity = cache_capacity(graph.num_nodes(), fraction);
        let feat_dim = graph.feat_dim();
        let table = if policy.is_static() {
            let ranking = ranking.ok_or_else(|| {
                GnnError::InvalidArgument(format!("{policy} cache needs a node ranking"))
            })?;
            Table::Static(populate_static(graph, ranking, capacity)?)
        } else {
            Table::Dynamic(DynamicTable::new(capacity, feat_dim))
        };
        info!(
            policy = %policy,
            capacity,
            feat_dim,
            device = %ctx,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache.init.done"
        );
        Ok(Self {
            policy,
            ctx,
            feat_dim,
            capacity,
            table,
            counters: Counters::default(),
            profiler: None,
        })
    }

    /// Records lookup and copy timings into `profiler`.
    pub fn with_profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Policy in use.
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Device the slots live on.
    pub fn context(&self) -> Context {
        self.ctx
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Width of each cached row.
    pub fn feat_dim(&self) -> usize {
        self.feat_dim
    }

    /// Ids currently cached.
    pub fn len(&self) -> usize {
        match &self.table {
            Table::Static(table) => table.nodes.len(),
            Table::Dynamic(table) => table.len(),
        }
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is cached right now.
    pub fn contains(&self, id: NodeId) -> bool {
        match &self.table {
            Table::Static(table) => table
                .slot_of
                .get(id as usize)
                .is_some_and(|slot| *slot != EMPTY_KEY),
            Table::Dynamic(table) => table.contains(id),
        }
    }

    /// Splits `ids` into hits and misses. Dynamic hits are promoted.
    pub fn classify(&self, key: BatchKey, ids: &[NodeId]) -> CacheClassification {
        let started = Instant::now();
        let mut out = CacheClassification::default();
        match &self.table {
            Table::Static(table) => {
                for (pos, &id) in ids.iter().enumerate() {
                    match table.slot_of.get(id as usize) {
                        Some(&slot) if slot != EMPTY_KEY => out.push_hit(id, slot, pos),
                        _ => out.push_miss(id, pos),
                    }
                }
            }
            Table::Dynamic(table) => {
                let mut hits = Vec::new();
                let mut misses = Vec::new();
                table.classify(ids, |pos, slot| hits.push((pos, slot)), |pos| misses.push(pos));
                for (pos, slot) in hits {
                    out.push_hit(ids[pos], slot, pos);
                }
                for pos in misses {
                    out.push_miss(ids[pos], pos);
                }
            }
        }
        self.log(key, LogStepItem::CacheGetIndexTime, started);
        debug!(
            key = %key,
            requested = ids.len(),
            hits = out.hit_ids.len(),
            "cache.classify"
        );
        out
    }

    /// Writes every hit row into its output row of `out`.
    ///
    /// `out` is row-major with `feat_dim` columns. Stale dynamic slots are
    /// left untouched and reported back.
    pub fn copy_hits(
        &self,
        key: BatchKey,
        classification: &CacheClassification,
        out: &mut [f32],
    ) -> Result<HitCopy> {
        let dim = self.feat_dim;
        let rows = classification.hit_positions.iter().max().map_or(0, |p| p + 1);
        if out.len() < rows * dim {
            return Err(GnnError::InvalidArgument(format!(
                "output holds {} floats, hits need {}",
                out.len(),
                rows * dim
            )));
        }
        let started = Instant::now();
        let mut result = HitCopy::default();
        match &self.table {
            Table::Static(table) => {
                for (i, &slot) in classification.hit_slots.iter().enumerate() {
                    let (pos, slot) = (classification.hit_positions[i], slot as usize);
                    out[pos * dim..(pos + 1) * dim]
                        .copy_from_slice(&table.rows[slot * dim..(slot + 1) * dim]);
                    result.copied += 1;
                }
            }
            Table::Dynamic(table) => {
                let requests = classification
                    .hit_ids
                    .iter()
                    .copied()
                    .zip(classification.hit_slots.iter().copied());
                table.copy_rows(requests, |i, row| {
                    let pos = classification.hit_positions[i];
                    match row {
                        Some(row) => {
                            out[pos * dim..(pos + 1) * dim].copy_from_slice(row);
                            result.copied += 1;
                        }
                        None => result.stale.push(i),
                    }
                });
            }
        }
        self.log(key, LogStepItem::CacheCopyHitTime, started);
        if !result.stale.is_empty() {
            debug!(key = %key, stale = result.stale.len(), "cache.copy.stale_slots");
        }
        Ok(result)
    }

    /// Admits rows into a dynamic cache; `rows` holds one row per id.
    pub fn insert(&self, ids: &[NodeId], rows: &[f32]) -> Result<usize> {
        let Table::Dynamic(table) = &self.table else {
            return Err(GnnError::Unsupported("insert on a static cache policy"));
        };
        if rows.len() != ids.len() * self.feat_dim {
            return Err(GnnError::InvalidArgument(format!(
                "{} ids need {} floats, got {}",
                ids.len(),
                ids.len() * self.feat_dim,
                rows.len()
            )));
        }
        let outcome = table.insert(ids, rows);
        self.counters
            .inserts
            .fetch_add(outcome.inserted as u64, Ordering::Relaxed);
        self.counters
            .evictions
            .fetch_add(outcome.evicted as u64, Ordering::Relaxed);
        Ok(outcome.inserted)
    }

    /// Adds one batch's final hit/miss split to the counters.
    pub fn record(&self, hits: usize, misses: usize) {
        let row_bytes = (self.feat_dim * std::mem::size_of::<f32>()) as u64;
        let c = &self.counters;
        c.hits.fetch_add(hits as u64, Ordering::Relaxed);
        c.misses.fetch_add(misses as u64, Ordering::Relaxed);
        c.hit_bytes.fetch_add(hits as u64 * row_bytes, Ordering::Relaxed);
        c.miss_bytes.fetch_add(misses as u64 * row_bytes, Ordering::Relaxed);
    }

    /// Hits over all recorded requests; 0 before any request.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        match hits + misses {
            0 => 0.0,
            total => hits as f64 / total as f64,
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            policy: self.policy,
            capacity: self.capacity,
            cached: self.len(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            hit_bytes: c.hit_bytes.load(Ordering::Relaxed),
            miss_bytes: c.miss_bytes.load(Ordering::Relaxed),
            inserts: c.inserts.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }

    /// Verifies that no more than `capacity` ids are cached and every id
    /// owns exactly one slot.
    pub fn check_invariants(&self) -> Result<()> {
        let ok = match &self.table {
            Table::Static(table) => {
                table.nodes.len() <= self.capacity
                    && table
                        .nodes
                        .iter()
                        .enumerate()
                        .all(|(slot, id)| table.slot_of[*id as usize] == slot as u32)
                    && table.slot_of.iter().filter(|s| **s != EMPTY_KEY).count()
                        == table.nodes.len()
            }
            Table::Dynamic(table) => table.len() <= self.capacity && table.is_consistent(),
        };
        if ok {
            Ok(())
        } else {
            Err(GnnError::InvalidArgument(format!(
                "{} cache slot table is inconsistent",
                self.policy
            )))
        }
    }

    fn log(&self, key: BatchKey, item: LogStepItem, started: Instant) {
        if let Some(profiler) = &self.profiler {
            profiler.log_step_add(key, item, started.elapsed().as_secs_f64());
        }
    }
}

fn populate_static(graph: &Dataset, ranking: &[NodeId], capacity: usize) -> Result<StaticTable> {
    let dim = graph.feat_dim();
    let mut slot_of = vec![EMPTY_KEY; graph.num_nodes()];
    let mut nodes = Vec::with_capacity(capacity.min(ranking.len()));
    let mut rows = Vec::with_capacity(nodes.capacity() * dim);
    for &id in ranking {
        if nodes.len() == capacity {
            break;
        }
        let Some(entry) = slot_of.get_mut(id as usize) else {
            return Err(GnnError::InvalidArgument(format!(
                "ranking names node {id} outside [0, {})",
                graph.num_nodes()
            )));
        };
        if *entry != EMPTY_KEY {
            continue;
        }
        *entry = nodes.len() as u32;
        nodes.push(id);
        rows.extend_from_slice(graph.feature_row(id));
    }
    Ok(StaticTable {
        slot_of,
        nodes,
        rows,
    })
}
