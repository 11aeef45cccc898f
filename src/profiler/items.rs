use serde::Serialize;

/// Per-step metrics, grouped by report level.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStepItem {
    /// Edges sampled for the batch.
    NumSample,
    /// Distinct nodes in the batch.
    NumNode,
    /// Seconds from seeds to blocks.
    SampleTime,
    /// Seconds publishing the batch to the handoff.
    SendTime,
    /// Seconds waiting on the handoff.
    RecvTime,
    /// Seconds extracting features and graph data.
    CopyTime,
    /// Seconds converting blocks for the model.
    ConvertTime,
    /// Seconds inside the train step.
    TrainTime,
    /// Feature bytes delivered.
    FeatureBytes,
    /// Label bytes delivered.
    LabelBytes,
    /// Index-table bytes delivered.
    IdBytes,
    /// Edge-array bytes delivered.
    GraphBytes,
    /// Feature bytes fetched from host memory.
    MissBytes,
    /// Seconds shuffling the train set.
    ShuffleTime,
    /// Seconds in the layer loop.
    CoreSampleTime,
    /// Seconds building the unique-id table.
    IdRemapTime,
    /// Seconds remapping and copying edge arrays.
    GraphCopyTime,
    /// Seconds copying the index table.
    IdCopyTime,
    /// Seconds gathering features and labels.
    ExtractTime,
    /// Seconds copying missed feature rows.
    FeatCopyTime,
    /// Seconds copying hit rows from the cache.
    CacheCopyTime,
    /// Seconds choosing k-hop neighbors.
    KHopSampleCooTime,
    /// Seconds collapsing duplicate edges.
    KHopDedupTime,
    /// Seconds walking.
    WalkSampleCooTime,
    /// Seconds ranking walk visits.
    WalkTopKTime,
    /// Seconds inserting sampled ids into the table.
    RemapPopulateTime,
    /// Seconds building the extractor's node table.
    RemapMapNodeTime,
    /// Seconds mapping edge endpoints to local ids.
    RemapMapEdgeTime,
    /// Seconds classifying ids against the cache.
    CacheGetIndexTime,
    /// Seconds copying hit rows.
    CacheCopyHitTime,
    /// Seconds copying miss rows.
    CacheCopyMissTime,
}

impl LogStepItem {
    /// Every step metric.
    pub const ALL: [LogStepItem; 31] = [
        LogStepItem::NumSample,
        LogStepItem::NumNode,
        LogStepItem::SampleTime,
        LogStepItem::SendTime,
        LogStepItem::RecvTime,
        LogStepItem::CopyTime,
        LogStepItem::ConvertTime,
        LogStepItem::TrainTime,
        LogStepItem::FeatureBytes,
        LogStepItem::LabelBytes,
        LogStepItem::IdBytes,
        LogStepItem::GraphBytes,
        LogStepItem::MissBytes,
        LogStepItem::ShuffleTime,
        LogStepItem::CoreSampleTime,
        LogStepItem::IdRemapTime,
        LogStepItem::GraphCopyTime,
        LogStepItem::IdCopyTime,
        LogStepItem::ExtractTime,
        LogStepItem::FeatCopyTime,
        LogStepItem::CacheCopyTime,
        LogStepItem::KHopSampleCooTime,
        LogStepItem::KHopDedupTime,
        LogStepItem::WalkSampleCooTime,
        LogStepItem::WalkTopKTime,
        LogStepItem::RemapPopulateTime,
        LogStepItem::RemapMapNodeTime,
        LogStepItem::RemapMapEdgeTime,
        LogStepItem::CacheGetIndexTime,
        LogStepItem::CacheCopyHitTime,
        LogStepItem::CacheCopyMissTime,
    ];

    /// Position in [`Self::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Report level: 1 high-level, 2 sub-stage, 3 algorithm-internal.
    pub fn level(self) -> u8 {
        use LogStepItem::*;
        match self {
            NumSample | NumNode | SampleTime | SendTime | RecvTime | CopyTime | ConvertTime
            | TrainTime | FeatureBytes | LabelBytes | IdBytes | GraphBytes | MissBytes => 1,
            ShuffleTime | CoreSampleTime | IdRemapTime | GraphCopyTime | IdCopyTime
            | ExtractTime | FeatCopyTime | CacheCopyTime => 2,
            KHopSampleCooTime | KHopDedupTime | WalkSampleCooTime | WalkTopKTime
            | RemapPopulateTime | RemapMapNodeTime | RemapMapEdgeTime | CacheGetIndexTime
            | CacheCopyHitTime | CacheCopyMissTime => 3,
        }
    }

    /// Snake-case name used in reports and CSV.
    pub fn as_str(self) -> &'static str {
        use LogStepItem::*;
        match self {
            NumSample => "num_sample",
            NumNode => "num_node",
            SampleTime => "sample_time",
            SendTime => "send_time",
            RecvTime => "recv_time",
            CopyTime => "copy_time",
            ConvertTime => "convert_time",
            TrainTime => "train_time",
            FeatureBytes => "feature_bytes",
            LabelBytes => "label_bytes",
            IdBytes => "id_bytes",
            GraphBytes => "graph_bytes",
            MissBytes => "miss_bytes",
            ShuffleTime => "shuffle_time",
            CoreSampleTime => "core_sample_time",
            IdRemapTime => "id_remap_time",
            GraphCopyTime => "graph_copy_time",
            IdCopyTime => "id_copy_time",
            ExtractTime => "extract_time",
            FeatCopyTime => "feat_copy_time",
            CacheCopyTime => "cache_copy_time",
            KHopSampleCooTime => "khop_sample_coo_time",
            KHopDedupTime => "khop_dedup_time",
            WalkSampleCooTime => "walk_sample_coo_time",
            WalkTopKTime => "walk_topk_time",
            RemapPopulateTime => "remap_populate_time",
            RemapMapNodeTime => "remap_map_node_time",
            RemapMapEdgeTime => "remap_map_edge_time",
            CacheGetIndexTime => "cache_get_index_time",
            CacheCopyHitTime => "cache_copy_hit_time",
            CacheCopyMissTime => "cache_copy_miss_time",
        }
    }

    /// True for byte counters.
    pub fn is_bytes(self) -> bool {
        matches!(
            self,
            LogStepItem::FeatureBytes
                | LogStepItem::LabelBytes
                | LogStepItem::IdBytes
                | LogStepItem::GraphBytes
                | LogStepItem::MissBytes
        )
    }
}

/// Per-epoch aggregates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEpochItem {
    /// Seconds sampling.
    SampleTime,
    /// Seconds extracting.
    CopyTime,
    /// Seconds converting.
    ConvertTime,
    /// Seconds training.
    TrainTime,
    /// Wall-clock seconds of the epoch.
    TotalTime,
    /// Feature bytes delivered.
    FeatureBytes,
    /// Feature bytes fetched from host memory.
    MissBytes,
    /// Hit bytes over requested bytes.
    CacheHitRate,
}

impl LogEpochItem {
    /// Every epoch metric.
    pub const ALL: [LogEpochItem; 8] = [
        LogEpochItem::SampleTime,
        LogEpochItem::CopyTime,
        LogEpochItem::ConvertTime,
        LogEpochItem::TrainTime,
        LogEpochItem::TotalTime,
        LogEpochItem::FeatureBytes,
        LogEpochItem::MissBytes,
        LogEpochItem::CacheHitRate,
    ];

    /// Position in [`Self::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            LogEpochItem::SampleTime => "sample_time",
            LogEpochItem::CopyTime => "copy_time",
            LogEpochItem::ConvertTime => "convert_time",
            LogEpochItem::TrainTime => "train_time",
            LogEpochItem::TotalTime => "total_time",
            LogEpochItem::FeatureBytes => "feature_bytes",
            LogEpochItem::MissBytes => "miss_bytes",
            LogEpochItem::CacheHitRate => "cache_hit_rate",
        }
    }
}
