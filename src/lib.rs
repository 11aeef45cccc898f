//! gnnpipe: mini-batch sampling, feature caching and pipelined batch
//! preparation for graph neural network training.
//!
//! A run loads a CSR [`graph::Dataset`], draws seed batches from its
//! training set, samples multi-layer neighborhoods with a
//! [`sampling::Sampler`], gathers features through a
//! [`cache::CacheManager`] and an [`extract::Extractor`], and hands the
//! results to trainers under the [`pipeline`] coordinator. Every stage
//! reports into a shared [`profiler::Profiler`].

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod extract;
pub mod graph;
pub mod logging;
pub mod pipeline;
pub mod profiler;
pub mod sampling;
pub mod types;

pub use cache::{CacheManager, CacheStats};
pub use config::{CachePolicy, RunArch, RunConfig, SampleType};
pub use extract::{ExtractedBatch, Extractor};
pub use graph::{Dataset, DatasetBuilder};
pub use pipeline::{launch, Engine, EngineState, Role, RunSummary, TrainStep};
pub use profiler::Profiler;
pub use sampling::{SampledBatch, Sampler};
pub use types::{BatchKey, Context, DeviceType, ErrorKind, GnnError, NodeId, Result};
