use std::io;
use std::time::Duration;

use thiserror::Error;

use super::BatchKey;

/// Shared result type for gnnpipe operations.
pub type Result<T> = std::result::Result<T, GnnError>;

/// Error type for every gnnpipe layer.
#[derive(Debug, Error)]
pub enum GnnError {
    /// A configured layer requests zero neighbors.
    #[error("invalid fanout {fanout} for layer {layer}")]
    InvalidFanout {
        /// Layer index in configuration order.
        layer: usize,
        /// Offending fanout value.
        fanout: usize,
    },
    /// Sampling was invoked without seed nodes.
    #[error("empty seed set")]
    EmptySeedSet,
    /// Dataset feature width does not match the model input width.
    #[error("feature dimension mismatch: model expects {expected}, dataset has {actual}")]
    FeatureDimensionMismatch {
        /// Width the model was configured with.
        expected: usize,
        /// Width stored in the dataset.
        actual: usize,
    },
    /// Configuration value is malformed or unknown.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A bounded resource is full and the caller asked not to block.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// A barrier or handoff wait exceeded its bound.
    #[error("synchronization timeout in {what} after {waited:?}")]
    SynchronizationTimeout {
        /// Primitive that timed out.
        what: &'static str,
        /// How long the caller waited.
        waited: Duration,
    },
    /// Another participant aborted the run.
    #[error("run aborted: {0}")]
    Aborted(&'static str),
    /// Lifecycle call issued in the wrong state.
    #[error("{call} is not allowed in state {state}")]
    InvalidState {
        /// Name of the rejected call.
        call: &'static str,
        /// State the component was in.
        state: String,
    },
    /// No batch with this key is held.
    #[error("unknown batch {0}")]
    UnknownBatch(BatchKey),
    /// Layer index beyond the configured depth.
    #[error("layer {layer} out of range for {num_layers} layers")]
    LayerOutOfRange {
        /// Requested layer.
        layer: usize,
        /// Number of layers in the batch.
        num_layers: usize,
    },
    /// Every batch of the run has been handed out.
    #[error("no batches left in this run")]
    Exhausted,
    /// Operation not available for the active mode or policy.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// Caller supplied inconsistent arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Dataset file is missing or inconsistent.
    #[error("dataset file {file}: {reason}")]
    Dataset {
        /// File name inside the dataset directory.
        file: String,
        /// What went wrong.
        reason: String,
    },
    /// Wrapper for I/O failures.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Encoding or decoding of a config, report or trace failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Coarse error classes used by operators and the CLI.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad fanout, feature width, enum value or other setting.
    Configuration,
    /// A bounded budget was exceeded.
    ResourceExhaustion,
    /// Barrier or handoff timeout, including peers aborted by one.
    SynchronizationTimeout,
    /// Lifecycle ordering or batch addressing problem.
    Lifecycle,
    /// Dataset or argument content problem.
    Data,
    /// Operating system I/O.
    Io,
}

impl GnnError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GnnError::InvalidFanout { .. }
            | GnnError::EmptySeedSet
            | GnnError::FeatureDimensionMismatch { .. }
            | GnnError::InvalidConfig(_)
            | GnnError::Unsupported(_) => ErrorKind::Configuration,
            GnnError::ResourceExhausted(_) => ErrorKind::ResourceExhaustion,
            GnnError::SynchronizationTimeout { .. } | GnnError::Aborted(_) => {
                ErrorKind::SynchronizationTimeout
            }
            GnnError::InvalidState { .. }
            | GnnError::UnknownBatch(_)
            | GnnError::LayerOutOfRange { .. }
            | GnnError::Exhausted => ErrorKind::Lifecycle,
            GnnError::InvalidArgument(_)
            | GnnError::Dataset { .. }
            | GnnError::Serialization(_) => ErrorKind::Data,
            GnnError::Io(_) => ErrorKind::Io,
        }
    }

    /// True when the error must tear down every cooperating role.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::SynchronizationTimeout)
    }

    pub(crate) fn dataset(file: impl Into<String>, reason: impl Into<String>) -> Self {
        GnnError::Dataset {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for GnnError {
    fn from(err: serde_json::Error) -> Self {
        GnnError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GnnError {
    fn from(err: toml::de::Error) -> Self {
        GnnError::InvalidConfig(err.to_string())
    }
}

impl From<csv::Error> for GnnError {
    fn from(err: csv::Error) -> Self {
        GnnError::Serialization(err.to_string())
    }
}
