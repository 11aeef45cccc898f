//! Identifiers, device contexts and the crate error type.

mod error;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use error::{ErrorKind, GnnError, Result};

/// Dense node identifier inside a dataset.
pub type NodeId = u32;

/// Sentinel that never names a real node.
pub const EMPTY_KEY: NodeId = NodeId::MAX;

/// Identifier of one batch within a run.
///
/// The epoch occupies the high 32 bits and the step the low 32 bits, so
/// integer order equals `(epoch, step)` lexicographic order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchKey(pub u64);

impl BatchKey {
    /// Builds the key for `step` of `epoch`.
    pub fn new(epoch: u32, step: u32) -> Self {
        Self((u64::from(epoch) << 32) | u64::from(step))
    }

    /// Epoch component.
    pub fn epoch(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Step component.
    pub fn step(self) -> u32 {
        (self.0 & u64::from(u32::MAX)) as u32
    }

    /// Dense index for per-step tables with `steps_per_epoch` columns.
    pub fn dense_index(self, steps_per_epoch: usize) -> usize {
        self.epoch() as usize * steps_per_epoch + self.step() as usize
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch(), self.step())
    }
}

/// Memory domain a buffer lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    /// Pageable host memory.
    Cpu,
    /// Memory-mapped host file.
    Mmap,
    /// Accelerator memory.
    Gpu,
}

/// A device type plus ordinal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    /// Memory domain.
    pub device_type: DeviceType,
    /// Ordinal within the domain.
    pub device_id: u32,
}

impl Context {
    /// Host context.
    pub const fn cpu() -> Self {
        Self {
            device_type: DeviceType::Cpu,
            device_id: 0,
        }
    }

    /// Memory-mapped host context.
    pub const fn mmap() -> Self {
        Self {
            device_type: DeviceType::Mmap,
            device_id: 0,
        }
    }

    /// Accelerator `id`.
    pub const fn gpu(id: u32) -> Self {
        Self {
            device_type: DeviceType::Gpu,
            device_id: id,
        }
    }

    /// True for accelerator contexts.
    pub fn is_gpu(&self) -> bool {
        self.device_type == DeviceType::Gpu
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_type {
            DeviceType::Cpu => write!(f, "cpu:{}", self.device_id),
            DeviceType::Mmap => write!(f, "mmap:{}", self.device_id),
            DeviceType::Gpu => write!(f, "gpu:{}", self.device_id),
        }
    }
}

impl FromStr for Context {
    type Err = GnnError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (kind, id),
            None => (s, "0"),
        };
        let device_id = id
            .parse::<u32>()
            .map_err(|_| GnnError::InvalidConfig(format!("bad device ordinal in {s:?}")))?;
        let device_type = match kind.to_ascii_lowercase().as_str() {
            "cpu" => DeviceType::Cpu,
            "mmap" => DeviceType::Mmap,
            "gpu" | "cuda" => DeviceType::Gpu,
            other => {
                return Err(GnnError::InvalidConfig(format!(
                    "unknown device type {other:?}"
                )))
            }
        };
        Ok(Self {
            device_type,
            device_id,
        })
    }
}
