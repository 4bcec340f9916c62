use std::fmt;

use serde::{Deserialize, Serialize};

/// Architecture version of a device (`sm_<major><minor>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputeCapability {
    pub major: u32,
    pub minor: u32,
}

impl ComputeCapability {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Virtual architecture name passed to the kernel compiler, e.g. `compute_86`.
    pub fn virtual_arch(&self) -> String {
        format!("compute_{}{}", self.major, self.minor)
    }
}

impl fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sm_{}{}", self.major, self.minor)
    }
}

/// Which kind of backend a device is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Emulated device in host memory
    #[default]
    Host,
    /// CUDA GPU
    Cuda,
}

/// Descriptor of one compute device: its ordinal and compute capability.
///
/// The ordinal partitions kernel caches; the compute capability selects
/// compile options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub ordinal: usize,
    pub compute_capability: ComputeCapability,
}

impl Device {
    pub fn host(ordinal: usize, compute_capability: ComputeCapability) -> Self {
        Self { kind: DeviceKind::Host, ordinal, compute_capability }
    }

    pub fn cuda(ordinal: usize, compute_capability: ComputeCapability) -> Self {
        Self { kind: DeviceKind::Cuda, ordinal, compute_capability }
    }

    /// Whether this is an emulated host device.
    pub fn is_host(&self) -> bool {
        self.kind == DeviceKind::Host
    }

    /// Whether this is a CUDA device.
    pub fn is_cuda(&self) -> bool {
        self.kind == DeviceKind::Cuda
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Host => write!(f, "host:{}", self.ordinal),
            DeviceKind::Cuda => write!(f, "cuda:{}", self.ordinal),
        }
    }
}
