use std::fmt;

use crate::{DType, Device};

/// Direction of a host/device memory copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::HostToDevice => f.write_str("host→device"),
            TransferDirection::DeviceToHost => f.write_str("device→host"),
            TransferDirection::DeviceToDevice => f.write_str("device→device"),
        }
    }
}

/// Errors raised by device memory, kernel compilation and launch.
///
/// Every variant is recoverable: nothing in Kiln aborts the process on a
/// failed compile or launch.
#[derive(Debug, thiserror::Error)]
pub enum KilnError {
    #[error("allocation of {bytes} bytes failed on {device}: {reason}")]
    Allocation { device: Device, bytes: usize, reason: String },

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("range {start}..{end} out of bounds for length {len}")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    #[error("length mismatch: expected {expected} elements, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("compiling kernel '{source_name}' for {dtype} on {device} failed: {diagnostic}")]
    Compile {
        device: Device,
        dtype: DType,
        source_name: String,
        diagnostic: String,
    },

    #[error("entry point '{symbol}' not found in module compiled for {dtype} on {device}")]
    SymbolNotFound { device: Device, dtype: DType, symbol: String },

    #[error("launch of '{kernel}' on {device} failed: {reason}")]
    Launch { device: Device, kernel: String, reason: String },

    #[error("{direction} transfer failed: {reason}")]
    Transfer { direction: TransferDirection, reason: String },

    #[error("binding context of {device} failed: {reason}")]
    Context { device: Device, reason: String },

    #[error("device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: Device, got: Device },

    #[error("unknown kernel '{0}'")]
    UnknownKernel(String),

    #[error("kernel '{0}' is already registered with a different template")]
    DuplicateKernel(String),

    #[error("invalid template for kernel '{name}': {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid kernel argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KilnError {
    /// Whether this is one of the bounds errors (index, range or length).
    pub fn is_bounds(&self) -> bool {
        matches!(
            self,
            KilnError::IndexOutOfBounds { .. }
                | KilnError::RangeOutOfBounds { .. }
                | KilnError::LengthMismatch { .. }
        )
    }

    pub(crate) fn transfer(direction: TransferDirection, reason: impl fmt::Display) -> Self {
        KilnError::Transfer { direction, reason: reason.to_string() }
    }
}
