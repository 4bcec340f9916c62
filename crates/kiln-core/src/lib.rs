//! # kiln-core
//!
//! Device memory model for the Kiln kernel runtime.
//!
//! Provides:
//! - Element types that kernels can be instantiated for (`DType`, `KernelElement`)
//! - The `Backend` trait: allocation, transfers, context binding, compile and launch
//! - `HostBackend`, an emulated device in host memory (CPU fallback and tests)
//! - Copy-on-write `DeviceBuffer` with zero-copy windows
//! - Value-semantic `DeviceArray` and single-element `DeviceValue` proxies

pub mod dtype;
pub mod device;
pub mod error;
pub mod launch;
pub mod backend;
pub mod host;
pub mod buffer;
pub mod array;
pub mod value;

pub use dtype::{DType, KernelElement};
pub use device::{ComputeCapability, Device};
pub use error::{KilnError, TransferDirection};
pub use launch::{ArgValue, DevicePtr, Dim3, KernelArg, LaunchConfig, ScalarArg};
pub use backend::{Backend, ContextGuard};
pub use host::{HostBackend, HostKernelFn, HostLaunch};
pub use buffer::DeviceBuffer;
pub use array::DeviceArray;
pub use value::{DeviceValue, DeviceValueMut};

pub type Result<T> = std::result::Result<T, KilnError>;
