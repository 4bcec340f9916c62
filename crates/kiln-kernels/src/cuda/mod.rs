//! CUDA GPU backend for Kiln.
//!
//! Provides:
//! - Device handles and thread-local context push/pop
//! - Byte allocations and host↔device transfers at offsets
//! - NVRTC compilation of instantiated templates and raw-parameter launches

pub mod context;
pub mod launch;
pub mod memory;

pub use context::{device_count, is_cuda_available, CudaBackend};
pub use launch::CudaModule;
pub use memory::CudaMemory;
