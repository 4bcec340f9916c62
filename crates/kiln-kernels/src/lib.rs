//! # kiln-kernels
//!
//! Kernel templates, the per-device compile cache and launch dispatch for Kiln.
//!
//! Provides:
//! - Generic kernel sources instantiated per element type (`TYPE` placeholder)
//! - A named library of templates with the built-in `sum`/`asum`/`fill`/`scale`
//! - `KernelManager`: compile once per (element type, source), launch many
//! - `KernelManagers`: one manager per device ordinal
//! - Native host implementations of the built-ins for `HostBackend`
//! - CUDA dispatch via NVRTC (behind `cuda` feature flag)

pub mod config;
pub mod cpu;
pub mod manager;
pub mod registry;
pub mod source;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use config::CompileConfig;
pub use cpu::host_backend;
pub use manager::{CacheStats, CompiledModule, KernelManager};
pub use registry::KernelManagers;
pub use source::{KernelLibrary, KernelSource, PLACEHOLDER};

#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;
