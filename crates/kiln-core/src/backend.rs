//! The seam between Kiln and a native compute API.
//!
//! A backend bundles the collaborators the runtime consumes: device
//! memory and transfers, context binding, the kernel compiler, and module
//! loading/launch. Kiln ships `HostBackend` (this crate) and
//! `CudaBackend` (`kiln-kernels`, feature `cuda`).

use std::fmt;

use crate::{DType, Device, KernelArg, LaunchConfig, Result};
use crate::launch::DevicePtr;

/// A compute device together with its memory, compiler and launcher.
///
/// Offsets and sizes are in bytes. Allocations are zero-initialized.
pub trait Backend: Send + Sync + fmt::Debug + 'static {
    /// One contiguous device allocation. Dropping it frees the memory.
    type Memory: Send + Sync;
    /// A compiled module loaded on this device.
    type Module: Send + Sync;
    /// An in-order execution queue.
    type Stream: Send + Sync;

    /// Descriptor of the device this backend drives.
    fn device(&self) -> Device;

    /// Allocate `nbytes` of zeroed device memory.
    fn alloc(&self, nbytes: usize) -> Result<Self::Memory>;

    /// Base address of an allocation.
    fn device_ptr(&self, memory: &Self::Memory) -> DevicePtr;

    /// Blocking copy of `src` into `dst` starting at byte `offset`.
    fn copy_htod(&self, src: &[u8], dst: &mut Self::Memory, offset: usize) -> Result<()>;

    /// Blocking copy from `src` starting at byte `offset` into `dst`.
    fn copy_dtoh(&self, src: &Self::Memory, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Copy `nbytes` between two allocations; completes before the next
    /// transfer issued through this backend observes `dst`.
    fn copy_dtod(
        &self,
        src: &Self::Memory,
        src_offset: usize,
        dst: &mut Self::Memory,
        dst_offset: usize,
        nbytes: usize,
    ) -> Result<()>;

    /// Make this device's context current on the calling thread,
    /// remembering the previous one.
    fn push_context(&self) -> Result<()>;

    /// Restore the context that was current before the matching push.
    fn pop_context(&self);

    /// Block until all work previously issued to the device has finished.
    fn synchronize(&self) -> Result<()>;

    /// Compile instantiated kernel source into a loaded module. On failure
    /// returns the compiler's diagnostic text.
    fn compile(
        &self,
        source: &str,
        dtype: DType,
        options: &[String],
    ) -> std::result::Result<Self::Module, String>;

    /// Whether `module` exports an entry point called `name`.
    fn has_function(&self, module: &Self::Module, name: &str) -> bool;

    /// Launch entry point `name` of `module`. Does not wait for completion.
    fn launch(
        &self,
        module: &Self::Module,
        name: &str,
        config: LaunchConfig,
        args: &[KernelArg<'_>],
        stream: Option<&Self::Stream>,
    ) -> Result<()>;
}

/// Scoped context binding: pushes on creation, pops on drop.
///
/// The pop runs on every exit path, so the previous context is restored
/// whether the scoped work succeeded, failed, or panicked.
pub struct ContextGuard<'a, B: Backend> {
    backend: &'a B,
}

impl<'a, B: Backend> ContextGuard<'a, B> {
    pub fn push(backend: &'a B) -> Result<Self> {
        backend.push_context()?;
        Ok(Self { backend })
    }
}

impl<B: Backend> Drop for ContextGuard<'_, B> {
    fn drop(&mut self) {
        self.backend.pop_context();
    }
}
