//! CUDA device handles and context binding.
//!
//! Each `CudaBackend` wraps the primary context of one GPU. Pushing the
//! context records whatever was current on the thread so the matching pop
//! can put it back.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use cudarc::driver::{result, sys, CudaDevice, CudaStream};
use kiln_core::{
    Backend, ComputeCapability, DType, Device, DevicePtr, KernelArg, KilnError, LaunchConfig, Result,
};

use super::launch::CudaModule;
use super::memory::CudaMemory;

thread_local! {
    // Contexts that were current before each push; 0 means none.
    static PREVIOUS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// A CUDA GPU driven through `cudarc`.
pub struct CudaBackend {
    pub(crate) device: Arc<CudaDevice>,
    ordinal: usize,
    compute_capability: ComputeCapability,
}

impl CudaBackend {
    /// Open GPU `ordinal` and query its compute capability.
    pub fn new(ordinal: usize) -> Result<Self> {
        let unknown = Device::cuda(ordinal, ComputeCapability::new(0, 0));
        let init_err = |e: cudarc::driver::DriverError| KilnError::Context {
            device: unknown,
            reason: e.to_string(),
        };
        let device = CudaDevice::new(ordinal).map_err(init_err)?;
        let major = device
            .attribute(sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .map_err(init_err)?;
        let minor = device
            .attribute(sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .map_err(init_err)?;
        let compute_capability = ComputeCapability::new(major as u32, minor as u32);
        tracing::info!(
            "opened cuda:{} ({}, {})",
            ordinal,
            device.name().unwrap_or_else(|_| "unknown".into()),
            compute_capability
        );
        Ok(Self { device, ordinal, compute_capability })
    }

    /// The underlying `cudarc` device.
    pub fn cuda_device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    /// A new stream that synchronizes with the default stream on fork.
    pub fn create_stream(&self) -> Result<CudaStream> {
        self.device.fork_default_stream().map_err(|e| self.context_error(e))
    }

    pub(crate) fn context_error(&self, reason: impl fmt::Display) -> KilnError {
        KilnError::Context { device: self.device(), reason: reason.to_string() }
    }
}

impl fmt::Debug for CudaBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaBackend")
            .field("ordinal", &self.ordinal)
            .field("compute_capability", &self.compute_capability)
            .finish()
    }
}

/// Check if any CUDA device is available.
pub fn is_cuda_available() -> bool {
    CudaDevice::new(0).is_ok()
}

/// Number of available CUDA devices.
pub fn device_count() -> usize {
    (0..16).take_while(|&i| CudaDevice::new(i).is_ok()).count()
}

impl Backend for CudaBackend {
    type Memory = CudaMemory;
    type Module = CudaModule;
    type Stream = CudaStream;

    fn device(&self) -> Device {
        Device::cuda(self.ordinal, self.compute_capability)
    }

    fn alloc(&self, nbytes: usize) -> Result<CudaMemory> {
        self.alloc_bytes(nbytes)
    }

    fn device_ptr(&self, memory: &CudaMemory) -> DevicePtr {
        memory.base()
    }

    fn copy_htod(&self, src: &[u8], dst: &mut CudaMemory, offset: usize) -> Result<()> {
        self.htod_at(src, dst, offset)
    }

    fn copy_dtoh(&self, src: &CudaMemory, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.dtoh_at(src, offset, dst)
    }

    fn copy_dtod(
        &self,
        src: &CudaMemory,
        src_offset: usize,
        dst: &mut CudaMemory,
        dst_offset: usize,
        nbytes: usize,
    ) -> Result<()> {
        self.dtod_at(src, src_offset, dst, dst_offset, nbytes)
    }

    fn push_context(&self) -> Result<()> {
        #[allow(unused_unsafe)]
        let previous = unsafe { result::ctx::get_current() }.map_err(|e| self.context_error(e))?;
        self.device.bind_to_thread().map_err(|e| self.context_error(e))?;
        PREVIOUS.with(|s| s.borrow_mut().push(previous.map_or(0, |ctx| ctx as usize)));
        Ok(())
    }

    fn pop_context(&self) {
        let Some(previous) = PREVIOUS.with(|s| s.borrow_mut().pop()) else {
            return;
        };
        let ctx = previous as sys::CUcontext;
        if let Err(e) = unsafe { result::ctx::set_current(ctx) } {
            tracing::warn!("{}: restoring previous context failed: {}", self.device(), e);
        }
    }

    fn synchronize(&self) -> Result<()> {
        self.device.synchronize().map_err(|e| self.context_error(e))
    }

    fn compile(
        &self,
        source: &str,
        dtype: DType,
        options: &[String],
    ) -> std::result::Result<CudaModule, String> {
        self.compile_module(source, dtype, options)
    }

    fn has_function(&self, module: &CudaModule, name: &str) -> bool {
        module.exports(name) && self.device.get_func(module.name(), name).is_some()
    }

    fn launch(
        &self,
        module: &CudaModule,
        name: &str,
        config: LaunchConfig,
        args: &[KernelArg<'_>],
        stream: Option<&CudaStream>,
    ) -> Result<()> {
        self.launch_entry(module, name, config, args, stream)
    }
}
