//! GPU byte allocations and host↔device transfers at byte offsets.

use cudarc::driver::{CudaSlice, DevicePtr as _};
use kiln_core::{Backend, DevicePtr, KilnError, Result, TransferDirection};

use super::context::CudaBackend;

/// One raw device allocation.
///
/// Zero-byte requests still reserve one byte so every allocation has a
/// distinct, valid base address.
pub struct CudaMemory {
    slice: CudaSlice<u8>,
    len: usize,
}

impl CudaMemory {
    /// Usable bytes (excluding the 1-byte minimum reservation).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn base(&self) -> DevicePtr {
        DevicePtr(*self.slice.device_ptr())
    }

    fn check(&self, direction: TransferDirection, offset: usize, nbytes: usize) -> Result<()> {
        if offset.checked_add(nbytes).map_or(true, |end| end > self.len) {
            return Err(KilnError::Transfer {
                direction,
                reason: format!("{nbytes} bytes at offset {offset} overrun allocation of {} bytes", self.len),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for CudaMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaMemory").field("base", &self.base()).field("len", &self.len).finish()
    }
}

impl CudaBackend {
    pub(crate) fn alloc_bytes(&self, nbytes: usize) -> Result<CudaMemory> {
        let slice = self.device.alloc_zeros::<u8>(nbytes.max(1)).map_err(|e| KilnError::Allocation {
            device: self.device(),
            bytes: nbytes,
            reason: e.to_string(),
        })?;
        tracing::trace!("{}: alloc {} bytes", self.device(), nbytes);
        Ok(CudaMemory { slice, len: nbytes })
    }

    pub(crate) fn htod_at(&self, src: &[u8], dst: &mut CudaMemory, offset: usize) -> Result<()> {
        let direction = TransferDirection::HostToDevice;
        dst.check(direction, offset, src.len())?;
        if src.is_empty() {
            return Ok(());
        }
        let mut view = dst.slice.slice_mut(offset..offset + src.len());
        self.device
            .htod_sync_copy_into(src, &mut view)
            .map_err(|e| KilnError::Transfer { direction, reason: e.to_string() })
    }

    pub(crate) fn dtoh_at(&self, src: &CudaMemory, offset: usize, dst: &mut [u8]) -> Result<()> {
        let direction = TransferDirection::DeviceToHost;
        src.check(direction, offset, dst.len())?;
        if dst.is_empty() {
            return Ok(());
        }
        let view = src.slice.slice(offset..offset + dst.len());
        self.device
            .dtoh_sync_copy_into(&view, dst)
            .map_err(|e| KilnError::Transfer { direction, reason: e.to_string() })
    }

    pub(crate) fn dtod_at(
        &self,
        src: &CudaMemory,
        src_offset: usize,
        dst: &mut CudaMemory,
        dst_offset: usize,
        nbytes: usize,
    ) -> Result<()> {
        let direction = TransferDirection::DeviceToDevice;
        src.check(direction, src_offset, nbytes)?;
        dst.check(direction, dst_offset, nbytes)?;
        if nbytes == 0 {
            return Ok(());
        }
        let from = src.slice.slice(src_offset..src_offset + nbytes);
        let mut to = dst.slice.slice_mut(dst_offset..dst_offset + nbytes);
        // Ordered on the default stream with later transfers.
        self.device
            .dtod_copy(&from, &mut to)
            .map_err(|e| KilnError::Transfer { direction, reason: e.to_string() })
    }
}
