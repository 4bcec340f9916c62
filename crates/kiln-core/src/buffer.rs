use std::fmt;
use std::marker::PhantomData;
use std::ops::{Bound, Range, RangeBounds};
use std::sync::Arc;

use crate::backend::Backend;
use crate::launch::DevicePtr;
use crate::{KernelElement, KilnError, Result};

/// A window onto a shared, reference-counted device allocation.
///
/// Several buffers may share one allocation (views, value copies). The
/// allocation is freed when the last holder drops it. Before any write
/// the holder calls `make_unique`: when the allocation is shared, the
/// window is first copied into a fresh allocation, so holders that
/// existed before the write keep observing the old contents.
pub struct DeviceBuffer<T: KernelElement, B: Backend> {
    backend: Arc<B>,
    storage: Arc<B::Memory>,
    /// First element of the window, in elements from the allocation start.
    start: usize,
    /// Number of elements in the window.
    len: usize,
    /// Number of elements the allocation holds.
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T: KernelElement, B: Backend> DeviceBuffer<T, B> {
    const ELEM: usize = std::mem::size_of::<T>();

    /// Allocate zeroed device memory for `capacity` elements.
    pub fn allocate(backend: &Arc<B>, capacity: usize) -> Result<Self> {
        let memory = alloc_elements::<T, B>(backend, capacity)?;
        Ok(Self::from_parts(backend, memory, capacity))
    }

    /// Allocate exactly `values.len()` elements and upload `values` in one transfer.
    pub fn from_host(backend: &Arc<B>, values: &[T]) -> Result<Self> {
        let mut memory = alloc_elements::<T, B>(backend, values.len())?;
        if !values.is_empty() {
            backend.copy_htod(bytemuck::cast_slice(values), &mut memory, 0)?;
        }
        tracing::trace!("{}: uploaded {} x {}", backend.device(), values.len(), T::DTYPE);
        Ok(Self::from_parts(backend, memory, values.len()))
    }

    fn from_parts(backend: &Arc<B>, memory: B::Memory, capacity: usize) -> Self {
        Self {
            backend: Arc::clone(backend),
            storage: Arc::new(memory),
            start: 0,
            len: capacity,
            capacity,
            _marker: PhantomData,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Number of elements in the window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the underlying allocation holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offset of the window within the allocation, in elements.
    pub fn start(&self) -> usize {
        self.start
    }

    /// The shared allocation, for backend-specific interop.
    pub fn memory(&self) -> &B::Memory {
        &self.storage
    }

    /// Whether this buffer is the sole holder of its allocation.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.storage) == 1
    }

    /// Whether both buffers point into the same allocation.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(KilnError::IndexOutOfBounds { index, len: self.len });
        }
        Ok(())
    }

    /// A buffer over the same allocation, restricted to `range` of this window.
    pub fn view(&self, range: Range<usize>) -> Result<Self> {
        check_range(&range, self.len)?;
        Ok(Self {
            backend: Arc::clone(&self.backend),
            storage: Arc::clone(&self.storage),
            start: self.start + range.start,
            len: range.len(),
            capacity: self.capacity,
            _marker: PhantomData,
        })
    }

    /// Ensure this buffer owns its allocation exclusively, copying the
    /// window to a fresh allocation if it is shared.
    pub fn make_unique(&mut self) -> Result<&mut B::Memory> {
        self.ensure_unique()?;
        Arc::get_mut(&mut self.storage)
            .ok_or_else(|| KilnError::Internal("storage still shared after copy-on-write".into()))
    }

    fn ensure_unique(&mut self) -> Result<()> {
        if Arc::get_mut(&mut self.storage).is_some() {
            return Ok(());
        }
        let mut fresh = alloc_elements::<T, B>(&self.backend, self.len)?;
        if self.len > 0 {
            self.backend.copy_dtod(
                &self.storage,
                self.start * Self::ELEM,
                &mut fresh,
                0,
                self.len * Self::ELEM,
            )?;
        }
        tracing::debug!(
            "{}: copy-on-write detached {} x {} (window {}..{} of {})",
            self.backend.device(),
            self.len,
            T::DTYPE,
            self.start,
            self.start + self.len,
            self.capacity,
        );
        self.storage = Arc::new(fresh);
        self.start = 0;
        self.capacity = self.len;
        Ok(())
    }

    /// Download `range` of the window in one transfer.
    pub fn read(&self, range: Range<usize>) -> Result<Vec<T>> {
        check_range(&range, self.len)?;
        let mut out = vec![T::zeroed(); range.len()];
        if !out.is_empty() {
            self.backend.copy_dtoh(
                &self.storage,
                (self.start + range.start) * Self::ELEM,
                bytemuck::cast_slice_mut(&mut out),
            )?;
        }
        Ok(out)
    }

    /// Download one element.
    pub fn read_one(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let mut value = T::zeroed();
        self.backend.copy_dtoh(
            &self.storage,
            (self.start + index) * Self::ELEM,
            bytemuck::bytes_of_mut(&mut value),
        )?;
        Ok(value)
    }

    /// Upload `values` into the window starting at element `offset`.
    pub fn write(&mut self, offset: usize, values: &[T]) -> Result<()> {
        check_span(offset, values.len(), self.len)?;
        if values.is_empty() {
            return Ok(());
        }
        self.ensure_unique()?;
        let memory = Arc::get_mut(&mut self.storage)
            .ok_or_else(|| KilnError::Internal("storage still shared after copy-on-write".into()))?;
        self.backend.copy_htod(
            bytemuck::cast_slice(values),
            memory,
            (self.start + offset) * Self::ELEM,
        )
    }

    /// Copy `other`'s whole window into this window starting at element `offset`.
    pub fn copy_from(&mut self, offset: usize, other: &Self) -> Result<()> {
        let (expected, got) = (self.backend.device(), other.backend.device());
        if expected != got {
            return Err(KilnError::DeviceMismatch { expected, got });
        }
        check_span(offset, other.len, self.len)?;
        if other.is_empty() {
            return Ok(());
        }
        self.ensure_unique()?;
        let memory = Arc::get_mut(&mut self.storage)
            .ok_or_else(|| KilnError::Internal("storage still shared after copy-on-write".into()))?;
        self.backend.copy_dtod(
            &other.storage,
            other.start * Self::ELEM,
            memory,
            (self.start + offset) * Self::ELEM,
            other.len * Self::ELEM,
        )
    }

    /// Device address of element `offset` of the window (`len` is allowed,
    /// naming the end of the window).
    pub fn device_ptr(&self, offset: usize) -> Result<DevicePtr> {
        if offset > self.len {
            return Err(KilnError::IndexOutOfBounds { index: offset, len: self.len });
        }
        Ok(self
            .backend
            .device_ptr(&self.storage)
            .offset((self.start + offset) * Self::ELEM))
    }
}

impl<T: KernelElement, B: Backend> Clone for DeviceBuffer<T, B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            storage: Arc::clone(&self.storage),
            start: self.start,
            len: self.len,
            capacity: self.capacity,
            _marker: PhantomData,
        }
    }
}

impl<T: KernelElement, B: Backend> fmt::Debug for DeviceBuffer<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.backend.device())
            .field("dtype", &T::DTYPE)
            .field("window", &(self.start..self.start + self.len))
            .field("capacity", &self.capacity)
            .field("holders", &Arc::strong_count(&self.storage))
            .finish()
    }
}

fn alloc_elements<T: KernelElement, B: Backend>(backend: &B, count: usize) -> Result<B::Memory> {
    let nbytes = count.checked_mul(std::mem::size_of::<T>()).ok_or_else(|| KilnError::Allocation {
        device: backend.device(),
        bytes: usize::MAX,
        reason: format!("{count} x {} overflows the address space", T::DTYPE),
    })?;
    backend.alloc(nbytes)
}

fn check_range(range: &Range<usize>, len: usize) -> Result<()> {
    if range.start > range.end || range.end > len {
        return Err(KilnError::RangeOutOfBounds { start: range.start, end: range.end, len });
    }
    Ok(())
}

/// `offset..offset + count` without overflowing.
fn check_span(offset: usize, count: usize, len: usize) -> Result<()> {
    match offset.checked_add(count) {
        Some(end) => check_range(&(offset..end), len),
        None => Err(KilnError::RangeOutOfBounds { start: offset, end: usize::MAX, len }),
    }
}

/// Turn any `RangeBounds` into a concrete range checked against `len`.
pub(crate) fn resolve_range(bounds: impl RangeBounds<usize>, len: usize) -> Result<Range<usize>> {
    let start = match bounds.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match bounds.end_bound() {
        Bound::Included(&e) => e.saturating_add(1),
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    };
    let range = start..end;
    check_range(&range, len)?;
    Ok(range)
}
