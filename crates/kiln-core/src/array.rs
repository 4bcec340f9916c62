use std::fmt;
use std::ops::RangeBounds;
use std::sync::Arc;

use crate::backend::Backend;
use crate::buffer::{resolve_range, DeviceBuffer};
use crate::value::{DeviceValue, DeviceValueMut};
use crate::{Device, KernelArg, KernelElement, KilnError, Result};

/// A value-semantic array of `T` in device memory.
///
/// `clone()` and `slice()` are O(1) and share storage with the source;
/// the first write through a shared array copies it (copy-on-write), so
/// an array never observes writes made through another value.
///
/// ```
/// use std::sync::Arc;
/// use kiln_core::{DeviceArray, HostBackend};
///
/// let device = Arc::new(HostBackend::new(0));
/// let a = DeviceArray::from_host(&device, &[1i32, 2, 3, 4]).unwrap();
/// let mut b = a.slice(1..3).unwrap();
/// b.set(0, 20).unwrap();
/// assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3, 4]);
/// assert_eq!(b.copy_to_host().unwrap(), vec![20, 3]);
/// ```
pub struct DeviceArray<T: KernelElement, B: Backend> {
    buffer: DeviceBuffer<T, B>,
}

impl<T: KernelElement, B: Backend> DeviceArray<T, B> {
    /// An empty array on `backend`'s device.
    pub fn new(backend: &Arc<B>) -> Result<Self> {
        Self::zeros(backend, 0)
    }

    /// `count` zero elements.
    pub fn zeros(backend: &Arc<B>, count: usize) -> Result<Self> {
        Ok(Self { buffer: DeviceBuffer::allocate(backend, count)? })
    }

    /// Upload `values` in one bulk transfer.
    pub fn from_host(backend: &Arc<B>, values: &[T]) -> Result<Self> {
        Ok(Self { buffer: DeviceBuffer::from_host(backend, values)? })
    }

    pub(crate) fn from_buffer(buffer: DeviceBuffer<T, B>) -> Self {
        Self { buffer }
    }

    pub fn backend(&self) -> &Arc<B> {
        self.buffer.backend()
    }

    pub fn device(&self) -> Device {
        self.buffer.backend().device()
    }

    pub fn buffer(&self) -> &DeviceBuffer<T, B> {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Elements the underlying allocation holds (at least `len`).
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Whether this array is the only holder of its storage.
    pub fn is_unique(&self) -> bool {
        self.buffer.is_unique()
    }

    pub fn shares_storage_with(&self, other: &Self) -> bool {
        self.buffer.shares_storage_with(&other.buffer)
    }

    /// Proxy for element `index`. Nothing is transferred until it is read.
    pub fn get(&self, index: usize) -> Result<DeviceValue<'_, T, B>> {
        self.buffer.check_index(index)?;
        Ok(DeviceValue::new(&self.buffer, index))
    }

    /// Writable proxy for element `index`; makes the storage unique first.
    pub fn get_mut(&mut self, index: usize) -> Result<DeviceValueMut<'_, T, B>> {
        self.buffer.check_index(index)?;
        self.buffer.make_unique()?;
        Ok(DeviceValueMut::new(&mut self.buffer, index))
    }

    /// Write one element (single-element host→device transfer).
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        self.buffer.check_index(index)?;
        self.buffer.write(index, std::slice::from_ref(&value))
    }

    /// An array sharing this array's storage, windowed to `range`. O(1).
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Result<Self> {
        let range = resolve_range(range, self.len())?;
        Ok(Self { buffer: self.buffer.view(range)? })
    }

    /// Copy `other` into `range` of this array (device→device).
    pub fn set_range(&mut self, range: impl RangeBounds<usize>, other: &Self) -> Result<()> {
        let range = resolve_range(range, self.len())?;
        if range.len() != other.len() {
            return Err(KilnError::LengthMismatch { expected: range.len(), got: other.len() });
        }
        self.buffer.copy_from(range.start, &other.buffer)
    }

    /// Download every element into a new `Vec` in one transfer.
    ///
    /// Takes no lock: the array must not be mutated concurrently.
    pub fn copy_to_host(&self) -> Result<Vec<T>> {
        self.buffer.read(0..self.len())
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.copy_to_host()
    }

    /// Replace `range` with `values`.
    ///
    /// Equal lengths write in place (after copy-on-write). Otherwise a new
    /// allocation of the resulting length is filled with the prefix,
    /// `values`, and the suffix.
    pub fn replace_range(&mut self, range: impl RangeBounds<usize>, values: &[T]) -> Result<()> {
        let range = resolve_range(range, self.len())?;
        if range.len() == values.len() {
            return self.buffer.write(range.start, values);
        }

        let new_len = self.len() - range.len() + values.len();
        let mut fresh = DeviceBuffer::allocate(self.backend(), new_len)?;
        fresh.copy_from(0, &self.buffer.view(0..range.start)?)?;
        fresh.write(range.start, values)?;
        fresh.copy_from(range.start + values.len(), &self.buffer.view(range.end..self.len())?)?;
        tracing::trace!(
            "{}: replace_range {:?} reallocated {} -> {} elements",
            self.device(),
            range,
            self.len(),
            new_len
        );
        self.buffer = fresh;
        Ok(())
    }

    /// Append one element.
    pub fn push(&mut self, value: T) -> Result<()> {
        let end = self.len();
        self.replace_range(end..end, std::slice::from_ref(&value))
    }

    /// Append `values`.
    pub fn extend_from_host(&mut self, values: &[T]) -> Result<()> {
        let end = self.len();
        self.replace_range(end..end, values)
    }

    /// Read-only pointer argument to the start of this array.
    pub fn as_kernel_arg(&self) -> KernelArg<'_> {
        // Offset 0 is always within the window, even for empty arrays.
        KernelArg::pointer(self.backend().device_ptr(self.buffer.memory()).offset(
            self.buffer.start() * std::mem::size_of::<T>(),
        ))
    }

    /// Pointer argument a kernel may write through. Makes the storage
    /// unique first so the kernel cannot modify other arrays.
    pub fn as_kernel_arg_mut(&mut self) -> Result<KernelArg<'_>> {
        self.buffer.make_unique()?;
        Ok(KernelArg::pointer(self.buffer.device_ptr(0)?))
    }
}

impl<T: KernelElement, B: Backend> Clone for DeviceArray<T, B> {
    fn clone(&self) -> Self {
        Self::from_buffer(self.buffer.clone())
    }
}

impl<T: KernelElement, B: Backend> fmt::Debug for DeviceArray<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("device", &self.device())
            .field("dtype", &T::DTYPE)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostBackend;

    fn backend() -> Arc<HostBackend> {
        Arc::new(HostBackend::new(0))
    }

    #[test]
    fn test_from_host_roundtrip() {
        let b = backend();
        let a = DeviceArray::from_host(&b, &[1.5f32, -2.0, 3.25]).unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a.copy_to_host().unwrap(), vec![1.5, -2.0, 3.25]);
    }

    #[test]
    fn test_empty_array() {
        let b = backend();
        let a = DeviceArray::<i32, _>::new(&b).unwrap();
        assert!(a.is_empty());
        assert_eq!(a.copy_to_host().unwrap(), Vec::<i32>::new());
        assert!(a.get(0).unwrap_err().is_bounds());
    }

    #[test]
    fn test_get_reads_lazily() {
        let b = backend();
        let a = DeviceArray::from_host(&b, &[10i64, 20, 30]).unwrap();
        let v = a.get(2).unwrap();
        assert_eq!(v.index(), 2);
        assert_eq!(v.read().unwrap(), 30);
    }

    #[test]
    fn test_set_single_element() {
        let b = backend();
        let mut a = DeviceArray::from_host(&b, &[1u32, 2, 3]).unwrap();
        a.set(1, 42).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![1, 42, 3]);
        assert!(a.set(3, 0).unwrap_err().is_bounds());
    }

    #[test]
    fn test_get_mut_writes_through() {
        let b = backend();
        let a = DeviceArray::from_host(&b, &[1i32, 2]).unwrap();
        let mut c = a.clone();
        {
            let mut v = c.get_mut(0).unwrap();
            v.write(-1).unwrap();
            assert_eq!(v.read().unwrap(), -1);
        }
        assert_eq!(c.copy_to_host().unwrap(), vec![-1, 2]);
        assert_eq!(a.copy_to_host().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_slice_shares_storage() {
        let b = backend();
        let a = DeviceArray::from_host(&b, &[0i32, 1, 2, 3, 4, 5]).unwrap();
        let s = a.slice(2..5).unwrap();
        assert!(s.shares_storage_with(&a));
        assert_eq!(s.copy_to_host().unwrap(), vec![2, 3, 4]);
        assert_eq!(a.slice(..2).unwrap().copy_to_host().unwrap(), vec![0, 1]);
        assert_eq!(a.slice(4..).unwrap().copy_to_host().unwrap(), vec![4, 5]);
        assert!(a.slice(4..7).unwrap_err().is_bounds());
    }

    #[test]
    fn test_set_range() {
        let b = backend();
        let mut a = DeviceArray::from_host(&b, &[0i32; 5]).unwrap();
        let src = DeviceArray::from_host(&b, &[7i32, 8]).unwrap();
        a.set_range(1..3, &src).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![0, 7, 8, 0, 0]);

        let err = a.set_range(0..3, &src).unwrap_err();
        assert!(matches!(err, KilnError::LengthMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn test_set_range_from_own_slice() {
        let b = backend();
        let mut a = DeviceArray::from_host(&b, &[1i32, 2, 3, 4]).unwrap();
        let tail = a.slice(2..4).unwrap();
        a.set_range(0..2, &tail).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![3, 4, 3, 4]);
        assert_eq!(tail.copy_to_host().unwrap(), vec![3, 4]);
        assert!(!a.shares_storage_with(&tail));
    }

    #[test]
    fn test_replace_range_same_length_in_place() {
        let b = backend();
        let mut a = DeviceArray::from_host(&b, &[1i32, 2, 3, 4]).unwrap();
        a.replace_range(1..3, &[20, 30]).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![1, 20, 30, 4]);
        assert_eq!(a.capacity(), 4);
    }

    #[test]
    fn test_replace_range_grows_and_shrinks() {
        let b = backend();
        let mut a = DeviceArray::from_host(&b, &[1i32, 2, 3, 4]).unwrap();
        a.replace_range(1..2, &[9, 9, 9]).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![1, 9, 9, 9, 3, 4]);
        a.replace_range(..4, &[]).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![3, 4]);
        a.replace_range(.., &[5]).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![5]);
    }

    #[test]
    fn test_replace_range_keeps_other_values_intact() {
        let b = backend();
        let a = DeviceArray::from_host(&b, &[1i32, 2, 3]).unwrap();
        let mut c = a.clone();
        c.replace_range(0..1, &[]).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3]);
        assert_eq!(c.copy_to_host().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_push_and_extend() {
        let b = backend();
        let mut a = DeviceArray::<u8, _>::new(&b).unwrap();
        a.push(1).unwrap();
        a.extend_from_host(&[2, 3]).unwrap();
        assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_kernel_arg_mut_detaches() {
        let b = backend();
        let a = DeviceArray::from_host(&b, &[1i32, 2]).unwrap();
        let mut c = a.clone();
        let shared = *a.as_kernel_arg().value();
        let arg = *c.as_kernel_arg_mut().unwrap().value();
        assert_ne!(shared, arg);
        assert!(c.is_unique());
    }

    #[test]
    fn test_slice_kernel_arg_points_into_window() {
        let b = backend();
        let a = DeviceArray::from_host(&b, &[1i32, 2, 3]).unwrap();
        let s = a.slice(1..).unwrap();
        let (base, sliced) = (*a.as_kernel_arg().value(), *s.as_kernel_arg().value());
        match (base, sliced) {
            (crate::ArgValue::Ptr(p), crate::ArgValue::Ptr(q)) => assert_eq!(p.offset(4), q),
            other => panic!("expected pointers, got {other:?}"),
        }
    }
}
