//! Single-element proxies into a device array.

use std::fmt;

use crate::backend::Backend;
use crate::buffer::DeviceBuffer;
use crate::{KernelArg, KernelElement, Result};

/// Names one element of a device array without owning it.
///
/// Reading transfers `size_of::<T>()` bytes device→host.
pub struct DeviceValue<'a, T: KernelElement, B: Backend> {
    buffer: &'a DeviceBuffer<T, B>,
    index: usize,
}

impl<'a, T: KernelElement, B: Backend> DeviceValue<'a, T, B> {
    pub(crate) fn new(buffer: &'a DeviceBuffer<T, B>, index: usize) -> Self {
        Self { buffer, index }
    }

    /// Position of the element within its array.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn read(&self) -> Result<T> {
        self.buffer.read_one(self.index)
    }

    /// Read-only pointer argument to this element.
    pub fn as_kernel_arg(&self) -> Result<KernelArg<'a>> {
        Ok(KernelArg::pointer(self.buffer.device_ptr(self.index)?))
    }
}

/// Writable proxy for one element; the array was made unique when it was created.
pub struct DeviceValueMut<'a, T: KernelElement, B: Backend> {
    buffer: &'a mut DeviceBuffer<T, B>,
    index: usize,
}

impl<'a, T: KernelElement, B: Backend> DeviceValueMut<'a, T, B> {
    pub(crate) fn new(buffer: &'a mut DeviceBuffer<T, B>, index: usize) -> Self {
        Self { buffer, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn read(&self) -> Result<T> {
        self.buffer.read_one(self.index)
    }

    /// Single-element host→device transfer.
    pub fn write(&mut self, value: T) -> Result<()> {
        self.buffer.write(self.index, std::slice::from_ref(&value))
    }
}

impl<T: KernelElement, B: Backend> fmt::Debug for DeviceValue<'_, T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceValue").field("index", &self.index).field("buffer", self.buffer).finish()
    }
}

impl<T: KernelElement, B: Backend> fmt::Debug for DeviceValueMut<'_, T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceValueMut").field("index", &self.index).field("buffer", &*self.buffer).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{ArgValue, DeviceArray, HostBackend};

    #[test]
    fn test_value_pointer_is_element_address() {
        let b = Arc::new(HostBackend::new(0));
        let a = DeviceArray::from_host(&b, &[1.0f64, 2.0, 3.0]).unwrap();
        let first = *a.get(0).unwrap().as_kernel_arg().unwrap().value();
        let third = *a.get(2).unwrap().as_kernel_arg().unwrap().value();
        match (first, third) {
            (ArgValue::Ptr(p), ArgValue::Ptr(q)) => assert_eq!(p.offset(16), q),
            other => panic!("expected pointers, got {other:?}"),
        }
    }

    #[test]
    fn test_value_sees_value_at_read_time() {
        let b = Arc::new(HostBackend::new(0));
        let mut a = DeviceArray::from_host(&b, &[5i32, 6]).unwrap();
        a.set(1, 60).unwrap();
        assert_eq!(a.get(1).unwrap().read().unwrap(), 60);
    }

    #[test]
    fn test_value_debug_names_index_and_window() {
        let b = Arc::new(HostBackend::new(0));
        let mut a = DeviceArray::from_host(&b, &[1u8, 2, 3]).unwrap();
        let shown = format!("{:?}", a.get(1).unwrap());
        assert!(shown.starts_with("DeviceValue { index: 1"), "{shown}");
        assert!(shown.contains("DeviceBuffer"), "{shown}");
        let shown = format!("{:?}", a.get_mut(2).unwrap());
        assert!(shown.starts_with("DeviceValueMut { index: 2"), "{shown}");
    }
}
