//! Native implementations of the built-in kernels for `HostBackend`.
//!
//! Each function mirrors the CUDA text of the matching [`KernelSource`]
//! one thread at a time, dispatching on the element type the module was
//! compiled for. Integer arithmetic wraps.
//!
//! [`KernelSource`]: crate::KernelSource

use kiln_core::host::HostLaunch;
use kiln_core::{DType, HostBackend, KernelElement, Result};

/// A host device with the built-in kernels registered.
pub fn host_backend(ordinal: usize) -> HostBackend {
    install_builtins(HostBackend::new(ordinal))
}

/// Register the built-in kernels on an existing host device.
pub fn install_builtins(backend: HostBackend) -> HostBackend {
    backend
        .with_kernel("sum", sum)
        .with_kernel("asum", asum)
        .with_kernel("fill", fill)
        .with_kernel("scale", scale)
}

/// Arithmetic the built-ins need, with C semantics.
trait HostNumeric: KernelElement + Copy {
    const ZERO: Self;
    fn add(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn abs(self) -> Self;
}

macro_rules! impl_signed {
    ($($t:ty),*) => {$(
        impl HostNumeric for $t {
            const ZERO: Self = 0;
            fn add(self, other: Self) -> Self { self.wrapping_add(other) }
            fn mul(self, other: Self) -> Self { self.wrapping_mul(other) }
            fn abs(self) -> Self { self.wrapping_abs() }
        }
    )*};
}

macro_rules! impl_unsigned {
    ($($t:ty),*) => {$(
        impl HostNumeric for $t {
            const ZERO: Self = 0;
            fn add(self, other: Self) -> Self { self.wrapping_add(other) }
            fn mul(self, other: Self) -> Self { self.wrapping_mul(other) }
            fn abs(self) -> Self { self }
        }
    )*};
}

macro_rules! impl_float {
    ($($t:ty),*) => {$(
        impl HostNumeric for $t {
            const ZERO: Self = 0.0;
            fn add(self, other: Self) -> Self { self + other }
            fn mul(self, other: Self) -> Self { self * other }
            fn abs(self) -> Self { <$t>::abs(self) }
        }
    )*};
}

impl_signed!(i8, i32, i64);
impl_unsigned!(u8, u32, u64);
impl_float!(f32, f64);

/// Call `$f::<T>` for the launch's element type.
macro_rules! dispatch {
    ($launch:expr, $f:ident) => {
        match $launch.dtype() {
            DType::I8 => $f::<i8>($launch),
            DType::U8 => $f::<u8>($launch),
            DType::I32 => $f::<i32>($launch),
            DType::U32 => $f::<u32>($launch),
            DType::I64 => $f::<i64>($launch),
            DType::U64 => $f::<u64>($launch),
            DType::F32 => $f::<f32>($launch),
            DType::F64 => $f::<f64>($launch),
        }
    };
}

fn sum(launch: &HostLaunch<'_>) -> Result<()> {
    dispatch!(launch, reduce_sum)
}

fn asum(launch: &HostLaunch<'_>) -> Result<()> {
    dispatch!(launch, reduce_asum)
}

fn fill(launch: &HostLaunch<'_>) -> Result<()> {
    dispatch!(launch, fill_typed)
}

fn scale(launch: &HostLaunch<'_>) -> Result<()> {
    dispatch!(launch, scale_typed)
}

// (vector, count, result)
fn reduce_sum<T: HostNumeric>(launch: &HostLaunch<'_>) -> Result<()> {
    let (vector, count, result) = (launch.ptr(0)?, launch.len_arg(1)?, launch.ptr(2)?);
    let values: Vec<T> = launch.read(vector, count)?;
    launch.write_one(result, values.into_iter().fold(T::ZERO, T::add))
}

fn reduce_asum<T: HostNumeric>(launch: &HostLaunch<'_>) -> Result<()> {
    let (vector, count, result) = (launch.ptr(0)?, launch.len_arg(1)?, launch.ptr(2)?);
    let values: Vec<T> = launch.read(vector, count)?;
    launch.write_one(result, values.into_iter().fold(T::ZERO, |acc, v| acc.add(v.abs())))
}

/// Grid-stride loop over `0..count`, like the CUDA kernels.
fn grid_stride(launch: &HostLaunch<'_>, count: usize, mut f: impl FnMut(usize) -> Result<()>) -> Result<()> {
    let stride = launch.stride_x() as usize;
    let mut i = launch.global_x() as usize;
    while i < count {
        f(i)?;
        i += stride;
    }
    Ok(())
}

// (vector, count, value)
fn fill_typed<T: HostNumeric>(launch: &HostLaunch<'_>) -> Result<()> {
    let (vector, count) = (launch.ptr(0)?, launch.len_arg(1)?);
    let value: T = launch.scalar(2)?;
    let size = std::mem::size_of::<T>();
    grid_stride(launch, count, |i| launch.write_one(vector.offset(i * size), value))
}

// (vector, count, alpha)
fn scale_typed<T: HostNumeric>(launch: &HostLaunch<'_>) -> Result<()> {
    let (vector, count) = (launch.ptr(0)?, launch.len_arg(1)?);
    let alpha: T = launch.scalar(2)?;
    let size = std::mem::size_of::<T>();
    grid_stride(launch, count, |i| {
        let at = vector.offset(i * size);
        let v: T = launch.read_one(at)?;
        launch.write_one(at, v.mul(alpha))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_backend_registers_builtins() {
        let backend = host_backend(2);
        assert_eq!(backend.kernel_names(), vec!["asum", "fill", "scale", "sum"]);
        assert_eq!(kiln_core::Backend::device(&backend).ordinal, 2);
    }

    #[test]
    fn test_numeric_semantics() {
        assert_eq!(HostNumeric::abs(-3i8), 3);
        assert_eq!(HostNumeric::abs(i8::MIN), i8::MIN);
        assert_eq!(HostNumeric::add(u8::MAX, 1u8), 0);
        assert_eq!(HostNumeric::abs(-2.5f64), 2.5);
        assert_eq!(HostNumeric::mul(3u32, 4u32), 12);
    }
}
