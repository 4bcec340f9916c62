//! Launch geometry and kernel arguments.

use std::fmt;
use std::marker::PhantomData;

use crate::KernelElement;

/// A device address. Opaque to callers; only backends interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// Address `bytes` past this one.
    pub fn offset(self, bytes: usize) -> Self {
        DevicePtr(self.0 + bytes as u64)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Grid or block extent in three dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const ONE: Dim3 = Dim3 { x: 1, y: 1, z: 1 };

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of elements covered by this extent.
    pub fn volume(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Dim3::new(x, 1, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Dim3::new(x, y, z)
    }
}

/// Grid/block geometry and dynamic shared memory of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    /// One block of one thread.
    pub fn single() -> Self {
        Self { grid: Dim3::ONE, block: Dim3::ONE, shared_mem_bytes: 0 }
    }

    pub fn new(grid: impl Into<Dim3>, block: impl Into<Dim3>) -> Self {
        Self { grid: grid.into(), block: block.into(), shared_mem_bytes: 0 }
    }

    /// 1D grid with enough blocks of `block_size` threads to cover `n` elements.
    pub fn for_elements(n: usize, block_size: u32) -> Self {
        let block_size = block_size.max(1);
        let grid = (n as u64).div_ceil(block_size as u64).max(1) as u32;
        Self::new(grid, block_size)
    }

    pub fn with_shared_mem(mut self, bytes: u32) -> Self {
        self.shared_mem_bytes = bytes;
        self
    }

    /// Total number of threads launched.
    pub fn total_threads(&self) -> u64 {
        self.grid.volume() * self.block.volume()
    }
}

/// The value of one kernel argument, passed by value to the entry point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    Ptr(DevicePtr),
    I8(i8),
    U8(u8),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl ArgValue {
    /// Human-readable kind, used in argument diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ArgValue::Ptr(_) => "pointer",
            ArgValue::I8(_) => "i8",
            ArgValue::U8(_) => "u8",
            ArgValue::I32(_) => "i32",
            ArgValue::U32(_) => "u32",
            ArgValue::I64(_) => "i64",
            ArgValue::U64(_) => "u64",
            ArgValue::F32(_) => "f32",
            ArgValue::F64(_) => "f64",
        }
    }
}

/// One entry of a launch's ordered argument list.
///
/// Pointer arguments borrow the array they point into for `'a`, so the
/// memory outlives the launch call. Scalars are `'static`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelArg<'a> {
    value: ArgValue,
    _borrow: PhantomData<&'a ()>,
}

impl<'a> KernelArg<'a> {
    pub(crate) fn pointer(ptr: DevicePtr) -> Self {
        Self { value: ArgValue::Ptr(ptr), _borrow: PhantomData }
    }

    pub fn value(&self) -> &ArgValue {
        &self.value
    }
}

impl KernelArg<'static> {
    /// A by-value scalar argument.
    pub fn scalar(value: impl Into<ScalarArg>) -> Self {
        Self { value: value.into().0, _borrow: PhantomData }
    }

    /// A by-value argument holding one element of a kernel's element type.
    pub fn element<T: KernelElement>(value: T) -> Self {
        Self { value: value.to_arg(), _borrow: PhantomData }
    }
}

/// Scalar values accepted by [`KernelArg::scalar`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarArg(ArgValue);

macro_rules! impl_scalar_arg {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ScalarArg {
                fn from(v: $ty) -> Self {
                    ScalarArg(ArgValue::$variant(v))
                }
            }
        )*
    };
}

impl_scalar_arg! {
    i8 => I8,
    u8 => U8,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}
