use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::launch::ArgValue;

/// Element types a kernel template can be instantiated for.
///
/// Each variant maps to exactly one C type name, which replaces the
/// `TYPE` placeholder when a template is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 8-bit signed integer
    I8,
    /// 8-bit unsigned integer
    U8,
    /// 32-bit signed integer
    I32,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit signed integer
    I64,
    /// 64-bit unsigned integer
    U64,
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 64-bit IEEE 754 double-precision float
    F64,
}

impl DType {
    /// Every supported element type, in declaration order.
    pub const ALL: [DType; 8] = [
        DType::I8,
        DType::U8,
        DType::I32,
        DType::U32,
        DType::I64,
        DType::U64,
        DType::F32,
        DType::F64,
    ];

    /// Size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    /// Native C type name used when instantiating kernel templates.
    pub fn c_type(&self) -> &'static str {
        match self {
            DType::I8 => "signed char",
            DType::U8 => "unsigned char",
            DType::I32 => "int",
            DType::U32 => "unsigned int",
            DType::I64 => "long long",
            DType::U64 => "unsigned long long",
            DType::F32 => "float",
            DType::F64 => "double",
        }
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Whether this dtype is a signed type (floats included).
    pub fn is_signed(&self) -> bool {
        !matches!(self, DType::U8 | DType::U32 | DType::U64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::U32 => "u32",
            DType::I64 => "i64",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(name)
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.to_string() == s)
            .ok_or_else(|| format!("unknown element type '{s}'"))
    }
}

/// A Rust type that can live in device memory and parameterize a kernel.
///
/// `Pod` guarantees the byte-level transfers in `DeviceBuffer` are sound.
pub trait KernelElement:
    bytemuck::Pod + Send + Sync + fmt::Debug + PartialEq + 'static
{
    /// The element type this Rust type instantiates templates with.
    const DTYPE: DType;

    /// Wrap a value as a by-value kernel argument.
    fn to_arg(self) -> ArgValue;

    /// Extract a value of this type from a kernel argument, if the
    /// argument carries exactly this type.
    fn from_arg(arg: &ArgValue) -> Option<Self>;
}

macro_rules! impl_kernel_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl KernelElement for $ty {
                const DTYPE: DType = DType::$dtype;

                fn to_arg(self) -> ArgValue {
                    ArgValue::$dtype(self)
                }

                fn from_arg(arg: &ArgValue) -> Option<Self> {
                    match arg {
                        ArgValue::$dtype(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_kernel_element! {
    i8 => I8,
    u8 => U8,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}
