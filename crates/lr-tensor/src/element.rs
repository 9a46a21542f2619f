//! Host element types that can be read from and written into tensors.

use bytemuck::Pod;
use half::{bf16, f16};

use crate::scalar::ScalarType;

/// A plain-old-data element with a fixed scalar type.
///
/// `bool` is deliberately absent: it is not `Pod`, so boolean tensors are
/// moved through the byte payload instead.
pub trait Element: Pod {
    const SCALAR_TYPE: ScalarType;
}

macro_rules! impl_element {
    ($($ty:ty => $st:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const SCALAR_TYPE: ScalarType = ScalarType::$st;
            }
        )*
    };
}

impl_element! {
    u8 => Byte,
    i8 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f16 => Half,
    bf16 => BFloat16,
    f32 => Float,
    f64 => Double,
}
