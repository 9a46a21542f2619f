use half::{bf16, f16};

use crate::error::{EngineError, Result};
use crate::kind::Kind;

/// CPU-side tensor storage, one contiguous row-major buffer per kind.
///
/// Booleans are kept as bytes so that raw byte writes can never produce an
/// invalid `bool`.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuStorage {
    Uint8(Vec<u8>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float16(Vec<f16>),
    BFloat16(Vec<bf16>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Bool(Vec<u8>),
}

/// Runs `$body` with `$v` bound to the inner vector, whatever the variant.
macro_rules! with_vec {
    ($storage:expr, $v:ident => $body:expr) => {
        match $storage {
            CpuStorage::Uint8($v) => $body,
            CpuStorage::Int8($v) => $body,
            CpuStorage::Int16($v) => $body,
            CpuStorage::Int32($v) => $body,
            CpuStorage::Int64($v) => $body,
            CpuStorage::Float16($v) => $body,
            CpuStorage::BFloat16($v) => $body,
            CpuStorage::Float32($v) => $body,
            CpuStorage::Float64($v) => $body,
            CpuStorage::Bool($v) => $body,
        }
    };
}

/// Decodes little-endian chunks of `$size` bytes with `$ty::from_le_bytes`.
macro_rules! decode_le {
    ($bytes:expr, $ty:ty, $size:expr) => {
        $bytes
            .chunks_exact($size)
            .map(|c| {
                let mut buf = [0u8; $size];
                buf.copy_from_slice(c);
                <$ty>::from_le_bytes(buf)
            })
            .collect()
    };
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        with_vec!(self, v => v.len())
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the kind of this storage.
    pub fn kind(&self) -> Kind {
        match self {
            CpuStorage::Uint8(_) => Kind::Uint8,
            CpuStorage::Int8(_) => Kind::Int8,
            CpuStorage::Int16(_) => Kind::Int16,
            CpuStorage::Int32(_) => Kind::Int32,
            CpuStorage::Int64(_) => Kind::Int64,
            CpuStorage::Float16(_) => Kind::Float16,
            CpuStorage::BFloat16(_) => Kind::BFloat16,
            CpuStorage::Float32(_) => Kind::Float32,
            CpuStorage::Float64(_) => Kind::Float64,
            CpuStorage::Bool(_) => Kind::Bool,
        }
    }

    /// Create zero-filled storage for the given kind and element count.
    pub fn zeros(kind: Kind, n: usize) -> Self {
        match kind {
            Kind::Uint8 => CpuStorage::Uint8(vec![0; n]),
            Kind::Int8 => CpuStorage::Int8(vec![0; n]),
            Kind::Int16 => CpuStorage::Int16(vec![0; n]),
            Kind::Int32 => CpuStorage::Int32(vec![0; n]),
            Kind::Int64 => CpuStorage::Int64(vec![0; n]),
            Kind::Float16 => CpuStorage::Float16(vec![f16::ZERO; n]),
            Kind::BFloat16 => CpuStorage::BFloat16(vec![bf16::ZERO; n]),
            Kind::Float32 => CpuStorage::Float32(vec![0.0; n]),
            Kind::Float64 => CpuStorage::Float64(vec![0.0; n]),
            Kind::Bool => CpuStorage::Bool(vec![0; n]),
        }
    }

    /// Build storage of `kind` from f64 values, converting each element with
    /// `as`-cast semantics (saturating for integers, non-zero is true for bool).
    pub fn from_f64(kind: Kind, values: &[f64]) -> Self {
        match kind {
            Kind::Uint8 => CpuStorage::Uint8(values.iter().map(|&x| x as u8).collect()),
            Kind::Int8 => CpuStorage::Int8(values.iter().map(|&x| x as i8).collect()),
            Kind::Int16 => CpuStorage::Int16(values.iter().map(|&x| x as i16).collect()),
            Kind::Int32 => CpuStorage::Int32(values.iter().map(|&x| x as i32).collect()),
            Kind::Int64 => CpuStorage::Int64(values.iter().map(|&x| x as i64).collect()),
            Kind::Float16 => {
                CpuStorage::Float16(values.iter().map(|&x| f16::from_f64(x)).collect())
            }
            Kind::BFloat16 => {
                CpuStorage::BFloat16(values.iter().map(|&x| bf16::from_f64(x)).collect())
            }
            Kind::Float32 => CpuStorage::Float32(values.iter().map(|&x| x as f32).collect()),
            Kind::Float64 => CpuStorage::Float64(values.to_vec()),
            Kind::Bool => CpuStorage::Bool(values.iter().map(|&x| (x != 0.0) as u8).collect()),
        }
    }

    /// Widen every element to f64. Int64 values beyond 2^53 lose precision.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            CpuStorage::Uint8(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::Int8(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::Int16(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::Int32(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::Float16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::BFloat16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::Float32(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::Float64(v) => v.clone(),
            CpuStorage::Bool(v) => v.iter().map(|&x| (x != 0) as u8 as f64).collect(),
        }
    }

    /// Convert to another kind. Returns a plain clone when the kind matches.
    pub fn cast(&self, kind: Kind) -> Self {
        if self.kind() == kind {
            return self.clone();
        }
        CpuStorage::from_f64(kind, &self.to_f64_vec())
    }

    /// Raw element memory in native byte order.
    pub fn as_bytes(&self) -> &[u8] {
        with_vec!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    /// Mutable raw element memory in native byte order.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        with_vec!(self, v => bytemuck::cast_slice_mut(v.as_mut_slice()))
    }

    /// Encode every element little-endian, independent of the host byte order.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        with_vec!(self, v => v.iter().flat_map(|x| x.to_le_bytes()).collect())
    }

    /// Decode little-endian element bytes produced by [`CpuStorage::to_le_bytes`].
    ///
    /// # Errors
    /// Returns an error if `bytes` is not a whole number of elements.
    pub fn from_le_bytes(kind: Kind, bytes: &[u8]) -> Result<Self> {
        let size = kind.element_size();
        if bytes.len() % size != 0 {
            return Err(EngineError::Other(format!(
                "{} bytes is not a multiple of the {} element size {}",
                bytes.len(),
                kind,
                size
            )));
        }
        Ok(match kind {
            Kind::Uint8 => CpuStorage::Uint8(bytes.to_vec()),
            Kind::Int8 => CpuStorage::Int8(decode_le!(bytes, i8, 1)),
            Kind::Int16 => CpuStorage::Int16(decode_le!(bytes, i16, 2)),
            Kind::Int32 => CpuStorage::Int32(decode_le!(bytes, i32, 4)),
            Kind::Int64 => CpuStorage::Int64(decode_le!(bytes, i64, 8)),
            Kind::Float16 => CpuStorage::Float16(decode_le!(bytes, f16, 2)),
            Kind::BFloat16 => CpuStorage::BFloat16(decode_le!(bytes, bf16, 2)),
            Kind::Float32 => CpuStorage::Float32(decode_le!(bytes, f32, 4)),
            Kind::Float64 => CpuStorage::Float64(decode_le!(bytes, f64, 8)),
            Kind::Bool => CpuStorage::Bool(bytes.to_vec()),
        })
    }

    /// Returns the data as an f32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not Float32.
    pub fn as_f32_slice(&self) -> Result<&[f32]> {
        match self {
            CpuStorage::Float32(v) => Ok(v.as_slice()),
            other => Err(EngineError::UnsupportedKind {
                op: "as_f32_slice",
                kind: other.kind(),
            }),
        }
    }
}

impl From<Vec<f32>> for CpuStorage {
    fn from(data: Vec<f32>) -> Self {
        CpuStorage::Float32(data)
    }
}

impl From<Vec<f64>> for CpuStorage {
    fn from(data: Vec<f64>) -> Self {
        CpuStorage::Float64(data)
    }
}

impl From<Vec<i64>> for CpuStorage {
    fn from(data: Vec<i64>) -> Self {
        CpuStorage::Int64(data)
    }
}

impl From<Vec<i32>> for CpuStorage {
    fn from(data: Vec<i32>) -> Self {
        CpuStorage::Int32(data)
    }
}
