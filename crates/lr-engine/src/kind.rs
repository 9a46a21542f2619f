use std::fmt;

/// Element types the engine can store.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// IEEE 754 half precision (via the `half` crate).
    Float16,
    /// Brain floating point, 8 exponent bits and 7 mantissa bits.
    BFloat16,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Boolean, stored as one byte per element.
    Bool,
}

impl Kind {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            Kind::Uint8 | Kind::Int8 | Kind::Bool => 1,
            Kind::Int16 | Kind::Float16 | Kind::BFloat16 => 2,
            Kind::Int32 | Kind::Float32 => 4,
            Kind::Int64 | Kind::Float64 => 8,
        }
    }

    /// Returns true for the floating point kinds, the only ones that can
    /// take part in gradient computation.
    pub fn is_floating_point(&self) -> bool {
        matches!(
            self,
            Kind::Float16 | Kind::BFloat16 | Kind::Float32 | Kind::Float64
        )
    }

    /// Stable id used by the archive format.
    pub fn id(&self) -> u32 {
        match self {
            Kind::Uint8 => 0,
            Kind::Int8 => 1,
            Kind::Int16 => 2,
            Kind::Int32 => 3,
            Kind::Int64 => 4,
            Kind::Float16 => 5,
            Kind::Float32 => 6,
            Kind::Float64 => 7,
            Kind::Bool => 11,
            Kind::BFloat16 => 15,
        }
    }

    /// Inverse of [`Kind::id`].
    pub fn from_id(id: u32) -> Option<Kind> {
        match id {
            0 => Some(Kind::Uint8),
            1 => Some(Kind::Int8),
            2 => Some(Kind::Int16),
            3 => Some(Kind::Int32),
            4 => Some(Kind::Int64),
            5 => Some(Kind::Float16),
            6 => Some(Kind::Float32),
            7 => Some(Kind::Float64),
            11 => Some(Kind::Bool),
            15 => Some(Kind::BFloat16),
            _ => None,
        }
    }

    /// Result kind of a binary operation between `a` and `b`.
    ///
    /// Follows the usual category ordering (bool < integral < floating);
    /// mixing the two 16-bit float formats yields `Float32`, mixing the two
    /// 8-bit integer formats yields `Int16`.
    pub fn promote(a: Kind, b: Kind) -> Kind {
        if a == b {
            return a;
        }
        match (a, b) {
            (Kind::Float16, Kind::BFloat16) | (Kind::BFloat16, Kind::Float16) => Kind::Float32,
            (Kind::Uint8, Kind::Int8) | (Kind::Int8, Kind::Uint8) => Kind::Int16,
            _ if a.rank() >= b.rank() => a,
            _ => b,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Kind::Bool => 0,
            Kind::Uint8 => 1,
            Kind::Int8 => 2,
            Kind::Int16 => 3,
            Kind::Int32 => 4,
            Kind::Int64 => 5,
            Kind::Float16 | Kind::BFloat16 => 6,
            Kind::Float32 => 7,
            Kind::Float64 => 8,
        }
    }

    /// Type name used in tensor dumps, e.g. `Float` in `CPUFloatType`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Kind::Uint8 => "Byte",
            Kind::Int8 => "Char",
            Kind::Int16 => "Short",
            Kind::Int32 => "Int",
            Kind::Int64 => "Long",
            Kind::Float16 => "Half",
            Kind::BFloat16 => "BFloat16",
            Kind::Float32 => "Float",
            Kind::Float64 => "Double",
            Kind::Bool => "Bool",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Uint8 => write!(f, "uint8"),
            Kind::Int8 => write!(f, "int8"),
            Kind::Int16 => write!(f, "int16"),
            Kind::Int32 => write!(f, "int32"),
            Kind::Int64 => write!(f, "int64"),
            Kind::Float16 => write!(f, "float16"),
            Kind::BFloat16 => write!(f, "bfloat16"),
            Kind::Float32 => write!(f, "float32"),
            Kind::Float64 => write!(f, "float64"),
            Kind::Bool => write!(f, "bool"),
        }
    }
}

/// Placement of a tensor.
///
/// The reference backend keeps every device's data in host memory; the
/// placement is still tracked and enforced by operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    /// Archive encoding: -1 for CPU, the ordinal for CUDA devices.
    pub fn to_archive(&self) -> i64 {
        match self {
            Device::Cpu => -1,
            Device::Cuda(ordinal) => *ordinal as i64,
        }
    }

    /// Inverse of [`Device::to_archive`].
    pub fn from_archive(value: i64) -> Device {
        if value < 0 {
            Device::Cpu
        } else {
            Device::Cuda(value as usize)
        }
    }

    /// Upper-case prefix used in tensor dumps.
    pub fn type_prefix(&self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
            Device::Cuda(_) => "CUDA",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
        }
    }
}
