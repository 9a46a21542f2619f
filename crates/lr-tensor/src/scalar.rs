//! Host-facing scalar and device enums and their native counterparts.

use std::fmt;
use std::str::FromStr;

use lr_engine::{Device, Kind};

use crate::error::{Result, TensorError};

/// Element type of a tensor as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScalarType {
    #[default]
    Undefined,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Half,
    BFloat16,
    Float,
    Double,
    Bool,
}

impl ScalarType {
    /// Native kind for this scalar type.
    ///
    /// # Errors
    /// `Undefined` has no native kind.
    pub fn to_native(self) -> Result<Kind> {
        Ok(match self {
            ScalarType::Undefined => return Err(TensorError::InvalidScalarType),
            ScalarType::Byte => Kind::Uint8,
            ScalarType::Char => Kind::Int8,
            ScalarType::Short => Kind::Int16,
            ScalarType::Int => Kind::Int32,
            ScalarType::Long => Kind::Int64,
            ScalarType::Half => Kind::Float16,
            ScalarType::BFloat16 => Kind::BFloat16,
            ScalarType::Float => Kind::Float32,
            ScalarType::Double => Kind::Float64,
            ScalarType::Bool => Kind::Bool,
        })
    }

    /// Scalar type for a native kind. Kinds without a counterpart map to
    /// `Undefined`.
    pub fn from_native(kind: Kind) -> ScalarType {
        match kind {
            Kind::Uint8 => ScalarType::Byte,
            Kind::Int8 => ScalarType::Char,
            Kind::Int16 => ScalarType::Short,
            Kind::Int32 => ScalarType::Int,
            Kind::Int64 => ScalarType::Long,
            Kind::Float16 => ScalarType::Half,
            Kind::BFloat16 => ScalarType::BFloat16,
            Kind::Float32 => ScalarType::Float,
            Kind::Float64 => ScalarType::Double,
            Kind::Bool => ScalarType::Bool,
            _ => ScalarType::Undefined,
        }
    }

    pub fn is_floating_point(self) -> bool {
        matches!(
            self,
            ScalarType::Half | ScalarType::BFloat16 | ScalarType::Float | ScalarType::Double
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::Undefined => "undefined",
            ScalarType::Byte => "byte",
            ScalarType::Char => "char",
            ScalarType::Short => "short",
            ScalarType::Int => "int",
            ScalarType::Long => "long",
            ScalarType::Half => "half",
            ScalarType::BFloat16 => "bfloat16",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::Bool => "bool",
        };
        f.write_str(name)
    }
}

impl FromStr for ScalarType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "byte" | "uint8" => Ok(ScalarType::Byte),
            "char" | "int8" => Ok(ScalarType::Char),
            "short" | "int16" => Ok(ScalarType::Short),
            "int" | "int32" => Ok(ScalarType::Int),
            "long" | "int64" => Ok(ScalarType::Long),
            "half" | "float16" => Ok(ScalarType::Half),
            "bfloat16" => Ok(ScalarType::BFloat16),
            "float" | "float32" => Ok(ScalarType::Float),
            "double" | "float64" => Ok(ScalarType::Double),
            "bool" => Ok(ScalarType::Bool),
            other => Err(format!("unknown scalar type '{}'", other)),
        }
    }
}

/// Kind of device a tensor is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    #[default]
    Undefined,
    Cpu,
    Cuda,
}

impl DeviceType {
    /// Native device; CUDA maps to the first device.
    ///
    /// # Errors
    /// `Undefined` has no native device.
    pub fn to_native(self) -> Result<Device> {
        match self {
            DeviceType::Undefined => Err(TensorError::InvalidDeviceType),
            DeviceType::Cpu => Ok(Device::Cpu),
            DeviceType::Cuda => Ok(Device::Cuda(0)),
        }
    }

    pub fn from_native(device: Device) -> DeviceType {
        match device {
            Device::Cpu => DeviceType::Cpu,
            Device::Cuda(_) => DeviceType::Cuda,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Undefined => "undefined",
            DeviceType::Cpu => "cpu",
            DeviceType::Cuda => "cuda",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceType::Cpu),
            "cuda" | "gpu" => Ok(DeviceType::Cuda),
            other => Err(format!("unknown device type '{}'", other)),
        }
    }
}
