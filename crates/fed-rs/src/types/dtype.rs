//! Scalar element types carried by tensor types and host tensors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between IR types, graphs and host tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Boolean predicate stored one byte per element.
    Bool,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer, used for counters and step numbers.
    I64,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point.
    F64,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    /// Returns `true` for the floating-point dtypes.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Returns `true` for the signed integer dtypes.
    pub fn is_integer(self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }

    /// Produces a stable tag used when serializing archive indices.
    pub fn tag(self) -> u32 {
        match self {
            DType::Bool => 0,
            DType::I32 => 1,
            DType::I64 => 2,
            DType::F32 => 3,
            DType::F64 => 4,
        }
    }

    /// Reconstructs a `DType` from its serialized tag representation.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(DType::Bool),
            1 => Some(DType::I32),
            2 => Some(DType::I64),
            3 => Some(DType::F32),
            4 => Some(DType::F64),
            _ => None,
        }
    }

    /// Canonical lowercase name used in compact representations.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
