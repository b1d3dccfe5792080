//! Host-backed tensor used for constants, program state and reference execution.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::types::{DType, TensorType};

/// Typed element storage for a [`HostTensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Bool(_) => DType::Bool,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dense row-major tensor living in host memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl HostTensor {
    /// Constructs a tensor, validating the payload length against the shape.
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape
            );
        }
        Ok(Self { shape, data })
    }

    /// Rank-0 tensor wrapping a single element.
    pub fn scalar(data: TensorData) -> Result<Self> {
        Self::new(Vec::new(), data)
    }

    /// Zero-filled tensor of the given dtype and extents.
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        let data = match dtype {
            DType::Bool => TensorData::Bool(vec![false; len]),
            DType::I32 => TensorData::I32(vec![0; len]),
            DType::I64 => TensorData::I64(vec![0; len]),
            DType::F32 => TensorData::F32(vec![0.0; len]),
            DType::F64 => TensorData::F64(vec![0.0; len]),
        };
        Self { shape, data }
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    pub fn tensor_type(&self) -> TensorType {
        TensorType::new(self.dtype(), crate::types::Shape::from_static(&self.shape))
    }

    /// Returns `true` when dtype matches and the extents fit the (possibly dynamic) shape.
    pub fn conforms_to(&self, ty: &TensorType) -> bool {
        self.dtype() == ty.dtype && ty.shape.admits(&self.shape)
    }

    pub fn as_i32_scalar(&self) -> Option<i32> {
        match (&self.data, self.shape.is_empty()) {
            (TensorData::I32(v), true) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_f32_scalar(&self) -> Option<f32> {
        match (&self.data, self.shape.is_empty()) {
            (TensorData::F32(v), true) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_bool_scalar(&self) -> Option<bool> {
        match (&self.data, self.shape.is_empty()) {
            (TensorData::Bool(v), true) => v.first().copied(),
            _ => None,
        }
    }
}

macro_rules! scalar_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for HostTensor {
            fn from(value: $ty) -> Self {
                HostTensor {
                    shape: Vec::new(),
                    data: TensorData::$variant(vec![value]),
                }
            }
        }
    };
}

scalar_from!(bool, Bool);
scalar_from!(i32, I32);
scalar_from!(i64, I64);
scalar_from!(f32, F32);
scalar_from!(f64, F64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_payload() {
        let err = HostTensor::new(vec![2, 2], TensorData::F32(vec![1.0; 3]))
            .expect_err("length mismatch must fail");
        assert!(err.to_string().contains("does not match shape"));
    }

    #[test]
    fn scalar_accessors() {
        let t = HostTensor::from(7i32);
        assert_eq!(t.as_i32_scalar(), Some(7));
        assert_eq!(t.as_f32_scalar(), None);
        assert!(t.conforms_to(&TensorType::scalar(DType::I32)));
    }
}
