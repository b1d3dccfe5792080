//! Host values: tensors and (optionally named) nested structs of tensors.

mod serialization;
mod tensor;

use serde::{Deserialize, Serialize};

use crate::types::{StructType, Type};

pub use serialization::{deserialize_value, serialize_value, ValueSerdeError};
pub use tensor::{HostTensor, TensorData};

/// A concrete value flowing into or out of a compiled computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(HostTensor),
    Struct(Vec<(Option<String>, Value)>),
}

impl Value {
    pub fn unnamed(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Struct(values.into_iter().map(|value| (None, value)).collect())
    }

    pub fn named<N: Into<String>>(elements: impl IntoIterator<Item = (N, Value)>) -> Self {
        Value::Struct(
            elements
                .into_iter()
                .map(|(name, value)| (Some(name.into()), value))
                .collect(),
        )
    }

    pub fn as_tensor(&self) -> Option<&HostTensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            Value::Struct(_) => None,
        }
    }

    pub fn elements(&self) -> Option<&[(Option<String>, Value)]> {
        match self {
            Value::Struct(elements) => Some(elements),
            Value::Tensor(_) => None,
        }
    }

    pub fn element(&self, index: usize) -> Option<&Value> {
        self.elements()?.get(index).map(|(_, value)| value)
    }

    pub fn element_by_name(&self, name: &str) -> Option<&Value> {
        self.elements()?
            .iter()
            .find(|(element, _)| element.as_deref() == Some(name))
            .map(|(_, value)| value)
    }

    /// Fully static type describing this value, names included.
    pub fn type_signature(&self) -> Type {
        match self {
            Value::Tensor(tensor) => Type::Tensor(tensor.tensor_type()),
            Value::Struct(elements) => Type::Struct(StructType::new(
                elements
                    .iter()
                    .map(|(name, value)| (name.clone(), value.type_signature()))
                    .collect(),
            )),
        }
    }

    /// Checks the value against `ty`. Unnamed struct elements match positionally;
    /// a named element must carry the name the type declares.
    pub fn conforms_to(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Value::Tensor(tensor), Type::Tensor(tt)) => tensor.conforms_to(tt),
            (Value::Struct(elements), Type::Struct(st)) => {
                elements.len() == st.len()
                    && elements.iter().zip(st.elements()).all(
                        |((name, value), (expected_name, expected_ty))| {
                            (name.is_none() || name == expected_name)
                                && value.conforms_to(expected_ty)
                        },
                    )
            }
            _ => false,
        }
    }

    /// Returns a copy of this value carrying the element names declared by `ty`.
    pub fn with_names_of(self, ty: &Type) -> Value {
        match (self, ty) {
            (Value::Struct(elements), Type::Struct(st)) if elements.len() == st.len() => {
                Value::Struct(
                    elements
                        .into_iter()
                        .zip(st.elements())
                        .map(|((_, value), (name, element_ty))| {
                            (name.clone(), value.with_names_of(element_ty))
                        })
                        .collect(),
                )
            }
            (value, _) => value,
        }
    }
}

impl From<HostTensor> for Value {
    fn from(value: HostTensor) -> Self {
        Value::Tensor(value)
    }
}

macro_rules! value_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Tensor(HostTensor::from(value))
                }
            }
        )*
    };
}

value_from_scalar!(bool, i32, i64, f32, f64);
