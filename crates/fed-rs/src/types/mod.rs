//! Structural type descriptors shared by the IR, graphs and host values.
//!
//! Types are compared structurally: two types are equivalent when their
//! tensor dtypes and shapes agree and their struct elements agree in
//! order, naming and element type. Nothing in this module depends on
//! object identity.

mod dtype;
mod shape;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dtype::DType;
pub use shape::{Dimension, Shape};

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Shape::scalar())
    }
}

/// Ordered, optionally named elements of a structural tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StructType {
    elements: Vec<(Option<String>, Type)>,
}

impl StructType {
    pub fn new(elements: Vec<(Option<String>, Type)>) -> Self {
        Self { elements }
    }

    /// Builds a struct whose elements are all unnamed.
    pub fn unnamed(types: impl IntoIterator<Item = Type>) -> Self {
        Self::new(types.into_iter().map(|ty| (None, ty)).collect())
    }

    /// Builds a struct whose elements are all named.
    pub fn named<N: Into<String>>(elements: impl IntoIterator<Item = (N, Type)>) -> Self {
        Self::new(
            elements
                .into_iter()
                .map(|(name, ty)| (Some(name.into()), ty))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[(Option<String>, Type)] {
        &self.elements
    }

    pub fn element(&self, index: usize) -> Option<&Type> {
        self.elements.get(index).map(|(_, ty)| ty)
    }

    pub fn names(&self) -> Vec<Option<String>> {
        self.elements.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Returns the position of the element called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.elements
            .iter()
            .position(|(element, _)| element.as_deref() == Some(name))
    }
}

/// Signature of a single-parameter function; a missing parameter is the no-arg form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    parameter: Option<Box<Type>>,
    result: Box<Type>,
}

impl FunctionType {
    pub fn new(parameter: Option<Type>, result: Type) -> Self {
        Self {
            parameter: parameter.map(Box::new),
            result: Box::new(result),
        }
    }

    pub fn parameter(&self) -> Option<&Type> {
        self.parameter.as_deref()
    }

    pub fn result(&self) -> &Type {
        &self.result
    }
}

/// Structural type of an IR node, graph value or host value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Tensor(TensorType),
    Struct(StructType),
    Function(FunctionType),
}

impl Type {
    /// Scalar tensor type of the given dtype.
    pub fn scalar(dtype: DType) -> Self {
        Type::Tensor(TensorType::scalar(dtype))
    }

    pub fn tensor(dtype: DType, dims: &[usize]) -> Self {
        Type::Tensor(TensorType::new(dtype, Shape::from_static(dims)))
    }

    pub fn unnamed_struct(types: impl IntoIterator<Item = Type>) -> Self {
        Type::Struct(StructType::unnamed(types))
    }

    pub fn named_struct<N: Into<String>>(elements: impl IntoIterator<Item = (N, Type)>) -> Self {
        Type::Struct(StructType::named(elements))
    }

    pub fn function(parameter: Option<Type>, result: Type) -> Self {
        Type::Function(FunctionType::new(parameter, result))
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            Type::Struct(st) => Some(st),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(ft) => Some(ft),
            _ => None,
        }
    }

    /// Returns `true` when the type contains only tensors and structs of tensors.
    pub fn is_tensor_compatible(&self) -> bool {
        match self {
            Type::Tensor(_) => true,
            Type::Struct(st) => st.elements.iter().all(|(_, ty)| ty.is_tensor_compatible()),
            Type::Function(_) => false,
        }
    }

    /// Structural equivalence: dtypes, shapes, element order and names.
    pub fn is_equivalent_to(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Tensor(lhs), Type::Tensor(rhs)) => lhs == rhs,
            (Type::Struct(lhs), Type::Struct(rhs)) => {
                lhs.elements.len() == rhs.elements.len()
                    && lhs.elements.iter().zip(&rhs.elements).all(
                        |((lhs_name, lhs_ty), (rhs_name, rhs_ty))| {
                            lhs_name == rhs_name && lhs_ty.is_equivalent_to(rhs_ty)
                        },
                    )
            }
            (Type::Function(lhs), Type::Function(rhs)) => {
                let params_match = match (lhs.parameter(), rhs.parameter()) {
                    (None, None) => true,
                    (Some(lhs), Some(rhs)) => lhs.is_equivalent_to(rhs),
                    _ => false,
                };
                params_match && lhs.result().is_equivalent_to(rhs.result())
            }
            _ => false,
        }
    }

    pub fn check_equivalent_to(&self, other: &Type) -> Result<(), TypeError> {
        if self.is_equivalent_to(other) {
            Ok(())
        } else {
            Err(TypeError::NotEquivalent {
                expected: self.to_string(),
                found: other.to_string(),
            })
        }
    }
}

impl From<TensorType> for Type {
    fn from(value: TensorType) -> Self {
        Type::Tensor(value)
    }
}

impl From<StructType> for Type {
    fn from(value: StructType) -> Self {
        Type::Struct(value)
    }
}

impl From<FunctionType> for Type {
    fn from(value: FunctionType) -> Self {
        Type::Function(value)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

impl fmt::Display for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        for (idx, (name, ty)) in self.elements.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            match name {
                Some(name) => write!(f, "{name}={ty}")?,
                None => write!(f, "{ty}")?,
            }
        }
        f.write_str(">")
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameter() {
            Some(param) => write!(f, "({param} -> {})", self.result()),
            None => write!(f, "( -> {})", self.result()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tt) => tt.fmt(f),
            Type::Struct(st) => st.fmt(f),
            Type::Function(ft) => ft.fmt(f),
        }
    }
}

/// Errors raised when a node or graph is constructed with inconsistent types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("expected a type equivalent to {expected}, found {found}")]
    NotEquivalent { expected: String, found: String },
    #[error("expected a function type, found {found}")]
    NotAFunction { found: String },
    #[error("expected a struct type, found {found}")]
    NotAStruct { found: String },
    #[error("index {index} out of range for struct of {len} elements")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("struct type {ty} has no element named '{name}'")]
    UnknownName { name: String, ty: String },
    #[error("function {function} takes no argument but one was supplied")]
    UnexpectedArgument { function: String },
    #[error("function {function} requires an argument of type {parameter}")]
    MissingArgument { function: String, parameter: String },
    #[error("{node} expects {expected} children, found {found}")]
    ArityMismatch {
        node: &'static str,
        expected: usize,
        found: usize,
    },
}
