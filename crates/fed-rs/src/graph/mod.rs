//! Tensor-execution graph format.
//!
//! A [`Graph`] is a single-entry SSA function over host values: an optional
//! parameter, a straight-line body of [`Instruction`]s and one result.
//! Compiled IR nodes carry graphs in serialized form ([`GraphProto`]) and
//! only ever recombine them through the composition API in [`compose`].

mod backend;
mod builder;
pub mod compose;

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DType, Type};
use crate::value::HostTensor;

pub use backend::{BackendError, BackendResult, GraphBackend};
pub use builder::GraphBuilder;

/// Frozen graph format version enforced when decoding protos.
pub const FORMAT_VERSION: &str = "fedgraph.v1";

fn default_format_version() -> String {
    FORMAT_VERSION.to_string()
}

/// SSA value identifier local to one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Elementwise binary ops supported by the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

/// Elementwise unary ops supported by the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseUnaryOp {
    Neg,
    Abs,
}

/// Declarative form of graph operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Binds the graph argument. Takes no operands.
    Parameter,
    Constant(HostTensor),
    /// Projects element `index` out of a struct-typed operand.
    Select { index: usize },
    /// Builds a struct from the operands, one element per operand.
    Pack { names: Vec<Option<String>> },
    ElementwiseBinary(ElementwiseBinaryOp),
    ElementwiseUnary(ElementwiseUnaryOp),
    Cast { dtype: DType },
}

/// Single SSA instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<ValueId>,
    pub output: Type,
}

/// A complete single-result graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default = "default_format_version")]
    pub format_version: String,
    pub parameter: Option<Type>,
    pub result: Type,
    pub body: Vec<Instruction>,
    pub result_id: ValueId,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("invalid graph: {0}")]
    Invalid(String),
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("graph format version '{found}' does not match expected '{expected}'")]
    FormatVersionMismatch {
        found: String,
        expected: &'static str,
    },
}

impl GraphError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GraphError::Invalid(msg.into())
    }

    pub(crate) fn mismatch(context: &'static str, expected: &Type, found: &Type) -> Self {
        GraphError::TypeMismatch {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

impl Graph {
    /// Function type `(parameter -> result)` this graph implements.
    pub fn type_signature(&self) -> Type {
        Type::function(self.parameter.clone(), self.result.clone())
    }

    pub fn parameter_id(&self) -> Option<ValueId> {
        self.body
            .iter()
            .find(|inst| matches!(inst.op, Operation::Parameter))
            .map(|inst| inst.id)
    }

    /// Checks SSA well-formedness and the recorded parameter/result types.
    pub fn verify(&self) -> Result<(), GraphError> {
        if let Some(param) = &self.parameter {
            if !param.is_tensor_compatible() {
                return Err(GraphError::invalid(format!(
                    "parameter type {param} is not tensor compatible"
                )));
            }
        }
        if !self.result.is_tensor_compatible() {
            return Err(GraphError::invalid(format!(
                "result type {} is not tensor compatible",
                self.result
            )));
        }

        let mut defined: HashMap<ValueId, &Type> = HashMap::with_capacity(self.body.len());
        let mut seen_parameter = false;
        for inst in &self.body {
            for operand in &inst.operands {
                if !defined.contains_key(operand) {
                    return Err(GraphError::invalid(format!(
                        "value {operand} is used by {} before it is defined",
                        inst.id
                    )));
                }
            }
            if let Operation::Parameter = inst.op {
                let Some(param) = &self.parameter else {
                    return Err(GraphError::invalid("parameter instruction in a no-arg graph"));
                };
                if seen_parameter {
                    return Err(GraphError::invalid("duplicate parameter instruction"));
                }
                seen_parameter = true;
                if !param.is_equivalent_to(&inst.output) {
                    return Err(GraphError::mismatch("parameter", param, &inst.output));
                }
            }
            if !inst.output.is_tensor_compatible() {
                return Err(GraphError::invalid(format!(
                    "value {} has non-tensor type {}",
                    inst.id, inst.output
                )));
            }
            if defined.insert(inst.id, &inst.output).is_some() {
                return Err(GraphError::invalid(format!(
                    "duplicate value definition for {}",
                    inst.id
                )));
            }
        }

        let result_ty = defined.get(&self.result_id).ok_or_else(|| {
            GraphError::invalid(format!("result {} is never defined", self.result_id))
        })?;
        if !self.result.is_equivalent_to(result_ty) {
            return Err(GraphError::mismatch("result", &self.result, result_ty));
        }
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String, GraphError> {
        serde_json::to_string_pretty(self).map_err(GraphError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, GraphError> {
        let graph: Graph = serde_json::from_str(src)?;
        graph.check_format_version()?;
        graph.verify()?;
        Ok(graph)
    }

    /// Serializes the graph into the opaque payload carried by compiled IR nodes.
    pub fn to_proto(&self) -> Result<GraphProto, GraphError> {
        let bytes = bincode::serialize(self)?;
        Ok(GraphProto::from_bytes(bytes))
    }

    pub fn from_proto(proto: &GraphProto) -> Result<Self, GraphError> {
        let graph: Graph = bincode::deserialize(proto.as_bytes())?;
        graph.check_format_version()?;
        graph.verify()?;
        Ok(graph)
    }

    fn check_format_version(&self) -> Result<(), GraphError> {
        if self.format_version == FORMAT_VERSION {
            Ok(())
        } else {
            Err(GraphError::FormatVersionMismatch {
                found: self.format_version.clone(),
                expected: FORMAT_VERSION,
            })
        }
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameter {
            Some(param) => writeln!(f, "graph ({param}) -> {} {{", self.result)?,
            None => writeln!(f, "graph () -> {} {{", self.result)?,
        }
        for inst in &self.body {
            write!(f, "  {} = ", inst.id)?;
            match &inst.op {
                Operation::Parameter => f.write_str("Parameter")?,
                Operation::Constant(tensor) => write!(f, "Constant<{}>", tensor.tensor_type())?,
                Operation::Select { index } => write!(f, "Select[{index}]")?,
                Operation::Pack { .. } => f.write_str("Pack")?,
                Operation::ElementwiseBinary(op) => write!(f, "{op:?}")?,
                Operation::ElementwiseUnary(op) => write!(f, "{op:?}")?,
                Operation::Cast { dtype } => write!(f, "Cast<{dtype}>")?,
            }
            f.write_str("(")?;
            for (idx, operand) in inst.operands.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{operand}")?;
            }
            writeln!(f, ") : {}", inst.output)?;
        }
        writeln!(f, "  return {}", self.result_id)?;
        f.write_str("}")
    }
}

/// Opaque serialized graph payload. Cloning shares the underlying bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GraphProto(Arc<[u8]>);

impl GraphProto {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short hex digest used to name compiled units in compact representations.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        hash.to_hex().as_str()[..8].to_string()
    }
}

impl fmt::Debug for GraphProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphProto({} bytes, #{})", self.0.len(), self.fingerprint())
    }
}
