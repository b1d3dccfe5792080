use std::fmt;

use crate::value::Value;

use super::{Graph, GraphProto};

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure raised by a [`GraphBackend`] while running a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The supplied argument does not conform to the graph parameter.
    ArgumentMismatch { expected: String, found: String },
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
}

impl BackendError {
    pub fn argument_mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        BackendError::ArgumentMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::ArgumentMismatch { expected, found } => {
                write!(f, "argument of type {found} does not conform to {expected}")
            }
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "execution error: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Executes graphs in the tensor-execution format.
pub trait GraphBackend: Send + Sync {
    fn backend_name(&self) -> &str;

    fn execute(&self, graph: &Graph, argument: Option<Value>) -> BackendResult<Value>;

    /// Decodes `proto` and runs it.
    fn execute_proto(&self, proto: &GraphProto, argument: Option<Value>) -> BackendResult<Value> {
        let graph = Graph::from_proto(proto).map_err(|err| BackendError::execution(err.to_string()))?;
        self.execute(&graph, argument)
    }
}
