//! Lowering of IR trees to fused compiled units.
//!
//! - [`transformation_utils`]: the postorder rewrite driver and scope helpers.
//! - [`tree_transformations`]: normalization passes that canonicalize a tree
//!   into shapes the parser matches.
//! - [`graph_parser`]: local fusion of compiled calls.
//! - [`pipeline`]: pass sequencing and the [`parse_to_graph`] entry point.

pub mod graph_parser;
pub mod pipeline;
pub mod transformation_utils;
pub mod tree_transformations;

use thiserror::Error;

use crate::graph::GraphError;
use crate::types::TypeError;

pub use graph_parser::{GraphParser, ParserPattern};
pub use pipeline::{
    parse_to_graph, GraphParserPass, PassResult, Pipeline, PipelineBuilder, PipelineConfig, Step,
    TreePass,
};
pub use transformation_utils::{free_references, transform_postorder};

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A rewrite changed the type signature of the node it replaced.
    #[error("rewrite '{rewrite}' changed type signature from {expected} to {found}")]
    TypeMismatch {
        rewrite: &'static str,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl CompilerError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        CompilerError::InvalidArgument(msg.into())
    }
}

pub type CompilerResult<T> = Result<T, CompilerError>;
