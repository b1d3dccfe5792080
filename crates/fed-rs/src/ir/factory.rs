//! Helpers that build common compiled nodes.

use crate::graph::{compose, GraphError};
use crate::types::Type;

use super::{BuildingBlock, Comp};

/// Compiled `x -> x` over a tensor-compatible type.
pub fn create_compiled_identity(ty: &Type) -> Result<Comp, GraphError> {
    BuildingBlock::compiled(&compose::identity(ty)?)
}

/// Compiled no-argument function returning `<>`.
pub fn create_compiled_empty_struct() -> Result<Comp, GraphError> {
    BuildingBlock::compiled(&compose::empty_struct()?)
}

/// `identity(reference)`, the uniform shape the graph parser matches on.
pub fn create_identity_call(reference: Comp) -> Result<Comp, crate::compiler::CompilerError> {
    let identity = create_compiled_identity(reference.type_signature())?;
    Ok(BuildingBlock::call(identity, Some(reference))?)
}
