//! Federated computation IR.
//!
//! Trees of [`BuildingBlock`]s are immutable and shared through [`Comp`]
//! handles. Constructors type-check their inputs, so every node carries a
//! consistent type signature and rewrites only need to compare signatures
//! before and after.

mod building_blocks;
pub mod factory;

use std::fmt;

pub use building_blocks::{
    Block, BuildingBlock, Call, Comp, CompiledComputation, Intrinsic, Lambda, Reference,
    Selection, Struct,
};

impl fmt::Display for BuildingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildingBlock::Reference(node) => f.write_str(node.name()),
            BuildingBlock::Lambda(node) => match node.parameter_type() {
                Some(_) => write!(f, "({} -> {})", node.parameter_name(), node.result()),
                None => write!(f, "( -> {})", node.result()),
            },
            BuildingBlock::Call(node) => match node.argument() {
                Some(argument) => write!(f, "{}({argument})", node.function()),
                None => write!(f, "{}()", node.function()),
            },
            BuildingBlock::Selection(node) => write!(f, "{}[{}]", node.source(), node.index()),
            BuildingBlock::Struct(node) => {
                f.write_str("<")?;
                for (idx, (name, element)) in node.elements().iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    match name {
                        Some(name) => write!(f, "{name}={element}")?,
                        None => write!(f, "{element}")?,
                    }
                }
                f.write_str(">")
            }
            BuildingBlock::Block(node) => {
                f.write_str("(let")?;
                for (idx, (name, value)) in node.locals().iter().enumerate() {
                    f.write_str(if idx == 0 { " " } else { "," })?;
                    write!(f, "{name}={value}")?;
                }
                write!(f, " in {})", node.result())
            }
            BuildingBlock::CompiledComputation(node) => write!(f, "comp#{}", node.fingerprint()),
            BuildingBlock::Intrinsic(node) => f.write_str(node.uri()),
        }
    }
}
