pub mod compiler;
mod env;
pub mod graph;
pub mod io;
pub mod ir;
pub mod program;
pub mod types;
pub mod value;

pub use compiler::{parse_to_graph, CompilerError};
pub use ir::{BuildingBlock, Comp};
pub use program::{FileProgramStateManager, ProgramStateError, ProgramStateManager};
pub use types::{DType, Type};
pub use value::{HostTensor, Value};
