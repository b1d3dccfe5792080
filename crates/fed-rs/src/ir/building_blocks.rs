use std::sync::Arc;

use crate::graph::{Graph, GraphError, GraphProto};
use crate::types::{StructType, Type, TypeError};

/// Shared handle to an immutable IR node.
pub type Comp = Arc<BuildingBlock>;

/// A node of a federated computation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildingBlock {
    Reference(Reference),
    Lambda(Lambda),
    Call(Call),
    Selection(Selection),
    Struct(Struct),
    Block(Block),
    CompiledComputation(CompiledComputation),
    Intrinsic(Intrinsic),
}

/// Occurrence of a bound name.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    name: String,
    ty: Type,
}

impl Reference {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    parameter_name: String,
    parameter_type: Option<Type>,
    result: Comp,
    ty: Type,
}

impl Lambda {
    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    pub fn parameter_type(&self) -> Option<&Type> {
        self.parameter_type.as_ref()
    }

    pub fn result(&self) -> &Comp {
        &self.result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    function: Comp,
    argument: Option<Comp>,
    ty: Type,
}

impl Call {
    pub fn function(&self) -> &Comp {
        &self.function
    }

    pub fn argument(&self) -> Option<&Comp> {
        self.argument.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    source: Comp,
    index: usize,
    ty: Type,
}

impl Selection {
    pub fn source(&self) -> &Comp {
        &self.source
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    elements: Vec<(Option<String>, Comp)>,
    ty: Type,
}

impl Struct {
    pub fn elements(&self) -> &[(Option<String>, Comp)] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Sequential let-bindings; each local sees only the locals bound before it.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    locals: Vec<(String, Comp)>,
    result: Comp,
}

impl Block {
    pub fn locals(&self) -> &[(String, Comp)] {
        &self.locals
    }

    pub fn result(&self) -> &Comp {
        &self.result
    }
}

/// Already-lowered unit in the tensor-execution format.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledComputation {
    proto: GraphProto,
    ty: Type,
}

impl CompiledComputation {
    pub fn proto(&self) -> &GraphProto {
        &self.proto
    }

    /// Decodes the carried graph.
    pub fn graph(&self) -> Result<Graph, GraphError> {
        Graph::from_proto(&self.proto)
    }

    pub fn fingerprint(&self) -> String {
        self.proto.fingerprint()
    }
}

/// Named primitive that the compiler treats as opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct Intrinsic {
    uri: String,
    ty: Type,
}

impl Intrinsic {
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl BuildingBlock {
    pub fn reference(name: impl Into<String>, ty: Type) -> Comp {
        Arc::new(BuildingBlock::Reference(Reference {
            name: name.into(),
            ty,
        }))
    }

    pub fn lambda(
        parameter_name: impl Into<String>,
        parameter_type: Option<Type>,
        result: Comp,
    ) -> Comp {
        let ty = Type::function(parameter_type.clone(), result.type_signature().clone());
        Arc::new(BuildingBlock::Lambda(Lambda {
            parameter_name: parameter_name.into(),
            parameter_type,
            result,
            ty,
        }))
    }

    /// Applies `function`; the argument must be present exactly when the
    /// function declares a parameter, and of an equivalent type.
    pub fn call(function: Comp, argument: Option<Comp>) -> Result<Comp, TypeError> {
        let fn_ty = function
            .type_signature()
            .as_function()
            .ok_or_else(|| TypeError::NotAFunction {
                found: function.type_signature().to_string(),
            })?;
        match (fn_ty.parameter(), &argument) {
            (Some(parameter), Some(arg)) => parameter.check_equivalent_to(arg.type_signature())?,
            (None, None) => {}
            (Some(parameter), None) => {
                return Err(TypeError::MissingArgument {
                    function: fn_ty.to_string(),
                    parameter: parameter.to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(TypeError::UnexpectedArgument {
                    function: fn_ty.to_string(),
                });
            }
        }
        let ty = fn_ty.result().clone();
        Ok(Arc::new(BuildingBlock::Call(Call {
            function,
            argument,
            ty,
        })))
    }

    pub fn selection(source: Comp, index: usize) -> Result<Comp, TypeError> {
        let st = struct_type_of(&source)?;
        let ty = st
            .element(index)
            .cloned()
            .ok_or(TypeError::IndexOutOfRange {
                index,
                len: st.len(),
            })?;
        Ok(Arc::new(BuildingBlock::Selection(Selection {
            source,
            index,
            ty,
        })))
    }

    pub fn selection_by_name(source: Comp, name: &str) -> Result<Comp, TypeError> {
        let st = struct_type_of(&source)?;
        let index = st.index_of(name).ok_or_else(|| TypeError::UnknownName {
            name: name.to_string(),
            ty: st.to_string(),
        })?;
        Self::selection(source, index)
    }

    pub fn structure(elements: Vec<(Option<String>, Comp)>) -> Comp {
        let ty = Type::Struct(StructType::new(
            elements
                .iter()
                .map(|(name, comp)| (name.clone(), comp.type_signature().clone()))
                .collect(),
        ));
        Arc::new(BuildingBlock::Struct(Struct { elements, ty }))
    }

    pub fn unnamed_structure(elements: impl IntoIterator<Item = Comp>) -> Comp {
        Self::structure(elements.into_iter().map(|comp| (None, comp)).collect())
    }

    pub fn block(locals: Vec<(String, Comp)>, result: Comp) -> Comp {
        Arc::new(BuildingBlock::Block(Block { locals, result }))
    }

    /// Verifies and wraps `graph`, deriving the function type from its parameter
    /// and result.
    pub fn compiled(graph: &Graph) -> Result<Comp, GraphError> {
        graph.verify()?;
        let proto = graph.to_proto()?;
        Ok(Arc::new(BuildingBlock::CompiledComputation(
            CompiledComputation {
                proto,
                ty: graph.type_signature(),
            },
        )))
    }

    pub fn intrinsic(uri: impl Into<String>, ty: Type) -> Comp {
        Arc::new(BuildingBlock::Intrinsic(Intrinsic {
            uri: uri.into(),
            ty,
        }))
    }

    pub fn type_signature(&self) -> &Type {
        match self {
            BuildingBlock::Reference(node) => &node.ty,
            BuildingBlock::Lambda(node) => &node.ty,
            BuildingBlock::Call(node) => &node.ty,
            BuildingBlock::Selection(node) => &node.ty,
            BuildingBlock::Struct(node) => &node.ty,
            BuildingBlock::Block(node) => node.result.type_signature(),
            BuildingBlock::CompiledComputation(node) => &node.ty,
            BuildingBlock::Intrinsic(node) => &node.ty,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BuildingBlock::Reference(_) => "Reference",
            BuildingBlock::Lambda(_) => "Lambda",
            BuildingBlock::Call(_) => "Call",
            BuildingBlock::Selection(_) => "Selection",
            BuildingBlock::Struct(_) => "Struct",
            BuildingBlock::Block(_) => "Block",
            BuildingBlock::CompiledComputation(_) => "CompiledComputation",
            BuildingBlock::Intrinsic(_) => "Intrinsic",
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            BuildingBlock::Reference(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_compiled(&self) -> Option<&CompiledComputation> {
        match self {
            BuildingBlock::CompiledComputation(node) => Some(node),
            _ => None,
        }
    }

    /// Direct sub-nodes in evaluation order.
    pub fn children(&self) -> Vec<Comp> {
        match self {
            BuildingBlock::Reference(_)
            | BuildingBlock::CompiledComputation(_)
            | BuildingBlock::Intrinsic(_) => Vec::new(),
            BuildingBlock::Lambda(node) => vec![node.result.clone()],
            BuildingBlock::Call(node) => {
                let mut children = vec![node.function.clone()];
                children.extend(node.argument.clone());
                children
            }
            BuildingBlock::Selection(node) => vec![node.source.clone()],
            BuildingBlock::Struct(node) => {
                node.elements.iter().map(|(_, comp)| comp.clone()).collect()
            }
            BuildingBlock::Block(node) => node
                .locals
                .iter()
                .map(|(_, comp)| comp.clone())
                .chain(std::iter::once(node.result.clone()))
                .collect(),
        }
    }

    /// Rebuilds this node over `children`, given in the order [`Self::children`] returns.
    pub fn with_children(&self, children: Vec<Comp>) -> Result<Comp, TypeError> {
        let expected = self.children().len();
        if children.len() != expected {
            return Err(TypeError::ArityMismatch {
                node: self.kind(),
                expected,
                found: children.len(),
            });
        }
        let mut children = children.into_iter();
        let mut next = || children.next();
        let rebuilt = match self {
            BuildingBlock::Reference(_)
            | BuildingBlock::CompiledComputation(_)
            | BuildingBlock::Intrinsic(_) => return Ok(Arc::new(self.clone())),
            BuildingBlock::Lambda(node) => Self::lambda(
                node.parameter_name.clone(),
                node.parameter_type.clone(),
                next().unwrap_or_else(|| node.result.clone()),
            ),
            BuildingBlock::Call(node) => {
                let function = next().unwrap_or_else(|| node.function.clone());
                let argument = node.argument.as_ref().and_then(|_| next());
                Self::call(function, argument)?
            }
            BuildingBlock::Selection(node) => {
                let source = next().unwrap_or_else(|| node.source.clone());
                Self::selection(source, node.index)?
            }
            BuildingBlock::Struct(node) => Self::structure(
                node.elements
                    .iter()
                    .map(|(name, comp)| (name.clone(), next().unwrap_or_else(|| comp.clone())))
                    .collect(),
            ),
            BuildingBlock::Block(node) => {
                let locals = node
                    .locals
                    .iter()
                    .map(|(name, comp)| (name.clone(), next().unwrap_or_else(|| comp.clone())))
                    .collect();
                let result = next().unwrap_or_else(|| node.result.clone());
                Self::block(locals, result)
            }
        };
        Ok(rebuilt)
    }

    /// Short textual form, e.g. `(x -> comp#1a2b3c4d(x[0]))`.
    pub fn compact_representation(&self) -> String {
        self.to_string()
    }
}

fn struct_type_of(source: &Comp) -> Result<&StructType, TypeError> {
    source
        .type_signature()
        .as_struct()
        .ok_or_else(|| TypeError::NotAStruct {
            found: source.type_signature().to_string(),
        })
}
