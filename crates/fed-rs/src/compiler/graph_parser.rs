//! Local fusion of compiled calls.
//!
//! The parser runs under [`super::transform_postorder`], so by the time it
//! inspects a node every fusible descendant has already collapsed into a
//! compiled call. Each pattern therefore only looks one or two levels down.
//! A "called graph" below is `Call(CompiledComputation, Reference)` or the
//! no-argument form `Call(CompiledComputation)`.

use crate::graph::{compose, Graph};
use crate::ir::{BuildingBlock, Comp, Reference};

use super::{CompilerError, CompilerResult};

/// A single local rewrite recognized by [`GraphParser`].
pub trait ParserPattern: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the replacement for `comp`, or `None` when the shape does not match.
    fn match_and_rewrite(&self, comp: &Comp) -> CompilerResult<Option<Comp>>;
}

/// Fuses compiled calls and their structural glue into single compiled units.
pub struct GraphParser {
    patterns: Vec<Box<dyn ParserPattern>>,
}

impl Default for GraphParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphParser {
    pub fn new() -> Self {
        Self {
            patterns: vec![
                Box::new(LambdaWrappingGraph),
                Box::new(StructOfCalledGraphs),
                Box::new(SelectionFromCalledGraph),
                Box::new(CalledComposition),
                Box::new(CalledGraphOnReplicatedArg),
                Box::new(LambdaWrappingNoArgGraph),
            ],
        }
    }

    pub fn pattern_names(&self) -> Vec<&'static str> {
        self.patterns.iter().map(|pattern| pattern.name()).collect()
    }

    /// Rewrites `comp` with the first matching pattern, repeatedly, until no
    /// pattern matches. `changed` reports whether this node was rewritten.
    pub fn parse(&self, comp: Option<&Comp>) -> CompilerResult<(Comp, bool)> {
        let comp = comp.ok_or_else(|| {
            CompilerError::invalid_argument("graph parser received no computation")
        })?;
        let mut current = comp.clone();
        let mut changed = false;
        'rewrite: loop {
            for pattern in &self.patterns {
                let Some(next) = pattern.match_and_rewrite(&current)? else {
                    continue;
                };
                if !comp.type_signature().is_equivalent_to(next.type_signature()) {
                    return Err(CompilerError::TypeMismatch {
                        rewrite: pattern.name(),
                        expected: comp.type_signature().to_string(),
                        found: next.type_signature().to_string(),
                    });
                }
                log::trace!("{}: {} => {}", pattern.name(), current, next);
                current = next;
                changed = true;
                continue 'rewrite;
            }
            break;
        }
        Ok((current, changed))
    }
}

/// Splits `Call(CompiledComputation, Reference?)` into its parts.
fn called_graph(comp: &Comp) -> Option<(&Comp, Option<&Comp>)> {
    let BuildingBlock::Call(call) = comp.as_ref() else {
        return None;
    };
    call.function().as_compiled()?;
    match call.argument() {
        None => Some((call.function(), None)),
        Some(argument) if argument.as_reference().is_some() => {
            Some((call.function(), Some(argument)))
        }
        Some(_) => None,
    }
}

fn graph_of(function: &Comp) -> CompilerResult<Graph> {
    let unit = function.as_compiled().ok_or_else(|| {
        CompilerError::invalid_argument(format!("expected a compiled computation, found {function}"))
    })?;
    Ok(unit.graph()?)
}

fn call_compiled(graph: &Graph, argument: Option<Comp>) -> CompilerResult<Comp> {
    let function = BuildingBlock::compiled(graph)?;
    Ok(BuildingBlock::call(function, argument)?)
}

/// `(p -> C(p))` becomes `C`.
struct LambdaWrappingGraph;

impl ParserPattern for LambdaWrappingGraph {
    fn name(&self) -> &'static str {
        "lambda_wrapping_graph"
    }

    fn match_and_rewrite(&self, comp: &Comp) -> CompilerResult<Option<Comp>> {
        let BuildingBlock::Lambda(lambda) = comp.as_ref() else {
            return Ok(None);
        };
        if lambda.parameter_type().is_none() {
            return Ok(None);
        }
        let Some((function, Some(argument))) = called_graph(lambda.result()) else {
            return Ok(None);
        };
        match argument.as_reference() {
            Some(reference) if reference.name() == lambda.parameter_name() => {
                Ok(Some(function.clone()))
            }
            _ => Ok(None),
        }
    }
}

/// `<n_0=C_0(r_0), ...>` becomes `concat(C_0, ...)(<r_0, ...>)`.
///
/// No-argument elements `C_i()` are lifted to ignore the argument of the
/// first element that takes one. When no element takes an argument the
/// fused unit is itself a no-argument call.
struct StructOfCalledGraphs;

impl ParserPattern for StructOfCalledGraphs {
    fn name(&self) -> &'static str {
        "struct_of_called_graphs"
    }

    fn match_and_rewrite(&self, comp: &Comp) -> CompilerResult<Option<Comp>> {
        let BuildingBlock::Struct(node) = comp.as_ref() else {
            return Ok(None);
        };
        if node.is_empty() {
            let graph = compose::empty_struct()?;
            return call_compiled(&graph, None).map(Some);
        }

        let mut parts = Vec::with_capacity(node.len());
        for (name, element) in node.elements() {
            let Some((function, argument)) = called_graph(element) else {
                return Ok(None);
            };
            parts.push((name.clone(), graph_of(function)?, argument.cloned()));
        }

        let shared = parts.iter().find_map(|(_, _, argument)| argument.clone());
        let Some(shared) = shared else {
            let graphs: Vec<_> = parts
                .iter()
                .map(|(name, graph, _)| (name.clone(), graph))
                .collect();
            let fused = compose::concatenate(&graphs)?;
            return call_compiled(&fused, None).map(Some);
        };

        let mut lifted = Vec::with_capacity(parts.len());
        let mut arguments = Vec::with_capacity(parts.len());
        for (name, graph, argument) in parts {
            match argument {
                Some(argument) => {
                    lifted.push((name, graph));
                    arguments.push(argument);
                }
                None => {
                    let graph = compose::ignore_parameter(&graph, shared.type_signature())?;
                    lifted.push((name, graph));
                    arguments.push(shared.clone());
                }
            }
        }
        let graphs: Vec<_> = lifted
            .iter()
            .map(|(name, graph)| (name.clone(), graph))
            .collect();
        let fused = compose::concatenate(&graphs)?;
        call_compiled(&fused, Some(BuildingBlock::unnamed_structure(arguments))).map(Some)
    }
}

/// `C(r)[i]` becomes `project(C, i)(r)`.
struct SelectionFromCalledGraph;

impl ParserPattern for SelectionFromCalledGraph {
    fn name(&self) -> &'static str {
        "selection_from_called_graph"
    }

    fn match_and_rewrite(&self, comp: &Comp) -> CompilerResult<Option<Comp>> {
        let BuildingBlock::Selection(selection) = comp.as_ref() else {
            return Ok(None);
        };
        let Some((function, argument)) = called_graph(selection.source()) else {
            return Ok(None);
        };
        let projected = compose::project(&graph_of(function)?, selection.index())?;
        call_compiled(&projected, argument.cloned()).map(Some)
    }
}

/// `C2(C1(r))` becomes `compose(C2, C1)(r)`.
struct CalledComposition;

impl ParserPattern for CalledComposition {
    fn name(&self) -> &'static str {
        "called_composition"
    }

    fn match_and_rewrite(&self, comp: &Comp) -> CompilerResult<Option<Comp>> {
        let BuildingBlock::Call(call) = comp.as_ref() else {
            return Ok(None);
        };
        if call.function().as_compiled().is_none() {
            return Ok(None);
        }
        let Some((inner, argument)) = call.argument().and_then(called_graph) else {
            return Ok(None);
        };
        let composed = compose::compose(&graph_of(call.function())?, &graph_of(inner)?)?;
        call_compiled(&composed, argument.cloned()).map(Some)
    }
}

/// `C(<n_0=x, n_1=x, ...>)` becomes `compose(C, replicate)(x)`.
struct CalledGraphOnReplicatedArg;

impl ParserPattern for CalledGraphOnReplicatedArg {
    fn name(&self) -> &'static str {
        "called_graph_on_replicated_arg"
    }

    fn match_and_rewrite(&self, comp: &Comp) -> CompilerResult<Option<Comp>> {
        let BuildingBlock::Call(call) = comp.as_ref() else {
            return Ok(None);
        };
        if call.function().as_compiled().is_none() {
            return Ok(None);
        }
        let Some(BuildingBlock::Struct(node)) = call.argument().map(|argument| argument.as_ref())
        else {
            return Ok(None);
        };
        let Some((_, first)) = node.elements().first() else {
            return Ok(None);
        };
        let Some(shared) = first.as_reference() else {
            return Ok(None);
        };
        let replicated = node.elements().iter().all(|(_, element)| {
            element
                .as_reference()
                .is_some_and(|reference: &Reference| reference.name() == shared.name())
        });
        if !replicated {
            return Ok(None);
        }

        let names: Vec<_> = node.elements().iter().map(|(name, _)| name.clone()).collect();
        let replicate = compose::replicate(first.type_signature(), &names)?;
        let composed = compose::compose(&graph_of(call.function())?, &replicate)?;
        call_compiled(&composed, Some(first.clone())).map(Some)
    }
}

/// `(p -> C())` becomes `C` lifted to ignore `p`.
struct LambdaWrappingNoArgGraph;

impl ParserPattern for LambdaWrappingNoArgGraph {
    fn name(&self) -> &'static str {
        "lambda_wrapping_no_arg_graph"
    }

    fn match_and_rewrite(&self, comp: &Comp) -> CompilerResult<Option<Comp>> {
        let BuildingBlock::Lambda(lambda) = comp.as_ref() else {
            return Ok(None);
        };
        let Some((function, None)) = called_graph(lambda.result()) else {
            return Ok(None);
        };
        match lambda.parameter_type() {
            None => Ok(Some(function.clone())),
            Some(parameter) => {
                let lifted = compose::ignore_parameter(&graph_of(function)?, parameter)?;
                Ok(Some(BuildingBlock::compiled(&lifted)?))
            }
        }
    }
}
