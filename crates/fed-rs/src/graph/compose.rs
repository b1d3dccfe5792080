//! Graph factories and function-composition operations.
//!
//! These are the only operations the compiler uses to build or recombine
//! compiled units: it never looks inside a graph body itself.

use crate::types::Type;

use super::{Graph, GraphBuilder, GraphError};

/// `x -> x` over a tensor-compatible type.
pub fn identity(ty: &Type) -> Result<Graph, GraphError> {
    let builder = GraphBuilder::new(Some(ty.clone()));
    let x = builder
        .parameter()
        .ok_or_else(|| GraphError::invalid("identity graph lost its parameter"))?;
    builder.finish(x)
}

/// No-argument graph producing the empty struct `<>`.
pub fn empty_struct() -> Result<Graph, GraphError> {
    let mut builder = GraphBuilder::new(None);
    let packed = builder.pack(Vec::new())?;
    builder.finish(packed)
}

/// `x -> <n_0=x, n_1=x, ...>`, one copy of the argument per entry in `names`.
pub fn replicate(ty: &Type, names: &[Option<String>]) -> Result<Graph, GraphError> {
    let mut builder = GraphBuilder::new(Some(ty.clone()));
    let x = builder
        .parameter()
        .ok_or_else(|| GraphError::invalid("replicate graph lost its parameter"))?;
    let packed = builder.pack(names.iter().map(|name| (name.clone(), x)).collect())?;
    builder.finish(packed)
}

/// Returns a graph computing element `index` of `graph`'s struct result.
pub fn project(graph: &Graph, index: usize) -> Result<Graph, GraphError> {
    let mut builder = GraphBuilder::new(graph.parameter.clone());
    let result = builder.inline(graph, builder.parameter())?;
    let selected = builder.select(result, index)?;
    builder.finish(selected)
}

/// Function composition `outer ∘ inner`: the result of `inner` feeds `outer`.
pub fn compose(outer: &Graph, inner: &Graph) -> Result<Graph, GraphError> {
    let Some(outer_param) = &outer.parameter else {
        return Err(GraphError::invalid("cannot compose into a no-argument graph"));
    };
    if !outer_param.is_equivalent_to(&inner.result) {
        return Err(GraphError::mismatch("compose", outer_param, &inner.result));
    }
    let mut builder = GraphBuilder::new(inner.parameter.clone());
    let intermediate = builder.inline(inner, builder.parameter())?;
    let result = builder.inline(outer, Some(intermediate))?;
    builder.finish(result)
}

/// Runs every graph side by side.
///
/// The fused graph takes an unnamed struct holding one argument per input graph
/// and returns a struct of their results labelled with the paired names. When
/// none of the graphs takes an argument the fused graph takes none either.
pub fn concatenate(graphs: &[(Option<String>, &Graph)]) -> Result<Graph, GraphError> {
    if graphs.is_empty() {
        return Err(GraphError::invalid("concatenate requires at least one graph"));
    }
    if graphs.iter().all(|(_, graph)| graph.parameter.is_none()) {
        let mut builder = GraphBuilder::new(None);
        let mut results = Vec::with_capacity(graphs.len());
        for (name, graph) in graphs {
            results.push((name.clone(), builder.inline(graph, None)?));
        }
        let packed = builder.pack(results)?;
        return builder.finish(packed);
    }

    let mut params = Vec::with_capacity(graphs.len());
    for (_, graph) in graphs {
        let param = graph.parameter.clone().ok_or_else(|| {
            GraphError::invalid("concatenate cannot mix no-argument graphs with graphs that take one")
        })?;
        params.push(param);
    }

    let mut builder = GraphBuilder::new(Some(Type::unnamed_struct(params)));
    let x = builder
        .parameter()
        .ok_or_else(|| GraphError::invalid("concatenated graph lost its parameter"))?;
    let mut results = Vec::with_capacity(graphs.len());
    for (index, (name, graph)) in graphs.iter().enumerate() {
        let arg = builder.select(x, index)?;
        let result = builder.inline(graph, Some(arg))?;
        results.push((name.clone(), result));
    }
    let packed = builder.pack(results)?;
    builder.finish(packed)
}

/// Lifts a no-argument graph to one that accepts and ignores a `parameter`.
pub fn ignore_parameter(graph: &Graph, parameter: &Type) -> Result<Graph, GraphError> {
    if graph.parameter.is_some() {
        return Err(GraphError::invalid(
            "ignore_parameter expects a no-argument graph",
        ));
    }
    let mut builder = GraphBuilder::new(Some(parameter.clone()));
    let result = builder.inline(graph, None)?;
    builder.finish(result)
}
