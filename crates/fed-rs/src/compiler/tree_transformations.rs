//! Structural normalization passes.
//!
//! Each pass is a pure `Comp -> (Comp, changed)` rewrite. Together they bring
//! a tree into the shape [`super::GraphParser`] expects: no called lambdas, no
//! blocks, no selections out of literal structs, and every free tensor
//! reference consumed by a compiled call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ir::{factory, BuildingBlock, Comp};

use super::pipeline::{PassResult, TreePass};
use super::transformation_utils::{free_references, transform_postorder, FreshNames};
use super::CompilerResult;

fn rewrite_postorder<F>(comp: &Comp, mut rewrite: F) -> CompilerResult<(Comp, usize)>
where
    F: FnMut(&Comp) -> CompilerResult<Option<Comp>>,
{
    let mut rewrites = 0usize;
    let (out, _) = transform_postorder(comp, &mut |node: &Comp| match rewrite(node)? {
        Some(replacement) => {
            rewrites += 1;
            Ok((replacement, true))
        }
        None => Ok((node.clone(), false)),
    })?;
    Ok((out, rewrites))
}

/// `(p -> body)(arg)` becomes `(let p=arg in body)`.
pub fn replace_called_lambda_with_block(comp: &Comp) -> CompilerResult<(Comp, bool)> {
    let (out, rewrites) = called_lambda_counted(comp)?;
    Ok((out, rewrites > 0))
}

fn called_lambda_counted(comp: &Comp) -> CompilerResult<(Comp, usize)> {
    rewrite_postorder(comp, called_lambda_to_block)
}

fn called_lambda_to_block(comp: &Comp) -> CompilerResult<Option<Comp>> {
    let BuildingBlock::Call(call) = comp.as_ref() else {
        return Ok(None);
    };
    let BuildingBlock::Lambda(lambda) = call.function().as_ref() else {
        return Ok(None);
    };
    let locals = match (lambda.parameter_type(), call.argument()) {
        (Some(_), Some(argument)) => vec![(lambda.parameter_name().to_string(), argument.clone())],
        _ => Vec::new(),
    };
    Ok(Some(BuildingBlock::block(locals, lambda.result().clone())))
}

/// `<..., e_i, ...>[i]` becomes `e_i`.
pub fn replace_selection_from_struct_with_element(comp: &Comp) -> CompilerResult<(Comp, bool)> {
    let (out, rewrites) = selection_from_struct_counted(comp)?;
    Ok((out, rewrites > 0))
}

fn selection_from_struct_counted(comp: &Comp) -> CompilerResult<(Comp, usize)> {
    rewrite_postorder(comp, selection_from_struct)
}

fn selection_from_struct(comp: &Comp) -> CompilerResult<Option<Comp>> {
    let BuildingBlock::Selection(selection) = comp.as_ref() else {
        return Ok(None);
    };
    let BuildingBlock::Struct(source) = selection.source().as_ref() else {
        return Ok(None);
    };
    Ok(source
        .elements()
        .get(selection.index())
        .map(|(_, element)| element.clone()))
}

/// Replaces every block with its result, substituting the locals.
///
/// Inner binders shadow outer ones. A lambda parameter that would capture a
/// free name of a substituted value is renamed to a fresh `_var{n}`.
pub fn inline_block_locals(comp: &Comp) -> CompilerResult<(Comp, bool)> {
    let (out, rewrites) = inline_counted(comp)?;
    Ok((out, rewrites > 0))
}

fn inline_counted(comp: &Comp) -> CompilerResult<(Comp, usize)> {
    let mut inliner = Inliner {
        fresh: FreshNames::for_tree(comp),
        rewrites: 0,
    };
    let out = inliner.inline(comp, &HashMap::new())?;
    Ok((out, inliner.rewrites))
}

struct Inliner {
    fresh: FreshNames,
    rewrites: usize,
}

impl Inliner {
    fn inline(&mut self, comp: &Comp, scope: &HashMap<String, Comp>) -> CompilerResult<Comp> {
        match comp.as_ref() {
            BuildingBlock::Reference(node) => {
                Ok(scope.get(node.name()).cloned().unwrap_or_else(|| comp.clone()))
            }
            BuildingBlock::Lambda(node) => {
                let mut inner = scope.clone();
                inner.remove(node.parameter_name());
                let captures = inner
                    .values()
                    .any(|value| free_references(value).contains(node.parameter_name()));
                let parameter_name = if captures {
                    let fresh = self.fresh.next_name();
                    if let Some(ty) = node.parameter_type() {
                        inner.insert(
                            node.parameter_name().to_string(),
                            BuildingBlock::reference(fresh.clone(), ty.clone()),
                        );
                    }
                    self.rewrites += 1;
                    fresh
                } else {
                    node.parameter_name().to_string()
                };
                let result = self.inline(node.result(), &inner)?;
                if !captures && Arc::ptr_eq(&result, node.result()) {
                    return Ok(comp.clone());
                }
                Ok(BuildingBlock::lambda(
                    parameter_name,
                    node.parameter_type().cloned(),
                    result,
                ))
            }
            BuildingBlock::Block(node) => {
                let mut inner = scope.clone();
                for (name, value) in node.locals() {
                    let value = self.inline(value, &inner)?;
                    inner.insert(name.clone(), value);
                }
                self.rewrites += 1;
                self.inline(node.result(), &inner)
            }
            _ => {
                let children = comp.children();
                let mut changed = false;
                let mut rebuilt = Vec::with_capacity(children.len());
                for child in &children {
                    let next = self.inline(child, scope)?;
                    changed |= !Arc::ptr_eq(&next, child);
                    rebuilt.push(next);
                }
                if changed {
                    Ok(comp.with_children(rebuilt)?)
                } else {
                    Ok(comp.clone())
                }
            }
        }
    }
}

/// Wraps tensor references that are not already consumed by a compiled call
/// in `identity(ref)`.
pub fn insert_called_identity_at_leaves(comp: &Comp) -> CompilerResult<(Comp, bool)> {
    let (out, rewrites) = called_identity_counted(comp)?;
    Ok((out, rewrites > 0))
}

fn called_identity_counted(comp: &Comp) -> CompilerResult<(Comp, usize)> {
    rewrite_postorder(comp, wrap_leaf_children)
}

fn wrap_leaf(comp: &Comp) -> CompilerResult<Option<Comp>> {
    match comp.as_ref() {
        BuildingBlock::Reference(_) if comp.type_signature().is_tensor_compatible() => {
            Ok(Some(factory::create_identity_call(comp.clone())?))
        }
        _ => Ok(None),
    }
}

fn wrap_or_keep(comp: &Comp, wrapped_any: &mut bool) -> CompilerResult<Comp> {
    match wrap_leaf(comp)? {
        Some(wrapped) => {
            *wrapped_any = true;
            Ok(wrapped)
        }
        None => Ok(comp.clone()),
    }
}

fn wrap_leaf_children(comp: &Comp) -> CompilerResult<Option<Comp>> {
    let mut wrapped = false;
    let rebuilt = match comp.as_ref() {
        BuildingBlock::Struct(node) => {
            let elements = node
                .elements()
                .iter()
                .map(|(name, element)| Ok((name.clone(), wrap_or_keep(element, &mut wrapped)?)))
                .collect::<CompilerResult<Vec<_>>>()?;
            BuildingBlock::structure(elements)
        }
        BuildingBlock::Selection(node) => {
            let source = wrap_or_keep(node.source(), &mut wrapped)?;
            BuildingBlock::selection(source, node.index())?
        }
        BuildingBlock::Lambda(node) => {
            let result = wrap_or_keep(node.result(), &mut wrapped)?;
            BuildingBlock::lambda(
                node.parameter_name().to_string(),
                node.parameter_type().cloned(),
                result,
            )
        }
        BuildingBlock::Block(node) => {
            let locals = node
                .locals()
                .iter()
                .map(|(name, value)| Ok((name.clone(), wrap_or_keep(value, &mut wrapped)?)))
                .collect::<CompilerResult<Vec<_>>>()?;
            let result = wrap_or_keep(node.result(), &mut wrapped)?;
            BuildingBlock::block(locals, result)
        }
        BuildingBlock::Call(node) if node.function().as_compiled().is_none() => {
            let Some(argument) = node.argument() else {
                return Ok(None);
            };
            let argument = wrap_or_keep(argument, &mut wrapped)?;
            BuildingBlock::call(node.function().clone(), Some(argument))?
        }
        _ => return Ok(None),
    };
    Ok(wrapped.then_some(rebuilt))
}

macro_rules! tree_pass {
    ($pass:ident, $name:literal, $rewrite:ident) => {
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $pass;

        impl TreePass for $pass {
            fn name(&self) -> &'static str {
                $name
            }

            fn run(&self, comp: &Comp) -> CompilerResult<(Comp, PassResult)> {
                let (out, rewrites) = $rewrite(comp)?;
                Ok((out, PassResult::from_rewrites(rewrites)))
            }
        }
    };
}

tree_pass!(
    CalledLambdaToBlockPass,
    "replace_called_lambda_with_block",
    called_lambda_counted
);
tree_pass!(InlineBlockLocalsPass, "inline_block_locals", inline_counted);
tree_pass!(
    SelectionFromStructPass,
    "replace_selection_from_struct_with_element",
    selection_from_struct_counted
);
tree_pass!(
    InsertCalledIdentityPass,
    "insert_called_identity_at_leaves",
    called_identity_counted
);
