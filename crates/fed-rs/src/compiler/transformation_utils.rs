use std::collections::{BTreeSet, HashSet};

use crate::ir::{BuildingBlock, Comp};

use super::CompilerResult;

/// Rewrites `comp` bottom-up.
///
/// Children are visited left to right and every descendant is rebuilt before
/// `transform` sees its parent. Untouched sub-trees are shared with the input.
/// The returned flag is set when `transform` reported a change anywhere.
pub fn transform_postorder<F>(comp: &Comp, transform: &mut F) -> CompilerResult<(Comp, bool)>
where
    F: FnMut(&Comp) -> CompilerResult<(Comp, bool)>,
{
    let children = comp.children();
    let mut children_changed = false;
    let mut rebuilt_children = Vec::with_capacity(children.len());
    for child in &children {
        let (rebuilt, changed) = transform_postorder(child, transform)?;
        children_changed |= changed;
        rebuilt_children.push(rebuilt);
    }
    let rebuilt = if children_changed {
        comp.with_children(rebuilt_children)?
    } else {
        comp.clone()
    };
    let (result, changed) = transform(&rebuilt)?;
    Ok((result, children_changed || changed))
}

/// Names referenced in `comp` that no binder inside `comp` binds.
pub fn free_references(comp: &Comp) -> BTreeSet<String> {
    let mut free = BTreeSet::new();
    collect_free(comp, &mut Vec::new(), &mut free);
    free
}

fn collect_free(comp: &Comp, bound: &mut Vec<String>, free: &mut BTreeSet<String>) {
    match comp.as_ref() {
        BuildingBlock::Reference(node) => {
            if !bound.iter().any(|name| name == node.name()) {
                free.insert(node.name().to_string());
            }
        }
        BuildingBlock::Lambda(node) => {
            bound.push(node.parameter_name().to_string());
            collect_free(node.result(), bound, free);
            bound.pop();
        }
        BuildingBlock::Block(node) => {
            let depth = bound.len();
            for (name, value) in node.locals() {
                collect_free(value, bound, free);
                bound.push(name.clone());
            }
            collect_free(node.result(), bound, free);
            bound.truncate(depth);
        }
        _ => {
            for child in comp.children() {
                collect_free(&child, bound, free);
            }
        }
    }
}

fn collect_names(comp: &Comp, names: &mut HashSet<String>) {
    match comp.as_ref() {
        BuildingBlock::Reference(node) => {
            names.insert(node.name().to_string());
        }
        BuildingBlock::Lambda(node) => {
            names.insert(node.parameter_name().to_string());
        }
        BuildingBlock::Block(node) => {
            names.extend(node.locals().iter().map(|(name, _)| name.clone()));
        }
        _ => {}
    }
    for child in comp.children() {
        collect_names(&child, names);
    }
}

/// Generates binder names that do not occur anywhere in a given tree.
pub(crate) struct FreshNames {
    used: HashSet<String>,
    counter: usize,
}

impl FreshNames {
    pub(crate) fn for_tree(comp: &Comp) -> Self {
        let mut used = HashSet::new();
        collect_names(comp, &mut used);
        Self { used, counter: 0 }
    }

    pub(crate) fn next_name(&mut self) -> String {
        loop {
            let candidate = format!("_var{}", self.counter);
            self.counter += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DType, Type};

    fn int() -> Type {
        Type::scalar(DType::I32)
    }

    #[test]
    fn free_references_respect_binders() {
        let x = BuildingBlock::reference("x", int());
        let y = BuildingBlock::reference("y", int());
        let block = BuildingBlock::block(
            vec![
                ("a".to_string(), y.clone()),
                ("b".to_string(), BuildingBlock::reference("a", int())),
            ],
            BuildingBlock::unnamed_structure([BuildingBlock::reference("b", int()), x]),
        );
        let lambda = BuildingBlock::lambda("x", Some(int()), block);
        let free: Vec<_> = free_references(&lambda).into_iter().collect();
        assert_eq!(free, vec!["y".to_string()]);
    }

    #[test]
    fn fresh_names_skip_existing_ones() {
        let taken = BuildingBlock::lambda(
            "_var0",
            Some(int()),
            BuildingBlock::reference("_var1", int()),
        );
        let mut fresh = FreshNames::for_tree(&taken);
        assert_eq!(fresh.next_name(), "_var2");
        assert_eq!(fresh.next_name(), "_var3");
    }

    #[test]
    fn postorder_visits_children_first() {
        let x = BuildingBlock::reference("x", int());
        let tree = BuildingBlock::unnamed_structure([x.clone(), BuildingBlock::unnamed_structure([x])]);
        let mut order = Vec::new();
        let (out, changed) = transform_postorder(&tree, &mut |comp: &Comp| {
            order.push(comp.to_string());
            Ok((comp.clone(), false))
        })
        .expect("transform");
        assert!(!changed);
        assert!(std::sync::Arc::ptr_eq(&out, &tree));
        assert_eq!(order, vec!["x", "x", "<x>", "<x,<x>>"]);
    }
}
