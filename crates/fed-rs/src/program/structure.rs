//! Conversions between nested [`Value`]s and flat leaf sequences.

use crate::value::{HostTensor, Value};

use super::ProgramStateError;

/// Leaves of `value` in depth-first, left-to-right order.
pub fn flatten(value: &Value) -> Vec<HostTensor> {
    let mut leaves = Vec::new();
    visit_leaves(value, &mut String::new(), &mut |_, leaf| leaves.push(leaf.clone()));
    leaves
}

/// Leaves of `value` keyed by their path.
///
/// A path joins one segment per struct level with `/`: the element name when
/// present, its index otherwise. A bare tensor has the empty key.
pub fn flatten_with_name(value: &Value) -> Vec<(String, HostTensor)> {
    let mut leaves = Vec::new();
    visit_leaves(value, &mut String::new(), &mut |path, leaf| {
        leaves.push((path.to_string(), leaf.clone()))
    });
    leaves
}

fn visit_leaves<F>(value: &Value, path: &mut String, visit: &mut F)
where
    F: FnMut(&str, &HostTensor),
{
    match value {
        Value::Tensor(tensor) => visit(path, tensor),
        Value::Struct(elements) => {
            for (index, (name, element)) in elements.iter().enumerate() {
                let restore = path.len();
                if !path.is_empty() {
                    path.push('/');
                }
                match name {
                    Some(name) => path.push_str(name),
                    None => path.push_str(&index.to_string()),
                }
                visit_leaves(element, path, visit);
                path.truncate(restore);
            }
        }
    }
}

/// Rebuilds a value shaped like `structure` whose leaves are taken from
/// `leaves` in order. Leaf values in `structure` itself are ignored.
pub fn pack_sequence_as(
    structure: &Value,
    leaves: Vec<HostTensor>,
) -> Result<Value, ProgramStateError> {
    let expected = count_leaves(structure);
    if leaves.len() != expected {
        return Err(ProgramStateError::StructureMismatch {
            expected,
            found: leaves.len(),
        });
    }
    let mut leaves = leaves.into_iter();
    Ok(repack(structure, &mut leaves))
}

fn count_leaves(value: &Value) -> usize {
    match value {
        Value::Tensor(_) => 1,
        Value::Struct(elements) => elements.iter().map(|(_, element)| count_leaves(element)).sum(),
    }
}

fn repack(structure: &Value, leaves: &mut std::vec::IntoIter<HostTensor>) -> Value {
    match structure {
        Value::Tensor(template) => Value::Tensor(leaves.next().unwrap_or_else(|| template.clone())),
        Value::Struct(elements) => Value::Struct(
            elements
                .iter()
                .map(|(name, element)| (name.clone(), repack(element, leaves)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_leaves_through_empty_structs() {
        let value = Value::unnamed([Value::Struct(Vec::new()), 1i32.into(), Value::unnamed([2i32.into()])]);
        assert_eq!(count_leaves(&value), 2);
        assert_eq!(flatten(&value).len(), 2);
    }
}
