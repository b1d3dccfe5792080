use fed_rs::compiler::tree_transformations::{
    inline_block_locals, insert_called_identity_at_leaves, replace_called_lambda_with_block,
    replace_selection_from_struct_with_element,
};
use fed_rs::compiler::{free_references, transform_postorder};
use fed_rs::ir::{factory, BuildingBlock, Comp};
use fed_rs::types::{DType, Type};

fn int() -> Type {
    Type::scalar(DType::I32)
}

fn identity_digest(ty: &Type) -> String {
    factory::create_compiled_identity(ty)
        .expect("identity")
        .as_compiled()
        .expect("compiled")
        .fingerprint()
}

#[test]
fn called_lambda_becomes_block() {
    let y = BuildingBlock::reference("y", int());
    let lambda = BuildingBlock::lambda("y", Some(int()), y);
    let x = BuildingBlock::reference("x", int());
    let call = BuildingBlock::call(lambda, Some(x)).expect("call");

    let (out, changed) = replace_called_lambda_with_block(&call).expect("rewrite");
    assert!(changed);
    assert_eq!(out.compact_representation(), "(let y=x in y)");
    assert_eq!(out.type_signature(), call.type_signature());
}

#[test]
fn called_thunk_becomes_empty_block() {
    let z = BuildingBlock::reference("z", int());
    let thunk = BuildingBlock::lambda("unused", None, z);
    let call = BuildingBlock::call(thunk, None).expect("call");

    let (out, changed) = replace_called_lambda_with_block(&call).expect("rewrite");
    assert!(changed);
    assert_eq!(out.compact_representation(), "(let in z)");
}

#[test]
fn uncalled_lambda_is_left_alone() {
    let x = BuildingBlock::reference("x", int());
    let lambda = BuildingBlock::lambda("x", Some(int()), x);
    let (out, changed) = replace_called_lambda_with_block(&lambda).expect("rewrite");
    assert!(!changed);
    assert_eq!(out, lambda);
}

#[test]
fn selection_from_literal_struct_picks_element() {
    let x = BuildingBlock::reference("x", int());
    let y = BuildingBlock::reference("y", Type::scalar(DType::F32));
    let pair = BuildingBlock::unnamed_structure([x, y]);
    let selected = BuildingBlock::selection(pair, 1).expect("select");

    let (out, changed) = replace_selection_from_struct_with_element(&selected).expect("rewrite");
    assert!(changed);
    assert_eq!(out.compact_representation(), "y");
}

#[test]
fn block_locals_are_substituted_in_order() {
    let x = BuildingBlock::reference("x", int());
    let a = BuildingBlock::reference("a", int());
    let pair = BuildingBlock::unnamed_structure([a.clone(), a]);
    let b = BuildingBlock::reference("b", pair.type_signature().clone());
    let block = BuildingBlock::block(vec![("a".to_string(), x), ("b".to_string(), pair)], b);
    assert_eq!(block.compact_representation(), "(let a=x,b=<a,a> in b)");

    let (out, changed) = inline_block_locals(&block).expect("inline");
    assert!(changed);
    assert_eq!(out.compact_representation(), "<x,x>");
}

#[test]
fn lambda_parameter_shadows_block_local() {
    let z = BuildingBlock::reference("z", int());
    let x = BuildingBlock::reference("x", int());
    let lambda = BuildingBlock::lambda("x", Some(int()), x);
    let block = BuildingBlock::block(vec![("x".to_string(), z)], lambda);

    let (out, changed) = inline_block_locals(&block).expect("inline");
    assert!(changed);
    assert_eq!(out.compact_representation(), "(x -> x)");
}

#[test]
fn inlining_renames_capturing_parameter() {
    let y = BuildingBlock::reference("y", int());
    let a = BuildingBlock::reference("a", int());
    let inner = BuildingBlock::lambda(
        "y",
        Some(int()),
        BuildingBlock::unnamed_structure([a, y.clone()]),
    );
    let block = BuildingBlock::block(vec![("a".to_string(), y)], inner);
    let outer = BuildingBlock::lambda("y", Some(int()), block);
    assert_eq!(outer.compact_representation(), "(y -> (let a=y in (y -> <a,y>)))");

    let (out, changed) = inline_block_locals(&outer).expect("inline");
    assert!(changed);
    assert_eq!(out.compact_representation(), "(y -> (_var0 -> <y,_var0>))");
    assert!(out.type_signature().is_equivalent_to(outer.type_signature()));
    assert!(free_references(&out).is_empty());
}

#[test]
fn identity_is_inserted_at_unconsumed_references() {
    let ty = Type::unnamed_struct([int(), int()]);
    let x = BuildingBlock::reference("x", ty.clone());
    let first = BuildingBlock::selection(x.clone(), 0).expect("select");
    let body = BuildingBlock::unnamed_structure([x, first]);
    let lambda = BuildingBlock::lambda("x", Some(ty.clone()), body);

    let (out, changed) = insert_called_identity_at_leaves(&lambda).expect("insert");
    assert!(changed);
    let digest = identity_digest(&ty);
    assert_eq!(
        out.compact_representation(),
        format!("(x -> <comp#{digest}(x),comp#{digest}(x)[0]>)")
    );
    assert_eq!(out.type_signature(), lambda.type_signature());
}

#[test]
fn references_consumed_by_compiled_calls_are_not_wrapped() {
    let x = BuildingBlock::reference("x", int());
    let called = factory::create_identity_call(x).expect("identity call");
    let lambda = BuildingBlock::lambda("x", Some(int()), called);

    let (out, changed) = insert_called_identity_at_leaves(&lambda).expect("insert");
    assert!(!changed);
    assert_eq!(out, lambda);
}

#[test]
fn postorder_rewrite_sees_rebuilt_children() {
    let x = BuildingBlock::reference("x", int());
    let tree: Comp = BuildingBlock::unnamed_structure([x.clone(), BuildingBlock::unnamed_structure([x])]);

    let mut visited = Vec::new();
    let (out, changed) = transform_postorder(&tree, &mut |node: &Comp| {
        visited.push(node.kind());
        match node.as_ref() {
            BuildingBlock::Reference(reference) => Ok((
                BuildingBlock::reference(format!("{}_renamed", reference.name()), int()),
                true,
            )),
            _ => Ok((node.clone(), false)),
        }
    })
    .expect("transform");

    assert!(changed);
    assert_eq!(visited, ["Reference", "Reference", "Struct", "Struct"]);
    assert_eq!(out.compact_representation(), "<x_renamed,<x_renamed>>");
}
