use fed_rs::compiler::{
    parse_to_graph, CompilerError, GraphParser, Pipeline, PipelineConfig,
};
use fed_rs::graph::{ElementwiseBinaryOp, Graph, GraphBackend, GraphBuilder};
use fed_rs::ir::{factory, BuildingBlock, Comp};
use fed_rs::types::{DType, Type};
use fed_rs::value::{HostTensor, TensorData, Value};
use fed_rs_backend_ref_cpu::CpuGraphBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn int() -> Type {
    Type::scalar(DType::I32)
}

fn float() -> Type {
    Type::scalar(DType::F32)
}

fn compiled(graph: &Graph) -> Comp {
    BuildingBlock::compiled(graph).expect("compile graph")
}

fn add_one() -> Graph {
    let mut builder = GraphBuilder::new(Some(int()));
    let x = builder.parameter().expect("parameter");
    let one = builder.constant(HostTensor::from(1i32));
    let sum = builder
        .binary(ElementwiseBinaryOp::Add, x, one)
        .expect("add");
    builder.finish(sum).expect("finish")
}

/// `<a, b> -> a + b + 1`
fn sum_plus_one() -> Graph {
    let mut builder = GraphBuilder::new(Some(Type::unnamed_struct([int(), int()])));
    let x = builder.parameter().expect("parameter");
    let a = builder.select(x, 0).expect("select");
    let b = builder.select(x, 1).expect("select");
    let one = builder.constant(HostTensor::from(1i32));
    let sum = builder.binary(ElementwiseBinaryOp::Add, a, b).expect("add");
    let total = builder
        .binary(ElementwiseBinaryOp::Add, sum, one)
        .expect("add");
    builder.finish(total).expect("finish")
}

fn constant_seven() -> Graph {
    let mut builder = GraphBuilder::new(None);
    let seven = builder.constant(HostTensor::from(7i32));
    builder.finish(seven).expect("finish")
}

fn execute(comp: &Comp, argument: Option<Value>) -> Value {
    let unit = comp
        .as_compiled()
        .unwrap_or_else(|| panic!("expected a single compiled unit, got {comp}"));
    CpuGraphBackend::new()
        .execute_proto(unit.proto(), argument)
        .expect("execute fused graph")
}

fn lower(comp: &Comp) -> Comp {
    let (lowered, _) = parse_to_graph(Some(comp)).expect("parse_to_graph");
    assert!(
        lowered.type_signature().is_equivalent_to(comp.type_signature()),
        "type changed from {} to {}",
        comp.type_signature(),
        lowered.type_signature()
    );
    lowered
}

#[test]
fn parse_rejects_missing_computation() {
    assert!(matches!(
        GraphParser::new().parse(None),
        Err(CompilerError::InvalidArgument(_))
    ));
    assert!(matches!(
        parse_to_graph(None),
        Err(CompilerError::InvalidArgument(_))
    ));
}

#[test]
fn parse_leaves_intrinsic_unchanged() {
    let intrinsic = BuildingBlock::intrinsic("federated_broadcast", Type::function(Some(int()), int()));
    let (parsed, changed) = GraphParser::new().parse(Some(&intrinsic)).expect("parse");
    assert!(!changed);
    assert_eq!(parsed.compact_representation(), intrinsic.compact_representation());

    let (lowered, changed) = parse_to_graph(Some(&intrinsic)).expect("parse_to_graph");
    assert!(!changed);
    assert_eq!(lowered, intrinsic);
}

#[test]
fn selection_from_called_identity_fuses() {
    let param = Type::unnamed_struct([int(), float()]);
    let identity = factory::create_compiled_identity(&param).expect("identity");
    let x = BuildingBlock::reference("x", param.clone());
    let called = BuildingBlock::call(identity, Some(x)).expect("call");
    let selected = BuildingBlock::selection(called, 1).expect("select");
    let lambda = BuildingBlock::lambda("x", Some(param), selected);

    let (parsed, changed) = parse_to_graph(Some(&lambda)).expect("parse_to_graph");
    assert!(changed);
    assert!(parsed.as_compiled().is_some());
    assert!(parsed.type_signature().is_equivalent_to(lambda.type_signature()));

    let out = execute(&parsed, Some(Value::unnamed([0i32.into(), 1.0f32.into()])));
    assert_eq!(out, Value::from(1.0f32));
}

#[test]
fn named_selection_fuses() {
    let param = Type::named_struct([("a", int()), ("b", float())]);
    let x = BuildingBlock::reference("x", param.clone());
    let selected = BuildingBlock::selection_by_name(x, "a").expect("select");
    let lambda = BuildingBlock::lambda("x", Some(param), selected);

    let parsed = lower(&lambda);
    assert_eq!(parsed.type_signature(), lambda.type_signature());
    let out = execute(&parsed, Some(Value::named([("a", 5i32.into()), ("b", 6.0f32.into())])));
    assert_eq!(out, Value::from(5i32));
}

#[test]
fn struct_of_selections_fuses_and_keeps_names() {
    let param = Type::named_struct([("a", int()), ("b", float())]);
    let x = BuildingBlock::reference("x", param.clone());
    let swapped = BuildingBlock::structure(vec![
        (
            Some("b".to_string()),
            BuildingBlock::selection(x.clone(), 1).expect("select"),
        ),
        (
            Some("a".to_string()),
            BuildingBlock::selection(x, 0).expect("select"),
        ),
    ]);
    let lambda = BuildingBlock::lambda("x", Some(param), swapped);

    let parsed = lower(&lambda);
    let out = execute(&parsed, Some(Value::named([("a", 5i32.into()), ("b", 6.0f32.into())])));
    assert_eq!(out, Value::named([("b", 6.0f32.into()), ("a", 5i32.into())]));
}

#[test]
fn selection_then_add_one_composes() {
    let param = Type::named_struct([("a", int()), ("b", float())]);
    let x = BuildingBlock::reference("x", param.clone());
    let a = BuildingBlock::selection_by_name(x, "a").expect("select");
    let incremented = BuildingBlock::call(compiled(&add_one()), Some(a)).expect("call");
    let lambda = BuildingBlock::lambda("x", Some(param), incremented);

    let parsed = lower(&lambda);
    let out = execute(&parsed, Some(Value::unnamed([5i32.into(), 6.0f32.into()])));
    assert_eq!(out, Value::from(6i32));
}

#[test]
fn replicated_argument_fuses() {
    let x = BuildingBlock::reference("x", int());
    let pair = BuildingBlock::unnamed_structure([x.clone(), x]);
    let called = BuildingBlock::call(compiled(&sum_plus_one()), Some(pair)).expect("call");
    let lambda = BuildingBlock::lambda("x", Some(int()), called);

    let parsed = lower(&lambda);
    assert_eq!(execute(&parsed, Some(17i32.into())), Value::from(35i32));
}

#[test]
fn called_lambda_is_inlined_before_fusion() {
    let y = BuildingBlock::reference("y", int());
    let inner = BuildingBlock::lambda(
        "y",
        Some(int()),
        BuildingBlock::call(compiled(&add_one()), Some(y)).expect("call"),
    );
    let x = BuildingBlock::reference("x", int());
    let first = BuildingBlock::call(compiled(&add_one()), Some(x)).expect("call");
    let body = BuildingBlock::call(inner, Some(first)).expect("call");
    let lambda = BuildingBlock::lambda("x", Some(int()), body);

    let parsed = lower(&lambda);
    assert_eq!(execute(&parsed, Some(3i32.into())), Value::from(5i32));
}

#[test]
fn lambdas_around_no_arg_graphs_fuse() {
    let called = BuildingBlock::call(compiled(&constant_seven()), None).expect("call");

    let thunk = BuildingBlock::lambda("unused", None, called.clone());
    let parsed = lower(&thunk);
    assert_eq!(execute(&parsed, None), Value::from(7i32));

    let ignoring = BuildingBlock::lambda("x", Some(float()), called);
    let parsed = lower(&ignoring);
    assert_eq!(parsed.type_signature(), &Type::function(Some(float()), int()));
    assert_eq!(execute(&parsed, Some(2.5f32.into())), Value::from(7i32));
}

#[test]
fn empty_struct_becomes_no_arg_call() {
    let lambda = BuildingBlock::lambda("x", Some(int()), BuildingBlock::unnamed_structure(Vec::new()));
    let parsed = lower(&lambda);
    assert_eq!(execute(&parsed, Some(1i32.into())), Value::Struct(Vec::new()));
}

#[test]
fn empty_struct_beside_reference_fuses() {
    let x = BuildingBlock::reference("x", int());
    let body = BuildingBlock::unnamed_structure([x, BuildingBlock::unnamed_structure(Vec::new())]);
    let lambda = BuildingBlock::lambda("x", Some(int()), body);

    let parsed = lower(&lambda);
    assert_eq!(
        execute(&parsed, Some(5i32.into())),
        Value::unnamed([5i32.into(), Value::Struct(Vec::new())])
    );
}

#[test]
fn nested_empty_structs_fuse() {
    let empty = || BuildingBlock::unnamed_structure(Vec::new());
    let body = BuildingBlock::structure(vec![
        (None, empty()),
        (Some("e".to_string()), empty()),
    ]);
    let lambda = BuildingBlock::lambda("x", Some(float()), body);

    let parsed = lower(&lambda);
    assert_eq!(
        execute(&parsed, Some(1.5f32.into())),
        Value::Struct(vec![
            (None, Value::Struct(Vec::new())),
            (Some("e".to_string()), Value::Struct(Vec::new())),
        ])
    );
}

/// `<int32, <>> -> x[0] + 1`
fn first_plus_one() -> Graph {
    let param = Type::unnamed_struct([int(), Type::unnamed_struct(Vec::<Type>::new())]);
    let mut builder = GraphBuilder::new(Some(param));
    let x = builder.parameter().expect("parameter");
    let first = builder.select(x, 0).expect("select");
    let one = builder.constant(HostTensor::from(1i32));
    let sum = builder
        .binary(ElementwiseBinaryOp::Add, first, one)
        .expect("add");
    builder.finish(sum).expect("finish")
}

#[test]
fn called_graph_on_selection_and_empty_struct_fuses() {
    let param = Type::unnamed_struct([int(), float()]);
    let x = BuildingBlock::reference("x", param.clone());
    let argument = BuildingBlock::unnamed_structure([
        BuildingBlock::selection(x, 0).expect("select"),
        BuildingBlock::unnamed_structure(Vec::new()),
    ]);
    let called = BuildingBlock::call(compiled(&first_plus_one()), Some(argument)).expect("call");
    let lambda = BuildingBlock::lambda("x", Some(param), called);

    let (parsed, changed) = parse_to_graph(Some(&lambda)).expect("parse_to_graph");
    assert!(changed);
    assert!(parsed.type_signature().is_equivalent_to(lambda.type_signature()));
    let out = execute(&parsed, Some(Value::unnamed([41i32.into(), 0.5f32.into()])));
    assert_eq!(out, Value::from(42i32));
}

#[test]
fn intrinsic_calls_are_not_fused() {
    let intrinsic = BuildingBlock::intrinsic("federated_map", Type::function(Some(int()), int()));
    let x = BuildingBlock::reference("x", int());
    let called = BuildingBlock::call(intrinsic, Some(x)).expect("call");
    let lambda = BuildingBlock::lambda("x", Some(int()), called);

    let (lowered, changed) = parse_to_graph(Some(&lambda)).expect("parse_to_graph");
    assert!(!changed, "identity insertion alone is not a fusion");
    let identity = factory::create_compiled_identity(&int()).expect("identity");
    let digest = identity.as_compiled().expect("compiled").fingerprint();
    assert_eq!(
        lowered.compact_representation(),
        format!("(x -> federated_map(comp#{digest}(x)))")
    );
}

#[test]
fn pipeline_reports_rewrite_counts() {
    let param = Type::unnamed_struct([int(), int()]);
    let x = BuildingBlock::reference("x", param.clone());
    let body = BuildingBlock::unnamed_structure([
        BuildingBlock::selection(x.clone(), 1).expect("select"),
        BuildingBlock::selection(x, 0).expect("select"),
    ]);
    let lambda = BuildingBlock::lambda("x", Some(param), body);

    let pipeline = Pipeline::lowering(PipelineConfig {
        normalize_max_iters: 1,
        log_stats: true,
    });
    let (lowered, stats) = pipeline.run(&lambda).expect("run");
    assert!(stats.changed);
    // two identity insertions, two selections, the struct and the lambda
    assert_eq!(stats.rewrites_applied, 6);
    let out = execute(&lowered, Some(Value::unnamed([1i32.into(), 2i32.into()])));
    assert_eq!(out, Value::unnamed([2i32.into(), 1i32.into()]));
}

fn nested_param() -> Type {
    Type::named_struct([
        ("a", int()),
        ("b", float()),
        ("c", Type::unnamed_struct([int(), Type::tensor(DType::F32, &[2])])),
    ])
}

fn nested_argument() -> Value {
    Value::named([
        ("a", Value::from(3i32)),
        ("b", Value::from(0.5f32)),
        (
            "c",
            Value::unnamed([
                Value::from(-4i32),
                HostTensor::new(vec![2], TensorData::F32(vec![1.5, 2.5]))
                    .expect("tensor")
                    .into(),
            ]),
        ),
    ])
}

fn random_glue(rng: &mut StdRng, x: &Comp, depth: usize) -> Comp {
    if depth == 0 || rng.gen_bool(0.5) {
        return match rng.gen_range(0..6) {
            0 => x.clone(),
            1 | 2 => BuildingBlock::selection(x.clone(), rng.gen_range(0..3)).expect("select"),
            3 => {
                let c = BuildingBlock::selection(x.clone(), 2).expect("select");
                BuildingBlock::selection(c, rng.gen_range(0..2)).expect("select")
            }
            4 => BuildingBlock::selection(x.clone(), 2).expect("select"),
            _ => BuildingBlock::unnamed_structure(Vec::new()),
        };
    }
    let len = rng.gen_range(1..=3);
    let elements = (0..len)
        .map(|idx| {
            let name = rng.gen_bool(0.5).then(|| format!("n{idx}"));
            (name, random_glue(rng, x, depth - 1))
        })
        .collect();
    BuildingBlock::structure(elements)
}

fn evaluate(comp: &Comp, x: &Value) -> Value {
    match comp.as_ref() {
        BuildingBlock::Reference(_) => x.clone(),
        BuildingBlock::Selection(node) => evaluate(node.source(), x)
            .element(node.index())
            .cloned()
            .expect("selection in range"),
        BuildingBlock::Struct(node) => Value::Struct(
            node.elements()
                .iter()
                .map(|(name, element)| (name.clone(), evaluate(element, x)))
                .collect(),
        ),
        other => panic!("unexpected node {}", other.kind()),
    }
}

#[test]
fn random_selection_struct_glue_fuses_to_one_unit() {
    let mut rng = StdRng::seed_from_u64(7);
    let x = BuildingBlock::reference("x", nested_param());
    for _ in 0..32 {
        let glue = random_glue(&mut rng, &x, 3);
        let expected = evaluate(&glue, &nested_argument());
        let lambda = BuildingBlock::lambda("x", Some(nested_param()), glue);
        let parsed = lower(&lambda);
        assert_eq!(
            execute(&parsed, Some(nested_argument())),
            expected,
            "lowering {lambda}"
        );
    }
}
