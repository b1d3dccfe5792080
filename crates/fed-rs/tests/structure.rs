use fed_rs::program::{flatten, flatten_with_name, pack_sequence_as, ProgramStateError};
use fed_rs::value::{deserialize_value, serialize_value, HostTensor, TensorData, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn nested() -> Value {
    Value::named([
        ("a", Value::from(1i32)),
        (
            "b",
            Value::unnamed([
                Value::from(2.0f32),
                Value::named([("c", Value::from(true))]),
            ]),
        ),
    ])
}

#[test]
fn leaf_paths_join_names_and_indices() {
    let keys: Vec<String> = flatten_with_name(&nested())
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, ["a", "b/0", "b/1/c"]);

    let root = flatten_with_name(&Value::from(3i64));
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].0, "");
}

#[test]
fn pack_sequence_as_inverts_flatten() {
    let mut rng = StdRng::seed_from_u64(41);
    for _ in 0..8 {
        let matrix: Vec<f64> = (0..4).map(|_| rng.gen()).collect();
        let value = Value::unnamed([
            HostTensor::new(vec![2, 2], TensorData::F64(matrix))
                .expect("matrix")
                .into(),
            Value::named([
                ("count", Value::from(rng.gen::<i32>())),
                ("empty", Value::Struct(Vec::new())),
            ]),
        ]);
        let template = Value::unnamed([
            HostTensor::zeros(fed_rs::DType::F64, vec![2, 2]).into(),
            Value::named([
                ("count", Value::from(0i32)),
                ("empty", Value::Struct(Vec::new())),
            ]),
        ]);
        let rebuilt = pack_sequence_as(&template, flatten(&value)).expect("pack");
        assert_eq!(rebuilt, value);
    }
}

#[test]
fn pack_sequence_as_checks_leaf_count() {
    let err = pack_sequence_as(&nested(), vec![HostTensor::from(1i32)]).expect_err("too few leaves");
    assert!(matches!(
        err,
        ProgramStateError::StructureMismatch {
            expected: 3,
            found: 1
        }
    ));
}

#[test]
fn serialized_values_keep_names() {
    let bytes = serialize_value(&nested()).expect("serialize");
    assert_eq!(deserialize_value(&bytes).expect("deserialize"), nested());
}
