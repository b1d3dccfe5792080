//! Reference host interpreter for fed-rs graphs.
//!
//! Executes every instruction eagerly over [`fed_rs::value::Value`]s. It is the
//! backend the test suites use to check that fused graphs compute what the
//! unfused IR describes.

pub mod cpu;

pub use cpu::{CpuGraphBackend, CpuKernelInterceptor, GenericCpuBackend, NoopInterceptor};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fed_rs::graph::{
        compose, BackendResult, ElementwiseBinaryOp, GraphBackend, GraphBuilder, Operation,
    };
    use fed_rs::types::{DType, Type};
    use fed_rs::value::{HostTensor, Value};

    use super::*;

    #[derive(Default)]
    struct CountingInterceptor {
        binary_calls: AtomicUsize,
    }

    impl CpuKernelInterceptor for CountingInterceptor {
        fn try_execute(&self, op: &Operation, _inputs: &[Value]) -> Option<BackendResult<Value>> {
            if matches!(op, Operation::ElementwiseBinary(_)) {
                self.binary_calls.fetch_add(1, Ordering::Relaxed);
            }
            None
        }
    }

    fn add_constant(value: i32) -> fed_rs::graph::Graph {
        let mut builder = GraphBuilder::new(Some(Type::scalar(DType::I32)));
        let x = builder.parameter().expect("parameter");
        let c = builder.constant(HostTensor::from(value));
        let sum = builder
            .binary(ElementwiseBinaryOp::Add, x, c)
            .expect("add");
        builder.finish(sum).expect("finish")
    }

    #[test]
    fn executes_composed_graphs() {
        let graph = compose::compose(&add_constant(1), &add_constant(10)).expect("compose");
        let backend = GenericCpuBackend::with_interceptor(CountingInterceptor::default());
        let out = backend
            .execute(&graph, Some(Value::from(5i32)))
            .expect("execute");
        assert_eq!(out, Value::from(16i32));
        assert_eq!(backend.interceptor().binary_calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn rejects_nonconforming_arguments() {
        let backend = CpuGraphBackend::new();
        let err = backend
            .execute(&add_constant(1), Some(Value::from(1.0f32)))
            .expect_err("dtype mismatch");
        assert!(err.to_string().contains("int32"));
        assert!(backend.execute(&add_constant(1), None).is_err());
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let mut builder = GraphBuilder::new(Some(Type::scalar(DType::I32)));
        let x = builder.parameter().expect("parameter");
        let zero = builder.constant(HostTensor::from(0i32));
        let quotient = builder
            .binary(ElementwiseBinaryOp::Div, x, zero)
            .expect("div");
        let graph = builder.finish(quotient).expect("finish");
        assert!(CpuGraphBackend::new()
            .execute(&graph, Some(Value::from(4i32)))
            .is_err());
    }

    #[test]
    fn proto_round_trip_executes() {
        let proto = add_constant(2).to_proto().expect("proto");
        let out = CpuGraphBackend::new()
            .execute_proto(&proto, Some(Value::from(40i32)))
            .expect("execute");
        assert_eq!(out.as_tensor().and_then(|t| t.as_i32_scalar()), Some(42));
    }
}
