use std::collections::HashMap;
use std::sync::Arc;

use fed_rs::graph::{
    BackendError, BackendResult, ElementwiseBinaryOp, ElementwiseUnaryOp, Graph, GraphBackend,
    Instruction, Operation, ValueId,
};
use fed_rs::types::DType;
use fed_rs::value::{HostTensor, TensorData, Value};

/// Hook that may take over execution of individual instructions.
pub trait CpuKernelInterceptor: Send + Sync {
    fn try_execute(&self, op: &Operation, inputs: &[Value]) -> Option<BackendResult<Value>>;
}

#[derive(Default)]
pub struct NoopInterceptor;

impl CpuKernelInterceptor for NoopInterceptor {
    fn try_execute(&self, _op: &Operation, _inputs: &[Value]) -> Option<BackendResult<Value>> {
        None
    }
}

/// Straight-line interpreter over host values.
#[derive(Clone)]
pub struct GenericCpuBackend<I: CpuKernelInterceptor> {
    interceptor: Arc<I>,
}

impl<I: CpuKernelInterceptor> GenericCpuBackend<I> {
    pub fn with_interceptor(interceptor: I) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn with_arc(interceptor: Arc<I>) -> Self {
        Self { interceptor }
    }

    pub fn interceptor(&self) -> &I {
        self.interceptor.as_ref()
    }
}

impl GenericCpuBackend<NoopInterceptor> {
    pub fn new() -> Self {
        Self::with_interceptor(NoopInterceptor)
    }
}

impl Default for GenericCpuBackend<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

pub type CpuGraphBackend = GenericCpuBackend<NoopInterceptor>;

impl<I: CpuKernelInterceptor> GraphBackend for GenericCpuBackend<I> {
    fn backend_name(&self) -> &str {
        "cpu-reference"
    }

    fn execute(&self, graph: &Graph, argument: Option<Value>) -> BackendResult<Value> {
        let argument = match (&graph.parameter, argument) {
            (Some(param), Some(arg)) => {
                if !arg.conforms_to(param) {
                    return Err(BackendError::argument_mismatch(param, arg.type_signature()));
                }
                Some(arg.with_names_of(param))
            }
            (None, None) => None,
            (Some(param), None) => {
                return Err(BackendError::execution(format!(
                    "graph requires an argument of type {param}"
                )));
            }
            (None, Some(_)) => {
                return Err(BackendError::execution("graph takes no argument"));
            }
        };

        let mut values: HashMap<ValueId, Value> = HashMap::with_capacity(graph.body.len());
        for instruction in &graph.body {
            let inputs = instruction
                .operands
                .iter()
                .map(|operand| {
                    values.get(operand).cloned().ok_or_else(|| {
                        BackendError::execution(format!("value {operand} has not been computed"))
                    })
                })
                .collect::<BackendResult<Vec<_>>>()?;
            let output = match self.interceptor.try_execute(&instruction.op, &inputs) {
                Some(result) => result?,
                None => execute_instruction(instruction, &inputs, argument.as_ref())?,
            };
            log::trace!("{} = {:?}", instruction.id, instruction.op);
            values.insert(instruction.id, output);
        }

        let result = values.remove(&graph.result_id).ok_or_else(|| {
            BackendError::execution(format!("result {} was not computed", graph.result_id))
        })?;
        Ok(result.with_names_of(&graph.result))
    }
}

fn execute_instruction(
    instruction: &Instruction,
    inputs: &[Value],
    argument: Option<&Value>,
) -> BackendResult<Value> {
    match &instruction.op {
        Operation::Parameter => argument
            .cloned()
            .ok_or_else(|| BackendError::execution("parameter read in a no-arg graph")),
        Operation::Constant(tensor) => Ok(Value::Tensor(tensor.clone())),
        Operation::Select { index } => {
            let source = single_input(inputs, "select")?;
            source.element(*index).cloned().ok_or_else(|| {
                BackendError::execution(format!("select index {index} out of range"))
            })
        }
        Operation::Pack { names } => {
            if names.len() != inputs.len() {
                return Err(BackendError::execution(format!(
                    "pack expects {} operands, got {}",
                    names.len(),
                    inputs.len()
                )));
            }
            Ok(Value::Struct(
                names.iter().cloned().zip(inputs.iter().cloned()).collect(),
            ))
        }
        Operation::ElementwiseBinary(op) => {
            let [lhs, rhs] = inputs else {
                return Err(BackendError::execution("elementwise binary expects two operands"));
            };
            binary(*op, tensor_input(lhs)?, tensor_input(rhs)?).map(Value::Tensor)
        }
        Operation::ElementwiseUnary(op) => {
            let input = tensor_input(single_input(inputs, "elementwise unary")?)?;
            unary(*op, input).map(Value::Tensor)
        }
        Operation::Cast { dtype } => {
            let input = tensor_input(single_input(inputs, "cast")?)?;
            cast(input, *dtype).map(Value::Tensor)
        }
    }
}

fn single_input<'a>(inputs: &'a [Value], op: &str) -> BackendResult<&'a Value> {
    match inputs {
        [input] => Ok(input),
        _ => Err(BackendError::execution(format!(
            "{op} expects one operand, got {}",
            inputs.len()
        ))),
    }
}

fn tensor_input(value: &Value) -> BackendResult<&HostTensor> {
    value
        .as_tensor()
        .ok_or_else(|| BackendError::execution("expected a tensor operand, found a struct"))
}

fn broadcast_zip<T: Copy>(
    lhs: &[T],
    rhs: &[T],
    f: impl Fn(T, T) -> BackendResult<T>,
) -> BackendResult<Vec<T>> {
    match (lhs.len(), rhs.len()) {
        (l, r) if l == r => lhs.iter().zip(rhs).map(|(a, b)| f(*a, *b)).collect(),
        (_, 1) => lhs.iter().map(|a| f(*a, rhs[0])).collect(),
        (1, _) => rhs.iter().map(|b| f(lhs[0], *b)).collect(),
        (l, r) => Err(BackendError::execution(format!(
            "elementwise operands have incompatible lengths {l} and {r}"
        ))),
    }
}

fn output_shape(lhs: &HostTensor, rhs: &HostTensor) -> Vec<usize> {
    if lhs.shape().is_empty() {
        rhs.shape().to_vec()
    } else {
        lhs.shape().to_vec()
    }
}

macro_rules! int_binary {
    ($op:expr, $a:expr, $b:expr) => {
        broadcast_zip($a, $b, |x, y| match $op {
            ElementwiseBinaryOp::Add => Ok(x.wrapping_add(y)),
            ElementwiseBinaryOp::Sub => Ok(x.wrapping_sub(y)),
            ElementwiseBinaryOp::Mul => Ok(x.wrapping_mul(y)),
            ElementwiseBinaryOp::Div => x
                .checked_div(y)
                .ok_or_else(|| BackendError::execution("integer division by zero")),
            ElementwiseBinaryOp::Maximum => Ok(x.max(y)),
            ElementwiseBinaryOp::Minimum => Ok(x.min(y)),
        })
    };
}

macro_rules! float_binary {
    ($op:expr, $a:expr, $b:expr) => {
        broadcast_zip($a, $b, |x, y| {
            Ok(match $op {
                ElementwiseBinaryOp::Add => x + y,
                ElementwiseBinaryOp::Sub => x - y,
                ElementwiseBinaryOp::Mul => x * y,
                ElementwiseBinaryOp::Div => x / y,
                ElementwiseBinaryOp::Maximum => x.max(y),
                ElementwiseBinaryOp::Minimum => x.min(y),
            })
        })
    };
}

fn binary(op: ElementwiseBinaryOp, lhs: &HostTensor, rhs: &HostTensor) -> BackendResult<HostTensor> {
    let data = match (lhs.data(), rhs.data()) {
        (TensorData::I32(a), TensorData::I32(b)) => TensorData::I32(int_binary!(op, a, b)?),
        (TensorData::I64(a), TensorData::I64(b)) => TensorData::I64(int_binary!(op, a, b)?),
        (TensorData::F32(a), TensorData::F32(b)) => TensorData::F32(float_binary!(op, a, b)?),
        (TensorData::F64(a), TensorData::F64(b)) => TensorData::F64(float_binary!(op, a, b)?),
        (TensorData::Bool(_), TensorData::Bool(_)) => {
            return Err(BackendError::unimplemented(
                "elementwise_binary",
                "bool operands are not supported",
            ));
        }
        _ => {
            return Err(BackendError::execution(format!(
                "elementwise {op:?} on mismatched dtypes {} and {}",
                lhs.dtype(),
                rhs.dtype()
            )));
        }
    };
    HostTensor::new(output_shape(lhs, rhs), data)
        .map_err(|err| BackendError::execution(err.to_string()))
}

fn unary(op: ElementwiseUnaryOp, input: &HostTensor) -> BackendResult<HostTensor> {
    let data = match (op, input.data()) {
        (ElementwiseUnaryOp::Neg, TensorData::I32(v)) => {
            TensorData::I32(v.iter().map(|x| x.wrapping_neg()).collect())
        }
        (ElementwiseUnaryOp::Abs, TensorData::I32(v)) => {
            TensorData::I32(v.iter().map(|x| x.wrapping_abs()).collect())
        }
        (ElementwiseUnaryOp::Neg, TensorData::I64(v)) => {
            TensorData::I64(v.iter().map(|x| x.wrapping_neg()).collect())
        }
        (ElementwiseUnaryOp::Abs, TensorData::I64(v)) => {
            TensorData::I64(v.iter().map(|x| x.wrapping_abs()).collect())
        }
        (ElementwiseUnaryOp::Neg, TensorData::F32(v)) => {
            TensorData::F32(v.iter().map(|x| -x).collect())
        }
        (ElementwiseUnaryOp::Abs, TensorData::F32(v)) => {
            TensorData::F32(v.iter().map(|x| x.abs()).collect())
        }
        (ElementwiseUnaryOp::Neg, TensorData::F64(v)) => {
            TensorData::F64(v.iter().map(|x| -x).collect())
        }
        (ElementwiseUnaryOp::Abs, TensorData::F64(v)) => {
            TensorData::F64(v.iter().map(|x| x.abs()).collect())
        }
        (_, TensorData::Bool(_)) => {
            return Err(BackendError::unimplemented(
                "elementwise_unary",
                "bool operands are not supported",
            ));
        }
    };
    HostTensor::new(input.shape().to_vec(), data)
        .map_err(|err| BackendError::execution(err.to_string()))
}

fn as_f64(data: &TensorData) -> Vec<f64> {
    match data {
        TensorData::Bool(v) => v.iter().map(|x| if *x { 1.0 } else { 0.0 }).collect(),
        TensorData::I32(v) => v.iter().map(|x| f64::from(*x)).collect(),
        TensorData::I64(v) => v.iter().map(|x| *x as f64).collect(),
        TensorData::F32(v) => v.iter().map(|x| f64::from(*x)).collect(),
        TensorData::F64(v) => v.clone(),
    }
}

fn cast(input: &HostTensor, dtype: DType) -> BackendResult<HostTensor> {
    if input.dtype() == dtype {
        return Ok(input.clone());
    }
    let wide = as_f64(input.data());
    let data = match dtype {
        DType::Bool => TensorData::Bool(wide.iter().map(|x| *x != 0.0).collect()),
        DType::I32 => TensorData::I32(wide.iter().map(|x| *x as i32).collect()),
        DType::I64 => match input.data() {
            TensorData::I32(v) => TensorData::I64(v.iter().map(|x| i64::from(*x)).collect()),
            _ => TensorData::I64(wide.iter().map(|x| *x as i64).collect()),
        },
        DType::F32 => TensorData::F32(wide.iter().map(|x| *x as f32).collect()),
        DType::F64 => TensorData::F64(wide),
    };
    HostTensor::new(input.shape().to_vec(), data)
        .map_err(|err| BackendError::execution(err.to_string()))
}
