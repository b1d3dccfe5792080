use std::collections::HashMap;

use crate::types::{DType, StructType, TensorType, Type};
use crate::value::HostTensor;

use super::{
    ElementwiseBinaryOp, ElementwiseUnaryOp, Graph, GraphError, Instruction, Operation, ValueId,
    FORMAT_VERSION,
};

/// Incrementally assembles a type-checked [`Graph`].
pub struct GraphBuilder {
    next_value_id: u32,
    parameter: Option<(ValueId, Type)>,
    instructions: Vec<Instruction>,
    value_types: HashMap<ValueId, Type>,
}

impl GraphBuilder {
    /// Starts a graph; when `parameter` is present its `Parameter` instruction is emitted first.
    pub fn new(parameter: Option<Type>) -> Self {
        let mut builder = Self {
            next_value_id: 0,
            parameter: None,
            instructions: Vec::new(),
            value_types: HashMap::new(),
        };
        if let Some(ty) = parameter {
            let id = builder.emit(Operation::Parameter, Vec::new(), ty.clone());
            builder.parameter = Some((id, ty));
        }
        builder
    }

    pub fn parameter(&self) -> Option<ValueId> {
        self.parameter.as_ref().map(|(id, _)| *id)
    }

    pub fn value_type(&self, id: ValueId) -> Option<&Type> {
        self.value_types.get(&id)
    }

    pub fn constant(&mut self, tensor: HostTensor) -> ValueId {
        let output = Type::Tensor(tensor.tensor_type());
        self.emit(Operation::Constant(tensor), Vec::new(), output)
    }

    pub fn select(&mut self, source: ValueId, index: usize) -> Result<ValueId, GraphError> {
        let st = self.struct_type_of(source)?;
        let output = st.element(index).cloned().ok_or_else(|| {
            GraphError::invalid(format!(
                "select index {index} out of range for {} elements",
                st.len()
            ))
        })?;
        Ok(self.emit(Operation::Select { index }, vec![source], output))
    }

    pub fn pack(&mut self, elements: Vec<(Option<String>, ValueId)>) -> Result<ValueId, GraphError> {
        let mut types = Vec::with_capacity(elements.len());
        let mut names = Vec::with_capacity(elements.len());
        let mut operands = Vec::with_capacity(elements.len());
        for (name, id) in elements {
            types.push((name.clone(), self.type_of(id)?.clone()));
            names.push(name);
            operands.push(id);
        }
        let output = Type::Struct(StructType::new(types));
        Ok(self.emit(Operation::Pack { names }, operands, output))
    }

    /// Elementwise op over same-dtype tensors; a rank-0 operand broadcasts.
    pub fn binary(
        &mut self,
        op: ElementwiseBinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<ValueId, GraphError> {
        let lhs_ty = self.tensor_type_of(lhs)?;
        let rhs_ty = self.tensor_type_of(rhs)?;
        if lhs_ty.dtype != rhs_ty.dtype {
            return Err(GraphError::mismatch(
                "elementwise binary",
                &Type::Tensor(lhs_ty),
                &Type::Tensor(rhs_ty),
            ));
        }
        let output = if lhs_ty.shape == rhs_ty.shape || rhs_ty.shape.rank() == 0 {
            lhs_ty
        } else if lhs_ty.shape.rank() == 0 {
            rhs_ty
        } else {
            return Err(GraphError::mismatch(
                "elementwise binary",
                &Type::Tensor(lhs_ty),
                &Type::Tensor(rhs_ty),
            ));
        };
        Ok(self.emit(
            Operation::ElementwiseBinary(op),
            vec![lhs, rhs],
            Type::Tensor(output),
        ))
    }

    pub fn unary(&mut self, op: ElementwiseUnaryOp, input: ValueId) -> Result<ValueId, GraphError> {
        let ty = self.tensor_type_of(input)?;
        if ty.dtype == DType::Bool {
            return Err(GraphError::invalid(format!("{op:?} is not defined for bool")));
        }
        Ok(self.emit(Operation::ElementwiseUnary(op), vec![input], Type::Tensor(ty)))
    }

    pub fn cast(&mut self, input: ValueId, dtype: DType) -> Result<ValueId, GraphError> {
        let ty = self.tensor_type_of(input)?;
        let output = Type::Tensor(TensorType::new(dtype, ty.shape));
        Ok(self.emit(Operation::Cast { dtype }, vec![input], output))
    }

    /// Copies the body of `graph` into this builder with its parameter bound to `argument`,
    /// returning the value that holds the inlined result.
    pub fn inline(&mut self, graph: &Graph, argument: Option<ValueId>) -> Result<ValueId, GraphError> {
        match (&graph.parameter, argument) {
            (Some(expected), Some(arg)) => {
                let found = self.type_of(arg)?;
                if !expected.is_equivalent_to(found) {
                    return Err(GraphError::mismatch("inline argument", expected, found));
                }
            }
            (None, None) => {}
            (Some(expected), None) => {
                return Err(GraphError::invalid(format!(
                    "inlined graph requires an argument of type {expected}"
                )));
            }
            (None, Some(_)) => {
                return Err(GraphError::invalid("inlined graph takes no argument"));
            }
        }

        let mut remap: HashMap<ValueId, ValueId> = HashMap::with_capacity(graph.body.len());
        for inst in &graph.body {
            if let Operation::Parameter = inst.op {
                if let Some(arg) = argument {
                    remap.insert(inst.id, arg);
                }
                continue;
            }
            let operands = inst
                .operands
                .iter()
                .map(|operand| {
                    remap.get(operand).copied().ok_or_else(|| {
                        GraphError::invalid(format!("inlined value {operand} is undefined"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let id = self.emit(inst.op.clone(), operands, inst.output.clone());
            remap.insert(inst.id, id);
        }
        remap.get(&graph.result_id).copied().ok_or_else(|| {
            GraphError::invalid(format!("inlined result {} is undefined", graph.result_id))
        })
    }

    pub fn finish(self, result_id: ValueId) -> Result<Graph, GraphError> {
        let result = self.type_of(result_id)?.clone();
        let graph = Graph {
            format_version: FORMAT_VERSION.to_string(),
            parameter: self.parameter.map(|(_, ty)| ty),
            result,
            body: self.instructions,
            result_id,
        };
        graph.verify()?;
        Ok(graph)
    }

    fn emit(&mut self, op: Operation, operands: Vec<ValueId>, output: Type) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        self.value_types.insert(id, output.clone());
        self.instructions.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        id
    }

    fn type_of(&self, id: ValueId) -> Result<&Type, GraphError> {
        self.value_types
            .get(&id)
            .ok_or_else(|| GraphError::invalid(format!("value {id} is not defined")))
    }

    fn struct_type_of(&self, id: ValueId) -> Result<StructType, GraphError> {
        match self.type_of(id)? {
            Type::Struct(st) => Ok(st.clone()),
            other => Err(GraphError::invalid(format!(
                "value {id} has type {other}, expected a struct"
            ))),
        }
    }

    fn tensor_type_of(&self, id: ValueId) -> Result<TensorType, GraphError> {
        match self.type_of(id)? {
            Type::Tensor(tt) => Ok(tt.clone()),
            other => Err(GraphError::invalid(format!(
                "value {id} has type {other}, expected a tensor"
            ))),
        }
    }
}
