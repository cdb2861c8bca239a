//! Reference interpreter
//!
//! Evaluates a graph on scalar runtime values. Tensor-typed values are
//! modeled as 0-d tensors, which is enough to observe the numeric behavior
//! an upgrader is meant to preserve.

use std::collections::HashMap;

use crate::middle::ir::{Attribute, BlockId, Graph, NodeId, Type, ValueId};
use crate::utils::{Error, Result};

/// dtype codes understood by `aten::full`
const DTYPE_LONG: i64 = 4;
const DTYPE_FLOAT: i64 = 6;

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
    IntList(Vec<i64>),
}

impl RuntimeValue {
    fn as_f64(&self) -> Result<f64> {
        match self {
            RuntimeValue::Int(n) => Ok(*n as f64),
            RuntimeValue::Float(x) => Ok(*x),
            other => Err(Error::Eval(format!("expected a number, got {:?}", other))),
        }
    }

    fn as_bool(&self) -> Result<bool> {
        match self {
            RuntimeValue::Bool(b) => Ok(*b),
            other => Err(Error::Eval(format!("expected a bool, got {:?}", other))),
        }
    }
}

/// Evaluate a graph on the given arguments
pub fn evaluate(graph: &Graph, args: &[RuntimeValue]) -> Result<Vec<RuntimeValue>> {
    if args.len() != graph.inputs().len() {
        return Err(Error::Eval(format!(
            "graph takes {} argument(s), got {}",
            graph.inputs().len(),
            args.len()
        )));
    }
    let mut eval = Evaluator {
        graph,
        env: HashMap::new(),
    };
    for (param, arg) in graph.inputs().iter().zip(args) {
        eval.env.insert(*param, arg.clone());
    }
    eval.run_block(graph.top_block())
}

struct Evaluator<'g> {
    graph: &'g Graph,
    env: HashMap<ValueId, RuntimeValue>,
}

impl Evaluator<'_> {
    fn get(&self, value: ValueId) -> Result<RuntimeValue> {
        self.env
            .get(&value)
            .cloned()
            .ok_or_else(|| Error::Eval(format!("value {} used before definition", value.0)))
    }

    fn run_block(&mut self, block: BlockId) -> Result<Vec<RuntimeValue>> {
        let graph = self.graph;
        for &node in &graph.block(block).nodes {
            let results = self.eval_node(node)?;
            for (out, value) in graph.node(node).outputs.iter().zip(results) {
                self.env.insert(*out, value);
            }
        }
        graph.block(block).returns.iter().map(|v| self.get(*v)).collect()
    }

    fn eval_node(&mut self, node: NodeId) -> Result<Vec<RuntimeValue>> {
        let graph = self.graph;
        let data = graph.node(node);
        let args = data
            .inputs
            .iter()
            .map(|v| self.get(*v))
            .collect::<Result<Vec<_>>>()?;

        let single = match data.kind.as_str() {
            "prim::Constant" => self.constant(node)?,
            "prim::If" => {
                let cond = args.first().ok_or_else(|| Error::Eval("prim::If without condition".into()))?;
                let index = if cond.as_bool()? { 0 } else { 1 };
                let block = *data
                    .blocks
                    .get(index)
                    .ok_or_else(|| Error::Eval("prim::If is missing a branch".into()))?;
                return self.run_block(block);
            }
            "prim::isinstance" => {
                let wanted = match graph.attribute(node, "types") {
                    Some(Attribute::Str(s)) => s.as_str(),
                    _ => return Err(Error::Eval("prim::isinstance needs a types attribute".into())),
                };
                let is = match (arg(&args, 0)?, wanted) {
                    (RuntimeValue::Float(_), "float") => true,
                    (RuntimeValue::Int(_), "int") => true,
                    (RuntimeValue::Bool(_), "bool") => true,
                    (RuntimeValue::Str(_), "str") => true,
                    _ => false,
                };
                RuntimeValue::Bool(is)
            }
            "aten::is_floating_point" => RuntimeValue::Bool(matches!(arg(&args, 0)?, RuntimeValue::Float(_))),
            "aten::__is__" => {
                let (a, b) = binary_args(&args)?;
                RuntimeValue::Bool(*a == RuntimeValue::None && *b == RuntimeValue::None)
            }
            "aten::Float" => RuntimeValue::Float(arg(&args, 0)?.as_f64()?),
            "aten::add" => arith(&args, |a, b| a.checked_add(b), |a, b| a + b)?,
            "aten::sub" => arith(&args, |a, b| a.checked_sub(b), |a, b| a - b)?,
            "aten::mul" => arith(&args, |a, b| a.checked_mul(b), |a, b| a * b)?,
            "aten::div" | "aten::div_" => divide(self.split_out(node, &args).0)?,
            "aten::full" => match self.split_out(node, &args) {
                (operands, Some(out)) => full_into(operands, out)?,
                (operands, None) => full(operands)?,
            },
            other => return Err(Error::Eval(format!("unsupported operator {}", other))),
        };
        Ok(vec![single])
    }

    /// Separate a trailing `out` tensor from the operands
    fn split_out<'v>(&self, node: NodeId, args: &'v [RuntimeValue]) -> (&'v [RuntimeValue], Option<&'v RuntimeValue>) {
        let inputs = &self.graph.node(node).inputs;
        match (inputs.last(), args.split_last()) {
            (Some(last), Some((out, operands)))
                if inputs.len() > 2 && *self.graph.value_type(*last) == Type::Tensor =>
            {
                (operands, Some(out))
            }
            _ => (args, None),
        }
    }

    fn constant(&self, node: NodeId) -> Result<RuntimeValue> {
        let graph = self.graph;
        let ty = graph.node(node).outputs.first().map(|v| graph.value_type(*v));
        let value = match (graph.attribute(node, "value"), ty) {
            (None, _) => RuntimeValue::None,
            (Some(Attribute::Int(n)), Some(Type::Bool)) => RuntimeValue::Bool(*n != 0),
            (Some(Attribute::Int(n)), _) => RuntimeValue::Int(*n),
            (Some(Attribute::Float(x)), _) => RuntimeValue::Float(*x),
            (Some(Attribute::Str(s)), _) => RuntimeValue::Str(s.clone()),
        };
        Ok(value)
    }
}

fn arg(args: &[RuntimeValue], index: usize) -> Result<&RuntimeValue> {
    args.get(index)
        .ok_or_else(|| Error::Eval(format!("missing operand {}", index)))
}

fn binary_args(args: &[RuntimeValue]) -> Result<(&RuntimeValue, &RuntimeValue)> {
    match args {
        [a, b, ..] => Ok((a, b)),
        _ => Err(Error::Eval(format!("expected two operands, got {}", args.len()))),
    }
}

fn arith(
    args: &[RuntimeValue],
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<RuntimeValue> {
    match binary_args(args)? {
        (RuntimeValue::Int(a), RuntimeValue::Int(b)) => int_op(*a, *b)
            .map(RuntimeValue::Int)
            .ok_or_else(|| Error::Eval("integer overflow".into())),
        (a, b) => Ok(RuntimeValue::Float(float_op(a.as_f64()?, b.as_f64()?))),
    }
}

/// True division, or rounded division when a rounding mode is given
fn divide(args: &[RuntimeValue]) -> Result<RuntimeValue> {
    let (a, b) = binary_args(args)?;
    let mode = match args.get(2) {
        None | Some(RuntimeValue::None) => None,
        Some(RuntimeValue::Str(s)) => Some(s.as_str()),
        Some(other) => return Err(Error::Eval(format!("invalid rounding mode {:?}", other))),
    };
    let both_int = matches!((a, b), (RuntimeValue::Int(_), RuntimeValue::Int(_)));
    let (x, y) = (a.as_f64()?, b.as_f64()?);
    if both_int && y == 0.0 && mode.is_some() {
        return Err(Error::Eval("integer division by zero".into()));
    }
    let rounded = match mode {
        None => return Ok(RuntimeValue::Float(x / y)),
        Some("trunc") => (x / y).trunc(),
        Some("floor") => (x / y).floor(),
        Some(other) => return Err(Error::Eval(format!("unknown rounding mode {}", other))),
    };
    Ok(if both_int {
        RuntimeValue::Int(rounded as i64)
    } else {
        RuntimeValue::Float(rounded)
    })
}

/// Fill value of a filled tensor, converted to the requested dtype
fn full(args: &[RuntimeValue]) -> Result<RuntimeValue> {
    let (size, fill) = binary_args(args)?;
    if !matches!(size, RuntimeValue::IntList(_)) {
        return Err(Error::Eval(format!("aten::full size must be int[], got {:?}", size)));
    }
    match args.get(2) {
        None | Some(RuntimeValue::None) => Ok(fill.clone()),
        Some(RuntimeValue::Int(DTYPE_FLOAT)) => Ok(RuntimeValue::Float(fill.as_f64()?)),
        Some(RuntimeValue::Int(DTYPE_LONG)) => Ok(RuntimeValue::Int(fill.as_f64()?.trunc() as i64)),
        Some(other) => Err(Error::Eval(format!("unsupported dtype {:?}", other))),
    }
}

/// Fill value written into an existing tensor, taking that tensor's dtype
fn full_into(args: &[RuntimeValue], out: &RuntimeValue) -> Result<RuntimeValue> {
    let (_, fill) = binary_args(args)?;
    match out {
        RuntimeValue::Float(_) => Ok(RuntimeValue::Float(fill.as_f64()?)),
        RuntimeValue::Int(_) => Ok(RuntimeValue::Int(fill.as_f64()?.trunc() as i64)),
        other => Err(Error::Eval(format!("out must be a tensor, got {:?}", other))),
    }
}
