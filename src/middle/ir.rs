//! Graph IR definitions
//!
//! Arena-allocated dataflow graph with explicit use lists. Nodes live in
//! ordered blocks; control-flow nodes such as `prim::If` own nested blocks.
//! Ids stay valid after destruction, so a destroyed node can still be asked
//! whether it is alive.

use std::collections::HashMap;
use std::fmt;

use crate::utils::{Error, Result};

/// Node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Value identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

/// Block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Value type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor,
    Int,
    Float,
    Bool,
    Str,
    /// Any number (int or float)
    Scalar,
    NoneType,
    Device,
    List(Box<Type>),
    Optional(Box<Type>),
}

impl Type {
    /// Resolve a base type name as written in graph text
    pub fn from_name(name: &str) -> Option<Type> {
        let ty = match name {
            "Tensor" => Type::Tensor,
            "int" => Type::Int,
            "float" => Type::Float,
            "bool" => Type::Bool,
            "str" => Type::Str,
            "Scalar" | "number" => Type::Scalar,
            "None" | "NoneType" => Type::NoneType,
            "Device" => Type::Device,
            _ => return None,
        };
        Some(ty)
    }

    pub fn optional(inner: Type) -> Type {
        Type::Optional(Box::new(inner))
    }

    pub fn list(inner: Type) -> Type {
        Type::List(Box::new(inner))
    }

    /// Whether a value of type `actual` may be passed where `self` is declared
    pub fn accepts(&self, actual: &Type) -> bool {
        if self == actual {
            return true;
        }
        match self {
            Type::Scalar => matches!(actual, Type::Int | Type::Float),
            Type::Optional(inner) => *actual == Type::NoneType || inner.accepts(actual),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor => write!(f, "Tensor"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::Str => write!(f, "str"),
            Type::Scalar => write!(f, "Scalar"),
            Type::NoneType => write!(f, "None"),
            Type::Device => write!(f, "Device"),
            Type::List(inner) => write!(f, "{}[]", inner),
            Type::Optional(inner) => write!(f, "{}?", inner),
        }
    }
}

/// Node attribute (constant payload)
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Int(n) => write!(f, "{}", n),
            Attribute::Float(x) => write!(f, "{:?}", x),
            Attribute::Str(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        _ => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

/// Where a value is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    NodeOutput { node: NodeId, index: usize },
    BlockParam { block: BlockId, index: usize },
}

/// One entry in a value's use list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Use {
    NodeInput { node: NodeId, index: usize },
    BlockReturn { block: BlockId, index: usize },
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
    pub uses: Vec<Use>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeData {
    /// Qualified operator symbol, e.g. `aten::div`
    pub kind: String,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    pub blocks: Vec<BlockId>,
    pub attributes: Vec<(String, Attribute)>,
    /// None until the node is inserted into a block
    pub owning_block: Option<BlockId>,
    pub alive: bool,
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub params: Vec<ValueId>,
    pub returns: Vec<ValueId>,
    pub nodes: Vec<NodeId>,
    pub owning_node: Option<NodeId>,
}

impl BlockData {
    fn new(owning_node: Option<NodeId>) -> Self {
        Self {
            params: Vec::new(),
            returns: Vec::new(),
            nodes: Vec::new(),
            owning_node,
        }
    }
}

/// A graph carrying an optional operator-set version tag
#[derive(Debug, Clone)]
pub struct Graph {
    op_version: Option<u64>,
    nodes: Vec<NodeData>,
    values: Vec<ValueData>,
    blocks: Vec<BlockData>,
    top: BlockId,
    names: HashMap<String, ValueId>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            op_version: None,
            nodes: Vec::new(),
            values: Vec::new(),
            blocks: vec![BlockData::new(None)],
            top: BlockId(0),
            names: HashMap::new(),
        }
    }

    // ==================== Version Tag ====================

    pub fn op_version(&self) -> Option<u64> {
        self.op_version
    }

    pub fn set_op_version(&mut self, version: u64) {
        self.op_version = Some(version);
    }

    // ==================== Accessors ====================

    pub fn top_block(&self) -> BlockId {
        self.top
    }

    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0]
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0]
    }

    /// Graph inputs (parameters of the top block)
    pub fn inputs(&self) -> &[ValueId] {
        &self.blocks[self.top.0].params
    }

    /// Graph outputs (returns of the top block)
    pub fn outputs(&self) -> &[ValueId] {
        &self.blocks[self.top.0].returns
    }

    pub fn value_type(&self, id: ValueId) -> &Type {
        &self.values[id.0].ty
    }

    pub fn value_name(&self, id: ValueId) -> Option<&str> {
        self.values[id.0].name.as_deref()
    }

    pub fn value_named(&self, name: &str) -> Option<ValueId> {
        self.names.get(name).copied()
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes[id.0].alive
    }

    pub fn attribute(&self, node: NodeId, key: &str) -> Option<&Attribute> {
        self.nodes[node.0]
            .attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, a)| a)
    }

    // ==================== Construction ====================

    /// Give a value a debug name; taken names get a `.N` suffix.
    /// Returns the name actually assigned.
    pub fn set_value_name(&mut self, id: ValueId, name: &str) -> String {
        if let Some(old) = self.values[id.0].name.take() {
            self.names.remove(&old);
        }
        let unique = if self.names.contains_key(name) {
            let base = strip_numeric_suffix(name);
            let mut n = 1;
            loop {
                let candidate = format!("{}.{}", base, n);
                if !self.names.contains_key(&candidate) {
                    break candidate;
                }
                n += 1;
            }
        } else {
            name.to_string()
        };
        self.names.insert(unique.clone(), id);
        self.values[id.0].name = Some(unique.clone());
        unique
    }

    fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(ValueData {
            ty,
            def,
            uses: Vec::new(),
            name: None,
        });
        id
    }

    /// Add a parameter to a block
    pub fn add_block_param(&mut self, block: BlockId, ty: Type) -> ValueId {
        let index = self.blocks[block.0].params.len();
        let value = self.new_value(ty, ValueDef::BlockParam { block, index });
        self.blocks[block.0].params.push(value);
        value
    }

    /// Add a graph input
    pub fn add_input(&mut self, ty: Type) -> ValueId {
        self.add_block_param(self.top, ty)
    }

    /// Append a value to a block's returns
    pub fn add_block_return(&mut self, block: BlockId, value: ValueId) {
        let index = self.blocks[block.0].returns.len();
        self.blocks[block.0].returns.push(value);
        self.values[value.0].uses.push(Use::BlockReturn { block, index });
    }

    /// Register a graph output
    pub fn register_output(&mut self, value: ValueId) {
        self.add_block_return(self.top, value);
    }

    /// Create a detached node; insert it with `append_node` or `insert_before`
    pub fn create_node(&mut self, kind: &str, inputs: &[ValueId], output_types: &[Type]) -> NodeId {
        let id = NodeId(self.nodes.len());
        for (index, input) in inputs.iter().enumerate() {
            self.values[input.0].uses.push(Use::NodeInput { node: id, index });
        }
        self.nodes.push(NodeData {
            kind: kind.to_string(),
            inputs: inputs.to_vec(),
            outputs: Vec::with_capacity(output_types.len()),
            blocks: Vec::new(),
            attributes: Vec::new(),
            owning_block: None,
            alive: true,
        });
        for (index, ty) in output_types.iter().enumerate() {
            let value = self.new_value(ty.clone(), ValueDef::NodeOutput { node: id, index });
            self.nodes[id.0].outputs.push(value);
        }
        id
    }

    pub fn set_attribute(&mut self, node: NodeId, key: &str, attr: Attribute) {
        let attrs = &mut self.nodes[node.0].attributes;
        match attrs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = attr,
            None => attrs.push((key.to_string(), attr)),
        }
    }

    /// Add a nested block to a node
    pub fn add_node_block(&mut self, node: NodeId) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BlockData::new(Some(node)));
        self.nodes[node.0].blocks.push(id);
        id
    }

    /// Append a detached node at the end of a block
    pub fn append_node(&mut self, block: BlockId, node: NodeId) {
        debug_assert!(self.nodes[node.0].owning_block.is_none());
        self.blocks[block.0].nodes.push(node);
        self.nodes[node.0].owning_block = Some(block);
    }

    /// Insert a detached node immediately before `anchor` in program order
    pub fn insert_before(&mut self, node: NodeId, anchor: NodeId) -> Result<()> {
        if !self.nodes[anchor.0].alive {
            return Err(Error::NodeDestroyed(anchor.0));
        }
        let block = match self.nodes[anchor.0].owning_block {
            Some(b) => b,
            None => return Err(Error::NodeDestroyed(anchor.0)),
        };
        let pos = self.position_in_block(block, anchor);
        self.blocks[block.0].nodes.insert(pos, node);
        self.nodes[node.0].owning_block = Some(block);
        Ok(())
    }

    fn position_in_block(&self, block: BlockId, node: NodeId) -> usize {
        self.blocks[block.0]
            .nodes
            .iter()
            .position(|n| *n == node)
            .unwrap_or(self.blocks[block.0].nodes.len())
    }

    // ==================== Mutation ====================

    /// Redirect every use of `old` to `new`
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.values[old.0].uses);
        for u in &uses {
            match *u {
                Use::NodeInput { node, index } => self.nodes[node.0].inputs[index] = new,
                Use::BlockReturn { block, index } => self.blocks[block.0].returns[index] = new,
            }
        }
        self.values[new.0].uses.extend(uses);
    }

    /// Drop all of a node's input edges
    pub fn remove_all_inputs(&mut self, node: NodeId) {
        let inputs = std::mem::take(&mut self.nodes[node.0].inputs);
        for (index, input) in inputs.into_iter().enumerate() {
            let slot = Use::NodeInput { node, index };
            self.values[input.0].uses.retain(|u| *u != slot);
        }
    }

    /// Remove a node (and everything nested in it) from the graph.
    ///
    /// Fails if any of the node's outputs is still used.
    pub fn destroy(&mut self, node: NodeId) -> Result<()> {
        if !self.nodes[node.0].alive {
            return Err(Error::NodeDestroyed(node.0));
        }
        for (index, out) in self.nodes[node.0].outputs.iter().enumerate() {
            let uses = self.values[out.0].uses.len();
            if uses > 0 {
                return Err(Error::ValueStillInUse {
                    kind: self.nodes[node.0].kind.clone(),
                    index,
                    uses,
                });
            }
        }
        let blocks = self.nodes[node.0].blocks.clone();
        for block in blocks.into_iter().rev() {
            self.clear_block(block)?;
        }
        self.remove_all_inputs(node);
        if let Some(block) = self.nodes[node.0].owning_block.take() {
            self.blocks[block.0].nodes.retain(|n| *n != node);
        }
        self.nodes[node.0].alive = false;
        Ok(())
    }

    fn clear_block(&mut self, block: BlockId) -> Result<()> {
        let returns = std::mem::take(&mut self.blocks[block.0].returns);
        for (index, value) in returns.into_iter().enumerate() {
            let slot = Use::BlockReturn { block, index };
            self.values[value.0].uses.retain(|u| *u != slot);
        }
        let nodes = self.blocks[block.0].nodes.clone();
        for node in nodes.into_iter().rev() {
            self.destroy(node)?;
        }
        Ok(())
    }

    // ==================== Traversal ====================

    /// Live nodes in depth-first pre-order (a node, then its nested blocks)
    pub fn nodes_depth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        self.collect_block(self.top, &mut order);
        order
    }

    fn collect_block(&self, block: BlockId, order: &mut Vec<NodeId>) {
        for &node in &self.blocks[block.0].nodes {
            order.push(node);
            for &nested in &self.nodes[node.0].blocks {
                self.collect_block(nested, order);
            }
        }
    }

    /// Number of live nodes, nested blocks included
    pub fn node_count(&self) -> usize {
        self.nodes_depth_first().len()
    }

    pub fn nodes_of_kind(&self, kind: &str) -> Vec<NodeId> {
        self.nodes_depth_first()
            .into_iter()
            .filter(|n| self.nodes[n.0].kind == kind)
            .collect()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_numeric_suffix(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, suffix))
            if !base.is_empty() && !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    }
}

/// Depth-first cursor that survives destruction of already-visited nodes.
///
/// The visiting order is fixed when the cursor is created: nodes inserted
/// afterwards are never produced, and nodes destroyed afterwards are skipped.
#[derive(Debug, Clone)]
pub struct DepthFirstNodeCursor {
    order: Vec<NodeId>,
    pos: usize,
}

impl DepthFirstNodeCursor {
    pub fn new(graph: &Graph) -> Self {
        Self {
            order: graph.nodes_depth_first(),
            pos: 0,
        }
    }

    /// Advance past the next live node and return it
    pub fn next(&mut self, graph: &Graph) -> Option<NodeId> {
        while let Some(&node) = self.order.get(self.pos) {
            self.pos += 1;
            if graph.is_alive(node) {
                return Some(node);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// %a, %b -> add(%a, %b) -> mul(%sum, %b) -> return
    fn make_graph() -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new();
        let a = g.add_input(Type::Tensor);
        let b = g.add_input(Type::Tensor);
        let add = g.create_node("aten::add", &[a, b], &[Type::Tensor]);
        g.append_node(g.top_block(), add);
        let sum = g.node(add).outputs[0];
        let mul = g.create_node("aten::mul", &[sum, b], &[Type::Tensor]);
        g.append_node(g.top_block(), mul);
        let prod = g.node(mul).outputs[0];
        g.register_output(prod);
        (g, add, mul)
    }

    #[test]
    fn test_use_lists() {
        let (g, add, mul) = make_graph();
        let b = g.inputs()[1];
        assert_eq!(g.value(b).uses.len(), 2);
        let sum = g.node(add).outputs[0];
        assert_eq!(g.value(sum).uses, vec![Use::NodeInput { node: mul, index: 0 }]);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn test_replace_all_uses_with() {
        let (mut g, add, mul) = make_graph();
        let a = g.inputs()[0];
        let sum = g.node(add).outputs[0];
        g.replace_all_uses_with(sum, a);
        assert_eq!(g.node(mul).inputs[0], a);
        assert!(g.value(sum).uses.is_empty());
        assert_eq!(g.value(a).uses.len(), 2);
    }

    #[test]
    fn test_destroy_requires_no_uses() {
        let (mut g, add, _) = make_graph();
        let err = g.destroy(add).unwrap_err();
        assert!(matches!(err, Error::ValueStillInUse { index: 0, uses: 1, .. }));
        assert!(g.is_alive(add));
    }

    #[test]
    fn test_destroy_detaches_inputs() {
        let (mut g, add, mul) = make_graph();
        let a = g.inputs()[0];
        let b = g.inputs()[1];
        let sum = g.node(add).outputs[0];
        g.replace_all_uses_with(sum, a);
        g.remove_all_inputs(add);
        g.destroy(add).unwrap();
        assert!(!g.is_alive(add));
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.value(b).uses, vec![Use::NodeInput { node: mul, index: 1 }]);
        assert_eq!(g.destroy(add), Err(Error::NodeDestroyed(add.0)));
    }

    #[test]
    fn test_destroy_nested_blocks() {
        let mut g = Graph::new();
        let cond = g.add_input(Type::Bool);
        let x = g.add_input(Type::Int);
        let if_node = g.create_node("prim::If", &[cond], &[Type::Int]);
        g.append_node(g.top_block(), if_node);
        let then_block = g.add_node_block(if_node);
        let neg = g.create_node("aten::neg", &[x], &[Type::Int]);
        g.append_node(then_block, neg);
        let negated = g.node(neg).outputs[0];
        g.add_block_return(then_block, negated);
        let else_block = g.add_node_block(if_node);
        g.add_block_return(else_block, x);
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.value(x).uses.len(), 2);

        g.destroy(if_node).unwrap();
        assert_eq!(g.node_count(), 0);
        assert!(!g.is_alive(neg));
        assert!(g.value(x).uses.is_empty());
        assert!(g.value(cond).uses.is_empty());
    }

    #[test]
    fn test_insert_before() {
        let (mut g, add, mul) = make_graph();
        let a = g.inputs()[0];
        let neg = g.create_node("aten::neg", &[a], &[Type::Tensor]);
        g.insert_before(neg, mul).unwrap();
        assert_eq!(g.nodes_depth_first(), vec![add, neg, mul]);
    }

    #[test]
    fn test_cursor_skips_destroyed_and_new_nodes() {
        let (mut g, add, mul) = make_graph();
        let mut cursor = DepthFirstNodeCursor::new(&g);
        assert_eq!(cursor.next(&g), Some(add));

        let a = g.inputs()[0];
        let neg = g.create_node("aten::neg", &[a], &[Type::Tensor]);
        g.append_node(g.top_block(), neg);
        let prod = g.node(mul).outputs[0];
        let replacement = g.node(neg).outputs[0];
        g.replace_all_uses_with(prod, replacement);
        g.destroy(mul).unwrap();

        assert_eq!(cursor.next(&g), None);
    }

    #[test]
    fn test_value_names_are_uniquified() {
        let mut g = Graph::new();
        let a = g.add_input(Type::Int);
        let b = g.add_input(Type::Int);
        let c = g.add_input(Type::Int);
        assert_eq!(g.set_value_name(a, "x"), "x");
        assert_eq!(g.set_value_name(b, "x"), "x.1");
        assert_eq!(g.set_value_name(c, "x.1"), "x.2");
        assert_eq!(g.value_named("x.1"), Some(b));
    }

    #[test]
    fn test_type_acceptance() {
        assert!(Type::Scalar.accepts(&Type::Int));
        assert!(Type::Scalar.accepts(&Type::Float));
        assert!(!Type::Scalar.accepts(&Type::Tensor));
        assert!(Type::optional(Type::Int).accepts(&Type::NoneType));
        assert!(Type::optional(Type::Int).accepts(&Type::Int));
        assert!(!Type::Tensor.accepts(&Type::Scalar));
        assert_eq!(Type::list(Type::Int).to_string(), "int[]");
        assert_eq!(Type::optional(Type::Str).to_string(), "str?");
    }
}
