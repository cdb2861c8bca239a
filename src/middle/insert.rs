//! Subgraph inlining
//!
//! Clones a callee graph into a host graph at an insertion point, binding
//! the callee's parameters to host values.

use std::collections::HashMap;

use crate::middle::ir::{BlockId, Graph, NodeId, ValueId};
use crate::utils::{Error, Result, Span};

/// Inline `callee` immediately before `before`, with `inputs` bound to the
/// callee's parameters. Returns the host values standing for the callee's
/// outputs.
///
/// Nothing is inserted when the input count does not match.
pub fn insert_graph_before(
    host: &mut Graph,
    callee: &Graph,
    inputs: &[ValueId],
    before: NodeId,
) -> Result<Vec<ValueId>> {
    if callee.inputs().len() != inputs.len() {
        return Err(Error::InputArityMismatch {
            expected: callee.inputs().len(),
            got: inputs.len(),
        });
    }
    if !host.is_alive(before) {
        return Err(Error::NodeDestroyed(before.0));
    }

    let mut inliner = Inliner {
        callee,
        value_map: callee.inputs().iter().copied().zip(inputs.iter().copied()).collect(),
    };
    for &node in &callee.block(callee.top_block()).nodes {
        let cloned = inliner.clone_node(host, node)?;
        host.insert_before(cloned, before)?;
    }
    callee
        .outputs()
        .iter()
        .map(|v| inliner.mapped(*v))
        .collect()
}

struct Inliner<'c> {
    callee: &'c Graph,
    value_map: HashMap<ValueId, ValueId>,
}

impl Inliner<'_> {
    fn mapped(&self, value: ValueId) -> Result<ValueId> {
        self.value_map.get(&value).copied().ok_or_else(|| Error::UndefinedValue {
            name: self
                .callee
                .value_name(value)
                .map_or_else(|| value.0.to_string(), str::to_string),
            span: Span::dummy(),
        })
    }

    fn bind(&mut self, host: &mut Graph, from: ValueId, to: ValueId) {
        if let Some(name) = self.callee.value_name(from) {
            host.set_value_name(to, name);
        }
        self.value_map.insert(from, to);
    }

    /// Clone a callee node (and its nested blocks) as a detached host node
    fn clone_node(&mut self, host: &mut Graph, node: NodeId) -> Result<NodeId> {
        let data = self.callee.node(node);
        let inputs = data
            .inputs
            .iter()
            .map(|v| self.mapped(*v))
            .collect::<Result<Vec<_>>>()?;
        let types: Vec<_> = data.outputs.iter().map(|v| self.callee.value_type(*v).clone()).collect();

        let cloned = host.create_node(&data.kind, &inputs, &types);
        for (key, attr) in &data.attributes {
            host.set_attribute(cloned, key, attr.clone());
        }
        for &block in &data.blocks {
            let nested = host.add_node_block(cloned);
            self.clone_block(host, block, nested)?;
        }

        let new_outputs = host.node(cloned).outputs.clone();
        for (from, to) in data.outputs.iter().zip(new_outputs) {
            self.bind(host, *from, to);
        }
        Ok(cloned)
    }

    fn clone_block(&mut self, host: &mut Graph, from: BlockId, to: BlockId) -> Result<()> {
        let block = self.callee.block(from);
        for &param in &block.params {
            let ty = self.callee.value_type(param).clone();
            let new_param = host.add_block_param(to, ty);
            self.bind(host, param, new_param);
        }
        for &node in &block.nodes {
            let cloned = self.clone_node(host, node)?;
            host.append_node(to, cloned);
        }
        for &ret in &block.returns {
            let value = self.mapped(ret)?;
            host.add_block_return(to, value);
        }
        Ok(())
    }
}
