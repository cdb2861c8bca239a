//! IR Printer - render graphs in the textual graph format
//!
//! Output parses back with `frontend::parser::parse_ir`.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};

use crate::middle::ir::*;

/// Pretty printer for graphs
pub struct IRPrinter<'g> {
    graph: &'g Graph,
    /// Names handed out to values without a debug name
    fresh: HashMap<ValueId, String>,
    taken: HashSet<String>,
    next_fresh: usize,
}

impl<'g> IRPrinter<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            fresh: HashMap::new(),
            taken: HashSet::new(),
            next_fresh: 0,
        }
    }

    fn value_name(&mut self, value: ValueId) -> String {
        if let Some(name) = self.graph.value_name(value) {
            return name.to_string();
        }
        if let Some(name) = self.fresh.get(&value) {
            return name.clone();
        }
        let name = loop {
            let candidate = self.next_fresh.to_string();
            self.next_fresh += 1;
            if self.graph.value_named(&candidate).is_none() && !self.taken.contains(&candidate) {
                break candidate;
            }
        };
        self.taken.insert(name.clone());
        self.fresh.insert(value, name.clone());
        name
    }

    fn write_value_list<W: Write>(&mut self, out: &mut W, values: &[ValueId]) -> fmt::Result {
        write!(out, "(")?;
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "%{}", self.value_name(*value))?;
        }
        write!(out, ")")
    }

    fn write_typed_list<W: Write>(&mut self, out: &mut W, values: &[ValueId]) -> fmt::Result {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            let name = self.value_name(*value);
            write!(out, "%{} : {}", name, self.graph.value_type(*value))?;
        }
        Ok(())
    }

    /// Print the whole graph
    pub fn write_graph<W: Write>(&mut self, out: &mut W) -> fmt::Result {
        let graph = self.graph;
        write!(out, "graph")?;
        if let Some(version) = graph.op_version() {
            write!(out, "[op_version={}]", version)?;
        }
        write!(out, "(")?;
        self.write_typed_list(out, graph.inputs())?;
        writeln!(out, "):")?;

        self.write_block_body(out, graph.top_block(), 1)?;

        write!(out, "  return ")?;
        self.write_value_list(out, graph.outputs())?;
        writeln!(out)
    }

    fn write_block_body<W: Write>(&mut self, out: &mut W, block: BlockId, depth: usize) -> fmt::Result {
        let nodes = self.graph.block(block).nodes.clone();
        for node in nodes {
            self.write_node(out, node, depth)?;
        }
        Ok(())
    }

    fn write_node<W: Write>(&mut self, out: &mut W, node: NodeId, depth: usize) -> fmt::Result {
        let graph = self.graph;
        let data = graph.node(node);
        let indent = "  ".repeat(depth);

        write!(out, "{}", indent)?;
        if data.outputs.is_empty() {
            write!(out, "= ")?;
        } else {
            self.write_typed_list(out, &data.outputs)?;
            write!(out, " = ")?;
        }
        write!(out, "{}", data.kind)?;
        if !data.attributes.is_empty() {
            write!(out, "[")?;
            for (i, (key, attr)) in data.attributes.iter().enumerate() {
                if i > 0 {
                    write!(out, ", ")?;
                }
                write!(out, "{}={}", key, attr)?;
            }
            write!(out, "]")?;
        }
        self.write_value_list(out, &data.inputs)?;
        writeln!(out)?;

        for (i, block) in data.blocks.iter().enumerate() {
            write!(out, "{}  block{}(", indent, i)?;
            self.write_typed_list(out, &graph.block(*block).params)?;
            writeln!(out, "):")?;
            self.write_block_body(out, *block, depth + 2)?;
            write!(out, "{}    -> ", indent)?;
            self.write_value_list(out, &graph.block(*block).returns)?;
            writeln!(out)?;
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        IRPrinter::new(self).write_graph(f)
    }
}

/// Convenience function to print a graph
pub fn print_ir(graph: &Graph) -> String {
    graph.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_ir;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = r#"graph[op_version=3](%a : Tensor, %b : Tensor, %flag : bool):
  %mode : str = prim::Constant[value="trunc"]()
  %c : Tensor = aten::div(%a, %b, %mode)
  %d : Tensor = prim::If(%flag)
    block0():
      %e : Tensor = aten::add(%c, %a)
      -> (%e)
    block1():
      -> (%c)
  = prim::Print(%d)
  return (%d)
"#;

    #[test]
    fn test_print_roundtrip() {
        let graph = parse_ir(SOURCE).unwrap();
        assert_eq!(print_ir(&graph), SOURCE);
    }

    #[test]
    fn test_unnamed_values_avoid_taken_names() {
        let mut graph = Graph::new();
        let x = graph.add_input(Type::Int);
        graph.set_value_name(x, "0");
        let neg = graph.create_node("aten::neg", &[x], &[Type::Int]);
        graph.append_node(graph.top_block(), neg);
        let out = graph.node(neg).outputs[0];
        graph.register_output(out);

        let text = print_ir(&graph);
        assert_eq!(
            text,
            "graph(%0 : int):\n  %1 : int = aten::neg(%0)\n  return (%1)\n"
        );
        let reparsed = parse_ir(&text).unwrap();
        assert_eq!(print_ir(&reparsed), text);
    }

    #[test]
    fn test_attribute_rendering() {
        let graph = parse_ir(
            "graph():\n  %x : float = prim::Constant[value=2.0]()\n  %s : str = prim::Constant[value=\"a\\\"b\"]()\n  return (%x, %s)\n",
        )
        .unwrap();
        let text = print_ir(&graph);
        assert!(text.contains("prim::Constant[value=2.0]()"));
        assert!(text.contains(r#"prim::Constant[value="a\"b"]()"#));
    }

    #[test]
    fn test_extreme_floats_roundtrip() {
        let graph = parse_ir(
            "graph():\n  %big : float = prim::Constant[value=100000000000000000000.0]()\n  %small : float = prim::Constant[value=0.0000001]()\n  %neg : float = prim::Constant[value=-2.5e-300]()\n  return (%big, %small, %neg)\n",
        )
        .unwrap();
        let text = print_ir(&graph);
        assert_eq!(
            text,
            "graph():\n  %big : float = prim::Constant[value=1e20]()\n  %small : float = prim::Constant[value=1e-7]()\n  %neg : float = prim::Constant[value=-2.5e-300]()\n  return (%big, %small, %neg)\n"
        );

        let reparsed = parse_ir(&text).unwrap();
        assert_eq!(print_ir(&reparsed), text);
        let big = reparsed.nodes_of_kind("prim::Constant")[0];
        assert_eq!(reparsed.attribute(big, "value"), Some(&Attribute::Float(1e20)));
    }
}
