//! Operator schemas and schema resolution
//!
//! A node has a schema when its kind and input types match one of the
//! registered overloads. Control-flow and constant nodes (`prim::*`) are
//! never registered, so they never resolve.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use crate::frontend::parser::parse_schema;
use crate::middle::ir::{Graph, NodeId, Type};
use crate::utils::{Error, Result};
use crate::versioning::version_map::{is_op_symbol_current, OperatorVersionMap};

/// A formal argument of an operator
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub ty: Type,
}

/// A resolved operator overload
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSchema {
    /// Qualified symbol, e.g. `aten::div`
    pub name: String,
    /// Overload name, empty for the default overload
    pub overload: String,
    pub arguments: Vec<Argument>,
    pub returns: Vec<Type>,
}

impl OperatorSchema {
    pub fn parse(signature: &str) -> Result<Self> {
        parse_schema(signature).map_err(|e| Error::InvalidSchema(format!("{}: {}", signature, e)))
    }

    /// `name.overload`, or just `name` for the default overload
    pub fn full_name(&self) -> String {
        if self.overload.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.overload)
        }
    }

    /// Whether a node of this kind with these input types resolves here
    pub fn matches(&self, kind: &str, input_types: &[&Type]) -> bool {
        self.name == kind
            && self.arguments.len() == input_types.len()
            && self
                .arguments
                .iter()
                .zip(input_types)
                .all(|(arg, actual)| arg.ty.accepts(actual))
    }
}

impl fmt::Display for OperatorSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.full_name())?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", arg.ty, arg.name)?;
        }
        write!(f, ") -> ")?;
        if self.returns.len() == 1 {
            write!(f, "{}", self.returns[0])
        } else {
            write!(f, "(")?;
            for (i, ty) in self.returns.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", ty)?;
            }
            write!(f, ")")
        }
    }
}

/// Registered operator overloads, grouped by symbol
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Vec<OperatorSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from signature strings
    pub fn from_signatures(signatures: &[&str]) -> Result<Self> {
        let mut registry = Self::new();
        for sig in signatures {
            registry.register(OperatorSchema::parse(sig)?);
        }
        Ok(registry)
    }

    /// Register an overload; earlier registrations win ties
    pub fn register(&mut self, schema: OperatorSchema) {
        self.schemas.entry(schema.name.clone()).or_default().push(schema);
    }

    pub fn len(&self) -> usize {
        self.schemas.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Resolve the schema of a node, if any
    pub fn maybe_schema(&self, graph: &Graph, node: NodeId) -> Option<&OperatorSchema> {
        let data = graph.node(node);
        let candidates = self.schemas.get(&data.kind)?;
        let input_types: Vec<&Type> = data.inputs.iter().map(|v| graph.value_type(*v)).collect();
        candidates.iter().find(|s| s.matches(&data.kind, &input_types))
    }
}

const BUILTIN_SIGNATURES: &[&str] = &[
    "aten::div.Tensor(Tensor self, Tensor other) -> Tensor",
    "aten::div.Scalar(Tensor self, Scalar other) -> Tensor",
    "aten::div.Tensor_mode(Tensor self, Tensor other, *, str? rounding_mode) -> Tensor",
    "aten::div.Scalar_mode(Tensor self, Scalar other, *, str? rounding_mode) -> Tensor",
    "aten::div_.Tensor(Tensor self, Tensor other) -> Tensor",
    "aten::div_.Scalar(Tensor self, Scalar other) -> Tensor",
    "aten::div_.Tensor_mode(Tensor self, Tensor other, *, str? rounding_mode) -> Tensor",
    "aten::div_.Scalar_mode(Tensor self, Scalar other, *, str? rounding_mode) -> Tensor",
    "aten::div.out(Tensor self, Tensor other, *, Tensor out) -> Tensor",
    "aten::div.out_mode(Tensor self, Tensor other, *, str? rounding_mode, Tensor out) -> Tensor",
    "aten::full(int[] size, Scalar fill_value, *, int? dtype, int? layout, Device? device, bool? pin_memory) -> Tensor",
    "aten::full.out(int[] size, Scalar fill_value, *, Tensor out) -> Tensor",
    "aten::add.Tensor(Tensor self, Tensor other) -> Tensor",
    "aten::mul.Tensor(Tensor self, Tensor other) -> Tensor",
    "aten::is_floating_point(Tensor self) -> bool",
    "aten::Float.Scalar(Scalar a) -> float",
    "aten::__is__(int? self, None obj) -> bool",
];

static BUILTIN_REGISTRY: Lazy<SchemaRegistry> = Lazy::new(|| {
    SchemaRegistry::from_signatures(BUILTIN_SIGNATURES).expect("builtin signatures must parse")
});

/// The registry of operators shipped with the runtime
pub fn builtin_registry() -> &'static SchemaRegistry {
    &BUILTIN_REGISTRY
}

/// Answers whether an operator's behavior is already current at a version
pub trait SchemaOracle {
    fn is_current(&self, op: &str, version: u64) -> bool;
}

/// Oracle backed by an operator version map
#[derive(Debug, Clone, Copy)]
pub struct VersionMapOracle<'a> {
    map: &'a OperatorVersionMap,
}

impl<'a> VersionMapOracle<'a> {
    pub fn new(map: &'a OperatorVersionMap) -> Self {
        Self { map }
    }
}

impl SchemaOracle for VersionMapOracle<'_> {
    fn is_current(&self, op: &str, version: u64) -> bool {
        is_op_symbol_current(self.map, op, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_ir;
    use crate::versioning::version_map::UpgraderEntry;

    #[test]
    fn test_full_name() {
        let schema = OperatorSchema::parse("aten::div.Tensor(Tensor self, Tensor other) -> Tensor").unwrap();
        assert_eq!(schema.full_name(), "aten::div.Tensor");
        let schema = OperatorSchema::parse("aten::full(int[] size, Scalar fill_value) -> Tensor").unwrap();
        assert_eq!(schema.full_name(), "aten::full");
        assert_eq!(schema.to_string(), "aten::full(int[] size, Scalar fill_value) -> Tensor");
    }

    #[test]
    fn test_invalid_signature() {
        assert!(matches!(
            OperatorSchema::parse("aten::div(Tensor self"),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_overload_resolution() {
        let graph = parse_ir(
            r#"
graph(%a : Tensor, %b : Tensor, %s : int):
  %mode : str = prim::Constant[value="floor"]()
  %t : Tensor = aten::div(%a, %b)
  %u : Tensor = aten::div(%a, %s)
  %v : Tensor = aten::div(%a, %b, %mode)
  %w : Tensor = aten::sub(%a, %b)
  %x : Tensor = aten::div(%a, %b, %v)
  %y : Tensor = aten::div(%a, %b, %mode, %v)
  return (%t, %u, %v, %w, %x, %y)
"#,
        )
        .unwrap();
        let registry = builtin_registry();
        let names: Vec<Option<String>> = graph
            .nodes_depth_first()
            .into_iter()
            .map(|n| registry.maybe_schema(&graph, n).map(OperatorSchema::full_name))
            .collect();
        assert_eq!(
            names,
            vec![
                None,
                Some("aten::div.Tensor".to_string()),
                Some("aten::div.Scalar".to_string()),
                Some("aten::div.Tensor_mode".to_string()),
                None,
                Some("aten::div.out".to_string()),
                Some("aten::div.out_mode".to_string()),
            ]
        );
    }

    #[test]
    fn test_full_overloads() {
        let graph = parse_ir(
            r#"
graph(%size : int[], %fill : Scalar, %dtype : int?, %out : Tensor):
  %none : None = prim::Constant()
  %a : Tensor = aten::full(%size, %fill, %dtype, %none, %none, %none)
  %b : Tensor = aten::full(%size, %fill, %out)
  %c : Tensor = aten::full(%size, %fill, %dtype)
  return (%a, %b, %c)
"#,
        )
        .unwrap();
        let registry = builtin_registry();
        let names: Vec<Option<String>> = graph
            .nodes_of_kind("aten::full")
            .into_iter()
            .map(|n| registry.maybe_schema(&graph, n).map(OperatorSchema::full_name))
            .collect();
        assert_eq!(
            names,
            vec![Some("aten::full".to_string()), Some("aten::full.out".to_string()), None]
        );
    }

    #[test]
    fn test_version_map_oracle() {
        let mut map = OperatorVersionMap::new();
        map.push(
            "aten::foo",
            UpgraderEntry::new(4, "foo_0_3", "aten::foo(Tensor self) -> Tensor"),
        );
        let oracle = VersionMapOracle::new(&map);
        assert!(!oracle.is_current("aten::foo", 3));
        assert!(oracle.is_current("aten::foo", 4));
        assert!(oracle.is_current("aten::bar", 0));
    }

    #[test]
    fn test_builtin_registry_loaded() {
        assert_eq!(builtin_registry().len(), BUILTIN_SIGNATURES.len());
    }
}
