//! Upgrader catalog
//!
//! Upgrader bodies are stored as graph text and parsed on demand; every
//! lookup yields a fresh graph owned by the caller.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::frontend::parser::parse_ir;
use crate::middle::ir::Graph;
use crate::utils::{Error, Result};
use crate::versioning::version_map::OperatorVersionMap;

const DIV_TENSOR_0_3: &str = r#"
graph(%self.1 : Tensor, %other.1 : Tensor):
  %32 : str = prim::Constant[value="trunc"]()
  %6 : bool = aten::is_floating_point(%self.1)
  %11 : bool = prim::If(%6)
    block0():
      -> (%6)
    block1():
      %9 : bool = aten::is_floating_point(%other.1)
      -> (%9)
  %35 : Tensor = prim::If(%11)
    block0():
      %36 : Tensor = aten::div(%self.1, %other.1)
      -> (%36)
    block1():
      %37 : Tensor = aten::div(%self.1, %other.1, %32)
      -> (%37)
  return (%35)
"#;

const DIV_SCALAR_0_3: &str = r#"
graph(%self.1 : Tensor, %other.1 : Scalar):
  %41 : str = prim::Constant[value="trunc"]()
  %6 : bool = aten::is_floating_point(%self.1)
  %11 : bool = prim::If(%6)
    block0():
      -> (%6)
    block1():
      %9 : bool = prim::isinstance[types="float"](%other.1)
      -> (%9)
  %44 : Tensor = prim::If(%11)
    block0():
      %45 : Tensor = aten::div(%self.1, %other.1)
      -> (%45)
    block1():
      %46 : Tensor = aten::div(%self.1, %other.1, %41)
      -> (%46)
  return (%44)
"#;

const DIV__TENSOR_0_3: &str = r#"
graph(%self.1 : Tensor, %other.1 : Tensor):
  %40 : str = prim::Constant[value="trunc"]()
  %7 : bool = aten::is_floating_point(%self.1)
  %12 : bool = prim::If(%7)
    block0():
      -> (%7)
    block1():
      %10 : bool = aten::is_floating_point(%other.1)
      -> (%10)
  %43 : Tensor = prim::If(%12)
    block0():
      %44 : Tensor = aten::div_(%self.1, %other.1)
      -> (%44)
    block1():
      %45 : Tensor = aten::div_(%self.1, %other.1, %40)
      -> (%45)
  return (%43)
"#;

const DIV__SCALAR_0_3: &str = r#"
graph(%self.1 : Tensor, %other.1 : Scalar):
  %40 : str = prim::Constant[value="trunc"]()
  %7 : bool = aten::is_floating_point(%self.1)
  %12 : bool = prim::If(%7)
    block0():
      -> (%7)
    block1():
      %10 : bool = prim::isinstance[types="float"](%other.1)
      -> (%10)
  %43 : Tensor = prim::If(%12)
    block0():
      %44 : Tensor = aten::div_(%self.1, %other.1)
      -> (%44)
    block1():
      %45 : Tensor = aten::div_(%self.1, %other.1, %40)
      -> (%45)
  return (%43)
"#;

const DIV_OUT_0_3: &str = r#"
graph(%self.1 : Tensor, %other.1 : Tensor, %out.1 : Tensor):
  %41 : str = prim::Constant[value="trunc"]()
  %7 : bool = aten::is_floating_point(%self.1)
  %12 : bool = prim::If(%7)
    block0():
      -> (%7)
    block1():
      %10 : bool = aten::is_floating_point(%other.1)
      -> (%10)
  %44 : Tensor = prim::If(%12)
    block0():
      %45 : Tensor = aten::div(%self.1, %other.1, %out.1)
      -> (%45)
    block1():
      %46 : Tensor = aten::div(%self.1, %other.1, %41, %out.1)
      -> (%46)
  return (%44)
"#;

const FULL_0_4: &str = r#"
graph(%size.1 : int[], %fill_value.1 : Scalar, %dtype.1 : int?, %layout.1 : int?, %device.1 : Device?, %pin_memory.1 : bool?):
  %none : None = prim::Constant()
  %is_none : bool = aten::__is__(%dtype.1, %none)
  %fill : Scalar = prim::If(%is_none)
    block0():
      %as_float : float = aten::Float(%fill_value.1)
      -> (%as_float)
    block1():
      -> (%fill_value.1)
  %result : Tensor = aten::full(%size.1, %fill, %dtype.1, %layout.1, %device.1, %pin_memory.1)
  return (%result)
"#;

// the out tensor fixes the dtype, so the old call is kept as is
const FULL_OUT_0_4: &str = r#"
graph(%size.1 : int[], %fill_value.1 : Scalar, %out.1 : Tensor):
  %result : Tensor = aten::full(%size.1, %fill_value.1, %out.1)
  return (%result)
"#;

/// Upgrader name to graph text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgraderCatalog {
    bodies: BTreeMap<String, String>,
}

impl UpgraderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an upgrader body, returning the previous one
    pub fn insert(&mut self, name: &str, body: &str) -> Option<String> {
        self.bodies.insert(name.to_string(), body.to_string())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.bodies.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.bodies.get(name).map(String::as_str)
    }

    /// Parse an upgrader body into a fresh graph.
    ///
    /// `None` when the catalog has no such upgrader.
    pub fn parse(&self, name: &str) -> Option<Result<Graph>> {
        let body = self.lookup(name)?;
        Some(parse_ir(body).map_err(|e| Error::InvalidUpgraderGraph {
            upgrader: name.to_string(),
            message: e.to_string(),
        }))
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bodies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Every upgrader named by `map` must exist here and parse
    pub fn check_against(&self, map: &OperatorVersionMap) -> Result<()> {
        for (_, entries) in map.iter() {
            for entry in entries {
                match self.parse(&entry.upgrader_name) {
                    None => {
                        return Err(Error::MissingUpgraderGraph {
                            upgrader: entry.upgrader_name.clone(),
                        })
                    }
                    Some(parsed) => {
                        parsed?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

static BUILTIN_UPGRADERS: Lazy<UpgraderCatalog> = Lazy::new(|| {
    let mut catalog = UpgraderCatalog::new();
    catalog.insert("div_Tensor_0_3", DIV_TENSOR_0_3);
    catalog.insert("div_Scalar_0_3", DIV_SCALAR_0_3);
    catalog.insert("div__Tensor_0_3", DIV__TENSOR_0_3);
    catalog.insert("div__Scalar_0_3", DIV__SCALAR_0_3);
    catalog.insert("div_out_0_3", DIV_OUT_0_3);
    catalog.insert("full_0_4", FULL_0_4);
    catalog.insert("full_out_0_4", FULL_OUT_0_4);
    catalog
});

/// The upgrader catalog shipped with the runtime; built once, never mutated
pub fn builtin_upgraders() -> &'static UpgraderCatalog {
    &BUILTIN_UPGRADERS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::Type;
    use crate::versioning::version_map::{builtin_version_map, UpgraderEntry};

    #[test]
    fn test_builtin_catalog_matches_version_map() {
        let catalog = builtin_upgraders();
        assert_eq!(catalog.len(), 7);
        catalog.check_against(builtin_version_map()).unwrap();
    }

    #[test]
    fn test_parse_yields_fresh_graphs() {
        let catalog = builtin_upgraders();
        let first = catalog.parse("full_0_4").unwrap().unwrap();
        let second = catalog.parse("full_0_4").unwrap().unwrap();
        assert_eq!(first.node_count(), second.node_count());
        assert_eq!(first.inputs().len(), 6);
        assert_eq!(first.value_type(first.outputs()[0]), &Type::Tensor);
        assert!(catalog.parse("nope_0_1").is_none());
    }

    #[test]
    fn test_populate_and_remove() {
        let mut catalog = builtin_upgraders().clone();
        let before = catalog.len();
        catalog.insert("a", "b");
        catalog.insert("c", "d");
        assert_eq!(catalog.len() - before, 2);
        assert_eq!(catalog.lookup("a"), Some("b"));

        catalog.remove("a");
        catalog.remove("c");
        assert_eq!(catalog.len(), before);
        assert_eq!(&catalog, builtin_upgraders());
    }

    #[test]
    fn test_broken_body_is_consistency_violation() {
        let mut catalog = UpgraderCatalog::new();
        catalog.insert("foo_0_1", "graph(%x : Tensor):\n  return (%y)");
        let err = catalog.parse("foo_0_1").unwrap().unwrap_err();
        assert!(err.is_consistency_violation());

        let mut map = OperatorVersionMap::new();
        map.push("aten::bar", UpgraderEntry::new(2, "bar_0_1", ""));
        assert_eq!(
            catalog.check_against(&map),
            Err(Error::MissingUpgraderGraph { upgrader: "bar_0_1".into() })
        );
    }
}
