//! Old operator replacement
//!
//! Rewrites nodes whose operators changed behavior after the graph's
//! operator version, inlining the matching upgrader graph in their place,
//! then stamps the graph with the newest version seen.

use log::{debug, info, warn};

use crate::middle::insert::insert_graph_before;
use crate::middle::ir::{DepthFirstNodeCursor, Graph, NodeId};
use crate::utils::{Error, Result};
use crate::versioning::schema::{builtin_registry, SchemaOracle, SchemaRegistry, VersionMapOracle};
use crate::versioning::upgraders::{builtin_upgraders, UpgraderCatalog};
use crate::versioning::version_map::{builtin_version_map, find_upgrader, latest_bump, OperatorVersionMap};

/// Read-only tables the pass consults
#[derive(Clone, Copy)]
pub struct UpgradeContext<'a> {
    pub version_map: &'a OperatorVersionMap,
    pub upgraders: &'a UpgraderCatalog,
    pub registry: &'a SchemaRegistry,
    /// Falls back to the version map when unset
    pub oracle: Option<&'a dyn SchemaOracle>,
}

impl UpgradeContext<'static> {
    /// The tables shipped with the runtime
    pub fn builtin() -> Self {
        Self {
            version_map: builtin_version_map(),
            upgraders: builtin_upgraders(),
            registry: builtin_registry(),
            oracle: None,
        }
    }
}

impl<'a> UpgradeContext<'a> {
    pub fn new(
        version_map: &'a OperatorVersionMap,
        upgraders: &'a UpgraderCatalog,
        registry: &'a SchemaRegistry,
    ) -> Self {
        Self {
            version_map,
            upgraders,
            registry,
            oracle: None,
        }
    }

    pub fn with_oracle(mut self, oracle: &'a dyn SchemaOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The graph had no version tag; nothing was touched
    Unversioned,
    /// Every node was visited and the tag was set to `version`
    Completed { version: u64 },
    /// An operator with history was already current; traversal stopped
    /// there and the tag was left as it was
    StoppedAtCurrentOp { op: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradedNode {
    pub op: String,
    pub upgrader: String,
}

/// Summary of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    pub outcome: UpgradeOutcome,
    pub upgraded: Vec<UpgradedNode>,
}

/// Replaces operators recorded under an older version with their upgraders
pub struct OldOpsReplacer<'a> {
    ctx: UpgradeContext<'a>,
}

impl<'a> OldOpsReplacer<'a> {
    pub fn new(ctx: UpgradeContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn run(&self, graph: &mut Graph) -> Result<UpgradeReport> {
        let mut upgraded = Vec::new();
        let current_version = match graph.op_version() {
            Some(v) => v,
            None => {
                debug!("graph has no operator version; skipping upgraders");
                return Ok(UpgradeReport {
                    outcome: UpgradeOutcome::Unversioned,
                    upgraded,
                });
            }
        };

        let fallback = VersionMapOracle::new(self.ctx.version_map);
        let oracle: &dyn SchemaOracle = match self.ctx.oracle {
            Some(oracle) => oracle,
            None => &fallback,
        };

        let mut cursor = DepthFirstNodeCursor::new(graph);
        let mut updated_version = 0;
        while let Some(node) = cursor.next(graph) {
            let op = match self.ctx.registry.maybe_schema(graph, node) {
                Some(schema) => schema.full_name(),
                None => continue,
            };
            // an entry here means this operator had a version bump
            let entries = match self.ctx.version_map.lookup(&op) {
                Some(entries) => entries,
                None => continue,
            };
            if let Some(latest) = latest_bump(entries) {
                updated_version = updated_version.max(latest);
            }

            let entry = match find_upgrader(entries, current_version) {
                Some(entry) => entry,
                None => {
                    if !oracle.is_current(&op, current_version) {
                        return Err(Error::MissingUpgrader { op });
                    }
                    warn!(
                        "{} is already current at version {}; stopping upgrade traversal",
                        op, current_version
                    );
                    return Ok(UpgradeReport {
                        outcome: UpgradeOutcome::StoppedAtCurrentOp { op },
                        upgraded,
                    });
                }
            };

            let upgrader = &entry.upgrader_name;
            let upgrader_graph = match self.ctx.upgraders.parse(upgrader) {
                Some(parsed) => parsed?,
                None => {
                    return Err(Error::MissingUpgraderGraph {
                        upgrader: upgrader.clone(),
                    })
                }
            };
            replace_node(graph, node, &op, upgrader, &upgrader_graph)?;
            debug!("replaced {} using upgrader {}", op, upgrader);
            upgraded.push(UpgradedNode {
                op,
                upgrader: upgrader.clone(),
            });
        }

        graph.set_op_version(updated_version);
        info!(
            "upgraded {} node(s); operator version {} -> {}",
            upgraded.len(),
            current_version,
            updated_version
        );
        Ok(UpgradeReport {
            outcome: UpgradeOutcome::Completed {
                version: updated_version,
            },
            upgraded,
        })
    }
}

/// Inline `upgrader_graph` in place of `node`.
///
/// The upgrader's outputs are checked before anything is spliced, so a
/// mismatch leaves the graph untouched.
fn replace_node(
    graph: &mut Graph,
    node: NodeId,
    op: &str,
    upgrader: &str,
    upgrader_graph: &Graph,
) -> Result<()> {
    let old_outputs = graph.node(node).outputs.clone();
    let new_outputs = upgrader_graph.outputs();
    if new_outputs.len() != old_outputs.len() {
        return Err(Error::OutputArityMismatch {
            op: op.to_string(),
            upgrader: upgrader.to_string(),
            expected: old_outputs.len(),
            got: new_outputs.len(),
        });
    }
    for (index, (old, new)) in old_outputs.iter().zip(new_outputs).enumerate() {
        let expected = graph.value_type(*old);
        let got = upgrader_graph.value_type(*new);
        if expected != got {
            return Err(Error::OutputTypeMismatch {
                op: op.to_string(),
                upgrader: upgrader.to_string(),
                index,
                expected: expected.to_string(),
                got: got.to_string(),
            });
        }
    }

    let inputs = graph.node(node).inputs.clone();
    let new_outputs = insert_graph_before(graph, upgrader_graph, &inputs, node)?;
    for (old, new) in old_outputs.into_iter().zip(new_outputs) {
        graph.replace_all_uses_with(old, new);
    }
    graph.remove_all_inputs(node);
    graph.destroy(node)
}

/// Upgrade a graph in place using the runtime's built-in tables
pub fn apply_old_ops_upgraders(graph: &mut Graph) -> Result<()> {
    OldOpsReplacer::new(UpgradeContext::builtin()).run(graph).map(|_| ())
}
