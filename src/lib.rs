//! Operator-set upgrader
//!
//! Graphs record the operator version they were produced under. When an
//! operator's behavior changes, the old behavior is kept alive as an
//! upgrader graph; loading an old graph replaces each affected node with
//! its upgrader so the graph computes what it always did.

pub mod frontend;
pub mod middle;
pub mod utils;
pub mod versioning;

pub use frontend::parser::{parse_ir, parse_schema};
pub use middle::ir::Graph;
pub use middle::ir_printer::print_ir;
pub use middle::upgrade::{
    apply_old_ops_upgraders, OldOpsReplacer, UpgradeContext, UpgradeOutcome, UpgradeReport,
};
pub use utils::{Error, Result};
