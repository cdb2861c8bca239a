//! Middle-end module - graph IR, inlining and rewrite passes

pub mod eval;
pub mod insert;
pub mod ir;
pub mod ir_printer;
pub mod upgrade;
