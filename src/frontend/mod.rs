//! Frontend module - Lexer and Parser for graph text and schemas

pub mod token;
pub mod lexer;
pub mod parser;
