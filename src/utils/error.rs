//! Error handling for the operator-set upgrader

use crate::utils::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Upgrader error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ==================== Parser Errors ====================

    #[error("Unexpected token at {span}: expected {expected}, got {got}")]
    UnexpectedToken {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("Invalid character {ch:?} at {span}")]
    InvalidCharacter { ch: char, span: Span },

    #[error("Unterminated string literal at {span}")]
    UnterminatedString { span: Span },

    #[error("Invalid number literal {text} at {span}")]
    InvalidNumber { text: String, span: Span },

    #[error("Undefined value: %{name} at {span}")]
    UndefinedValue { name: String, span: Span },

    #[error("Duplicate definition: %{name} at {span}")]
    DuplicateValue { name: String, span: Span },

    #[error("Unknown type: {name} at {span}")]
    UnknownType { name: String, span: Span },

    // ==================== Graph Errors ====================

    #[error("Cannot destroy {kind}: output {index} still has {uses} use(s)")]
    ValueStillInUse { kind: String, index: usize, uses: usize },

    #[error("Node {0} has already been destroyed")]
    NodeDestroyed(usize),

    #[error("Input count mismatch inlining graph: expected {expected}, got {got}")]
    InputArityMismatch { expected: usize, got: usize },

    // ==================== Table Errors ====================

    #[error("Version entries for {op} are not strictly increasing ({previous} then {next})")]
    UnorderedVersionEntries { op: String, previous: u64, next: u64 },

    #[error("Upgrader {upgrader} covers versions up to {max}, but {op} was bumped at {bumped}")]
    UpgraderRangeMismatch {
        op: String,
        upgrader: String,
        max: u64,
        bumped: u64,
    },

    #[error("Invalid schema signature: {0}")]
    InvalidSchema(String),

    // ==================== Consistency Violations ====================

    #[error("Upgrader must be present for {op}")]
    MissingUpgrader { op: String },

    #[error("Corresponding upgrader graph for {upgrader} must exist")]
    MissingUpgraderGraph { upgrader: String },

    #[error("Upgrader graph {upgrader} failed to parse: {message}")]
    InvalidUpgraderGraph { upgrader: String, message: String },

    #[error("Upgrader {upgrader} produces {got} output(s), but {op} has {expected}")]
    OutputArityMismatch {
        op: String,
        upgrader: String,
        expected: usize,
        got: usize,
    },

    #[error("Upgrader {upgrader} output {index} has type {got}, but {op} produces {expected}")]
    OutputTypeMismatch {
        op: String,
        upgrader: String,
        index: usize,
        expected: String,
        got: String,
    },

    // ==================== Misc ====================

    #[error("Evaluation error: {0}")]
    Eval(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::UnexpectedToken { span, .. } => Some(*span),
            Self::InvalidCharacter { span, .. } => Some(*span),
            Self::UnterminatedString { span } => Some(*span),
            Self::InvalidNumber { span, .. } => Some(*span),
            Self::UndefinedValue { span, .. } => Some(*span),
            Self::DuplicateValue { span, .. } => Some(*span),
            Self::UnknownType { span, .. } => Some(*span),
            _ => None,
        }
    }

    /// Whether this error means the static tables and the runtime disagree.
    ///
    /// These are never recovered from inside the upgrade pass.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingUpgrader { .. }
                | Self::MissingUpgraderGraph { .. }
                | Self::InvalidUpgraderGraph { .. }
                | Self::OutputArityMismatch { .. }
                | Self::OutputTypeMismatch { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}
