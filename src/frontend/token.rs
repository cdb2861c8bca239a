//! Token definitions for graph text and schema signatures

use std::fmt;

use crate::utils::Span;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn eof(span: Span) -> Self {
        Self { kind: TokenKind::Eof, span }
    }
}

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ============ Keywords ============
    /// graph
    Graph,
    /// return
    Return,
    /// blockN (nested block label)
    BlockLabel(usize),

    // ============ Literals ============
    /// %name
    ValueRef(String),
    Ident(String),
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),

    // ============ Punctuation ============
    /// (
    LParen,
    /// )
    RParen,
    /// [
    LBracket,
    /// ]
    RBracket,
    /// ,
    Comma,
    /// :
    Colon,
    /// ::
    ColonColon,
    /// .
    Dot,
    /// =
    Eq,
    /// ->
    Arrow,
    /// ?
    Question,
    /// *
    Star,

    /// End of input
    Eof,
}

impl TokenKind {
    /// Keywords (and block labels) from identifier text
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        match s {
            "graph" => Some(TokenKind::Graph),
            "return" => Some(TokenKind::Return),
            _ => {
                let digits = s.strip_prefix("block")?;
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok().map(TokenKind::BlockLabel)
            }
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Graph => write!(f, "'graph'"),
            TokenKind::Return => write!(f, "'return'"),
            TokenKind::BlockLabel(n) => write!(f, "'block{}'", n),
            TokenKind::ValueRef(name) => write!(f, "%{}", name),
            TokenKind::Ident(name) => write!(f, "identifier '{}'", name),
            TokenKind::IntLit(n) => write!(f, "integer {}", n),
            TokenKind::FloatLit(x) => write!(f, "float {}", x),
            TokenKind::StringLit(s) => write!(f, "string {:?}", s),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::ColonColon => write!(f, "'::'"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::Arrow => write!(f, "'->'"),
            TokenKind::Question => write!(f, "'?'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}
