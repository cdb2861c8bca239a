//! Lexer for graph text
//!
//! Converts graph dumps and operator signatures into a stream of tokens.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Error, Result, Span};

/// The lexer state
pub struct Lexer {
    /// Source code as chars
    source: Vec<char>,
    /// Current position in source
    pos: usize,
    /// Start position of current token
    start: usize,
    line: usize,
    col: usize,
    start_line: usize,
    start_col: usize,
}

impl Lexer {
    /// Create a new lexer for the given source text
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            start: 0,
            line: 1,
            col: 1,
            start_line: 1,
            start_col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn make_span(&self) -> Span {
        Span::new(self.start, self.pos, self.start_line, self.start_col)
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.make_span())
    }

    fn text(&self) -> String {
        self.source[self.start..self.pos].iter().collect()
    }

    /// Skip whitespace and `#` line comments
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn is_ident_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    /// Read an identifier, keyword or block label
    fn read_identifier(&mut self) -> Token {
        while matches!(self.peek(), Some(c) if Self::is_ident_char(c)) {
            self.advance();
        }
        let text = self.text();
        let kind = TokenKind::keyword_from_str(&text).unwrap_or(TokenKind::Ident(text));
        self.make_token(kind)
    }

    /// Read `%name`; names may contain dots (`%self.1`)
    fn read_value_ref(&mut self) -> Result<Token> {
        self.advance(); // %
        while matches!(self.peek(), Some(c) if Self::is_ident_char(c) || c == '.') {
            self.advance();
        }
        let name: String = self.source[self.start + 1..self.pos].iter().collect();
        if name.is_empty() {
            return Err(Error::InvalidCharacter { ch: '%', span: self.make_span() });
        }
        Ok(self.make_token(TokenKind::ValueRef(name)))
    }

    /// Read an integer or float literal, with optional leading minus
    fn read_number(&mut self) -> Result<Token> {
        if self.peek() == Some('-') {
            self.advance();
        }
        let mut is_float = false;
        let mut seen_exponent = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' && !is_float && matches!(self.peek_next(), Some(d) if d.is_ascii_digit()) {
                is_float = true;
                self.advance();
            } else if (c == 'e' || c == 'E') && !seen_exponent && self.exponent_follows() {
                // `1e20` is a float even without a fraction
                is_float = true;
                seen_exponent = true;
                self.advance();
                if matches!(self.peek(), Some('-') | Some('+')) {
                    self.advance();
                }
            } else {
                break;
            }
        }
        let text = self.text();
        let kind = if is_float {
            text.parse::<f64>().ok().map(TokenKind::FloatLit)
        } else {
            text.parse::<i64>().ok().map(TokenKind::IntLit)
        };
        match kind {
            Some(kind) => Ok(self.make_token(kind)),
            None => Err(Error::InvalidNumber { text, span: self.make_span() }),
        }
    }

    /// Whether the `e` at the cursor starts an exponent (`e7`, `e-7`, `e+7`)
    fn exponent_follows(&self) -> bool {
        let digit_at = |offset: usize| matches!(self.source.get(self.pos + offset), Some(d) if d.is_ascii_digit());
        match self.peek_next() {
            Some('-') | Some('+') => digit_at(2),
            _ => digit_at(1),
        }
    }

    fn read_string(&mut self) -> Result<Token> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.advance() {
                Some('"') => break,
                Some('\\') => {
                    let escaped = match self.advance() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some(other) => other,
                        None => return Err(Error::UnterminatedString { span: self.make_span() }),
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
                None => return Err(Error::UnterminatedString { span: self.make_span() }),
            }
        }
        Ok(self.make_token(TokenKind::StringLit(value)))
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        self.start = self.pos;
        self.start_line = self.line;
        self.start_col = self.col;

        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(Token::eof(self.make_span())),
        };

        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(self.read_identifier());
        }
        if c.is_ascii_digit() {
            return self.read_number();
        }
        match c {
            '%' => self.read_value_ref(),
            '"' => self.read_string(),
            '-' if self.peek_next() == Some('>') => {
                self.advance();
                self.advance();
                Ok(self.make_token(TokenKind::Arrow))
            }
            '-' if matches!(self.peek_next(), Some(d) if d.is_ascii_digit()) => self.read_number(),
            ':' if self.peek_next() == Some(':') => {
                self.advance();
                self.advance();
                Ok(self.make_token(TokenKind::ColonColon))
            }
            _ => {
                self.advance();
                let kind = match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ',' => TokenKind::Comma,
                    ':' => TokenKind::Colon,
                    '.' => TokenKind::Dot,
                    '=' => TokenKind::Eq,
                    '?' => TokenKind::Question,
                    '*' => TokenKind::Star,
                    _ => return Err(Error::InvalidCharacter { ch: c, span: self.make_span() }),
                };
                Ok(self.make_token(kind))
            }
        }
    }

    /// Tokenize the entire source; the last token is always `Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_node_statement() {
        let tokens = kinds("%6 : bool = aten::is_floating_point(%self.1)");
        assert_eq!(
            tokens,
            vec![
                TokenKind::ValueRef("6".into()),
                TokenKind::Colon,
                TokenKind::Ident("bool".into()),
                TokenKind::Eq,
                TokenKind::Ident("aten".into()),
                TokenKind::ColonColon,
                TokenKind::Ident("is_floating_point".into()),
                TokenKind::LParen,
                TokenKind::ValueRef("self.1".into()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_labels() {
        let tokens = kinds("graph block0 block12 blocky return -> ?");
        assert_eq!(tokens[0], TokenKind::Graph);
        assert_eq!(tokens[1], TokenKind::BlockLabel(0));
        assert_eq!(tokens[2], TokenKind::BlockLabel(12));
        assert_eq!(tokens[3], TokenKind::Ident("blocky".into()));
        assert_eq!(tokens[4], TokenKind::Return);
        assert_eq!(tokens[5], TokenKind::Arrow);
        assert_eq!(tokens[6], TokenKind::Question);
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("42 -7 3.5 1.0e-3");
        assert_eq!(tokens[0], TokenKind::IntLit(42));
        assert_eq!(tokens[1], TokenKind::IntLit(-7));
        assert_eq!(tokens[2], TokenKind::FloatLit(3.5));
        assert!(matches!(tokens[3], TokenKind::FloatLit(f) if (f - 0.001).abs() < 1e-12));
    }

    #[test]
    fn test_exponent_without_fraction() {
        let tokens = kinds("1e20 1e-7 -2E+3 3e");
        assert_eq!(tokens[0], TokenKind::FloatLit(1e20));
        assert_eq!(tokens[1], TokenKind::FloatLit(1e-7));
        assert_eq!(tokens[2], TokenKind::FloatLit(-2000.0));
        // a bare trailing `e` is not an exponent
        assert_eq!(tokens[3], TokenKind::IntLit(3));
        assert_eq!(tokens[4], TokenKind::Ident("e".into()));
    }

    #[test]
    fn test_strings_and_comments() {
        let tokens = kinds("# header comment\n\"tr\\\"unc\" # trailing");
        assert_eq!(tokens, vec![TokenKind::StringLit("tr\"unc".into()), TokenKind::Eof]);
    }

    #[test]
    fn test_spans_track_lines() {
        let tokens = Lexer::new("graph(\n  %x : int)").tokenize().unwrap();
        assert_eq!((tokens[2].span.line, tokens[2].span.col), (2, 3));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Lexer::new("\"open").tokenize(),
            Err(Error::UnterminatedString { .. })
        ));
        assert!(matches!(
            Lexer::new("a $ b").tokenize(),
            Err(Error::InvalidCharacter { ch: '$', .. })
        ));
        assert!(matches!(
            Lexer::new("99999999999999999999").tokenize(),
            Err(Error::InvalidNumber { .. })
        ));
    }
}
