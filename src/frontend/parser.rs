//! Parser for graph text and operator signatures
//!
//! Recursive descent over the token stream. Value names are SSA: each
//! `%name` is defined once and is only visible inside the block that defines
//! it (and blocks nested in it).

use std::collections::HashMap;

use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::middle::ir::{Attribute, BlockId, Graph, Type, ValueId};
use crate::utils::{Error, Result, Span};
use crate::versioning::schema::{Argument, OperatorSchema};

/// Parse graph text into a new graph
pub fn parse_ir(source: &str) -> Result<Graph> {
    let mut parser = Parser::new(source)?;
    parser.parse_graph()
}

/// Parse an operator signature such as
/// `aten::div.Tensor(Tensor self, Tensor other) -> Tensor`
pub fn parse_schema(source: &str) -> Result<OperatorSchema> {
    let mut parser = Parser::new(source)?;
    parser.parse_schema()
}

/// The parser
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Innermost scope last
    scopes: Vec<HashMap<String, ValueId>>,
}

impl Parser {
    /// Create a new parser over source text
    pub fn new(source: &str) -> Result<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self::from_tokens(tokens))
    }

    /// Create a parser from pre-tokenized input.
    ///
    /// An `Eof` token is appended when the stream does not end with one.
    pub fn from_tokens(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
            let span = tokens.last().map_or_else(Span::dummy, |t| t.span);
            tokens.push(Token::new(TokenKind::Eof, span));
        }
        Self {
            tokens,
            pos: 0,
            scopes: Vec::new(),
        }
    }

    // ==================== Helper Methods ====================

    fn current(&self) -> &Token {
        // from_tokens guarantees a trailing Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.current_kind()) == std::mem::discriminant(kind)
    }

    fn unexpected<T>(&self, expected: &str) -> Result<T> {
        Err(Error::UnexpectedToken {
            expected: expected.to_string(),
            got: self.current_kind().to_string(),
            span: self.current().span,
        })
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            self.unexpected(&expected.to_string())
        }
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_ident(&mut self) -> Result<(String, Span)> {
        match self.current_kind().clone() {
            TokenKind::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => self.unexpected("identifier"),
        }
    }

    fn parse_value_name(&mut self) -> Result<(String, Span)> {
        match self.current_kind().clone() {
            TokenKind::ValueRef(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => self.unexpected("value (%name)"),
        }
    }

    /// `ns::name`
    fn parse_qualified(&mut self) -> Result<String> {
        let (ns, _) = self.parse_ident()?;
        self.expect(TokenKind::ColonColon)?;
        let (name, _) = self.parse_ident()?;
        Ok(format!("{}::{}", ns, name))
    }

    /// Base type with `[]` and `?` suffixes
    fn parse_type(&mut self) -> Result<Type> {
        let (name, span) = self.parse_ident()?;
        let mut ty = Type::from_name(&name).ok_or(Error::UnknownType { name, span })?;
        loop {
            if self.check(&TokenKind::LBracket) {
                self.advance();
                self.expect(TokenKind::RBracket)?;
                ty = Type::list(ty);
            } else if self.consume(&TokenKind::Question) {
                ty = Type::optional(ty);
            } else {
                return Ok(ty);
            }
        }
    }

    // ==================== Scopes ====================

    fn lookup(&self, name: &str, span: Span) -> Result<ValueId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .ok_or_else(|| Error::UndefinedValue { name: name.to_string(), span })
    }

    fn define(&mut self, graph: &mut Graph, name: &str, span: Span, value: ValueId) -> Result<()> {
        if graph.value_named(name).is_some() {
            return Err(Error::DuplicateValue { name: name.to_string(), span });
        }
        graph.set_value_name(value, name);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// `(%a, %b, ...)`
    fn parse_value_list(&mut self) -> Result<Vec<ValueId>> {
        self.expect(TokenKind::LParen)?;
        let mut values = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (name, span) = self.parse_value_name()?;
                values.push(self.lookup(&name, span)?);
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(values)
    }

    /// `(%a : T, ...)` declaring parameters of `block`
    fn parse_params(&mut self, graph: &mut Graph, block: BlockId) -> Result<()> {
        self.expect(TokenKind::LParen)?;
        if !self.check(&TokenKind::RParen) {
            loop {
                let (name, span) = self.parse_value_name()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;
                let value = graph.add_block_param(block, ty);
                self.define(graph, &name, span, value)?;
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(())
    }

    // ==================== Graph Parsing ====================

    /// Parse a complete graph
    pub fn parse_graph(&mut self) -> Result<Graph> {
        let mut graph = Graph::new();
        self.expect(TokenKind::Graph)?;

        if self.consume(&TokenKind::LBracket) {
            let (key, span) = self.parse_ident()?;
            if key != "op_version" {
                return Err(Error::UnexpectedToken {
                    expected: "op_version".to_string(),
                    got: key,
                    span,
                });
            }
            self.expect(TokenKind::Eq)?;
            match self.current_kind().clone() {
                TokenKind::IntLit(v) if v >= 0 => {
                    self.advance();
                    graph.set_op_version(v as u64);
                }
                _ => return self.unexpected("non-negative integer"),
            }
            self.expect(TokenKind::RBracket)?;
        }

        self.scopes.push(HashMap::new());
        let top = graph.top_block();
        self.parse_params(&mut graph, top)?;
        self.expect(TokenKind::Colon)?;

        while !self.check(&TokenKind::Return) {
            self.parse_statement(&mut graph, top)?;
        }
        self.expect(TokenKind::Return)?;
        for value in self.parse_value_list()? {
            graph.register_output(value);
        }
        self.scopes.pop();
        self.expect(TokenKind::Eof)?;
        Ok(graph)
    }

    /// `%out : T, ... = ns::kind[attrs](%in, ...)` followed by nested blocks
    fn parse_statement(&mut self, graph: &mut Graph, block: BlockId) -> Result<()> {
        let mut outputs = Vec::new();
        if !self.consume(&TokenKind::Eq) {
            loop {
                let (name, span) = self.parse_value_name()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;
                outputs.push((name, span, ty));
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Eq)?;
        }

        let kind = self.parse_qualified()?;
        let attributes = if self.check(&TokenKind::LBracket) {
            self.parse_attributes()?
        } else {
            Vec::new()
        };
        let inputs = self.parse_value_list()?;

        let types: Vec<Type> = outputs.iter().map(|(_, _, ty)| ty.clone()).collect();
        let node = graph.create_node(&kind, &inputs, &types);
        for (key, attr) in attributes {
            graph.set_attribute(node, &key, attr);
        }
        graph.append_node(block, node);

        while let TokenKind::BlockLabel(_) = self.current_kind() {
            self.advance();
            let nested = graph.add_node_block(node);
            self.parse_nested_block(graph, nested)?;
        }

        // Outputs become visible after the node's own blocks
        let values = graph.node(node).outputs.clone();
        for ((name, span, _), value) in outputs.iter().zip(values) {
            self.define(graph, name, *span, value)?;
        }
        Ok(())
    }

    fn parse_nested_block(&mut self, graph: &mut Graph, block: BlockId) -> Result<()> {
        self.scopes.push(HashMap::new());
        self.parse_params(graph, block)?;
        self.expect(TokenKind::Colon)?;
        while !self.check(&TokenKind::Arrow) {
            if self.check(&TokenKind::Eof) || self.check(&TokenKind::Return) {
                return self.unexpected("'->' closing block");
            }
            self.parse_statement(graph, block)?;
        }
        self.expect(TokenKind::Arrow)?;
        for value in self.parse_value_list()? {
            graph.add_block_return(block, value);
        }
        self.scopes.pop();
        Ok(())
    }

    /// `[key=value, ...]`
    fn parse_attributes(&mut self) -> Result<Vec<(String, Attribute)>> {
        self.expect(TokenKind::LBracket)?;
        let mut attrs = Vec::new();
        loop {
            let (key, _) = self.parse_ident()?;
            self.expect(TokenKind::Eq)?;
            let attr = match self.current_kind().clone() {
                TokenKind::IntLit(n) => Attribute::Int(n),
                TokenKind::FloatLit(x) => Attribute::Float(x),
                TokenKind::StringLit(s) => Attribute::Str(s),
                _ => return self.unexpected("attribute value"),
            };
            self.advance();
            attrs.push((key, attr));
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(attrs)
    }

    // ==================== Schema Parsing ====================

    /// Parse an operator signature
    pub fn parse_schema(&mut self) -> Result<OperatorSchema> {
        let name = self.parse_qualified()?;
        let overload = if self.consume(&TokenKind::Dot) {
            self.parse_ident()?.0
        } else {
            String::new()
        };

        self.expect(TokenKind::LParen)?;
        let mut arguments = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                // keyword-only marker
                if !self.consume(&TokenKind::Star) {
                    let ty = self.parse_type()?;
                    let (arg_name, _) = self.parse_ident()?;
                    arguments.push(Argument { name: arg_name, ty });
                }
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        self.expect(TokenKind::Arrow)?;
        let mut returns = Vec::new();
        if self.consume(&TokenKind::LParen) {
            if !self.check(&TokenKind::RParen) {
                loop {
                    returns.push(self.parse_type()?);
                    if !self.consume(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        } else {
            returns.push(self.parse_type()?);
        }
        self.expect(TokenKind::Eof)?;

        Ok(OperatorSchema {
            name,
            overload,
            arguments,
            returns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIV_UPGRADER: &str = r#"
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

    #[test]
    fn test_parse_nested_graph() {
        let graph = parse_ir(DIV_UPGRADER).unwrap();
        assert_eq!(graph.op_version(), None);
        assert_eq!(graph.inputs().len(), 2);
        assert_eq!(graph.outputs().len(), 1);
        assert_eq!(graph.node_count(), 7);
        assert_eq!(graph.nodes_of_kind("prim::If").len(), 2);
        assert_eq!(graph.nodes_of_kind("aten::div").len(), 2);

        let constant = graph.nodes_of_kind("prim::Constant")[0];
        assert_eq!(graph.attribute(constant, "value"), Some(&Attribute::Str("trunc".into())));
        let output = graph.outputs()[0];
        assert_eq!(graph.value_name(output), Some("35"));
        assert_eq!(graph.value_type(output), &Type::Tensor);
    }

    #[test]
    fn test_parse_version_header() {
        let graph = parse_ir("graph[op_version=3](%x : int):\n  return (%x)").unwrap();
        assert_eq!(graph.op_version(), Some(3));
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_parse_multiple_outputs_and_no_outputs() {
        let src = r#"
graph(%x : int[]):
  %a : int, %b : float? = prim::Unpack(%x)
  = prim::Print(%a, %b)
  return ()
"#;
        let graph = parse_ir(src).unwrap();
        let unpack = graph.nodes_of_kind("prim::Unpack")[0];
        assert_eq!(graph.node(unpack).outputs.len(), 2);
        assert_eq!(graph.value_type(graph.node(unpack).outputs[1]), &Type::optional(Type::Float));
        let print = graph.nodes_of_kind("prim::Print")[0];
        assert!(graph.node(print).outputs.is_empty());
        assert_eq!(graph.value_type(graph.inputs()[0]), &Type::list(Type::Int));
    }

    #[test]
    fn test_undefined_value() {
        let err = parse_ir("graph(%x : int):\n  %y : int = aten::neg(%z)\n  return (%y)").unwrap_err();
        match err {
            Error::UndefinedValue { name, span } => {
                assert_eq!(name, "z");
                assert_eq!(span.line, 2);
            }
            other => panic!("Expected UndefinedValue, got {:?}", other),
        }
    }

    #[test]
    fn test_block_values_are_scoped() {
        let src = r#"
graph(%c : bool):
  %r : int = prim::If(%c)
    block0():
      %one : int = prim::Constant[value=1]()
      -> (%one)
    block1():
      -> (%one)
  return (%r)
"#;
        assert!(matches!(parse_ir(src), Err(Error::UndefinedValue { .. })));
    }

    #[test]
    fn test_duplicate_and_unknown_type() {
        assert!(matches!(
            parse_ir("graph(%x : int, %x : int):\n  return (%x)"),
            Err(Error::DuplicateValue { .. })
        ));
        assert!(matches!(
            parse_ir("graph(%x : Banana):\n  return (%x)"),
            Err(Error::UnknownType { .. })
        ));
    }

    #[test]
    fn test_missing_block_terminator() {
        let src = "graph(%c : bool):\n  %r : int = prim::If(%c)\n    block0():\n  return (%c)";
        assert!(matches!(parse_ir(src), Err(Error::UnexpectedToken { .. })));
    }

    #[test]
    fn test_empty_token_stream() {
        let mut parser = Parser::from_tokens(Vec::new());
        assert!(matches!(parser.parse_graph(), Err(Error::UnexpectedToken { .. })));
        let mut parser = Parser::from_tokens(Vec::new());
        assert!(matches!(parser.parse_schema(), Err(Error::UnexpectedToken { .. })));
    }

    #[test]
    fn test_parse_schema() {
        let schema = parse_schema("aten::div.Tensor_mode(Tensor self, Tensor other, *, str? rounding_mode) -> Tensor").unwrap();
        assert_eq!(schema.name, "aten::div");
        assert_eq!(schema.overload, "Tensor_mode");
        assert_eq!(schema.arguments.len(), 3);
        assert_eq!(schema.arguments[2].ty, Type::optional(Type::Str));
        assert_eq!(schema.returns, vec![Type::Tensor]);

        let schema = parse_schema("prim::Pair(int a, int b) -> (int, int)").unwrap();
        assert_eq!(schema.overload, "");
        assert_eq!(schema.returns.len(), 2);
    }
}
