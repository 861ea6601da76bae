//! Recursive-descent parser producing an error-tolerant syntax tree.
//!
//! Malformed input never aborts the parse: each failed declaration emits
//! exactly one diagnostic for the skipped span, synchronizes at the next
//! statement boundary, and leaves an explicit `Decl::Error` placeholder so
//! downstream stages still run over the rest of the tree.

use super::lexer::{self, Token, TokenKind};
use super::types::{codes, Diagnostic, Span};

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone)]
pub enum Expr {
    StringLit { value: String, span: Span },
    IntLit { value: i64, span: Span },
    BoolLit { value: bool, span: Span },
    NullLit { span: Span },
    Array { items: Vec<Expr>, span: Span },
    /// Object literal; property order is source order.
    Object { properties: Vec<(String, Expr)>, span: Span },
    Identifier { name: String, span: Span },
    /// Dotted member access, e.g. `dns.properties.nameServers`.
    Member { base: Box<Expr>, path: Vec<String>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::StringLit { span, .. }
            | Expr::IntLit { span, .. }
            | Expr::BoolLit { span, .. }
            | Expr::NullLit { span }
            | Expr::Array { span, .. }
            | Expr::Object { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Member { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Decl {
    TargetScope {
        value: Expr,
        span: Span,
    },
    Param {
        name: String,
        type_name: String,
        default: Option<Expr>,
        span: Span,
    },
    Var {
        name: String,
        value: Expr,
        span: Span,
    },
    Resource {
        symbolic_name: String,
        type_literal: String,
        type_span: Span,
        body: Expr,
        span: Span,
    },
    Output {
        name: String,
        type_name: String,
        value: Expr,
        span: Span,
    },
    Module {
        symbolic_name: String,
        path: String,
        body: Expr,
        span: Span,
    },
    Import {
        namespace: String,
        span: Span,
    },
    /// Placeholder for a declaration that failed to parse.
    Error {
        span: Span,
    },
}

impl Decl {
    /// Symbolic name introduced by the declaration, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Decl::Param { name, .. } | Decl::Var { name, .. } | Decl::Output { name, .. } => {
                Some(name)
            }
            Decl::Resource { symbolic_name, .. } | Decl::Module { symbolic_name, .. } => {
                Some(symbolic_name)
            }
            Decl::Import { namespace, .. } => Some(namespace),
            Decl::TargetScope { .. } | Decl::Error { .. } => None,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::TargetScope { span, .. }
            | Decl::Param { span, .. }
            | Decl::Var { span, .. }
            | Decl::Resource { span, .. }
            | Decl::Output { span, .. }
            | Decl::Module { span, .. }
            | Decl::Import { span, .. }
            | Decl::Error { span } => *span,
        }
    }
}

/// Parsed document. Immutable once produced; owned by the compilation that
/// created it.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    pub decls: Vec<Decl>,
    /// False when any declaration failed to parse. Scope resolution treats a
    /// document that was never understood differently from one that simply
    /// omits `targetScope`.
    pub well_formed: bool,
}

/// Parse source text. Always returns a tree; syntax problems surface as
/// diagnostics plus `Decl::Error` nodes.
pub fn parse(source: &str) -> (SyntaxTree, Vec<Diagnostic>) {
    let tokens = lexer::lex(source);
    let mut parser = Parser {
        tokens,
        pos: 0,
        diagnostics: Vec::new(),
    };
    let tree = parser.parse_program();
    (tree, parser.diagnostics)
}

// ============================================================================
// Parser
// ============================================================================

type ParseResult<T> = Result<T, (String, Span)>;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            let found = self.peek();
            Err((
                format!("expected {}, found '{}'", what, describe(found)),
                found.span,
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(TokenKind::Newline) {}
    }

    fn parse_program(&mut self) -> SyntaxTree {
        let mut decls = Vec::new();
        self.skip_newlines();
        while !self.at(TokenKind::Eof) {
            let start = self.peek().span;
            match self.parse_decl() {
                Ok(decl) => decls.push(decl),
                Err((message, span)) => {
                    // One diagnostic per recovery, covering the skipped span
                    let end = self.synchronize();
                    self.diagnostics.push(Diagnostic::error(
                        codes::UNEXPECTED_TOKEN,
                        span,
                        message,
                    ));
                    decls.push(Decl::Error {
                        span: start.to(end),
                    });
                }
            }
            self.skip_newlines();
        }
        let well_formed = self.diagnostics.is_empty();
        SyntaxTree { decls, well_formed }
    }

    /// Advance to the next plausible statement boundary: a newline followed
    /// by a declaration keyword, or end of input.
    fn synchronize(&mut self) -> Span {
        let mut last = self.peek().span;
        loop {
            match self.peek().kind {
                TokenKind::Eof => return last,
                TokenKind::Newline => {
                    self.advance();
                    if is_decl_start(self.peek().kind) || self.at(TokenKind::Eof) {
                        return last;
                    }
                }
                _ => {
                    last = self.advance().span;
                }
            }
        }
    }

    fn parse_decl(&mut self) -> ParseResult<Decl> {
        let start = self.peek().span;
        match self.peek().kind {
            TokenKind::TargetScope => {
                self.advance();
                self.expect(TokenKind::Assign, "'='")?;
                let value = self.parse_expr()?;
                self.end_of_decl()?;
                Ok(Decl::TargetScope {
                    span: start.to(value.span()),
                    value,
                })
            }
            TokenKind::Param => {
                self.advance();
                let name = self.expect(TokenKind::Identifier, "parameter name")?;
                let type_name = self.expect(TokenKind::Identifier, "parameter type")?;
                let default = if self.eat(TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.end_of_decl()?;
                let end = default
                    .as_ref()
                    .map(|e| e.span())
                    .unwrap_or(type_name.span);
                Ok(Decl::Param {
                    name: name.text,
                    type_name: type_name.text,
                    default,
                    span: start.to(end),
                })
            }
            TokenKind::Var => {
                self.advance();
                let name = self.expect(TokenKind::Identifier, "variable name")?;
                self.expect(TokenKind::Assign, "'='")?;
                let value = self.parse_expr()?;
                self.end_of_decl()?;
                Ok(Decl::Var {
                    name: name.text,
                    span: start.to(value.span()),
                    value,
                })
            }
            TokenKind::Resource => {
                self.advance();
                let name = self.expect(TokenKind::Identifier, "resource symbolic name")?;
                let type_lit = self.expect(TokenKind::StringLit, "resource type string")?;
                self.expect(TokenKind::Assign, "'='")?;
                let body = self.parse_expr()?;
                self.end_of_decl()?;
                Ok(Decl::Resource {
                    symbolic_name: name.text,
                    type_literal: type_lit.text,
                    type_span: type_lit.span,
                    span: start.to(body.span()),
                    body,
                })
            }
            TokenKind::Output => {
                self.advance();
                let name = self.expect(TokenKind::Identifier, "output name")?;
                let type_name = self.expect(TokenKind::Identifier, "output type")?;
                self.expect(TokenKind::Assign, "'='")?;
                let value = self.parse_expr()?;
                self.end_of_decl()?;
                Ok(Decl::Output {
                    name: name.text,
                    type_name: type_name.text,
                    span: start.to(value.span()),
                    value,
                })
            }
            TokenKind::Module => {
                self.advance();
                let name = self.expect(TokenKind::Identifier, "module symbolic name")?;
                let path = self.expect(TokenKind::StringLit, "module path string")?;
                self.expect(TokenKind::Assign, "'='")?;
                let body = self.parse_expr()?;
                self.end_of_decl()?;
                Ok(Decl::Module {
                    symbolic_name: name.text,
                    path: path.text,
                    span: start.to(body.span()),
                    body,
                })
            }
            TokenKind::Import => {
                self.advance();
                let namespace = self.expect(TokenKind::Identifier, "namespace identifier")?;
                self.end_of_decl()?;
                Ok(Decl::Import {
                    namespace: namespace.text,
                    span: start.to(namespace.span),
                })
            }
            _ => {
                let found = self.peek();
                Err((
                    format!("expected a declaration, found '{}'", describe(found)),
                    found.span,
                ))
            }
        }
    }

    /// A declaration must be followed by a newline or end of input.
    fn end_of_decl(&mut self) -> ParseResult<()> {
        if self.at(TokenKind::Newline) || self.at(TokenKind::Eof) {
            Ok(())
        } else {
            let found = self.peek();
            Err((
                format!(
                    "expected end of declaration, found '{}'",
                    describe(found)
                ),
                found.span,
            ))
        }
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let primary = self.parse_primary()?;
        if !self.at(TokenKind::Dot) {
            return Ok(primary);
        }
        let mut path = Vec::new();
        let mut end = primary.span();
        while self.eat(TokenKind::Dot) {
            let segment = self.expect(TokenKind::Identifier, "property name after '.'")?;
            end = segment.span;
            path.push(segment.text);
        }
        Ok(Expr::Member {
            span: primary.span().to(end),
            base: Box::new(primary),
            path,
        })
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::StringLit => {
                self.advance();
                Ok(Expr::StringLit {
                    value: token.text,
                    span: token.span,
                })
            }
            TokenKind::IntLit => {
                self.advance();
                let value = token
                    .text
                    .parse::<i64>()
                    .map_err(|e| (format!("invalid integer literal: {}", e), token.span))?;
                Ok(Expr::IntLit {
                    value,
                    span: token.span,
                })
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(Expr::BoolLit {
                    value: token.kind == TokenKind::True,
                    span: token.span,
                })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::NullLit { span: token.span })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Identifier {
                    name: token.text,
                    span: token.span,
                })
            }
            TokenKind::LBracket => self.parse_array(),
            TokenKind::LBrace => self.parse_object(),
            _ => Err((
                format!("expected an expression, found '{}'", describe(&token)),
                token.span,
            )),
        }
    }

    fn parse_array(&mut self) -> ParseResult<Expr> {
        let open = self.expect(TokenKind::LBracket, "'['")?;
        let mut items = Vec::new();
        loop {
            self.skip_separators();
            if self.at(TokenKind::RBracket) {
                break;
            }
            if self.at(TokenKind::Eof) {
                return Err(("unterminated array literal".to_string(), open.span));
            }
            items.push(self.parse_expr()?);
        }
        let close = self.expect(TokenKind::RBracket, "']'")?;
        Ok(Expr::Array {
            items,
            span: open.span.to(close.span),
        })
    }

    fn parse_object(&mut self) -> ParseResult<Expr> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        let mut properties = Vec::new();
        loop {
            self.skip_separators();
            if self.at(TokenKind::RBrace) {
                break;
            }
            if self.at(TokenKind::Eof) {
                return Err(("unterminated object literal".to_string(), open.span));
            }
            let key = if self.at(TokenKind::StringLit) {
                self.advance()
            } else {
                self.expect(TokenKind::Identifier, "property name")?
            };
            self.expect(TokenKind::Colon, "':'")?;
            let value = self.parse_expr()?;
            properties.push((key.text, value));
        }
        let close = self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::Object {
            properties,
            span: open.span.to(close.span),
        })
    }

    /// Newlines and commas both separate collection entries.
    fn skip_separators(&mut self) {
        while self.eat(TokenKind::Newline) || self.eat(TokenKind::Comma) {}
    }
}

fn is_decl_start(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::TargetScope
            | TokenKind::Param
            | TokenKind::Var
            | TokenKind::Resource
            | TokenKind::Output
            | TokenKind::Module
            | TokenKind::Import
    )
}

fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Newline => "end of line".to_string(),
        _ if token.text.is_empty() => format!("{:?}", token.kind),
        _ => token.text.clone(),
    }
}
