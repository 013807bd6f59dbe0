use crate::script::ast::{
    Argument, BinaryOp, Expr, ExprKind, FunctionDef, Param, ParsedSource, Stmt, UnaryOp,
};
use crate::script::fault::SyntaxError;
use crate::script::lexer::{Span, Token, TokenKind, tokenize};
use std::collections::HashSet;

/// Parse a whole source file into its top-level definitions.
pub fn parse_source(source: &str) -> Result<ParsedSource, SyntaxError> {
    let tokens = tokenize(source)?;
    Parser {
        source,
        tokens,
        pos: 0,
    }
    .parse_source()
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        // `tokenize` always terminates the stream with Eof and `advance` never moves past it.
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.peek();
        SyntaxError::new(message, token.span.line, token.span.column)
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!(
                "expected {}, found {}",
                what,
                self.peek_kind().describe()
            )))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, SyntaxError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error_here(format!("expected {}, found {}", what, other.describe()))),
        }
    }

    fn parse_source(mut self) -> Result<ParsedSource, SyntaxError> {
        let mut definitions: Vec<FunctionDef> = Vec::new();
        let mut seen = HashSet::new();

        while !self.check(&TokenKind::Eof) {
            let line = self.peek().span.line;
            let column = self.peek().span.column;
            let def = self.definition()?;
            if !seen.insert(def.name.clone()) {
                return Err(SyntaxError::new(
                    format!("duplicate definition of `{}`", def.name),
                    line,
                    column,
                ));
            }
            definitions.push(def);
        }

        Ok(ParsedSource { definitions })
    }

    /// Offset of the start of the line holding `offset`, if only whitespace precedes it.
    fn line_start(&self, offset: usize) -> usize {
        let line_begin = self.source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        if self.source[line_begin..offset].chars().all(|c| c == ' ' || c == '\t') {
            line_begin
        } else {
            offset
        }
    }

    fn definition(&mut self) -> Result<FunctionDef, SyntaxError> {
        let first = self.peek().clone();
        let mut attributes = Vec::new();

        while self.eat(&TokenKind::At) {
            attributes.push(self.expect_ident("attribute name after `@`")?);
        }

        if !self.check(&TokenKind::Fn) {
            return Err(self.error_here(format!(
                "expected function definition, found {}",
                self.peek_kind().describe()
            )));
        }
        let fn_token = self.advance();
        let name = self.expect_ident("function name")?;

        self.expect(&TokenKind::LParen, "`(` after function name")?;
        let params = self.params(&name)?;
        let close_paren = self.expect(&TokenKind::RParen, "`)` to close parameter list")?;

        let (body, close_brace) = self.block()?;

        let start = self.line_start(first.span.start);
        Ok(FunctionDef {
            name,
            attributes,
            params,
            body,
            span: Span {
                start,
                end: close_brace.span.end,
                line: first.span.line,
                column: 1 + first.span.start - start,
            },
            signature_span: Span {
                start: fn_token.span.start,
                end: close_paren.span.end,
                line: fn_token.span.line,
                column: fn_token.span.column,
            },
            header_line: fn_token.span.line,
            end_line: close_brace.span.line,
        })
    }

    fn params(&mut self, function: &str) -> Result<Vec<Param>, SyntaxError> {
        let mut params: Vec<Param> = Vec::new();

        while !self.check(&TokenKind::RParen) {
            let name = self.expect_ident("parameter name")?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error_here(format!(
                    "duplicate parameter `{}` in `{}`",
                    name, function
                )));
            }

            let default = if self.eat(&TokenKind::Assign) {
                Some(self.expression()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error_here(format!(
                        "parameter `{}` without a default follows a parameter with one",
                        name
                    )));
                }
                None
            };
            params.push(Param { name, default });

            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        Ok(params)
    }

    /// Parse `{ stmt* }`, returning the statements and the closing brace.
    fn block(&mut self) -> Result<(Vec<Stmt>, Token), SyntaxError> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        loop {
            if self.check(&TokenKind::RBrace) {
                let close = self.advance();
                return Ok((stmts, close));
            }
            if self.check(&TokenKind::Eof) {
                return Err(self.error_here("expected `}` before end of input"));
            }
            stmts.push(self.statement()?);
        }
    }

    fn body(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        Ok(self.block()?.0)
    }

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.peek().span.line;

        match self.peek_kind() {
            TokenKind::Let => {
                self.advance();
                let name = self.expect_ident("variable name after `let`")?;
                self.expect(&TokenKind::Assign, "`=`")?;
                let value = self.expression()?;
                self.expect(&TokenKind::Semicolon, "`;`")?;
                Ok(Stmt::Let { name, value, line })
            }
            TokenKind::If => {
                self.advance();
                self.if_statement(line)
            }
            TokenKind::While => {
                self.advance();
                let condition = self.expression()?;
                let body = self.body()?;
                Ok(Stmt::While {
                    condition,
                    body,
                    line,
                })
            }
            TokenKind::For => {
                self.advance();
                let variable = self.expect_ident("loop variable")?;
                self.expect(&TokenKind::In, "`in`")?;
                let iterable = self.expression()?;
                let body = self.body()?;
                Ok(Stmt::For {
                    variable,
                    iterable,
                    body,
                    line,
                })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(&TokenKind::Semicolon, "`;` after return")?;
                Ok(Stmt::Return { value, line })
            }
            TokenKind::Raise => {
                self.advance();
                let value = self.expression()?;
                self.expect(&TokenKind::Semicolon, "`;` after raise")?;
                Ok(Stmt::Raise { value, line })
            }
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "`;` after break")?;
                Ok(Stmt::Break { line })
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "`;` after continue")?;
                Ok(Stmt::Continue { line })
            }
            _ => {
                let expr = self.expression()?;
                if self.eat(&TokenKind::Assign) {
                    let value = self.expression()?;
                    self.expect(&TokenKind::Semicolon, "`;` after assignment")?;
                    return assignment(expr, value, line);
                }
                self.expect(&TokenKind::Semicolon, "`;` after expression")?;
                Ok(Stmt::Expr { expr, line })
            }
        }
    }

    fn if_statement(&mut self, line: usize) -> Result<Stmt, SyntaxError> {
        let condition = self.expression()?;
        let body = self.body()?;
        let mut branches = vec![(condition, body)];
        let mut otherwise = None;

        while self.eat(&TokenKind::Else) {
            if self.eat(&TokenKind::If) {
                let condition = self.expression()?;
                let body = self.body()?;
                branches.push((condition, body));
            } else {
                otherwise = Some(self.body()?);
                break;
            }
        }

        Ok(Stmt::If {
            branches,
            otherwise,
            line,
        })
    }

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.and_expr()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.equality()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.comparison()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.factor()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.peek().span.line;
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang | TokenKind::Not => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        })
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        loop {
            let line = self.peek().span.line;
            if self.eat(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket, "`]`")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                };
            } else if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("field name after `.`")?;
                expr = Expr {
                    kind: ExprKind::Field {
                        target: Box::new(expr),
                        name,
                    },
                    line,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.peek().clone();
        let line = token.span.line;

        let kind = match token.kind {
            TokenKind::Nil => {
                self.advance();
                ExprKind::Nil
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Int(n) => {
                self.advance();
                ExprKind::Int(n)
            }
            TokenKind::Float(n) => {
                self.advance();
                ExprKind::Float(n)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let args = self.arguments()?;
                    ExprKind::Call { callee: name, args }
                } else {
                    ExprKind::Ident(name)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "`]` to close list")?;
                ExprKind::List(items)
            }
            TokenKind::LBrace => {
                self.advance();
                ExprKind::Map(self.map_entries()?)
            }
            other => {
                return Err(self.error_here(format!("expected expression, found {}", other.describe())));
            }
        };

        Ok(Expr { kind, line })
    }

    /// Call arguments after `(`, through the closing `)`.
    fn arguments(&mut self) -> Result<Vec<Argument>, SyntaxError> {
        let mut args: Vec<Argument> = Vec::new();

        while !self.check(&TokenKind::RParen) {
            let keyword = match (self.peek_kind(), self.peek_nth_kind(1)) {
                (TokenKind::Ident(name), TokenKind::Assign) => Some(name.clone()),
                _ => None,
            };

            if let Some(name) = keyword {
                self.advance();
                self.advance();
                let value = self.expression()?;
                args.push(Argument {
                    name: Some(name),
                    value,
                });
            } else {
                if args.iter().any(|a| a.name.is_some()) {
                    return Err(self.error_here("positional argument follows keyword argument"));
                }
                let value = self.expression()?;
                args.push(Argument { name: None, value });
            }

            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        self.expect(&TokenKind::RParen, "`)` to close argument list")?;
        Ok(args)
    }

    /// Map literal entries after `{`, through the closing `}`.
    fn map_entries(&mut self) -> Result<Vec<(Expr, Expr)>, SyntaxError> {
        let mut entries = Vec::new();

        while !self.check(&TokenKind::RBrace) {
            let key = match self.bare_key() {
                Some(key) => key,
                None => self.expression()?,
            };
            self.expect(&TokenKind::Colon, "`:` after map key")?;
            let value = self.expression()?;
            entries.push((key, value));

            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        self.expect(&TokenKind::RBrace, "`}` to close map")?;
        Ok(entries)
    }

    /// `name:` inside a map literal is shorthand for the string key `"name"`.
    fn bare_key(&mut self) -> Option<Expr> {
        if self.peek_nth_kind(1) != &TokenKind::Colon {
            return None;
        }
        let TokenKind::Ident(name) = self.peek_kind().clone() else {
            return None;
        };
        let line = self.advance().span.line;
        Some(Expr {
            kind: ExprKind::Str(name),
            line,
        })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let line = lhs.line;
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        line,
    }
}

fn assignment(target: Expr, value: Expr, line: usize) -> Result<Stmt, SyntaxError> {
    match target.kind {
        ExprKind::Ident(name) => Ok(Stmt::Assign {
            target: name,
            index: None,
            value,
            line,
        }),
        ExprKind::Index { target, index } => match target.kind {
            ExprKind::Ident(name) => Ok(Stmt::Assign {
                target: name,
                index: Some(*index),
                value,
                line,
            }),
            _ => Err(SyntaxError::new("only `name[index]` can be assigned to", line, 1)),
        },
        _ => Err(SyntaxError::new("invalid assignment target", line, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALC: &str = "# calculator\n\n@heal\nfn divide(a, b = 2) {\n    return a / b;\n}\n\nfn twice(x) { return x * 2; }\n";

    #[test]
    fn test_definition_spans_cover_attributes_through_brace() {
        let parsed = parse_source(CALC).unwrap();
        assert_eq!(parsed.definitions.len(), 2);

        let divide = &parsed.definitions[0];
        assert_eq!(divide.name, "divide");
        assert!(divide.is_marked());
        assert_eq!(divide.start_line(), 3);
        assert_eq!(divide.header_line, 4);
        assert_eq!(divide.end_line, 6);
        assert_eq!(
            divide.text(CALC),
            "@heal\nfn divide(a, b = 2) {\n    return a / b;\n}"
        );
        assert_eq!(divide.signature(CALC), "fn divide(a, b = 2)");

        let twice = &parsed.definitions[1];
        assert!(!twice.is_marked());
        assert_eq!(twice.text(CALC), "fn twice(x) { return x * 2; }");
    }

    #[test]
    fn test_indented_definition_includes_leading_whitespace() {
        let source = "  @heal\n  fn f() { return 1; }\n";
        let parsed = parse_source(source).unwrap();
        assert_eq!(parsed.definitions[0].text(source), "  @heal\n  fn f() { return 1; }");
    }

    #[test]
    fn test_statements_and_precedence() {
        let source = r#"
fn f(items, limit = 3) {
    let total = 0;
    for x in items {
        if x > limit and not (x == 10) { continue; } else if x < 0 { break; } else { total = total + x * 2; }
    }
    let m = {name: "a", "k": [1, 2]};
    m["k"] = 5;
    while total > 100 { total = total - 1; }
    return g(total, scale = 2);
}
"#;
        let parsed = parse_source(source).unwrap();
        let f = &parsed.definitions[0];
        assert_eq!(f.param_names(), vec!["items", "limit"]);
        assert_eq!(f.body.len(), 6);

        match &f.body[5] {
            Stmt::Return {
                value: Some(Expr {
                    kind: ExprKind::Call { callee, args },
                    ..
                }),
                ..
            } => {
                assert_eq!(callee, "g");
                assert_eq!(args.len(), 2);
                assert_eq!(args[1].name.as_deref(), Some("scale"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }

        match &f.body[3] {
            Stmt::Assign { target, index, .. } => {
                assert_eq!(target, "m");
                assert!(index.is_some());
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let parsed = parse_source("fn f() { return 1 + 2 * 3; }").unwrap();
        match &parsed.definitions[0].body[0] {
            Stmt::Return {
                value: Some(Expr {
                    kind: ExprKind::Binary { op, rhs, .. },
                    ..
                }),
                ..
            } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    rhs.kind,
                    ExprKind::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_top_level_statements() {
        let err = parse_source("let x = 1;").unwrap_err();
        assert!(err.message.contains("expected function definition"));
    }

    #[test]
    fn test_rejects_duplicate_definitions() {
        let err = parse_source("fn a() {}\nfn a() {}").unwrap_err();
        assert!(err.message.contains("duplicate definition"));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_rejects_required_after_default() {
        assert!(parse_source("fn a(x = 1, y) {}").is_err());
    }

    #[test]
    fn test_reports_missing_semicolon_position() {
        let err = parse_source("fn a() {\n    return 1\n}").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("`;`"));
    }
}
