//! The TessL parser: a precedence-climbing expression parser over the token
//! stream, producing spanned AST nodes.
//!
//! An expression is a primary followed by (operator, operand) pairs with
//! C-like precedence; a primary is an identifier, a literal, an array
//! literal `[...]`, a parenthesized expression, or a call
//! `name[$attr](args)`. Top-level input is a sequence of expressions.

use crate::{
    ast::{BinaryOp, CallArg, Expr, ExprKind, Literal, UnaryOp},
    error::{Error, Result, Span},
    lexer::{Token, TokenKind, tokenize},
};

/// Maximum expression nesting depth; prevents stack overflow on
/// pathological inputs like `((((...))))`.
const MAX_NESTING_DEPTH: u32 = 200;

/// Parses a whole compilation unit into its top-level expressions.
pub fn parse_program(source: &str) -> Result<Vec<Expr>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
        depth: 0,
    };
    let mut exprs = Vec::new();
    while !parser.at_end() {
        exprs.push(parser.expression()?);
    }
    Ok(exprs)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    depth: u32,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.span.start)
    }

    fn found(&self) -> String {
        self.peek().map_or_else(|| "end of input".to_owned(), |t| t.kind.to_string())
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<Token> {
        match self.peek() {
            Some(token) if token.kind == *kind => Ok(self.advance().unwrap_or_else(|| unreachable!())),
            _ => Err(Error::parse(self.offset(), &[expected], self.found())),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(Error::parse(self.offset(), &["shallower nesting"], "expression nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expression(&mut self) -> Result<Expr> {
        self.binary(1)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Expr> {
        self.enter()?;
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_binary_op() {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            // Left-associative: the right side binds one level tighter.
            let rhs = self.binary(precedence + 1)?;
            let span = Span::new(lhs.span.start, rhs.span.end);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        self.leave();
        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        match self.peek().map(|t| &t.kind)? {
            TokenKind::OrOr => Some(BinaryOp::Or),
            TokenKind::AndAnd => Some(BinaryOp::And),
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::Ne),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            TokenKind::Percent => Some(BinaryOp::Mod),
            _ => None,
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Minus) => Some(UnaryOp::Neg),
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.enter()?;
            let start = self.offset();
            self.advance();
            let operand = self.unary()?;
            let span = Span::new(start, operand.span.end);
            self.leave();
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(Error::parse(self.offset(), &["expression"], "end of input"));
        };
        match token.kind {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Int(v)), token.span))
            }
            TokenKind::Double(v) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Double(v)), token.span))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Str(s)), token.span))
            }
            TokenKind::LParen => {
                self.enter()?;
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                self.leave();
                Ok(inner)
            }
            TokenKind::LBracket => self.array_literal(),
            TokenKind::Ident(name) => self.identifier_or_call(name, token.span),
            other => Err(Error::parse(token.span.start, &["expression"], other.to_string())),
        }
    }

    fn array_literal(&mut self) -> Result<Expr> {
        self.enter()?;
        let start = self.offset();
        self.advance();
        let mut elements = Vec::new();
        if self.peek().is_some_and(|t| t.kind != TokenKind::RBracket) {
            loop {
                elements.push(self.expression()?);
                match self.peek().map(|t| &t.kind) {
                    Some(TokenKind::Comma) => {
                        self.advance();
                    }
                    Some(TokenKind::RBracket) => break,
                    _ => return Err(Error::parse(self.offset(), &["','", "']'"], self.found())),
                }
            }
        }
        let close = self.expect(&TokenKind::RBracket, "']'")?;
        self.leave();
        Ok(Expr::new(
            ExprKind::ArrayLiteral(elements),
            Span::new(start, close.span.end),
        ))
    }

    fn identifier_or_call(&mut self, name: String, span: Span) -> Result<Expr> {
        // Keyword-like literals.
        match name.as_str() {
            "nil" => {
                self.advance();
                return Ok(Expr::new(ExprKind::Literal(Literal::Nil), span));
            }
            "true" => {
                self.advance();
                return Ok(Expr::new(ExprKind::Literal(Literal::Bool(true)), span));
            }
            "false" => {
                self.advance();
                return Ok(Expr::new(ExprKind::Literal(Literal::Bool(false)), span));
            }
            _ => {}
        }

        // `name$attr(...)`: an instance attribute pinned into the emitted
        // primitive's name.
        let attr = if matches!(self.peek_at(1).map(|t| &t.kind), Some(TokenKind::Dollar)) {
            match (self.peek_at(2).map(|t| t.kind.clone()), self.peek_at(3).map(|t| &t.kind)) {
                (Some(TokenKind::Ident(attr)), Some(TokenKind::LParen)) => Some(attr),
                _ => None,
            }
        } else {
            None
        };

        let is_call = if attr.is_some() {
            true
        } else {
            matches!(self.peek_at(1).map(|t| &t.kind), Some(TokenKind::LParen))
        };

        self.advance();
        if !is_call {
            return Ok(Expr::new(ExprKind::Identifier(name), span));
        }
        if attr.is_some() {
            self.advance(); // '$'
            self.advance(); // attribute
        }
        self.expect(&TokenKind::LParen, "'('")?;

        self.enter()?;
        let mut args = Vec::new();
        if self.peek().is_some_and(|t| t.kind != TokenKind::RParen) {
            loop {
                args.push(self.call_argument()?);
                match self.peek().map(|t| &t.kind) {
                    Some(TokenKind::Comma) => {
                        self.advance();
                    }
                    Some(TokenKind::RParen) => break,
                    _ => return Err(Error::parse(self.offset(), &["','", "')'"], self.found())),
                }
            }
        }
        let close = self.expect(&TokenKind::RParen, "')'")?;
        self.leave();
        Ok(Expr::new(
            ExprKind::Call { name, attr, args },
            Span::new(span.start, close.span.end),
        ))
    }

    fn call_argument(&mut self) -> Result<CallArg> {
        // `name = expr` marks a keyword argument; a bare `=` never appears
        // elsewhere in the grammar.
        if let (Some(TokenKind::Ident(keyword)), Some(TokenKind::Assign)) = (
            self.peek().map(|t| t.kind.clone()),
            self.peek_at(1).map(|t| &t.kind),
        ) {
            self.advance();
            self.advance();
            let value = self.expression()?;
            return Ok(CallArg {
                keyword: Some(keyword),
                value,
            });
        }
        Ok(CallArg {
            keyword: None,
            value: self.expression()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> Expr {
        let mut exprs = parse_program(source).unwrap();
        assert_eq!(exprs.len(), 1, "expected a single expression");
        exprs.pop().unwrap()
    }

    #[test]
    fn precedence_is_c_like() {
        let expr = parse_one("1 + 2 * 3");
        let ExprKind::Binary { op: BinaryOp::Add, rhs, .. } = expr.kind else {
            panic!("expected addition at the root");
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn left_associativity() {
        let expr = parse_one("10 - 2 - 3");
        let ExprKind::Binary { op: BinaryOp::Sub, lhs, .. } = expr.kind else {
            panic!("expected subtraction at the root");
        };
        assert!(matches!(lhs.kind, ExprKind::Binary { op: BinaryOp::Sub, .. }));
    }

    #[test]
    fn comparison_binds_looser_than_arithmetic() {
        let expr = parse_one("x + 1 < y * 2");
        assert!(matches!(expr.kind, ExprKind::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn call_with_keyword_argument() {
        let expr = parse_one("random(list(3), seed = 11)");
        let ExprKind::Call { name, args, .. } = expr.kind else {
            panic!("expected a call");
        };
        assert_eq!(name, "random");
        assert_eq!(args[0].keyword, None);
        assert_eq!(args[1].keyword.as_deref(), Some("seed"));
    }

    #[test]
    fn call_with_instance_attribute() {
        let expr = parse_one("variable$x(42)");
        let ExprKind::Call { name, attr, args } = expr.kind else {
            panic!("expected a call");
        };
        assert_eq!(name, "variable");
        assert_eq!(attr.as_deref(), Some("x"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn nested_array_literal() {
        let expr = parse_one("[[1, 2], [3, 4]]");
        let ExprKind::ArrayLiteral(rows) = expr.kind else {
            panic!("expected an array literal");
        };
        assert_eq!(rows.len(), 2);
        assert!(matches!(rows[0].kind, ExprKind::ArrayLiteral(_)));
    }

    #[test]
    fn keyword_literals() {
        assert!(matches!(parse_one("nil").kind, ExprKind::Literal(Literal::Nil)));
        assert!(matches!(parse_one("true").kind, ExprKind::Literal(Literal::Bool(true))));
    }

    #[test]
    fn unary_chain() {
        let expr = parse_one("--3");
        let ExprKind::Unary { op: UnaryOp::Neg, operand } = expr.kind else {
            panic!("expected negation");
        };
        assert!(matches!(operand.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn multiple_top_level_expressions() {
        let exprs = parse_program("define(x, 1) x").unwrap();
        assert_eq!(exprs.len(), 2);
    }

    #[test]
    fn missing_close_paren_reports_expected_set() {
        let err = parse_program("add(1, 2").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ParseError);
        assert!(err.message().contains("')'"), "{}", err.message());
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let source = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        assert!(parse_program(&source).is_err());
    }
}
