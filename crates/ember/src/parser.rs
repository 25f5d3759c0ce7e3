//! Recursive-descent parser: token stream to expression tree.
//!
//! The precedence chain mirrors the reference grammar exactly (low to
//! high): if-expression, variable-declaration, equality, comparison,
//! additive, multiplicative, unary, call, subscript, import, variable
//! reference/assignment, primary. Each level is one function that falls
//! through to the next-higher level when its own leading token doesn't
//! match.

use crate::error::ParseError;
use crate::expr::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};

pub struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    cycled: bool,
    errors: Vec<ParseError>,
}

/// Parses a full program (or block body) into its expression sequence.
///
/// Returns the parsed expressions and any errors encountered; on error
/// the expression list is still populated on a best-effort basis via the
/// recovery rules described in §4.2, but callers should treat it as
/// unusable when `errors` is non-empty.
pub fn parse(source: &str) -> Result<Vec<Expr>, Vec<ParseError>> {
    let mut parser = Parser::new(source);
    let body = parser.parse_expr_list(false);
    if parser.errors.is_empty() {
        Ok(body)
    } else {
        Err(parser.errors)
    }
}

impl<'src> Parser<'src> {
    fn new(source: &'src str) -> Self {
        let mut scanner = Scanner::new(source);
        let current = scanner.next_token();
        Parser {
            scanner,
            current,
            cycled: false,
            errors: Vec::new(),
        }
    }

    fn advance(&mut self) {
        self.cycled = false;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current("Malformed token.");
        }
    }

    fn error_at_current(&mut self, message: &str) {
        self.errors.push(ParseError::new(message, self.current.char_idx));
    }

    fn skip_newlines_if(&mut self, req_expr: bool) {
        if req_expr {
            while self.current.kind == TokenKind::Newline {
                self.advance();
            }
        }
    }

    fn parse_expr_list(&mut self, allow_right_brace: bool) -> Vec<Expr> {
        let mut exprs = Vec::new();
        while self.current.kind == TokenKind::Newline {
            self.advance();
        }
        while self.current.kind != TokenKind::Eof
            && !(allow_right_brace && self.current.kind == TokenKind::RightBrace)
        {
            if let Some(expr) = self.parse_expr(false) {
                exprs.push(expr);
            }
            while self.current.kind == TokenKind::Newline {
                self.advance();
            }
        }
        exprs
    }

    fn parse_expr(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        self.parse_if(req_expr)
    }

    fn parse_if(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        if self.current.kind == TokenKind::If {
            let char_idx = self.current.char_idx;
            self.advance();
            let condition = self.parse_expr(true)?;
            let then_branch = self.parse_expr(true)?;
            while self.current.kind == TokenKind::Newline {
                self.advance();
            }
            let else_branch = if self.current.kind == TokenKind::Else {
                self.advance();
                Some(Box::new(self.parse_expr(true)?))
            } else {
                None
            };
            return Some(Expr::new(
                ExprKind::If {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch,
                },
                char_idx,
            ));
        }
        self.parse_var_decl(req_expr)
    }

    fn parse_var_decl(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        if matches!(self.current.kind, TokenKind::Var | TokenKind::Const) {
            let char_idx = self.current.char_idx;
            let mutable = self.current.kind == TokenKind::Var;
            self.advance();
            let name = if self.current.kind == TokenKind::Identifier {
                let name = self.current.text.to_string();
                self.advance();
                name
            } else {
                self.error_at_current("Expected variable name.");
                String::new()
            };
            if self.current.kind == TokenKind::Equal {
                self.advance();
            } else {
                self.error_at_current("Expected =.");
            }
            let value = self.parse_expr(true)?;
            return Some(Expr::new(
                ExprKind::VarDecl {
                    mutable,
                    name,
                    value: Box::new(value),
                },
                char_idx,
            ));
        }
        self.parse_equality(req_expr)
    }

    fn parse_equality(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        let mut expr = self.parse_comparison(req_expr)?;
        while matches!(self.current.kind, TokenKind::EqualEqual | TokenKind::BangEqual) {
            let op = if self.current.kind == TokenKind::EqualEqual {
                BinaryOp::Equal
            } else {
                BinaryOp::NotEqual
            };
            let char_idx = self.current.char_idx;
            self.advance();
            let rhs = self.parse_equality(true)?;
            expr = Expr::new(
                ExprKind::Binary {
                    a: Box::new(expr),
                    op,
                    b: Box::new(rhs),
                },
                char_idx,
            );
        }
        Some(expr)
    }

    fn parse_comparison(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        let mut expr = self.parse_additive(req_expr)?;
        while matches!(
            self.current.kind,
            TokenKind::Greater | TokenKind::Less | TokenKind::GreaterEqual | TokenKind::LessEqual
        ) {
            let op = match self.current.kind {
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::Less => BinaryOp::Less,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                _ => BinaryOp::LessEqual,
            };
            let char_idx = self.current.char_idx;
            self.advance();
            let rhs = self.parse_comparison(true)?;
            expr = Expr::new(
                ExprKind::Binary {
                    a: Box::new(expr),
                    op,
                    b: Box::new(rhs),
                },
                char_idx,
            );
        }
        Some(expr)
    }

    fn parse_additive(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        let mut expr = self.parse_multiplicative(req_expr)?;
        while matches!(self.current.kind, TokenKind::Plus | TokenKind::Minus) {
            let op = if self.current.kind == TokenKind::Plus {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            };
            let char_idx = self.current.char_idx;
            self.advance();
            let rhs = self.parse_additive(true)?;
            expr = Expr::new(
                ExprKind::Binary {
                    a: Box::new(expr),
                    op,
                    b: Box::new(rhs),
                },
                char_idx,
            );
        }
        Some(expr)
    }

    fn parse_multiplicative(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        let mut expr = self.parse_unary(req_expr)?;
        while matches!(self.current.kind, TokenKind::Star | TokenKind::Slash | TokenKind::Percent) {
            let op = match self.current.kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => BinaryOp::Mod,
            };
            let char_idx = self.current.char_idx;
            self.advance();
            let rhs = self.parse_multiplicative(true)?;
            expr = Expr::new(
                ExprKind::Binary {
                    a: Box::new(expr),
                    op,
                    b: Box::new(rhs),
                },
                char_idx,
            );
        }
        Some(expr)
    }

    fn parse_unary(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        if matches!(self.current.kind, TokenKind::Minus | TokenKind::Bang) {
            let op = if self.current.kind == TokenKind::Minus {
                UnaryOp::Negate
            } else {
                UnaryOp::Not
            };
            let char_idx = self.current.char_idx;
            self.advance();
            let value = self.parse_unary(true)?;
            return Some(Expr::new(ExprKind::Unary { op, value: Box::new(value) }, char_idx));
        }
        self.parse_call(req_expr)
    }

    fn parse_call(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        let mut callee = self.parse_subscript(req_expr)?;
        while self.current.kind == TokenKind::LeftParen {
            let char_idx = self.current.char_idx;
            self.advance();
            let mut args = Vec::new();
            while self.current.kind != TokenKind::RightParen {
                if self.current.kind == TokenKind::Eof {
                    self.error_at_current("Expected ).");
                    return None;
                }
                let arg = self.parse_expr(true)?;
                args.push(arg);

                if self.current.kind == TokenKind::Comma {
                    self.advance();
                    if self.current.kind == TokenKind::RightParen {
                        self.error_at_current("Expected argument.");
                        self.advance();
                        return Some(callee);
                    }
                } else if self.current.kind == TokenKind::RightParen {
                    // loop terminates below
                } else {
                    self.error_at_current("Expected comma.");
                    return None;
                }
            }
            self.advance();
            callee = Expr::new(
                ExprKind::Call {
                    callee: Box::new(callee),
                    args,
                },
                char_idx,
            );
        }
        Some(callee)
    }

    fn parse_subscript(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        let mut value = self.parse_import(req_expr)?;
        while self.current.kind == TokenKind::Dot {
            self.advance();
            if self.current.kind != TokenKind::Identifier {
                self.error_at_current("Expected name.");
                break;
            }
            let name = self.current.text.to_string();
            let char_idx = self.current.char_idx;
            self.advance();
            if self.current.kind == TokenKind::Equal {
                self.advance();
                let set_value = self.parse_expr(true)?;
                return Some(Expr::new(
                    ExprKind::SubscriptSet {
                        value: Box::new(value),
                        name,
                        set_value: Box::new(set_value),
                    },
                    char_idx,
                ));
            }
            value = Expr::new(
                ExprKind::Subscript {
                    value: Box::new(value),
                    name,
                },
                char_idx,
            );
        }
        Some(value)
    }

    fn parse_import(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        if self.current.kind == TokenKind::Import {
            let char_idx = self.current.char_idx;
            self.advance();
            if self.current.kind != TokenKind::String {
                self.error_at_current("Expected package name.");
                return None;
            }
            let package = unquote(self.current.text);
            self.advance();
            if self.current.kind == TokenKind::As {
                self.advance();
                let alias = if self.current.kind == TokenKind::Identifier {
                    let alias = self.current.text.to_string();
                    self.advance();
                    alias
                } else {
                    self.error_at_current("Expected identifier.");
                    String::new()
                };
                return Some(Expr::new(
                    ExprKind::VarDecl {
                        mutable: false,
                        name: alias,
                        value: Box::new(Expr::new(
                            ExprKind::Import {
                                package: package.clone(),
                                alias: package,
                            },
                            char_idx,
                        )),
                    },
                    char_idx,
                ));
            }
            return Some(Expr::new(
                ExprKind::Import {
                    alias: package.clone(),
                    package,
                },
                char_idx,
            ));
        }
        self.parse_var(req_expr)
    }

    fn parse_var(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        if self.current.kind == TokenKind::Identifier {
            let name = self.current.text.to_string();
            let char_idx = self.current.char_idx;
            self.advance();
            if self.current.kind == TokenKind::Equal {
                self.advance();
                let value = self.parse_expr(true)?;
                return Some(Expr::new(
                    ExprKind::VarSet {
                        name,
                        value: Box::new(value),
                    },
                    char_idx,
                ));
            }
            return Some(Expr::new(ExprKind::Variable(name), char_idx));
        }
        self.parse_literal(req_expr)
    }

    fn parse_literal(&mut self, req_expr: bool) -> Option<Expr> {
        self.skip_newlines_if(req_expr);
        let char_idx = self.current.char_idx;
        match self.current.kind {
            TokenKind::Number => {
                let value: f64 = self.current.text.parse().unwrap_or(0.0);
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::Number(value)), char_idx))
            }
            TokenKind::String => {
                let value = unquote(self.current.text);
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::String(value)), char_idx))
            }
            TokenKind::True => {
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::Bool(true)), char_idx))
            }
            TokenKind::False => {
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::Bool(false)), char_idx))
            }
            TokenKind::Nil => {
                self.advance();
                Some(Expr::new(ExprKind::Literal(Literal::Nil), char_idx))
            }
            TokenKind::LeftParen => {
                self.advance();
                let value = self.parse_expr(true)?;
                while self.current.kind == TokenKind::Newline {
                    self.advance();
                }
                if self.current.kind == TokenKind::RightParen {
                    self.advance();
                } else {
                    self.error_at_current("Expected ).");
                }
                Some(value)
            }
            TokenKind::LeftBrace => {
                self.advance();
                let body = self.parse_expr_list(true);
                if self.current.kind == TokenKind::RightBrace {
                    self.advance();
                } else {
                    self.error_at_current("Expected }.");
                }
                Some(Expr::new(ExprKind::Block(body), char_idx))
            }
            TokenKind::Fn => {
                self.advance();
                if self.current.kind != TokenKind::LeftParen {
                    self.error_at_current("Expected (.");
                    return None;
                }
                self.advance();
                let mut params = Vec::new();
                while self.current.kind != TokenKind::RightParen {
                    if self.current.kind != TokenKind::Identifier {
                        self.error_at_current("Expected parameter name.");
                        return None;
                    }
                    params.push(self.current.text.to_string());
                    self.advance();
                    if self.current.kind == TokenKind::Comma {
                        self.advance();
                    } else if self.current.kind != TokenKind::RightParen {
                        self.error_at_current("Expected comma.");
                        return None;
                    }
                }
                self.advance();
                if self.current.kind != TokenKind::LeftBrace {
                    self.error_at_current("Expected {.");
                    return None;
                }
                self.advance();
                let body = self.parse_expr_list(true);
                if self.current.kind == TokenKind::RightBrace {
                    self.advance();
                } else {
                    self.error_at_current("Expected }.");
                }
                Some(Expr::new(ExprKind::FunctionLiteral { params, body }, char_idx))
            }
            _ => {
                if self.cycled {
                    self.error_at_current("Expected expression.");
                    self.advance();
                    None
                } else {
                    self.cycled = true;
                    self.parse_expr(req_expr)
                }
            }
        }
    }
}

fn unquote(text: &str) -> String {
    text.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Vec<Expr> {
        parse(src).unwrap_or_else(|e| panic!("unexpected parse errors: {e:?}"))
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let body = parse_ok("1 + 2 * 3");
        assert_eq!(body.len(), 1);
        match &body[0].kind {
            ExprKind::Binary { op: BinaryOp::Add, b, .. } => {
                assert!(matches!(b.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected top-level add, got {other:?}"),
        }
    }

    #[test]
    fn parses_var_decl_and_reassignment() {
        let body = parse_ok("var x = 10\nx = x - 4");
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0].kind, ExprKind::VarDecl { mutable: true, .. }));
        assert!(matches!(body[1].kind, ExprKind::VarSet { .. }));
    }

    #[test]
    fn parses_function_literal_and_call() {
        let body = parse_ok("var f = fn(n) { n }\nf(10)");
        assert_eq!(body.len(), 2);
        match &body[0].kind {
            ExprKind::VarDecl { value, .. } => {
                assert!(matches!(value.kind, ExprKind::FunctionLiteral { .. }));
            }
            other => panic!("expected var decl, got {other:?}"),
        }
    }

    #[test]
    fn parses_dotted_call_as_subscript_then_call() {
        let body = parse_ok("io.print(1)");
        match &body[0].kind {
            ExprKind::Call { callee, .. } => {
                assert!(matches!(callee.kind, ExprKind::Subscript { .. }));
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn missing_closing_paren_reports_error() {
        let errors = parse("(1 + 2").unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("Expected )")));
    }

    #[test]
    fn missing_equals_in_decl_reports_error_and_recovers() {
        let errors = parse("var x 10").unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("Expected =")));
    }

    #[test]
    fn if_else_parses_with_both_branches() {
        let body = parse_ok("if true 1 else 2");
        assert!(matches!(
            &body[0].kind,
            ExprKind::If { else_branch: Some(_), .. }
        ));
    }
}
