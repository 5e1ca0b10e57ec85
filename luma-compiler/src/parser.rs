//! Recursive-descent parser with an explicit precedence ladder
//! (spec §4.7), ported from the reference `Parser.cpp`.

use thiserror::Error;

use crate::ast::{BinOp, Expr, Program, Stmt};
use crate::token::{Token, TokenKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{line}:{col}: expected {expected}, found {found:?}")]
    UnexpectedToken {
        line: usize,
        col: usize,
        expected: String,
        found: TokenKind,
    },
    #[error("{line}:{col}: `fn` declarations are not supported")]
    FunctionsUnsupported { line: usize, col: usize },
}

pub struct Parser {
    toks: Vec<Token>,
    index: usize,
}

impl Parser {
    pub fn new(toks: Vec<Token>) -> Self {
        Parser { toks, index: 0 }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.toks
            .get(self.index + offset)
            .unwrap_or_else(|| self.toks.last().expect("token stream always ends in Eof"))
    }

    fn advance(&mut self) -> Token {
        let tok = self.toks[self.index].clone();
        if self.index + 1 < self.toks.len() {
            self.index += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(ParseError::UnexpectedToken {
                line: tok.line,
                col: tok.col,
                expected: expected.to_string(),
                found: tok.kind,
            })
        }
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn parse(mut self) -> Result<Program, ParseError> {
        let mut requires = Vec::new();
        while self.peek().kind == TokenKind::Require {
            self.advance();
            requires.push(self.expect(TokenKind::Identifier, "identifier")?.text);
            self.expect(TokenKind::Semicolon, "';'")?;
        }

        let mut stmts = Vec::new();
        while self.peek().kind != TokenKind::Eof {
            stmts.push(self.parse_statement()?);
        }

        Ok(Program { requires, stmts })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().kind {
            TokenKind::If => self.parse_if_else(),
            TokenKind::Loop => self.parse_loop(),
            TokenKind::Let => self.parse_var_decl(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Fn => {
                let tok = self.peek();
                Err(ParseError::FunctionsUnsupported {
                    line: tok.line,
                    col: tok.col,
                })
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_if_else(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::If, "'if'")?;
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.accept(TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_loop(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::Loop, "'loop'")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::Loop { body })
    }

    fn parse_block(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while self.peek().kind != TokenKind::RBrace {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Stmt::Block(stmts))
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::Let, "'let'")?;
        let name = self.expect(TokenKind::Identifier, "identifier")?.text;
        let init = if self.accept(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::VarDecl { name, init })
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        if self.peek().kind == TokenKind::Identifier && self.peek_at(1).kind == TokenKind::Assign {
            let name = self.advance().text;
            self.advance(); // '='
            let value = Box::new(self.parse_assignment()?);
            return Ok(Expr::Assign { name, value });
        }
        self.parse_logic_or()
    }

    fn parse_logic_or(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_logic_and()?;
        while self.accept(TokenKind::Or) {
            let rhs = self.parse_logic_and()?;
            node = Expr::Binary {
                op: BinOp::LogicalOr,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_logic_and(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_equality()?;
        while self.accept(TokenKind::And) {
            let rhs = self.parse_equality()?;
            node = Expr::Binary {
                op: BinOp::LogicalAnd,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_comparison()?;
        loop {
            let op = if self.accept(TokenKind::Eq) {
                BinOp::Eq
            } else if self.accept(TokenKind::Neq) {
                BinOp::Neq
            } else {
                break;
            };
            let rhs = self.parse_comparison()?;
            node = Expr::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_term()?;
        loop {
            let op = if self.accept(TokenKind::Greater) {
                BinOp::Greater
            } else if self.accept(TokenKind::Geq) {
                BinOp::Geq
            } else if self.accept(TokenKind::Less) {
                BinOp::Less
            } else if self.accept(TokenKind::Leq) {
                BinOp::Leq
            } else {
                break;
            };
            let rhs = self.parse_term()?;
            node = Expr::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_factor()?;
        loop {
            let op = if self.accept(TokenKind::Plus) {
                BinOp::Add
            } else if self.accept(TokenKind::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_factor()?;
            node = Expr::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_unary()?;
        loop {
            let op = if self.accept(TokenKind::Mul) {
                BinOp::Mul
            } else if self.accept(TokenKind::Div) {
                BinOp::Div
            } else if self.accept(TokenKind::Mod) {
                BinOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            node = Expr::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.accept(TokenKind::Minus) {
            let rhs = self.parse_unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Sub,
                lhs: Box::new(Expr::Number(0)),
                rhs: Box::new(rhs),
            });
        }
        self.parse_call()
    }

    fn parse_call(&mut self) -> Result<Expr, ParseError> {
        if self.peek().kind == TokenKind::Identifier {
            // Namespaced call: `IDENT '.' IDENT '(' args? ')'`.
            if self.peek_at(1).kind == TokenKind::Dot && self.peek_at(2).kind == TokenKind::Identifier
            {
                let namespace = self.advance().text;
                self.advance(); // '.'
                let name = self.advance().text;
                if self.peek().kind == TokenKind::LParen {
                    let args = self.parse_call_args()?;
                    return Ok(Expr::Call {
                        namespace: Some(namespace),
                        name,
                        args,
                    });
                }
                // `namespace.name` with no call parens isn't a valid
                // expression form.
                let tok = self.peek();
                return Err(ParseError::UnexpectedToken {
                    line: tok.line,
                    col: tok.col,
                    expected: "'('".to_string(),
                    found: tok.kind,
                });
            }

            if self.peek_at(1).kind == TokenKind::LParen {
                let name = self.advance().text;
                let args = self.parse_call_args()?;
                return Ok(Expr::Call {
                    namespace: None,
                    name,
                    args,
                });
            }
        }
        self.parse_primary()
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            args.push(self.parse_expression()?);
            while self.accept(TokenKind::Comma) {
                args.push(self.parse_expression()?);
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Number => {
                let val: i32 = tok.text.parse().map_err(|_| ParseError::UnexpectedToken {
                    line: tok.line,
                    col: tok.col,
                    expected: "a value that fits in a 32-bit integer".to_string(),
                    found: tok.kind,
                })?;
                Ok(Expr::Number(val))
            }
            TokenKind::Identifier => Ok(Expr::Var(tok.text)),
            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(ParseError::UnexpectedToken {
                line: tok.line,
                col: tok.col,
                expected: "an expression".to_string(),
                found: other,
            }),
        }
    }
}

pub fn parse(toks: Vec<Token>) -> Result<Program, ParseError> {
    Parser::new(toks).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_src(src: &str) -> Program {
        let toks = Lexer::new(src).tokenize_all().unwrap();
        parse(toks).unwrap()
    }

    #[test]
    fn check_require_list_then_statements() {
        let prog = parse_src("require neopixel;\nlet x = 1;");
        assert_eq!(prog.requires, vec!["neopixel".to_string()]);
        assert_eq!(prog.stmts.len(), 1);
    }

    #[test]
    fn check_assignment_is_right_associative_and_lowest_precedence() {
        let prog = parse_src("x = 1 + 2;");
        match &prog.stmts[0] {
            Stmt::Expr(Expr::Assign { name, value }) => {
                assert_eq!(name, "x");
                assert_eq!(
                    **value,
                    Expr::Binary {
                        op: BinOp::Add,
                        lhs: Box::new(Expr::Number(1)),
                        rhs: Box::new(Expr::Number(2)),
                    }
                );
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn check_unary_minus_lowers_to_zero_minus_expr() {
        let prog = parse_src("let x = -5;");
        match &prog.stmts[0] {
            Stmt::VarDecl { init: Some(e), .. } => {
                assert_eq!(
                    *e,
                    Expr::Binary {
                        op: BinOp::Sub,
                        lhs: Box::new(Expr::Number(0)),
                        rhs: Box::new(Expr::Number(5)),
                    }
                );
            }
            other => panic!("expected var decl with init, got {other:?}"),
        }
    }

    #[test]
    fn check_namespaced_call_parses_namespace_and_args() {
        let prog = parse_src("neopixel.fill_rgb(255, 0, 0);");
        match &prog.stmts[0] {
            Stmt::Expr(Expr::Call {
                namespace, name, args,
            }) => {
                assert_eq!(namespace.as_deref(), Some("neopixel"));
                assert_eq!(name, "fill_rgb");
                assert_eq!(args.len(), 3);
            }
            other => panic!("expected namespaced call, got {other:?}"),
        }
    }

    #[test]
    fn check_bare_call_has_no_namespace() {
        let prog = parse_src("delay(500);");
        match &prog.stmts[0] {
            Stmt::Expr(Expr::Call { namespace, name, .. }) => {
                assert!(namespace.is_none());
                assert_eq!(name, "delay");
            }
            other => panic!("expected bare call, got {other:?}"),
        }
    }

    #[test]
    fn check_if_else_and_loop_blocks() {
        let prog = parse_src("if (1) { x = 1; } else { x = 2; }\nloop { delay(1); }");
        assert!(matches!(prog.stmts[0], Stmt::If { .. }));
        assert!(matches!(prog.stmts[1], Stmt::Loop { .. }));
    }

    #[test]
    fn check_precedence_multiplies_before_adds() {
        let prog = parse_src("let x = 1 + 2 * 3;");
        match &prog.stmts[0] {
            Stmt::VarDecl { init: Some(e), .. } => {
                assert_eq!(
                    *e,
                    Expr::Binary {
                        op: BinOp::Add,
                        lhs: Box::new(Expr::Number(1)),
                        rhs: Box::new(Expr::Binary {
                            op: BinOp::Mul,
                            lhs: Box::new(Expr::Number(2)),
                            rhs: Box::new(Expr::Number(3)),
                        }),
                    }
                );
            }
            other => panic!("expected var decl with init, got {other:?}"),
        }
    }

    #[test]
    fn check_missing_semicolon_is_a_parse_error() {
        let toks = Lexer::new("let x = 1").tokenize_all().unwrap();
        assert!(parse(toks).is_err());
    }

    #[test]
    fn check_fn_declaration_is_rejected() {
        let toks = Lexer::new("fn foo() {}").tokenize_all().unwrap();
        assert!(matches!(
            parse(toks),
            Err(ParseError::FunctionsUnsupported { .. })
        ));
    }
}
