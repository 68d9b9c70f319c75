//! Recursive-descent parser.
//!
//! Precedence, lowest to highest: `or`, unary `not`, `and`, comparisons
//! (`== != < <= > >= in`), `+`, postfix (`.` / `[...]` / `(...)`), primary.

use ps_core::{PsError, PsResult};

use crate::ast::{AssignTarget, BinOp, Expr, ExprKind, Program, Stmt, StmtKind};
use crate::token::{Keyword, Tok, Token};

pub fn parse(tokens: Vec<Token>) -> PsResult<Program> {
    let mut parser = Parser { tokens, pos: 0 };
    let mut program = Vec::new();
    loop {
        parser.skip_newlines();
        if parser.check(&Tok::Eof) {
            break;
        }
        program.push(parser.parse_statement()?);
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    // -- statements ---------------------------------------------------------

    fn parse_statement(&mut self) -> PsResult<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Kw(Keyword::Def) => self.parse_func_def()?,
            Tok::Kw(Keyword::Class) => self.parse_class_def()?,
            Tok::Kw(Keyword::If) => self.parse_if()?,
            Tok::Kw(Keyword::While) => self.parse_while()?,
            Tok::Kw(Keyword::For) => self.parse_for()?,
            Tok::Kw(Keyword::Return) => self.parse_return()?,
            Tok::Kw(Keyword::Break) => {
                self.advance();
                self.expect_newline()?;
                StmtKind::Break
            }
            Tok::Kw(Keyword::With) => self.parse_with_policy()?,
            Tok::Kw(Keyword::Retry) => self.parse_retry()?,
            Tok::Kw(Keyword::Timeout) => self.parse_timeout()?,
            Tok::Kw(Keyword::Guard) => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect_newline()?;
                StmtKind::Guard(cond)
            }
            _ if self.looks_like_assignment() => self.parse_assignment()?,
            _ => {
                let expr = self.parse_expr()?;
                if self.check(&Tok::Assign) {
                    return Err(PsError::parse(
                        self.line(),
                        format!("invalid assignment target: {expr}"),
                    ));
                }
                self.expect_newline()?;
                StmtKind::ExprStmt(expr)
            }
        };
        Ok(Stmt { kind, line })
    }

    fn parse_func_def(&mut self) -> PsResult<StmtKind> {
        self.advance(); // def
        let name = self.expect_ident("function name")?;
        self.expect(&Tok::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Tok::RParen) {
            loop {
                params.push(self.expect_ident("parameter name")?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(&Tok::RParen)?;
        let body = self.parse_block()?;
        Ok(StmtKind::FuncDef { name, params, body })
    }

    fn parse_class_def(&mut self) -> PsResult<StmtKind> {
        self.advance(); // class
        let name = self.expect_ident("class name")?;
        let body = self.parse_block()?;
        Ok(StmtKind::ClassDef { name, body })
    }

    fn parse_if(&mut self) -> PsResult<StmtKind> {
        self.advance(); // if
        let cond = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let else_body = if self.check(&Tok::Kw(Keyword::Else)) {
            self.advance();
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self) -> PsResult<StmtKind> {
        self.advance(); // while
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StmtKind::While { cond, body })
    }

    fn parse_for(&mut self) -> PsResult<StmtKind> {
        self.advance(); // for
        let var = self.expect_ident("loop variable")?;
        self.expect(&Tok::Kw(Keyword::In))?;
        let iter = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StmtKind::For { var, iter, body })
    }

    fn parse_return(&mut self) -> PsResult<StmtKind> {
        self.advance(); // return
        let value = if self.check(&Tok::Newline) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_newline()?;
        Ok(StmtKind::Return(value))
    }

    fn parse_with_policy(&mut self) -> PsResult<StmtKind> {
        self.advance(); // with
        self.expect(&Tok::Kw(Keyword::Policy))?;
        let policy = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StmtKind::WithPolicy { policy, body })
    }

    fn parse_retry(&mut self) -> PsResult<StmtKind> {
        self.advance(); // retry
        let attempts = self.parse_expr()?;
        self.expect(&Tok::Kw(Keyword::Backoff))?;
        let backoff_ms = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StmtKind::Retry {
            attempts,
            backoff_ms,
            body,
        })
    }

    fn parse_timeout(&mut self) -> PsResult<StmtKind> {
        self.advance(); // timeout
        let ms = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StmtKind::Timeout { ms, body })
    }

    /// Bounded lookahead: an identifier followed by any run of `.field`
    /// and `[...]` tails and then `=` (outside brackets) is an assignment.
    fn looks_like_assignment(&self) -> bool {
        let Tok::Ident(_) = self.peek() else {
            return false;
        };
        let mut offset = 1;
        loop {
            match self.peek_at(offset) {
                Tok::Dot => {
                    if matches!(self.peek_at(offset + 1), Tok::Ident(_)) {
                        offset += 2;
                    } else {
                        return false;
                    }
                }
                Tok::LBracket => {
                    let mut depth = 1usize;
                    offset += 1;
                    while depth > 0 {
                        match self.peek_at(offset) {
                            Tok::LBracket => depth += 1,
                            Tok::RBracket => depth -= 1,
                            Tok::Newline | Tok::Eof => return false,
                            _ => {}
                        }
                        offset += 1;
                    }
                }
                Tok::Assign => return true,
                _ => return false,
            }
        }
    }

    fn parse_assignment(&mut self) -> PsResult<StmtKind> {
        let target = self.parse_assign_target()?;
        self.expect(&Tok::Assign)?;
        let value = self.parse_expr()?;
        self.expect_newline()?;
        Ok(StmtKind::Assign { target, value })
    }

    fn parse_assign_target(&mut self) -> PsResult<AssignTarget> {
        let line = self.line();
        let name = self.expect_ident("assignment target")?;
        let mut expr = Expr {
            kind: ExprKind::Var(name),
            line,
        };
        loop {
            if self.eat(&Tok::Dot) {
                let field = self.expect_ident("member name")?;
                expr = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(expr),
                        field,
                    },
                    line,
                };
            } else if self.eat(&Tok::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&Tok::RBracket)?;
                expr = Expr {
                    kind: ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                };
            } else {
                break;
            }
        }
        Ok(match expr.kind {
            ExprKind::Var(name) => AssignTarget::Var(name),
            ExprKind::Member { object, field } => AssignTarget::Member {
                object: *object,
                field,
            },
            ExprKind::Index { object, index } => AssignTarget::Index {
                object: *object,
                index: *index,
            },
            other => {
                return Err(PsError::parse(
                    line,
                    format!("invalid assignment target: {:?}", other),
                ));
            }
        })
    }

    /// `:` NEWLINE INDENT statement+ DEDENT
    fn parse_block(&mut self) -> PsResult<Vec<Stmt>> {
        self.expect(&Tok::Colon)?;
        self.expect(&Tok::Newline)?;
        if !self.eat(&Tok::Indent) {
            return Err(PsError::parse(self.line(), "expected an indented block"));
        }
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&Tok::Dedent) {
                break;
            }
            if self.check(&Tok::Eof) {
                return Err(PsError::parse(self.line(), "unterminated block"));
            }
            body.push(self.parse_statement()?);
        }
        if body.is_empty() {
            return Err(PsError::parse(self.line(), "empty block"));
        }
        Ok(body)
    }

    // -- expressions --------------------------------------------------------

    fn parse_expr(&mut self) -> PsResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PsResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.check(&Tok::Kw(Keyword::Or)) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_not()?;
            lhs = binary(BinOp::Or, lhs, rhs, line);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> PsResult<Expr> {
        if self.check(&Tok::Kw(Keyword::Not)) {
            let line = self.line();
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr {
                kind: ExprKind::Not(Box::new(inner)),
                line,
            });
        }
        self.parse_and()
    }

    fn parse_and(&mut self) -> PsResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.check(&Tok::Kw(Keyword::And)) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = binary(BinOp::And, lhs, rhs, line);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> PsResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinOp::Eq,
                Tok::NotEq => BinOp::Ne,
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                Tok::Kw(Keyword::In) => BinOp::In,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs, line);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PsResult<Expr> {
        let mut lhs = self.parse_postfix()?;
        while self.check(&Tok::Plus) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_postfix()?;
            lhs = binary(BinOp::Add, lhs, rhs, line);
        }
        Ok(lhs)
    }

    fn parse_postfix(&mut self) -> PsResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let line = self.line();
            if self.eat(&Tok::Dot) {
                let field = self.expect_ident("member name")?;
                expr = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(expr),
                        field,
                    },
                    line,
                };
            } else if self.eat(&Tok::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&Tok::RBracket)?;
                expr = Expr {
                    kind: ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                };
            } else if self.eat(&Tok::LParen) {
                let mut args = Vec::new();
                if !self.check(&Tok::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                        if self.check(&Tok::RParen) {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RParen)?;
                expr = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    line,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PsResult<Expr> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Int(value) => {
                self.advance();
                ExprKind::Int(value)
            }
            Tok::Str(value) => {
                self.advance();
                ExprKind::Str(value)
            }
            Tok::Kw(Keyword::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            Tok::Kw(Keyword::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            Tok::Kw(Keyword::Null) => {
                self.advance();
                ExprKind::Null
            }
            Tok::Ident(name) => {
                self.advance();
                ExprKind::Var(name)
            }
            Tok::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                return Ok(inner);
            }
            Tok::LBrace => {
                self.advance();
                return self.parse_object_literal(line);
            }
            Tok::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&Tok::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                        if self.check(&Tok::RBracket) {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RBracket)?;
                ExprKind::Array(items)
            }
            other => {
                return Err(PsError::parse(
                    line,
                    format!("unexpected {}", other.describe()),
                ));
            }
        };
        Ok(Expr { kind, line })
    }

    /// Keys may be bare identifiers (keywords allowed) or string literals;
    /// a trailing comma is permitted.
    fn parse_object_literal(&mut self, line: usize) -> PsResult<Expr> {
        let mut fields = Vec::new();
        if !self.check(&Tok::RBrace) {
            loop {
                let key = match self.peek().clone() {
                    Tok::Ident(name) => {
                        self.advance();
                        name
                    }
                    Tok::Str(text) => {
                        self.advance();
                        text
                    }
                    Tok::Kw(kw) => {
                        self.advance();
                        kw.as_str().to_string()
                    }
                    other => {
                        return Err(PsError::parse(
                            self.line(),
                            format!("expected object key, found {}", other.describe()),
                        ));
                    }
                };
                self.expect(&Tok::Colon)?;
                let value = self.parse_expr()?;
                fields.push((key, value));
                if !self.eat(&Tok::Comma) {
                    break;
                }
                if self.check(&Tok::RBrace) {
                    break;
                }
            }
        }
        self.expect(&Tok::RBrace)?;
        Ok(Expr {
            kind: ExprKind::Object(fields),
            line,
        })
    }

    // -- token cursor -------------------------------------------------------

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map_or(&Tok::Eof, |token| &token.tok)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map_or(&Tok::Eof, |token| &token.tok)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |token| token.line)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> PsResult<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(PsError::parse(
                self.line(),
                format!(
                    "expected {}, found {}",
                    tok.describe(),
                    self.peek().describe()
                ),
            ))
        }
    }

    fn expect_newline(&mut self) -> PsResult<()> {
        // EOF and DEDENT both end a statement.
        if self.check(&Tok::Eof) || self.check(&Tok::Dedent) {
            return Ok(());
        }
        self.expect(&Tok::Newline)
    }

    fn expect_ident(&mut self, what: &str) -> PsResult<String> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(PsError::parse(
                self.line(),
                format!("expected {what}, found {}", other.describe()),
            )),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&Tok::Newline) {
            self.advance();
        }
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr, line: usize) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        line,
    }
}
