// Recursive-descent parser for the Lua 5.4 grammar, producing the AST in
// ast.rs. Errors carry the offending token for `near '<tok>'` rendering.

use smol_str::SmolStr;

use super::ast::*;
use super::token::{Literal, Token, TokenKind};
use super::SyntaxError;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse_chunk(mut self) -> Result<Block, SyntaxError> {
        let block = self.parse_block()?;
        self.expect(TokenKind::Eof, "<eof>")?;
        Ok(block)
    }

    // token plumbing

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> TokenKind {
        self.current().kind
    }

    fn line(&self) -> u32 {
        self.current().line
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, SyntaxError> {
        if self.kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("'{}' expected", what)))
        }
    }

    fn expect_name(&mut self) -> Result<SmolStr, SyntaxError> {
        if self.kind() == TokenKind::Name {
            Ok(self.advance().lexeme)
        } else {
            Err(self.error_here("<name> expected"))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.current();
        SyntaxError {
            message: message.into(),
            near: token.describe(),
            line: token.line,
        }
    }

    // statements

    fn block_follows(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
                | TokenKind::Eof
        )
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let mut stats = Vec::new();
        loop {
            if self.block_follows() {
                return Ok(Block { stats });
            }
            if self.kind() == TokenKind::Return {
                stats.push(self.parse_return()?);
                return Ok(Block { stats });
            }
            if let Some(stat) = self.parse_statement()? {
                stats.push(stat);
            }
        }
    }

    fn parse_return(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance(); // return
        let mut exprs = Vec::new();
        if !self.block_follows() && self.kind() != TokenKind::Semi {
            exprs = self.parse_expr_list()?;
        }
        self.accept(TokenKind::Semi);
        if !self.block_follows() {
            return Err(self.error_here("'end' expected"));
        }
        Ok(Stat::Return { exprs, line })
    }

    fn parse_statement(&mut self) -> Result<Option<Stat>, SyntaxError> {
        let line = self.line();
        match self.kind() {
            TokenKind::Semi => {
                self.advance();
                Ok(None)
            }
            TokenKind::If => self.parse_if().map(Some),
            TokenKind::While => self.parse_while().map(Some),
            TokenKind::Do => {
                self.advance();
                let body = self.parse_block()?;
                self.expect(TokenKind::End, "end")?;
                Ok(Some(Stat::Do { body }))
            }
            TokenKind::For => self.parse_for().map(Some),
            TokenKind::Repeat => self.parse_repeat().map(Some),
            TokenKind::Function => self.parse_function_stat().map(Some),
            TokenKind::Local => self.parse_local().map(Some),
            TokenKind::DoubleColon => {
                self.advance();
                let name = self.expect_name()?;
                self.expect(TokenKind::DoubleColon, "::")?;
                Ok(Some(Stat::Label { name, line }))
            }
            TokenKind::Break => {
                self.advance();
                Ok(Some(Stat::Break { line }))
            }
            TokenKind::Goto => {
                self.advance();
                let label = self.expect_name()?;
                Ok(Some(Stat::Goto { label, line }))
            }
            _ => self.parse_expr_stat().map(Some),
        }
    }

    fn parse_if(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance(); // if
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Then, "then")?;
        arms.push((cond, self.parse_block()?));
        let mut else_block = None;
        loop {
            match self.kind() {
                TokenKind::Elseif => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    self.expect(TokenKind::Then, "then")?;
                    arms.push((cond, self.parse_block()?));
                }
                TokenKind::Else => {
                    self.advance();
                    else_block = Some(self.parse_block()?);
                    self.expect(TokenKind::End, "end")?;
                    break;
                }
                TokenKind::End => {
                    self.advance();
                    break;
                }
                _ => return Err(self.error_here("'end' expected")),
            }
        }
        Ok(Stat::If {
            arms,
            else_block,
            line,
        })
    }

    fn parse_while(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance(); // while
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Do, "do")?;
        let body = self.parse_block()?;
        self.expect(TokenKind::End, "end")?;
        Ok(Stat::While { cond, body, line })
    }

    fn parse_repeat(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance(); // repeat
        let body = self.parse_block()?;
        self.expect(TokenKind::Until, "until")?;
        let cond = self.parse_expr()?;
        Ok(Stat::Repeat { body, cond, line })
    }

    fn parse_for(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance(); // for
        let first = self.expect_name()?;
        if self.accept(TokenKind::Assign) {
            let start = self.parse_expr()?;
            self.expect(TokenKind::Comma, ",")?;
            let limit = self.parse_expr()?;
            let step = if self.accept(TokenKind::Comma) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(TokenKind::Do, "do")?;
            let body = self.parse_block()?;
            self.expect(TokenKind::End, "end")?;
            return Ok(Stat::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
                line,
            });
        }
        let mut names = vec![first];
        while self.accept(TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        self.expect(TokenKind::In, "in")?;
        let exprs = self.parse_expr_list()?;
        self.expect(TokenKind::Do, "do")?;
        let body = self.parse_block()?;
        self.expect(TokenKind::End, "end")?;
        Ok(Stat::GenericFor {
            names,
            exprs,
            body,
            line,
        })
    }

    fn parse_function_stat(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance(); // function
        let mut path = vec![self.expect_name()?];
        let mut is_method = false;
        loop {
            if self.accept(TokenKind::Dot) {
                path.push(self.expect_name()?);
            } else if self.accept(TokenKind::Colon) {
                path.push(self.expect_name()?);
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let display = path.join(if is_method { ":" } else { "." });
        let mut body = self.parse_func_body(line)?;
        if is_method {
            body.params.insert(0, SmolStr::new("self"));
        }
        body.name = Some(display);
        Ok(Stat::Function {
            path,
            is_method,
            body,
            line,
        })
    }

    fn parse_local(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        self.advance(); // local
        if self.accept(TokenKind::Function) {
            let name = self.expect_name()?;
            let mut body = self.parse_func_body(line)?;
            body.name = Some(name.to_string());
            return Ok(Stat::LocalFunction { name, body, line });
        }
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let attrib = if self.accept(TokenKind::Lt) {
                let attrib_name = self.expect_name()?;
                let attrib = match attrib_name.as_str() {
                    "const" => Attrib::Const,
                    "close" => Attrib::Close,
                    other => {
                        return Err(self.error_here(format!("unknown attribute '{}'", other)));
                    }
                };
                self.expect(TokenKind::Gt, ">")?;
                attrib
            } else {
                Attrib::None
            };
            names.push((name, attrib));
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        let values = if self.accept(TokenKind::Assign) {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stat::Local {
            names,
            values,
            line,
        })
    }

    fn parse_expr_stat(&mut self) -> Result<Stat, SyntaxError> {
        let line = self.line();
        let first = self.parse_suffixed_expr()?;
        if self.kind() == TokenKind::Assign || self.kind() == TokenKind::Comma {
            let mut targets = vec![first];
            while self.accept(TokenKind::Comma) {
                targets.push(self.parse_suffixed_expr()?);
            }
            for target in &targets {
                if !matches!(target, Expr::Name(..) | Expr::Index { .. }) {
                    return Err(self.error_here("syntax error"));
                }
            }
            self.expect(TokenKind::Assign, "=")?;
            let values = self.parse_expr_list()?;
            return Ok(Stat::Assign {
                targets,
                values,
                line,
            });
        }
        if !matches!(first, Expr::Call { .. } | Expr::MethodCall { .. }) {
            return Err(self.error_here("syntax error"));
        }
        Ok(Stat::ExprStat { expr: first, line })
    }

    // expressions

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.accept(TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary(0)
    }

    /// Precedence climbing; (left, right) binding powers per the manual.
    fn parse_binary(&mut self, limit: u8) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let mut lhs = if let Some(op) = unary_op(self.kind()) {
            self.advance();
            // unary operators bind at level 12, below '^'
            let operand = self.parse_binary(12)?;
            Expr::UnOp {
                op,
                operand: Box::new(operand),
                line,
            }
        } else {
            self.parse_simple_expr()?
        };
        while let Some((op, left_bp, right_bp)) = binary_op(self.kind()) {
            if left_bp <= limit {
                break;
            }
            let op_line = self.line();
            self.advance();
            let rhs = self.parse_binary(right_bp)?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line: op_line,
            };
        }
        Ok(lhs)
    }

    fn parse_simple_expr(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        match self.kind() {
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil(line))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::True(line))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::False(line))
            }
            TokenKind::Number => {
                let token = self.advance();
                match token.literal {
                    Some(Literal::Integer(i)) => Ok(Expr::Integer(i, line)),
                    Some(Literal::Float(f)) => Ok(Expr::Float(f, line)),
                    _ => Err(self.error_here("malformed number")),
                }
            }
            TokenKind::StringLit => {
                let token = self.advance();
                match token.literal {
                    Some(Literal::Bytes(bytes)) => Ok(Expr::Str(bytes, line)),
                    _ => Err(self.error_here("malformed string")),
                }
            }
            TokenKind::Ellipsis => {
                self.advance();
                Ok(Expr::Vararg(line))
            }
            TokenKind::Function => {
                self.advance();
                let body = self.parse_func_body(line)?;
                Ok(Expr::Function(body))
            }
            TokenKind::LBrace => self.parse_table(),
            _ => self.parse_suffixed_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        match self.kind() {
            TokenKind::Name => {
                let name = self.advance().lexeme;
                Ok(Expr::Name(name, line))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            _ => Err(self.error_here("unexpected symbol")),
        }
    }

    fn parse_suffixed_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            let line = self.line();
            match self.kind() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_name()?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(Expr::Str(name.as_bytes().to_vec(), line)),
                        line,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "]")?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(key),
                        line,
                    };
                }
                TokenKind::Colon => {
                    self.advance();
                    let method = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    expr = Expr::MethodCall {
                        obj: Box::new(expr),
                        method,
                        args,
                        line,
                    };
                }
                TokenKind::LParen | TokenKind::StringLit | TokenKind::LBrace => {
                    let args = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        line,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let line = self.line();
        match self.kind() {
            TokenKind::LParen => {
                self.advance();
                let args = if self.kind() == TokenKind::RParen {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect(TokenKind::RParen, ")")?;
                Ok(args)
            }
            TokenKind::StringLit => {
                let token = self.advance();
                match token.literal {
                    Some(Literal::Bytes(bytes)) => Ok(vec![Expr::Str(bytes, line)]),
                    _ => Err(self.error_here("malformed string")),
                }
            }
            TokenKind::LBrace => Ok(vec![self.parse_table()?]),
            _ => Err(self.error_here("function arguments expected")),
        }
    }

    fn parse_table(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        self.expect(TokenKind::LBrace, "{")?;
        let mut items = Vec::new();
        while self.kind() != TokenKind::RBrace {
            match self.kind() {
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "]")?;
                    self.expect(TokenKind::Assign, "=")?;
                    let value = self.parse_expr()?;
                    items.push(TableItem::Keyed(key, value));
                }
                TokenKind::Name if self.tokens.get(self.pos + 1).map(|t| t.kind) == Some(TokenKind::Assign) => {
                    let name = self.advance().lexeme;
                    self.advance(); // =
                    let value = self.parse_expr()?;
                    items.push(TableItem::Named(name, value));
                }
                _ => {
                    items.push(TableItem::Positional(self.parse_expr()?));
                }
            }
            if !self.accept(TokenKind::Comma) && !self.accept(TokenKind::Semi) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "}")?;
        Ok(Expr::Table { items, line })
    }

    fn parse_func_body(&mut self, line: u32) -> Result<FuncBody, SyntaxError> {
        self.expect(TokenKind::LParen, "(")?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if self.kind() != TokenKind::RParen {
            loop {
                match self.kind() {
                    TokenKind::Name => params.push(self.advance().lexeme),
                    TokenKind::Ellipsis => {
                        self.advance();
                        is_vararg = true;
                        break;
                    }
                    _ => return Err(self.error_here("<name> expected")),
                }
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        let block = self.parse_block()?;
        let end_line = self.line();
        self.expect(TokenKind::End, "end")?;
        Ok(FuncBody {
            params,
            is_vararg,
            block,
            line,
            end_line,
            name: None,
        })
    }
}

fn unary_op(kind: TokenKind) -> Option<UnOp> {
    Some(match kind {
        TokenKind::Minus => UnOp::Neg,
        TokenKind::Not => UnOp::Not,
        TokenKind::Hash => UnOp::Len,
        TokenKind::Tilde => UnOp::BNot,
        _ => return None,
    })
}

/// (operator, left binding power, right binding power); concat and `^` are
/// right-associative, encoded by a lower right power.
fn binary_op(kind: TokenKind) -> Option<(BinOp, u8, u8)> {
    Some(match kind {
        TokenKind::Or => (BinOp::Or, 1, 1),
        TokenKind::And => (BinOp::And, 2, 2),
        TokenKind::Lt => (BinOp::Lt, 3, 3),
        TokenKind::Gt => (BinOp::Gt, 3, 3),
        TokenKind::LtEq => (BinOp::Le, 3, 3),
        TokenKind::GtEq => (BinOp::Ge, 3, 3),
        TokenKind::NotEq => (BinOp::Ne, 3, 3),
        TokenKind::Eq => (BinOp::Eq, 3, 3),
        TokenKind::Pipe => (BinOp::BOr, 4, 4),
        TokenKind::Tilde => (BinOp::BXor, 5, 5),
        TokenKind::Ampersand => (BinOp::BAnd, 6, 6),
        TokenKind::Shl => (BinOp::Shl, 7, 7),
        TokenKind::Shr => (BinOp::Shr, 7, 7),
        TokenKind::Concat => (BinOp::Concat, 9, 8),
        TokenKind::Plus => (BinOp::Add, 10, 10),
        TokenKind::Minus => (BinOp::Sub, 10, 10),
        TokenKind::Star => (BinOp::Mul, 11, 11),
        TokenKind::Slash => (BinOp::Div, 11, 11),
        TokenKind::DoubleSlash => (BinOp::IDiv, 11, 11),
        TokenKind::Percent => (BinOp::Mod, 11, 11),
        TokenKind::Caret => (BinOp::Pow, 14, 13),
        _ => return None,
    })
}
