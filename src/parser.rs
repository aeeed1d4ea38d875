//! Tokens → syntax tree.
//!
//! A Pratt parser for expressions with a switch-on-current-token
//! statement dispatch. Lookahead for the two ambiguous constructs
//! (function-definition-vs-call, array-assignment detection) works
//! against a fully buffered token slice rather than a snapshotable
//! lexer cursor.

use crate::ast::{DeclType, Expr, Param, Program, StepCommand, Stmt};
use crate::error::ParseError;
use crate::token::{Token, TokenKind};

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    errors: Vec<ParseError>,
}

/// Runs the parser to completion, accumulating every recoverable
/// error rather than aborting on the first one.
pub fn parse(tokens: &[Token]) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program();
    (program, parser.errors)
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn at_eof(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        tok
    }

    fn error(&mut self, message: impl Into<String>) {
        let tok = self.current();
        self.errors.push(ParseError {
            message: message.into(),
            line: tok.line,
            column: tok.column,
        });
    }

    fn expect(&mut self, kind: TokenKind) -> Token {
        if std::mem::discriminant(self.current_kind()) == std::mem::discriminant(&kind) {
            self.advance()
        } else {
            self.error(format!(
                "expected {:?}, found {:?}",
                kind,
                self.current_kind()
            ));
            self.current().clone()
        }
    }

    /// Scans forward from an opening-delimiter index to its matching
    /// closer, tracking nesting depth.
    fn find_matching(&self, open_idx: usize, open: &TokenKind, close: &TokenKind) -> Option<usize> {
        let mut depth = 0i32;
        let mut i = open_idx;
        while i < self.tokens.len() {
            let kind = &self.tokens[i].kind;
            if std::mem::discriminant(kind) == std::mem::discriminant(open) {
                depth += 1;
            } else if std::mem::discriminant(kind) == std::mem::discriminant(close) {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            } else if matches!(kind, TokenKind::Eof) {
                return None;
            }
            i += 1;
        }
        None
    }

    /// Skips to the next plausible statement boundary after an
    /// unrecoverable error.
    fn synchronize(&mut self) {
        while !self.at_eof() {
            match self.current_kind() {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RBrace => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut items = Vec::new();
        while !self.at_eof() {
            if matches!(self.current_kind(), TokenKind::Semicolon) {
                self.advance();
                continue;
            }
            items.push(self.parse_statement());
        }
        Program { items }
    }

    fn parse_block(&mut self) -> Vec<Stmt> {
        self.expect(TokenKind::LBrace);
        let mut body = Vec::new();
        while !self.at_eof() && !matches!(self.current_kind(), TokenKind::RBrace) {
            if matches!(self.current_kind(), TokenKind::Semicolon) {
                self.advance();
                continue;
            }
            body.push(self.parse_statement());
        }
        self.expect(TokenKind::RBrace);
        body
    }

    fn parse_statement(&mut self) -> Stmt {
        match self.current_kind().clone() {
            TokenKind::KwInt | TokenKind::KwStr | TokenKind::KwReal => self.parse_typed_decl(),
            TokenKind::KwFunction => {
                self.advance();
                self.parse_function_def()
            }
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwDo => self.parse_do_while(),
            TokenKind::KwSwitch => self.parse_switch(),
            TokenKind::KwBreak => {
                let token = self.advance();
                self.expect(TokenKind::Semicolon);
                Stmt::Break { token }
            }
            TokenKind::KwContinue => {
                let token = self.advance();
                self.expect(TokenKind::Semicolon);
                Stmt::Continue { token }
            }
            TokenKind::KwReturn => {
                let token = self.advance();
                let value = if matches!(self.current_kind(), TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression(0))
                };
                self.expect(TokenKind::Semicolon);
                Stmt::Return { value, token }
            }
            TokenKind::KwMes => self.parse_mes(),
            TokenKind::KwStep => self.parse_step(),
            TokenKind::KwDelMe => self.parse_pseudo_call("del_me"),
            TokenKind::KwDelUs => self.parse_pseudo_call("del_us"),
            TokenKind::KwDelAll => self.parse_pseudo_call("del_all"),
            TokenKind::KwEndStep => self.parse_pseudo_call("end_step"),
            TokenKind::LBrace => {
                let token = self.current().clone();
                let body = self.parse_block();
                Stmt::Block { body, token }
            }
            TokenKind::Ident => self.parse_ident_statement(),
            TokenKind::Info => {
                let token = self.advance();
                let (key, value) = split_once_ws(&token.text);
                Stmt::Info { key, value, token }
            }
            TokenKind::Include => {
                let token = self.advance();
                let path = strip_quotes(token.text.trim());
                Stmt::Include { path, token }
            }
            TokenKind::Define => {
                let token = self.advance();
                let (name, value) = split_once_ws(&token.text);
                Stmt::Define { name, value, token }
            }
            other => {
                self.error(format!("unexpected token {:?}", other));
                let token = self.current().clone();
                self.synchronize();
                Stmt::ExprStmt {
                    expr: Expr::Int { value: 0, token: token.clone() },
                    token,
                }
            }
        }
    }

    fn parse_pseudo_call(&mut self, name: &str) -> Stmt {
        let token = self.advance();
        if matches!(self.current_kind(), TokenKind::LParen) {
            self.advance();
            self.expect(TokenKind::RParen);
        }
        self.expect(TokenKind::Semicolon);
        Stmt::ExprStmt {
            expr: Expr::Call {
                name: name.to_string(),
                args: vec![],
                token: token.clone(),
            },
            token,
        }
    }

    fn decl_type_from(kind: &TokenKind) -> DeclType {
        match kind {
            TokenKind::KwStr => DeclType::Str,
            TokenKind::KwReal => DeclType::Real,
            _ => DeclType::Int,
        }
    }

    fn parse_typed_decl(&mut self) -> Stmt {
        let decl_type = Self::decl_type_from(self.current_kind());
        let token = self.advance();
        let name_token = self.expect(TokenKind::Ident);
        let name = name_token.text;

        if matches!(self.current_kind(), TokenKind::LParen) {
            return self.parse_function_def_named(name, token);
        }

        let mut is_array = false;
        let mut size = None;
        if matches!(self.current_kind(), TokenKind::LBracket) {
            self.advance();
            is_array = true;
            if !matches!(self.current_kind(), TokenKind::RBracket) {
                size = Some(self.parse_expression(0));
            }
            self.expect(TokenKind::RBracket);
        }
        self.expect(TokenKind::Semicolon);
        Stmt::VarDecl {
            name,
            decl_type,
            is_array,
            size,
            token,
        }
    }

    fn parse_function_def(&mut self) -> Stmt {
        let token = self.current().clone();
        let name = self.expect(TokenKind::Ident).text;
        self.parse_function_def_named(name, token)
    }

    fn parse_function_def_named(&mut self, name: String, token: Token) -> Stmt {
        self.expect(TokenKind::LParen);
        let mut params = Vec::new();
        while !self.at_eof() && !matches!(self.current_kind(), TokenKind::RParen) {
            params.push(self.parse_param());
            if matches!(self.current_kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen);
        let body = self.parse_block();
        Stmt::FunctionDef {
            name,
            params,
            body,
            token,
        }
    }

    fn parse_param(&mut self) -> Param {
        let decl_type = match self.current_kind() {
            TokenKind::KwInt | TokenKind::KwStr | TokenKind::KwReal => {
                Some(Self::decl_type_from(self.current_kind()))
            }
            _ => None,
        };
        if decl_type.is_some() {
            self.advance();
        }
        let name = self.expect(TokenKind::Ident).text;
        let is_array = if matches!(self.current_kind(), TokenKind::LBracket) {
            self.advance();
            self.expect(TokenKind::RBracket);
            true
        } else {
            false
        };
        let default = if matches!(self.current_kind(), TokenKind::Assign) {
            self.advance();
            Some(self.parse_expression(0))
        } else {
            None
        };
        Param {
            name,
            decl_type,
            is_array,
            default,
        }
    }

    fn parse_if(&mut self) -> Stmt {
        let token = self.advance();
        self.expect(TokenKind::LParen);
        let cond = self.parse_expression(0);
        self.expect(TokenKind::RParen);
        let then_branch = self.parse_branch_body();
        let else_branch = if matches!(self.current_kind(), TokenKind::KwElse) {
            self.advance();
            if matches!(self.current_kind(), TokenKind::KwIf) {
                vec![self.parse_if()]
            } else {
                self.parse_branch_body()
            }
        } else {
            Vec::new()
        };
        Stmt::If {
            cond,
            then_branch,
            else_branch,
            token,
        }
    }

    /// Bodies of `if`/`for`/`while`/`do` accept either a brace block or
    /// a single statement.
    fn parse_branch_body(&mut self) -> Vec<Stmt> {
        if matches!(self.current_kind(), TokenKind::LBrace) {
            self.parse_block()
        } else {
            vec![self.parse_statement()]
        }
    }

    fn parse_for(&mut self) -> Stmt {
        let token = self.advance();
        self.expect(TokenKind::LParen);
        let init = if matches!(self.current_kind(), TokenKind::Semicolon) {
            self.advance();
            None
        } else {
            let s = self.parse_statement();
            Some(Box::new(s))
        };
        let cond = if matches!(self.current_kind(), TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression(0))
        };
        self.expect(TokenKind::Semicolon);
        let post = if matches!(self.current_kind(), TokenKind::RParen) {
            None
        } else {
            Some(Box::new(self.parse_for_post()))
        };
        self.expect(TokenKind::RParen);
        let body = self.parse_branch_body();
        Stmt::For {
            init,
            cond,
            post,
            body,
            token,
        }
    }

    /// Parses a for-loop's `post` clause: the same assignment/call
    /// forms `parse_ident_statement` accepts, but terminated by the
    /// enclosing `)` instead of a `;`, so `for(i=0;i<10;next())` and
    /// `for(i=0;i<10;i=i+1)` both work.
    fn parse_for_post(&mut self) -> Stmt {
        let token = self.current().clone();

        if matches!(self.current_kind(), TokenKind::Ident) {
            if self.peek_kind(1) == Some(&TokenKind::LBracket) {
                let open = self.pos + 1;
                if let Some(close) =
                    self.find_matching(open, &TokenKind::LBracket, &TokenKind::RBracket)
                {
                    if self.tokens.get(close + 1).map(|t| &t.kind) == Some(&TokenKind::Assign) {
                        let target = self.parse_assignment_target();
                        self.expect(TokenKind::Assign);
                        let value = self.parse_expression(0);
                        return Stmt::Assign { target, value, token };
                    }
                }
            } else if self.peek_kind(1) == Some(&TokenKind::Assign) {
                let target = self.parse_assignment_target();
                self.expect(TokenKind::Assign);
                let value = self.parse_expression(0);
                return Stmt::Assign { target, value, token };
            }
        }

        let expr = self.parse_expression(0);
        Stmt::ExprStmt { expr, token }
    }

    fn parse_while(&mut self) -> Stmt {
        let token = self.advance();
        self.expect(TokenKind::LParen);
        let cond = self.parse_expression(0);
        self.expect(TokenKind::RParen);
        let body = self.parse_branch_body();
        Stmt::While { cond, body, token }
    }

    fn parse_do_while(&mut self) -> Stmt {
        let token = self.advance();
        let body = self.parse_branch_body();
        self.expect(TokenKind::KwWhile);
        self.expect(TokenKind::LParen);
        let cond = self.parse_expression(0);
        self.expect(TokenKind::RParen);
        self.expect(TokenKind::Semicolon);
        Stmt::DoWhile { cond, body, token }
    }

    fn parse_switch(&mut self) -> Stmt {
        let token = self.advance();
        self.expect(TokenKind::LParen);
        let value = self.parse_expression(0);
        self.expect(TokenKind::RParen);
        self.expect(TokenKind::LBrace);
        let mut cases = Vec::new();
        let mut default = None;
        while !self.at_eof() && !matches!(self.current_kind(), TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::KwCase => {
                    self.advance();
                    let case_value = self.parse_expression(0);
                    self.expect(TokenKind::Colon);
                    let body = self.parse_case_body();
                    cases.push((case_value, body));
                }
                TokenKind::KwDefault => {
                    self.advance();
                    self.expect(TokenKind::Colon);
                    default = Some(self.parse_case_body());
                }
                _ => {
                    self.error("expected 'case' or 'default' in switch body");
                    self.synchronize();
                }
            }
        }
        self.expect(TokenKind::RBrace);
        Stmt::Switch {
            value,
            cases,
            default,
            token,
        }
    }

    /// Case bodies run until the next `case`/`default`/`}`; no
    /// implicit `break` is inserted. Case bodies fall through to the
    /// next case, matching C switch semantics.
    fn parse_case_body(&mut self) -> Vec<Stmt> {
        let mut body = Vec::new();
        while !self.at_eof()
            && !matches!(
                self.current_kind(),
                TokenKind::KwCase | TokenKind::KwDefault | TokenKind::RBrace
            )
        {
            if matches!(self.current_kind(), TokenKind::Semicolon) {
                self.advance();
                continue;
            }
            body.push(self.parse_statement());
        }
        body
    }

    fn parse_mes(&mut self) -> Stmt {
        let token = self.advance();
        self.expect(TokenKind::LParen);
        let event_tok = self.current().clone();
        let event = match crate::token::event_name(&event_tok.kind) {
            Some(name) => name.to_string(),
            None => {
                if matches!(event_tok.kind, TokenKind::Ident) {
                    event_tok.text.to_ascii_uppercase()
                } else {
                    self.error("expected event name in mes(...)");
                    "UNKNOWN".to_string()
                }
            }
        };
        self.advance();
        self.expect(TokenKind::RParen);
        let body = self.parse_block();
        Stmt::Mes { event, body, token }
    }

    fn parse_step(&mut self) -> Stmt {
        let token = self.advance();
        let count = if matches!(self.current_kind(), TokenKind::LParen) {
            self.advance();
            let c = self.parse_expression(0);
            self.expect(TokenKind::RParen);
            Some(c)
        } else {
            None
        };
        self.expect(TokenKind::LBrace);
        let commands = self.parse_step_body();
        Stmt::Step {
            count,
            commands,
            token,
        }
    }

    /// Step-body comma grammar.
    fn parse_step_body(&mut self) -> Vec<StepCommand> {
        let mut commands = Vec::new();
        let mut end_seen = false;

        loop {
            if matches!(self.current_kind(), TokenKind::RBrace) {
                self.advance();
                break;
            }

            if !end_seen && matches!(self.current_kind(), TokenKind::Comma) {
                let mut lead = 0u32;
                while matches!(self.current_kind(), TokenKind::Comma) {
                    self.advance();
                    lead += 1;
                }
                commands.push(StepCommand {
                    stmt: None,
                    wait_count: lead,
                });
                continue;
            }

            if matches!(self.current_kind(), TokenKind::RBrace) {
                self.advance();
                break;
            }

            if matches!(self.current_kind(), TokenKind::KwEndStep) {
                self.advance();
                if matches!(self.current_kind(), TokenKind::LParen) {
                    self.advance();
                    self.expect(TokenKind::RParen);
                }
                if matches!(self.current_kind(), TokenKind::Semicolon) {
                    self.advance();
                }
                end_seen = true;
                continue;
            }

            let stmt = self.parse_statement();
            let mut trail = 0u32;
            if !end_seen {
                while matches!(self.current_kind(), TokenKind::Comma) {
                    self.advance();
                    trail += 1;
                }
            }
            commands.push(StepCommand {
                stmt: Some(Box::new(stmt)),
                wait_count: trail,
            });
        }

        commands
    }

    /// Parses an identifier statement: label, function definition,
    /// call, simple assignment, array assignment, or a bare expression
    /// statement.
    fn parse_ident_statement(&mut self) -> Stmt {
        let token = self.current().clone();

        if self.peek_kind(1) == Some(&TokenKind::Colon) {
            self.advance();
            self.advance();
            return Stmt::Label {
                name: token.text.clone(),
                token,
            };
        }

        if self.peek_kind(1) == Some(&TokenKind::LParen) {
            let open = self.pos + 1;
            if let Some(close) =
                self.find_matching(open, &TokenKind::LParen, &TokenKind::RParen)
            {
                if self.tokens.get(close + 1).map(|t| &t.kind) == Some(&TokenKind::LBrace) {
                    return self.parse_function_def();
                }
            }
            let expr = self.parse_expression(0);
            self.expect(TokenKind::Semicolon);
            return Stmt::ExprStmt { expr, token };
        }

        if self.peek_kind(1) == Some(&TokenKind::LBracket) {
            let open = self.pos + 1;
            if let Some(close) =
                self.find_matching(open, &TokenKind::LBracket, &TokenKind::RBracket)
            {
                if self.tokens.get(close + 1).map(|t| &t.kind) == Some(&TokenKind::Assign) {
                    let target = self.parse_assignment_target();
                    self.expect(TokenKind::Assign);
                    let value = self.parse_expression(0);
                    self.expect(TokenKind::Semicolon);
                    return Stmt::Assign {
                        target,
                        value,
                        token,
                    };
                }
            }
            let expr = self.parse_expression(0);
            self.expect(TokenKind::Semicolon);
            return Stmt::ExprStmt { expr, token };
        }

        if self.peek_kind(1) == Some(&TokenKind::Assign) {
            let target = self.parse_assignment_target();
            self.expect(TokenKind::Assign);
            let value = self.parse_expression(0);
            self.expect(TokenKind::Semicolon);
            return Stmt::Assign {
                target,
                value,
                token,
            };
        }

        let expr = self.parse_expression(0);
        self.expect(TokenKind::Semicolon);
        Stmt::ExprStmt { expr, token }
    }

    /// Parses an assignment target (`ident` or `ident[expr]`) without
    /// ever treating `=` as the comparison/infix operator: the
    /// suppression an assignment target requires.
    fn parse_assignment_target(&mut self) -> Expr {
        let token = self.advance(); // ident
        let name = token.text.clone();
        if matches!(self.current_kind(), TokenKind::LBracket) {
            self.advance();
            let index = self.parse_expression(0);
            self.expect(TokenKind::RBracket);
            Expr::Index {
                name,
                index: Box::new(index),
                token,
            }
        } else {
            Expr::Ident { name, token }
        }
    }

    fn infix_precedence(kind: &TokenKind) -> u8 {
        match kind {
            TokenKind::OrOr => 1,
            TokenKind::AndAnd => 2,
            TokenKind::Eq | TokenKind::NotEq | TokenKind::Assign => 3,
            TokenKind::Lt | TokenKind::Gt | TokenKind::LtEq | TokenKind::GtEq => 4,
            TokenKind::Plus | TokenKind::Minus => 5,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 6,
            _ => 0,
        }
    }

    fn op_str(kind: &TokenKind) -> &'static str {
        match kind {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Eq => "==",
            // `=` parsed as a comparison still has to emit
            // one of §6.3's canonical operator strings.
            TokenKind::Assign => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            _ => "?",
        }
    }

    pub fn parse_expression(&mut self, min_prec: u8) -> Expr {
        let mut left = self.parse_prefix();
        loop {
            let prec = Self::infix_precedence(self.current_kind());
            if prec == 0 || prec < min_prec {
                break;
            }
            let op_token = self.current().clone();
            let op = Self::op_str(&op_token.kind);
            self.advance();
            let right = self.parse_expression(prec + 1);
            left = Expr::Infix {
                op,
                left: Box::new(left),
                right: Box::new(right),
                token: op_token,
            };
        }
        left
    }

    fn parse_prefix(&mut self) -> Expr {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_expression(7);
                Expr::Prefix {
                    op: "-",
                    operand: Box::new(operand),
                    token,
                }
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_expression(7);
                Expr::Prefix {
                    op: "!",
                    operand: Box::new(operand),
                    token,
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression(0);
                self.expect(TokenKind::RParen);
                inner
            }
            TokenKind::Int(v) => {
                let value = *v;
                self.advance();
                Expr::Int { value, token }
            }
            TokenKind::Float(v) => {
                let value = *v;
                self.advance();
                Expr::Float { value, token }
            }
            TokenKind::Str(s) => {
                let value = s.clone();
                self.advance();
                Expr::Str { value, token }
            }
            TokenKind::Ident => self.parse_ident_expr(),
            TokenKind::KwDelMe | TokenKind::KwDelUs | TokenKind::KwDelAll | TokenKind::KwEndStep => {
                let name = match token.kind {
                    TokenKind::KwDelMe => "del_me",
                    TokenKind::KwDelUs => "del_us",
                    TokenKind::KwDelAll => "del_all",
                    _ => "end_step",
                };
                self.advance();
                if matches!(self.current_kind(), TokenKind::LParen) {
                    self.advance();
                    self.expect(TokenKind::RParen);
                }
                Expr::Call {
                    name: name.to_string(),
                    args: vec![],
                    token,
                }
            }
            other => {
                self.error(format!("unexpected token {:?} in expression", other));
                self.advance();
                Expr::Int { value: 0, token }
            }
        }
    }

    /// Identifier in expression position: bare name, index (`a[i]`),
    /// bare array reference (`a[]`), or call (`f(...)`).
    fn parse_ident_expr(&mut self) -> Expr {
        let token = self.advance();
        let name = token.text.clone();

        if matches!(self.current_kind(), TokenKind::LParen) {
            self.advance();
            let mut args = Vec::new();
            while !self.at_eof() && !matches!(self.current_kind(), TokenKind::RParen) {
                args.push(self.parse_expression(0));
                if matches!(self.current_kind(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::RParen);
            return Expr::Call { name, args, token };
        }

        if matches!(self.current_kind(), TokenKind::LBracket) {
            if self.peek_kind(1) == Some(&TokenKind::RBracket) {
                self.advance();
                self.advance();
                return Expr::ArrayRef { name, token };
            }
            self.advance();
            let index = self.parse_expression(0);
            self.expect(TokenKind::RBracket);
            return Expr::Index {
                name,
                index: Box::new(index),
                token,
            };
        }

        Expr::Ident { name, token }
    }
}

fn split_once_ws(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let key = parts.next().unwrap_or("").to_string();
    let value = strip_quotes(parts.next().unwrap_or("").trim());
    (key, value)
}

fn strip_quotes(s: &str) -> String {
    if let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        inner.to_string()
    } else if let Some(inner) = s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        inner.to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize_all;

    fn parse_src(src: &str) -> (Program, Vec<ParseError>) {
        let (tokens, lex_errors) = tokenize_all(src);
        assert!(lex_errors.is_empty(), "unexpected lex errors: {:?}", lex_errors);
        parse(&tokens)
    }

    #[test]
    fn case_insensitive_mes() {
        let (program, errors) = parse_src("MES (time) {}");
        assert!(errors.is_empty());
        match &program.items[0] {
            Stmt::Mes { event, body, .. } => {
                assert_eq!(event, "TIME");
                assert!(body.is_empty());
            }
            other => panic!("expected Mes, got {:?}", other),
        }
    }

    #[test]
    fn function_call_vs_definition() {
        let (program, errors) = parse_src("foo(1,2);");
        assert!(errors.is_empty());
        match &program.items[0] {
            Stmt::ExprStmt { expr: Expr::Call { name, args, .. }, .. } => {
                assert_eq!(name, "foo");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }

        let (program, errors) = parse_src("foo(a,b){x=a+b;}");
        assert!(errors.is_empty());
        match &program.items[0] {
            Stmt::FunctionDef { name, params, body, .. } => {
                assert_eq!(name, "foo");
                assert_eq!(params.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected function def, got {:?}", other),
        }
    }

    #[test]
    fn default_parameter() {
        let (program, errors) = parse_src("OP_walk(c,p[],x,y,w,h,l=10){}");
        assert!(errors.is_empty());
        match &program.items[0] {
            Stmt::FunctionDef { params, .. } => {
                let l = params.last().unwrap();
                assert_eq!(l.name, "l");
                assert!(matches!(l.default, Some(Expr::Int { value: 10, .. })));
                assert!(!l.is_array);
                assert!(params[1].is_array);
            }
            other => panic!("expected function def, got {:?}", other),
        }
    }

    #[test]
    fn array_assignment_with_expression_index() {
        let (program, errors) = parse_src("LPic[i+1] = LoadPic(\"X.BMP\");");
        assert!(errors.is_empty());
        match &program.items[0] {
            Stmt::Assign { target, value, .. } => {
                assert!(matches!(target, Expr::Index { name, .. } if name == "LPic"));
                assert!(matches!(value, Expr::Call { name, .. } if name == "LoadPic"));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn if_else_if_chain() {
        let (program, errors) = parse_src("if (x>10) y=1; else if (x>5) y=2; else y=3;");
        assert!(errors.is_empty());
        match &program.items[0] {
            Stmt::If { else_branch, .. } => {
                assert_eq!(else_branch.len(), 1);
                assert!(matches!(else_branch[0], Stmt::If { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn step_body_comma_counts() {
        let (program, errors) = parse_src("step(10){func1();, func2();,, end_step; del_me; }");
        assert!(errors.is_empty());
        match &program.items[0] {
            Stmt::Step { count, commands, .. } => {
                assert!(matches!(count, Some(Expr::Int { value: 10, .. })));
                assert_eq!(commands.len(), 3);
                assert_eq!(commands[0].wait_count, 1);
                assert_eq!(commands[1].wait_count, 2);
                assert_eq!(commands[2].wait_count, 0);
            }
            other => panic!("expected step, got {:?}", other),
        }
    }

    #[test]
    fn label_is_preserved() {
        let (program, errors) = parse_src("top: x = 1;");
        assert!(errors.is_empty());
        assert!(matches!(program.items[0], Stmt::Label { .. }));
    }

    #[test]
    fn empty_program_has_no_errors() {
        let (program, errors) = parse_src("");
        assert!(errors.is_empty());
        assert!(program.items.is_empty());
    }

    #[test]
    fn for_post_can_be_a_call() {
        let (program, errors) = parse_src("for(i=0;i<10;next()){ x=1; }");
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
        match &program.items[0] {
            Stmt::For { post, .. } => match post.as_deref() {
                Some(Stmt::ExprStmt { expr: Expr::Call { name, .. }, .. }) => {
                    assert_eq!(name, "next");
                }
                other => panic!("expected post to be a call expr stmt, got {:?}", other),
            },
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn for_post_can_still_be_an_assignment() {
        let (program, errors) = parse_src("for(i=0;i<10;i=i+1){ x=1; }");
        assert!(errors.is_empty());
        match &program.items[0] {
            Stmt::For { post, .. } => {
                assert!(matches!(post.as_deref(), Some(Stmt::Assign { .. })));
            }
            other => panic!("expected for, got {:?}", other),
        }
    }
}
