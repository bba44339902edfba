//! Recursive-descent parser producing the AST
//!
//! Statements are parsed top-down; binary expressions use precedence
//! climbing. Declarations and expression statements are told apart with a
//! bounded lookahead over the leading type path.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::*;
use crate::error::{CompileError, Result};
use crate::lexer::{Token, tokenize};

#[cfg(test)]
mod tests;

/// Parse tokens into AST
pub fn parse(tokens: Vec<(Token, Span)>, file: FileId) -> Result<Program> {
    Parser::new(tokens, file).program()
}

/// Tokenize and parse one source text
pub fn parse_source(source: &str, file: FileId) -> Result<Program> {
    let tokens = tokenize(source, file)?;
    parse(tokens, file)
}

/// Where a statement appears, which limits what it may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Global,
    Class,
    Local,
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    file: FileId,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>, file: FileId) -> Self {
        Self { tokens, pos: 0, file }
    }

    // ====================================================================
    // Token cursor
    // ====================================================================

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Span of the current token, or an empty span at the end of input
    fn span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => *span,
            None => {
                let end = self.tokens.last().map(|(_, s)| s.end).unwrap_or(0);
                Span::new(self.file, end, end)
            }
        }
    }

    fn prev_span(&self) -> Span {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some((_, span)) => *span,
            None => Span::new(self.file, 0, 0),
        }
    }

    /// Span from `start` through the last consumed token
    fn finish(&self, start: Span) -> Span {
        start.merge(self.prev_span())
    }

    fn bump(&mut self) -> Option<(Token, Span)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        let message = match self.peek() {
            Some(token) => format!("expected {expected}, found '{token}'"),
            None => format!("unexpected end of input, expected {expected}"),
        };
        CompileError::parse(message, self.span())
    }

    fn expect(&mut self, token: &Token, expected: &str) -> Result<Span> {
        if self.check(token) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn ident(&mut self, expected: &str) -> Result<Spanned<String>> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                let span = self.span();
                self.pos += 1;
                Ok(Spanned::new(name, span))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    // ====================================================================
    // Statements
    // ====================================================================

    fn program(&mut self) -> Result<Program> {
        let mut stmts = Vec::new();
        while !self.at_end() {
            stmts.push(self.statement(Context::Global)?);
        }
        Ok(Program { file: self.file, stmts })
    }

    fn statement(&mut self, ctx: Context) -> Result<Stmt> {
        let start = self.span();
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("a statement"));
        };

        match token {
            Token::Semi => {
                self.pos += 1;
                Ok(Stmt::Empty(start))
            }
            Token::Import | Token::Include => self.directive_or_prototype(ctx),
            Token::Class => {
                if ctx == Context::Local {
                    return Err(CompileError::parse(
                        "classes can only be declared at global or class scope",
                        start,
                    ));
                }
                Ok(Stmt::ClassDecl(Rc::new(self.class_decl()?)))
            }
            Token::Typedef => {
                if ctx == Context::Local {
                    return Err(CompileError::parse(
                        "typedefs can only be declared at global or class scope",
                        start,
                    ));
                }
                Ok(Stmt::Typedef(Rc::new(self.typedef()?)))
            }
            Token::Tilde if ctx == Context::Class => {
                self.pos += 1;
                let name = self.ident("a destructor name")?;
                let name = Spanned::new(format!("~{}", name.node), start.merge(name.span));
                Ok(Stmt::FnDecl(Rc::new(self.function_rest(start, None, name, false)?)))
            }
            Token::Ident(_) if ctx == Context::Class && self.peek_at(1) == Some(&Token::LParen) => {
                let name = self.ident("a constructor name")?;
                Ok(Stmt::FnDecl(Rc::new(self.function_rest(start, None, name, false)?)))
            }
            _ if self.is_declaration_start(self.pos) => self.declaration(ctx),
            _ if ctx == Context::Class => Err(self.unexpected("a member declaration")),
            Token::LBrace => Ok(Stmt::Block(self.block()?)),
            Token::If => self.if_stmt(),
            Token::While => self.while_stmt(),
            Token::Break => {
                self.pos += 1;
                self.expect(&Token::Semi, "';' after 'break'")?;
                Ok(Stmt::Break(self.finish(start)))
            }
            Token::Return => {
                self.pos += 1;
                let value = if self.check(&Token::Semi) { None } else { Some(self.expression()?) };
                self.expect(&Token::Semi, "';' after return value")?;
                Ok(Stmt::Return(ReturnStmt { value, span: self.finish(start) }))
            }
            _ => {
                let expr = self.expression()?;
                self.expect(&Token::Semi, "';' after expression")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Whether the tokens at `i` read as `type IDENT`
    fn is_declaration_start(&self, mut i: usize) -> bool {
        let tok = |i: usize| self.tokens.get(i).map(|(t, _)| t);
        match tok(i) {
            Some(
                Token::TyInt | Token::TyFloat | Token::TyString | Token::TyVoid | Token::Function,
            ) => {
                return true;
            }
            Some(Token::ColonColon) => i += 1,
            Some(Token::Ident(_)) => {}
            _ => return false,
        }
        if !matches!(tok(i), Some(Token::Ident(_))) {
            return false;
        }
        i += 1;
        while tok(i) == Some(&Token::Dot) && matches!(tok(i + 1), Some(Token::Ident(_))) {
            i += 2;
        }
        while tok(i) == Some(&Token::LBracket) && tok(i + 1) == Some(&Token::RBracket) {
            i += 2;
        }
        if tok(i) == Some(&Token::Ampersand) {
            i += 1;
        }
        matches!(tok(i), Some(Token::Ident(_)))
    }

    /// At `(` after a declared name: parameter list rather than constructor arguments
    fn looks_like_function(&self) -> bool {
        match self.peek_at(1) {
            Some(Token::RParen) => self.peek_at(2) == Some(&Token::LBrace),
            Some(_) => self.is_declaration_start(self.pos + 1),
            None => false,
        }
    }

    fn declaration(&mut self, ctx: Context) -> Result<Stmt> {
        let start = self.span();
        let ty = self.type_expr()?;
        let name = self.ident("a declaration name")?;
        if self.check(&Token::LParen) && self.looks_like_function() {
            if ctx == Context::Local {
                return Err(CompileError::parse(
                    "functions can only be defined at global or class scope",
                    name.span,
                ));
            }
            let decl = self.function_rest(start, Some(ty), name, false)?;
            return Ok(Stmt::FnDecl(Rc::new(decl)));
        }
        Ok(Stmt::VarDecl(Rc::new(self.var_rest(start, ty, name)?)))
    }

    fn var_rest(&mut self, start: Span, ty: TypeExpr, name: Spanned<String>) -> Result<VarDecl> {
        let mut decl = VarDecl::new(name, ty, start);
        while self.eat(&Token::LBracket) {
            if self.eat(&Token::RBracket) {
                decl.dims.push(None);
            } else {
                let size = self.expression()?;
                self.expect(&Token::RBracket, "']'")?;
                decl.dims.push(Some(size));
            }
        }
        if self.eat(&Token::Eq) {
            decl.init = Some(self.expression()?);
        } else if self.check(&Token::LParen) {
            decl.ctor_args = Some(self.arguments()?);
        }
        self.expect(&Token::Semi, "';' after declaration")?;
        decl.span = self.finish(start);
        Ok(decl)
    }

    fn function_rest(
        &mut self,
        start: Span,
        ret: Option<TypeExpr>,
        name: Spanned<String>,
        is_import: bool,
    ) -> Result<FnDecl> {
        self.expect(&Token::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(Rc::new(self.param()?));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')' after parameters")?;
        let body = if is_import {
            self.expect(&Token::Semi, "';' after imported prototype")?;
            None
        } else {
            Some(self.block()?)
        };
        Ok(FnDecl {
            name,
            ret,
            params,
            body,
            is_import,
            span: self.finish(start),
            owner: RefCell::new(None),
        })
    }

    fn param(&mut self) -> Result<VarDecl> {
        let start = self.span();
        let ty = self.type_expr()?;
        let name = self.ident("a parameter name")?;
        let mut decl = VarDecl::new(name, ty, start);
        while self.eat(&Token::LBracket) {
            self.expect(&Token::RBracket, "']' in parameter type")?;
            decl.dims.push(None);
        }
        if self.eat(&Token::Eq) {
            decl.init = Some(self.expression()?);
        }
        decl.storage.set(Storage::Param);
        decl.span = self.finish(start);
        Ok(decl)
    }

    fn directive_or_prototype(&mut self, ctx: Context) -> Result<Stmt> {
        let start = self.span();
        let kind = match self.bump() {
            Some((Token::Include, _)) => DirectiveKind::Include,
            _ => DirectiveKind::Import,
        };

        if let Some(Token::StringLit(target)) = self.peek() {
            let target = Spanned::new(target.clone(), self.span());
            if ctx != Context::Global {
                return Err(CompileError::parse(
                    "import and include are only allowed at global scope",
                    start,
                ));
            }
            self.pos += 1;
            self.expect(&Token::Semi, "';' after file name")?;
            return Ok(Stmt::Directive(Directive { kind, target, span: self.finish(start) }));
        }

        if kind == DirectiveKind::Include {
            return Err(self.unexpected("a file name after 'include'"));
        }
        if ctx == Context::Local {
            return Err(CompileError::parse(
                "native functions can only be imported at global or class scope",
                start,
            ));
        }
        let ty = self.type_expr()?;
        let name = self.ident("an imported function name")?;
        if !self.check(&Token::LParen) {
            return Err(self.unexpected("'(' after imported function name"));
        }
        Ok(Stmt::FnDecl(Rc::new(self.function_rest(start, Some(ty), name, true)?)))
    }

    fn class_decl(&mut self) -> Result<ClassDecl> {
        let start = self.expect(&Token::Class, "'class'")?;
        let name = self.ident("a class name")?;
        self.expect(&Token::LBrace, "'{' after class name")?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.unexpected("'}' to close the class body"));
            }
            body.push(self.statement(Context::Class)?);
        }
        self.pos += 1;
        self.eat(&Token::Semi);
        Ok(ClassDecl::new(name, body, self.finish(start)))
    }

    fn typedef(&mut self) -> Result<TypedefDecl> {
        let start = self.expect(&Token::Typedef, "'typedef'")?;
        let target = self.type_expr()?;
        let name = self.ident("a typedef name")?;
        self.expect(&Token::Semi, "';' after typedef")?;
        Ok(TypedefDecl { name, target, span: self.finish(start) })
    }

    fn block(&mut self) -> Result<Block> {
        let start = self.expect(&Token::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.statement(Context::Local)?);
        }
        self.pos += 1;
        Ok(Block { stmts, span: self.finish(start) })
    }

    /// Block, or a single statement wrapped into one
    fn body(&mut self) -> Result<Block> {
        if self.check(&Token::LBrace) {
            return self.block();
        }
        let stmt = self.statement(Context::Local)?;
        Ok(Block { span: stmt.span(), stmts: vec![stmt] })
    }

    fn if_stmt(&mut self) -> Result<Stmt> {
        let start = self.expect(&Token::If, "'if'")?;
        self.expect(&Token::LParen, "'(' after 'if'")?;
        let cond = self.expression()?;
        self.expect(&Token::RParen, "')' after condition")?;
        let then_branch = self.body()?;
        let else_branch = if self.eat(&Token::Else) { Some(self.body()?) } else { None };
        Ok(Stmt::If(IfStmt { cond, then_branch, else_branch, span: self.finish(start) }))
    }

    fn while_stmt(&mut self) -> Result<Stmt> {
        let start = self.expect(&Token::While, "'while'")?;
        self.expect(&Token::LParen, "'(' after 'while'")?;
        let cond = self.expression()?;
        self.expect(&Token::RParen, "')' after condition")?;
        let body = self.body()?;
        Ok(Stmt::While(WhileStmt { cond, body, span: self.finish(start) }))
    }

    // ====================================================================
    // Types
    // ====================================================================

    fn type_expr(&mut self) -> Result<TypeExpr> {
        let start = self.span();
        let kind = match self.peek() {
            Some(Token::TyInt) => {
                self.pos += 1;
                TypeExprKind::Int
            }
            Some(Token::TyFloat) => {
                self.pos += 1;
                TypeExprKind::Float
            }
            Some(Token::TyString) => {
                self.pos += 1;
                TypeExprKind::String
            }
            Some(Token::TyVoid) => {
                self.pos += 1;
                TypeExprKind::Void
            }
            Some(Token::Function) => {
                self.pos += 1;
                self.expect(&Token::Lt, "'<' after 'function'")?;
                let ret = self.type_expr()?;
                self.expect(&Token::LParen, "'(' in function type")?;
                let mut params = Vec::new();
                if !self.check(&Token::RParen) {
                    loop {
                        params.push(self.type_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen, "')' in function type")?;
                self.expect(&Token::Gt, "'>' to close function type")?;
                TypeExprKind::Function { ret: Box::new(ret), params }
            }
            Some(Token::ColonColon | Token::Ident(_)) => {
                let global = self.eat(&Token::ColonColon);
                let mut path = vec![self.ident("a type name")?];
                while self.check(&Token::Dot) {
                    self.pos += 1;
                    path.push(self.ident("a type name after '.'")?);
                }
                TypeExprKind::Named { global, path }
            }
            _ => return Err(self.unexpected("a type")),
        };

        let mut ty = TypeExpr::new(kind, start);
        while self.check(&Token::LBracket) && self.peek_at(1) == Some(&Token::RBracket) {
            self.pos += 2;
            ty.array_dims += 1;
        }
        ty.is_reference = self.eat(&Token::Ampersand);
        ty.span = self.finish(start);
        Ok(ty)
    }

    // ====================================================================
    // Expressions
    // ====================================================================

    fn expression(&mut self) -> Result<Expr> {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.assignment())
    }

    fn assignment(&mut self) -> Result<Expr> {
        let target = self.binary(0)?;
        if self.eat(&Token::Eq) {
            let value = self.assignment()?;
            let span = target.span.merge(value.span);
            return Ok(Expr::new(
                ExprKind::Assign { target: Box::new(target), value: Box::new(value) },
                span,
            ));
        }
        Ok(target)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.peek().and_then(binary_op) {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, span);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        let start = self.span();
        let op = match self.peek() {
            Some(Token::Minus) => UnOp::Neg,
            Some(Token::Bang) => UnOp::Not,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.unary())?;
        let span = start.merge(operand.span);
        Ok(Expr::new(ExprKind::Unary { op, operand: Box::new(operand) }, span))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let args = self.arguments()?;
                    let span = self.finish(expr.span);
                    expr = Expr::new(
                        ExprKind::Call(CallExpr {
                            callee: Box::new(expr),
                            args,
                            target: RefCell::new(None),
                        }),
                        span,
                    );
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']' after index")?;
                    let span = self.finish(expr.span);
                    let kind = ExprKind::Index { base: Box::new(expr), index: Box::new(index) };
                    expr = Expr::new(kind, span);
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.ident("a member name after '.'")?;
                    let span = expr.span.merge(name.span);
                    let field = FieldRef { base: Box::new(expr), name, member: RefCell::new(None) };
                    expr = Expr::new(ExprKind::Field(field), span);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        let span = self.span();
        let kind = match self.peek() {
            Some(Token::IntLit(n)) => ExprKind::Int(*n),
            Some(Token::FloatLit(n)) => ExprKind::Float(*n),
            Some(Token::StringLit(s)) => ExprKind::Str(s.clone()),
            Some(Token::Nil) => ExprKind::Nil,
            Some(Token::Ident(name)) => ExprKind::Var(VarRef {
                name: name.clone(),
                global: false,
                binding: RefCell::new(None),
            }),
            Some(Token::ColonColon) => {
                self.pos += 1;
                let name = self.ident("a name after '::'")?;
                let span = span.merge(name.span);
                let var = VarRef { name: name.node, global: true, binding: RefCell::new(None) };
                return Ok(Expr::new(ExprKind::Var(var), span));
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.pos += 1;
        Ok(Expr::new(kind, span))
    }
}

/// Binary operator and its precedence, higher binds tighter
fn binary_op(token: &Token) -> Option<(BinOp, u8)> {
    let entry = match token {
        Token::PipePipe => (BinOp::Or, 1),
        Token::AmpAmp => (BinOp::And, 2),
        Token::EqEq => (BinOp::Eq, 3),
        Token::NotEq => (BinOp::Ne, 3),
        Token::Lt => (BinOp::Lt, 4),
        Token::LtEq => (BinOp::Le, 4),
        Token::Gt => (BinOp::Gt, 4),
        Token::GtEq => (BinOp::Ge, 4),
        Token::Plus => (BinOp::Add, 5),
        Token::Minus => (BinOp::Sub, 5),
        Token::Star => (BinOp::Mul, 6),
        Token::Slash => (BinOp::Div, 6),
        Token::Percent => (BinOp::Rem, 6),
        _ => return None,
    };
    Some(entry)
}
