//! Type checking
//!
//! Runs over bound trees and gives every expression a type. Call sites get
//! their overload or constructor picked here, member accesses get their field
//! or method, and variables built without `=` get their constructor. Nothing
//! in this pass inserts conversions: the evaluator coerces between `int` and
//! `float` when it stores a value into a typed slot.

use std::rc::Rc;

use crate::ast::*;
use crate::error::{CompileError, Diagnostics};
use crate::util::suggestion_note;

/// Type check `units` in order
pub fn check(units: &[Program]) -> Diagnostics {
    let mut checker = TypeChecker::default();
    for unit in units {
        for stmt in &unit.stmts {
            checker.check_stmt(stmt);
        }
    }
    tracing::debug!(units = units.len(), errors = checker.diags.len(), "type checked");
    checker.diags
}

/// Type of an expression and whether it names a storage location
#[derive(Debug, Clone, PartialEq)]
pub struct ExprContext {
    pub ty: Type,
    pub is_lvalue: bool,
}

impl ExprContext {
    pub fn rvalue(ty: Type) -> Self {
        Self { ty, is_lvalue: false }
    }

    pub fn lvalue(ty: Type) -> Self {
        Self { ty, is_lvalue: true }
    }

    fn error() -> Self {
        Self::rvalue(Type::Error)
    }
}

/// Marker for a failure that already produced a diagnostic
struct Reported;

/// Argument of type `arg` selects a parameter of type `param`
fn accepts_argument(arg: &Type, param: &Type) -> bool {
    arg.same_as(param) || (*arg == Type::Nil && param.is_pointer_like())
}

fn function_type(decl: &FnDecl) -> Type {
    Type::FunctionPointer {
        ret: Box::new(decl.return_type()),
        params: decl.prototype(),
        class: decl.owner.borrow().clone(),
    }
}

fn upgrade_all(decls: &[std::rc::Weak<FnDecl>]) -> Vec<Rc<FnDecl>> {
    decls.iter().filter_map(std::rc::Weak::upgrade).collect()
}

fn describe_args(name: &str, args: &[ExprContext]) -> String {
    let types: Vec<String> = args.iter().map(|a| a.ty.to_string()).collect();
    format!("{name}({})", types.join(", "))
}

fn candidate_list(decls: &[Rc<FnDecl>]) -> String {
    let sigs: Vec<String> = decls.iter().map(|d| d.signature()).collect();
    format!("candidates: {}", sigs.join(", "))
}

/// Methods callable by name, i.e. everything except constructors and the destructor
fn callable_methods(class: &ClassDecl, name: &str) -> Vec<Rc<FnDecl>> {
    if name == class.name.node {
        return Vec::new();
    }
    class.methods_named(name).into_iter().cloned().collect()
}

#[derive(Default)]
struct TypeChecker {
    diags: Diagnostics,
    /// Lexically enclosing classes, innermost last
    classes: Vec<Rc<ClassDecl>>,
    /// Function whose body is being checked
    function: Option<Rc<FnDecl>>,
    loops: usize,
}

impl TypeChecker {
    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.diags.push(CompileError::type_error(message, span));
    }

    // ====================================================================
    // Statements
    // ====================================================================

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Empty(_) | Stmt::Typedef(_) | Stmt::Directive(_) => {}
            Stmt::Expr(expr) => {
                self.check_expr(expr);
            }
            Stmt::VarDecl(decl) => self.check_var_decl(decl),
            Stmt::FnDecl(decl) => self.check_fn_decl(decl),
            Stmt::ClassDecl(decl) => self.check_class_decl(decl),
            Stmt::Block(block) => self.check_block(block),
            Stmt::If(stmt) => {
                self.check_condition(&stmt.cond, "if");
                self.check_block(&stmt.then_branch);
                if let Some(else_branch) = &stmt.else_branch {
                    self.check_block(else_branch);
                }
            }
            Stmt::While(stmt) => {
                self.check_condition(&stmt.cond, "while");
                self.loops += 1;
                self.check_block(&stmt.body);
                self.loops -= 1;
            }
            Stmt::Break(span) => {
                if self.loops == 0 {
                    self.error("'break' outside of a loop", *span);
                }
            }
            Stmt::Return(ret) => self.check_return(ret),
        }
    }

    fn check_block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_condition(&mut self, cond: &Expr, keyword: &str) {
        let ctx = self.check_expr(cond);
        if !ctx.ty.is_error() && ctx.ty != Type::Int {
            self.error(format!("'{keyword}' condition must be int, found '{}'", ctx.ty), cond.span);
        }
    }

    fn check_return(&mut self, ret: &ReturnStmt) {
        let Some(function) = self.function.clone() else {
            if let Some(value) = &ret.value {
                self.check_expr(value);
            }
            self.error("'return' outside of a function", ret.span);
            return;
        };
        let expected = function.return_type();
        match &ret.value {
            None if expected == Type::Void || expected.is_error() => {}
            None => self.error(
                format!(
                    "function '{}' must return a value of type '{expected}'",
                    function.name.node
                ),
                ret.span,
            ),
            Some(value) if expected == Type::Void => {
                self.check_expr(value);
                self.error(format!("'{}' cannot return a value", function.name.node), value.span);
            }
            Some(value) => {
                self.check_assignable(value, &expected, "return value");
            }
        }
    }

    // ====================================================================
    // Declarations
    // ====================================================================

    fn check_var_decl(&mut self, decl: &Rc<VarDecl>) {
        let mut unsized_seen = false;
        for dim in &decl.dims {
            match dim {
                Some(size) => {
                    let ctx = self.check_expr(size);
                    if !ctx.ty.is_error() && ctx.ty != Type::Int {
                        self.error(
                            format!("array size must be int, found '{}'", ctx.ty),
                            size.span,
                        );
                    }
                    if unsized_seen {
                        self.error("sized dimension cannot follow an unsized one", size.span);
                    }
                }
                None => unsized_seen = true,
            }
        }

        let ty = decl.declared_type();
        let is_param = decl.storage() == Storage::Param;
        let void_typed = match &ty {
            Type::Void => true,
            Type::Array { elem, .. } => **elem == Type::Void,
            _ => false,
        };
        if void_typed {
            self.error(
                format!("variable '{}' cannot have type void", decl.name.node),
                decl.ty.span,
            );
        }
        if decl.is_reference() && !decl.dims.is_empty() {
            self.error(
                format!("reference '{}' cannot declare dimensions", decl.name.node),
                decl.name.span,
            );
        }

        match (&decl.init, &decl.ctor_args) {
            (Some(init), _) if decl.is_reference() && is_param => {
                self.check_expr(init);
                self.error(
                    format!("reference parameter '{}' cannot have a default value", decl.name.node),
                    init.span,
                );
            }
            (Some(init), _) if decl.is_reference() => {
                let ctx = self.check_expr_expecting(init, Some(&ty));
                if ctx.ty.is_error() || ty.is_error() {
                    return;
                }
                if !ctx.is_lvalue {
                    self.error(
                        format!(
                            "reference '{}' must be bound to an assignable expression",
                            decl.name.node
                        ),
                        init.span,
                    );
                } else if !ctx.ty.same_as(&ty) {
                    self.error(
                        format!(
                            "reference '{}' of type '{ty}' cannot bind to '{}'",
                            decl.name.node,
                            ctx.ty
                        ),
                        init.span,
                    );
                }
            }
            (Some(init), _) => {
                let what = if is_param { "default value" } else { "initializer" };
                self.check_assignable(init, &ty, what);
            }
            (None, Some(args)) => {
                let arg_ctx: Vec<ExprContext> = args.iter().map(|a| self.check_expr(a)).collect();
                if ty.is_error() {
                    return;
                }
                let class = match ty.class() {
                    Some(class) if !decl.is_reference() => class,
                    _ => {
                        self.error(
                            format!("type '{ty}' does not take constructor arguments"),
                            decl.name.span,
                        );
                        return;
                    }
                };
                if let Ok(Some(ctor)) = self.select_constructor(&class, args, &arg_ctx, decl.span) {
                    decl.set_constructor(&ctor);
                }
            }
            (None, None) if decl.is_reference() => {
                if !is_param {
                    self.error(
                        format!("reference '{}' must be initialized", decl.name.node),
                        decl.name.span,
                    );
                }
            }
            (None, None) => {
                if is_param {
                    return;
                }
                // innermost elements of a fully sized array are built like a plain variable
                let builds_objects = decl.dims.iter().all(Option::is_some);
                if let Some(class) = decl.ty.ty().class().filter(|_| builds_objects) {
                    self.default_constructor(decl, &class);
                }
            }
        }
    }

    /// Pick the zero-argument constructor used for `Class name;`
    fn default_constructor(&mut self, decl: &VarDecl, class: &Rc<ClassDecl>) {
        let ctors: Vec<Rc<FnDecl>> = class.constructors().cloned().collect();
        if ctors.is_empty() {
            return;
        }
        let usable: Vec<&Rc<FnDecl>> = ctors.iter().filter(|c| c.required_params() == 0).collect();
        match usable.as_slice() {
            [ctor] => decl.set_constructor(ctor),
            [] => self.diags.push(
                CompileError::type_error(
                    format!(
                        "class '{}' has no constructor taking zero arguments",
                        class.qualified_name()
                    ),
                    decl.name.span,
                )
                .with_note(candidate_list(&ctors), None),
            ),
            _ => self.error(
                format!("ambiguous default construction of class '{}'", class.qualified_name()),
                decl.name.span,
            ),
        }
    }

    fn check_fn_decl(&mut self, decl: &Rc<FnDecl>) {
        let owner = decl.owner();
        match (&owner, &decl.ret) {
            (Some(class), None) if decl.is_destructor() => {
                if decl.name.node != class.destructor_name {
                    self.error(
                        format!("destructor must be named '{}'", class.destructor_name),
                        decl.name.span,
                    );
                } else if !decl.params.is_empty() {
                    self.error("destructor cannot take parameters", decl.name.span);
                }
            }
            (Some(class), None) => {
                if decl.name.node != class.name.node {
                    self.error(
                        format!("constructor must be named '{}'", class.name.node),
                        decl.name.span,
                    );
                }
            }
            (Some(class), Some(ret)) if decl.name.node == class.name.node => {
                self.error(
                    format!("constructor '{}' cannot declare a return type", class.name.node),
                    ret.span,
                );
            }
            (None, None) => {
                self.error(
                    format!("function '{}' needs a return type", decl.name.node),
                    decl.name.span,
                );
            }
            _ => {}
        }

        let mut default_seen = false;
        for param in &decl.params {
            self.check_var_decl(param);
            if param.init.is_some() {
                default_seen = true;
            } else if default_seen {
                self.error(
                    format!(
                        "parameter '{}' needs a default value because an earlier one has one",
                        param.name.node
                    ),
                    param.name.span,
                );
            }
        }

        let Some(body) = &decl.body else {
            return;
        };
        let saved_function = self.function.replace(Rc::clone(decl));
        let saved_loops = std::mem::take(&mut self.loops);
        self.check_block(body);
        self.function = saved_function;
        self.loops = saved_loops;
    }

    fn check_class_decl(&mut self, decl: &Rc<ClassDecl>) {
        self.classes.push(Rc::clone(decl));
        let saved_function = self.function.take();
        let saved_loops = std::mem::take(&mut self.loops);
        for stmt in &decl.body {
            self.check_stmt(stmt);
        }
        self.function = saved_function;
        self.loops = saved_loops;
        self.classes.pop();
        self.check_containment(decl);
    }

    /// Members built automatically must not lead back to the class itself
    fn check_containment(&mut self, class: &Rc<ClassDecl>) {
        let mut path = Vec::new();
        let mut visited = Vec::new();
        if contains_by_value(class, class, &mut path, &mut visited) {
            let span = path.first().map(|m: &Rc<VarDecl>| m.name.span).unwrap_or(class.name.span);
            let names: Vec<&str> = path.iter().map(|m| m.name.node.as_str()).collect();
            self.error(
                format!(
                    "class '{}' contains itself through member '{}'",
                    class.qualified_name(),
                    names.join(".")
                ),
                span,
            );
        }
    }

    // ====================================================================
    // Expressions
    // ====================================================================

    fn check_expr(&mut self, expr: &Expr) -> ExprContext {
        self.check_expr_expecting(expr, None)
    }

    /// `expected` only steers which overload a bare function name denotes
    fn check_expr_expecting(&mut self, expr: &Expr, expected: Option<&Type>) -> ExprContext {
        let ctx = stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.infer(expr, expected));
        expr.set_ty(ctx.ty.clone());
        ctx
    }

    fn check_assignable(&mut self, expr: &Expr, target: &Type, what: &str) -> ExprContext {
        let ctx = self.check_expr_expecting(expr, Some(target));
        if !ctx.ty.is_error() && !target.is_error() && !ctx.ty.is_compatible_with(target) {
            self.error(format!("{what}: expected '{target}', found '{}'", ctx.ty), expr.span);
        }
        ctx
    }

    fn infer(&mut self, expr: &Expr, expected: Option<&Type>) -> ExprContext {
        match &expr.kind {
            ExprKind::Int(_) => ExprContext::rvalue(Type::Int),
            ExprKind::Float(_) => ExprContext::rvalue(Type::Float),
            ExprKind::Str(_) => ExprContext::rvalue(Type::String),
            ExprKind::Nil => ExprContext::rvalue(Type::Nil),
            ExprKind::Unary { op, operand } => {
                let inner = self.check_expr(operand);
                ExprContext::rvalue(self.check_unary(*op, &inner.ty, expr.span))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.check_expr(lhs);
                let right = self.check_expr(rhs);
                ExprContext::rvalue(self.check_binary(*op, &left.ty, &right.ty, expr.span))
            }
            ExprKind::Assign { target, value } => {
                let target_ctx = self.check_expr(target);
                let value_ctx = self.check_expr_expecting(value, Some(&target_ctx.ty));
                if target_ctx.ty.is_error() || value_ctx.ty.is_error() {
                    return ExprContext::error();
                }
                if !target_ctx.is_lvalue {
                    self.error("left side of assignment is not assignable", target.span);
                } else if !value_ctx.ty.is_compatible_with(&target_ctx.ty) {
                    self.error(
                        format!("cannot assign '{}' to '{}'", value_ctx.ty, target_ctx.ty),
                        value.span,
                    );
                }
                ExprContext::rvalue(target_ctx.ty)
            }
            ExprKind::Var(var) => self.check_var(var, expected, expr.span),
            ExprKind::Index { base, index } => {
                let base_ctx = self.check_expr(base);
                let index_ctx = self.check_expr(index);
                if !index_ctx.ty.is_error() && index_ctx.ty != Type::Int {
                    self.error(
                        format!("array index must be int, found '{}'", index_ctx.ty),
                        index.span,
                    );
                }
                if base_ctx.ty.is_error() {
                    return ExprContext::error();
                }
                match base_ctx.ty.element() {
                    Some(elem) => ExprContext::lvalue(elem),
                    None => {
                        self.error(format!("type '{}' cannot be indexed", base_ctx.ty), base.span);
                        ExprContext::error()
                    }
                }
            }
            ExprKind::Field(field) => {
                if let Some(Member::Class(class)) = field.member() {
                    self.mark_class_path(&field.base);
                    self.error(format!("class '{}' is not a value", class.name()), expr.span);
                    return ExprContext::error();
                }
                let base = self.check_expr(&field.base);
                self.check_member(field, &base, expected)
            }
            ExprKind::Call(call) => self.check_call(call, expr.span),
        }
    }

    fn check_unary(&mut self, op: UnOp, operand: &Type, span: Span) -> Type {
        match (op, operand) {
            (_, Type::Error) => Type::Error,
            (UnOp::Neg, ty) if ty.is_numeric() => ty.clone(),
            (UnOp::Not, Type::Int) => Type::Int,
            (op, ty) => {
                self.error(format!("operator '{op}' cannot be applied to '{ty}'"), span);
                Type::Error
            }
        }
    }

    fn check_binary(&mut self, op: BinOp, left: &Type, right: &Type, span: Span) -> Type {
        if left.is_error() || right.is_error() {
            return Type::Error;
        }
        let ok = match op {
            BinOp::And | BinOp::Or => *left == Type::Int && *right == Type::Int,
            BinOp::Eq | BinOp::Ne => left.is_compatible_with(right),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Add => {
                (left.is_numeric() && right.is_numeric())
                    || (*left == Type::String && *right == Type::String)
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div => left.is_numeric() && right.is_numeric(),
            BinOp::Rem => *left == Type::Int && *right == Type::Int,
        };
        if !ok {
            self.error(
                format!("operator '{op}' cannot be applied to '{left}' and '{right}'"),
                span,
            );
            return Type::Error;
        }
        if op.is_arithmetic() { left.clone() } else { Type::Int }
    }

    fn check_var(&mut self, var: &VarRef, expected: Option<&Type>, span: Span) -> ExprContext {
        match var.binding() {
            Some(Binding::Variable(decl)) => match decl.upgrade() {
                Some(decl) => ExprContext::lvalue(decl.declared_type()),
                None => ExprContext::error(),
            },
            Some(Binding::Overloads(decls)) => {
                let decls = upgrade_all(&decls);
                match self.pick_function(&var.name, &decls, expected, span) {
                    Some(decl) => {
                        var.bind(Binding::Function(Rc::downgrade(&decl)));
                        ExprContext::rvalue(function_type(&decl))
                    }
                    None => ExprContext::error(),
                }
            }
            Some(Binding::Function(decl)) => match decl.upgrade() {
                Some(decl) => ExprContext::rvalue(function_type(&decl)),
                None => ExprContext::error(),
            },
            Some(Binding::Class(class)) => {
                self.error(format!("class '{}' is not a value", class.name()), span);
                ExprContext::error()
            }
            None => ExprContext::error(),
        }
    }

    /// Give the nodes of a `Outer.Inner` type path their class type
    fn mark_class_path(&mut self, expr: &Expr) {
        let class = match &expr.kind {
            ExprKind::Var(var) => match var.binding() {
                Some(Binding::Class(class)) => Some(class),
                _ => None,
            },
            ExprKind::Field(field) => {
                self.mark_class_path(&field.base);
                match field.member() {
                    Some(Member::Class(class)) => Some(class),
                    _ => None,
                }
            }
            _ => None,
        };
        expr.set_ty(class.map_or(Type::Error, Type::Named));
    }

    fn check_member(
        &mut self,
        field: &FieldRef,
        base: &ExprContext,
        expected: Option<&Type>,
    ) -> ExprContext {
        if base.ty.is_error() {
            return ExprContext::error();
        }
        let Some(class) = base.ty.class() else {
            self.error(format!("type '{}' has no members", base.ty), field.name.span);
            return ExprContext::error();
        };
        let name = &field.name.node;
        if let Some(decl) = class.field(name) {
            field.resolve(Member::Field(Rc::downgrade(decl)));
            return ExprContext::lvalue(decl.declared_type());
        }
        let methods = callable_methods(&class, name);
        if !methods.is_empty() {
            return match self.pick_function(name, &methods, expected, field.name.span) {
                Some(method) => {
                    field.resolve(Member::Method(Rc::downgrade(&method)));
                    ExprContext::rvalue(function_type(&method))
                }
                None => ExprContext::error(),
            };
        }
        self.no_member(&class, field);
        ExprContext::error()
    }

    fn no_member(&mut self, class: &ClassDecl, field: &FieldRef) {
        let mut candidates: Vec<&str> = class.fields.iter().map(|f| f.name.node.as_str()).collect();
        candidates.extend(class.methods.iter().map(|m| m.name.node.as_str()));
        let mut err = CompileError::type_error(
            format!("class '{}' has no member '{}'", class.qualified_name(), field.name.node),
            field.name.span,
        );
        if let Some(note) = suggestion_note(&field.name.node, &candidates) {
            err = err.with_note(note, None);
        }
        self.diags.push(err);
    }

    /// Function denoted by a bare name used as a value
    fn pick_function(
        &mut self,
        name: &str,
        decls: &[Rc<FnDecl>],
        expected: Option<&Type>,
        span: Span,
    ) -> Option<Rc<FnDecl>> {
        if let Some(Type::FunctionPointer { ret, params, .. }) = expected {
            let wanted = Type::FunctionPointer {
                ret: ret.clone(),
                params: params.clone(),
                class: None,
            };
            if let Some(decl) = decls.iter().find(|d| function_type(d).same_as(&wanted)) {
                return Some(Rc::clone(decl));
            }
        }
        match decls {
            [decl] => Some(Rc::clone(decl)),
            _ => {
                self.diags.push(
                    CompileError::type_error(
                        format!("cannot choose an overload of '{name}' here"),
                        span,
                    )
                    .with_note(candidate_list(decls), None),
                );
                None
            }
        }
    }

    // ====================================================================
    // Calls
    // ====================================================================

    fn check_call(&mut self, call: &CallExpr, span: Span) -> ExprContext {
        let args: Vec<ExprContext> = call.args.iter().map(|a| self.check_expr(a)).collect();
        let callee = &call.callee;

        let ty = match &callee.kind {
            ExprKind::Var(var) => match var.binding() {
                Some(Binding::Overloads(decls)) => {
                    let decls = upgrade_all(&decls);
                    match self.select_overload(&var.name, &decls, &call.args, &args, span) {
                        Ok(decl) => {
                            callee.set_ty(function_type(&decl));
                            call.resolve(CallTarget::Function(Rc::downgrade(&decl)));
                            decl.return_type()
                        }
                        Err(Reported) => {
                            callee.set_ty(Type::Error);
                            Type::Error
                        }
                    }
                }
                Some(Binding::Class(class)) => {
                    callee.set_ty(Type::Named(class.clone()));
                    self.check_construction(call, &class, &args, span)
                }
                _ => {
                    let callee_ctx = self.check_expr(callee);
                    self.check_pointer_call(call, &callee_ctx.ty, &args, span)
                }
            },
            ExprKind::Field(field) => match field.member() {
                Some(Member::Class(class)) => {
                    self.mark_class_path(callee);
                    self.check_construction(call, &class, &args, span)
                }
                _ => self.check_method_call(call, field, &args, span),
            },
            _ => {
                let callee_ctx = self.check_expr(callee);
                self.check_pointer_call(call, &callee_ctx.ty, &args, span)
            }
        };
        ExprContext::rvalue(ty)
    }

    fn check_method_call(
        &mut self,
        call: &CallExpr,
        field: &FieldRef,
        args: &[ExprContext],
        span: Span,
    ) -> Type {
        let base = self.check_expr(&field.base);
        let class = match base.ty.class() {
            Some(class) => class,
            None => {
                if !base.ty.is_error() {
                    self.error(format!("type '{}' has no methods", base.ty), field.name.span);
                }
                call.callee.set_ty(Type::Error);
                return Type::Error;
            }
        };
        let name = &field.name.node;
        let methods = callable_methods(&class, name);
        if methods.is_empty() {
            // a field holding a function pointer
            let ctx = self.check_member(field, &base, None);
            call.callee.set_ty(ctx.ty.clone());
            return self.check_pointer_call(call, &ctx.ty, args, span);
        }
        match self.select_overload(name, &methods, &call.args, args, span) {
            Ok(method) => {
                field.resolve(Member::Method(Rc::downgrade(&method)));
                call.callee.set_ty(function_type(&method));
                call.resolve(CallTarget::Method(Rc::downgrade(&method)));
                method.return_type()
            }
            Err(Reported) => {
                call.callee.set_ty(Type::Error);
                Type::Error
            }
        }
    }

    fn check_pointer_call(
        &mut self,
        call: &CallExpr,
        callee: &Type,
        args: &[ExprContext],
        span: Span,
    ) -> Type {
        let Type::FunctionPointer { ret, params, .. } = callee else {
            if !callee.is_error() {
                self.error(format!("value of type '{callee}' is not callable"), call.callee.span);
            }
            return Type::Error;
        };
        if args.len() != params.len() {
            self.error(
                format!("'{callee}' expects {} argument(s), found {}", params.len(), args.len()),
                span,
            );
            return Type::Error;
        }
        for (i, ((arg, param), expr)) in args.iter().zip(params).zip(&call.args).enumerate() {
            if !arg.ty.is_error() && !arg.ty.is_compatible_with(param) {
                self.error(
                    format!("argument {}: expected '{param}', found '{}'", i + 1, arg.ty),
                    expr.span,
                );
            }
        }
        call.resolve(CallTarget::Pointer);
        (**ret).clone()
    }

    fn check_construction(
        &mut self,
        call: &CallExpr,
        class: &ClassRef,
        args: &[ExprContext],
        span: Span,
    ) -> Type {
        let Some(decl) = class.get() else {
            return Type::Error;
        };
        match self.select_constructor(&decl, &call.args, args, span) {
            Ok(ctor) => {
                call.resolve(CallTarget::Constructor {
                    class: class.clone(),
                    ctor: ctor.as_ref().map(Rc::downgrade),
                });
                Type::Named(class.clone())
            }
            Err(Reported) => Type::Error,
        }
    }

    /// Constructor for `Class(args)`, `None` when the class declares none
    fn select_constructor(
        &mut self,
        class: &Rc<ClassDecl>,
        args: &[Expr],
        ctx: &[ExprContext],
        span: Span,
    ) -> Result<Option<Rc<FnDecl>>, Reported> {
        let ctors: Vec<Rc<FnDecl>> = class.constructors().cloned().collect();
        if ctors.is_empty() {
            if args.is_empty() {
                return Ok(None);
            }
            self.error(
                format!(
                    "class '{}' declares no constructor and takes no arguments",
                    class.qualified_name()
                ),
                span,
            );
            return Err(Reported);
        }
        self.select_overload(&class.name.node, &ctors, args, ctx, span).map(Some)
    }

    /// Exactly one candidate must accept the argument types
    fn select_overload(
        &mut self,
        name: &str,
        candidates: &[Rc<FnDecl>],
        args: &[Expr],
        ctx: &[ExprContext],
        span: Span,
    ) -> Result<Rc<FnDecl>, Reported> {
        if ctx.iter().any(|a| a.ty.is_error()) {
            return Err(Reported);
        }
        let matching: Vec<Rc<FnDecl>> = candidates
            .iter()
            .filter(|f| {
                let params = f.prototype();
                ctx.len() >= f.required_params()
                    && ctx.len() <= params.len()
                    && ctx.iter().zip(&params).all(|(a, p)| accepts_argument(&a.ty, p))
            })
            .cloned()
            .collect();
        match matching.as_slice() {
            [chosen] => {
                self.check_reference_args(chosen, args, ctx);
                Ok(Rc::clone(chosen))
            }
            [] => {
                self.diags.push(
                    CompileError::type_error(
                        format!("no matching function for call to '{}'", describe_args(name, ctx)),
                        span,
                    )
                    .with_note(candidate_list(candidates), None),
                );
                Err(Reported)
            }
            _ => {
                self.diags.push(
                    CompileError::type_error(
                        format!("ambiguous call to '{}'", describe_args(name, ctx)),
                        span,
                    )
                    .with_note(candidate_list(&matching), None),
                );
                Err(Reported)
            }
        }
    }

    fn check_reference_args(&mut self, decl: &FnDecl, args: &[Expr], ctx: &[ExprContext]) {
        for ((param, arg), arg_ctx) in decl.params.iter().zip(args).zip(ctx) {
            if param.is_reference() && !arg_ctx.is_lvalue {
                self.error(
                    format!(
                        "argument for reference parameter '{}' of '{}' must be assignable",
                        param.name.node,
                        decl.signature()
                    ),
                    arg.span,
                );
            }
        }
    }
}

/// Depth-first walk over automatically built members looking for `target`
fn contains_by_value(
    class: &Rc<ClassDecl>,
    target: &Rc<ClassDecl>,
    path: &mut Vec<Rc<VarDecl>>,
    visited: &mut Vec<*const ClassDecl>,
) -> bool {
    if visited.contains(&Rc::as_ptr(class)) {
        return false;
    }
    visited.push(Rc::as_ptr(class));
    for &index in &class.auto_constructed {
        let field = &class.fields[index];
        if field.dims.iter().any(Option::is_none) {
            continue;
        }
        let Some(member_class) = field.ty.ty().class() else {
            continue;
        };
        path.push(Rc::clone(field));
        if Rc::ptr_eq(&member_class, target)
            || contains_by_value(&member_class, target, path, visited)
        {
            return true;
        }
        path.pop();
    }
    false
}
