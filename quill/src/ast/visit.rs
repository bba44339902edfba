//! AST traversal with overridable hooks
//!
//! Every `visit_*` method defaults to the matching `walk_*` function, which
//! recurses into the node's children. A pass overrides the hooks it needs and
//! calls `walk_*` itself when it still wants the default recursion.

use super::*;

pub trait Visitor: Sized {
    fn visit_program(&mut self, program: &Program) {
        walk_program(self, program);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_var_decl(&mut self, decl: &Rc<VarDecl>) {
        walk_var_decl(self, decl);
    }

    fn visit_fn_decl(&mut self, decl: &Rc<FnDecl>) {
        walk_fn_decl(self, decl);
    }

    fn visit_class_decl(&mut self, decl: &Rc<ClassDecl>) {
        walk_class_decl(self, decl);
    }

    fn visit_typedef(&mut self, decl: &Rc<TypedefDecl>) {
        self.visit_type_expr(&decl.target);
    }

    fn visit_directive(&mut self, _directive: &Directive) {}

    fn visit_type_expr(&mut self, ty: &TypeExpr) {
        walk_type_expr(self, ty);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_var_ref(&mut self, _var: &VarRef, _span: Span) {}

    fn visit_field(&mut self, field: &FieldRef, _span: Span) {
        self.visit_expr(&field.base);
    }

    fn visit_call(&mut self, call: &CallExpr, _span: Span) {
        walk_call(self, call);
    }
}

pub fn walk_program<V: Visitor>(v: &mut V, program: &Program) {
    for stmt in &program.stmts {
        v.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor>(v: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Empty(_) | Stmt::Break(_) => {}
        Stmt::Expr(expr) => v.visit_expr(expr),
        Stmt::VarDecl(decl) => v.visit_var_decl(decl),
        Stmt::FnDecl(decl) => v.visit_fn_decl(decl),
        Stmt::ClassDecl(decl) => v.visit_class_decl(decl),
        Stmt::Typedef(decl) => v.visit_typedef(decl),
        Stmt::Block(block) => v.visit_block(block),
        Stmt::If(stmt) => {
            v.visit_expr(&stmt.cond);
            v.visit_block(&stmt.then_branch);
            if let Some(else_branch) = &stmt.else_branch {
                v.visit_block(else_branch);
            }
        }
        Stmt::While(stmt) => {
            v.visit_expr(&stmt.cond);
            v.visit_block(&stmt.body);
        }
        Stmt::Return(stmt) => {
            if let Some(value) = &stmt.value {
                v.visit_expr(value);
            }
        }
        Stmt::Directive(directive) => v.visit_directive(directive),
    }
}

pub fn walk_block<V: Visitor>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        v.visit_stmt(stmt);
    }
}

pub fn walk_var_decl<V: Visitor>(v: &mut V, decl: &VarDecl) {
    v.visit_type_expr(&decl.ty);
    for dim in decl.dims.iter().flatten() {
        v.visit_expr(dim);
    }
    if let Some(init) = &decl.init {
        v.visit_expr(init);
    }
    for arg in decl.ctor_args.iter().flatten() {
        v.visit_expr(arg);
    }
}

pub fn walk_fn_decl<V: Visitor>(v: &mut V, decl: &FnDecl) {
    if let Some(ret) = &decl.ret {
        v.visit_type_expr(ret);
    }
    for param in &decl.params {
        v.visit_var_decl(param);
    }
    if let Some(body) = &decl.body {
        v.visit_block(body);
    }
}

pub fn walk_class_decl<V: Visitor>(v: &mut V, decl: &ClassDecl) {
    for stmt in &decl.body {
        v.visit_stmt(stmt);
    }
}

pub fn walk_type_expr<V: Visitor>(v: &mut V, ty: &TypeExpr) {
    if let TypeExprKind::Function { ret, params } = &ty.kind {
        v.visit_type_expr(ret);
        for param in params {
            v.visit_type_expr(param);
        }
    }
}

pub fn walk_expr<V: Visitor>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Nil => {}
        ExprKind::Unary { operand, .. } => v.visit_expr(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::Assign { target, value } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        ExprKind::Var(var) => v.visit_var_ref(var, expr.span),
        ExprKind::Index { base, index } => {
            v.visit_expr(base);
            v.visit_expr(index);
        }
        ExprKind::Field(field) => v.visit_field(field, expr.span),
        ExprKind::Call(call) => v.visit_call(call, expr.span),
    }
}

pub fn walk_call<V: Visitor>(v: &mut V, call: &CallExpr) {
    v.visit_expr(&call.callee);
    for arg in &call.args {
        v.visit_expr(arg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NameCollector {
        names: Vec<String>,
    }

    impl Visitor for NameCollector {
        fn visit_var_ref(&mut self, var: &VarRef, _span: Span) {
            self.names.push(var.name.clone());
        }
    }

    fn var(name: &str) -> Expr {
        let var = VarRef { name: name.to_string(), global: false, binding: RefCell::new(None) };
        Expr::new(ExprKind::Var(var), Span::default())
    }

    #[test]
    fn test_default_walk_reaches_nested_names() {
        let (lhs, rhs) = (Box::new(var("a")), Box::new(var("b")));
        let sum = ExprKind::Binary { op: BinOp::Add, lhs, rhs };
        let call = Expr::new(
            ExprKind::Call(CallExpr {
                callee: Box::new(var("f")),
                args: vec![Expr::new(sum, Span::default())],
                target: RefCell::new(None),
            }),
            Span::default(),
        );
        let program = Program {
            file: FileId(0),
            stmts: vec![Stmt::Block(Block {
                stmts: vec![Stmt::Expr(call)],
                span: Span::default(),
            })],
        };
        let mut collector = NameCollector::default();
        collector.visit_program(&program);
        assert_eq!(collector.names, vec!["f", "a", "b"]);
    }
}
