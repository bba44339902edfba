//! Name binding
//!
//! Walks every unit in dependency order and attaches declarations to the
//! names that use them. Local scopes are simulated with the variable table
//! exactly as they will exist at run time, so shadowing resolves the same way
//! the evaluator sees it. Written types and typedef targets are resolved
//! against the class tree here as well.

use std::rc::Rc;

use crate::ast::visit::{self, Visitor};
use crate::ast::*;
use crate::error::{CompileError, Diagnostics};
use crate::symbols::{ClassEntry, ROOT, ScopeId, SymbolTables, same_prototype};
use crate::util::suggestion_note;

/// Bind every unit, in order, against `tables`
pub fn bind(units: &[Program], tables: &mut SymbolTables) -> Diagnostics {
    let mut binder = Binder {
        tables,
        diags: Diagnostics::new(),
        classes: Vec::new(),
        typedefs_in_progress: Vec::new(),
    };
    for unit in units {
        binder.visit_program(unit);
    }
    for unit in units {
        binder.check_overloads(unit);
    }
    tracing::debug!(units = units.len(), errors = binder.diags.len(), "bound names");
    binder.diags
}

struct Binder<'a> {
    tables: &'a mut SymbolTables,
    diags: Diagnostics,
    /// Lexically enclosing classes, innermost last
    classes: Vec<Rc<ClassDecl>>,
    typedefs_in_progress: Vec<Rc<TypedefDecl>>,
}

impl Binder<'_> {
    /// Class-tree node that type names are resolved from
    fn scope(&self) -> ScopeId {
        self.classes.last().and_then(|c| c.scope.get()).unwrap_or(ROOT)
    }

    fn error(&mut self, error: CompileError) {
        self.diags.push(error);
    }

    // ====================================================================
    // Types
    // ====================================================================

    fn resolve_type_expr(&mut self, ty: &TypeExpr, scope: ScopeId) -> Type {
        let base = match &ty.kind {
            TypeExprKind::Named { global, path } => self.resolve_type_path(*global, path, scope),
            TypeExprKind::Function { ret, params } => {
                let ret = self.resolve_type_expr(ret, scope);
                let params: Vec<Type> =
                    params.iter().map(|p| self.resolve_type_expr(p, scope)).collect();
                if ret.is_error() || params.iter().any(Type::is_error) {
                    Type::Error
                } else {
                    Type::FunctionPointer { ret: Box::new(ret), params, class: None }
                }
            }
            _ => ty.primitive().unwrap_or(Type::Error),
        };
        let resolved = if base.is_error() { Type::Error } else { Type::array(base, ty.array_dims) };
        ty.set_resolved(resolved.clone());
        resolved
    }

    /// Node reached by `name` searching from `scope` outward
    fn find_type_node(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(node) = self.tables.classes.child(s, name) {
                return Some(node);
            }
            current = self.tables.classes.parent(s);
        }
        None
    }

    fn resolve_type_path(
        &mut self,
        global: bool,
        path: &[Spanned<String>],
        scope: ScopeId,
    ) -> Type {
        let Some((first, rest)) = path.split_first() else {
            return Type::Error;
        };
        let start = if global { ROOT } else { scope };
        let found = if global {
            self.tables.classes.child(ROOT, &first.node)
        } else {
            self.find_type_node(start, &first.node)
        };
        let Some(mut node) = found else {
            let note = suggestion_note(&first.node, &self.tables.classes.visible_names(start));
            let mut err = CompileError::bind(format!("unknown type '{}'", first.node), first.span);
            if let Some(note) = note {
                err = err.with_note(note, None);
            }
            self.error(err);
            return Type::Error;
        };

        let mut walked = first.node.clone();
        for segment in rest {
            let Some(class) = self.entry_class(node) else {
                let message = format!("'{walked}' does not name a class");
                self.error(CompileError::bind(message, segment.span));
                return Type::Error;
            };
            match class.scope.get().and_then(|s| self.tables.classes.child(s, &segment.node)) {
                Some(next) => node = next,
                None => {
                    self.error(CompileError::bind(
                        format!(
                            "class '{}' has no nested type '{}'",
                            class.qualified_name(),
                            segment.node
                        ),
                        segment.span,
                    ));
                    return Type::Error;
                }
            }
            walked = format!("{walked}.{}", segment.node);
        }
        self.entry_type(node)
    }

    /// Type named by a class-table node, resolving typedefs on demand
    fn entry_type(&mut self, node: ScopeId) -> Type {
        match self.tables.classes.entry(node).cloned() {
            Some(ClassEntry::Class(class)) => Type::Named(ClassRef::new(&class)),
            Some(ClassEntry::Typedef(typedef)) => {
                let scope = self.tables.classes.parent(node).unwrap_or(ROOT);
                self.resolve_typedef(&typedef, scope)
            }
            None => Type::Error,
        }
    }

    fn entry_class(&mut self, node: ScopeId) -> Option<Rc<ClassDecl>> {
        self.entry_type(node).class()
    }

    fn resolve_typedef(&mut self, typedef: &Rc<TypedefDecl>, scope: ScopeId) -> Type {
        if let Some(ty) = typedef.target.resolved.borrow().clone() {
            return ty;
        }
        if self.typedefs_in_progress.iter().any(|t| Rc::ptr_eq(t, typedef)) {
            self.error(CompileError::bind(
                format!("typedef '{}' refers to itself", typedef.name.node),
                typedef.name.span,
            ));
            typedef.target.set_resolved(Type::Error);
            return Type::Error;
        }
        self.typedefs_in_progress.push(Rc::clone(typedef));
        let ty = self.resolve_type_expr(&typedef.target, scope);
        self.typedefs_in_progress.pop();
        ty
    }

    // ====================================================================
    // Names
    // ====================================================================

    fn lookup_name(&mut self, var: &VarRef) -> Option<Binding> {
        let name = var.name.as_str();
        let variable = if var.global {
            self.tables.vars.find_global(name)
        } else {
            self.tables.vars.find(name)
        };
        if let Some(decl) = variable {
            return Some(Binding::Variable(Rc::downgrade(&decl)));
        }

        if !var.global {
            if let Some(class) = self.classes.last() {
                let methods: Vec<_> = class
                    .methods_named(name)
                    .into_iter()
                    .filter(|m| m.name.node != class.name.node)
                    .map(Rc::downgrade)
                    .collect();
                if !methods.is_empty() {
                    return Some(Binding::Overloads(methods));
                }
            }
        }

        if let Some(set) = self.tables.functions.find(name) {
            return Some(Binding::Overloads(set.decls.iter().map(Rc::downgrade).collect()));
        }

        let node = if var.global {
            self.tables.classes.child(ROOT, name)
        } else {
            self.find_type_node(self.scope(), name)
        }?;
        self.entry_class(node).map(|class| Binding::Class(ClassRef::new(&class)))
    }

    fn unknown_name(&mut self, var: &VarRef, span: Span) {
        let mut candidates: Vec<&str> = self.tables.vars.visible_names();
        candidates.extend(self.tables.functions.names());
        candidates.extend(self.tables.classes.visible_names(self.scope()));
        if let Some(class) = self.classes.last() {
            candidates.extend(class.methods.iter().map(|m| m.name.node.as_str()));
        }
        let note = suggestion_note(&var.name, &candidates);
        let mut err = CompileError::bind(format!("unknown name '{}'", var.name), span);
        if let Some(note) = note {
            err = err.with_note(note, None);
        }
        self.error(err);
    }

    // ====================================================================
    // Overloads
    // ====================================================================

    /// Overloads whose parameter lists only coincide once type names are resolved
    ///
    /// Identical written lists were already rejected during registration.
    fn check_overloads(&mut self, unit: &Program) {
        for stmt in &unit.stmts {
            match stmt {
                Stmt::FnDecl(decl) => self.check_function_overload(decl),
                Stmt::ClassDecl(class) => self.check_method_overloads(class),
                _ => {}
            }
        }
    }

    fn check_function_overload(&mut self, decl: &Rc<FnDecl>) {
        let Some(set) = self.tables.functions.find(&decl.name.node) else {
            return;
        };
        let Some(position) = set.decls.iter().position(|d| Rc::ptr_eq(d, decl)) else {
            return;
        };
        let previous = set.decls[..position].iter().find(|d| resolves_to_same(d, decl)).cloned();
        if let Some(previous) = previous {
            self.error(
                CompileError::bind(
                    format!(
                        "function '{}' is already declared with the same parameters",
                        decl.signature()
                    ),
                    decl.name.span,
                )
                .with_note("previous declaration is here", Some(previous.name.span)),
            );
        }
    }

    fn check_method_overloads(&mut self, class: &Rc<ClassDecl>) {
        for (i, method) in class.methods.iter().enumerate() {
            let previous = class.methods[..i]
                .iter()
                .find(|m| m.name.node == method.name.node && resolves_to_same(m, method));
            if let Some(previous) = previous {
                let err = CompileError::bind(
                    format!(
                        "method '{}' of class '{}' is already declared with the same parameters",
                        method.signature(),
                        class.name.node
                    ),
                    method.name.span,
                )
                .with_note("previous declaration is here", Some(previous.name.span));
                self.error(err);
            }
        }
        for stmt in &class.body {
            if let Stmt::ClassDecl(nested) = stmt {
                self.check_method_overloads(nested);
            }
        }
    }

    fn redeclared(&mut self, decl: &VarDecl, previous: &VarDecl) {
        self.error(
            CompileError::bind(
                format!("'{}' is already declared in this scope", decl.name.node),
                decl.name.span,
            )
            .with_note("previous declaration is here", Some(previous.name.span)),
        );
    }
}

/// Written differently but naming the same parameter types
fn resolves_to_same(a: &FnDecl, b: &FnDecl) -> bool {
    let resolved = |f: &FnDecl| f.prototype().iter().all(|t| !t.is_error());
    resolved(a) && resolved(b) && !same_prototype(a, b) && a.same_parameters(b)
}

impl Visitor for Binder<'_> {
    fn visit_block(&mut self, block: &Block) {
        self.tables.vars.begin_scope(false);
        visit::walk_block(self, block);
        self.tables.vars.end_scope();
    }

    fn visit_type_expr(&mut self, ty: &TypeExpr) {
        let scope = self.scope();
        self.resolve_type_expr(ty, scope);
    }

    fn visit_typedef(&mut self, decl: &Rc<TypedefDecl>) {
        let scope = self.scope();
        self.resolve_typedef(decl, scope);
    }

    fn visit_var_decl(&mut self, decl: &Rc<VarDecl>) {
        visit::walk_var_decl(self, decl);
        match decl.storage() {
            Storage::Global | Storage::Member => {}
            Storage::Local | Storage::Param => {
                if let Err(previous) = self.tables.vars.insert(&decl.name.node, Rc::clone(decl)) {
                    self.redeclared(decl, &previous);
                }
            }
        }
    }

    fn visit_fn_decl(&mut self, decl: &Rc<FnDecl>) {
        let owner = self.classes.last().cloned();
        if let Some(class) = &owner {
            *decl.owner.borrow_mut() = Some(ClassRef::new(class));
        }
        if let Some(ret) = &decl.ret {
            self.visit_type_expr(ret);
        }
        // defaults are evaluated in the caller, so they see the enclosing scope only
        for param in &decl.params {
            self.visit_type_expr(&param.ty);
            if let Some(default) = &param.init {
                self.visit_expr(default);
            }
        }

        self.tables.vars.begin_scope(owner.is_none());
        let first_slot = usize::from(owner.is_some());
        for (i, param) in decl.params.iter().enumerate() {
            param.runtime_index.set(Some(first_slot + i));
            if let Err(previous) = self.tables.vars.insert(&param.name.node, Rc::clone(param)) {
                self.redeclared(param, &previous);
            }
        }
        if let Some(body) = &decl.body {
            for stmt in &body.stmts {
                self.visit_stmt(stmt);
            }
        }
        self.tables.vars.end_scope();
    }

    fn visit_class_decl(&mut self, decl: &Rc<ClassDecl>) {
        self.classes.push(Rc::clone(decl));
        self.tables.vars.begin_scope(true);
        for field in &decl.fields {
            // clashes were reported during registration
            let _ = self.tables.vars.insert(&field.name.node, Rc::clone(field));
        }
        visit::walk_class_decl(self, decl);
        self.tables.vars.end_scope();
        self.classes.pop();
    }

    fn visit_var_ref(&mut self, var: &VarRef, span: Span) {
        match self.lookup_name(var) {
            Some(binding) => var.bind(binding),
            None => self.unknown_name(var, span),
        }
    }

    fn visit_field(&mut self, field: &FieldRef, _span: Span) {
        self.visit_expr(&field.base);

        // `Outer.Inner` in expression position names a nested class
        let base_class = match &field.base.kind {
            ExprKind::Var(var) => match var.binding() {
                Some(Binding::Class(class)) => class.get(),
                _ => None,
            },
            ExprKind::Field(base) => match base.member() {
                Some(Member::Class(class)) => class.get(),
                _ => None,
            },
            _ => None,
        };
        let Some(class) = base_class else {
            return;
        };
        let nested = class
            .scope
            .get()
            .and_then(|s| self.tables.classes.child(s, &field.name.node))
            .and_then(|node| self.entry_class(node));
        match nested {
            Some(nested) => field.resolve(Member::Class(ClassRef::new(&nested))),
            None => self.error(CompileError::bind(
                format!(
                    "class '{}' has no nested class '{}'",
                    class.qualified_name(),
                    field.name.node
                ),
                field.name.span,
            )),
        }
    }
}
