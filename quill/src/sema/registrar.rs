//! Declaration registration
//!
//! First pass over a freshly parsed tree. Top-level declarations go into the
//! symbol tables so later passes can refer to them before their textual
//! position. Class bodies are recorded recursively. Function bodies are not
//! entered. `import`/`include` targets are collected but never parsed here.

use std::rc::Rc;

use crate::ast::*;
use crate::error::{CompileError, Diagnostics};
use crate::symbols::{ROOT, SymbolTables, find_same_prototype};

/// Output of registering one tree
#[derive(Debug, Default)]
pub struct Registration {
    /// `import "x"` targets in first-seen order
    pub imports: Vec<Spanned<String>>,
    /// `include "x"` targets in first-seen order
    pub includes: Vec<Spanned<String>>,
    pub diagnostics: Diagnostics,
}

/// Register the top-level declarations of `program`
pub fn register(program: &Program, tables: &mut SymbolTables) -> Registration {
    let mut registrar = Registrar { tables, out: Registration::default() };
    for stmt in &program.stmts {
        registrar.register_stmt(stmt);
    }
    tracing::debug!(
        imports = registrar.out.imports.len(),
        includes = registrar.out.includes.len(),
        errors = registrar.out.diagnostics.len(),
        "registered declarations"
    );
    registrar.out
}

struct Registrar<'a> {
    tables: &'a mut SymbolTables,
    out: Registration,
}

fn redeclared(name: &str, span: Span, previous: Span) -> CompileError {
    CompileError::bind(format!("'{name}' is already declared"), span)
        .with_note("previous declaration is here", Some(previous))
}

fn push_unique(list: &mut Vec<Spanned<String>>, target: &Spanned<String>) {
    if !list.iter().any(|t| t.node == target.node) {
        list.push(target.clone());
    }
}

impl Registrar<'_> {
    fn register_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(decl) => self.register_global(decl),
            Stmt::FnDecl(decl) => self.register_function(decl),
            Stmt::ClassDecl(decl) => self.register_class(decl),
            Stmt::Typedef(decl) => self.register_typedef(decl),
            Stmt::Directive(directive) => match directive.kind {
                DirectiveKind::Import => push_unique(&mut self.out.imports, &directive.target),
                DirectiveKind::Include => push_unique(&mut self.out.includes, &directive.target),
            },
            Stmt::Empty(_)
            | Stmt::Expr(_)
            | Stmt::Block(_)
            | Stmt::If(_)
            | Stmt::While(_)
            | Stmt::Break(_)
            | Stmt::Return(_) => {}
        }
    }

    /// Span of a global function or class/typedef already using `name`
    fn global_clash(&self, name: &str, skip_functions: bool) -> Option<Span> {
        if !skip_functions {
            if let Some(set) = self.tables.functions.find(name) {
                return set.decls.first().map(|d| d.name.span);
            }
        }
        self.tables.classes.find(&[name]).map(|entry| entry.span())
    }

    /// Global variable or function clashing with a global class/typedef name
    fn type_name_clash(&self, name: &str) -> Option<Span> {
        if self.tables.classes.current() != ROOT {
            return None;
        }
        self.tables
            .vars
            .find_global(name)
            .map(|v| v.name.span)
            .or_else(|| {
                let set = self.tables.functions.find(name)?;
                set.decls.first().map(|d| d.name.span)
            })
    }

    fn register_global(&mut self, decl: &Rc<VarDecl>) {
        let name = &decl.name.node;
        decl.storage.set(Storage::Global);
        if let Some(previous) = self.global_clash(name, false) {
            self.out.diagnostics.push(redeclared(name, decl.name.span, previous));
            return;
        }
        if let Err(previous) = self.tables.vars.insert(name, Rc::clone(decl)) {
            self.out.diagnostics.push(redeclared(name, decl.name.span, previous.name.span));
        }
    }

    fn register_function(&mut self, decl: &Rc<FnDecl>) {
        let name = &decl.name.node;
        let clash = self
            .tables
            .vars
            .find_global(name)
            .map(|v| v.name.span)
            .or_else(|| self.global_clash(name, true));
        if let Some(previous) = clash {
            self.out.diagnostics.push(redeclared(name, decl.name.span, previous));
            return;
        }
        if let Err(previous) = self.tables.functions.insert(Rc::clone(decl)) {
            self.out.diagnostics.push(
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

    fn register_class(&mut self, decl: &Rc<ClassDecl>) {
        let name = &decl.name.node;
        if let Some(previous) = self.type_name_clash(name) {
            self.out.diagnostics.push(redeclared(name, decl.name.span, previous));
            return;
        }
        match self.tables.classes.begin_scope(name, decl) {
            Ok(_) => {
                self.register_class_body(decl);
                self.tables.classes.end_scope();
            }
            Err(previous) => {
                self.out.diagnostics.push(redeclared(name, decl.name.span, previous.span()));
            }
        }
    }

    fn register_typedef(&mut self, decl: &Rc<TypedefDecl>) {
        let name = &decl.name.node;
        if let Some(previous) = self.type_name_clash(name) {
            self.out.diagnostics.push(redeclared(name, decl.name.span, previous));
            return;
        }
        if let Err(previous) = self.tables.classes.insert_typedef(name, decl) {
            self.out.diagnostics.push(redeclared(name, decl.name.span, previous.span()));
        }
    }

    /// Members, methods, nested classes and typedefs of one class
    fn register_class_body(&mut self, class: &Rc<ClassDecl>) {
        for (i, field) in class.fields.iter().enumerate() {
            let name = &field.name.node;
            let clash = match class.fields[..i].iter().find(|f| f.name.node == *name) {
                Some(previous) => Some(previous.name.span),
                None => class.methods.iter().find(|m| m.name.node == *name).map(|m| m.name.span),
            };
            if let Some(previous) = clash {
                self.out.diagnostics.push(redeclared(name, field.name.span, previous));
            }
        }

        for (i, method) in class.methods.iter().enumerate() {
            let earlier: Vec<Rc<FnDecl>> = class.methods[..i]
                .iter()
                .filter(|m| m.name.node == method.name.node)
                .cloned()
                .collect();
            if let Some(previous) = find_same_prototype(&earlier, method) {
                let message = format!(
                    "method '{}' of class '{}' is already declared with the same parameters",
                    method.signature(),
                    class.name.node
                );
                self.out.diagnostics.push(
                    CompileError::bind(message, method.name.span)
                        .with_note("previous declaration is here", Some(previous.name.span)),
                );
            }
        }

        for stmt in &class.body {
            match stmt {
                Stmt::ClassDecl(nested) => {
                    *nested.parent.borrow_mut() = Some(ClassRef::new(class));
                    if let Some(member) = member_named(class, &nested.name.node) {
                        let error = redeclared(&nested.name.node, nested.name.span, member);
                        self.out.diagnostics.push(error);
                        continue;
                    }
                    self.register_class(nested);
                }
                Stmt::Typedef(typedef) => {
                    if let Some(member) = member_named(class, &typedef.name.node) {
                        let error = redeclared(&typedef.name.node, typedef.name.span, member);
                        self.out.diagnostics.push(error);
                        continue;
                    }
                    self.register_typedef(typedef);
                }
                _ => {}
            }
        }
    }
}

/// Field or method of `class` called `name`
fn member_named(class: &ClassDecl, name: &str) -> Option<Span> {
    class
        .field(name)
        .map(|f| f.name.span)
        .or_else(|| class.methods_named(name).first().map(|m| m.name.span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::parser::parse_source;
    use crate::symbols::ClassEntry;

    fn run(src: &str) -> (SymbolTables, Registration) {
        let program = parse_source(src, FileId(0)).unwrap();
        let mut tables = SymbolTables::new();
        let out = register(&program, &mut tables);
        (tables, out)
    }

    fn class_entry(tables: &SymbolTables, path: &[&str]) -> Option<ClassEntry> {
        tables.classes.find(path)
    }

    #[test]
    fn test_registers_globals_functions_classes() {
        let (tables, out) = run(
            "int a; int f() { return 1; } class C { int x; }; typedef C Alias;",
        );
        assert!(out.diagnostics.is_empty());
        assert_eq!(tables.vars.find("a").unwrap().storage(), Storage::Global);
        assert!(tables.functions.contains("f"));
        assert!(class_entry(&tables, &["C"]).is_some());
        assert!(matches!(class_entry(&tables, &["Alias"]), Some(ClassEntry::Typedef(_))));
    }

    #[test]
    fn test_locals_are_not_registered() {
        let (tables, _) = run("{ int inner; } void f() { int local; }");
        assert!(tables.vars.find("inner").is_none());
        assert!(tables.vars.find("local").is_none());
    }

    #[test]
    fn test_duplicate_prototype_is_bind_error() {
        let (_, out) = run("int f(int a) { return a; } int f(int b) { return b; }");
        assert_eq!(out.diagnostics.status(), Status::Bind);
        let err = &out.diagnostics.errors()[0];
        assert!(err.note().is_some_and(|n| n.span.is_some()));
    }

    #[test]
    fn test_cross_kind_redeclaration() {
        let (_, out) = run("int thing; void thing() { }");
        assert_eq!(out.diagnostics.status(), Status::Bind);
        let (_, out) = run("class Thing { }; int Thing;");
        assert_eq!(out.diagnostics.status(), Status::Bind);
    }

    #[test]
    fn test_member_clashes() {
        let (_, out) = run("class C { int x; void x() { } };");
        assert_eq!(out.diagnostics.len(), 1);
        let (_, out) = run("class C { void m(int a) { } void m(int b) { } };");
        assert_eq!(out.diagnostics.status(), Status::Bind);
        let (_, out) = run("class C { void m(int a) { } void m(float b) { } };");
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_nested_classes_registered_with_parent() {
        let (tables, out) = run("class Outer { class Inner { }; typedef Inner Alias; };");
        assert!(out.diagnostics.is_empty());
        let inner = class_entry(&tables, &["Outer", "Inner"]).unwrap();
        let inner = inner.as_class().unwrap();
        assert_eq!(inner.qualified_name(), "Outer.Inner");
        assert!(class_entry(&tables, &["Outer", "Alias"]).is_some());
    }

    #[test]
    fn test_directives_are_deduplicated_in_order() {
        let (_, out) = run(r#"include "b"; import "m"; include "a"; include "b"; import "m";"#);
        let includes: Vec<&str> = out.includes.iter().map(|t| t.node.as_str()).collect();
        let imports: Vec<&str> = out.imports.iter().map(|t| t.node.as_str()).collect();
        assert_eq!(includes, vec!["b", "a"]);
        assert_eq!(imports, vec!["m"]);
    }
}
