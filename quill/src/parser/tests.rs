//! Parser tests for Quill language features

use std::rc::Rc;

use pretty_assertions::assert_eq;

use crate::ast::*;
use crate::error::Status;
use crate::parser::parse_source;

/// Helper to parse a program and return the AST
fn parse_program(source: &str) -> crate::Result<Program> {
    parse_source(source, FileId(0))
}

/// Helper to parse and expect success
fn parse_ok(source: &str) -> Program {
    parse_program(source).expect("Parse should succeed")
}

/// Helper to check if parsing fails with a parse error
fn parse_fails(source: &str) -> bool {
    matches!(parse_program(source), Err(e) if e.status() == Status::Parse)
}

fn only_expr(program: &Program) -> &Expr {
    match &program.stmts[..] {
        [Stmt::Expr(expr)] => expr,
        other => panic!("Expected one expression statement, got {other:?}"),
    }
}

/// Compact rendering of an expression tree for structural assertions
fn sexpr(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Int(n) => n.to_string(),
        ExprKind::Float(n) => format!("{n:?}"),
        ExprKind::Str(s) => format!("{s:?}"),
        ExprKind::Nil => "nil".to_string(),
        ExprKind::Unary { op, operand } => format!("({op} {})", sexpr(operand)),
        ExprKind::Binary { op, lhs, rhs } => format!("({op} {} {})", sexpr(lhs), sexpr(rhs)),
        ExprKind::Assign { target, value } => format!("(= {} {})", sexpr(target), sexpr(value)),
        ExprKind::Var(var) if var.global => format!("::{}", var.name),
        ExprKind::Var(var) => var.name.clone(),
        ExprKind::Index { base, index } => format!("{}[{}]", sexpr(base), sexpr(index)),
        ExprKind::Field(field) => format!("{}.{}", sexpr(&field.base), field.name.node),
        ExprKind::Call(call) => {
            let args: Vec<String> = call.args.iter().map(sexpr).collect();
            format!("{}({})", sexpr(&call.callee), args.join(", "))
        }
    }
}

// ============================================
// Expressions
// ============================================

#[test]
fn test_parse_literals() {
    assert_eq!(sexpr(only_expr(&parse_ok("42;"))), "42");
    assert_eq!(sexpr(only_expr(&parse_ok("1.5;"))), "1.5");
    assert_eq!(sexpr(only_expr(&parse_ok(r#""hi";"#))), "\"hi\"");
    assert_eq!(sexpr(only_expr(&parse_ok("nil;"))), "nil");
}

#[test]
fn test_parse_precedence() {
    let prog = parse_ok("a + b * c - d;");
    assert_eq!(sexpr(only_expr(&prog)), "(- (+ a (* b c)) d)");
}

#[test]
fn test_parse_comparison_binds_looser_than_arithmetic() {
    let prog = parse_ok("a + 1 < b * 2 == c;");
    assert_eq!(sexpr(only_expr(&prog)), "(== (< (+ a 1) (* b 2)) c)");
}

#[test]
fn test_parse_logical_operators() {
    let prog = parse_ok("a || b && !c;");
    assert_eq!(sexpr(only_expr(&prog)), "(|| a (&& b (! c)))");
}

#[test]
fn test_parse_assignment_is_right_associative() {
    let prog = parse_ok("a = b = 3;");
    assert_eq!(sexpr(only_expr(&prog)), "(= a (= b 3))");
}

#[test]
fn test_parse_postfix_chain() {
    let prog = parse_ok("obj.items[i + 1].get(2, x)(y);");
    assert_eq!(sexpr(only_expr(&prog)), "obj.items[(+ i 1)].get(2, x)(y)");
}

#[test]
fn test_parse_global_qualifier() {
    let prog = parse_ok("::count = -1;");
    assert_eq!(sexpr(only_expr(&prog)), "(= ::count (- 1))");
}

#[test]
fn test_parse_parenthesized() {
    let prog = parse_ok("(a + b) * c;");
    assert_eq!(sexpr(only_expr(&prog)), "(* (+ a b) c)");
}

#[test]
fn test_parse_expression_spans() {
    let prog = parse_ok("x = 10 + y;");
    let expr = only_expr(&prog);
    assert_eq!(expr.span, Span::new(FileId(0), 0, 10));
}

// ============================================
// Declarations
// ============================================

#[test]
fn test_parse_var_decl_forms() {
    let prog = parse_ok("int a; float b = 2.5; Point p(1, 2); int grid[3][n]; string names[];");
    let decls: Vec<&Rc<VarDecl>> = prog
        .stmts
        .iter()
        .map(|s| match s {
            Stmt::VarDecl(d) => d,
            other => panic!("Expected VarDecl, got {other:?}"),
        })
        .collect();
    assert_eq!(decls.len(), 5);
    assert!(decls[0].init.is_none() && decls[0].ctor_args.is_none());
    assert!(decls[1].init.is_some());
    assert_eq!(decls[2].ctor_args.as_ref().map(Vec::len), Some(2));
    assert_eq!(decls[3].dims.len(), 2);
    assert!(decls[3].has_sized_dims());
    assert_eq!(decls[4].dims.len(), 1);
    assert!(!decls[4].has_sized_dims());
}

#[test]
fn test_parse_reference_and_array_types() {
    let prog = parse_ok("int[]& r = xs; Outer.Inner[][] m;");
    let Stmt::VarDecl(r) = &prog.stmts[0] else { panic!("Expected VarDecl") };
    assert!(r.ty.is_reference);
    assert_eq!(r.ty.array_dims, 1);
    let Stmt::VarDecl(m) = &prog.stmts[1] else { panic!("Expected VarDecl") };
    assert_eq!(m.ty.to_string(), "Outer.Inner[][]");
}

#[test]
fn test_parse_function_pointer_type() {
    let prog = parse_ok("function<int(int, float)> f = add;");
    let Stmt::VarDecl(decl) = &prog.stmts[0] else { panic!("Expected VarDecl") };
    assert_eq!(decl.ty.to_string(), "function<int(int, float)>");
}

#[test]
fn test_parse_function_decl() {
    let prog = parse_ok("int add(int a, int b = 2) { return a + b; }");
    let Stmt::FnDecl(f) = &prog.stmts[0] else { panic!("Expected FnDecl") };
    assert_eq!(f.name.node, "add");
    assert_eq!(f.params.len(), 2);
    assert_eq!(f.required_params(), 1);
    assert_eq!(f.params[0].storage(), Storage::Param);
    assert!(f.body.is_some());
    assert!(!f.is_import);
}

#[test]
fn test_parse_function_without_params() {
    let prog = parse_ok("void tick() { }");
    assert!(matches!(&prog.stmts[0], Stmt::FnDecl(f) if f.params.is_empty()));
}

#[test]
fn test_parse_empty_ctor_args_is_variable() {
    let prog = parse_ok("Counter c();");
    assert!(matches!(
        &prog.stmts[0],
        Stmt::VarDecl(d) if d.ctor_args.as_ref().is_some_and(Vec::is_empty)
    ));
}

#[test]
fn test_parse_reference_param() {
    let prog = parse_ok("void inc(int& x) { x = x + 1; }");
    let Stmt::FnDecl(f) = &prog.stmts[0] else { panic!("Expected FnDecl") };
    assert!(f.params[0].is_reference());
}

#[test]
fn test_parse_class_decl() {
    let src = r#"
        class Stack {
            int items[16];
            int size = 0;
            Stack(int capacity) { }
            ~Stack() { }
            void push(int v) { items[size] = v; size = size + 1; }
            class Node { int value; };
            typedef Node Entry;
        };
    "#;
    let prog = parse_ok(src);
    let Stmt::ClassDecl(class) = &prog.stmts[0] else { panic!("Expected ClassDecl") };
    assert_eq!(class.name.node, "Stack");
    assert_eq!(class.fields.len(), 2);
    assert_eq!(class.methods.len(), 3);
    assert_eq!(class.constructors().count(), 1);
    assert!(class.destructor().is_some());
    assert_eq!(class.classes.len(), 1);
    assert_eq!(class.typedefs.len(), 1);
    assert_eq!(class.auto_constructed, vec![0]);
}

#[test]
fn test_parse_class_trailing_semicolon_optional() {
    let prog = parse_ok("class A { } int x;");
    assert_eq!(prog.stmts.len(), 2);
}

#[test]
fn test_parse_typedef() {
    let prog = parse_ok("typedef int[] IntList;");
    let Stmt::Typedef(t) = &prog.stmts[0] else { panic!("Expected Typedef") };
    assert_eq!(t.name.node, "IntList");
    assert_eq!(t.target.array_dims, 1);
}

// ============================================
// Statements
// ============================================

#[test]
fn test_parse_if_else_wraps_bodies() {
    let prog = parse_ok("if (a < 1) b = 2; else { b = 3; }");
    let Stmt::If(stmt) = &prog.stmts[0] else { panic!("Expected If") };
    assert_eq!(stmt.then_branch.stmts.len(), 1);
    assert!(stmt.else_branch.is_some());
}

#[test]
fn test_parse_while_break() {
    let prog = parse_ok("while (1) { break; }");
    let Stmt::While(stmt) = &prog.stmts[0] else { panic!("Expected While") };
    assert!(matches!(stmt.body.stmts[0], Stmt::Break(_)));
}

#[test]
fn test_parse_return_forms() {
    let prog = parse_ok("void f() { return; } int g() { return 1; }");
    let Stmt::FnDecl(f) = &prog.stmts[0] else { panic!("Expected FnDecl") };
    let body = f.body.as_ref().unwrap();
    assert!(matches!(&body.stmts[0], Stmt::Return(r) if r.value.is_none()));
}

#[test]
fn test_parse_empty_statement_and_block() {
    let prog = parse_ok("int x = 1; { int x = 2; } ; x;");
    assert_eq!(prog.stmts.len(), 4);
    assert!(matches!(prog.stmts[1], Stmt::Block(_)));
    assert!(matches!(prog.stmts[2], Stmt::Empty(_)));
}

#[test]
fn test_parse_directives() {
    let prog = parse_ok(r#"import "mathlib"; include "shapes.ql";"#);
    let kinds: Vec<(DirectiveKind, &str)> = prog
        .stmts
        .iter()
        .map(|s| match s {
            Stmt::Directive(d) => (d.kind, d.target.node.as_str()),
            other => panic!("Expected Directive, got {other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![(DirectiveKind::Import, "mathlib"), (DirectiveKind::Include, "shapes.ql")]
    );
}

#[test]
fn test_parse_native_prototype() {
    let prog = parse_ok("import float sqrt(float x);");
    let Stmt::FnDecl(f) = &prog.stmts[0] else { panic!("Expected FnDecl") };
    assert!(f.is_import);
    assert!(f.body.is_none());
    assert_eq!(f.params.len(), 1);
}

#[test]
fn test_parse_statement_span_covers_semicolon() {
    let src = "int value = 3;";
    let prog = parse_ok(src);
    assert_eq!(prog.stmts[0].span(), Span::new(FileId(0), 0, src.len()));
}

// ============================================
// Errors
// ============================================

#[test]
fn test_parse_error_missing_semicolon() {
    assert!(parse_fails("int a = 3"));
}

#[test]
fn test_parse_error_unclosed_call() {
    assert!(parse_fails("int a = 3; badSyntax("));
}

#[test]
fn test_parse_error_nested_function() {
    assert!(parse_fails("void f() { int g(int x) { } }"));
}

#[test]
fn test_parse_error_directive_in_block() {
    assert!(parse_fails(r#"{ import "x"; }"#));
}

#[test]
fn test_parse_error_statement_in_class_body() {
    assert!(parse_fails("class A { x = 3; };"));
}

#[test]
fn test_parse_error_class_in_function() {
    assert!(parse_fails("void f() { class B { }; }"));
}

#[test]
fn test_parse_error_message() {
    let err = parse_program("int = 4;").unwrap_err();
    assert!(err.message().contains("expected"), "{}", err.message());
}

#[test]
fn test_scan_error_is_reported_as_scan() {
    let err = parse_program("int a = $;").unwrap_err();
    assert_eq!(err.status(), Status::Scan);
}
