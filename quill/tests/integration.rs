//! Integration tests for Quill sessions
//!
//! Tests the whole pipeline through the embedding API:
//! - Persistence and transactional commit across runs
//! - Destructors, construction order and reference cycles
//! - Overloading, scoping and reference parameters
//! - Multi-file programs and native modules

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use quill::ast::Type;
use quill::interp::{Linker, NativeArgs, NativeModule, NativeResult, RuntimeValue};
use quill::session::{LookupError, Session, SessionConfig};
use quill::Status;

/// Native module recording every `log(n)` call
struct LogModule {
    log: Rc<RefCell<Vec<i64>>>,
}

impl NativeModule for LogModule {
    fn load(&self, linker: &mut Linker<'_>) -> Result<(), String> {
        let log = Rc::clone(&self.log);
        linker.bind_function(
            &["log"],
            &[Type::Int],
            move |args: &mut NativeArgs<'_>| -> NativeResult {
                log.borrow_mut().push(args.int(0)?);
                Ok(RuntimeValue::Empty)
            },
        )
    }
}

/// Session where `import "log";` is available
fn logging_session() -> (Session, Rc<RefCell<Vec<i64>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut session = Session::default();
    session.add_library("log", "import void log(int n);");
    session.add_native_module("log", LogModule { log: Rc::clone(&log) });
    (session, log)
}

/// Run `src`, panicking with the rendered errors on failure
fn run_ok(session: &mut Session, src: &str) {
    let result = session.run(src);
    assert!(result.is_success(), "{}", result.message);
}

fn int(session: &Session, name: &str) -> i64 {
    match session.get_variable(name) {
        Ok(RuntimeValue::Int(n)) => n,
        other => panic!("Expected int for {name}, got {other:?}"),
    }
}

// ============================================
// Persistence and Transactions
// ============================================

#[test]
fn test_globals_persist() {
    let mut session = Session::default();
    run_ok(&mut session, "int a = 3;");
    run_ok(&mut session, "a = a + 1; a;");
    assert!(matches!(session.result(), RuntimeValue::Int(4)));
}

#[test]
fn test_parse_failure_commits_nothing() {
    let mut session = Session::default();
    let result = session.run("int a = 3; badSyntax(");
    assert_eq!(result.status, Status::Parse);
    assert_eq!(session.get_variable("a"), Err(LookupError::Undeclared("a".to_string())));
}

#[test]
fn test_functions_and_classes_persist() {
    let mut session = Session::default();
    run_ok(&mut session, "class Counter { int n; void bump() { n = n + 1; } };");
    run_ok(&mut session, "int twice(int x) { return x * 2; }");
    run_ok(&mut session, "Counter c; c.bump(); c.bump(); int r = twice(c.n);");
    assert_eq!(int(&session, "r"), 4);
}

#[test]
fn test_bind_failure_keeps_earlier_declarations() {
    let mut session = Session::default();
    run_ok(&mut session, "int a = 1;");
    assert_eq!(session.run("int b = 2; int c = missing;").status, Status::Bind);
    assert!(session.get_variable("b").is_err());
    assert_eq!(int(&session, "a"), 1);
    run_ok(&mut session, "int b = 5;");
}

#[test]
fn test_runtime_fault_rolls_back_new_globals() {
    let (mut session, log) = logging_session();
    run_ok(
        &mut session,
        r#"import "log"; class D { int id; D(int i) { id = i; } ~D() { log(id); } };"#,
    );
    let result = session.run("D kept(1); int[] xs; xs[0] = 1;");
    assert_eq!(result.status, Status::Runtime);
    assert!(session.get_variable("kept").is_err());
    // the discarded global was destroyed during the unwind
    assert_eq!(*log.borrow(), vec![1]);
    run_ok(&mut session, "D kept(2);");
    assert!(session.get_variable("kept").is_ok());
}

#[test]
fn test_worst_status_is_reported() {
    let mut session = Session::default();
    let result = session.run("int a = b; int c = d;");
    assert_eq!(result.status, Status::Bind);
    assert_eq!(result.errors.len(), 2);
}

// ============================================
// Destructors and Construction
// ============================================

#[test]
fn test_destructor_runs_once() {
    let (mut session, log) = logging_session();
    let src = r#"
        import "log";
        class D { int id; D(int i) { id = i; } ~D() { log(id); } };
        {
            D d(7);
            D a = d;
            D b = a;
        }
    "#;
    run_ok(&mut session, src);
    assert_eq!(*log.borrow(), vec![7]);
}

#[test]
fn test_array_elements_construct_in_index_order() {
    let (mut session, log) = logging_session();
    let src = r#"
        import "log";
        int next = 0;
        class X { int id; X() { id = next; log(next); next = next + 1; } };
        X arr[3];
    "#;
    run_ok(&mut session, src);
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
    run_ok(&mut session, "arr[2].id;");
    assert!(matches!(session.result(), RuntimeValue::Int(2)));
}

#[test]
fn test_cycles_destroyed_once_on_reset() {
    let (mut session, log) = logging_session();
    let src = r#"
        import "log";
        class N { N next = nil; int id; ~N() { log(id); } };
        N a; a.id = 1;
        N b; b.id = 2;
        a.next = b; b.next = a;
        N loner; loner.id = 3; loner.next = loner;
    "#;
    run_ok(&mut session, src);
    assert!(log.borrow().is_empty());
    session.reset();
    let mut seen = log.borrow().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3]);
    assert!(session.get_variable("a").is_err());
}

#[test]
fn test_session_drop_runs_outstanding_destructors() {
    let (mut session, log) = logging_session();
    run_ok(&mut session, r#"import "log"; class D { ~D() { log(9); } }; D d;"#);
    drop(session);
    assert_eq!(*log.borrow(), vec![9]);
}

// ============================================
// Names, Overloads and References
// ============================================

#[test]
fn test_identical_prototypes_are_rejected() {
    let mut session = Session::default();
    assert_eq!(session.run(
        "int f(int a) { return a; } int f(int b) { return b; }",
    ).status, Status::Bind);
    run_ok(&mut session, "int g(int a) { return 1; }");
    assert_eq!(session.run("int g(int z) { return 2; }").status, Status::Bind);
    run_ok(&mut session, "int g(float z) { return 2; } int r = g(1) + g(1.0) * 10;");
    assert_eq!(int(&session, "r"), 21);
}

#[test]
fn test_aliased_prototypes_are_rejected_at_declaration() {
    let mut session = Session::default();
    let result = session.run("class A { }; typedef A B; void f(A a) { } void f(B b) { }");
    assert_eq!(result.status, Status::Bind);
    run_ok(&mut session, "class A { }; void f(A a) { }");
    assert_eq!(session.run("void f(::A other) { }").status, Status::Bind);
    run_ok(&mut session, "typedef A Alias;");
    assert_eq!(session.run("void f(Alias other) { }").status, Status::Bind);
    run_ok(&mut session, "A a; f(a);");
}

#[test]
fn test_inner_scope_shadows() {
    let mut session = Session::default();
    run_ok(&mut session, "int x = 1; { int x = 2; } ; x;");
    assert!(matches!(session.result(), RuntimeValue::Int(1)));
}

#[test]
fn test_reference_parameter() {
    let mut session = Session::default();
    run_ok(&mut session, "void inc(int& x) { x = x + 1; } int a = 5; inc(a);");
    assert_eq!(int(&session, "a"), 6);
    run_ok(&mut session, "void inc_copy(int x) { x = x + 1; } int b = 5; inc_copy(b);");
    assert_eq!(int(&session, "b"), 5);
}

#[test]
fn test_reference_to_member_and_element() {
    let mut session = Session::default();
    run_ok(
        &mut session,
        "class P { int x; }; void set(int& v, int n) { v = n; } P p; int xs[2]; \
         set(p.x, 4); set(xs[1], 5); int r = p.x * 10 + xs[1];",
    );
    assert_eq!(int(&session, "r"), 45);
}

#[test]
fn test_type_errors_stop_before_evaluation() {
    let (mut session, log) = logging_session();
    let result = session.run(r#"import "log"; log(1); string s = 3;"#);
    assert_eq!(result.status, Status::Type);
    assert!(log.borrow().is_empty());
}

// ============================================
// Multi-file Programs
// ============================================

#[test]
fn test_includes_run_once_dependencies_first() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.ql"), "int order = 1;").unwrap();
    fs::write(dir.path().join("left.ql"), r#"include "base"; order = order * 10 + 2;"#).unwrap();
    fs::write(dir.path().join("right.ql"), r#"include "base"; order = order * 10 + 3;"#).unwrap();

    let mut session = Session::new(SessionConfig::new().with_search_dir(dir.path()));
    run_ok(&mut session, r#"include "left"; include "right"; order = order * 10 + 4;"#);
    assert_eq!(int(&session, "order"), 1234);

    // already parsed: nothing runs again
    run_ok(&mut session, r#"include "base"; include "left";"#);
    assert_eq!(int(&session, "order"), 1234);
}

#[test]
fn test_missing_include_is_parse_error() {
    let mut session = Session::default();
    let result = session.run(r#"include "does_not_exist_anywhere";"#);
    assert_eq!(result.status, Status::Parse);
    assert!(result.message.contains("does_not_exist_anywhere"));
}

#[test]
fn test_failed_run_does_not_mark_file_parsed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("lib.ql"), "int from_lib = 7;").unwrap();
    let mut session = Session::new(SessionConfig::new().with_search_dir(dir.path()));
    assert_eq!(session.run(r#"include "lib"; int x = nope;"#).status, Status::Bind);
    run_ok(&mut session, r#"include "lib";"#);
    assert_eq!(int(&session, "from_lib"), 7);
}

#[test]
fn test_run_file() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("main.ql");
    fs::write(&main, "int answer = 6 * 7;").unwrap();
    let mut session = Session::default();
    run_ok(&mut session, "int before = 1;");
    assert!(session.run_file(&main).is_success());
    assert_eq!(int(&session, "answer"), 42);
    assert_eq!(session.run_file(&dir.path().join("missing.ql")).status, Status::Parse);
}

// ============================================
// Native Functions
// ============================================

#[test]
fn test_native_module_binds_on_import() {
    let (mut session, log) = logging_session();
    run_ok(&mut session, r#"import "log"; log(1);"#);
    run_ok(&mut session, "log(2);");
    assert_eq!(*log.borrow(), vec![1, 2]);
}

#[test]
fn test_unbound_native_fails_at_call_time() {
    let mut session = Session::default();
    run_ok(&mut session, "import float sqrt(float x);");
    let result = session.run("float r = sqrt(4.0);");
    assert_eq!(result.status, Status::Runtime);
    assert!(result.message.contains("sqrt"));
}

#[test]
fn test_unknown_native_module_leaves_prototypes_unbound() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("math.ql"), "import float sqrt(float x);").unwrap();
    let mut session = Session::new(SessionConfig::new().with_search_dir(dir.path()));
    run_ok(&mut session, r#"import "math";"#);
    assert_eq!(session.run("sqrt(2.0);").status, Status::Runtime);
}

#[test]
fn test_native_member_function_receives_object() {
    let mut session = Session::default();
    run_ok(&mut session, "class Box { int v = 3; import int doubled(); };");
    let class = session.get_class(&["Box"]).unwrap();
    let decl = class.methods_named("doubled")[0].clone();
    session.register_native(&decl, |args: &mut NativeArgs<'_>| -> NativeResult {
        let RuntimeValue::Object(this) = args.get(0)? else {
            return Err("expected receiver".to_string());
        };
        let v = this.get(0).and_then(|v| v.as_int()).ok_or("no field")?;
        Ok(RuntimeValue::Int(v * 2))
    });
    run_ok(&mut session, "Box b; int r = b.doubled();");
    assert_eq!(int(&session, "r"), 6);
}

#[test]
fn test_native_writes_through_reference() {
    let mut session = Session::default();
    run_ok(&mut session, "import void zero(int& x);");
    let decl = session.get_function(&["zero"], &[Type::Int]).unwrap();
    session.register_native(&decl, |args: &mut NativeArgs<'_>| -> NativeResult {
        args.set(0, RuntimeValue::Int(0))?;
        Ok(RuntimeValue::Empty)
    });
    run_ok(&mut session, "int a = 5; zero(a);");
    assert_eq!(int(&session, "a"), 0);
}

#[test]
fn test_extension_context_reaches_modules() {
    struct Counting;
    impl NativeModule for Counting {
        fn load(&self, linker: &mut Linker<'_>) -> Result<(), String> {
            let loads = linker.context::<u32>().ok_or("missing context")?;
            *loads += 1;
            Ok(())
        }
    }

    let mut session = Session::default();
    session.add_library("counting", "");
    session.add_native_module("counting", Counting);
    session.set_extension_context(0u32);
    run_ok(&mut session, r#"import "counting";"#);
    run_ok(&mut session, r#"import "counting";"#);
    assert_eq!(session.extension_context::<u32>().copied(), Some(1));
}

// ============================================
// Export
// ============================================

#[test]
fn test_export_code_replays_session() {
    let mut session = Session::default();
    run_ok(&mut session, "int a = 1;");
    run_ok(&mut session, "int twice(int x) { return x * 2; }");
    run_ok(&mut session, "a = twice(a + 1);");
    assert!(!session.run("int broken(").is_success());

    let mut exported = Vec::new();
    session.export_code(&mut exported).unwrap();
    let exported = String::from_utf8(exported).unwrap();
    insta::assert_snapshot!(exported, @r"
    int a = 1;
    int twice(int x) { return x * 2; }
    a = twice(a + 1);
    ");

    let mut replay = Session::default();
    run_ok(&mut replay, &exported);
    assert_eq!(int(&replay, "a"), 4);
}
