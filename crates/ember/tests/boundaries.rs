//! Boundary behaviors from the specification's testable-properties list.

use ember::{CompileError, Engine, Package};

fn run(source: &str) -> (bool, Vec<String>) {
    let errors = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink_errors = errors.clone();
    let mut engine = Engine::new(move |message: &str| sink_errors.borrow_mut().push(message.to_string()));
    let mut package = Package::new("boundary");
    if engine.compile(&mut package, source).is_err() {
        return (false, errors.borrow().clone());
    }
    let ok = engine.execute_package(&mut package);
    (ok, errors.borrow().clone())
}

/// Builds `fn(n) { if n == 0 0 else f(n - 1) }`-style source that recurses
/// exactly `depth` calls deep before returning.
fn generate_recursive_chain(depth: usize) -> String {
    format!("var f = fn(n) {{ if n == 0 0 else f(n - 1) }}\nf({depth})")
}

#[test]
fn call_depth_255_succeeds_256_fails() {
    // `f(254)` keeps 255 calls (f(254)..f(0)) simultaneously active —
    // the root frame plus that makes exactly FRAME_MAX (256) frames.
    let (ok, errors) = run(&generate_recursive_chain(254));
    assert!(ok, "errors: {errors:?}");

    // `f(255)` needs one more simultaneously-active call than fits.
    let (ok, errors) = run(&generate_recursive_chain(255));
    assert!(!ok);
    assert!(errors.iter().any(|e| e.contains("Recursion stack overflow.")));
}

#[test]
fn arity_mismatch_is_a_runtime_error() {
    let (ok, errors) = run("var f = fn(a, b) { a + b }\nio.print(f(1))");
    assert!(!ok);
    assert!(errors.iter().any(|e| e.contains("Wrong argument count.")));

    let (ok, errors) = run("var f = fn(a, b) { a + b }\nio.print(f(1, 2, 3))");
    assert!(!ok);
    assert!(errors.iter().any(|e| e.contains("Wrong argument count.")));
}

#[test]
fn uninitialized_global_reads_as_nil() {
    // Referencing a never-assigned global must not be a runtime error:
    // `GET_GLOBAL` grows the globals vector with `nil` lazily (§4.4).
    let (ok, errors) = run("undefined_name == nil");
    assert!(ok, "errors: {errors:?}");
}

#[test]
fn too_many_call_arguments_is_rejected_at_compile_time() {
    let args: Vec<String> = (0..300).map(|i| i.to_string()).collect();
    let source = format!("io.print({})", args.join(", "));

    let errors = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink_errors = errors.clone();
    let mut engine = Engine::new(move |message: &str| sink_errors.borrow_mut().push(message.to_string()));
    let mut package = Package::new("boundary");
    match engine.compile(&mut package, &source) {
        Err(CompileError::Limit(limit)) => assert_eq!(limit.what, "call arguments"),
        other => panic!("expected a call-arguments limit error, got {other:?}"),
    }
}

#[test]
fn subscripting_a_non_identifier_chain_is_a_semantic_error() {
    let errors = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink_errors = errors.clone();
    let mut engine = Engine::new(move |message: &str| sink_errors.borrow_mut().push(message.to_string()));
    let mut package = Package::new("boundary");
    match engine.compile(&mut package, "(1 + 2).x") {
        Err(CompileError::Semantic(e)) => assert_eq!(e.message, "Cannot subscript this expression."),
        other => panic!("expected a semantic error, got {other:?}"),
    }
}
