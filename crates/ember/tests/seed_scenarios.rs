//! End-to-end scenarios from the specification's seed-scenario list:
//! compile and run real source, observe stdout and error text through a
//! test-local `io.print` native rather than the process's real stdout.

use std::cell::RefCell;
use std::rc::Rc;

use ember::{Engine, Package};

thread_local! {
    static PRINTED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn test_print(engine: &mut Engine, args: &[ember::Value]) -> ember::Value {
    let mut line = String::new();
    for value in args {
        line.push_str(&engine.display_value(*value));
        line.push(' ');
    }
    PRINTED.with(|p| p.borrow_mut().push(line));
    ember::Value::Nil
}

fn run(source: &str) -> (bool, Vec<String>, Vec<String>) {
    PRINTED.with(|p| p.borrow_mut().clear());
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink_errors = errors.clone();
    let mut engine = Engine::new(move |message: &str| sink_errors.borrow_mut().push(message.to_string()));
    let mut package = Package::new("scenario");
    let print = engine.make_native("io.print", test_print);
    engine.define_global(&mut package, "io.print", print);

    let ok = engine.compile(&mut package, source).is_ok() && engine.execute_package(&mut package);
    let printed = PRINTED.with(|p| p.borrow().clone());
    (ok, printed, errors.borrow().clone())
}

#[test]
fn arithmetic_precedence() {
    let (ok, printed, _) = run("io.print(1 + 2 * 3)");
    assert!(ok);
    assert_eq!(printed, vec!["7.000000 ".to_string()]);
}

#[test]
fn reassignment() {
    let (ok, printed, _) = run("var x = 10\nx = x - 4\nio.print(x)");
    assert!(ok);
    assert_eq!(printed, vec!["6.000000 ".to_string()]);
}

#[test]
fn recursive_fibonacci() {
    let (ok, printed, errors) =
        run("var f = fn(n) { if n < 2 n else f(n - 1) + f(n - 2) }\nio.print(f(10))");
    assert!(ok, "errors: {errors:?}");
    assert_eq!(printed, vec!["55.000000 ".to_string()]);
}

#[test]
fn type_error_has_source_caret() {
    let (ok, printed, errors) = run("io.print(1 + true)");
    assert!(!ok);
    assert!(printed.is_empty());
    assert!(errors.iter().any(|e| e.contains("Cannot add bool and number.")));
    assert!(errors.iter().any(|e| e.contains('^')));
}

#[test]
fn counter_closure_shares_upvalue_across_calls() {
    let (ok, printed, errors) = run(
        "var mk = fn() { var c = 0\nfn() { c = c + 1\nc } }\n\
         var g = mk()\n\
         io.print(g())\n\
         io.print(g())",
    );
    assert!(ok, "errors: {errors:?}");
    assert_eq!(printed, vec!["1.000000 ".to_string(), "2.000000 ".to_string()]);
}

#[test]
fn top_level_if_else_discards_its_value() {
    let (ok, printed, errors) = run("if true 1 else 2");
    assert!(ok, "errors: {errors:?}");
    assert!(printed.is_empty());
}
