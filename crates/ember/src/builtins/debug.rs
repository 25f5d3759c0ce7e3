//! `debug.assert` / `debug.printAssertionResults` / `debug.disassemble` (§6).

use crate::disassemble::disassemble_closure;
use crate::engine::Engine;
use crate::value::Value;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Counts the assertion and, if it held, the met count; prints a
/// coloured OK/ERROR line either way.
pub fn assert(engine: &mut Engine, args: &[Value]) -> Value {
    let held = args.first().is_some_and(Value::is_truthy);
    let ctx = engine.debug();
    ctx.assertions += 1;
    if held {
        ctx.assertions_met += 1;
        println!("{GREEN}OK{RESET}");
    } else {
        println!("{RED}ERROR{RESET}");
    }
    Value::Nil
}

pub fn print_assertion_results(engine: &mut Engine, _args: &[Value]) -> Value {
    let ctx = engine.debug();
    println!("{}/{} assertions met", ctx.assertions_met, ctx.assertions);
    Value::Nil
}

/// Dumps the argument closure's prototype bytecode to standard output.
pub fn disassemble(engine: &mut Engine, args: &[Value]) -> Value {
    if let Some(id) = args.first().and_then(Value::as_obj) {
        println!("{}", disassemble_closure(engine, id));
    }
    Value::Nil
}
