//! `io.print` / `io.input` (§6).

use std::io::{self, Write};

use crate::engine::Engine;
use crate::value::Value;

/// Writes each argument space-separated then a trailing newline; returns `nil`.
pub fn print(engine: &mut Engine, args: &[Value]) -> Value {
    let mut out = io::stdout();
    for value in args {
        let _ = write!(out, "{} ", engine.display_value(*value));
    }
    let _ = writeln!(out);
    Value::Nil
}

/// Reads one line from standard input, trimming the trailing newline.
pub fn input(engine: &mut Engine, _args: &[Value]) -> Value {
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return engine.take_string(String::new());
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    engine.take_string(line)
}
