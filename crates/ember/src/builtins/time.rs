//! `time.clock` / `time.sleep` (§6).
//!
//! Measured against wall-clock time since process start rather than true
//! CPU time (no portable `getrusage` in the stack this crate carries);
//! `sleep` busy-loops against that clock, matching the reference
//! semantics of "busy-loop until that CPU time elapses" rather than
//! yielding the thread.

use std::sync::OnceLock;
use std::time::Instant;

use crate::engine::Engine;
use crate::value::Value;

static START: OnceLock<Instant> = OnceLock::new();

fn process_clock() -> f64 {
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}

pub fn clock(_engine: &mut Engine, _args: &[Value]) -> Value {
    Value::Number(process_clock())
}

pub fn sleep(_engine: &mut Engine, args: &[Value]) -> Value {
    let seconds = args.first().and_then(Value::as_number).unwrap_or(0.0);
    let deadline = process_clock() + seconds;
    while process_clock() < deadline {}
    Value::Nil
}
