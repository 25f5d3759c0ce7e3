//! Human-readable bytecode dump, driven by `debug.disassemble` (§6).
//!
//! Walks the same opcode stream the VM executes, decoding each
//! instruction's operands the way `engine::Engine::run` does, but never
//! touches the value stack or frames — this is read-only introspection.

use crate::bytecode::{Bytecode, OpCode};
use crate::engine::Engine;
use crate::object::{ObjData, ObjId};

/// Resolves `id` to a function prototype (following through a `Closure`
/// if that's what was passed) and renders its whole bytecode stream.
#[must_use]
pub fn disassemble_closure(engine: &Engine, id: ObjId) -> String {
    let proto_id = match engine.heap().get(id) {
        ObjData::Closure { proto, .. } => *proto,
        ObjData::FunctionProto(_) => id,
        other => return format!("<cannot disassemble a {}>", other.type_name()),
    };
    match engine.heap().get(proto_id) {
        ObjData::FunctionProto(proto) => {
            let header = format!("== {} ==", proto.name.as_deref().unwrap_or("anonymous"));
            format!("{header}\n{}", disassemble_bytecode(&proto.bytecode))
        }
        _ => "<not a function>".to_string(),
    }
}

#[must_use]
pub fn disassemble_bytecode(bytecode: &Bytecode) -> String {
    let mut out = String::new();
    let mut at = 0;
    while at < bytecode.code.len() {
        let (line, next) = disassemble_instruction(bytecode, at);
        out.push_str(&line);
        out.push('\n');
        at = next;
    }
    out
}

/// Formats the instruction at `at`, returning the formatted line and the
/// offset of the next instruction.
#[must_use]
pub fn disassemble_instruction(bytecode: &Bytecode, at: usize) -> (String, usize) {
    let opcode = match OpCode::from_repr(bytecode.code[at]) {
        Some(op) => op,
        None => return (format!("{at:04} UNKNOWN {}", bytecode.code[at]), at + 1),
    };
    match opcode {
        OpCode::Const | OpCode::GetGlobal => {
            let slot = bytecode.read_u16(at + 1);
            (format!("{at:04} {opcode:<12} const#{slot}"), at + 3)
        }
        OpCode::GetStack | OpCode::GetUpval => {
            let slot = bytecode.read_u16(at + 1);
            (format!("{at:04} {opcode:<12} slot {slot}"), at + 3)
        }
        OpCode::Jump | OpCode::JumpFalse => {
            let distance = bytecode.read_u16(at + 1) as usize;
            let landing = at + distance;
            (format!("{at:04} {opcode:<12} -> {landing:04}"), at + 3)
        }
        OpCode::Call => {
            let argc = bytecode.code[at + 1];
            (format!("{at:04} {opcode:<12} argc {argc}"), at + 2)
        }
        OpCode::Closure => {
            let const_slot = bytecode.read_u16(at + 1);
            let upvalue_count = bytecode.read_u16(at + 3) as usize;
            let next = at + 5 + upvalue_count * 3;
            (format!("{at:04} {opcode:<12} const#{const_slot} upvalues={upvalue_count}"), next)
        }
        _ => (format!("{at:04} {opcode}"), at + 1),
    }
}
