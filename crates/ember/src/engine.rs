//! The bytecode stack machine: value stack, call frames, heap, and the
//! opcode dispatch loop.

use crate::bytecode::OpCode;
use crate::compiler;
use crate::error::{format_caret_diagnostic, CompileError, RuntimeError};
use crate::frame::Frame;
use crate::heap::Heap;
use crate::object::{NativeFn, ObjData, ObjId, UpvalueState};
use crate::package::Package;
use crate::parser;
use crate::value::{Pointer, Value};

const STACK_MAX: usize = 256;
const FRAME_MAX: usize = 256;

/// Counters the `debug` built-in package maintains across calls. A field
/// on the engine rather than a process global (§9 design notes).
#[derive(Debug, Default)]
pub struct DebugContext {
    pub assertions: usize,
    pub assertions_met: usize,
}

enum CallTarget {
    Closure { closure: ObjId, proto: ObjId },
    Native(NativeFn),
    NotCallable,
}

/// Root container for one interpreter run (§3). Not `Sync`: concurrent
/// access to one engine from multiple threads is unsupported.
pub struct Engine {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    heap: Heap,
    open_upvalues: Vec<ObjId>,
    had_error: bool,
    error_sink: Box<dyn FnMut(&str)>,
    debug: DebugContext,
    gc_threshold: usize,
}

impl Engine {
    #[must_use]
    pub fn new(error_sink: impl FnMut(&str) + 'static) -> Self {
        Engine {
            stack: Vec::new(),
            frames: Vec::new(),
            heap: Heap::new(),
            open_upvalues: Vec::new(),
            had_error: false,
            error_sink: Box::new(error_sink),
            debug: DebugContext::default(),
            gc_threshold: 64,
        }
    }

    #[must_use]
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    pub fn debug(&mut self) -> &mut DebugContext {
        &mut self.debug
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Installs a global at a fresh (or existing) slot.
    pub fn define_global(&mut self, package: &mut Package, name: &str, value: Value) {
        let slot = package.slot_for(name);
        package.globals[slot] = value;
    }

    pub fn make_native(&mut self, name: impl Into<String>, func: NativeFn) -> Value {
        let id = self.heap.allocate(ObjData::NativeFn { name: name.into(), func });
        Value::Obj(id)
    }

    pub fn take_string(&mut self, s: String) -> Value {
        let id = self.heap.allocate(ObjData::Str(s));
        Value::Obj(id)
    }

    /// Renders a value the way `io.print` and `debug.disassemble` do.
    #[must_use]
    pub fn display_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format!("{n:.6}"),
            Value::Ptr(_) => "<ptr>".to_string(),
            Value::Obj(id) => match self.heap.get(id) {
                ObjData::Str(s) => s.clone(),
                ObjData::Closure { .. } => "<closure>".to_string(),
                ObjData::FunctionProto(proto) => {
                    format!("<fn {}>", proto.name.as_deref().unwrap_or("anonymous"))
                }
                ObjData::NativeFn { name, .. } => format!("<native fn {name}>"),
                ObjData::Array(_) => "<array>".to_string(),
                ObjData::Upvalue(_) => "<upvalue>".to_string(),
            },
        }
    }

    /// Parses and compiles `source` onto `package`. Parse and compile-limit
    /// errors are both formatted with a source caret and sent to the error
    /// sink, in addition to being returned typed (§7 Propagation).
    pub fn compile(&mut self, package: &mut Package, source: &str) -> Result<(), CompileError> {
        let span = tracing::info_span!("compile", package = %package.name);
        let _enter = span.enter();
        package.source = source.to_string();

        let body = match parser::parse(source) {
            Ok(body) => body,
            Err(errors) => {
                for error in &errors {
                    let diagnostic = format_caret_diagnostic(&error.message, source, error.char_idx);
                    (self.error_sink)(&diagnostic);
                }
                return Err(CompileError::Parse(errors));
            }
        };

        match compiler::compile(package, &mut self.heap, &body) {
            Ok(()) => Ok(()),
            Err(mut errors) => {
                for error in &errors {
                    let char_idx = match error {
                        CompileError::Parse(parse_errors) => {
                            parse_errors.first().map_or(0, |e| e.char_idx)
                        }
                        CompileError::Limit(e) => e.char_idx,
                        CompileError::Semantic(e) => e.char_idx,
                    };
                    let diagnostic = format_caret_diagnostic(&error.to_string(), source, char_idx);
                    (self.error_sink)(&diagnostic);
                }
                Err(errors.remove(0))
            }
        }
    }

    /// Runs a package's compiled top-level bytecode. Returns `false` (and
    /// marks `had_error`) on any runtime fault; the formatted diagnostic
    /// has already reached the error sink by the time this returns.
    pub fn execute_package(&mut self, package: &mut Package) -> bool {
        let span = tracing::info_span!("execute", package = %package.name);
        let _enter = span.enter();
        self.stack.clear();
        self.frames.clear();
        self.frames.push(Frame::root(0));

        match self.run(package) {
            Ok(()) => true,
            Err(error) => {
                self.had_error = true;
                let diagnostic = format_caret_diagnostic(&error.message, &package.source, error.char_idx);
                (self.error_sink)(&diagnostic);
                false
            }
        }
    }

    pub fn collect_garbage(&mut self, package: &Package) {
        self.heap.clear_marks();

        let stack_snapshot = self.stack.clone();
        for value in &stack_snapshot {
            self.mark_value(value);
        }

        let frame_closures: Vec<ObjId> = self.frames.iter().filter_map(|f| f.closure).collect();
        for id in frame_closures {
            self.heap.mark(id);
        }

        let globals_snapshot = package.globals.clone();
        for value in &globals_snapshot {
            self.mark_value(value);
        }

        let constants_snapshot = package.bytecode.constants.clone();
        for value in &constants_snapshot {
            self.mark_value(value);
        }

        let open_upvalues = self.open_upvalues.clone();
        for id in open_upvalues {
            self.heap.mark(id);
        }

        let freed = self.heap.sweep();
        tracing::debug!(freed, live = self.heap.live_count(), "garbage collected");
    }

    fn mark_value(&mut self, value: &Value) {
        match value {
            Value::Obj(id) => self.heap.mark(*id),
            Value::Ptr(Pointer::Upvalue(id)) => self.heap.mark(*id),
            _ => {}
        }
    }

    fn maybe_collect_garbage(&mut self, package: &Package) {
        if self.heap.live_count() > self.gc_threshold {
            self.collect_garbage(package);
            self.gc_threshold = (self.heap.live_count() * 2).max(64);
        }
    }

    fn current_bytecode<'x>(&'x self, package: &'x Package) -> &'x crate::bytecode::Bytecode {
        match self.frames.last().expect("at least one active frame").closure {
            None => &package.bytecode,
            Some(closure_id) => {
                let proto_id = match self.heap.get(closure_id) {
                    ObjData::Closure { proto, .. } => *proto,
                    _ => unreachable!("frame closure must reference a Closure object"),
                };
                match self.heap.get(proto_id) {
                    ObjData::FunctionProto(proto) => &proto.bytecode,
                    _ => unreachable!("closure must reference a FunctionProto object"),
                }
            }
        }
    }

    fn current_byte(&self, package: &Package, at: usize) -> u8 {
        self.current_bytecode(package).code[at]
    }

    fn current_u16(&self, package: &Package, at: usize) -> u16 {
        self.current_bytecode(package).read_u16(at)
    }

    fn current_char_idx(&self, package: &Package, at: usize) -> usize {
        self.current_bytecode(package).char_idxs[at]
    }

    fn current_constant(&self, package: &Package, slot: u16) -> Value {
        self.current_bytecode(package).constants[slot as usize]
    }

    fn runtime_error_at(&self, package: &Package, at: usize, message: &str) -> RuntimeError {
        RuntimeError::new(message, self.current_char_idx(package, at))
    }

    fn push(&mut self, value: Value, char_idx: usize) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_MAX {
            return Err(RuntimeError::new("Stack overflow.", char_idx));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow: compiler invariant violated")
    }

    /// Dereferences `value` iteratively while it's a `ptr` (§4.5).
    fn evaporate(&self, package: &Package, mut value: Value) -> Value {
        while let Value::Ptr(ptr) = value {
            value = self.read_pointer(package, ptr);
        }
        value
    }

    fn read_pointer(&self, package: &Package, ptr: Pointer) -> Value {
        match ptr {
            Pointer::Local { frame, slot } => self.stack[self.frames[frame].base + slot],
            Pointer::Global(slot) => package.globals.get(slot).copied().unwrap_or(Value::Nil),
            Pointer::Upvalue(id) => match self.heap.get(id) {
                ObjData::Upvalue(UpvalueState::Open { frame, slot }) => {
                    self.stack[self.frames[*frame].base + *slot]
                }
                ObjData::Upvalue(UpvalueState::Closed(v)) => *v,
                _ => unreachable!("Pointer::Upvalue must reference an Upvalue object"),
            },
        }
    }

    fn write_pointer(&mut self, package: &mut Package, ptr: Pointer, value: Value) {
        match ptr {
            Pointer::Local { frame, slot } => {
                let idx = self.frames[frame].base + slot;
                self.stack[idx] = value;
            }
            Pointer::Global(slot) => {
                package.ensure_slot(slot);
                package.globals[slot] = value;
            }
            Pointer::Upvalue(id) => {
                let open_target = match self.heap.get(id) {
                    ObjData::Upvalue(UpvalueState::Open { frame, slot }) => Some((*frame, *slot)),
                    ObjData::Upvalue(UpvalueState::Closed(_)) => None,
                    _ => unreachable!("Pointer::Upvalue must reference an Upvalue object"),
                };
                match open_target {
                    Some((frame, slot)) => {
                        let idx = self.frames[frame].base + slot;
                        self.stack[idx] = value;
                    }
                    None => {
                        if let ObjData::Upvalue(state) = self.heap.get_mut(id) {
                            *state = UpvalueState::Closed(value);
                        }
                    }
                }
            }
        }
    }

    fn capture_upvalue(&mut self, frame: usize, slot: usize) -> ObjId {
        let existing = self.open_upvalues.iter().copied().find(|&id| {
            matches!(
                self.heap.get(id),
                ObjData::Upvalue(UpvalueState::Open { frame: f, slot: s }) if *f == frame && *s == slot
            )
        });
        if let Some(id) = existing {
            return id;
        }
        let id = self.heap.allocate(ObjData::Upvalue(UpvalueState::Open { frame, slot }));
        self.open_upvalues.push(id);
        id
    }

    fn closure_upvalue_id(&self, closure_id: ObjId, index: usize) -> ObjId {
        match self.heap.get(closure_id) {
            ObjData::Closure { upvalues, .. } => upvalues[index],
            _ => unreachable!("expected a Closure object"),
        }
    }

    /// The opcode dispatch loop. Runs until the root frame returns
    /// (success) or a runtime fault occurs.
    fn run(&mut self, package: &mut Package) -> Result<(), RuntimeError> {
        loop {
            let frame_index = self.frames.len() - 1;
            let ip = self.frames[frame_index].ip;
            if ip >= self.current_bytecode(package).code.len() {
                return Err(self.runtime_error_at(package, ip.saturating_sub(1), "Ran off the end of a function body."));
            }
            let opcode_byte = self.current_byte(package, ip);
            let opcode = OpCode::from_repr(opcode_byte)
                .ok_or_else(|| self.runtime_error_at(package, ip, "Unknown opcode."))?;
            let char_idx = self.current_char_idx(package, ip);
            self.frames[frame_index].prev_ip = ip;
            self.frames[frame_index].ip = ip + 1;

            match opcode {
                OpCode::Return => {
                    let raw = self.pop();
                    let return_value = self.evaporate(package, raw);
                    let frame = self.frames.pop().expect("at least one frame");
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(return_value, char_idx)?;
                }
                OpCode::Const => {
                    let at = self.frames[frame_index].ip;
                    let slot = self.current_u16(package, at);
                    self.frames[frame_index].ip = at + 2;
                    let value = self.current_constant(package, slot);
                    self.push(value, char_idx)?;
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => {
                    let raw_a = self.pop();
                    let a = self.evaporate(package, raw_a);
                    let raw_b = self.pop();
                    let b = self.evaporate(package, raw_b);
                    let (an, bn) = match (a.as_number(), b.as_number()) {
                        (Some(an), Some(bn)) => (an, bn),
                        _ => {
                            return Err(RuntimeError::new(
                                format!("Cannot {} {} and {}.", arithmetic_verb(opcode), a.type_name(), b.type_name()),
                                char_idx,
                            ))
                        }
                    };
                    let result = match opcode {
                        OpCode::Add => bn + an,
                        OpCode::Sub => bn - an,
                        OpCode::Mul => bn * an,
                        OpCode::Div => bn / an,
                        OpCode::Mod => bn % an,
                        _ => unreachable!(),
                    };
                    self.push(Value::Number(result), char_idx)?;
                }
                OpCode::Equal => {
                    let raw_a = self.pop();
                    let a = self.evaporate(package, raw_a);
                    let raw_b = self.pop();
                    let b = self.evaporate(package, raw_b);
                    self.push(Value::Bool(Value::values_equal(a, b)), char_idx)?;
                }
                OpCode::Greater | OpCode::Less => {
                    let raw_a = self.pop();
                    let a = self.evaporate(package, raw_a);
                    let raw_b = self.pop();
                    let b = self.evaporate(package, raw_b);
                    let (an, bn) = match (a.as_number(), b.as_number()) {
                        (Some(an), Some(bn)) => (an, bn),
                        _ => {
                            return Err(RuntimeError::new(
                                format!("Cannot compare {} and {}.", a.type_name(), b.type_name()),
                                char_idx,
                            ))
                        }
                    };
                    let result = if opcode == OpCode::Less { an > bn } else { an < bn };
                    self.push(Value::Bool(result), char_idx)?;
                }
                OpCode::Not => {
                    let raw = self.pop();
                    let v = self.evaporate(package, raw);
                    let b = v
                        .as_bool()
                        .ok_or_else(|| RuntimeError::new(format!("Cannot invert {}.", v.type_name()), char_idx))?;
                    self.push(Value::Bool(!b), char_idx)?;
                }
                OpCode::PopStack => {
                    self.pop();
                }
                OpCode::GetStack => {
                    let at = self.frames[frame_index].ip;
                    let slot = self.current_u16(package, at) as usize;
                    self.frames[frame_index].ip = at + 2;
                    self.push(Value::Ptr(Pointer::Local { frame: frame_index, slot }), char_idx)?;
                }
                OpCode::GetGlobal => {
                    let at = self.frames[frame_index].ip;
                    let slot = self.current_u16(package, at) as usize;
                    self.frames[frame_index].ip = at + 2;
                    package.ensure_slot(slot);
                    self.push(Value::Ptr(Pointer::Global(slot)), char_idx)?;
                }
                OpCode::Set => {
                    let raw_value = self.pop();
                    let value = self.evaporate(package, raw_value);
                    let target = self.pop();
                    let ptr = target
                        .as_pointer()
                        .ok_or_else(|| RuntimeError::new("Cannot assign to a non-reference target.", char_idx))?;
                    self.write_pointer(package, ptr, value);
                    self.push(value, char_idx)?;
                }
                OpCode::Jump => {
                    let at = self.frames[frame_index].ip;
                    let distance = self.current_u16(package, at) as usize;
                    self.frames[frame_index].ip = at + 2 + distance - 3;
                }
                OpCode::JumpFalse => {
                    let at = self.frames[frame_index].ip;
                    let distance = self.current_u16(package, at) as usize;
                    let after_operand = at + 2;
                    self.frames[frame_index].ip = after_operand;
                    let raw = self.pop();
                    let v = self.evaporate(package, raw);
                    let cond = v
                        .as_bool()
                        .ok_or_else(|| RuntimeError::new(format!("Cannot branch on {}.", v.type_name()), char_idx))?;
                    if !cond {
                        self.frames[frame_index].ip = after_operand + distance - 3;
                    }
                }
                OpCode::Call => {
                    let at = self.frames[frame_index].ip;
                    let argc = self.current_byte(package, at) as usize;
                    self.frames[frame_index].ip = at + 1;

                    if self.frames.len() >= FRAME_MAX {
                        return Err(RuntimeError::new("Recursion stack overflow.", char_idx));
                    }

                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        let raw = self.pop();
                        args.push(self.evaporate(package, raw));
                    }
                    args.reverse();

                    let raw_callee = self.pop();
                    let callee = self.evaporate(package, raw_callee);

                    let call_target = match callee.as_obj() {
                        Some(id) => match self.heap.get(id) {
                            ObjData::Closure { proto, .. } => CallTarget::Closure { closure: id, proto: *proto },
                            ObjData::NativeFn { func, .. } => CallTarget::Native(*func),
                            _ => CallTarget::NotCallable,
                        },
                        None => CallTarget::NotCallable,
                    };

                    match call_target {
                        CallTarget::Closure { closure, proto } => {
                            let arity = match self.heap.get(proto) {
                                ObjData::FunctionProto(p) => p.arity,
                                _ => unreachable!("closure must reference a FunctionProto"),
                            };
                            if arity != argc {
                                return Err(RuntimeError::new("Wrong argument count.", char_idx));
                            }
                            let base = self.stack.len();
                            for arg in args {
                                self.push(arg, char_idx)?;
                            }
                            self.frames.push(Frame::for_closure(closure, base));
                        }
                        CallTarget::Native(func) => {
                            let result = func(self, &args);
                            self.push(result, char_idx)?;
                        }
                        CallTarget::NotCallable => {
                            return Err(RuntimeError::new(format!("Cannot call {}.", callee.type_name()), char_idx));
                        }
                    }
                    self.maybe_collect_garbage(package);
                }
                OpCode::Closure => {
                    let at = self.frames[frame_index].ip;
                    let proto_slot = self.current_u16(package, at);
                    let upvalue_count = self.current_u16(package, at + 2) as usize;
                    let mut descriptors = Vec::with_capacity(upvalue_count);
                    let mut read_at = at + 4;
                    for _ in 0..upvalue_count {
                        let is_local = self.current_byte(package, read_at) != 0;
                        let index = self.current_u16(package, read_at + 1) as usize;
                        descriptors.push((is_local, index));
                        read_at += 3;
                    }
                    self.frames[frame_index].ip = read_at;

                    let proto_value = self.current_constant(package, proto_slot);
                    let proto_id = proto_value.as_obj().expect("CLOSURE constant must be a function prototype");
                    let current_closure = self.frames[frame_index].closure;

                    let mut upvalues = Vec::with_capacity(descriptors.len());
                    for (is_local, index) in descriptors {
                        let upvalue_id = if is_local {
                            self.capture_upvalue(frame_index, index)
                        } else {
                            let closure_id = current_closure.expect("non-local capture requires an enclosing closure");
                            self.closure_upvalue_id(closure_id, index)
                        };
                        upvalues.push(upvalue_id);
                    }
                    let closure_id = self.heap.allocate(ObjData::Closure { proto: proto_id, upvalues });
                    self.push(Value::Obj(closure_id), char_idx)?;
                }
                OpCode::GetUpval => {
                    let at = self.frames[frame_index].ip;
                    let slot = self.current_u16(package, at) as usize;
                    self.frames[frame_index].ip = at + 2;
                    let closure_id = self.frames[frame_index].closure.expect("GET_UPVAL outside a closure frame");
                    let upvalue_id = self.closure_upvalue_id(closure_id, slot);
                    self.push(Value::Ptr(Pointer::Upvalue(upvalue_id)), char_idx)?;
                }
                OpCode::CloseUpvals => {
                    let ids: Vec<ObjId> = self.open_upvalues.drain(..).collect();
                    for id in ids {
                        let target = match self.heap.get(id) {
                            ObjData::Upvalue(UpvalueState::Open { frame, slot }) => Some((*frame, *slot)),
                            _ => None,
                        };
                        if let Some((frame, slot)) = target {
                            let idx = self.frames[frame].base + slot;
                            let value = self.stack[idx];
                            if let ObjData::Upvalue(state) = self.heap.get_mut(id) {
                                *state = UpvalueState::Closed(value);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn arithmetic_verb(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "add",
        OpCode::Sub => "subtract",
        OpCode::Mul => "multiply",
        OpCode::Div => "divide",
        OpCode::Mod => "take the modulo of",
        _ => "operate on",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn run_source(source: &str) -> (bool, Vec<String>) {
        let output = Rc::new(RefCell::new(Vec::new()));
        let sink_output = output.clone();
        let mut engine = Engine::new(move |msg: &str| sink_output.borrow_mut().push(msg.to_string()));
        let mut package = Package::new("test");
        engine.compile(&mut package, source).expect("compile failed");
        let ok = engine.execute_package(&mut package);
        (ok, output.borrow().clone())
    }

    #[test]
    fn arithmetic_and_precedence_evaluate() {
        let (ok, errors) = run_source("1 + 2 * 3");
        assert!(ok, "errors: {errors:?}");
    }

    #[test]
    fn type_error_reports_operands_in_pop_order() {
        let (ok, errors) = run_source("1 + true");
        assert!(!ok);
        assert!(errors.iter().any(|e| e.contains("Cannot add bool and number.")));
    }

    #[test]
    fn variable_declaration_and_reassignment_round_trip() {
        let (ok, errors) = run_source("var x = 10\nx = x - 4");
        assert!(ok, "errors: {errors:?}");
    }

    #[test]
    fn if_without_else_leaves_nil_branch_value() {
        let (ok, errors) = run_source("if true 1 else 2");
        assert!(ok, "errors: {errors:?}");
    }
}
