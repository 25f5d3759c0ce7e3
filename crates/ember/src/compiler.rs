//! Expression tree to bytecode.
//!
//! Maintains one [`FunctionState`] per active function being compiled
//! (a stack, innermost last), each with its own local-slot table and
//! upvalue capture list. Top-level code is function index 0, compiled
//! with `scope_depth == 0` so its declarations become package globals;
//! every nested function literal starts at `scope_depth == 1` so its
//! parameters and body locals are always locals, never globals.

use crate::bytecode::{BytecodeBuilder, OpCode};
use crate::error::{CompileError, LimitError, SemanticError};
use crate::expr::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};
use crate::heap::Heap;
use crate::object::{FunctionProto, ObjData};
use crate::package::Package;
use crate::value::Value;

const MAX_ARGS: usize = 255;
const MAX_UPVALUES: usize = 255;
const MAX_LOCALS: usize = 65535;

struct Local {
    name: String,
    depth: usize,
    captured: bool,
}

struct UpvalueCapture {
    index: usize,
    is_local: bool,
}

struct FunctionState {
    builder: BytecodeBuilder,
    locals: Vec<Local>,
    scope_depth: usize,
    upvalues: Vec<UpvalueCapture>,
    arity: usize,
    name: Option<String>,
}

impl FunctionState {
    fn root() -> Self {
        FunctionState {
            builder: BytecodeBuilder::new(),
            locals: Vec::new(),
            scope_depth: 0,
            upvalues: Vec::new(),
            arity: 0,
            name: None,
        }
    }

    fn nested(name: Option<String>) -> Self {
        FunctionState {
            builder: BytecodeBuilder::new(),
            locals: Vec::new(),
            scope_depth: 1,
            upvalues: Vec::new(),
            arity: 0,
            name,
        }
    }
}

pub struct Compiler<'a> {
    package: &'a mut Package,
    heap: &'a mut Heap,
    functions: Vec<FunctionState>,
    errors: Vec<CompileError>,
}

/// Compiles a parsed program into the package's top-level bytecode.
/// Returns the collected compile errors (§7), if any; on success the
/// package's `bytecode` field holds the compiled root prototype.
pub fn compile(package: &mut Package, heap: &mut Heap, body: &[Expr]) -> Result<(), Vec<CompileError>> {
    let mut compiler = Compiler {
        package,
        heap,
        functions: vec![FunctionState::root()],
        errors: Vec::new(),
    };
    compiler.compile_program(body);
    let state = compiler.functions.pop().expect("root function state");
    if compiler.errors.is_empty() {
        compiler.package.bytecode = state.builder.finish();
        Ok(())
    } else {
        Err(compiler.errors)
    }
}

impl<'a> Compiler<'a> {
    fn current(&mut self) -> &mut FunctionState {
        self.functions.last_mut().expect("at least the root function state")
    }

    fn current_depth(&self) -> usize {
        self.functions.last().expect("at least the root function state").scope_depth
    }

    /// Compiles a sequence of sibling expressions (block body or function
    /// body), leaving exactly one value on the stack: the last expression's
    /// value, or `nil` if the sequence is empty. Every non-final expression
    /// is popped after evaluation, except a local-scope `VarDecl` — its
    /// value is the local's backing stack slot, not a discardable result,
    /// so it must stay put (see `compile_var_decl`'s local branch).
    fn compile_body(&mut self, body: &[Expr]) {
        if body.is_empty() {
            let char_idx = 0;
            self.current().builder.write_const(Value::Nil, char_idx);
            return;
        }
        for expr in &body[..body.len() - 1] {
            self.compile_expr(expr);
            if !matches!(expr.kind, ExprKind::VarDecl { .. }) {
                self.current().builder.write_op(OpCode::PopStack, expr.char_idx);
            }
        }
        self.compile_expr(&body[body.len() - 1]);
    }

    /// Compiles the package's top-level expression sequence. Unlike a
    /// block, nothing consumes the program's final value — every
    /// expression, including the last, is popped after evaluation (a
    /// top-level `if`/`else` leaves nothing behind; seed scenario 6).
    /// Ends with an explicit `RETURN` of `nil` so the root frame halts
    /// the same way a called function's frame does.
    fn compile_program(&mut self, body: &[Expr]) {
        for expr in body {
            self.compile_expr(expr);
            self.current().builder.write_op(OpCode::PopStack, expr.char_idx);
        }
        let char_idx = body.last().map_or(0, |e| e.char_idx);
        self.current().builder.write_const(Value::Nil, char_idx);
        self.current().builder.write_op(OpCode::Return, char_idx);
    }

    fn begin_scope(&mut self) {
        self.current().scope_depth += 1;
    }

    /// Ends the innermost scope. Emits `CLOSE_UPVALS` if any local
    /// declared at this depth was captured by a nested closure; never
    /// pops the locals' stack slots physically — they're reclaimed in
    /// bulk when the owning frame is torn down at `RETURN` (see
    /// `engine::Engine::run`'s call-return handling).
    fn end_scope(&mut self, char_idx: usize) {
        let depth = self.current_depth();
        let state = self.current();
        let any_captured = state
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth == depth)
            .any(|l| l.captured);
        if any_captured {
            state.builder.write_op(OpCode::CloseUpvals, char_idx);
        }
        while state.locals.last().is_some_and(|l| l.depth == depth) {
            state.locals.pop();
        }
        state.scope_depth -= 1;
    }

    fn add_local(&mut self, name: String, char_idx: usize) {
        let depth = self.current_depth();
        let state = self.current();
        if state.locals.len() >= MAX_LOCALS {
            self.errors.push(CompileError::Limit(LimitError { what: "locals in one scope", limit: MAX_LOCALS, char_idx }));
            return;
        }
        state.locals.push(Local { name, depth, captured: false });
    }

    fn resolve_local(&self, function: usize, name: &str) -> Option<usize> {
        self.functions[function]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == name)
            .map(|(i, _)| i)
    }

    /// Walks the enclosing-function chain to find (or build) a capture
    /// path for `name`, returning this function's upvalue slot if found.
    fn resolve_upvalue(&mut self, function: usize, name: &str) -> Option<usize> {
        if function == 0 {
            return None;
        }
        if let Some(local_slot) = self.resolve_local(function - 1, name) {
            self.functions[function - 1].locals[local_slot].captured = true;
            return Some(self.add_upvalue(function, local_slot, true));
        }
        if let Some(upval_slot) = self.resolve_upvalue(function - 1, name) {
            return Some(self.add_upvalue(function, upval_slot, false));
        }
        None
    }

    fn add_upvalue(&mut self, function: usize, index: usize, is_local: bool) -> usize {
        let state = &mut self.functions[function];
        if let Some(existing) = state.upvalues.iter().position(|u| u.index == index && u.is_local == is_local) {
            return existing;
        }
        state.upvalues.push(UpvalueCapture { index, is_local });
        state.upvalues.len() - 1
    }

    /// Emits the producer opcode for `name`: local, then upvalue, then
    /// global (always succeeds — globals are created on first mention).
    fn emit_reference(&mut self, name: &str, char_idx: usize) {
        let function = self.functions.len() - 1;
        if let Some(slot) = self.resolve_local(function, name) {
            self.current().builder.write_op(OpCode::GetStack, char_idx);
            self.current().builder.write_u16(slot as u16, char_idx);
        } else if let Some(slot) = self.resolve_upvalue(function, name) {
            self.current().builder.write_op(OpCode::GetUpval, char_idx);
            self.current().builder.write_u16(slot as u16, char_idx);
        } else {
            let slot = self.package.slot_for(name);
            self.current().builder.write_op(OpCode::GetGlobal, char_idx);
            self.current().builder.write_u16(slot as u16, char_idx);
        }
    }

    fn compile_expr(&mut self, expr: &Expr) {
        let char_idx = expr.char_idx;
        match &expr.kind {
            ExprKind::Literal(lit) => self.compile_literal(lit, char_idx),
            ExprKind::Variable(name) => self.emit_reference(name, char_idx),
            ExprKind::VarSet { name, value } => {
                self.emit_reference(name, char_idx);
                self.compile_expr(value);
                self.current().builder.write_op(OpCode::Set, char_idx);
            }
            ExprKind::VarDecl { name, value, .. } => self.compile_var_decl(name, value, char_idx),
            ExprKind::Subscript { .. } | ExprKind::SubscriptSet { .. } => {
                self.compile_subscript(expr, char_idx);
            }
            ExprKind::Call { callee, args } => self.compile_call(callee, args, char_idx),
            ExprKind::Unary { op, value } => self.compile_unary(*op, value, char_idx),
            ExprKind::Binary { a, op, b } => self.compile_binary(a, *op, b, char_idx),
            ExprKind::If { condition, then_branch, else_branch } => {
                self.compile_if(condition, then_branch, else_branch.as_deref(), char_idx);
            }
            ExprKind::Block(body) => {
                self.begin_scope();
                self.compile_body(body);
                self.end_scope(char_idx);
            }
            ExprKind::Import { package, .. } => {
                let slot = self.package.slot_for(&format!("import:{package}"));
                self.current().builder.write_op(OpCode::GetGlobal, char_idx);
                self.current().builder.write_u16(slot as u16, char_idx);
            }
            ExprKind::FunctionLiteral { params, body } => {
                self.compile_function_literal(params, body, char_idx);
            }
        }
    }

    fn compile_literal(&mut self, lit: &Literal, char_idx: usize) {
        let value = match lit {
            Literal::Number(n) => Value::Number(*n),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Nil => Value::Nil,
            Literal::String(s) => {
                let id = self.heap.allocate(ObjData::Str(s.clone()));
                Value::Obj(id)
            }
        };
        self.current().builder.write_const(value, char_idx);
    }

    fn compile_var_decl(&mut self, name: &str, value: &Expr, char_idx: usize) {
        if self.current_depth() == 0 {
            let slot = self.package.slot_for(name);
            self.current().builder.write_op(OpCode::GetGlobal, char_idx);
            self.current().builder.write_u16(slot as u16, char_idx);
            self.compile_expr(value);
            self.current().builder.write_op(OpCode::Set, char_idx);
        } else {
            self.compile_expr(value);
            self.add_local(name.to_string(), char_idx);
            // The value is already on the stack in the local's slot; no
            // further opcode is needed since locals live directly on the
            // value stack at their declaration position.
        }
    }

    /// A dotted chain resolves to a single flat global lookup when every
    /// link is itself a plain identifier or subscript (§4.3); anything
    /// else is a compile-time error.
    fn compile_subscript(&mut self, expr: &Expr, char_idx: usize) {
        match dotted_name(expr) {
            Some((name, is_set, set_value)) => {
                let slot = self.package.slot_for(&name);
                self.current().builder.write_op(OpCode::GetGlobal, char_idx);
                self.current().builder.write_u16(slot as u16, char_idx);
                if is_set {
                    self.compile_expr(set_value.expect("set path always carries a value"));
                    self.current().builder.write_op(OpCode::Set, char_idx);
                }
            }
            None => {
                self.errors.push(CompileError::Semantic(SemanticError::new(
                    "Cannot subscript this expression.",
                    char_idx,
                )));
            }
        }
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], char_idx: usize) {
        if args.len() > MAX_ARGS {
            self.errors.push(CompileError::Limit(LimitError { what: "call arguments", limit: MAX_ARGS, char_idx }));
        }
        self.compile_expr(callee);
        for arg in args {
            self.compile_expr(arg);
        }
        self.current().builder.write_op(OpCode::Call, char_idx);
        self.current().builder.write_byte(args.len() as u8, char_idx);
    }

    fn compile_unary(&mut self, op: UnaryOp, value: &Expr, char_idx: usize) {
        match op {
            UnaryOp::Not => {
                self.compile_expr(value);
                self.current().builder.write_op(OpCode::Not, char_idx);
            }
            UnaryOp::Negate => {
                // No dedicated negate opcode; `0 - x` reuses SUB, whose
                // `push(b - a)` semantics (§4.4) give `0 - x` for
                // `a = x`, `b = 0`.
                self.current().builder.write_const(Value::Number(0.0), char_idx);
                self.compile_expr(value);
                self.current().builder.write_op(OpCode::Sub, char_idx);
            }
        }
    }

    fn compile_binary(&mut self, a: &Expr, op: BinaryOp, b: &Expr, char_idx: usize) {
        // Push order is left-operand-first, matching the resolved
        // LESS/GREATER semantics of §4.4 (the popped-first operand `a`
        // is the textual right-hand side).
        self.compile_expr(a);
        self.compile_expr(b);
        let opcode = match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Mod => OpCode::Mod,
            BinaryOp::Equal => OpCode::Equal,
            BinaryOp::Less => OpCode::Less,
            BinaryOp::Greater => OpCode::Greater,
            BinaryOp::NotEqual => {
                self.current().builder.write_op(OpCode::Equal, char_idx);
                self.current().builder.write_op(OpCode::Not, char_idx);
                return;
            }
            BinaryOp::LessEqual => {
                self.current().builder.write_op(OpCode::Greater, char_idx);
                self.current().builder.write_op(OpCode::Not, char_idx);
                return;
            }
            BinaryOp::GreaterEqual => {
                self.current().builder.write_op(OpCode::Less, char_idx);
                self.current().builder.write_op(OpCode::Not, char_idx);
                return;
            }
        };
        self.current().builder.write_op(opcode, char_idx);
    }

    fn compile_if(&mut self, condition: &Expr, then_branch: &Expr, else_branch: Option<&Expr>, char_idx: usize) {
        self.compile_expr(condition);
        let then_jump = self.current().builder.emit_jump(OpCode::JumpFalse, char_idx);
        self.compile_expr(then_branch);
        let else_jump = self.current().builder.emit_jump(OpCode::Jump, char_idx);
        self.current().builder.patch_jump(then_jump);
        match else_branch {
            Some(else_expr) => self.compile_expr(else_expr),
            None => {
                self.current().builder.write_const(Value::Nil, char_idx);
            }
        }
        self.current().builder.patch_jump(else_jump);
    }

    fn compile_function_literal(&mut self, params: &[String], body: &[Expr], char_idx: usize) {
        self.functions.push(FunctionState::nested(None));
        for param in params {
            self.add_local(param.clone(), char_idx);
        }
        self.current().arity = params.len();
        self.compile_body(body);
        let any_captured = self.current().locals.iter().any(|l| l.captured);
        if any_captured {
            self.current().builder.write_op(OpCode::CloseUpvals, char_idx);
        }
        self.current().builder.write_op(OpCode::Return, char_idx);

        let state = self.functions.pop().expect("just pushed");
        let upvalue_count = state.upvalues.len();
        if upvalue_count > MAX_UPVALUES {
            self.errors.push(CompileError::Limit(LimitError { what: "captured upvalues", limit: MAX_UPVALUES, char_idx }));
        }
        let proto = FunctionProto {
            arity: state.arity,
            bytecode: state.builder.finish(),
            name: state.name,
        };
        let proto_id = self.heap.allocate(ObjData::FunctionProto(proto));
        let const_slot = self.current().builder.add_constant(Value::Obj(proto_id));
        self.current().builder.write_op(OpCode::Closure, char_idx);
        self.current().builder.write_u16(const_slot, char_idx);
        self.current().builder.write_u16(upvalue_count as u16, char_idx);
        for capture in &state.upvalues {
            self.current().builder.write_byte(u8::from(capture.is_local), char_idx);
            self.current().builder.write_u16(capture.index as u16, char_idx);
        }
    }
}

/// Walks a `Subscript`/`SubscriptSet` chain, returning the dot-joined
/// name and (for a set) the assigned-value expression, or `None` if the
/// receiver isn't a plain identifier chain.
fn dotted_name(expr: &Expr) -> Option<(String, bool, Option<&Expr>)> {
    match &expr.kind {
        ExprKind::Variable(name) => Some((name.clone(), false, None)),
        ExprKind::Subscript { value, name } => {
            let (base, _, _) = dotted_name(value)?;
            Some((format!("{base}.{name}"), false, None))
        }
        ExprKind::SubscriptSet { value, name, set_value } => {
            let (base, _, _) = dotted_name(value)?;
            Some((format!("{base}.{name}"), true, Some(set_value)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn compile_source(source: &str) -> Package {
        let mut package = Package::new("test");
        let mut heap = Heap::new();
        let body = parser::parse(source).expect("parse error");
        compile(&mut package, &mut heap, &body).expect("compile error");
        package
    }

    #[test]
    fn literal_and_pop_balance_the_stack() {
        let package = compile_source("1\n2\n3");
        assert!(!package.bytecode.code.is_empty());
    }

    #[test]
    fn top_level_var_decl_becomes_a_global() {
        let package = compile_source("var x = 10");
        assert!(package.name_to_slot.contains_key("x"));
    }

    #[test]
    fn dotted_call_resolves_to_one_global_name() {
        let package = compile_source("io.print(1)");
        assert!(package.name_to_slot.contains_key("io.print"));
    }

    #[test]
    fn function_literal_emits_closure_opcode() {
        let package = compile_source("var f = fn(n) { n }");
        assert!(package.bytecode.code.contains(&(OpCode::Closure as u8)));
    }

    #[test]
    fn too_many_call_arguments_is_a_compile_error() {
        let mut package = Package::new("test");
        let mut heap = Heap::new();
        let args: Vec<String> = (0..300).map(|i| i.to_string()).collect();
        let source = format!("io.print({})", args.join(", "));
        let body = parser::parse(&source).expect("parse error");
        let result = compile(&mut package, &mut heap, &body);
        assert!(result.is_err());
    }
}
