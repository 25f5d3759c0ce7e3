//! Heap object subtypes and their arena-index identifier.

use crate::bytecode::Bytecode;
use crate::value::Value;

/// An index into [`crate::heap::Heap`]'s arena. Stands in for the
/// reference implementation's intrusive-list node pointer: two `ObjId`s
/// compare equal iff they name the same arena slot, regardless of
/// generation, so callers must not retain one past a collection that
/// frees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(usize);

impl ObjId {
    #[must_use]
    pub(crate) fn new(index: usize) -> Self {
        ObjId(index)
    }

    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Where an upvalue currently gets its value: aliasing a live frame's
/// local slot, or owning a closed-over heap cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    Open { frame: usize, slot: usize },
    Closed(Value),
}

/// A compiled function's immutable code and metadata. Closures pair a
/// prototype with a set of captured upvalues at runtime.
#[derive(Debug, Clone)]
pub struct FunctionProto {
    pub arity: usize,
    pub bytecode: Bytecode,
    pub name: Option<String>,
}

/// Host routine exposed to the object language, e.g. `io.print`.
pub type NativeFn = fn(&mut crate::engine::Engine, &[Value]) -> Value;

/// The data owned by one heap arena slot.
#[derive(Debug, Clone)]
pub enum ObjData {
    FunctionProto(FunctionProto),
    Closure { proto: ObjId, upvalues: Vec<ObjId> },
    Upvalue(UpvalueState),
    NativeFn { name: String, func: NativeFn },
    Array(Vec<Value>),
    Str(String),
}

impl ObjData {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjData::FunctionProto(_) => "function",
            ObjData::Closure { .. } => "closure",
            ObjData::Upvalue(_) => "upvalue",
            ObjData::NativeFn { .. } => "native function",
            ObjData::Array(_) => "array",
            ObjData::Str(_) => "string",
        }
    }

    /// Object ids this slot directly references, for the collector's mark
    /// phase (§4.7): arrays trace elements, prototypes trace their
    /// constant pool, upvalues trace their closed target, closures trace
    /// their prototype and captured upvalues.
    pub(crate) fn trace(&self, mut visit: impl FnMut(ObjId)) {
        match self {
            ObjData::FunctionProto(proto) => {
                for constant in &proto.bytecode.constants {
                    if let Value::Obj(id) = constant {
                        visit(*id);
                    }
                }
            }
            ObjData::Closure { proto, upvalues } => {
                visit(*proto);
                for upvalue in upvalues {
                    visit(*upvalue);
                }
            }
            ObjData::Upvalue(UpvalueState::Closed(Value::Obj(id))) => visit(*id),
            ObjData::Upvalue(_) => {}
            ObjData::NativeFn { .. } => {}
            ObjData::Array(values) => {
                for value in values {
                    if let Value::Obj(id) = value {
                        visit(*id);
                    }
                }
            }
            ObjData::Str(_) => {}
        }
    }
}
