//! A named top-level compilation unit: source, compiled bytecode, and
//! the globals it owns.

use ahash::AHashMap;

use crate::bytecode::Bytecode;
use crate::value::Value;

/// Named unit of top-level code (§3). Globals are addressed by stable
/// integer slots, grown lazily on first reference; the name→slot table
/// is compile-time bookkeeping, not part of the runtime value model.
pub struct Package {
    pub name: String,
    pub source: String,
    pub bytecode: Bytecode,
    pub globals: Vec<Value>,
    pub(crate) name_to_slot: AHashMap<String, usize>,
}

impl Package {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Package {
            name: name.into(),
            source: String::new(),
            bytecode: Bytecode::new(),
            globals: Vec::new(),
            name_to_slot: AHashMap::new(),
        }
    }

    /// Resolves `name` to its global slot, allocating a fresh one (backed
    /// by `nil`) if this is the first reference.
    pub(crate) fn slot_for(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.name_to_slot.get(name) {
            return slot;
        }
        let slot = self.globals.len();
        self.globals.push(Value::Nil);
        self.name_to_slot.insert(name.to_string(), slot);
        slot
    }

    /// Grows `globals` with `nil` up to `slot + 1`, matching `GET_GLOBAL`'s
    /// lazy-growth semantics (§4.4) for slots referenced only at runtime.
    pub(crate) fn ensure_slot(&mut self, slot: usize) {
        if slot >= self.globals.len() {
            self.globals.resize(slot + 1, Value::Nil);
        }
    }
}
