//! One active call's interpreter state.

use crate::object::ObjId;

/// A slice of interpreter state for one active call (see GLOSSARY).
/// Locals are not a separate array: they occupy `stack[base..]` directly,
/// the same stack `GET_STACK` indexes relative to `base`.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub ip: usize,
    pub prev_ip: usize,
    pub base: usize,
    /// `None` for the root frame, which runs a package's top-level
    /// bytecode directly rather than a closure's prototype.
    pub closure: Option<ObjId>,
}

impl Frame {
    #[must_use]
    pub fn root(base: usize) -> Self {
        Frame { ip: 0, prev_ip: 0, base, closure: None }
    }

    #[must_use]
    pub fn for_closure(closure: ObjId, base: usize) -> Self {
        Frame { ip: 0, prev_ip: 0, base, closure: Some(closure) }
    }
}
