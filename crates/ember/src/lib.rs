//! A small bytecode-compiled, dynamically-typed expression language:
//! scanner → recursive-descent parser → expression tree → bytecode
//! compiler → stack-machine VM with closures and a mark-and-sweep heap.
//!
//! [`Engine`] owns the runtime (stack, frames, heap); [`Package`] is one
//! named compilation unit. A host embeds the language by constructing an
//! `Engine`, registering native globals with [`Engine::define_global`]
//! and [`Engine::make_native`], then calling [`Engine::compile`] and
//! [`Engine::execute_package`].

pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod disassemble;
mod engine;
pub mod error;
mod expr;
mod frame;
mod heap;
mod object;
mod package;
mod parser;
mod scanner;
mod token;
mod value;

pub use engine::{DebugContext, Engine};
pub use error::CompileError;
pub use heap::Heap;
pub use object::{NativeFn, ObjId};
pub use package::Package;
pub use value::Value;
