//! Front-end for SPIR-V cross-compilers: parses a module into an ID
//! table, records decorations and names, classifies structured control
//! flow, and reflects the resources an entry point uses.

#[macro_use]
mod error;

mod bitset;
mod compiler;
mod data;
mod deps;
mod flow;
mod ir;
mod meta;
mod node;
mod parser;
mod reflect;
mod testing;
mod traverse;

pub use bitset::*;
pub use compiler::*;
pub use data::*;
pub use deps::*;
pub use error::*;
pub use flow::*;
pub use ir::*;
pub use meta::*;
pub use parser::{Header, Instruction, Version};
pub use reflect::*;
pub use traverse::*;

pub use spirv_headers as spv;
