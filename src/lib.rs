//! **jitdis** resolves the symbols of a running process, including
//! those emitted at runtime by JIT compilers, and disassembles the code
//! they cover.
//!
//! The functionality is split along the pipeline:
//! - a process' memory map is captured as a set of [`Region`]s
//! - the ELF symbol tables of all file backed modules, relocated into
//!   the target's address space, and a [`PerfMap`] overlay of runtime
//!   generated symbols are combined into a [`ProcessIndex`]
//! - [`RemoteMemory`] retrieves code bytes out of the live process
//! - [`Disassembler`] renders those bytes as assembly, annotating
//!   branch and memory operands with symbols from the index

#![allow(clippy::let_and_return, clippy::let_unit_value)]
#![deny(unsafe_op_in_unsafe_fn)]

use std::collections::BTreeMap;

mod disasm;
mod elf;
mod error;
mod maps;
mod mmap;
mod perf_map;
mod pid;
mod process;
mod remote;
mod util;

pub use crate::disasm::Disassembler;
pub use crate::error::Error;
pub use crate::error::ErrorExt;
pub use crate::error::ErrorKind;
pub use crate::error::IntoError;
pub use crate::maps::Region;
pub use crate::perf_map::PerfMap;
pub use crate::pid::Pid;
pub use crate::process::ProcessIndex;
pub use crate::remote::RemoteMemory;

/// A result type using our [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An address in a process' virtual address space.
pub type Addr = u64;

/// Symbols keyed by their start address.
pub(crate) type SymMap = BTreeMap<Addr, Sym>;


/// A symbol, resolved from a module's symbol table or a runtime symbol
/// overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sym {
    /// The symbol's start address in the target process' address space.
    pub addr: Addr,
    /// The size of the range the symbol covers. A size of zero means
    /// that the symbol names only its start address.
    pub size: u64,
    /// The symbol's name.
    pub name: Box<str>,
    /// Whether the symbol denotes executable code.
    pub code: bool,
}
