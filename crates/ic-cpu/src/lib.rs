//! CPU virtualization pipeline for ironcell
//!
//! Decodes guest PowerPC code, discovers basic blocks, lifts them into
//! an architecture-neutral IR and compiles that to host code, with an
//! interpreter fallback. Guest threads run the result through a shared
//! execution engine that traps system calls out to a pluggable handler.

pub mod backend;
pub mod cell;
pub mod engine;
pub mod hir;
pub mod ppu;
pub mod thread;

use thiserror::Error;

pub use cell::Cell;
pub use engine::{ExecContext, ExecutionEngine, SyscallDisposition, SyscallHandler, ThreadExit};
pub use thread::{PpuThread, ThreadKind, ThreadParams, ThreadState};

/// CPU subsystem errors
#[derive(Debug, Error)]
pub enum CpuError {
    #[error(transparent)]
    Memory(#[from] ic_memory::MemoryError),

    #[error(transparent)]
    Compile(#[from] backend::CompileError),

    #[error("unsupported instruction 0x{opcode:08x} at 0x{addr:08x}")]
    UnsupportedInstruction { addr: u32, opcode: u32 },

    #[error("compiled code returned unknown exit code {code}")]
    BadExitCode { code: i64 },

    #[error("no system call handler installed")]
    NoSyscallHandler,

    #[error("no thread with id {id}")]
    UnknownThread { id: u64 },

    #[error("thread {id} was already started")]
    AlreadyStarted { id: u64 },

    #[error("thread {id} was never started")]
    NotStarted { id: u64 },

    #[error("thread {id} panicked")]
    Panicked { id: u64 },

    #[error("SPU threads are not implemented")]
    SpuUnsupported,

    #[error("failed to spawn host thread: {0}")]
    Spawn(std::io::Error),
}
