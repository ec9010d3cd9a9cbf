//! Host code generation
//!
//! The backend lowers IR functions to native code. Compiled functions
//! run until control leaves the function, then hand back to the engine
//! loop with an exit code; the program counter in the state block always
//! names the next guest instruction when a compiled function returns.

mod cranelift;

pub use cranelift::CraneliftBackend;

use thiserror::Error;

use crate::hir::HirFunction;
use crate::ppu::state::PpuState;

/// Compiled function returned control because of a branch out of the
/// function; resume at `state.cia`.
pub const EXIT_BRANCH: i64 = 0;
/// Compiled function hit a system-call trap; dispatch it, then resume
/// at `state.cia`.
pub const EXIT_SYSCALL: i64 = 1;

/// Signature of a compiled guest function: register state pointer and
/// the host address of guest address 0.
pub type EntryFn = unsafe extern "C" fn(*mut PpuState, *mut u8) -> i64;

/// A finalized piece of host code for one guest function
#[derive(Clone, Copy)]
pub struct CompiledFunction {
    pub entry: u32,
    func: EntryFn,
}

impl CompiledFunction {
    /// Run the compiled code over `state`.
    ///
    /// # Safety
    /// `mem_base` must point at a live reservation covering the whole
    /// guest address space, and `state.cia` must equal `entry`.
    pub unsafe fn call(&self, state: &mut PpuState, mem_base: *mut u8) -> i64 {
        (self.func)(state, mem_base)
    }
}

/// Backend failures
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("host ISA unavailable: {0}")]
    Host(String),

    #[error("code generation failed: {0}")]
    Codegen(String),
}

/// A code generator for IR functions
pub trait Backend: Send {
    fn compile(&mut self, func: &HirFunction) -> Result<CompiledFunction, CompileError>;
}
