//! Guest execution loop
//!
//! Runs one guest thread's register state: compiled code when the
//! recompiler can lift the function at the current program counter,
//! the interpreter otherwise. System-call traps are handed to the
//! installed [`SyscallHandler`]; the engine itself knows nothing about
//! kernel semantics.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ic_core::config::PpuTranslator;
use ic_memory::MemoryManager;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::backend::{Backend, CompiledFunction, CraneliftBackend, EXIT_BRANCH, EXIT_SYSCALL};
use crate::ppu::analyzer;
use crate::ppu::interpreter::{self, StepEvent};
use crate::ppu::state::PpuState;
use crate::ppu::translate;
use crate::CpuError;

/// What the kernel decided after a system call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallDisposition {
    /// Resume the thread at `state.cia`
    Continue,
    /// The calling thread is done
    ExitThread,
    /// The whole guest process is done
    ExitProcess { status: i32 },
}

/// Why a thread stopped running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadExit {
    /// The thread ran to completion
    Exited,
    /// The thread requested process exit
    ProcessExit { status: i32 },
    /// Another thread requested process exit
    Halted,
}

/// Everything a system-call handler may touch
pub struct ExecContext<'a> {
    pub state: &'a mut PpuState,
    pub memory: &'a Arc<MemoryManager>,
    /// Registry id of the calling thread
    pub thread_id: u64,
}

/// Kernel-side system call dispatch
pub trait SyscallHandler: Send + Sync {
    fn dispatch(&self, ctx: &mut ExecContext<'_>) -> SyscallDisposition;
}

/// Shared per-process execution engine
pub struct ExecutionEngine {
    memory: Arc<MemoryManager>,
    translator: PpuTranslator,
    backend: Mutex<Option<CraneliftBackend>>,
    cache: RwLock<HashMap<u32, CompiledFunction>>,
    /// Entry addresses the lifter gave up on; interpreted from then on
    uncompilable: RwLock<HashSet<u32>>,
    handler: OnceCell<Arc<dyn SyscallHandler>>,
    halt: AtomicBool,
    paused: Mutex<bool>,
    unpause: Condvar,
}

impl ExecutionEngine {
    pub fn new(memory: Arc<MemoryManager>, translator: PpuTranslator) -> Arc<Self> {
        let backend = match translator {
            PpuTranslator::Interpreter => None,
            PpuTranslator::Recompiler => match CraneliftBackend::new() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(target: "cpu", "recompiler unavailable, interpreting: {e}");
                    None
                }
            },
        };

        Arc::new(Self {
            memory,
            translator,
            backend: Mutex::new(backend),
            cache: RwLock::new(HashMap::new()),
            uncompilable: RwLock::new(HashSet::new()),
            handler: OnceCell::new(),
            halt: AtomicBool::new(false),
            paused: Mutex::new(false),
            unpause: Condvar::new(),
        })
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Install the kernel dispatch target. May only be done once.
    pub fn set_syscall_handler(&self, handler: Arc<dyn SyscallHandler>) {
        if self.handler.set(handler).is_err() {
            tracing::warn!(target: "cpu", "syscall handler already installed");
        }
    }

    /// Stop every thread running on this engine
    pub fn request_halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
        // Paused threads must wake up to observe the halt
        self.unpause.notify_all();
    }

    pub fn halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// Ask every thread to park at its next block boundary
    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    /// Release paused threads
    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.unpause.notify_all();
    }

    pub fn paused(&self) -> bool {
        *self.paused.lock()
    }

    fn park_while_paused(&self) {
        let mut paused = self.paused.lock();
        while *paused && !self.halted() {
            self.unpause.wait(&mut paused);
        }
    }

    /// Run a thread until it exits
    pub fn run(&self, state: &mut PpuState, thread_id: u64) -> Result<ThreadExit, CpuError> {
        loop {
            self.park_while_paused();
            if self.halted() {
                return Ok(ThreadExit::Halted);
            }

            let pc = state.cia as u32;
            // Returning through a null link register ends the thread
            if pc == 0 {
                return Ok(ThreadExit::Exited);
            }

            let compiled = match self.translator {
                PpuTranslator::Recompiler => self.lookup_or_compile(pc),
                PpuTranslator::Interpreter => None,
            };

            let event = match compiled {
                Some(func) => {
                    // SAFETY: the reservation outlives the engine and the
                    // compiled function was built for this entry address.
                    let code = unsafe { func.call(state, self.memory.base_ptr()) };
                    match code {
                        EXIT_BRANCH => continue,
                        EXIT_SYSCALL => StepEvent::Syscall,
                        other => {
                            return Err(CpuError::BadExitCode { code: other });
                        }
                    }
                }
                None => interpreter::step(state, &self.memory)?,
            };

            if event == StepEvent::Syscall {
                match self.dispatch_syscall(state, thread_id)? {
                    SyscallDisposition::Continue => {}
                    SyscallDisposition::ExitThread => return Ok(ThreadExit::Exited),
                    SyscallDisposition::ExitProcess { status } => {
                        self.request_halt();
                        return Ok(ThreadExit::ProcessExit { status });
                    }
                }
            }
        }
    }

    fn dispatch_syscall(
        &self,
        state: &mut PpuState,
        thread_id: u64,
    ) -> Result<SyscallDisposition, CpuError> {
        let handler = self.handler.get().ok_or(CpuError::NoSyscallHandler)?.clone();
        let mut ctx = ExecContext {
            state,
            memory: &self.memory,
            thread_id,
        };
        Ok(handler.dispatch(&mut ctx))
    }

    /// Compiled code for the function entered at `pc`, if the lifter and
    /// backend can produce it
    fn lookup_or_compile(&self, pc: u32) -> Option<CompiledFunction> {
        if let Some(func) = self.cache.read().get(&pc) {
            return Some(*func);
        }
        if self.uncompilable.read().contains(&pc) {
            return None;
        }

        // Two threads may race here; whoever takes the backend lock
        // first compiles, the loser picks up the cached result.
        let mut backend_guard = self.backend.lock();
        if let Some(func) = self.cache.read().get(&pc) {
            return Some(*func);
        }
        let backend = backend_guard.as_mut()?;

        let func = analyzer::analyze(&self.memory, pc);
        let hir = match translate::translate(&func, &self.memory) {
            Ok(hir) => hir,
            Err(e) => {
                tracing::debug!(target: "cpu", "falling back to interpreter for 0x{pc:08x}: {e}");
                self.uncompilable.write().insert(pc);
                return None;
            }
        };

        match backend.compile(&hir) {
            Ok(compiled) => {
                self.cache.write().insert(pc, compiled);
                Some(compiled)
            }
            Err(e) => {
                tracing::warn!(target: "cpu", "compilation failed for 0x{pc:08x}: {e}");
                self.uncompilable.write().insert(pc);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ic_memory::constants::MAIN_MEM_BASE;

    struct CountingHandler {
        calls: std::sync::atomic::AtomicU64,
    }

    impl SyscallHandler for CountingHandler {
        fn dispatch(&self, ctx: &mut ExecContext<'_>) -> SyscallDisposition {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Guest convention: syscall number in r11
            if ctx.state.gpr(11) == 3 {
                SyscallDisposition::ExitProcess {
                    status: ctx.state.gpr(3) as i32,
                }
            } else {
                SyscallDisposition::Continue
            }
        }
    }

    fn run_program(translator: PpuTranslator, words: &[u32]) -> (PpuState, ThreadExit, u64) {
        let memory = MemoryManager::new().unwrap();
        for (i, word) in words.iter().enumerate() {
            memory.write_be32(MAIN_MEM_BASE + i as u32 * 4, *word).unwrap();
        }
        let engine = ExecutionEngine::new(memory, translator);
        let handler = Arc::new(CountingHandler {
            calls: std::sync::atomic::AtomicU64::new(0),
        });
        engine.set_syscall_handler(handler.clone());

        let mut state = PpuState::default();
        state.cia = MAIN_MEM_BASE as u64;
        let exit = engine.run(&mut state, 1).unwrap();
        (state, exit, handler.calls.load(Ordering::SeqCst))
    }

    // li r3, 42 ; li r11, 3 ; sc
    const EXIT_42: &[u32] = &[0x3860002A, 0x39600003, 0x44000002];

    #[test]
    fn test_interpreter_runs_to_process_exit() {
        let (state, exit, calls) = run_program(PpuTranslator::Interpreter, EXIT_42);
        assert_eq!(exit, ThreadExit::ProcessExit { status: 42 });
        assert_eq!(state.gpr(3), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_recompiler_runs_to_process_exit() {
        let (state, exit, calls) = run_program(PpuTranslator::Recompiler, EXIT_42);
        assert_eq!(exit, ThreadExit::ProcessExit { status: 42 });
        assert_eq!(state.gpr(3), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_recompiler_loop_with_branches() {
        // Sum 1..=10 with a conditional backward branch, then exit.
        // 0x00: li r3, 0
        // 0x04: li r4, 10
        // 0x08: add r3, r3, r4
        // 0x0C: addi r4, r4, -1
        // 0x10: cmpwi r4, 0
        // 0x14: bne -0x0C      -> 0x08
        // 0x18: li r11, 3
        // 0x1C: sc
        let program = &[
            0x38600000, 0x3880000A, 0x7C632214, 0x3884FFFF, 0x2C040000, 0x4082FFF4,
            0x39600003, 0x44000002,
        ];
        let (state, exit, _) = run_program(PpuTranslator::Recompiler, program);
        assert_eq!(state.gpr(3), 55);
        assert_eq!(exit, ThreadExit::ProcessExit { status: 55 });
    }

    #[test]
    fn test_null_return_ends_thread() {
        // blr with lr = 0
        let memory = MemoryManager::new().unwrap();
        memory.write_be32(MAIN_MEM_BASE, 0x4E800020).unwrap();
        let engine = ExecutionEngine::new(memory, PpuTranslator::Interpreter);
        let mut state = PpuState::default();
        state.cia = MAIN_MEM_BASE as u64;
        let exit = engine.run(&mut state, 1).unwrap();
        assert_eq!(exit, ThreadExit::Exited);
    }

    #[test]
    fn test_syscall_without_handler_errors() {
        let memory = MemoryManager::new().unwrap();
        memory.write_be32(MAIN_MEM_BASE, 0x44000002).unwrap();
        let engine = ExecutionEngine::new(memory, PpuTranslator::Interpreter);
        let mut state = PpuState::default();
        state.cia = MAIN_MEM_BASE as u64;
        assert!(matches!(
            engine.run(&mut state, 1),
            Err(CpuError::NoSyscallHandler)
        ));
    }
}
