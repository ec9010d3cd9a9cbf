//! Guest threads
//!
//! Each guest PPU thread owns a register state and runs on its own host
//! thread through the shared [`ExecutionEngine`].

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::engine::{ExecutionEngine, ThreadExit};
use crate::ppu::state::PpuState;
use crate::CpuError;

/// The processor kinds a Cell BE exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    Ppu,
    Spu,
    RawSpu,
}

/// Lifecycle of a guest thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Built but not yet registered
    Created,
    /// Registered, waiting for start
    Ready,
    Running,
    /// Parked at a block boundary
    Paused,
    Stopped,
}

/// Creation parameters for a guest thread
#[derive(Debug, Clone)]
pub struct ThreadParams {
    pub entry: u32,
    /// Initial value of r3
    pub arg: u64,
    pub stack_size: u32,
    pub priority: u32,
    pub name: String,
}

impl Default for ThreadParams {
    fn default() -> Self {
        Self {
            entry: 0,
            arg: 0,
            stack_size: 0x10000,
            priority: 0,
            name: String::new(),
        }
    }
}

/// A guest PPU thread and its host carrier
pub struct PpuThread {
    pub id: u64,
    pub name: String,
    pub priority: u32,
    /// Guest address of the base of this thread's stack allocation
    pub stack_addr: u32,
    pub stack_size: u32,
    state: Mutex<PpuState>,
    status: Mutex<ThreadState>,
    /// Value passed to the thread-exit syscall, read back by joiners
    exit_value: Mutex<Option<u64>>,
    handle: Mutex<Option<JoinHandle<Result<ThreadExit, CpuError>>>>,
}

impl PpuThread {
    pub(crate) fn new(id: u64, params: &ThreadParams, stack_addr: u32) -> Self {
        let mut state = PpuState::default();
        state.cia = params.entry as u64;
        state.set_gpr(3, params.arg);
        // Stack grows down; leave headroom for the initial frame and
        // keep r1 16-byte aligned.
        state.set_gpr(1, ((stack_addr + params.stack_size) as u64 - 0x40) & !0xF);
        // Returning from the entry point ends the thread
        state.lr = 0;

        Self {
            id,
            name: params.name.clone(),
            priority: params.priority,
            stack_addr,
            stack_size: params.stack_size,
            state: Mutex::new(state),
            status: Mutex::new(ThreadState::Created),
            exit_value: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn set_exit_value(&self, value: u64) {
        *self.exit_value.lock() = Some(value);
    }

    pub fn exit_value(&self) -> Option<u64> {
        *self.exit_value.lock()
    }

    pub fn status(&self) -> ThreadState {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: ThreadState) {
        *self.status.lock() = status;
    }

    /// Mutate the register state before the thread starts
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PpuState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Start executing on a fresh host thread
    pub fn start(self: &Arc<Self>, engine: Arc<ExecutionEngine>) -> Result<(), CpuError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(CpuError::AlreadyStarted { id: self.id });
        }

        let thread = Arc::clone(self);
        let host_name = if thread.name.is_empty() {
            format!("ppu-{}", thread.id)
        } else {
            format!("ppu-{}-{}", thread.id, thread.name)
        };
        let joiner = std::thread::Builder::new()
            .name(host_name)
            .spawn(move || {
                thread.set_status(ThreadState::Running);
                let mut state = thread.state.lock();
                tracing::debug!(target: "cpu", "thread {} entering at 0x{:08x}", thread.id, state.cia);
                let exit = engine.run(&mut state, thread.id);
                match &exit {
                    Ok(exit) => {
                        tracing::debug!(target: "cpu", "thread {} stopped: {exit:?}", thread.id)
                    }
                    Err(e) => tracing::error!(target: "cpu", "thread {} faulted: {e}", thread.id),
                }
                thread.set_status(ThreadState::Stopped);
                exit
            })
            .map_err(CpuError::Spawn)?;
        *handle = Some(joiner);
        Ok(())
    }

    /// Wait for the thread to finish
    pub fn join(&self) -> Result<ThreadExit, CpuError> {
        let handle = self
            .handle
            .lock()
            .take()
            .ok_or(CpuError::NotStarted { id: self.id })?;
        handle.join().map_err(|_| CpuError::Panicked { id: self.id })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let params = ThreadParams {
            entry: 0x1_0000,
            arg: 7,
            stack_size: 0x10000,
            ..ThreadParams::default()
        };
        let thread = PpuThread::new(1, &params, 0xD000_0000);
        thread.with_state(|state| {
            assert_eq!(state.cia, 0x1_0000);
            assert_eq!(state.gpr(3), 7);
            assert_eq!(state.gpr(1) % 16, 0);
            assert!(state.gpr(1) < 0xD001_0000);
            assert!(state.gpr(1) >= 0xD000_0000);
            assert_eq!(state.lr, 0);
        });
    }

    #[test]
    fn test_join_before_start() {
        let thread = PpuThread::new(2, &ThreadParams::default(), 0xD000_0000);
        assert!(matches!(
            thread.join(),
            Err(CpuError::NotStarted { id: 2 })
        ));
    }
}
