//! Processor front
//!
//! The [`Cell`] owns the guest memory, the execution engine and the
//! thread registry. Thread ids are reused: a new thread always takes
//! the smallest id not currently live.

use std::collections::BTreeMap;
use std::sync::Arc;

use ic_core::config::CpuConfig;
use ic_core::session::{Session, SessionState};
use ic_memory::MemoryManager;
use parking_lot::Mutex;

use crate::engine::{ExecutionEngine, SyscallHandler, ThreadExit};
use crate::thread::{PpuThread, ThreadKind, ThreadParams, ThreadState};
use crate::CpuError;

/// The emulated Cell Broadband Engine
pub struct Cell {
    memory: Arc<MemoryManager>,
    engine: Arc<ExecutionEngine>,
    session: Arc<Session>,
    threads: Mutex<BTreeMap<u64, Arc<PpuThread>>>,
}

impl Cell {
    pub fn new(memory: Arc<MemoryManager>, config: &CpuConfig) -> Arc<Self> {
        let engine = ExecutionEngine::new(Arc::clone(&memory), config.translator);
        Arc::new(Self {
            memory,
            engine,
            session: Arc::new(Session::new()),
            threads: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Install the kernel as the system-call target
    pub fn set_syscall_handler(&self, handler: Arc<dyn SyscallHandler>) {
        self.engine.set_syscall_handler(handler);
    }

    /// Smallest id not currently assigned to a live thread
    fn next_id(threads: &BTreeMap<u64, Arc<PpuThread>>) -> u64 {
        let mut id = 1;
        for &live in threads.keys() {
            if live == id {
                id += 1;
            } else if live > id {
                break;
            }
        }
        id
    }

    /// Register a new guest thread without starting it
    pub fn add_thread(&self, kind: ThreadKind, params: &ThreadParams) -> Result<Arc<PpuThread>, CpuError> {
        match kind {
            ThreadKind::Ppu => {}
            ThreadKind::Spu | ThreadKind::RawSpu => return Err(CpuError::SpuUnsupported),
        }

        let stack_addr = self.memory.allocate_stack(params.stack_size)?;
        let mut threads = self.threads.lock();
        let id = Self::next_id(&threads);
        let thread = Arc::new(PpuThread::new(id, params, stack_addr));
        thread.set_status(ThreadState::Ready);
        threads.insert(id, Arc::clone(&thread));
        tracing::info!(target: "cpu", "thread {id} registered, entry 0x{:08x}", params.entry);
        Ok(thread)
    }

    /// Drop a thread from the registry and release its stack
    pub fn remove_thread(&self, id: u64) -> Result<(), CpuError> {
        let thread = self
            .threads
            .lock()
            .remove(&id)
            .ok_or(CpuError::UnknownThread { id })?;
        self.memory.free_stack(thread.stack_addr)?;
        tracing::debug!(target: "cpu", "thread {id} removed");
        Ok(())
    }

    pub fn get_thread(&self, id: u64) -> Option<Arc<PpuThread>> {
        self.threads.lock().get(&id).cloned()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Start a registered thread
    pub fn start_thread(&self, id: u64) -> Result<(), CpuError> {
        let thread = self.get_thread(id).ok_or(CpuError::UnknownThread { id })?;
        thread.start(Arc::clone(&self.engine))
    }

    /// Park all threads at their next block boundary
    pub fn pause_all(&self) {
        self.engine.pause();
        for thread in self.threads.lock().values() {
            if thread.status() == ThreadState::Running {
                thread.set_status(ThreadState::Paused);
            }
        }
        self.session.set_state(SessionState::Paused);
    }

    /// Release all paused threads
    pub fn resume_all(&self) {
        for thread in self.threads.lock().values() {
            if thread.status() == ThreadState::Paused {
                thread.set_status(ThreadState::Running);
            }
        }
        self.session.set_state(SessionState::Running);
        self.engine.resume();
    }

    /// Stop every thread permanently
    pub fn stop_all(&self) {
        self.session.request_stop();
        self.engine.request_halt();
    }

    /// Create and start the primary thread, then wait for the process
    /// to finish. Returns the guest exit status.
    pub fn run_main(&self, params: &ThreadParams) -> Result<i32, CpuError> {
        let thread = self.add_thread(ThreadKind::Ppu, params)?;
        self.session.set_state(SessionState::Running);
        thread.start(Arc::clone(&self.engine))?;
        let exit = thread.join()?;
        let status = match exit {
            ThreadExit::ProcessExit { status } => status,
            ThreadExit::Exited | ThreadExit::Halted => 0,
        };
        self.remove_thread(thread.id)?;
        self.session.set_state(SessionState::Stopped);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ic_core::config::CpuConfig;

    fn make_cell() -> Arc<Cell> {
        let memory = MemoryManager::new().unwrap();
        Cell::new(memory, &CpuConfig::default())
    }

    fn params() -> ThreadParams {
        ThreadParams {
            entry: 0x1_0000,
            ..ThreadParams::default()
        }
    }

    #[test]
    fn test_smallest_free_id() {
        let cell = make_cell();
        let t1 = cell.add_thread(ThreadKind::Ppu, &params()).unwrap();
        let t2 = cell.add_thread(ThreadKind::Ppu, &params()).unwrap();
        let t3 = cell.add_thread(ThreadKind::Ppu, &params()).unwrap();
        assert_eq!((t1.id, t2.id, t3.id), (1, 2, 3));

        cell.remove_thread(2).unwrap();
        let t4 = cell.add_thread(ThreadKind::Ppu, &params()).unwrap();
        assert_eq!(t4.id, 2);

        let t5 = cell.add_thread(ThreadKind::Ppu, &params()).unwrap();
        assert_eq!(t5.id, 4);
    }

    #[test]
    fn test_remove_unknown_thread() {
        let cell = make_cell();
        assert!(matches!(
            cell.remove_thread(9),
            Err(CpuError::UnknownThread { id: 9 })
        ));
    }

    #[test]
    fn test_spu_threads_rejected() {
        let cell = make_cell();
        assert!(matches!(
            cell.add_thread(ThreadKind::Spu, &params()),
            Err(CpuError::SpuUnsupported)
        ));
    }

    #[test]
    fn test_thread_is_ready_after_registration() {
        let cell = make_cell();
        let t = cell.add_thread(ThreadKind::Ppu, &params()).unwrap();
        assert_eq!(t.status(), ThreadState::Ready);
    }

    #[test]
    fn test_pause_resume_tracks_session() {
        let cell = make_cell();
        assert_eq!(cell.session().state(), SessionState::Stopped);
        cell.pause_all();
        assert_eq!(cell.session().state(), SessionState::Paused);
        cell.resume_all();
        assert_eq!(cell.session().state(), SessionState::Running);
        cell.stop_all();
        assert!(cell.session().stop_requested());
    }

    #[test]
    fn test_stacks_are_distinct() {
        let cell = make_cell();
        let t1 = cell.add_thread(ThreadKind::Ppu, &params()).unwrap();
        let t2 = cell.add_thread(ThreadKind::Ppu, &params()).unwrap();
        assert_ne!(t1.stack_addr, t2.stack_addr);
    }
}
