//! Guest synchronization primitives and their syscall handlers

pub mod cond;
pub mod event;
pub mod mutex;
pub mod semaphore;

pub(crate) mod syscalls;

/// Value of `pshared` for objects local to one process
pub const SYNC_NOT_PROCESS_SHARED: u32 = 0x200;
/// Value of `pshared` for objects shared across processes; emulated as
/// process-local, since there is only one guest process
pub const SYNC_PROCESS_SHARED: u32 = 0x100;

/// Recursive locking allowed
pub const SYNC_RECURSIVE: u32 = 0x10;
/// Recursive locking forbidden
pub const SYNC_NOT_RECURSIVE: u32 = 0x20;
