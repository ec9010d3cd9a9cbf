//! LV2 kernel emulation for ironcell
//!
//! Implements the guest-visible kernel surface: the object table,
//! the syscall dispatcher, synchronization primitives, user memory,
//! timers, processes and PPU thread management. The kernel plugs into
//! the CPU crate as its [`SyscallHandler`]; it never touches the
//! execution engine directly except through the registered [`Cell`].

pub mod errno;
pub mod handle;
pub mod memory;
pub mod object;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod timer;

use std::sync::Arc;

use ic_core::config::KernelConfig;
use ic_cpu::{Cell, ExecContext, SyscallDisposition, SyscallHandler};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use errno::{Errno, CELL_EAGAIN, CELL_ESRCH};
use handle::{Arena, Handle};
use object::KernelObject;
use syscall::{Action, SyscallTable};

/// SDK version reported to guests
const SDK_VERSION: u32 = 0x0036_0001;

/// The emulated LV2 kernel
pub struct Lv2Kernel {
    table: SyscallTable,
    objects: Mutex<Arena<KernelObject>>,
    /// Back-reference to the processor, wired after construction
    cell: OnceCell<Arc<Cell>>,
}

impl Lv2Kernel {
    pub fn new(config: &KernelConfig) -> Arc<Self> {
        let table = SyscallTable::for_firmware(config.firmware);
        tracing::info!(
            target: "kernel",
            "lv2 kernel up: {:?} firmware, {} syscalls",
            config.firmware,
            table.population()
        );
        Arc::new(Self {
            table,
            objects: Mutex::new(Arena::new()),
            cell: OnceCell::new(),
        })
    }

    /// Wire up the processor this kernel manages threads on
    pub fn attach_cell(&self, cell: Arc<Cell>) {
        if self.cell.set(cell).is_err() {
            tracing::warn!(target: "kernel", "cell already attached");
        }
    }

    pub(crate) fn cell(&self) -> Result<&Arc<Cell>, Errno> {
        self.cell.get().ok_or(CELL_EAGAIN)
    }

    pub fn sdk_version(&self) -> u32 {
        SDK_VERSION
    }

    pub(crate) fn insert_object(&self, object: KernelObject) -> Handle {
        self.objects.lock().insert(object)
    }

    /// Look up an object, expecting a particular kind. A missing
    /// handle, a stale handle and a kind mismatch are all ESRCH: the
    /// guest named an object that does not exist as asked.
    pub(crate) fn lookup<T>(
        &self,
        handle: Handle,
        as_kind: impl Fn(&KernelObject) -> Option<T>,
    ) -> Result<T, Errno> {
        self.objects
            .lock()
            .get(handle)
            .and_then(as_kind)
            .ok_or(CELL_ESRCH)
    }

    pub(crate) fn remove_object<T>(
        &self,
        handle: Handle,
        as_kind: impl Fn(&KernelObject) -> Option<T>,
    ) -> Result<(), Errno> {
        let mut objects = self.objects.lock();
        match objects.get(handle) {
            Some(object) if as_kind(object).is_some() => {
                objects.remove(handle);
                Ok(())
            }
            _ => Err(CELL_ESRCH),
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

impl SyscallHandler for Lv2Kernel {
    fn dispatch(&self, ctx: &mut ExecContext<'_>) -> SyscallDisposition {
        let num = ctx.state.gpr(11);
        let Some(entry) = self.table.get(num) else {
            // Unknown numbers must leave the register state untouched
            tracing::warn!(target: "kernel", "unknown syscall 0x{num:x}, ignoring");
            return SyscallDisposition::Continue;
        };

        tracing::trace!(
            target: "kernel",
            "{}(0x{:x}, 0x{:x}, 0x{:x}, 0x{:x})",
            entry.name,
            ctx.state.gpr(3),
            ctx.state.gpr(4),
            ctx.state.gpr(5),
            ctx.state.gpr(6),
        );

        match (entry.handler)(self, ctx) {
            Ok(Action::Return(value)) => {
                ctx.state.set_gpr(3, value);
                SyscallDisposition::Continue
            }
            Ok(Action::ExitThread) => SyscallDisposition::ExitThread,
            Ok(Action::ExitProcess { status }) => SyscallDisposition::ExitProcess { status },
            Err(errno) => {
                tracing::debug!(target: "kernel", "{} -> {errno}", entry.name);
                ctx.state.set_gpr(3, errno.to_gpr());
                SyscallDisposition::Continue
            }
        }
    }
}
