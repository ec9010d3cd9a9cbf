//! The LV2 syscall table
//!
//! A fixed table of 1024 numbered entries, populated once for the
//! emulated firmware revision. The dispatcher reads the syscall number
//! from r11 and its arguments from r3..r10; handlers report a status
//! that lands back in r3.

use bitflags::bitflags;
use ic_core::config::FirmwareKind;
use ic_cpu::ExecContext;

use crate::errno::Errno;
use crate::{memory, process, sync, thread, timer, Lv2Kernel};

pub const TABLE_SIZE: usize = 1024;

bitflags! {
    /// Firmware revisions a syscall exists on
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FwFlags: u8 {
        const CEX = 1;
        const DEX = 2;
        const DECR = 4;
    }
}

impl FwFlags {
    pub fn supports(self, firmware: FirmwareKind) -> bool {
        self.contains(match firmware {
            FirmwareKind::Cex => FwFlags::CEX,
            FirmwareKind::Dex => FwFlags::DEX,
            FirmwareKind::Decr => FwFlags::DECR,
        })
    }
}

const ALL: FwFlags = FwFlags::all();
/// Debug firmwares only
const DBG: FwFlags = FwFlags::DEX.union(FwFlags::DECR);

/// What the dispatcher should do after a handler ran
pub(crate) enum Action {
    /// Write the value to r3 and resume the thread
    Return(u64),
    ExitThread,
    ExitProcess { status: i32 },
}

pub(crate) type Handler = fn(&Lv2Kernel, &mut ExecContext<'_>) -> Result<Action, Errno>;

/// Syscall argument `n`, from r3 upward
pub(crate) fn arg(ctx: &ExecContext<'_>, n: usize) -> u64 {
    ctx.state.gpr(3 + n)
}

pub struct SyscallEntry {
    pub num: u16,
    pub name: &'static str,
    pub flags: FwFlags,
    pub(crate) handler: Handler,
}

macro_rules! entry {
    ($num:expr, $name:ident, $flags:expr, $handler:path) => {
        SyscallEntry {
            num: $num,
            name: stringify!($name),
            flags: $flags,
            handler: $handler,
        }
    };
}

static SYSCALLS: &[SyscallEntry] = &[
    entry!(0x001, sys_process_getpid, ALL, process::sys_process_getpid),
    entry!(0x003, sys_process_exit, ALL, process::sys_process_exit),
    entry!(0x012, sys_process_getppid, ALL, process::sys_process_getppid),
    entry!(0x019, sys_process_get_sdk_version, ALL, process::sys_process_get_sdk_version),
    entry!(0x029, _sys_ppu_thread_exit, ALL, thread::sys_ppu_thread_exit),
    entry!(0x02B, sys_ppu_thread_yield, ALL, thread::sys_ppu_thread_yield),
    entry!(0x02C, sys_ppu_thread_join, ALL, thread::sys_ppu_thread_join),
    entry!(0x030, sys_ppu_thread_get_priority, ALL, thread::sys_ppu_thread_get_priority),
    entry!(0x034, sys_ppu_thread_create, ALL, thread::sys_ppu_thread_create),
    entry!(0x035, sys_ppu_thread_start, ALL, thread::sys_ppu_thread_start),
    entry!(0x052, sys_event_flag_create, ALL, sync::syscalls::sys_event_flag_create),
    entry!(0x053, sys_event_flag_destroy, ALL, sync::syscalls::sys_event_flag_destroy),
    entry!(0x055, sys_event_flag_wait, ALL, sync::syscalls::sys_event_flag_wait),
    entry!(0x057, sys_event_flag_set, ALL, sync::syscalls::sys_event_flag_set),
    entry!(0x058, sys_event_flag_clear, ALL, sync::syscalls::sys_event_flag_clear),
    entry!(0x05A, sys_semaphore_create, ALL, sync::syscalls::sys_semaphore_create),
    entry!(0x05B, sys_semaphore_destroy, ALL, sync::syscalls::sys_semaphore_destroy),
    entry!(0x05C, sys_semaphore_wait, ALL, sync::syscalls::sys_semaphore_wait),
    entry!(0x05D, sys_semaphore_trywait, ALL, sync::syscalls::sys_semaphore_trywait),
    entry!(0x05E, sys_semaphore_post, ALL, sync::syscalls::sys_semaphore_post),
    entry!(0x064, sys_mutex_create, ALL, sync::syscalls::sys_mutex_create),
    entry!(0x065, sys_mutex_destroy, ALL, sync::syscalls::sys_mutex_destroy),
    entry!(0x066, sys_mutex_lock, ALL, sync::syscalls::sys_mutex_lock),
    entry!(0x067, sys_mutex_trylock, ALL, sync::syscalls::sys_mutex_trylock),
    entry!(0x068, sys_mutex_unlock, ALL, sync::syscalls::sys_mutex_unlock),
    entry!(0x069, sys_cond_create, ALL, sync::syscalls::sys_cond_create),
    entry!(0x06A, sys_cond_destroy, ALL, sync::syscalls::sys_cond_destroy),
    entry!(0x06B, sys_cond_wait, ALL, sync::syscalls::sys_cond_wait),
    entry!(0x06C, sys_cond_signal, ALL, sync::syscalls::sys_cond_signal),
    entry!(0x06D, sys_cond_signal_all, ALL, sync::syscalls::sys_cond_signal_all),
    entry!(0x080, sys_event_queue_create, ALL, sync::syscalls::sys_event_queue_create),
    entry!(0x081, sys_event_queue_destroy, ALL, sync::syscalls::sys_event_queue_destroy),
    entry!(0x082, sys_event_queue_receive, ALL, sync::syscalls::sys_event_queue_receive),
    entry!(0x085, sys_event_queue_drain, ALL, sync::syscalls::sys_event_queue_drain),
    entry!(0x08D, sys_timer_usleep, ALL, timer::sys_timer_usleep),
    entry!(0x08E, sys_timer_sleep, ALL, timer::sys_timer_sleep),
    entry!(0x091, sys_time_get_current_time, ALL, timer::sys_time_get_current_time),
    entry!(0x093, sys_time_get_timebase_frequency, ALL, timer::sys_time_get_timebase_frequency),
    entry!(0x155, sys_memory_container_create, ALL, memory::sys_memory_container_create),
    entry!(0x156, sys_memory_container_destroy, ALL, memory::sys_memory_container_destroy),
    entry!(0x15C, sys_memory_allocate, ALL, memory::sys_memory_allocate),
    entry!(0x15D, sys_memory_free, ALL, memory::sys_memory_free),
    entry!(0x160, sys_memory_get_user_memory_size, ALL, memory::sys_memory_get_user_memory_size),
    entry!(0x193, sys_tty_write, DBG, process::sys_tty_write),
];

/// The 1024-entry dispatch table for one firmware revision
pub struct SyscallTable {
    entries: Vec<Option<&'static SyscallEntry>>,
}

impl SyscallTable {
    pub fn for_firmware(firmware: FirmwareKind) -> Self {
        let mut entries: Vec<Option<&'static SyscallEntry>> = vec![None; TABLE_SIZE];
        for entry in SYSCALLS {
            debug_assert!(entries[entry.num as usize].is_none(), "duplicate syscall number");
            if entry.flags.supports(firmware) {
                entries[entry.num as usize] = Some(entry);
            }
        }
        Self { entries }
    }

    pub fn get(&self, num: u64) -> Option<&'static SyscallEntry> {
        self.entries.get(num as usize).copied().flatten()
    }

    /// Number of populated entries
    pub fn population(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_numbers() {
        let mut seen = std::collections::HashSet::new();
        for entry in SYSCALLS {
            assert!(seen.insert(entry.num), "duplicate syscall 0x{:x}", entry.num);
            assert!((entry.num as usize) < TABLE_SIZE);
        }
    }

    #[test]
    fn test_firmware_filtering() {
        let cex = SyscallTable::for_firmware(FirmwareKind::Cex);
        let decr = SyscallTable::for_firmware(FirmwareKind::Decr);

        // TTY output exists only on debug firmwares
        assert!(cex.get(0x193).is_none());
        assert!(decr.get(0x193).is_some());
        assert_eq!(cex.population() + 1, decr.population());
    }

    #[test]
    fn test_out_of_range_lookup() {
        let table = SyscallTable::for_firmware(FirmwareKind::Cex);
        assert!(table.get(TABLE_SIZE as u64).is_none());
        assert!(table.get(u64::MAX).is_none());
    }
}
