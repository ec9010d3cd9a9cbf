//! Process syscalls and the TTY channel

use std::io::Write;

use ic_cpu::ExecContext;

use crate::errno::{Errno, CELL_EFAULT, CELL_EINVAL};
use crate::syscall::{arg, Action};
use crate::Lv2Kernel;

/// Fixed ids: emulated processes have exactly one process
const PROCESS_ID: u64 = 1;
const PARENT_PROCESS_ID: u64 = 0;

/// Highest TTY channel number
const TTY_MAX_CHANNEL: u64 = 15;

/// sys_process_getpid()
pub(crate) fn sys_process_getpid(
    _kernel: &Lv2Kernel,
    _ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    Ok(Action::Return(PROCESS_ID))
}

/// sys_process_getppid()
pub(crate) fn sys_process_getppid(
    _kernel: &Lv2Kernel,
    _ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    Ok(Action::Return(PARENT_PROCESS_ID))
}

/// sys_process_exit(status) — brings down the whole guest process
pub(crate) fn sys_process_exit(
    _kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let status = arg(ctx, 0) as i32;
    tracing::info!(target: "kernel", "guest requested process exit with status {status}");
    Ok(Action::ExitProcess { status })
}

/// sys_process_get_sdk_version(pid, *version)
pub(crate) fn sys_process_get_sdk_version(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let version_ptr = arg(ctx, 1) as u32;
    if version_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    ctx.memory
        .write_be32(version_ptr, kernel.sdk_version())
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_tty_write(ch, *buf, len, *written)
pub(crate) fn sys_tty_write(
    _kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let channel = arg(ctx, 0);
    let buf_addr = arg(ctx, 1) as u32;
    let len = arg(ctx, 2) as u32;
    let written_ptr = arg(ctx, 3) as u32;

    if channel > TTY_MAX_CHANNEL {
        return Err(CELL_EINVAL);
    }

    if len > 0 {
        let mut buf = vec![0u8; len as usize];
        ctx.memory
            .read_bytes(buf_addr, &mut buf)
            .map_err(|_| CELL_EFAULT)?;
        let text = String::from_utf8_lossy(&buf);
        tracing::info!(target: "tty", channel, "{}", text.trim_end_matches('\n'));
        // Channels 0/1 are stdout on the console, the rest stderr
        if channel <= 1 {
            let _ = std::io::stdout().write_all(&buf);
        } else {
            let _ = std::io::stderr().write_all(&buf);
        }
    }

    if written_ptr != 0 {
        ctx.memory
            .write_be32(written_ptr, len)
            .map_err(|_| CELL_EFAULT)?;
    }
    Ok(Action::Return(0))
}
