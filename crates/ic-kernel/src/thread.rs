//! PPU thread syscalls

use ic_cpu::{ExecContext, ThreadKind, ThreadParams};

use crate::errno::{Errno, CELL_EDEADLK, CELL_EFAULT, CELL_EINVAL, CELL_ESRCH};
use crate::syscall::{arg, Action};
use crate::Lv2Kernel;

const MAX_NAME_LEN: usize = 128;
const MIN_STACK_SIZE: u32 = 0x1000;

/// Read a NUL-terminated guest string
fn read_name(ctx: &ExecContext<'_>, addr: u32) -> Result<String, Errno> {
    if addr == 0 {
        return Ok(String::new());
    }
    let mut bytes = Vec::new();
    for offset in 0..MAX_NAME_LEN as u32 {
        let byte = ctx.memory.read::<u8>(addr + offset).map_err(|_| CELL_EFAULT)?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// sys_ppu_thread_create(*thread_id, entry, arg, prio, stacksize, flags, *name)
pub(crate) fn sys_ppu_thread_create(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id_ptr = arg(ctx, 0) as u32;
    let entry = arg(ctx, 1) as u32;
    let thread_arg = arg(ctx, 2);
    let priority = arg(ctx, 3) as u32;
    let stack_size = (arg(ctx, 4) as u32).max(MIN_STACK_SIZE);
    let name_ptr = arg(ctx, 6) as u32;

    if id_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    if entry == 0 {
        return Err(CELL_EINVAL);
    }
    let name = read_name(ctx, name_ptr)?;

    let cell = kernel.cell()?;
    let thread = cell
        .add_thread(
            ThreadKind::Ppu,
            &ThreadParams {
                entry,
                arg: thread_arg,
                stack_size,
                priority,
                name,
            },
        )
        .map_err(|_| CELL_EINVAL)?;
    ctx.memory
        .write_be64(id_ptr, thread.id)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_ppu_thread_start(thread_id)
pub(crate) fn sys_ppu_thread_start(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id = arg(ctx, 0);
    kernel.cell()?.start_thread(id).map_err(|_| CELL_ESRCH)?;
    Ok(Action::Return(0))
}

/// sys_ppu_thread_join(thread_id, *vptr)
pub(crate) fn sys_ppu_thread_join(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id = arg(ctx, 0);
    let value_ptr = arg(ctx, 1) as u32;

    // A thread joining itself would block forever
    if id == ctx.thread_id {
        return Err(CELL_EDEADLK);
    }

    let cell = kernel.cell()?;
    let thread = cell.get_thread(id).ok_or(CELL_ESRCH)?;
    thread.join().map_err(|_| CELL_ESRCH)?;
    if value_ptr != 0 {
        ctx.memory
            .write_be64(value_ptr, thread.exit_value().unwrap_or(0))
            .map_err(|_| CELL_EFAULT)?;
    }
    cell.remove_thread(id).map_err(|_| CELL_ESRCH)?;
    Ok(Action::Return(0))
}

/// _sys_ppu_thread_exit(value)
pub(crate) fn sys_ppu_thread_exit(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let value = arg(ctx, 0);
    if let Ok(cell) = kernel.cell() {
        if let Some(thread) = cell.get_thread(ctx.thread_id) {
            thread.set_exit_value(value);
        }
    }
    Ok(Action::ExitThread)
}

/// sys_ppu_thread_get_priority(thread_id, *prio)
pub(crate) fn sys_ppu_thread_get_priority(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id = arg(ctx, 0);
    let prio_ptr = arg(ctx, 1) as u32;
    if prio_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    let thread = kernel.cell()?.get_thread(id).ok_or(CELL_ESRCH)?;
    ctx.memory
        .write_be32(prio_ptr, thread.priority)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_ppu_thread_yield()
pub(crate) fn sys_ppu_thread_yield(
    _kernel: &Lv2Kernel,
    _ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    std::thread::yield_now();
    Ok(Action::Return(0))
}
