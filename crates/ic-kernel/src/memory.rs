//! User memory syscalls

use ic_cpu::ExecContext;
use ic_memory::constants::{LARGE_PAGE_SIZE, PAGE_SIZE};
use ic_memory::PageFlags;

use crate::errno::{Errno, CELL_EALIGN, CELL_EFAULT, CELL_EINVAL, CELL_ENOMEM};
use crate::object::{KernelObject, MemoryContainer};
use crate::syscall::{arg, Action};
use crate::Lv2Kernel;

/// sys_memory_allocate flag: back with 1 MiB pages
const MEMORY_PAGE_SIZE_1M: u64 = 0x400;
/// sys_memory_allocate flag: back with 64 KiB pages
const MEMORY_PAGE_SIZE_64K: u64 = 0x200;

const PAGE_64K: u32 = 0x1_0000;

/// sys_memory_allocate(size, flags, *alloc_addr)
pub(crate) fn sys_memory_allocate(
    _kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let size = arg(ctx, 0) as u32;
    let flags = arg(ctx, 1);
    let addr_ptr = arg(ctx, 2) as u32;

    let page = match flags {
        MEMORY_PAGE_SIZE_1M => LARGE_PAGE_SIZE,
        MEMORY_PAGE_SIZE_64K => PAGE_64K,
        _ => return Err(CELL_EINVAL),
    };
    if size == 0 || size % page != 0 {
        return Err(CELL_EALIGN);
    }
    if addr_ptr == 0 {
        return Err(CELL_EFAULT);
    }

    let addr = ctx
        .memory
        .allocate(size, page, PageFlags::RW)
        .map_err(|_| CELL_ENOMEM)?;
    ctx.memory
        .write_be32(addr_ptr, addr)
        .map_err(|_| CELL_EFAULT)?;
    tracing::debug!(target: "kernel", "sys_memory_allocate: 0x{size:x} bytes at 0x{addr:08x}");
    Ok(Action::Return(0))
}

/// sys_memory_free(start_addr)
pub(crate) fn sys_memory_free(
    _kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let addr = arg(ctx, 0) as u32;
    ctx.memory.free(addr).map_err(|_| CELL_EINVAL)?;
    Ok(Action::Return(0))
}

/// sys_memory_get_user_memory_size(*mem_info)
///
/// `mem_info` is a pair of big-endian u32s: total then available.
pub(crate) fn sys_memory_get_user_memory_size(
    _kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let info_ptr = arg(ctx, 0) as u32;
    if info_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    let (total, available) = ctx.memory.user_memory_stats();
    ctx.memory
        .write_be32(info_ptr, total)
        .map_err(|_| CELL_EFAULT)?;
    ctx.memory
        .write_be32(info_ptr + 4, available)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_memory_container_create(*cid, size)
pub(crate) fn sys_memory_container_create(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let cid_ptr = arg(ctx, 0) as u32;
    let size = arg(ctx, 1) as u32;
    if cid_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    if size == 0 || size % PAGE_SIZE != 0 {
        return Err(CELL_EALIGN);
    }

    let handle = kernel.insert_object(KernelObject::MemoryContainer(
        std::sync::Arc::new(MemoryContainer { size }),
    ));
    ctx.memory
        .write_be32(cid_ptr, handle)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_memory_container_destroy(cid)
pub(crate) fn sys_memory_container_destroy(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let cid = arg(ctx, 0) as u32;
    kernel.remove_object(cid, |object| object.as_memory_container().map(|_| ()))?;
    Ok(Action::Return(0))
}
