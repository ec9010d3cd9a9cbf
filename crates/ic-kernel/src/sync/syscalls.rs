//! Syscall handlers for the synchronization objects

use std::sync::Arc;

use ic_cpu::ExecContext;

use crate::errno::{Errno, CELL_EBUSY, CELL_EFAULT, CELL_EINVAL};
use crate::object::KernelObject;
use crate::syscall::{arg, Action};
use crate::Lv2Kernel;

use super::cond::GuestCond;
use super::event::{Event, EventFlag, EventQueue};
use super::mutex::GuestMutex;
use super::semaphore::GuestSemaphore;
use super::{SYNC_NOT_PROCESS_SHARED, SYNC_NOT_RECURSIVE, SYNC_PROCESS_SHARED, SYNC_RECURSIVE};

/// Validate a `pshared` attribute field. Shared objects degrade to
/// process-local ones, since exactly one guest process exists.
fn check_pshared(pshared: u32, what: &str) -> Result<(), Errno> {
    match pshared {
        SYNC_NOT_PROCESS_SHARED => Ok(()),
        SYNC_PROCESS_SHARED => {
            tracing::warn!(target: "kernel", "process-shared {what} not supported, treating as local");
            Ok(())
        }
        _ => Err(CELL_EINVAL),
    }
}

/// Read the 8-byte name field of an attribute struct
fn read_attr_name(ctx: &ExecContext<'_>, attr: u32, offset: u32) -> Result<String, Errno> {
    let mut bytes = [0u8; 8];
    ctx.memory
        .read_bytes(attr + offset, &mut bytes)
        .map_err(|_| CELL_EFAULT)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(8);
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// sys_mutex_create(*mutex_id, *attr)
pub(crate) fn sys_mutex_create(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id_ptr = arg(ctx, 0) as u32;
    let attr_ptr = arg(ctx, 1) as u32;
    if id_ptr == 0 || attr_ptr == 0 {
        return Err(CELL_EFAULT);
    }

    // sys_mutex_attribute_t: protocol, recursive, pshared, adaptive,
    // key, flags, pad, name[8]
    let recursive = match ctx.memory.read_be32(attr_ptr + 4).map_err(|_| CELL_EFAULT)? {
        SYNC_RECURSIVE => true,
        SYNC_NOT_RECURSIVE => false,
        _ => return Err(CELL_EINVAL),
    };
    let pshared = ctx.memory.read_be32(attr_ptr + 8).map_err(|_| CELL_EFAULT)?;
    check_pshared(pshared, "mutex")?;
    let name = read_attr_name(ctx, attr_ptr, 32)?;

    let handle = kernel.insert_object(KernelObject::Mutex(Arc::new(GuestMutex::new(
        name, recursive,
    ))));
    ctx.memory
        .write_be32(id_ptr, handle)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_mutex_destroy(mutex_id)
pub(crate) fn sys_mutex_destroy(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id = arg(ctx, 0) as u32;
    let mutex = kernel.lookup(id, KernelObject::as_mutex)?;
    if mutex.owner().is_some() {
        return Err(CELL_EBUSY);
    }
    kernel.remove_object(id, KernelObject::as_mutex)?;
    Ok(Action::Return(0))
}

/// sys_mutex_lock(mutex_id, timeout)
pub(crate) fn sys_mutex_lock(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let mutex = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_mutex)?;
    mutex.lock(ctx.thread_id, arg(ctx, 1))?;
    Ok(Action::Return(0))
}

/// sys_mutex_trylock(mutex_id)
pub(crate) fn sys_mutex_trylock(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let mutex = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_mutex)?;
    mutex.try_lock(ctx.thread_id)?;
    Ok(Action::Return(0))
}

/// sys_mutex_unlock(mutex_id)
pub(crate) fn sys_mutex_unlock(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let mutex = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_mutex)?;
    mutex.unlock(ctx.thread_id)?;
    Ok(Action::Return(0))
}

/// sys_cond_create(*cond_id, mutex_id, *attr)
///
/// Checked in this order: the mutex must exist, the pointers must be
/// valid, the shareability flag must be a recognized value.
pub(crate) fn sys_cond_create(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id_ptr = arg(ctx, 0) as u32;
    let mutex_id = arg(ctx, 1) as u32;
    let attr_ptr = arg(ctx, 2) as u32;

    let mutex = kernel.lookup(mutex_id, KernelObject::as_mutex)?;
    if id_ptr == 0 || attr_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    // sys_cond_attribute_t: pshared, flags, key, name[8]
    let pshared = ctx.memory.read_be32(attr_ptr).map_err(|_| CELL_EFAULT)?;
    check_pshared(pshared, "cond")?;
    let name = read_attr_name(ctx, attr_ptr, 16)?;

    let handle = kernel.insert_object(KernelObject::Cond(Arc::new(GuestCond::new(name, mutex))));
    ctx.memory
        .write_be32(id_ptr, handle)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_cond_destroy(cond_id)
pub(crate) fn sys_cond_destroy(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id = arg(ctx, 0) as u32;
    let cond = kernel.lookup(id, KernelObject::as_cond)?;
    if cond.has_waiters() {
        return Err(CELL_EBUSY);
    }
    kernel.remove_object(id, KernelObject::as_cond)?;
    Ok(Action::Return(0))
}

/// sys_cond_wait(cond_id, timeout)
pub(crate) fn sys_cond_wait(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let cond = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_cond)?;
    cond.wait(ctx.thread_id, arg(ctx, 1))?;
    Ok(Action::Return(0))
}

/// sys_cond_signal(cond_id)
pub(crate) fn sys_cond_signal(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let cond = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_cond)?;
    cond.signal();
    Ok(Action::Return(0))
}

/// sys_cond_signal_all(cond_id)
pub(crate) fn sys_cond_signal_all(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let cond = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_cond)?;
    cond.signal_all();
    Ok(Action::Return(0))
}

/// sys_semaphore_create(*sem_id, *attr, initial, max)
pub(crate) fn sys_semaphore_create(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id_ptr = arg(ctx, 0) as u32;
    let attr_ptr = arg(ctx, 1) as u32;
    let initial = arg(ctx, 2) as i32;
    let max = arg(ctx, 3) as i32;

    if id_ptr == 0 || attr_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    if max <= 0 || initial < 0 || initial > max {
        return Err(CELL_EINVAL);
    }
    // sys_semaphore_attribute_t: protocol, pshared, key, flags, pad, name[8]
    let name = read_attr_name(ctx, attr_ptr, 24)?;

    let handle = kernel.insert_object(KernelObject::Semaphore(Arc::new(GuestSemaphore::new(
        name, initial, max,
    ))));
    ctx.memory
        .write_be32(id_ptr, handle)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_semaphore_destroy(sem_id)
pub(crate) fn sys_semaphore_destroy(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    kernel.remove_object(arg(ctx, 0) as u32, KernelObject::as_semaphore)?;
    Ok(Action::Return(0))
}

/// sys_semaphore_wait(sem_id, timeout)
pub(crate) fn sys_semaphore_wait(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let sem = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_semaphore)?;
    sem.wait(arg(ctx, 1))?;
    Ok(Action::Return(0))
}

/// sys_semaphore_trywait(sem_id)
pub(crate) fn sys_semaphore_trywait(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let sem = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_semaphore)?;
    sem.try_wait()?;
    Ok(Action::Return(0))
}

/// sys_semaphore_post(sem_id, count)
pub(crate) fn sys_semaphore_post(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let sem = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_semaphore)?;
    let count = arg(ctx, 1) as i32;
    if count <= 0 {
        return Err(CELL_EINVAL);
    }
    sem.post(count)?;
    Ok(Action::Return(0))
}

/// sys_event_flag_create(*flag_id, *attr, init)
pub(crate) fn sys_event_flag_create(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id_ptr = arg(ctx, 0) as u32;
    let attr_ptr = arg(ctx, 1) as u32;
    let init = arg(ctx, 2);
    if id_ptr == 0 || attr_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    // sys_event_flag_attribute_t: protocol, pshared, key, flags, type, name[8]
    let name = read_attr_name(ctx, attr_ptr, 24)?;

    let handle =
        kernel.insert_object(KernelObject::EventFlag(Arc::new(EventFlag::new(name, init))));
    ctx.memory
        .write_be32(id_ptr, handle)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_event_flag_destroy(flag_id)
pub(crate) fn sys_event_flag_destroy(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    kernel.remove_object(arg(ctx, 0) as u32, KernelObject::as_event_flag)?;
    Ok(Action::Return(0))
}

/// sys_event_flag_wait(flag_id, mask, mode, *result, timeout)
pub(crate) fn sys_event_flag_wait(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let flag = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_event_flag)?;
    let mask = arg(ctx, 1);
    let mode = arg(ctx, 2) as u32;
    let result_ptr = arg(ctx, 3) as u32;
    let timeout = arg(ctx, 4);

    let seen = flag.wait(mask, mode, timeout)?;
    if result_ptr != 0 {
        ctx.memory
            .write_be64(result_ptr, seen)
            .map_err(|_| CELL_EFAULT)?;
    }
    Ok(Action::Return(0))
}

/// sys_event_flag_set(flag_id, bits)
pub(crate) fn sys_event_flag_set(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let flag = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_event_flag)?;
    flag.set(arg(ctx, 1));
    Ok(Action::Return(0))
}

/// sys_event_flag_clear(flag_id, bits)
pub(crate) fn sys_event_flag_clear(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let flag = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_event_flag)?;
    flag.clear(arg(ctx, 1));
    Ok(Action::Return(0))
}

/// Queue depth limit imposed by LV2
const EVENT_QUEUE_MAX_SIZE: u64 = 127;

/// sys_event_queue_create(*queue_id, *attr, key, size)
pub(crate) fn sys_event_queue_create(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let id_ptr = arg(ctx, 0) as u32;
    let attr_ptr = arg(ctx, 1) as u32;
    let key = arg(ctx, 2);
    let size = arg(ctx, 3);

    if id_ptr == 0 || attr_ptr == 0 {
        return Err(CELL_EFAULT);
    }
    if size == 0 || size > EVENT_QUEUE_MAX_SIZE {
        return Err(CELL_EINVAL);
    }
    // sys_event_queue_attribute_t: protocol, type, name[8]
    let name = read_attr_name(ctx, attr_ptr, 8)?;

    let handle = kernel.insert_object(KernelObject::EventQueue(Arc::new(EventQueue::new(
        name,
        key,
        size as usize,
    ))));
    ctx.memory
        .write_be32(id_ptr, handle)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_event_queue_destroy(queue_id, mode)
pub(crate) fn sys_event_queue_destroy(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    kernel.remove_object(arg(ctx, 0) as u32, KernelObject::as_event_queue)?;
    Ok(Action::Return(0))
}

/// sys_event_queue_receive(queue_id, *dummy_event, timeout)
///
/// The event is returned in r4..r7, matching the kernel ABI; the
/// event pointer argument is ignored, as on LV2.
pub(crate) fn sys_event_queue_receive(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let queue = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_event_queue)?;
    let event: Event = queue.receive(arg(ctx, 2))?;
    ctx.state.set_gpr(4, event.source);
    ctx.state.set_gpr(5, event.data1);
    ctx.state.set_gpr(6, event.data2);
    ctx.state.set_gpr(7, event.data3);
    Ok(Action::Return(0))
}

/// sys_event_queue_drain(queue_id)
pub(crate) fn sys_event_queue_drain(
    kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let queue = kernel.lookup(arg(ctx, 0) as u32, KernelObject::as_event_queue)?;
    queue.drain();
    Ok(Action::Return(0))
}
