//! Timer and clock syscalls

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ic_cpu::ExecContext;

use crate::errno::{Errno, CELL_EFAULT};
use crate::syscall::{arg, Action};
use crate::Lv2Kernel;

/// Timeouts are 48-bit microsecond counts on LV2; anything larger is
/// clamped, not rejected.
pub const MAX_TIMEOUT_USEC: u64 = (1 << 48) - 1;

pub fn clamp_timeout(usec: u64) -> u64 {
    usec.min(MAX_TIMEOUT_USEC)
}

/// The PS3 timebase ticks at 79.8 MHz
pub const TIMEBASE_FREQUENCY: u64 = 79_800_000;

/// sys_timer_usleep(sleep_time_usec)
pub(crate) fn sys_timer_usleep(
    _kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let usec = clamp_timeout(arg(ctx, 0));
    std::thread::sleep(Duration::from_micros(usec));
    Ok(Action::Return(0))
}

/// sys_timer_sleep(sleep_time_sec)
pub(crate) fn sys_timer_sleep(
    _kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let usec = clamp_timeout(arg(ctx, 0).saturating_mul(1_000_000));
    std::thread::sleep(Duration::from_micros(usec));
    Ok(Action::Return(0))
}

/// sys_time_get_current_time(*sec, *nsec)
pub(crate) fn sys_time_get_current_time(
    _kernel: &Lv2Kernel,
    ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    let sec_ptr = arg(ctx, 0) as u32;
    let nsec_ptr = arg(ctx, 1) as u32;
    if sec_ptr == 0 || nsec_ptr == 0 {
        return Err(CELL_EFAULT);
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let memory = ctx.memory;
    memory
        .write_be64(sec_ptr, now.as_secs())
        .map_err(|_| CELL_EFAULT)?;
    memory
        .write_be64(nsec_ptr, now.subsec_nanos() as u64)
        .map_err(|_| CELL_EFAULT)?;
    Ok(Action::Return(0))
}

/// sys_time_get_timebase_frequency()
pub(crate) fn sys_time_get_timebase_frequency(
    _kernel: &Lv2Kernel,
    _ctx: &mut ExecContext<'_>,
) -> Result<Action, Errno> {
    Ok(Action::Return(TIMEBASE_FREQUENCY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_clamp() {
        assert_eq!(clamp_timeout(0), 0);
        assert_eq!(clamp_timeout(1_000), 1_000);
        assert_eq!(clamp_timeout(MAX_TIMEOUT_USEC), MAX_TIMEOUT_USEC);
        assert_eq!(clamp_timeout(u64::MAX), MAX_TIMEOUT_USEC);
        assert_eq!(clamp_timeout(1 << 48), MAX_TIMEOUT_USEC);
    }
}
