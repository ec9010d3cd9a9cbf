//! CELL OS status codes
//!
//! LV2 system calls return a 32-bit status in r3: zero for success, a
//! 0x8001xxxx code otherwise. The value is sign-extended into the full
//! 64-bit register the way the real kernel does it.

/// A non-success LV2 status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub u32);

impl Errno {
    /// Register image of this code: sign-extended 32-bit value
    pub fn to_gpr(self) -> u64 {
        self.0 as i32 as i64 as u64
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

pub const CELL_EAGAIN: Errno = Errno(0x8001_0001);
pub const CELL_EINVAL: Errno = Errno(0x8001_0002);
pub const CELL_ENOSYS: Errno = Errno(0x8001_0003);
pub const CELL_ENOMEM: Errno = Errno(0x8001_0004);
pub const CELL_ESRCH: Errno = Errno(0x8001_0005);
pub const CELL_ENOENT: Errno = Errno(0x8001_0006);
pub const CELL_ENOEXEC: Errno = Errno(0x8001_0007);
pub const CELL_EDEADLK: Errno = Errno(0x8001_0008);
pub const CELL_EPERM: Errno = Errno(0x8001_0009);
pub const CELL_EBUSY: Errno = Errno(0x8001_000A);
pub const CELL_ETIMEDOUT: Errno = Errno(0x8001_000B);
pub const CELL_EABORT: Errno = Errno(0x8001_000C);
pub const CELL_EFAULT: Errno = Errno(0x8001_000D);
pub const CELL_EALIGN: Errno = Errno(0x8001_0010);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_image_is_sign_extended() {
        assert_eq!(CELL_EINVAL.to_gpr(), 0xFFFF_FFFF_8001_0002);
    }
}
