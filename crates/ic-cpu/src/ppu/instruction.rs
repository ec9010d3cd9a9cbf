//! PPU instruction word
//!
//! A raw 32-bit PowerPC instruction with explicit shift/mask field
//! accessors. Field positions use the IBM convention (bit 0 is the most
//! significant bit); each accessor documents the bit range it covers.
//! Every 32-bit pattern decodes to *some* field values; validity is a
//! separate predicate.

/// Raw PPU instruction word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

/// Extract the IBM-numbered bit range `from..=to` of a 32-bit word
#[inline]
const fn field(value: u32, from: u32, to: u32) -> u32 {
    (value >> (31 - to)) & ((1 << (to - from + 1)) - 1)
}

impl Instruction {
    /// Primary opcode (bits 0-5)
    #[inline]
    pub fn opcode(self) -> u32 {
        field(self.0, 0, 5)
    }

    /// Extended opcode for primary opcode 19 (bits 21-30)
    #[inline]
    pub fn op19(self) -> u32 {
        field(self.0, 21, 30)
    }

    /// Extended opcode for primary opcode 31 (bits 21-30)
    #[inline]
    pub fn op31(self) -> u32 {
        field(self.0, 21, 30)
    }

    /// GPR destination / source (bits 6-10)
    #[inline]
    pub fn rd(self) -> u8 {
        field(self.0, 6, 10) as u8
    }

    /// Same bit range as `rd`, named per store/source forms
    #[inline]
    pub fn rs(self) -> u8 {
        self.rd()
    }

    /// GPR source (bits 11-15)
    #[inline]
    pub fn ra(self) -> u8 {
        field(self.0, 11, 15) as u8
    }

    /// GPR source (bits 16-20)
    #[inline]
    pub fn rb(self) -> u8 {
        field(self.0, 16, 20) as u8
    }

    /// Destination CR field (bits 6-8)
    #[inline]
    pub fn crfd(self) -> u8 {
        field(self.0, 6, 8) as u8
    }

    /// Immediate 16-bit signed integer (bits 16-31)
    #[inline]
    pub fn simm(self) -> i16 {
        self.0 as u16 as i16
    }

    /// Immediate 16-bit unsigned integer (bits 16-31)
    #[inline]
    pub fn uimm(self) -> u16 {
        self.0 as u16
    }

    /// 14-bit DS displacement (bits 16-29), already shifted left by 2
    #[inline]
    pub fn ds(self) -> i32 {
        ((self.0 & 0xFFFC) as i16 as i32) // low two bits are the XO
    }

    /// L bit of compare instructions (bit 10): 0 = 32-bit, 1 = 64-bit
    #[inline]
    pub fn l10(self) -> bool {
        field(self.0, 10, 10) != 0
    }

    /// Branch options (bits 6-10)
    #[inline]
    pub fn bo(self) -> u8 {
        field(self.0, 6, 10) as u8
    }

    /// CR bit tested by conditional branches (bits 11-15)
    #[inline]
    pub fn bi(self) -> u8 {
        field(self.0, 11, 15) as u8
    }

    /// Branch displacement for B-form (bits 16-29), sign-extended and
    /// shifted left by 2
    #[inline]
    pub fn bd(self) -> i32 {
        let raw = field(self.0, 16, 29) as i32;
        ((raw << 18) >> 18) << 2
    }

    /// Branch displacement for I-form (bits 6-29), sign-extended and
    /// shifted left by 2
    #[inline]
    pub fn li(self) -> i32 {
        let raw = field(self.0, 6, 29) as i32;
        ((raw << 8) >> 8) << 2
    }

    /// Absolute-address bit (bit 30)
    #[inline]
    pub fn aa(self) -> bool {
        field(self.0, 30, 30) != 0
    }

    /// Link bit (bit 31)
    #[inline]
    pub fn lk(self) -> bool {
        field(self.0, 31, 31) != 0
    }

    /// Record bit (bit 31)
    #[inline]
    pub fn rc(self) -> bool {
        field(self.0, 31, 31) != 0
    }

    /// OE bit (bit 21)
    #[inline]
    pub fn oe(self) -> bool {
        field(self.0, 21, 21) != 0
    }

    /// Shift amount (bits 16-20)
    #[inline]
    pub fn sh(self) -> u8 {
        field(self.0, 16, 20) as u8
    }

    /// First mask bit for rotate instructions (bits 21-25)
    #[inline]
    pub fn mb(self) -> u8 {
        field(self.0, 21, 25) as u8
    }

    /// Last mask bit for rotate instructions (bits 26-30)
    #[inline]
    pub fn me(self) -> u8 {
        field(self.0, 26, 30) as u8
    }

    /// Special-purpose register number (bits 11-20, halves swapped)
    #[inline]
    pub fn spr(self) -> u16 {
        let lo = field(self.0, 11, 15);
        let hi = field(self.0, 16, 20);
        ((hi << 5) | lo) as u16
    }

    /// System-call level (bits 20-26)
    #[inline]
    pub fn lev(self) -> u8 {
        field(self.0, 20, 26) as u8
    }

    /// Whether the word corresponds to a defined primary opcode
    pub fn is_valid(self) -> bool {
        !matches!(self.opcode(), 0 | 1 | 5 | 6 | 9 | 22 | 56 | 57 | 60 | 61)
    }

    /// Whether this is a system-call trap
    #[inline]
    pub fn is_syscall(self) -> bool {
        self.opcode() == 17
    }

    fn is_bclr(self) -> bool {
        self.opcode() == 19 && self.op19() == 16
    }

    fn is_bcctr(self) -> bool {
        self.opcode() == 19 && self.op19() == 528
    }

    /// BO field requests an unconditional branch
    #[inline]
    fn bo_always(self) -> bool {
        self.bo() & 0x14 == 0x14
    }

    /// Any branch form: b, bc, bclr, bcctr
    pub fn is_branch(self) -> bool {
        matches!(self.opcode(), 16 | 18) || self.is_bclr() || self.is_bcctr()
    }

    pub fn is_branch_conditional(self) -> bool {
        self.opcode() == 16 || ((self.is_bclr() || self.is_bcctr()) && !self.bo_always())
    }

    pub fn is_branch_unconditional(self) -> bool {
        self.is_branch() && !self.is_branch_conditional()
    }

    /// Branch that updates the link register
    pub fn is_call(self) -> bool {
        self.is_branch() && self.lk()
    }

    /// Call whose target is statically known
    pub fn is_call_known(self) -> bool {
        matches!(self.opcode(), 16 | 18) && self.lk()
    }

    /// Call through LR/CTR: target resolved only at run time
    pub fn is_call_unknown(self) -> bool {
        (self.is_bclr() || self.is_bcctr()) && self.lk()
    }

    /// Unconditional non-linking branch
    pub fn is_jump(self) -> bool {
        self.is_branch_unconditional() && !self.lk()
    }

    pub fn is_jump_known(self) -> bool {
        self.opcode() == 18 && !self.lk()
    }

    pub fn is_jump_unknown(self) -> bool {
        self.is_bcctr() && self.bo_always() && !self.lk()
    }

    /// blr with no condition: returns to the link register
    pub fn is_return(self) -> bool {
        self.is_bclr() && self.bo_always() && !self.lk()
    }

    /// Absolute target address when the branch is taken.
    ///
    /// Only meaningful when `is_branch()` holds and the target is
    /// statically known (I-form and B-form branches).
    pub fn get_target(self, current_addr: u32) -> u32 {
        match self.opcode() {
            18 => {
                if self.aa() {
                    self.li() as u32
                } else {
                    current_addr.wrapping_add(self.li() as u32)
                }
            }
            16 => {
                if self.aa() {
                    self.bd() as u32
                } else {
                    current_addr.wrapping_add(self.bd() as u32)
                }
            }
            _ => 0,
        }
    }
}
