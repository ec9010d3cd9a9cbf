//! PPU register state
//!
//! `#[repr(C)]` so the compiler backend can address individual fields
//! by byte offset from the state pointer.

/// PPU register file and program counter
#[derive(Debug, Clone)]
#[repr(C)]
pub struct PpuState {
    /// General Purpose Registers (64-bit)
    pub gpr: [u64; 32],
    /// Floating Point Registers
    pub fpr: [f64; 32],
    /// Vector Registers (128-bit, stored as 4 x u32)
    pub vr: [[u32; 4]; 32],
    /// Link Register
    pub lr: u64,
    /// Count Register
    pub ctr: u64,
    /// Fixed-Point Exception Register
    pub xer: u64,
    /// FP Status and Control Register
    pub fpscr: u64,
    /// Current Instruction Address (program counter)
    pub cia: u64,
    /// Condition Register
    pub cr: u32,
    /// Vector Status and Control Register
    pub vscr: u32,
}

impl Default for PpuState {
    fn default() -> Self {
        Self {
            gpr: [0; 32],
            fpr: [0.0; 32],
            vr: [[0; 4]; 32],
            lr: 0,
            ctr: 0,
            xer: 0,
            fpscr: 0,
            cia: 0,
            cr: 0,
            vscr: 0,
        }
    }
}

impl PpuState {
    /// Read a GPR
    #[inline]
    pub fn gpr(&self, index: usize) -> u64 {
        self.gpr[index]
    }

    /// Write a GPR
    #[inline]
    pub fn set_gpr(&mut self, index: usize, value: u64) {
        self.gpr[index] = value;
    }

    /// Get CR field value (0-7)
    pub fn cr_field(&self, field: usize) -> u32 {
        (self.cr >> (28 - field * 4)) & 0xF
    }

    /// Set CR field value (0-7)
    pub fn set_cr_field(&mut self, field: usize, value: u32) {
        let shift = 28 - field * 4;
        self.cr = (self.cr & !(0xF << shift)) | ((value & 0xF) << shift);
    }

    /// Read one CR bit (0 = CR0 LT, 31 = CR7 SO)
    #[inline]
    pub fn cr_bit(&self, bit: usize) -> bool {
        (self.cr >> (31 - bit)) & 1 != 0
    }

    /// Get XER SO (Summary Overflow) bit
    pub fn xer_so(&self) -> bool {
        (self.xer & 0x8000_0000) != 0
    }

    /// Get XER CA (Carry) bit
    pub fn xer_ca(&self) -> bool {
        (self.xer & 0x2000_0000) != 0
    }

    /// Set XER CA (Carry) bit
    pub fn set_xer_ca(&mut self, value: bool) {
        if value {
            self.xer |= 0x2000_0000;
        } else {
            self.xer &= !0x2000_0000;
        }
    }

    /// Update a CR field from a signed comparison plus the SO bit
    pub fn update_cr_cmp(&mut self, field: usize, lt: bool, gt: bool, eq: bool) {
        let value = ((lt as u32) << 3) | ((gt as u32) << 2) | ((eq as u32) << 1) | self.xer_so() as u32;
        self.set_cr_field(field, value);
    }

    /// CR0 update applied by record-form instructions
    pub fn update_cr0(&mut self, result: u64) {
        let signed = result as i64;
        self.update_cr_cmp(0, signed < 0, signed > 0, signed == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cr_fields() {
        let mut state = PpuState::default();
        state.set_cr_field(0, 0b1010);
        assert_eq!(state.cr_field(0), 0b1010);
        state.set_cr_field(7, 0b0101);
        assert_eq!(state.cr_field(7), 0b0101);
        assert_eq!(state.cr_field(0), 0b1010);
    }

    #[test]
    fn test_cr_bits() {
        let mut state = PpuState::default();
        state.update_cr0(0); // EQ
        assert!(!state.cr_bit(0)); // LT
        assert!(!state.cr_bit(1)); // GT
        assert!(state.cr_bit(2)); // EQ

        state.update_cr0(-5i64 as u64);
        assert!(state.cr_bit(0));
        assert!(!state.cr_bit(2));
    }

    #[test]
    fn test_xer_bits() {
        let mut state = PpuState::default();
        assert!(!state.xer_ca());
        state.set_xer_ca(true);
        assert!(state.xer_ca());
        state.set_xer_ca(false);
        assert!(!state.xer_ca());
    }
}
