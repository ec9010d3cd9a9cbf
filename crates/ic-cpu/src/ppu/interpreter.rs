//! PPU interpreter
//!
//! Single-instruction execution against the register state and guest
//! memory. The engine falls back to this path for functions the
//! recompiler cannot lift, so the interpreter covers a wider
//! instruction set than the lifter, including the linking and
//! CTR-decrementing branch forms.

use ic_memory::MemoryManager;

use crate::CpuError;

use super::instruction::Instruction;
use super::state::PpuState;

/// Outcome of executing one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// Instruction retired; `cia` names the next instruction
    Continue,
    /// System-call trap; `cia` already names the resume address
    Syscall,
}

/// Execute the instruction at `state.cia`
pub fn step(state: &mut PpuState, memory: &MemoryManager) -> Result<StepEvent, CpuError> {
    let pc = state.cia as u32;
    let word = memory.read_be32(pc)?;
    let insn = Instruction(word);
    let mut next = pc.wrapping_add(4);

    match insn.opcode() {
        // mulli
        7 => {
            let a = state.gpr(insn.ra() as usize) as i64;
            state.set_gpr(insn.rd() as usize, a.wrapping_mul(insn.simm() as i64) as u64);
        }
        // subfic
        8 => {
            let a = state.gpr(insn.ra() as usize);
            let imm = insn.simm() as i64 as u64;
            let (result, borrow) = imm.overflowing_sub(a);
            state.set_gpr(insn.rd() as usize, result);
            state.set_xer_ca(!borrow);
        }
        // cmpli
        10 => {
            let a = state.gpr(insn.ra() as usize);
            let a = if insn.l10() { a } else { a as u32 as u64 };
            let imm = insn.uimm() as u64;
            state.update_cr_cmp(insn.crfd() as usize, a < imm, a > imm, a == imm);
        }
        // cmpi
        11 => {
            let a = state.gpr(insn.ra() as usize) as i64;
            let a = if insn.l10() { a } else { a as i32 as i64 };
            let imm = insn.simm() as i64;
            state.update_cr_cmp(insn.crfd() as usize, a < imm, a > imm, a == imm);
        }
        // addic / addic.
        12 | 13 => {
            let a = state.gpr(insn.ra() as usize);
            let (result, carry) = a.overflowing_add(insn.simm() as i64 as u64);
            state.set_gpr(insn.rd() as usize, result);
            state.set_xer_ca(carry);
            if insn.opcode() == 13 {
                state.update_cr0(result);
            }
        }
        // addi
        14 => {
            let base = if insn.ra() == 0 {
                0
            } else {
                state.gpr(insn.ra() as usize)
            };
            state.set_gpr(insn.rd() as usize, base.wrapping_add(insn.simm() as i64 as u64));
        }
        // addis
        15 => {
            let base = if insn.ra() == 0 {
                0
            } else {
                state.gpr(insn.ra() as usize)
            };
            let imm = ((insn.simm() as i64) << 16) as u64;
            state.set_gpr(insn.rd() as usize, base.wrapping_add(imm));
        }
        // bc
        16 => {
            if insn.lk() {
                state.lr = next as u64;
            }
            if branch_taken(state, insn) {
                next = insn.get_target(pc);
            }
        }
        // sc
        17 => {
            state.cia = next as u64;
            return Ok(StepEvent::Syscall);
        }
        // b / bl / ba / bla
        18 => {
            if insn.lk() {
                state.lr = next as u64;
            }
            next = insn.get_target(pc);
        }
        19 => match insn.op19() {
            // bclr
            16 => {
                let target = (state.lr as u32) & !3;
                if insn.lk() {
                    state.lr = next as u64;
                }
                if branch_taken(state, insn) {
                    next = target;
                }
            }
            // isync
            150 => {}
            // bcctr
            528 => {
                if insn.lk() {
                    state.lr = next as u64;
                }
                // CTR-decrement forms are invalid for bcctr
                if cond_ok(state, insn) {
                    next = (state.ctr as u32) & !3;
                }
            }
            _ => return Err(unsupported(insn, pc)),
        },
        // rlwinm
        21 => {
            let src = state.gpr(insn.rs() as usize) as u32;
            let rotated = src.rotate_left(insn.sh() as u32);
            let result = (rotated & mask32(insn.mb(), insn.me())) as u64;
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // ori / oris / xori / xoris / andi. / andis.
        24..=29 => {
            let src = state.gpr(insn.rs() as usize);
            let imm = match insn.opcode() {
                24 | 26 | 28 => insn.uimm() as u64,
                _ => (insn.uimm() as u64) << 16,
            };
            let result = match insn.opcode() {
                24 | 25 => src | imm,
                26 | 27 => src ^ imm,
                _ => src & imm,
            };
            state.set_gpr(insn.ra() as usize, result);
            if matches!(insn.opcode(), 28 | 29) {
                state.update_cr0(result);
            }
        }
        31 => step_op31(state, memory, insn, pc)?,
        // lwz / lwzu
        32 | 33 => {
            let ea = ea_d(state, insn);
            let value = memory.read_be32(ea)? as u64;
            state.set_gpr(insn.rd() as usize, value);
            if insn.opcode() == 33 {
                state.set_gpr(insn.ra() as usize, ea as u64);
            }
        }
        // lbz / lbzu
        34 | 35 => {
            let ea = ea_d(state, insn);
            let value = memory.read::<u8>(ea)? as u64;
            state.set_gpr(insn.rd() as usize, value);
            if insn.opcode() == 35 {
                state.set_gpr(insn.ra() as usize, ea as u64);
            }
        }
        // stw / stwu
        36 | 37 => {
            let ea = ea_d(state, insn);
            memory.write_be32(ea, state.gpr(insn.rs() as usize) as u32)?;
            if insn.opcode() == 37 {
                state.set_gpr(insn.ra() as usize, ea as u64);
            }
        }
        // stb / stbu
        38 | 39 => {
            let ea = ea_d(state, insn);
            memory.write::<u8>(ea, state.gpr(insn.rs() as usize) as u8)?;
            if insn.opcode() == 39 {
                state.set_gpr(insn.ra() as usize, ea as u64);
            }
        }
        // lhz / lhzu
        40 | 41 => {
            let ea = ea_d(state, insn);
            let value = memory.read_be16(ea)? as u64;
            state.set_gpr(insn.rd() as usize, value);
            if insn.opcode() == 41 {
                state.set_gpr(insn.ra() as usize, ea as u64);
            }
        }
        // lha
        42 => {
            let ea = ea_d(state, insn);
            let value = memory.read_be16(ea)? as i16 as i64 as u64;
            state.set_gpr(insn.rd() as usize, value);
        }
        // sth / sthu
        44 | 45 => {
            let ea = ea_d(state, insn);
            memory.write_be16(ea, state.gpr(insn.rs() as usize) as u16)?;
            if insn.opcode() == 45 {
                state.set_gpr(insn.ra() as usize, ea as u64);
            }
        }
        // ld / ldu
        58 => {
            let ea = ea_ds(state, insn);
            match insn.0 & 3 {
                0 | 1 => {
                    let value = memory.read_be64(ea)?;
                    state.set_gpr(insn.rd() as usize, value);
                    if insn.0 & 3 == 1 {
                        state.set_gpr(insn.ra() as usize, ea as u64);
                    }
                }
                _ => return Err(unsupported(insn, pc)),
            }
        }
        // std / stdu
        62 => {
            let ea = ea_ds(state, insn);
            match insn.0 & 3 {
                0 | 1 => {
                    memory.write_be64(ea, state.gpr(insn.rs() as usize))?;
                    if insn.0 & 3 == 1 {
                        state.set_gpr(insn.ra() as usize, ea as u64);
                    }
                }
                _ => return Err(unsupported(insn, pc)),
            }
        }
        _ => return Err(unsupported(insn, pc)),
    }

    state.cia = next as u64;
    Ok(StepEvent::Continue)
}

fn step_op31(
    state: &mut PpuState,
    memory: &MemoryManager,
    insn: Instruction,
    pc: u32,
) -> Result<(), CpuError> {
    match insn.op31() {
        // cmp
        0 => {
            let a = state.gpr(insn.ra() as usize) as i64;
            let b = state.gpr(insn.rb() as usize) as i64;
            let (a, b) = if insn.l10() {
                (a, b)
            } else {
                (a as i32 as i64, b as i32 as i64)
            };
            state.update_cr_cmp(insn.crfd() as usize, a < b, a > b, a == b);
        }
        // mfcr
        19 => {
            state.set_gpr(insn.rd() as usize, state.cr as u64);
        }
        // lwzx
        23 => {
            let value = memory.read_be32(ea_x(state, insn))? as u64;
            state.set_gpr(insn.rd() as usize, value);
        }
        // slw
        24 => {
            let amount = state.gpr(insn.rb() as usize) & 0x3F;
            let result = if amount > 31 {
                0
            } else {
                ((state.gpr(insn.rs() as usize) as u32) << amount) as u64
            };
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // and / andc
        28 | 60 => {
            let b = state.gpr(insn.rb() as usize);
            let b = if insn.op31() == 60 { !b } else { b };
            let result = state.gpr(insn.rs() as usize) & b;
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // cmpl
        32 => {
            let a = state.gpr(insn.ra() as usize);
            let b = state.gpr(insn.rb() as usize);
            let (a, b) = if insn.l10() {
                (a, b)
            } else {
                (a as u32 as u64, b as u32 as u64)
            };
            state.update_cr_cmp(insn.crfd() as usize, a < b, a > b, a == b);
        }
        // subf
        40 => {
            let result = state
                .gpr(insn.rb() as usize)
                .wrapping_sub(state.gpr(insn.ra() as usize));
            state.set_gpr(insn.rd() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // neg
        104 => {
            let result = (state.gpr(insn.ra() as usize) as i64).wrapping_neg() as u64;
            state.set_gpr(insn.rd() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // nor
        124 => {
            let result = !(state.gpr(insn.rs() as usize) | state.gpr(insn.rb() as usize));
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // mtcrf
        144 => {
            let mask = crm_mask(((insn.0 >> 12) & 0xFF) as u8);
            let value = state.gpr(insn.rs() as usize) as u32;
            state.cr = (state.cr & !mask) | (value & mask);
        }
        // stwx
        151 => {
            memory.write_be32(ea_x(state, insn), state.gpr(insn.rs() as usize) as u32)?;
        }
        // mulld
        233 => {
            let result = (state.gpr(insn.ra() as usize) as i64)
                .wrapping_mul(state.gpr(insn.rb() as usize) as i64);
            state.set_gpr(insn.rd() as usize, result as u64);
            if insn.rc() {
                state.update_cr0(result as u64);
            }
        }
        // mullw
        235 => {
            let result = (state.gpr(insn.ra() as usize) as i32 as i64)
                .wrapping_mul(state.gpr(insn.rb() as usize) as i32 as i64);
            state.set_gpr(insn.rd() as usize, result as u64);
            if insn.rc() {
                state.update_cr0(result as u64);
            }
        }
        // add
        266 => {
            let result = state
                .gpr(insn.ra() as usize)
                .wrapping_add(state.gpr(insn.rb() as usize));
            state.set_gpr(insn.rd() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // xor
        316 => {
            let result = state.gpr(insn.rs() as usize) ^ state.gpr(insn.rb() as usize);
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // mfspr
        339 => {
            let value = match insn.spr() {
                1 => state.xer,
                8 => state.lr,
                9 => state.ctr,
                _ => return Err(unsupported(insn, pc)),
            };
            state.set_gpr(insn.rd() as usize, value);
        }
        // or
        444 => {
            let result = state.gpr(insn.rs() as usize) | state.gpr(insn.rb() as usize);
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // divwu
        459 => {
            let a = state.gpr(insn.ra() as usize) as u32;
            let b = state.gpr(insn.rb() as usize) as u32;
            let result = if b == 0 { 0 } else { (a / b) as u64 };
            state.set_gpr(insn.rd() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // mtspr
        467 => {
            let value = state.gpr(insn.rs() as usize);
            match insn.spr() {
                1 => state.xer = value,
                8 => state.lr = value,
                9 => state.ctr = value,
                _ => return Err(unsupported(insn, pc)),
            }
        }
        // divw
        491 => {
            let a = state.gpr(insn.ra() as usize) as i32;
            let b = state.gpr(insn.rb() as usize) as i32;
            let result = if b == 0 || (a == i32::MIN && b == -1) {
                0
            } else {
                (a / b) as u32 as u64
            };
            state.set_gpr(insn.rd() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // srw
        536 => {
            let amount = state.gpr(insn.rb() as usize) & 0x3F;
            let result = if amount > 31 {
                0
            } else {
                ((state.gpr(insn.rs() as usize) as u32) >> amount) as u64
            };
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // sync / eieio
        598 | 854 => {}
        // srawi
        824 => {
            let src = state.gpr(insn.rs() as usize) as i32;
            let sh = insn.sh() as u32;
            let result = (src >> sh) as i64 as u64;
            state.set_gpr(insn.ra() as usize, result);
            state.set_xer_ca(src < 0 && (src as u32) << (32 - sh.max(1)) != 0 && sh != 0);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // extsh
        922 => {
            let result = state.gpr(insn.rs() as usize) as i16 as i64 as u64;
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // extsb
        954 => {
            let result = state.gpr(insn.rs() as usize) as i8 as i64 as u64;
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        // extsw
        986 => {
            let result = state.gpr(insn.rs() as usize) as i32 as i64 as u64;
            state.set_gpr(insn.ra() as usize, result);
            if insn.rc() {
                state.update_cr0(result);
            }
        }
        _ => return Err(unsupported(insn, pc)),
    }
    Ok(())
}

fn unsupported(insn: Instruction, pc: u32) -> CpuError {
    CpuError::UnsupportedInstruction {
        addr: pc,
        opcode: insn.0,
    }
}

fn ea_d(state: &PpuState, insn: Instruction) -> u32 {
    let base = if insn.ra() == 0 {
        0
    } else {
        state.gpr(insn.ra() as usize)
    };
    base.wrapping_add(insn.simm() as i64 as u64) as u32
}

fn ea_ds(state: &PpuState, insn: Instruction) -> u32 {
    let base = if insn.ra() == 0 {
        0
    } else {
        state.gpr(insn.ra() as usize)
    };
    base.wrapping_add(insn.ds() as i64 as u64) as u32
}

fn ea_x(state: &PpuState, insn: Instruction) -> u32 {
    let base = if insn.ra() == 0 {
        0
    } else {
        state.gpr(insn.ra() as usize)
    };
    base.wrapping_add(state.gpr(insn.rb() as usize)) as u32
}

/// Expand an 8-bit CRM field into a 32-bit mask
fn crm_mask(crm: u8) -> u32 {
    let mut mask = 0;
    for field in 0..8 {
        if crm & (0x80 >> field) != 0 {
            mask |= 0xF << (28 - field * 4);
        }
    }
    mask
}

fn mask32(mb: u8, me: u8) -> u32 {
    let head = u32::MAX >> mb;
    let tail = u32::MAX << (31 - me);
    if mb <= me {
        head & tail
    } else {
        head | tail
    }
}

/// Condition-bit half of the BO test
fn cond_ok(state: &PpuState, insn: Instruction) -> bool {
    let bo = insn.bo();
    bo & 0x10 != 0 || state.cr_bit(insn.bi() as usize) == (bo & 0x08 != 0)
}

/// Full BO semantics: condition test plus optional CTR decrement
fn branch_taken(state: &mut PpuState, insn: Instruction) -> bool {
    let bo = insn.bo();
    let ctr_ok = if bo & 0x04 != 0 {
        true
    } else {
        state.ctr = state.ctr.wrapping_sub(1);
        (state.ctr == 0) == (bo & 0x02 != 0)
    };
    ctr_ok && cond_ok(state, insn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ic_memory::constants::MAIN_MEM_BASE;

    fn setup(words: &[u32]) -> (PpuState, std::sync::Arc<MemoryManager>) {
        let mem = MemoryManager::new().unwrap();
        for (i, word) in words.iter().enumerate() {
            mem.write_be32(MAIN_MEM_BASE + i as u32 * 4, *word).unwrap();
        }
        let mut state = PpuState::default();
        state.cia = MAIN_MEM_BASE as u64;
        (state, mem)
    }

    #[test]
    fn test_addi_chain() {
        // addi r3, r0, 5 ; addi r3, r3, 7
        let (mut state, mem) = setup(&[0x38600005, 0x38630007]);
        step(&mut state, &mem).unwrap();
        step(&mut state, &mem).unwrap();
        assert_eq!(state.gpr(3), 12);
        assert_eq!(state.cia, (MAIN_MEM_BASE + 8) as u64);
    }

    #[test]
    fn test_syscall_event() {
        let (mut state, mem) = setup(&[0x44000002]);
        let event = step(&mut state, &mem).unwrap();
        assert_eq!(event, StepEvent::Syscall);
        assert_eq!(state.cia, (MAIN_MEM_BASE + 4) as u64);
    }

    #[test]
    fn test_ctr_loop() {
        // mtctr via state, then bdnz back to itself until CTR hits zero
        // 0x00: addi r3, r3, 1
        // 0x04: bdnz -4 (bo=16)
        let (mut state, mem) = setup(&[0x38630001, 0x4200FFFC]);
        state.ctr = 3;
        for _ in 0..6 {
            step(&mut state, &mem).unwrap();
        }
        // Three iterations of the body, then the loop falls through
        assert_eq!(state.ctr, 0);
        assert_eq!(state.gpr(3), 3);
        assert_eq!(state.cia, (MAIN_MEM_BASE + 8) as u64);
    }

    #[test]
    fn test_load_store_roundtrip() {
        // addis r4, r0, 0x2000 ; stw r3, 8(r4) ; lwz r5, 8(r4)
        let (mut state, mem) = setup(&[0x3C802000, 0x90640008, 0x80A40008]);
        state.set_gpr(3, 0xDEADBEEF);
        for _ in 0..3 {
            step(&mut state, &mem).unwrap();
        }
        assert_eq!(state.gpr(5), 0xDEADBEEF);
        // The guest sees big-endian bytes
        let mut bytes = [0u8; 4];
        mem.read_bytes(0x2000_0008, &mut bytes).unwrap();
        assert_eq!(bytes, [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_blr_returns() {
        let (mut state, mem) = setup(&[0x4E800020]);
        state.lr = 0x12340;
        step(&mut state, &mem).unwrap();
        assert_eq!(state.cia, 0x12340);
    }

    #[test]
    fn test_cmpwi_sets_cr() {
        // cmpwi cr0, r3, 10
        let (mut state, mem) = setup(&[0x2C03000A]);
        state.set_gpr(3, 3);
        step(&mut state, &mem).unwrap();
        assert!(state.cr_bit(0)); // LT
        assert!(!state.cr_bit(2)); // not EQ
    }

    #[test]
    fn test_unsupported_reports_address() {
        // lfd f1, 0(r3)
        let (mut state, mem) = setup(&[0xC8230000]);
        let err = step(&mut state, &mem).unwrap_err();
        assert!(matches!(
            err,
            CpuError::UnsupportedInstruction { addr, .. } if addr == MAIN_MEM_BASE
        ));
    }
}
