//! PPU to IR lifting
//!
//! Lifts analyzed blocks into the architecture-neutral IR. The lifter
//! covers the integer, load/store and branch subset the recompiler
//! handles; anything else is reported as unsupported so the caller can
//! fall back to the interpreter.

use ic_memory::MemoryManager;
use thiserror::Error;

use crate::hir::{BlockBuilder, CmpCond, ExitTarget, HirBlock, HirFunction, Reg, Terminator, Type, ValueId};

use super::analyzer::{Block, Function};
use super::instruction::Instruction;

/// Why a function could not be lifted
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("unsupported instruction 0x{opcode:08x} at 0x{addr:08x}")]
    Unsupported { addr: u32, opcode: u32 },

    #[error("code fetch failed at 0x{addr:08x}")]
    Fetch { addr: u32 },
}

/// Lift a discovered function into the IR
pub fn translate(func: &Function, memory: &MemoryManager) -> Result<HirFunction, TranslateError> {
    let mut next_value = 0u32;
    let mut blocks = Vec::with_capacity(func.blocks.len());

    for block in func.blocks.values() {
        blocks.push(translate_block(block, memory, &mut next_value)?);
    }

    Ok(HirFunction {
        entry: func.entry,
        blocks,
    })
}

fn translate_block(
    block: &Block,
    memory: &MemoryManager,
    next_value: &mut u32,
) -> Result<HirBlock, TranslateError> {
    let mut b = BlockBuilder::new(next_value);
    let count = block.size / 4;

    for i in 0..count {
        let pc = block.address + i * 4;
        let word = memory
            .read_be32(pc)
            .map_err(|_| TranslateError::Fetch { addr: pc })?;
        let insn = Instruction(word);

        if i + 1 == count {
            let term = lift_terminator(&mut b, insn, pc, block)?;
            return Ok(b.finish(block.address, term));
        }
        lift_body(&mut b, insn, pc)?;
    }

    // Analyzer never produces empty blocks
    Err(TranslateError::Fetch { addr: block.address })
}

fn unsupported(insn: Instruction, pc: u32) -> TranslateError {
    TranslateError::Unsupported {
        addr: pc,
        opcode: insn.0,
    }
}

/// Effective address for D-form memory accesses
fn ea_d(b: &mut BlockBuilder, insn: Instruction, displacement: i64) -> ValueId {
    let disp = b.constant(displacement as u64);
    if insn.ra() == 0 {
        disp
    } else {
        let base = b.read_reg(Reg::Gpr(insn.ra()));
        b.add(base, disp)
    }
}

/// Effective address for X-form (indexed) memory accesses
fn ea_x(b: &mut BlockBuilder, insn: Instruction) -> ValueId {
    let index = b.read_reg(Reg::Gpr(insn.rb()));
    if insn.ra() == 0 {
        index
    } else {
        let base = b.read_reg(Reg::Gpr(insn.ra()));
        b.add(base, index)
    }
}

/// Write LT/GT/EQ plus XER[SO] into a CR field
fn emit_cr_update(b: &mut BlockBuilder, field: u8, lt: ValueId, gt: ValueId, eq: ValueId) {
    let c1 = b.constant(1);
    let c2 = b.constant(2);
    let c3 = b.constant(3);

    let xer = b.read_reg(Reg::Xer);
    let c31 = b.constant(31);
    let so_shifted = b.shr(xer, c31);
    let so = b.and(so_shifted, c1);

    let lt_bits = b.shl(lt, c3);
    let gt_bits = b.shl(gt, c2);
    let eq_bits = b.shl(eq, c1);
    let hi = b.or(lt_bits, gt_bits);
    let lo = b.or(eq_bits, so);
    let nibble = b.or(hi, lo);

    let shift = 28 - 4 * field as u64;
    let cr = b.read_reg(Reg::Cr);
    let keep = b.constant(!(0xFu64 << shift) & 0xFFFF_FFFF);
    let cleared = b.and(cr, keep);
    let cshift = b.constant(shift);
    let placed = b.shl(nibble, cshift);
    let merged = b.or(cleared, placed);
    b.write_reg(Reg::Cr, merged);
}

/// CR0 record update for Rc=1 instructions
fn emit_cr0(b: &mut BlockBuilder, result: ValueId) {
    let zero = b.constant(0);
    let lt = b.icmp(CmpCond::Slt, result, zero);
    let gt = b.icmp(CmpCond::Sgt, result, zero);
    let eq = b.icmp(CmpCond::Eq, result, zero);
    emit_cr_update(b, 0, lt, gt, eq);
}

/// Mask from mb..=me (IBM bit numbering within 32 bits), wrapping
fn rotate_mask32(mb: u8, me: u8) -> u32 {
    let head = u32::MAX >> mb;
    let tail = u32::MAX << (31 - me);
    if mb <= me {
        head & tail
    } else {
        head | tail
    }
}

fn lift_body(b: &mut BlockBuilder, insn: Instruction, pc: u32) -> Result<(), TranslateError> {
    match insn.opcode() {
        // mulli
        7 => {
            let a = b.read_reg(Reg::Gpr(insn.ra()));
            let imm = b.constant(insn.simm() as i64 as u64);
            let result = b.mul(a, imm);
            b.write_reg(Reg::Gpr(insn.rd()), result);
        }
        // cmpli / cmpi
        10 | 11 => {
            let signed = insn.opcode() == 11;
            let imm = if signed {
                b.constant(insn.simm() as i64 as u64)
            } else {
                b.constant(insn.uimm() as u64)
            };
            let mut a = b.read_reg(Reg::Gpr(insn.ra()));
            if !insn.l10() {
                if signed {
                    a = b.sext(Type::I32, a);
                } else {
                    let mask = b.constant(0xFFFF_FFFF);
                    a = b.and(a, mask);
                }
            }
            let (lt_cond, gt_cond) = if signed {
                (CmpCond::Slt, CmpCond::Sgt)
            } else {
                (CmpCond::Ult, CmpCond::Ugt)
            };
            let lt = b.icmp(lt_cond, a, imm);
            let gt = b.icmp(gt_cond, a, imm);
            let eq = b.icmp(CmpCond::Eq, a, imm);
            emit_cr_update(b, insn.crfd(), lt, gt, eq);
        }
        // addi / addis
        14 | 15 => {
            let imm = if insn.opcode() == 14 {
                insn.simm() as i64
            } else {
                (insn.simm() as i64) << 16
            };
            let imm = b.constant(imm as u64);
            let result = if insn.ra() == 0 {
                imm
            } else {
                let base = b.read_reg(Reg::Gpr(insn.ra()));
                b.add(base, imm)
            };
            b.write_reg(Reg::Gpr(insn.rd()), result);
        }
        // rlwinm
        21 => {
            let src = b.read_reg(Reg::Gpr(insn.rs()));
            let m32 = b.constant(0xFFFF_FFFF);
            let v32 = b.and(src, m32);
            let shl_amount = b.constant(insn.sh() as u64);
            let shr_amount = b.constant(32 - insn.sh() as u64);
            let left = b.shl(v32, shl_amount);
            let right = b.shr(v32, shr_amount);
            let rotated = b.or(left, right);
            let mask = b.constant(rotate_mask32(insn.mb(), insn.me()) as u64);
            let result = b.and(rotated, mask);
            b.write_reg(Reg::Gpr(insn.ra()), result);
            if insn.rc() {
                emit_cr0(b, result);
            }
        }
        // ori / oris / xori / xoris / andi. / andis.
        24..=29 => {
            let src = b.read_reg(Reg::Gpr(insn.rs()));
            let imm = match insn.opcode() {
                24 | 26 | 28 => insn.uimm() as u64,
                _ => (insn.uimm() as u64) << 16,
            };
            let imm = b.constant(imm);
            let result = match insn.opcode() {
                24 | 25 => b.or(src, imm),
                26 | 27 => b.xor(src, imm),
                _ => b.and(src, imm),
            };
            b.write_reg(Reg::Gpr(insn.ra()), result);
            if matches!(insn.opcode(), 28 | 29) {
                emit_cr0(b, result);
            }
        }
        31 => lift_op31(b, insn, pc)?,
        // lwz / lbz / stw / stb / lhz / lha / sth
        32 | 34 | 36 | 38 | 40 | 42 | 44 => {
            let ea = ea_d(b, insn, insn.simm() as i64);
            match insn.opcode() {
                32 => {
                    let value = b.load(Type::I32, ea);
                    b.write_reg(Reg::Gpr(insn.rd()), value);
                }
                34 => {
                    let value = b.load(Type::I8, ea);
                    b.write_reg(Reg::Gpr(insn.rd()), value);
                }
                36 => {
                    let value = b.read_reg(Reg::Gpr(insn.rs()));
                    b.store(Type::I32, ea, value);
                }
                38 => {
                    let value = b.read_reg(Reg::Gpr(insn.rs()));
                    b.store(Type::I8, ea, value);
                }
                40 => {
                    let value = b.load(Type::I16, ea);
                    b.write_reg(Reg::Gpr(insn.rd()), value);
                }
                42 => {
                    let value = b.load(Type::I16, ea);
                    let value = b.sext(Type::I16, value);
                    b.write_reg(Reg::Gpr(insn.rd()), value);
                }
                _ => {
                    let value = b.read_reg(Reg::Gpr(insn.rs()));
                    b.store(Type::I16, ea, value);
                }
            }
        }
        // ld
        58 if insn.0 & 3 == 0 => {
            let ea = ea_d(b, insn, insn.ds() as i64);
            let value = b.load(Type::I64, ea);
            b.write_reg(Reg::Gpr(insn.rd()), value);
        }
        // std
        62 if insn.0 & 3 == 0 => {
            let ea = ea_d(b, insn, insn.ds() as i64);
            let value = b.read_reg(Reg::Gpr(insn.rs()));
            b.store(Type::I64, ea, value);
        }
        _ => return Err(unsupported(insn, pc)),
    }
    Ok(())
}

fn lift_op31(b: &mut BlockBuilder, insn: Instruction, pc: u32) -> Result<(), TranslateError> {
    match insn.op31() {
        // cmp / cmpl
        0 | 32 => {
            let signed = insn.op31() == 0;
            let mut a = b.read_reg(Reg::Gpr(insn.ra()));
            let mut c = b.read_reg(Reg::Gpr(insn.rb()));
            if !insn.l10() {
                if signed {
                    a = b.sext(Type::I32, a);
                    c = b.sext(Type::I32, c);
                } else {
                    let mask = b.constant(0xFFFF_FFFF);
                    a = b.and(a, mask);
                    c = b.and(c, mask);
                }
            }
            let (lt_cond, gt_cond) = if signed {
                (CmpCond::Slt, CmpCond::Sgt)
            } else {
                (CmpCond::Ult, CmpCond::Ugt)
            };
            let lt = b.icmp(lt_cond, a, c);
            let gt = b.icmp(gt_cond, a, c);
            let eq = b.icmp(CmpCond::Eq, a, c);
            emit_cr_update(b, insn.crfd(), lt, gt, eq);
        }
        // mfcr
        19 => {
            let cr = b.read_reg(Reg::Cr);
            b.write_reg(Reg::Gpr(insn.rd()), cr);
        }
        // lwzx
        23 => {
            let ea = ea_x(b, insn);
            let value = b.load(Type::I32, ea);
            b.write_reg(Reg::Gpr(insn.rd()), value);
        }
        // slw / srw
        24 | 536 => {
            let src = b.read_reg(Reg::Gpr(insn.rs()));
            let m32 = b.constant(0xFFFF_FFFF);
            let v32 = b.and(src, m32);
            let amount_reg = b.read_reg(Reg::Gpr(insn.rb()));
            let m6 = b.constant(0x3F);
            let amount = b.and(amount_reg, m6);
            let shifted = if insn.op31() == 24 {
                b.shl(v32, amount)
            } else {
                b.shr(v32, amount)
            };
            let result = b.and(shifted, m32);
            b.write_reg(Reg::Gpr(insn.ra()), result);
            if insn.rc() {
                emit_cr0(b, result);
            }
        }
        // subf
        40 if !insn.oe() => {
            let a = b.read_reg(Reg::Gpr(insn.ra()));
            let c = b.read_reg(Reg::Gpr(insn.rb()));
            let result = b.sub(c, a);
            b.write_reg(Reg::Gpr(insn.rd()), result);
            if insn.rc() {
                emit_cr0(b, result);
            }
        }
        // and / or / xor / nor
        28 | 444 | 316 | 124 => {
            let a = b.read_reg(Reg::Gpr(insn.rs()));
            let c = b.read_reg(Reg::Gpr(insn.rb()));
            let result = match insn.op31() {
                28 => b.and(a, c),
                444 => b.or(a, c),
                316 => b.xor(a, c),
                _ => {
                    let ored = b.or(a, c);
                    let ones = b.constant(u64::MAX);
                    b.xor(ored, ones)
                }
            };
            b.write_reg(Reg::Gpr(insn.ra()), result);
            if insn.rc() {
                emit_cr0(b, result);
            }
        }
        // neg
        104 if !insn.oe() => {
            let a = b.read_reg(Reg::Gpr(insn.ra()));
            let zero = b.constant(0);
            let result = b.sub(zero, a);
            b.write_reg(Reg::Gpr(insn.rd()), result);
            if insn.rc() {
                emit_cr0(b, result);
            }
        }
        // stwx
        151 => {
            let ea = ea_x(b, insn);
            let value = b.read_reg(Reg::Gpr(insn.rs()));
            b.store(Type::I32, ea, value);
        }
        // mulld / mullw
        233 | 235 if !insn.oe() => {
            let mut a = b.read_reg(Reg::Gpr(insn.ra()));
            let mut c = b.read_reg(Reg::Gpr(insn.rb()));
            if insn.op31() == 235 {
                a = b.sext(Type::I32, a);
                c = b.sext(Type::I32, c);
            }
            let result = b.mul(a, c);
            b.write_reg(Reg::Gpr(insn.rd()), result);
            if insn.rc() {
                emit_cr0(b, result);
            }
        }
        // add
        266 if !insn.oe() => {
            let a = b.read_reg(Reg::Gpr(insn.ra()));
            let c = b.read_reg(Reg::Gpr(insn.rb()));
            let result = b.add(a, c);
            b.write_reg(Reg::Gpr(insn.rd()), result);
            if insn.rc() {
                emit_cr0(b, result);
            }
        }
        // mfspr
        339 => {
            let reg = spr_reg(insn).ok_or_else(|| unsupported(insn, pc))?;
            let value = b.read_reg(reg);
            b.write_reg(Reg::Gpr(insn.rd()), value);
        }
        // mtspr
        467 => {
            let reg = spr_reg(insn).ok_or_else(|| unsupported(insn, pc))?;
            let value = b.read_reg(Reg::Gpr(insn.rs()));
            b.write_reg(reg, value);
        }
        _ => return Err(unsupported(insn, pc)),
    }
    Ok(())
}

fn spr_reg(insn: Instruction) -> Option<Reg> {
    match insn.spr() {
        1 => Some(Reg::Xer),
        8 => Some(Reg::Lr),
        9 => Some(Reg::Ctr),
        _ => None,
    }
}

fn lift_terminator(
    b: &mut BlockBuilder,
    insn: Instruction,
    pc: u32,
    block: &Block,
) -> Result<Terminator, TranslateError> {
    let next = pc + 4;

    if insn.is_syscall() {
        return Ok(Terminator::Syscall { next });
    }

    match insn.opcode() {
        // b / bl
        18 => {
            let target = insn.get_target(pc);
            if insn.lk() {
                let ret = b.constant(next as u64);
                b.write_reg(Reg::Lr, ret);
                Ok(Terminator::Exit {
                    target: ExitTarget::Addr(target),
                })
            } else {
                Ok(Terminator::Jump { target })
            }
        }
        // bc
        16 => {
            if insn.lk() || insn.bo() & 0x04 == 0 {
                // Linking or CTR-decrementing forms go to the interpreter
                return Err(unsupported(insn, pc));
            }
            let target = insn.get_target(pc);
            if insn.bo() & 0x10 != 0 {
                return Ok(Terminator::Jump { target });
            }
            let cr = b.read_reg(Reg::Cr);
            let shift = b.constant(31 - insn.bi() as u64);
            let moved = b.shr(cr, shift);
            let one = b.constant(1);
            let bit = b.and(moved, one);
            let cond = if insn.bo() & 0x08 != 0 {
                bit
            } else {
                b.xor(bit, one)
            };
            Ok(Terminator::Branch {
                cond,
                taken: target,
                fallthrough: next,
            })
        }
        // bclr / bcctr
        19 if matches!(insn.op19(), 16 | 528) => {
            if insn.bo() & 0x14 != 0x14 {
                return Err(unsupported(insn, pc));
            }
            let source = if insn.op19() == 16 { Reg::Lr } else { Reg::Ctr };
            let raw = b.read_reg(source);
            let mask = b.constant(0xFFFF_FFFC);
            let target = b.and(raw, mask);
            if insn.lk() {
                let ret = b.constant(next as u64);
                b.write_reg(Reg::Lr, ret);
            }
            Ok(Terminator::Exit {
                target: ExitTarget::Value(target),
            })
        }
        // Block was cut short by a collision with an already discovered
        // block: lift the instruction and fall through.
        _ => {
            lift_body(b, insn, pc)?;
            let target = if block.branch_a != 0 { block.branch_a } else { next };
            Ok(Terminator::Jump { target })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppu::analyzer;
    use ic_memory::constants::MAIN_MEM_BASE;

    fn lift(words: &[u32]) -> HirFunction {
        let mem = MemoryManager::new().unwrap();
        for (i, word) in words.iter().enumerate() {
            mem.write_be32(MAIN_MEM_BASE + i as u32 * 4, *word).unwrap();
        }
        let func = analyzer::analyze(&mem, MAIN_MEM_BASE);
        translate(&func, &mem).unwrap()
    }

    #[test]
    fn test_lift_straight_line() {
        // addi r3, r0, 100 ; blr
        let hir = lift(&[0x38600064, 0x4E800020]);
        assert_eq!(hir.blocks.len(), 1);
        let block = &hir.blocks[0];
        assert!(matches!(
            block.terminator,
            Terminator::Exit {
                target: ExitTarget::Value(_)
            }
        ));
        // const + write + lr read/mask for the return
        assert!(block.insts.len() >= 3);
    }

    #[test]
    fn test_lift_syscall_terminator() {
        // sc ; blr
        let hir = lift(&[0x44000002, 0x4E800020]);
        let entry = hir
            .blocks
            .iter()
            .find(|b| b.address == MAIN_MEM_BASE)
            .unwrap();
        assert!(matches!(
            entry.terminator,
            Terminator::Syscall { next } if next == MAIN_MEM_BASE + 4
        ));
    }

    #[test]
    fn test_lift_conditional_branch() {
        // cmpwi r3, 0 ; beq +8 ; blr ; blr
        let hir = lift(&[0x2C030000, 0x41820008, 0x4E800020, 0x4E800020]);
        let entry = hir
            .blocks
            .iter()
            .find(|b| b.address == MAIN_MEM_BASE)
            .unwrap();
        match entry.terminator {
            Terminator::Branch { taken, fallthrough, .. } => {
                assert_eq!(taken, MAIN_MEM_BASE + 0x0C);
                assert_eq!(fallthrough, MAIN_MEM_BASE + 0x08);
            }
            ref other => panic!("expected branch terminator, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_instruction_reported() {
        let mem = MemoryManager::new().unwrap();
        // lfd f1, 0(r3) is outside the recompiled subset
        mem.write_be32(MAIN_MEM_BASE, 0xC8230000).unwrap();
        mem.write_be32(MAIN_MEM_BASE + 4, 0x4E800020).unwrap();
        let func = analyzer::analyze(&mem, MAIN_MEM_BASE);
        let err = translate(&func, &mem).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported { addr, .. } if addr == MAIN_MEM_BASE));
    }

    #[test]
    fn test_rotate_mask() {
        assert_eq!(rotate_mask32(0, 31), 0xFFFF_FFFF);
        assert_eq!(rotate_mask32(24, 31), 0x0000_00FF);
        assert_eq!(rotate_mask32(0, 7), 0xFF00_0000);
        // Wrapping mask
        assert_eq!(rotate_mask32(28, 3), 0xF000_000F);
    }
}
