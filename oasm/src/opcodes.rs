//! Mnemonic dispatch and macro-instruction expansion.
//!
//! Primitive mnemonics encode to a single instruction word. The rest are
//! macro-instructions whose exact expansions are part of the toolchain
//! ABI: signed division, shifts, pushes and pops, wide immediates, and
//! the jump family. Expansions clobber the scratch registers `ra` and
//! `rb`, which is why their source operands must be non-scratch.

use matches::debug_assert_matches;
use pest::iterators::Pair;

use ohex::{Mark, ObjectWriter, SymbolFlags};
use ovm::Opcode;

use crate::operands::*;
use crate::parser::Rule;
use crate::{new_parser_error, Result};

const ADD: u8 = Opcode::ADD as u8;
const SUB: u8 = Opcode::SUB as u8;
const MUL: u8 = Opcode::MUL as u8;
const DIVU: u8 = Opcode::DIVU as u8;
const AND: u8 = Opcode::AND as u8;
const OR: u8 = Opcode::OR as u8;
const XOR: u8 = Opcode::XOR as u8;
const ROR: u8 = Opcode::ROR as u8;
const LDW: u8 = Opcode::LDW as u8;
const STW: u8 = Opcode::STW as u8;
const IMS: u8 = Opcode::IMS as u8;
const CMPU: u8 = Opcode::CMPU as u8;
const JZ: u8 = Opcode::JZ as u8;
const SYS: u8 = Opcode::SYS as u8;

/// Emits `imw reg ^label` as two `ims` halves, high then low.
fn emit_imw_absolute(out: &mut ObjectWriter, reg: u8, flags: &SymbolFlags, name: &str) {
    out.emit_hex_bytes(&[IMS, reg]);
    out.emit_label(Mark::High, flags, name);
    out.emit_hex_bytes(&[IMS, reg]);
    out.emit_label(Mark::Low, flags, name);
}

/// Emits the 16-bit destination slot of a relative jump.
fn emit_jump_offset(
    out: &mut ObjectWriter,
    target: &JumpTarget,
    span: &pest::Span,
) -> Result<()> {
    match target {
        JumpTarget::Label(label) if label.mark == Mark::Relative => {
            out.emit_label(Mark::Relative, &label.flags, &label.name);
        }
        JumpTarget::Offset(offset) => out.emit_hex_short(*offset as u16),
        JumpTarget::Bytes(first, second) => out.emit_hex_bytes(&[*first, *second]),
        JumpTarget::Label(_) => {
            return Err(new_parser_error(
                span.clone(),
                "Expected jump destination: relative label, number or two quoted bytes."
                    .to_owned(),
            ))
        }
    }
    Ok(())
}

fn absolute_label(target: &JumpTarget) -> Option<&LabelRef> {
    match target {
        JumpTarget::Label(label) if label.mark == Mark::Absolute => Some(label),
        _ => None,
    }
}

/// `jz`/`je` (`jump` is "jz 0"): jump when the predicate is zero.
fn opcode_jz_je(
    out: &mut ObjectWriter,
    pred: u8,
    target: &JumpTarget,
    span: &pest::Span,
) -> Result<()> {
    if let Some(label) = absolute_label(target) {
        if pred == RA {
            return Err(new_parser_error(
                span.clone(),
                "Cannot perform absolute conditional jump using register ra.".to_owned(),
            ));
        }
        emit_imw_absolute(out, RA, &label.flags, &label.name);
        out.emit_hex_bytes(&[
            JZ, pred, 0x01, 0x00, // jz pred +1
            JZ, 0x00, 0x01, 0x00, // jz 0 +1
            ADD, RIP, RPP, RA, // add rip rpp ra
        ]);
        return Ok(());
    }

    out.emit_hex_bytes(&[JZ, pred]);
    emit_jump_offset(out, target, span)
}

/// `jnz`/`jne`: jump when the predicate is nonzero.
fn opcode_jnz_jne(
    out: &mut ObjectWriter,
    pred: u8,
    target: &JumpTarget,
    span: &pest::Span,
) -> Result<()> {
    if let Some(label) = absolute_label(target) {
        if pred == RA {
            return Err(new_parser_error(
                span.clone(),
                "Cannot perform absolute conditional jump using register ra.".to_owned(),
            ));
        }
        emit_imw_absolute(out, RA, &label.flags, &label.name);
        out.emit_hex_bytes(&[
            JZ, pred, 0x01, 0x00, // jz pred +1
            ADD, RIP, RPP, RA, // add rip rpp ra
        ]);
        return Ok(());
    }

    out.emit_hex_bytes(&[
        JZ, pred, 0x01, 0x00, // jz pred +1
        JZ, 0x00, // jz 0 dest
    ]);
    emit_jump_offset(out, target, span)
}

/// `jg`/`jl`: jump when the comparison result matches `value`.
fn opcode_jg_jl(
    out: &mut ObjectWriter,
    reg: u8,
    value: u8,
    target: &JumpTarget,
    span: &pest::Span,
) -> Result<()> {
    if let Some(label) = absolute_label(target) {
        emit_imw_absolute(out, RA, &label.flags, &label.name);
        out.emit_hex_bytes(&[
            CMPU, RB, reg, value, // cmpu rb reg value
            JZ, RB, 0x01, 0x00, // jz rb +1
            JZ, 0x00, 0x01, 0x00, // jz 0 +1
            ADD, RIP, RPP, RA, // add rip rpp ra
        ]);
        return Ok(());
    }

    out.emit_hex_bytes(&[
        CMPU, RB, reg, value, // cmpu rb reg value
        JZ, RB, // jz rb dest
    ]);
    emit_jump_offset(out, target, span)
}

/// `jge`/`jle`: jump unless the comparison result matches `value`.
fn opcode_jge_jle(
    out: &mut ObjectWriter,
    reg: u8,
    value: u8,
    target: &JumpTarget,
    span: &pest::Span,
) -> Result<()> {
    if let Some(label) = absolute_label(target) {
        emit_imw_absolute(out, RA, &label.flags, &label.name);
        out.emit_hex_bytes(&[
            CMPU, RB, reg, value, // cmpu rb reg value
            JZ, RB, 0x01, 0x00, // jz rb +1
            ADD, RIP, RPP, RA, // add rip rpp ra
        ]);
        return Ok(());
    }

    out.emit_hex_bytes(&[
        CMPU, RB, reg, value, // cmpu rb reg value
        JZ, RB, 0x01, 0x00, // jz rb +1
        JZ, 0x00, // jz 0 dest
    ]);
    emit_jump_offset(out, target, span)
}

fn opcode_divs(out: &mut ObjectWriter, dest: u8, src1: u8, src2: u8) {
    // Signed division: divide the magnitudes unsigned, then negate the
    // quotient if exactly one operand was negative. There are not enough
    // scratch registers for the temporaries, so the signs spill to the
    // stack.
    out.emit_hex_bytes(&[
        // make stack space
        SUB, RSP, RSP, 8,
        // collect sign of src1 in ra, store it on the stack
        ROR, RA, src1, 31,
        AND, RA, RA, 1,
        STW, RA, RSP, 0,
        // place absolute value of src1 in ra
        JZ, RA, 2, 0,
        SUB, RA, 0, src1,
        JZ, 0, 1, 0,
        ADD, RA, src1, 0,
        // collect sign of src2 in rb, store it on the stack
        ROR, RB, src2, 31,
        AND, RB, RB, 1,
        STW, RB, RSP, 4,
        // place absolute value of src2 in rb
        JZ, RB, 2, 0,
        SUB, RB, 0, src2,
        JZ, 0, 1, 0,
        ADD, RB, src2, 0,
        // unsigned division; dest is writable now that the sources are read
        DIVU, dest, RA, RB,
        // pop and xor the signs
        LDW, RA, RSP, 0,
        LDW, RB, RSP, 4,
        ADD, RSP, RSP, 8,
        ADD, RA, RA, RB,
        AND, RA, RA, 1,
        // flip the sign of dest if exactly one source was negative
        JZ, RA, 1, 0,
        SUB, dest, 0, dest,
    ]);
}

fn opcode_mods(out: &mut ObjectWriter, dest: u8, src1: u8, src2: u8) {
    // Truncated modulo: unsigned modulo of the magnitudes, with the
    // dividend's sign applied to the remainder.
    out.emit_hex_bytes(&[
        // make stack space
        SUB, RSP, RSP, 4,
        // store sign of src1 on the stack
        ROR, RA, src1, 31,
        AND, RA, RA, 1,
        STW, RA, RSP, 0,
        // place absolute value of src1 in ra
        JZ, RA, 2, 0,
        SUB, RA, 0, src1,
        JZ, 0, 1, 0,
        ADD, RA, src1, 0,
        // place absolute value of src2 in rb
        ROR, RB, src2, 31,
        AND, RB, RB, 1,
        JZ, RB, 2, 0,
        SUB, RB, 0, src2,
        JZ, 0, 1, 0,
        ADD, RB, src2, 0,
        // unsigned modulus
        DIVU, dest, RA, RB,
        MUL, RB, dest, RB,
        SUB, dest, RA, RB,
        // pop, and flip the sign of dest if src1 was negative
        LDW, RA, RSP, 0,
        ADD, RSP, RSP, 4,
        JZ, RA, 1, 0,
        SUB, dest, 0, dest,
    ]);
}

fn opcode_shrs(out: &mut ObjectWriter, dest: u8, src: u8, bits: u8) {
    out.emit_hex_bytes(&[
        // generate a mask
        ROR, RB, 0x01, bits,
        SUB, RB, RB, 0x01,
        // test the sign bit
        ROR, RA, 0x01, 0x01, // ra = 0x80000000
        AND, RA, RA, src,
        JZ, RA, 0x04, 0x00, // jz ra +4
        // negative: shift and apply the inverted mask
        ROR, RA, src, bits,
        SUB, RB, 0xFF, RB, // not rb
        OR, dest, RA, RB,
        JZ, 0x00, 0x02, 0x00, // jz 0 +2
        // non-negative: shift and apply the mask
        ROR, RA, src, bits,
        AND, dest, RA, RB,
    ]);
}

pub fn process_instruction(pair: Pair<Rule>, out: &mut ObjectWriter) -> Result<()> {
    debug_assert_matches!(pair.as_rule(), Rule::instruction);
    let span = pair.as_span();
    let inner = pair.into_inner().next().unwrap();
    let rule = inner.as_rule();
    let mut pairs = inner.into_inner();
    let op = pairs.next().unwrap().as_str().to_owned();

    match rule {
        Rule::ins_rmm => {
            let opcode = op.to_uppercase().parse::<Opcode>().unwrap() as u8;
            let dest = process_register(pairs.next().unwrap())?;
            let src1 = process_mix(pairs.next().unwrap())?;
            let src2 = process_mix(pairs.next().unwrap())?;
            out.emit_hex_bytes(&[opcode, dest, src1, src2]);
        }
        Rule::ins_mmm => {
            let opcode = op.to_uppercase().parse::<Opcode>().unwrap() as u8;
            let value = process_mix(pairs.next().unwrap())?;
            let base = process_mix(pairs.next().unwrap())?;
            let offset = process_mix(pairs.next().unwrap())?;
            out.emit_hex_bytes(&[opcode, value, base, offset]);
        }
        Rule::ins_divs => {
            let dest = process_register_numbered(pairs.next().unwrap())?;
            let src1 = process_mix_non_scratch(pairs.next().unwrap())?;
            let src2 = process_mix_non_scratch(pairs.next().unwrap())?;
            if op == "divs" {
                opcode_divs(out, dest, src1, src2);
            } else {
                opcode_mods(out, dest, src1, src2);
            }
        }
        Rule::ins_modu => {
            let dest = process_register_non_scratch(pairs.next().unwrap())?;
            let src1 = process_mix_non_scratch(pairs.next().unwrap())?;
            let src2 = process_mix_non_scratch(pairs.next().unwrap())?;
            out.emit_hex_bytes(&[
                // divide, multiply back, subtract; the difference is the
                // remainder
                DIVU, RA, src1, src2,
                MUL, RB, RA, src2,
                SUB, dest, src1, RB,
            ]);
        }
        Rule::ins_reg => {
            let reg = process_register(pairs.next().unwrap())?;
            match op.as_str() {
                "zero" => out.emit_hex_bytes(&[ADD, reg, 0x00, 0x00]),
                "inc" => out.emit_hex_bytes(&[ADD, reg, reg, 0x01]),
                "dec" => out.emit_hex_bytes(&[SUB, reg, reg, 0x01]),
                "pop" => out.emit_hex_bytes(&[
                    LDW, reg, RSP, 0x00, // ldw reg rsp 0
                    ADD, RSP, RSP, 0x04, // add rsp rsp 4
                ]),
                _ => unreachable!(),
            }
        }
        Rule::ins_reg_mix => {
            let dest = process_register(pairs.next().unwrap())?;
            let src = process_mix(pairs.next().unwrap())?;
            match op.as_str() {
                "mov" => out.emit_hex_bytes(&[ADD, dest, 0x00, src]),
                "not" => out.emit_hex_bytes(&[SUB, dest, 0xFF, src]),
                _ => unreachable!(),
            }
        }
        Rule::ins_shift => {
            let dest = process_register(pairs.next().unwrap())?;
            let src = process_mix_non_scratch(pairs.next().unwrap())?;
            let bits = process_mix_non_scratch(pairs.next().unwrap())?;
            match op.as_str() {
                "rol" => out.emit_hex_bytes(&[
                    // ror by the complement; ror only cares about bits mod 32
                    SUB, RA, 0x20, bits,
                    ROR, dest, src, RA,
                ]),
                "shru" => out.emit_hex_bytes(&[
                    // generate a mask
                    ROR, RB, 0x01, bits,
                    SUB, RB, RB, 0x01,
                    // do the shift
                    ROR, RA, src, bits,
                    // apply the mask
                    AND, dest, RA, RB,
                ]),
                "shl" => out.emit_hex_bytes(&[
                    // flip the bits (shifting left, not right)
                    SUB, RA, 0x20, bits,
                    // generate a mask
                    ROR, RB, 0x01, RA,
                    SUB, RB, RB, 0x01,
                    XOR, RB, RB, 0xFF, // not rb
                    // do the shift
                    ROR, RA, src, RA,
                    // apply the mask
                    AND, dest, RA, RB,
                ]),
                "shrs" => opcode_shrs(out, dest, src, bits),
                _ => unreachable!(),
            }
        }
        Rule::ins_push => {
            let value = process_mix(pairs.next().unwrap())?;
            out.emit_hex_bytes(&[
                SUB, RSP, RSP, 0x04, // sub rsp rsp 4
                STW, value, RSP, 0x00, // stw value rsp 0
            ]);
        }
        Rule::ins_bare => match op.as_str() {
            "popd" => out.emit_hex_bytes(&[ADD, RSP, RSP, 0x04]),
            "ret" => out.emit_hex_bytes(&[LDW, RIP, 0x00, RSP]),
            "enter" => out.emit_hex_bytes(&[
                SUB, RSP, RSP, 0x04, // push rfp
                STW, RFP, 0x00, RSP,
                ADD, RFP, RSP, 0x00, // mov rfp rsp
            ]),
            "leave" => out.emit_hex_bytes(&[
                ADD, RSP, RFP, 0x00, // mov rsp rfp
                LDW, RFP, 0x00, RSP, // pop rfp
                ADD, RSP, RSP, 0x04,
            ]),
            _ => unreachable!(),
        },
        Rule::ins_ims => {
            let reg = process_register(pairs.next().unwrap())?;
            out.emit_hex_bytes(&[IMS, reg]);
            let value = pairs.next().unwrap();
            let value_span = value.as_span();
            let inner = value.into_inner().next().unwrap();
            match inner.as_rule() {
                Rule::label => {
                    let label = process_label(inner)?;
                    match label.mark {
                        Mark::High | Mark::Low | Mark::Relative => {
                            out.emit_label(label.mark, &label.flags, &label.name)
                        }
                        _ => {
                            return Err(new_parser_error(
                                value_span,
                                "Expected ims value: short invocation, number, or two \
                                 quoted bytes or single-character strings."
                                    .to_owned(),
                            ))
                        }
                    }
                }
                Rule::number => {
                    let short = process_short(inner)?;
                    out.emit_hex_short(short as u16);
                }
                Rule::byte_pair => {
                    let mut bytes = inner.into_inner();
                    let first = process_byte_or_char(bytes.next().unwrap())?;
                    let second = process_byte_or_char(bytes.next().unwrap())?;
                    out.emit_hex_bytes(&[first, second]);
                }
                _ => unreachable!(),
            }
        }
        Rule::ins_imw => {
            let reg_pair = pairs.next().unwrap();
            let reg = process_register(reg_pair)?;
            if reg == RIP {
                // The two-stage load cannot target the instruction
                // pointer; the first half would be executed as a jump.
                return Err(new_parser_error(
                    span,
                    "Register for imw cannot be rip.".to_owned(),
                ));
            }
            let value = pairs.next().unwrap();
            let value_span = value.as_span();
            let inner = value.into_inner().next().unwrap();
            match inner.as_rule() {
                Rule::number => {
                    let value = process_number(inner)? as u32;
                    out.emit_hex_bytes(&[
                        IMS, reg, (value >> 16) as u8, (value >> 24) as u8,
                        IMS, reg, value as u8, (value >> 8) as u8,
                    ]);
                }
                Rule::label => {
                    let label = process_label(inner)?;
                    match label.mark {
                        Mark::Absolute => {
                            emit_imw_absolute(out, reg, &label.flags, &label.name)
                        }
                        Mark::Relative => {
                            out.emit_hex_bytes(&[ADD, reg, 0x00, 0x00]);
                            out.emit_hex_bytes(&[IMS, reg]);
                            out.emit_label(Mark::Relative, &label.flags, &label.name);
                        }
                        _ => {
                            return Err(new_parser_error(
                                value_span,
                                "Expected imw value: number, absolute or relative label, \
                                 or four quoted bytes or single-character strings."
                                    .to_owned(),
                            ))
                        }
                    }
                }
                Rule::byte_quad => {
                    let mut bytes = inner.into_inner();
                    let a = process_byte_or_char(bytes.next().unwrap())?;
                    let b = process_byte_or_char(bytes.next().unwrap())?;
                    let c = process_byte_or_char(bytes.next().unwrap())?;
                    let d = process_byte_or_char(bytes.next().unwrap())?;
                    // little-endian: the high half is loaded first
                    out.emit_hex_bytes(&[IMS, reg, c, d, IMS, reg, a, b]);
                }
                _ => unreachable!(),
            }
        }
        Rule::ins_cmps => {
            let dest = process_register(pairs.next().unwrap())?;
            let src1 = process_mix_non_scratch(pairs.next().unwrap())?;
            let src2 = process_mix_non_scratch(pairs.next().unwrap())?;
            out.emit_hex_bytes(&[
                // bias both operands by 0x80000000 to reduce signed
                // comparison to unsigned
                ROR, RB, 0x01, 0x01, // rb = 0x80000000
                ADD, RA, src1, RB,
                ADD, RB, src2, RB,
                CMPU, dest, RA, RB,
            ]);
        }
        Rule::ins_sys => {
            let number = process_syscall_number(pairs.next().unwrap())?;
            let pad1 = quoted_byte_value(pairs.next().unwrap());
            let pad2 = quoted_byte_value(pairs.next().unwrap());
            if pad1 != 0 || pad2 != 0 {
                return Err(new_parser_error(
                    span,
                    "Expected sys instruction to end in two quoted zero bytes.".to_owned(),
                ));
            }
            out.emit_hex_bytes(&[SYS, number, 0x00, 0x00]);
        }
        Rule::ins_jz => {
            let pred = process_mix(pairs.next().unwrap())?;
            let target = process_jump_target(pairs.next().unwrap())?;
            if op == "jz" {
                opcode_jz_je(out, pred, &target, &span)?;
            } else {
                opcode_jnz_jne(out, pred, &target, &span)?;
            }
        }
        Rule::ins_je => {
            // like jz/jnz, but the predicate must be a register
            let pred = process_register(pairs.next().unwrap())?;
            let target = process_jump_target(pairs.next().unwrap())?;
            if op == "je" {
                opcode_jz_je(out, pred, &target, &span)?;
            } else {
                opcode_jnz_jne(out, pred, &target, &span)?;
            }
        }
        Rule::ins_jcmp => {
            let reg = process_register_non_scratch(pairs.next().unwrap())?;
            let target = process_jump_target(pairs.next().unwrap())?;
            match op.as_str() {
                "jg" => opcode_jg_jl(out, reg, 0x01, &target, &span)?,
                "jl" => opcode_jg_jl(out, reg, 0xFF, &target, &span)?,
                // the value is what we *don't* jump on
                "jge" => opcode_jge_jle(out, reg, 0xFF, &target, &span)?,
                "jle" => opcode_jge_jle(out, reg, 0x01, &target, &span)?,
                _ => unreachable!(),
            }
        }
        Rule::ins_jmp => {
            let target = process_jump_target(pairs.next().unwrap())?;
            if let Some(label) = absolute_label(&target) {
                emit_imw_absolute(out, RA, &label.flags, &label.name);
                out.emit_hex_bytes(&[ADD, RIP, RPP, RA]);
            } else {
                out.emit_hex_bytes(&[JZ, 0x00]);
                emit_jump_offset(out, &target, &span)?;
            }
        }
        Rule::ins_call => {
            let target = process_jump_target(pairs.next().unwrap())?;
            if let Some(label) = absolute_label(&target) {
                emit_imw_absolute(out, RA, &label.flags, &label.name);
                out.emit_hex_bytes(&[
                    SUB, RSP, RSP, 0x04, // push the return address
                    ADD, RB, RIP, 0x08,
                    STW, RB, 0x00, RSP,
                    ADD, RIP, RPP, RA, // jump
                    ADD, RSP, RSP, 0x04, // pop the return address
                ]);
            } else {
                out.emit_hex_bytes(&[
                    SUB, RSP, RSP, 0x04, // push the return address
                    ADD, RB, RIP, 0x08,
                    STW, RB, 0x00, RSP,
                    JZ, 0x00, // jump
                ]);
                emit_jump_offset(out, &target, &span)?;
                out.emit_hex_bytes(&[
                    ADD, RSP, RSP, 0x04, // pop the return address
                ]);
            }
        }
        _ => unreachable!(),
    }
    Ok(())
}
