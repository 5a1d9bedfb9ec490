//! Stable binary encoding of [`Op`] into 64-bit words (spec.md §4.1).
//!
//! Every instruction starts with an opcode word (the `Opcode` discriminant,
//! widened to `u64`) followed by one **RRR** operand word (three 8-bit
//! register fields packed into the low bytes, with whatever tail bits the
//! instruction needs in the rest) or, for **RI** instructions, an operand
//! word carrying the destination register plus a trailing 64-bit immediate
//! word. This table has to stay stable across a save/load round trip
//! (spec.md §8.2), so `Opcode`'s discriminants are explicit rather than
//! left to derive order.

use crate::{AnyReg, CmpOp, FReg, Op, TrapKind, Width, XReg};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
enum Opcode {
    Mov = 0,
    LoadImm = 1,
    FLoadImm = 2,
    Lea = 3,
    IAdd = 4,
    ISub = 5,
    IMul = 6,
    IDiv = 7,
    IMod = 8,
    INeg = 9,
    And = 10,
    Or = 11,
    Xor = 12,
    Shl = 13,
    Shr = 14,
    LogNot = 15,
    BNot = 16,
    ICmp = 17,
    FAdd = 18,
    FSub = 19,
    FMul = 20,
    FDiv = 21,
    FNeg = 22,
    FCmp = 23,
    I2F = 24,
    F2I = 25,
    RegBitMove = 26,
    Load = 27,
    Store = 28,
    FLoad = 29,
    FStore = 30,
    SignExtend = 31,
    ZeroExtend = 32,
    Jmp = 33,
    JmpIf = 34,
    JmpIndirect = 35,
    JmpTable = 36,
    Call = 37,
    CallIndirect = 38,
    Enter = 39,
    Leave = 40,
    Adjust = 41,
    Push = 42,
    Pop = 43,
    RetBuf = 44,
    Malloc = 45,
    Free = 46,
    Calloc = 47,
    Realloc = 48,
    Memcpy = 49,
    CheckPointer = 50,
    CheckAlignment = 51,
    CheckType = 52,
    CheckBounds = 53,
    CheckInitialized = 54,
    MarkInitialized = 55,
    ScopeIn = 56,
    ScopeOut = 57,
    SetJmp = 58,
    LongJmp = 59,
    CallF = 60,
    Trap = 61,
}

impl Opcode {
    fn from_u16(raw: u16) -> Result<Self, DecodeError> {
        use Opcode::*;
        Ok(match raw {
            0 => Mov,
            1 => LoadImm,
            2 => FLoadImm,
            3 => Lea,
            4 => IAdd,
            5 => ISub,
            6 => IMul,
            7 => IDiv,
            8 => IMod,
            9 => INeg,
            10 => And,
            11 => Or,
            12 => Xor,
            13 => Shl,
            14 => Shr,
            15 => LogNot,
            16 => BNot,
            17 => ICmp,
            18 => FAdd,
            19 => FSub,
            20 => FMul,
            21 => FDiv,
            22 => FNeg,
            23 => FCmp,
            24 => I2F,
            25 => F2I,
            26 => RegBitMove,
            27 => Load,
            28 => Store,
            29 => FLoad,
            30 => FStore,
            31 => SignExtend,
            32 => ZeroExtend,
            33 => Jmp,
            34 => JmpIf,
            35 => JmpIndirect,
            36 => JmpTable,
            37 => Call,
            38 => CallIndirect,
            39 => Enter,
            40 => Leave,
            41 => Adjust,
            42 => Push,
            43 => Pop,
            44 => RetBuf,
            45 => Malloc,
            46 => Free,
            47 => Calloc,
            48 => Realloc,
            49 => Memcpy,
            50 => CheckPointer,
            51 => CheckAlignment,
            52 => CheckType,
            53 => CheckBounds,
            54 => CheckInitialized,
            55 => MarkInitialized,
            56 => ScopeIn,
            57 => ScopeOut,
            58 => SetJmp,
            59 => LongJmp,
            60 => CallF,
            61 => Trap,
            other => return Err(DecodeError::UnknownOpcode(other)),
        })
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("truncated instruction stream")]
    Truncated,
    #[error("register index {0} out of range")]
    BadRegister(u8),
    #[error("memory access width tag {0} out of range")]
    BadWidth(u8),
    #[error("comparison tag {0} out of range")]
    BadCmpOp(u8),
    #[error("trap tag {0} out of range")]
    BadTrap(u8),
}

/// The operand word: eight bytes, addressed positionally. RRR shapes use
/// bytes 0-2 for registers and leave the rest free for flags; RI shapes use
/// byte 0 for the destination register.
#[derive(Default)]
struct Operands([u8; 8]);

impl Operands {
    fn to_word(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    fn from_word(word: u64) -> Self {
        Operands(word.to_le_bytes())
    }

    fn set_u8(&mut self, idx: usize, v: u8) -> &mut Self {
        self.0[idx] = v;
        self
    }

    fn u8(&self, idx: usize) -> u8 {
        self.0[idx]
    }

    fn set_bool(&mut self, idx: usize, v: bool) -> &mut Self {
        self.0[idx] = v as u8;
        self
    }

    fn bool(&self, idx: usize) -> bool {
        self.0[idx] != 0
    }

    fn set_i32(&mut self, bytes: [usize; 4], v: i32) -> &mut Self {
        for (b, byte_idx) in v.to_le_bytes().into_iter().zip(bytes) {
            self.0[byte_idx] = b;
        }
        self
    }

    fn i32_at(&self, bytes: [usize; 4]) -> i32 {
        let mut out = [0u8; 4];
        for (o, byte_idx) in out.iter_mut().zip(bytes) {
            *o = self.0[byte_idx];
        }
        i32::from_le_bytes(out)
    }

    fn set_u16(&mut self, lo: usize, v: u16) -> &mut Self {
        let b = v.to_le_bytes();
        self.0[lo] = b[0];
        self.0[lo + 1] = b[1];
        self
    }

    fn u16_at(&self, lo: usize) -> u16 {
        u16::from_le_bytes([self.0[lo], self.0[lo + 1]])
    }
}

fn width_tag(w: Width) -> u8 {
    match w {
        Width::B1 => 0,
        Width::B2 => 1,
        Width::B4 => 2,
        Width::B8 => 3,
    }
}

fn width_from_tag(tag: u8) -> Result<Width, DecodeError> {
    Ok(match tag {
        0 => Width::B1,
        1 => Width::B2,
        2 => Width::B4,
        3 => Width::B8,
        other => return Err(DecodeError::BadWidth(other)),
    })
}

fn cmp_tag(op: CmpOp) -> u8 {
    match op {
        CmpOp::Eq => 0,
        CmpOp::Ne => 1,
        CmpOp::Lt => 2,
        CmpOp::Le => 3,
        CmpOp::Gt => 4,
        CmpOp::Ge => 5,
    }
}

fn cmp_from_tag(tag: u8) -> Result<CmpOp, DecodeError> {
    Ok(match tag {
        0 => CmpOp::Eq,
        1 => CmpOp::Ne,
        2 => CmpOp::Lt,
        3 => CmpOp::Le,
        4 => CmpOp::Gt,
        5 => CmpOp::Ge,
        other => return Err(DecodeError::BadCmpOp(other)),
    })
}

fn xreg(idx: u8) -> Result<XReg, DecodeError> {
    XReg::new(idx).ok_or(DecodeError::BadRegister(idx))
}

fn freg(idx: u8) -> Result<FReg, DecodeError> {
    FReg::new(idx).ok_or(DecodeError::BadRegister(idx))
}

/// Encodes one instruction, appending its words to `out`. Returns the
/// number of words written (2 for RRR-shaped instructions, 3 for
/// RI-shaped ones carrying a 64-bit immediate, 1 for bare control ops).
pub fn encode_one(op: &Op, out: &mut Vec<u64>) -> usize {
    let start = out.len();
    macro_rules! push_opcode {
        ($code:expr) => {
            out.push($code as u16 as u64)
        };
    }
    match *op {
        Op::Mov { dst, src } => {
            push_opcode!(Opcode::Mov);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, src.index());
            out.push(w.to_word());
        }
        Op::LoadImm { dst, imm } => {
            push_opcode!(Opcode::LoadImm);
            let mut w = Operands::default();
            w.set_u8(0, dst.index());
            out.push(w.to_word());
            out.push(imm as u64);
        }
        Op::FLoadImm { dst, imm } => {
            push_opcode!(Opcode::FLoadImm);
            let mut w = Operands::default();
            w.set_u8(0, dst.index());
            out.push(w.to_word());
            out.push(imm.to_bits());
        }
        Op::Lea { dst, base, offset } => {
            push_opcode!(Opcode::Lea);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, base.index()).set_i32([4, 5, 6, 7], offset);
            out.push(w.to_word());
        }
        Op::IAdd { dst, a, b, trap_on_overflow } => encode_binop(out, Opcode::IAdd, dst, a, b, |w| { w.set_bool(3, trap_on_overflow); }),
        Op::ISub { dst, a, b, trap_on_overflow } => encode_binop(out, Opcode::ISub, dst, a, b, |w| { w.set_bool(3, trap_on_overflow); }),
        Op::IMul { dst, a, b, trap_on_overflow } => encode_binop(out, Opcode::IMul, dst, a, b, |w| { w.set_bool(3, trap_on_overflow); }),
        Op::IDiv { dst, a, b, unsigned } => encode_binop(out, Opcode::IDiv, dst, a, b, |w| { w.set_bool(3, unsigned); }),
        Op::IMod { dst, a, b, unsigned } => encode_binop(out, Opcode::IMod, dst, a, b, |w| { w.set_bool(3, unsigned); }),
        Op::INeg { dst, src } => encode_unop(out, Opcode::INeg, dst, src),
        Op::And { dst, a, b } => encode_binop(out, Opcode::And, dst, a, b, |_| {}),
        Op::Or { dst, a, b } => encode_binop(out, Opcode::Or, dst, a, b, |_| {}),
        Op::Xor { dst, a, b } => encode_binop(out, Opcode::Xor, dst, a, b, |_| {}),
        Op::Shl { dst, a, b } => encode_binop(out, Opcode::Shl, dst, a, b, |_| {}),
        Op::Shr { dst, a, b, unsigned } => encode_binop(out, Opcode::Shr, dst, a, b, |w| { w.set_bool(3, unsigned); }),
        Op::LogNot { dst, src } => encode_unop(out, Opcode::LogNot, dst, src),
        Op::BNot { dst, src } => encode_unop(out, Opcode::BNot, dst, src),
        Op::ICmp { dst, a, b, op, unsigned } => encode_binop(out, Opcode::ICmp, dst, a, b, |w| { w.set_u8(3, cmp_tag(op)); w.set_bool(4, unsigned); }),
        Op::FAdd { dst, a, b } => encode_fbinop(out, Opcode::FAdd, dst, a, b),
        Op::FSub { dst, a, b } => encode_fbinop(out, Opcode::FSub, dst, a, b),
        Op::FMul { dst, a, b } => encode_fbinop(out, Opcode::FMul, dst, a, b),
        Op::FDiv { dst, a, b } => encode_fbinop(out, Opcode::FDiv, dst, a, b),
        Op::FNeg { dst, src } => {
            push_opcode!(Opcode::FNeg);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, src.index());
            out.push(w.to_word());
        }
        Op::FCmp { dst, a, b, op } => {
            push_opcode!(Opcode::FCmp);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, a.index()).set_u8(2, b.index()).set_u8(3, cmp_tag(op));
            out.push(w.to_word());
        }
        Op::I2F { dst, src } => {
            push_opcode!(Opcode::I2F);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, src.index());
            out.push(w.to_word());
        }
        Op::F2I { dst, src } => {
            push_opcode!(Opcode::F2I);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, src.index());
            out.push(w.to_word());
        }
        Op::RegBitMove { dst, src } => {
            push_opcode!(Opcode::RegBitMove);
            let mut w = Operands::default();
            let (dst_tag, dst_idx) = any_reg_tag(dst);
            let (src_tag, src_idx) = any_reg_tag(src);
            w.set_u8(0, dst_idx).set_u8(1, src_idx).set_bool(2, dst_tag).set_bool(3, src_tag);
            out.push(w.to_word());
        }
        Op::Load { dst, addr, offset, width, signed } => {
            push_opcode!(Opcode::Load);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, addr.index()).set_u8(2, width_tag(width)).set_bool(3, signed).set_i32([4, 5, 6, 7], offset);
            out.push(w.to_word());
        }
        Op::Store { addr, src, offset, width } => {
            push_opcode!(Opcode::Store);
            let mut w = Operands::default();
            w.set_u8(0, addr.index()).set_u8(1, src.index()).set_u8(2, width_tag(width)).set_i32([4, 5, 6, 7], offset);
            out.push(w.to_word());
        }
        Op::FLoad { dst, addr, offset, width } => {
            push_opcode!(Opcode::FLoad);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, addr.index()).set_u8(2, width_tag(width)).set_i32([4, 5, 6, 7], offset);
            out.push(w.to_word());
        }
        Op::FStore { addr, src, offset, width } => {
            push_opcode!(Opcode::FStore);
            let mut w = Operands::default();
            w.set_u8(0, addr.index()).set_u8(1, src.index()).set_u8(2, width_tag(width)).set_i32([4, 5, 6, 7], offset);
            out.push(w.to_word());
        }
        Op::SignExtend { dst, src, from } => {
            push_opcode!(Opcode::SignExtend);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, src.index()).set_u8(2, width_tag(from));
            out.push(w.to_word());
        }
        Op::ZeroExtend { dst, src, from } => {
            push_opcode!(Opcode::ZeroExtend);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, src.index()).set_u8(2, width_tag(from));
            out.push(w.to_word());
        }
        Op::Jmp { target } => {
            push_opcode!(Opcode::Jmp);
            out.push(target);
        }
        Op::JmpIf { cond, target, when_zero } => {
            push_opcode!(Opcode::JmpIf);
            let mut w = Operands::default();
            w.set_u8(0, cond.index()).set_bool(1, when_zero);
            out.push(w.to_word());
            out.push(target);
        }
        Op::JmpIndirect { target } => {
            push_opcode!(Opcode::JmpIndirect);
            let mut w = Operands::default();
            w.set_u8(0, target.index());
            out.push(w.to_word());
        }
        Op::JmpTable { index, table_offset, len } => {
            push_opcode!(Opcode::JmpTable);
            let mut w = Operands::default();
            w.set_u8(0, index.index()).set_i32([4, 5, 6, 7], len as i32);
            out.push(w.to_word());
            out.push(table_offset);
        }
        Op::Call { target } => {
            push_opcode!(Opcode::Call);
            out.push(target);
        }
        Op::CallIndirect { target } => {
            push_opcode!(Opcode::CallIndirect);
            let mut w = Operands::default();
            w.set_u8(0, target.index());
            out.push(w.to_word());
        }
        Op::Enter { frame_size, param_count, float_mask } => {
            push_opcode!(Opcode::Enter);
            let mut w = Operands::default();
            w.set_u8(0, param_count).set_u16(2, float_mask).set_i32([4, 5, 6, 7], frame_size as i32);
            out.push(w.to_word());
        }
        Op::Leave => push_opcode!(Opcode::Leave),
        Op::Adjust { delta } => {
            push_opcode!(Opcode::Adjust);
            let mut w = Operands::default();
            w.set_i32([4, 5, 6, 7], delta);
            out.push(w.to_word());
        }
        Op::Push { src } => {
            push_opcode!(Opcode::Push);
            let mut w = Operands::default();
            w.set_u8(0, src.index());
            out.push(w.to_word());
        }
        Op::Pop { dst } => {
            push_opcode!(Opcode::Pop);
            let mut w = Operands::default();
            w.set_u8(0, dst.index());
            out.push(w.to_word());
        }
        Op::RetBuf { dst, size } => {
            push_opcode!(Opcode::RetBuf);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_i32([4, 5, 6, 7], size as i32);
            out.push(w.to_word());
        }
        Op::Malloc { dst, size } => encode_binop_xreg2(out, Opcode::Malloc, dst, size),
        Op::Free { ptr } => encode_unop_single(out, Opcode::Free, ptr),
        Op::Calloc { dst, nmemb, size } => {
            push_opcode!(Opcode::Calloc);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, nmemb.index()).set_u8(2, size.index());
            out.push(w.to_word());
        }
        Op::Realloc { dst, ptr, size } => {
            push_opcode!(Opcode::Realloc);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, ptr.index()).set_u8(2, size.index());
            out.push(w.to_word());
        }
        Op::Memcpy { dst, src, len } => {
            push_opcode!(Opcode::Memcpy);
            let mut w = Operands::default();
            w.set_u8(0, dst.index()).set_u8(1, src.index()).set_u8(2, len.index());
            out.push(w.to_word());
        }
        Op::CheckPointer { ptr } => encode_unop_single(out, Opcode::CheckPointer, ptr),
        Op::CheckAlignment { ptr, align } => {
            push_opcode!(Opcode::CheckAlignment);
            let mut w = Operands::default();
            w.set_u8(0, ptr.index()).set_i32([4, 5, 6, 7], align as i32);
            out.push(w.to_word());
        }
        Op::CheckType { ptr, expected_kind } => {
            push_opcode!(Opcode::CheckType);
            let mut w = Operands::default();
            w.set_u8(0, ptr.index()).set_u8(1, expected_kind);
            out.push(w.to_word());
        }
        Op::CheckBounds { ptr, index, width } => {
            push_opcode!(Opcode::CheckBounds);
            let mut w = Operands::default();
            w.set_u8(0, ptr.index()).set_u8(1, index.index()).set_u8(2, width_tag(width));
            out.push(w.to_word());
        }
        Op::CheckInitialized { ptr, len } => {
            push_opcode!(Opcode::CheckInitialized);
            let mut w = Operands::default();
            w.set_u8(0, ptr.index()).set_i32([4, 5, 6, 7], len as i32);
            out.push(w.to_word());
        }
        Op::MarkInitialized { ptr, len } => {
            push_opcode!(Opcode::MarkInitialized);
            let mut w = Operands::default();
            w.set_u8(0, ptr.index()).set_i32([4, 5, 6, 7], len as i32);
            out.push(w.to_word());
        }
        Op::ScopeIn => push_opcode!(Opcode::ScopeIn),
        Op::ScopeOut => push_opcode!(Opcode::ScopeOut),
        Op::SetJmp { dst, buf } => encode_binop_xreg2(out, Opcode::SetJmp, dst, buf),
        Op::LongJmp { buf, value } => encode_binop_xreg2(out, Opcode::LongJmp, buf, value),
        Op::CallF { index, nargs, double_mask } => {
            push_opcode!(Opcode::CallF);
            let mut w = Operands::default();
            w.set_u8(0, nargs).set_u16(2, double_mask).set_i32([4, 5, 6, 7], index as i32);
            out.push(w.to_word());
        }
        Op::Trap { code } => {
            push_opcode!(Opcode::Trap);
            let mut w = Operands::default();
            w.set_u8(0, code as u8);
            out.push(w.to_word());
        }
    }
    out.len() - start
}

fn encode_binop(out: &mut Vec<u64>, code: Opcode, dst: XReg, a: XReg, b: XReg, tail: impl FnOnce(&mut Operands)) {
    out.push(code as u16 as u64);
    let mut w = Operands::default();
    w.set_u8(0, dst.index()).set_u8(1, a.index()).set_u8(2, b.index());
    tail(&mut w);
    out.push(w.to_word());
}

fn encode_unop(out: &mut Vec<u64>, code: Opcode, dst: XReg, src: XReg) {
    out.push(code as u16 as u64);
    let mut w = Operands::default();
    w.set_u8(0, dst.index()).set_u8(1, src.index());
    out.push(w.to_word());
}

fn encode_unop_single(out: &mut Vec<u64>, code: Opcode, r: XReg) {
    out.push(code as u16 as u64);
    let mut w = Operands::default();
    w.set_u8(0, r.index());
    out.push(w.to_word());
}

fn encode_binop_xreg2(out: &mut Vec<u64>, code: Opcode, a: XReg, b: XReg) {
    out.push(code as u16 as u64);
    let mut w = Operands::default();
    w.set_u8(0, a.index()).set_u8(1, b.index());
    out.push(w.to_word());
}

fn encode_fbinop(out: &mut Vec<u64>, code: Opcode, dst: FReg, a: FReg, b: FReg) {
    out.push(code as u16 as u64);
    let mut w = Operands::default();
    w.set_u8(0, dst.index()).set_u8(1, a.index()).set_u8(2, b.index());
    out.push(w.to_word());
}

fn any_reg_tag(r: AnyReg) -> (bool, u8) {
    match r {
        AnyReg::X(x) => (false, x.index()),
        AnyReg::F(f) => (true, f.index()),
    }
}

fn any_reg_from(tag: bool, idx: u8) -> Result<AnyReg, DecodeError> {
    Ok(if tag { AnyReg::F(freg(idx)?) } else { AnyReg::X(xreg(idx)?) })
}

fn trap_from_u8(v: u8) -> Result<TrapKind, DecodeError> {
    TrapKind::ALL.get(v as usize).copied().ok_or(DecodeError::BadTrap(v))
}

/// Decodes one instruction starting at `words[0]`. Returns the decoded
/// `Op` and the number of words consumed.
pub fn decode_one(words: &[u64]) -> Result<(Op, usize), DecodeError> {
    let opcode_word = *words.first().ok_or(DecodeError::Truncated)?;
    let opcode = Opcode::from_u16(opcode_word as u16)?;
    let rest = &words[1..];
    let next_word = |i: usize| -> Result<u64, DecodeError> { rest.get(i).copied().ok_or(DecodeError::Truncated) };

    macro_rules! operands {
        () => {
            Operands::from_word(next_word(0)?)
        };
    }

    Ok(match opcode {
        Opcode::Mov => {
            let w = operands!();
            (Op::Mov { dst: xreg(w.u8(0))?, src: xreg(w.u8(1))? }, 2)
        }
        Opcode::LoadImm => {
            let w = operands!();
            (Op::LoadImm { dst: xreg(w.u8(0))?, imm: next_word(1)? as i64 }, 3)
        }
        Opcode::FLoadImm => {
            let w = operands!();
            (Op::FLoadImm { dst: freg(w.u8(0))?, imm: f64::from_bits(next_word(1)?) }, 3)
        }
        Opcode::Lea => {
            let w = operands!();
            (Op::Lea { dst: xreg(w.u8(0))?, base: xreg(w.u8(1))?, offset: w.i32_at([4, 5, 6, 7]) }, 2)
        }
        Opcode::IAdd => {
            let w = operands!();
            (Op::IAdd { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))?, trap_on_overflow: w.bool(3) }, 2)
        }
        Opcode::ISub => {
            let w = operands!();
            (Op::ISub { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))?, trap_on_overflow: w.bool(3) }, 2)
        }
        Opcode::IMul => {
            let w = operands!();
            (Op::IMul { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))?, trap_on_overflow: w.bool(3) }, 2)
        }
        Opcode::IDiv => {
            let w = operands!();
            (Op::IDiv { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))?, unsigned: w.bool(3) }, 2)
        }
        Opcode::IMod => {
            let w = operands!();
            (Op::IMod { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))?, unsigned: w.bool(3) }, 2)
        }
        Opcode::INeg => {
            let w = operands!();
            (Op::INeg { dst: xreg(w.u8(0))?, src: xreg(w.u8(1))? }, 2)
        }
        Opcode::And => {
            let w = operands!();
            (Op::And { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))? }, 2)
        }
        Opcode::Or => {
            let w = operands!();
            (Op::Or { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))? }, 2)
        }
        Opcode::Xor => {
            let w = operands!();
            (Op::Xor { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))? }, 2)
        }
        Opcode::Shl => {
            let w = operands!();
            (Op::Shl { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))? }, 2)
        }
        Opcode::Shr => {
            let w = operands!();
            (Op::Shr { dst: xreg(w.u8(0))?, a: xreg(w.u8(1))?, b: xreg(w.u8(2))?, unsigned: w.bool(3) }, 2)
        }
        Opcode::LogNot => {
            let w = operands!();
            (Op::LogNot { dst: xreg(w.u8(0))?, src: xreg(w.u8(1))? }, 2)
        }
        Opcode::BNot => {
            let w = operands!();
            (Op::BNot { dst: xreg(w.u8(0))?, src: xreg(w.u8(1))? }, 2)
        }
        Opcode::ICmp => {
            let w = operands!();
            (
                Op::ICmp {
                    dst: xreg(w.u8(0))?,
                    a: xreg(w.u8(1))?,
                    b: xreg(w.u8(2))?,
                    op: cmp_from_tag(w.u8(3))?,
                    unsigned: w.bool(4),
                },
                2,
            )
        }
        Opcode::FAdd => {
            let w = operands!();
            (Op::FAdd { dst: freg(w.u8(0))?, a: freg(w.u8(1))?, b: freg(w.u8(2))? }, 2)
        }
        Opcode::FSub => {
            let w = operands!();
            (Op::FSub { dst: freg(w.u8(0))?, a: freg(w.u8(1))?, b: freg(w.u8(2))? }, 2)
        }
        Opcode::FMul => {
            let w = operands!();
            (Op::FMul { dst: freg(w.u8(0))?, a: freg(w.u8(1))?, b: freg(w.u8(2))? }, 2)
        }
        Opcode::FDiv => {
            let w = operands!();
            (Op::FDiv { dst: freg(w.u8(0))?, a: freg(w.u8(1))?, b: freg(w.u8(2))? }, 2)
        }
        Opcode::FNeg => {
            let w = operands!();
            (Op::FNeg { dst: freg(w.u8(0))?, src: freg(w.u8(1))? }, 2)
        }
        Opcode::FCmp => {
            let w = operands!();
            (Op::FCmp { dst: xreg(w.u8(0))?, a: freg(w.u8(1))?, b: freg(w.u8(2))?, op: cmp_from_tag(w.u8(3))? }, 2)
        }
        Opcode::I2F => {
            let w = operands!();
            (Op::I2F { dst: freg(w.u8(0))?, src: xreg(w.u8(1))? }, 2)
        }
        Opcode::F2I => {
            let w = operands!();
            (Op::F2I { dst: xreg(w.u8(0))?, src: freg(w.u8(1))? }, 2)
        }
        Opcode::RegBitMove => {
            let w = operands!();
            (Op::RegBitMove { dst: any_reg_from(w.bool(2), w.u8(0))?, src: any_reg_from(w.bool(3), w.u8(1))? }, 2)
        }
        Opcode::Load => {
            let w = operands!();
            (
                Op::Load {
                    dst: xreg(w.u8(0))?,
                    addr: xreg(w.u8(1))?,
                    width: width_from_tag(w.u8(2))?,
                    signed: w.bool(3),
                    offset: w.i32_at([4, 5, 6, 7]),
                },
                2,
            )
        }
        Opcode::Store => {
            let w = operands!();
            (
                Op::Store {
                    addr: xreg(w.u8(0))?,
                    src: xreg(w.u8(1))?,
                    width: width_from_tag(w.u8(2))?,
                    offset: w.i32_at([4, 5, 6, 7]),
                },
                2,
            )
        }
        Opcode::FLoad => {
            let w = operands!();
            (
                Op::FLoad {
                    dst: freg(w.u8(0))?,
                    addr: xreg(w.u8(1))?,
                    width: width_from_tag(w.u8(2))?,
                    offset: w.i32_at([4, 5, 6, 7]),
                },
                2,
            )
        }
        Opcode::FStore => {
            let w = operands!();
            (
                Op::FStore {
                    addr: xreg(w.u8(0))?,
                    src: freg(w.u8(1))?,
                    width: width_from_tag(w.u8(2))?,
                    offset: w.i32_at([4, 5, 6, 7]),
                },
                2,
            )
        }
        Opcode::SignExtend => {
            let w = operands!();
            (Op::SignExtend { dst: xreg(w.u8(0))?, src: xreg(w.u8(1))?, from: width_from_tag(w.u8(2))? }, 2)
        }
        Opcode::ZeroExtend => {
            let w = operands!();
            (Op::ZeroExtend { dst: xreg(w.u8(0))?, src: xreg(w.u8(1))?, from: width_from_tag(w.u8(2))? }, 2)
        }
        Opcode::Jmp => (Op::Jmp { target: next_word(0)? }, 2),
        Opcode::JmpIf => {
            let w = operands!();
            (Op::JmpIf { cond: xreg(w.u8(0))?, when_zero: w.bool(1), target: next_word(1)? }, 3)
        }
        Opcode::JmpIndirect => {
            let w = operands!();
            (Op::JmpIndirect { target: xreg(w.u8(0))? }, 2)
        }
        Opcode::JmpTable => {
            let w = operands!();
            (Op::JmpTable { index: xreg(w.u8(0))?, len: w.i32_at([4, 5, 6, 7]) as u32, table_offset: next_word(1)? }, 3)
        }
        Opcode::Call => (Op::Call { target: next_word(0)? }, 2),
        Opcode::CallIndirect => {
            let w = operands!();
            (Op::CallIndirect { target: xreg(w.u8(0))? }, 2)
        }
        Opcode::Enter => {
            let w = operands!();
            (
                Op::Enter {
                    frame_size: w.i32_at([4, 5, 6, 7]) as u32,
                    param_count: w.u8(0),
                    float_mask: w.u16_at(2),
                },
                2,
            )
        }
        Opcode::Leave => (Op::Leave, 1),
        Opcode::Adjust => {
            let w = operands!();
            (Op::Adjust { delta: w.i32_at([4, 5, 6, 7]) }, 2)
        }
        Opcode::Push => {
            let w = operands!();
            (Op::Push { src: xreg(w.u8(0))? }, 2)
        }
        Opcode::Pop => {
            let w = operands!();
            (Op::Pop { dst: xreg(w.u8(0))? }, 2)
        }
        Opcode::RetBuf => {
            let w = operands!();
            (Op::RetBuf { dst: xreg(w.u8(0))?, size: w.i32_at([4, 5, 6, 7]) as u32 }, 2)
        }
        Opcode::Malloc => {
            let w = operands!();
            (Op::Malloc { dst: xreg(w.u8(0))?, size: xreg(w.u8(1))? }, 2)
        }
        Opcode::Free => {
            let w = operands!();
            (Op::Free { ptr: xreg(w.u8(0))? }, 2)
        }
        Opcode::Calloc => {
            let w = operands!();
            (Op::Calloc { dst: xreg(w.u8(0))?, nmemb: xreg(w.u8(1))?, size: xreg(w.u8(2))? }, 2)
        }
        Opcode::Realloc => {
            let w = operands!();
            (Op::Realloc { dst: xreg(w.u8(0))?, ptr: xreg(w.u8(1))?, size: xreg(w.u8(2))? }, 2)
        }
        Opcode::Memcpy => {
            let w = operands!();
            (Op::Memcpy { dst: xreg(w.u8(0))?, src: xreg(w.u8(1))?, len: xreg(w.u8(2))? }, 2)
        }
        Opcode::CheckPointer => {
            let w = operands!();
            (Op::CheckPointer { ptr: xreg(w.u8(0))? }, 2)
        }
        Opcode::CheckAlignment => {
            let w = operands!();
            (Op::CheckAlignment { ptr: xreg(w.u8(0))?, align: w.i32_at([4, 5, 6, 7]) as u32 }, 2)
        }
        Opcode::CheckType => {
            let w = operands!();
            (Op::CheckType { ptr: xreg(w.u8(0))?, expected_kind: w.u8(1) }, 2)
        }
        Opcode::CheckBounds => {
            let w = operands!();
            (Op::CheckBounds { ptr: xreg(w.u8(0))?, index: xreg(w.u8(1))?, width: width_from_tag(w.u8(2))? }, 2)
        }
        Opcode::CheckInitialized => {
            let w = operands!();
            (Op::CheckInitialized { ptr: xreg(w.u8(0))?, len: w.i32_at([4, 5, 6, 7]) as u32 }, 2)
        }
        Opcode::MarkInitialized => {
            let w = operands!();
            (Op::MarkInitialized { ptr: xreg(w.u8(0))?, len: w.i32_at([4, 5, 6, 7]) as u32 }, 2)
        }
        Opcode::ScopeIn => (Op::ScopeIn, 1),
        Opcode::ScopeOut => (Op::ScopeOut, 1),
        Opcode::SetJmp => {
            let w = operands!();
            (Op::SetJmp { dst: xreg(w.u8(0))?, buf: xreg(w.u8(1))? }, 2)
        }
        Opcode::LongJmp => {
            let w = operands!();
            (Op::LongJmp { buf: xreg(w.u8(0))?, value: xreg(w.u8(1))? }, 2)
        }
        Opcode::CallF => {
            let w = operands!();
            (
                Op::CallF {
                    index: w.i32_at([4, 5, 6, 7]) as u32,
                    nargs: w.u8(0),
                    double_mask: w.u16_at(2),
                },
                2,
            )
        }
        Opcode::Trap => {
            let w = operands!();
            (Op::Trap { code: trap_from_u8(w.u8(0))? }, 2)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CmpOp, Width, XReg};

    fn roundtrip(op: Op) {
        let mut words = Vec::new();
        let written = encode_one(&op, &mut words);
        assert_eq!(written, words.len());
        let (decoded, consumed) = decode_one(&words).expect("decode");
        assert_eq!(consumed, words.len());
        assert_eq!(decoded, op);
    }

    #[test]
    fn round_trips_every_shape() {
        let x0 = XReg::new(0).unwrap();
        let x1 = XReg::new(1).unwrap();
        let x2 = XReg::new(2).unwrap();
        let f0 = FReg::new(0).unwrap();

        roundtrip(Op::Mov { dst: x0, src: x1 });
        roundtrip(Op::LoadImm { dst: x1, imm: -42 });
        roundtrip(Op::FLoadImm { dst: f0, imm: 3.5 });
        roundtrip(Op::Lea { dst: x0, base: x1, offset: -16 });
        roundtrip(Op::IAdd { dst: x0, a: x1, b: x2, trap_on_overflow: true });
        roundtrip(Op::IDiv { dst: x0, a: x1, b: x2, unsigned: false });
        roundtrip(Op::ICmp { dst: x0, a: x1, b: x2, op: CmpOp::Lt, unsigned: true });
        roundtrip(Op::Load { dst: x0, addr: x1, offset: 8, width: Width::B4, signed: true });
        roundtrip(Op::Enter { frame_size: 256, param_count: 3, float_mask: 0b0110 });
        roundtrip(Op::JmpIf { cond: x0, target: 0x4000, when_zero: true });
        roundtrip(Op::CallF { index: 7, nargs: 2, double_mask: 0b10 });
        roundtrip(Op::Trap { code: TrapKind::DivisionByZero });
        roundtrip(Op::Leave);
        roundtrip(Op::ScopeIn);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = decode_one(&[9999]).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOpcode(9999));
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let err = decode_one(&[Opcode::LoadImm as u16 as u64]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated);
    }
}
