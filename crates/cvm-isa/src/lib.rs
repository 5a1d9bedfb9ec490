//! The cvm bytecode instruction set (spec.md §4.1).
//!
//! Two 64-bit encoding shapes: **RRR** (an opcode word, then one operand
//! word packing three 8-bit register fields plus a tail) and **RI** (an
//! opcode word, a destination-register operand word, then a 64-bit
//! immediate word). `Op` is the in-memory decoded form codegen builds and
//! the VM executes directly without re-decoding; [`encode`]/[`decode`] are
//! only needed at the `cvm-image` save/load boundary, matching how
//! `cranelift-codegen`'s `ir::Function` is the in-memory IR and
//! `binemit` is a separate, only-sometimes-needed lowering to bytes.

mod decode;
mod reg;
mod trap;

pub use decode::{decode_one, encode_one, DecodeError};
pub use reg::{AnyReg, FReg, XReg};
pub use trap::TrapKind;

/// 1/2/4/8-byte memory access width, used by the sized load/store and
/// sign/zero-extension opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Width {
    B1,
    B2,
    B4,
    B8,
}

impl Width {
    pub fn bytes(self) -> u32 {
        match self {
            Width::B1 => 1,
            Width::B2 => 2,
            Width::B4 => 4,
            Width::B8 => 8,
        }
    }
}

/// One decoded bytecode instruction. Every opcode category from spec.md
/// §4.1 is represented by one or more variants.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Op {
    // -- Move/immediate --
    Mov { dst: XReg, src: XReg },
    LoadImm { dst: XReg, imm: i64 },
    FLoadImm { dst: FReg, imm: f64 },
    /// `dst = bp + offset` — load-effective-address, used to materialize
    /// the address of a local without a memory access.
    Lea { dst: XReg, base: XReg, offset: i32 },

    // -- Integer arithmetic --
    IAdd { dst: XReg, a: XReg, b: XReg, trap_on_overflow: bool },
    ISub { dst: XReg, a: XReg, b: XReg, trap_on_overflow: bool },
    IMul { dst: XReg, a: XReg, b: XReg, trap_on_overflow: bool },
    IDiv { dst: XReg, a: XReg, b: XReg, unsigned: bool },
    IMod { dst: XReg, a: XReg, b: XReg, unsigned: bool },
    INeg { dst: XReg, src: XReg },

    // -- Bitwise --
    And { dst: XReg, a: XReg, b: XReg },
    Or { dst: XReg, a: XReg, b: XReg },
    Xor { dst: XReg, a: XReg, b: XReg },
    Shl { dst: XReg, a: XReg, b: XReg },
    Shr { dst: XReg, a: XReg, b: XReg, unsigned: bool },
    /// Logical NOT: produces `0`/`1`.
    LogNot { dst: XReg, src: XReg },
    /// Bitwise complement (`~x`).
    BNot { dst: XReg, src: XReg },

    // -- Comparison (produces 0/1) --
    ICmp { dst: XReg, a: XReg, b: XReg, op: CmpOp, unsigned: bool },

    // -- Float --
    FAdd { dst: FReg, a: FReg, b: FReg },
    FSub { dst: FReg, a: FReg, b: FReg },
    FMul { dst: FReg, a: FReg, b: FReg },
    FDiv { dst: FReg, a: FReg, b: FReg },
    FNeg { dst: FReg, src: FReg },
    FCmp { dst: XReg, a: FReg, b: FReg, op: CmpOp },
    I2F { dst: FReg, src: XReg },
    F2I { dst: XReg, src: FReg },
    /// Bit-reinterpreting move between banks (`fr -> r` / `r -> fr`).
    RegBitMove { dst: AnyReg, src: AnyReg },

    // -- Memory --
    Load { dst: XReg, addr: XReg, offset: i32, width: Width, signed: bool },
    Store { addr: XReg, src: XReg, offset: i32, width: Width },
    FLoad { dst: FReg, addr: XReg, offset: i32, width: Width },
    FStore { addr: XReg, src: FReg, offset: i32, width: Width },

    // -- Sign/zero extension (in-register) --
    SignExtend { dst: XReg, src: XReg, from: Width },
    ZeroExtend { dst: XReg, src: XReg, from: Width },

    // -- Control --
    Jmp { target: u64 },
    JmpIf { cond: XReg, target: u64, when_zero: bool },
    JmpIndirect { target: XReg },
    JmpTable { index: XReg, table_offset: u64, len: u32 },

    // -- Calling --
    Call { target: u64 },
    CallIndirect { target: XReg },
    Enter { frame_size: u32, param_count: u8, float_mask: u16 },
    Leave,
    Adjust { delta: i32 },
    Push { src: XReg },
    Pop { dst: XReg },
    /// Selects the next buffer from the rotating struct-return pool
    /// (spec.md §4.3) and loads its address into `dst`.
    RetBuf { dst: XReg, size: u32 },

    // -- Heap --
    Malloc { dst: XReg, size: XReg },
    Free { ptr: XReg },
    Calloc { dst: XReg, nmemb: XReg, size: XReg },
    Realloc { dst: XReg, ptr: XReg, size: XReg },
    Memcpy { dst: XReg, src: XReg, len: XReg },

    // -- Safety (no-ops when the corresponding feature is disabled) --
    CheckPointer { ptr: XReg },
    CheckAlignment { ptr: XReg, align: u32 },
    CheckType { ptr: XReg, expected_kind: u8 },
    CheckBounds { ptr: XReg, index: XReg, width: Width },
    CheckInitialized { ptr: XReg, len: u32 },
    MarkInitialized { ptr: XReg, len: u32 },
    ScopeIn,
    ScopeOut,

    // -- setjmp/longjmp --
    SetJmp { dst: XReg, buf: XReg },
    LongJmp { buf: XReg, value: XReg },

    // -- FFI --
    CallF { index: u32, nargs: u8, double_mask: u16 },

    /// Aborts the dispatch loop with the given trap. Not emitted by
    /// `callf`/heap ops directly (those trap from within the VM's own
    /// opcode handlers) — this is codegen's explicit trap for things like
    /// an unreachable `default` arm.
    Trap { code: TrapKind },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A human-readable mnemonic for disassembly, independent of the
/// discriminant used by [`encode_one`]/[`decode_one`].
pub fn mnemonic(op: &Op) -> &'static str {
    match op {
        Op::Mov { .. } => "mov",
        Op::LoadImm { .. } => "imm",
        Op::FLoadImm { .. } => "fimm",
        Op::Lea { .. } => "lea",
        Op::IAdd { .. } => "add",
        Op::ISub { .. } => "sub",
        Op::IMul { .. } => "mul",
        Op::IDiv { .. } => "div",
        Op::IMod { .. } => "mod",
        Op::INeg { .. } => "neg",
        Op::And { .. } => "and",
        Op::Or { .. } => "or",
        Op::Xor { .. } => "xor",
        Op::Shl { .. } => "shl",
        Op::Shr { .. } => "shr",
        Op::LogNot { .. } => "not",
        Op::BNot { .. } => "bnot",
        Op::ICmp { op, .. } => cmp_mnemonic(*op),
        Op::FAdd { .. } => "fadd",
        Op::FSub { .. } => "fsub",
        Op::FMul { .. } => "fmul",
        Op::FDiv { .. } => "fdiv",
        Op::FNeg { .. } => "fneg",
        Op::FCmp { op, .. } => cmp_mnemonic(*op),
        Op::I2F { .. } => "i2f",
        Op::F2I { .. } => "f2i",
        Op::RegBitMove { .. } => "regmove",
        Op::Load { .. } => "load",
        Op::Store { .. } => "store",
        Op::FLoad { .. } => "fload",
        Op::FStore { .. } => "fstore",
        Op::SignExtend { .. } => "sx",
        Op::ZeroExtend { .. } => "zx",
        Op::Jmp { .. } => "jmp",
        Op::JmpIf { .. } => "jcc",
        Op::JmpIndirect { .. } => "jmpi",
        Op::JmpTable { .. } => "jmpt",
        Op::Call { .. } => "call",
        Op::CallIndirect { .. } => "calli",
        Op::Enter { .. } => "enter",
        Op::Leave => "leave",
        Op::Adjust { .. } => "adjust",
        Op::Push { .. } => "push",
        Op::Pop { .. } => "pop",
        Op::RetBuf { .. } => "retbuf",
        Op::Malloc { .. } => "malloc",
        Op::Free { .. } => "free",
        Op::Calloc { .. } => "calloc",
        Op::Realloc { .. } => "realloc",
        Op::Memcpy { .. } => "memcpy",
        Op::CheckPointer { .. } => "chk_ptr",
        Op::CheckAlignment { .. } => "chk_align",
        Op::CheckType { .. } => "chk_type",
        Op::CheckBounds { .. } => "chk_bounds",
        Op::CheckInitialized { .. } => "chk_init",
        Op::MarkInitialized { .. } => "mark_init",
        Op::ScopeIn => "scope_in",
        Op::ScopeOut => "scope_out",
        Op::SetJmp { .. } => "setjmp",
        Op::LongJmp { .. } => "longjmp",
        Op::CallF { .. } => "callf",
        Op::Trap { .. } => "trap",
    }
}

fn cmp_mnemonic(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "eq",
        CmpOp::Ne => "ne",
        CmpOp::Lt => "lt",
        CmpOp::Le => "le",
        CmpOp::Gt => "gt",
        CmpOp::Ge => "ge",
    }
}
