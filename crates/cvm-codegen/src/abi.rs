//! Calling-convention constants shared by frame layout, expression lowering,
//! and call-site lowering. `FP_REG`/address tagging are re-exported from
//! `cvm-vm` rather than duplicated, since they're a `cvm-vm`-owned runtime
//! convention codegen has to match exactly, not a codegen-level choice.

pub use cvm_vm::{tag_addr, AddrRegion, FP_REG};

use cvm_isa::{FReg, XReg};

/// Two words the caller leaves above the callee's frame: the saved `bp`
/// `Enter` pushes and the return address `Call` pushes (spec.md §4.4).
pub const SAVED_REGS_GAP: i64 = 16;

/// Where a callee leaves its return value, by codegen-internal convention
/// (`cvm-vm`'s `Leave` doesn't touch any register itself — it's on
/// whichever side of a call to agree where the value lives).
pub fn return_reg() -> XReg {
    XReg::new(1).expect("1 < 32")
}

pub fn float_return_reg() -> FReg {
    FReg::new(0).expect("0 < 32")
}

/// First integer/float argument registers, skipping `x0` (`cvm-vm`'s
/// zero-sink, see DESIGN.md); `FReg` has no such restriction but starting
/// both banks at the same index keeps argument-register math uniform.
pub fn int_arg_reg(i: usize) -> Option<XReg> {
    XReg::new(1 + i as u8)
}

pub fn float_arg_reg(i: usize) -> Option<FReg> {
    FReg::new(i as u8)
}

/// How many integer argument registers are usable (`x1..x7`).
pub const INT_ARG_COUNT: usize = XReg_ARG_COUNT - 1;
/// How many float argument registers are usable (`f0..f7`).
pub const FLOAT_ARG_COUNT: usize = XReg_ARG_COUNT;

#[allow(non_upper_case_globals)]
const XReg_ARG_COUNT: usize = cvm_isa::XReg::ARG_COUNT as usize;

/// `Op::CallF`'s own argument convention: `cvm-vm`'s dispatch reads integer
/// argument `i` directly from `XReg::new(i)`, literally including `i == 0`
/// (unlike regular calls, which skip `x0`). An FFI call's first integer
/// argument is therefore unavoidably lost to the zero sink; see DESIGN.md.
pub fn ffi_int_reg(i: usize) -> Option<XReg> {
    XReg::new(i as u8)
}

/// Where one argument (parameter or call-site value) lives, classified
/// independently per register bank so an `(int, float, int)` parameter
/// list doesn't burn a float register on the middle argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgSlot {
    Int(usize),
    Float(usize),
    /// Index among every stack-passed argument, in declaration order.
    Stack(usize),
}

/// Classifies `is_float` flags (one per argument, in order) into register
/// or stack slots. `int_budget` is `INT_ARG_COUNT` minus whatever the
/// caller has already reserved (the hidden struct-return pointer); pass
/// `0` for both budgets to force every argument onto the stack (variadic
/// calls, see DESIGN.md).
pub fn classify_args(is_float: &[bool], int_budget: usize, float_budget: usize) -> Vec<ArgSlot> {
    let mut int_used = 0;
    let mut float_used = 0;
    let mut stack_used = 0;
    is_float
        .iter()
        .map(|&f| {
            if f {
                if float_used < float_budget {
                    let slot = ArgSlot::Float(float_used);
                    float_used += 1;
                    return slot;
                }
            } else if int_used < int_budget {
                let slot = ArgSlot::Int(int_used);
                int_used += 1;
                return slot;
            }
            let slot = ArgSlot::Stack(stack_used);
            stack_used += 1;
            slot
        })
        .collect()
}
