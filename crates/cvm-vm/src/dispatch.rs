//! The instruction dispatch loop (spec.md §4.4): one `step` decodes and
//! executes the instruction at `vm.regs.pc`, advancing it unless the
//! instruction itself redirected control flow.

use cvm_isa::{AnyReg, CmpOp, FReg, Op, TrapKind, Width, XReg};

use crate::{tag_addr, untag_addr, AddrRegion, StepOutcome, Vm, VmFault, FP_REG};

fn fault(vm: &Vm, kind: TrapKind) -> VmFault {
    VmFault::new(kind, vm.regs.pc)
}

fn resolve_addr(vm: &Vm, tagged: u64) -> Result<(AddrRegion, u64), VmFault> {
    untag_addr(tagged).ok_or_else(|| fault(vm, TrapKind::NullDereference).with_value(tagged))
}

// Load/Store trust the tagged address's region and segment bounds alone.
// Heap-specific safety (use-after-free, canary, declared-size bounds) is
// the job of the explicit `CheckPointer`/`CheckBounds`/`CheckType` opcodes
// codegen emits ahead of a risky access, not of every access uniformly —
// a `Data`/`Stack` address has no heap header to check against at all.
fn load_width(vm: &mut Vm, tagged: u64, width: Width) -> Result<u64, VmFault> {
    let (region, offset) = resolve_addr(vm, tagged)?;
    let offset = offset as usize;
    let value = match region {
        AddrRegion::Heap => vm.heap.read(offset, width),
        AddrRegion::Data => vm.data.read(offset, width),
        AddrRegion::Stack => vm.stack.read(offset, width),
    };
    value.ok_or_else(|| fault(vm, TrapKind::BoundsViolation).with_value(tagged))
}

fn store_width(vm: &mut Vm, tagged: u64, width: Width, value: u64) -> Result<(), VmFault> {
    let (region, offset) = resolve_addr(vm, tagged)?;
    let offset = offset as usize;
    let ok = match region {
        AddrRegion::Heap => vm.heap.write(offset, width, value),
        AddrRegion::Data => vm.data.write(offset, width, value),
        AddrRegion::Stack => vm.stack.write(offset, width, value),
    };
    if ok {
        Ok(())
    } else {
        Err(fault(vm, TrapKind::BoundsViolation).with_value(tagged))
    }
}

fn sign_extend(value: u64, from: Width) -> i64 {
    match from {
        Width::B1 => value as u8 as i8 as i64,
        Width::B2 => value as u16 as i16 as i64,
        Width::B4 => value as u32 as i32 as i64,
        Width::B8 => value as i64,
    }
}

fn zero_extend(value: u64, from: Width) -> u64 {
    match from {
        Width::B1 => value as u8 as u64,
        Width::B2 => value as u16 as u64,
        Width::B4 => value as u32 as u64,
        Width::B8 => value,
    }
}

fn cmp(a: i64, b: i64, op: CmpOp, unsigned: bool) -> bool {
    if unsigned {
        let (a, b) = (a as u64, b as u64);
        match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    } else {
        match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

fn fcmp(a: f64, b: f64, op: CmpOp) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

/// Decodes and executes the instruction at the current `pc`.
pub(crate) fn step(vm: &mut Vm) -> Result<StepOutcome, VmFault> {
    let pc = vm.regs.pc;
    let word = vm
        .text
        .word(pc)
        .ok_or_else(|| fault(vm, TrapKind::BoundsViolation).with_value(pc))?;
    let rest = &vm.text.words[pc as usize..];
    let (op, len) = cvm_isa::decode_one(rest)
        .map_err(|_| fault(vm, TrapKind::BoundsViolation).with_value(word))?;
    let mut next_pc = pc + len as u64;

    match op {
        Op::Mov { dst, src } => vm.regs.set_x(dst, vm.regs.x(src)),
        Op::LoadImm { dst, imm } => vm.regs.set_x(dst, imm),
        Op::FLoadImm { dst, imm } => vm.regs.set_f(dst, imm),
        Op::Lea { dst, base, offset } => {
            let addr = (vm.regs.x(base) as i64).wrapping_add(offset as i64);
            vm.regs.set_x(dst, addr);
        }

        Op::IAdd { dst, a, b, trap_on_overflow } => {
            let (r, overflow) = vm.regs.x(a).overflowing_add(vm.regs.x(b));
            if overflow && trap_on_overflow {
                return Err(fault(vm, TrapKind::SignedIntegerOverflow));
            }
            vm.regs.set_x(dst, r);
        }
        Op::ISub { dst, a, b, trap_on_overflow } => {
            let (r, overflow) = vm.regs.x(a).overflowing_sub(vm.regs.x(b));
            if overflow && trap_on_overflow {
                return Err(fault(vm, TrapKind::SignedIntegerOverflow));
            }
            vm.regs.set_x(dst, r);
        }
        Op::IMul { dst, a, b, trap_on_overflow } => {
            let (r, overflow) = vm.regs.x(a).overflowing_mul(vm.regs.x(b));
            if overflow && trap_on_overflow {
                return Err(fault(vm, TrapKind::SignedIntegerOverflow));
            }
            vm.regs.set_x(dst, r);
        }
        Op::IDiv { dst, a, b, unsigned } => {
            let (va, vb) = (vm.regs.x(a), vm.regs.x(b));
            if vb == 0 {
                return Err(fault(vm, TrapKind::DivisionByZero));
            }
            let r = if unsigned {
                ((va as u64) / (vb as u64)) as i64
            } else {
                va.wrapping_div(vb)
            };
            vm.regs.set_x(dst, r);
        }
        Op::IMod { dst, a, b, unsigned } => {
            let (va, vb) = (vm.regs.x(a), vm.regs.x(b));
            if vb == 0 {
                return Err(fault(vm, TrapKind::DivisionByZero));
            }
            let r = if unsigned {
                ((va as u64) % (vb as u64)) as i64
            } else {
                va.wrapping_rem(vb)
            };
            vm.regs.set_x(dst, r);
        }
        Op::INeg { dst, src } => vm.regs.set_x(dst, vm.regs.x(src).wrapping_neg()),

        Op::And { dst, a, b } => vm.regs.set_x(dst, vm.regs.x(a) & vm.regs.x(b)),
        Op::Or { dst, a, b } => vm.regs.set_x(dst, vm.regs.x(a) | vm.regs.x(b)),
        Op::Xor { dst, a, b } => vm.regs.set_x(dst, vm.regs.x(a) ^ vm.regs.x(b)),
        Op::Shl { dst, a, b } => vm.regs.set_x(dst, vm.regs.x(a).wrapping_shl(vm.regs.x(b) as u32)),
        Op::Shr { dst, a, b, unsigned } => {
            let v = vm.regs.x(a);
            let n = vm.regs.x(b) as u32;
            let r = if unsigned { ((v as u64).wrapping_shr(n)) as i64 } else { v.wrapping_shr(n) };
            vm.regs.set_x(dst, r);
        }
        Op::LogNot { dst, src } => vm.regs.set_x(dst, (vm.regs.x(src) == 0) as i64),
        Op::BNot { dst, src } => vm.regs.set_x(dst, !vm.regs.x(src)),

        Op::ICmp { dst, a, b, op, unsigned } => {
            vm.regs.set_x(dst, cmp(vm.regs.x(a), vm.regs.x(b), op, unsigned) as i64)
        }

        Op::FAdd { dst, a, b } => vm.regs.set_f(dst, vm.regs.f(a) + vm.regs.f(b)),
        Op::FSub { dst, a, b } => vm.regs.set_f(dst, vm.regs.f(a) - vm.regs.f(b)),
        Op::FMul { dst, a, b } => vm.regs.set_f(dst, vm.regs.f(a) * vm.regs.f(b)),
        Op::FDiv { dst, a, b } => vm.regs.set_f(dst, vm.regs.f(a) / vm.regs.f(b)),
        Op::FNeg { dst, src } => vm.regs.set_f(dst, -vm.regs.f(src)),
        Op::FCmp { dst, a, b, op } => vm.regs.set_x(dst, fcmp(vm.regs.f(a), vm.regs.f(b), op) as i64),
        Op::I2F { dst, src } => vm.regs.set_f(dst, vm.regs.x(src) as f64),
        Op::F2I { dst, src } => vm.regs.set_x(dst, vm.regs.f(src) as i64),
        Op::RegBitMove { dst, src } => match (dst, src) {
            (AnyReg::X(d), AnyReg::F(s)) => vm.regs.set_x(d, vm.regs.f(s).to_bits() as i64),
            (AnyReg::F(d), AnyReg::X(s)) => vm.regs.set_f(d, f64::from_bits(vm.regs.x(s) as u64)),
            (AnyReg::X(d), AnyReg::X(s)) => vm.regs.set_x(d, vm.regs.x(s)),
            (AnyReg::F(d), AnyReg::F(s)) => vm.regs.set_f(d, vm.regs.f(s)),
        },

        Op::Load { dst, addr, offset, width, signed } => {
            let tagged = (vm.regs.x(addr) as i64).wrapping_add(offset as i64) as u64;
            let raw = load_width(vm, tagged, width)?;
            let v = if signed { sign_extend(raw, width) } else { zero_extend(raw, width) as i64 };
            vm.regs.set_x(dst, v);
        }
        Op::Store { addr, src, offset, width } => {
            let tagged = (vm.regs.x(addr) as i64).wrapping_add(offset as i64) as u64;
            store_width(vm, tagged, width, vm.regs.x(src) as u64)?;
        }
        Op::FLoad { dst, addr, offset, width } => {
            let tagged = (vm.regs.x(addr) as i64).wrapping_add(offset as i64) as u64;
            let raw = load_width(vm, tagged, width)?;
            vm.regs.set_f(dst, f64::from_bits(raw));
        }
        Op::FStore { addr, src, offset, width } => {
            let tagged = (vm.regs.x(addr) as i64).wrapping_add(offset as i64) as u64;
            store_width(vm, tagged, width, vm.regs.f(src).to_bits())?;
        }

        Op::SignExtend { dst, src, from } => {
            vm.regs.set_x(dst, sign_extend(vm.regs.x(src) as u64, from))
        }
        Op::ZeroExtend { dst, src, from } => {
            vm.regs.set_x(dst, zero_extend(vm.regs.x(src) as u64, from) as i64)
        }

        Op::Jmp { target } => next_pc = target,
        Op::JmpIf { cond, target, when_zero } => {
            let taken = (vm.regs.x(cond) == 0) == when_zero;
            if taken {
                next_pc = target;
            }
        }
        Op::JmpIndirect { target } => next_pc = vm.regs.x(target) as u64,
        Op::JmpTable { index, table_offset, len } => {
            let i = vm.regs.x(index);
            if i >= 0 && (i as u32) < len {
                let slot_pc = table_offset + i as u64;
                next_pc = vm
                    .text
                    .word(slot_pc)
                    .ok_or_else(|| fault(vm, TrapKind::BoundsViolation).with_value(slot_pc))?;
            }
        }

        Op::Call { target } => {
            vm.stack
                .push_u64(&mut vm.regs.sp, next_pc)
                .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
            vm.shadow_push(next_pc);
            next_pc = target;
        }
        Op::CallIndirect { target } => {
            let callee = vm.regs.x(target) as u64;
            vm.stack
                .push_u64(&mut vm.regs.sp, next_pc)
                .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
            vm.shadow_push(next_pc);
            next_pc = callee;
        }
        Op::Enter { frame_size, param_count, float_mask } => {
            vm.stack
                .push_u64(&mut vm.regs.sp, vm.regs.bp as u64)
                .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
            vm.regs.bp = vm.regs.sp;
            vm.regs.set_x(FP_REG, tag_addr(AddrRegion::Stack, vm.regs.bp as u64) as i64);
            if vm.regs.sp < frame_size as usize {
                return Err(fault(vm, TrapKind::StackOverflowCanary));
            }
            vm.regs.sp -= frame_size as usize;
            if vm.features.stack_canary {
                vm.stack
                    .push_u64(&mut vm.regs.sp, crate::heap::STACK_CANARY)
                    .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
            }
            let _ = (param_count, float_mask);
        }
        Op::Leave => {
            if vm.features.stack_canary {
                let canary = vm
                    .stack
                    .pop_u64(&mut vm.regs.sp)
                    .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
                if canary != crate::heap::STACK_CANARY {
                    return Err(fault(vm, TrapKind::StackOverflowCanary));
                }
            }
            vm.regs.sp = vm.regs.bp;
            let saved_bp = vm
                .stack
                .pop_u64(&mut vm.regs.sp)
                .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
            vm.regs.bp = saved_bp as usize;
            vm.regs.set_x(FP_REG, tag_addr(AddrRegion::Stack, vm.regs.bp as u64) as i64);

            let ret_pc = vm
                .stack
                .pop_u64(&mut vm.regs.sp)
                .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
            if ret_pc == 0 {
                return Ok(StepOutcome::Exit(vm.regs.x(crate::regs::RETURN_REG) as i32));
            }
            vm.shadow_pop_check(ret_pc, pc)?;
            next_pc = ret_pc;
        }
        Op::Adjust { delta } => {
            if delta >= 0 {
                vm.regs.sp = vm.regs.sp.saturating_add(delta as usize);
            } else {
                let d = (-delta) as usize;
                if vm.regs.sp < d {
                    return Err(fault(vm, TrapKind::StackOverflowCanary));
                }
                vm.regs.sp -= d;
            }
        }
        Op::Push { src } => {
            vm.stack
                .push_u64(&mut vm.regs.sp, vm.regs.x(src) as u64)
                .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
        }
        Op::Pop { dst } => {
            let v = vm
                .stack
                .pop_u64(&mut vm.regs.sp)
                .map_err(|_| fault(vm, TrapKind::StackOverflowCanary))?;
            vm.regs.set_x(dst, v as i64);
        }
        Op::RetBuf { dst, size } => {
            let addr = vm.heap.malloc(size as u64, pc as i64, crate::heap::VOID_KIND);
            vm.regs.set_x(dst, tag_addr(AddrRegion::Heap, addr) as i64);
        }

        Op::Malloc { dst, size } => {
            let n = vm.regs.x(size) as u64;
            let ptr = vm.heap.malloc(n, pc as i64, crate::heap::UNTRACKED);
            let tagged = if ptr == 0 { 0 } else { tag_addr(AddrRegion::Heap, ptr) };
            vm.regs.set_x(dst, tagged as i64);
        }
        Op::Free { ptr } => {
            let tagged = vm.regs.x(ptr) as u64;
            let offset = if tagged == 0 { 0 } else { resolve_addr(vm, tagged)?.1 };
            vm.heap.free(offset).map_err(|k| fault(vm, k).with_value(tagged))?;
        }
        Op::Calloc { dst, nmemb, size } => {
            let (n, s) = (vm.regs.x(nmemb) as u64, vm.regs.x(size) as u64);
            let ptr = vm.heap.calloc(n, s, pc as i64, crate::heap::UNTRACKED);
            let tagged = if ptr == 0 { 0 } else { tag_addr(AddrRegion::Heap, ptr) };
            vm.regs.set_x(dst, tagged as i64);
        }
        Op::Realloc { dst, ptr, size } => {
            let tagged = vm.regs.x(ptr) as u64;
            let offset = if tagged == 0 { 0 } else { resolve_addr(vm, tagged)?.1 };
            let n = vm.regs.x(size) as u64;
            let new_ptr = vm
                .heap
                .realloc(offset, n, pc as i64, crate::heap::UNTRACKED)
                .map_err(|k| fault(vm, k).with_value(tagged))?;
            let new_tagged = if new_ptr == 0 { 0 } else { tag_addr(AddrRegion::Heap, new_ptr) };
            vm.regs.set_x(dst, new_tagged as i64);
        }
        Op::Memcpy { dst, src, len } => {
            let (d, s, n) = (vm.regs.x(dst) as u64, vm.regs.x(src) as u64, vm.regs.x(len) as u64);
            for i in 0..n {
                let byte = load_width(vm, s.wrapping_add(i), Width::B1)?;
                store_width(vm, d.wrapping_add(i), Width::B1, byte)?;
            }
        }

        Op::CheckPointer { ptr } => {
            let tagged = vm.regs.x(ptr) as u64;
            vm.heap.check_pointer(tagged).map_err(|k| fault(vm, k).with_value(tagged))?;
        }
        Op::CheckAlignment { ptr, align } => {
            let tagged = vm.regs.x(ptr) as u64;
            let (_, offset) = resolve_addr(vm, tagged)?;
            if align > 0 && offset % align as u64 != 0 {
                return Err(fault(vm, TrapKind::AlignmentError).with_value(tagged));
            }
        }
        Op::CheckType { ptr, expected_kind } => {
            let tagged = vm.regs.x(ptr) as u64;
            let (_, offset) = resolve_addr(vm, tagged)?;
            vm.heap
                .check_type(offset, expected_kind)
                .map_err(|k| fault(vm, k).with_value(tagged))?;
        }
        Op::CheckBounds { ptr, index, width } => {
            let tagged = (vm.regs.x(ptr) as i64).wrapping_add(vm.regs.x(index) * width.bytes() as i64) as u64;
            vm.heap
                .check_bounds(tagged, width.bytes() as u64)
                .map_err(|k| fault(vm, k).with_value(tagged))?;
        }
        Op::CheckInitialized { .. } | Op::MarkInitialized { .. } => {
            // Shadow-memory initialization tracking is not modeled by this
            // VM's heap manager; these opcodes are accepted and ignored.
        }
        Op::ScopeIn | Op::ScopeOut => {}

        Op::SetJmp { dst, buf } => {
            let tagged = vm.regs.x(buf) as u64;
            store_width(vm, tagged, Width::B8, next_pc)?;
            store_width(vm, tagged.wrapping_add(8), Width::B8, vm.regs.sp as u64)?;
            store_width(vm, tagged.wrapping_add(16), Width::B8, vm.regs.bp as u64)?;
            vm.regs.set_x(dst, 0);
        }
        Op::LongJmp { buf, value } => {
            let tagged = vm.regs.x(buf) as u64;
            let ret_pc = load_width(vm, tagged, Width::B8)?;
            let sp = load_width(vm, tagged.wrapping_add(8), Width::B8)?;
            let bp = load_width(vm, tagged.wrapping_add(16), Width::B8)?;
            vm.regs.sp = sp as usize;
            vm.regs.bp = bp as usize;
            let v = vm.regs.x(value);
            vm.regs.set_x(crate::regs::RETURN_REG, if v == 0 { 1 } else { v });
            next_pc = ret_pc;
        }

        Op::CallF { index, nargs, double_mask } => {
            let mut args = Vec::with_capacity(nargs as usize);
            for i in 0..nargs as u8 {
                let r = XReg::new(i).ok_or_else(|| fault(vm, TrapKind::FfiLookupMiss))?;
                let raw = if double_mask & (1 << i) != 0 {
                    let fr = FReg::new(i).ok_or_else(|| fault(vm, TrapKind::FfiLookupMiss))?;
                    vm.regs.f(fr).to_bits()
                } else {
                    vm.regs.x(r) as u64
                };
                args.push(raw);
            }
            let result = vm
                .ffi
                .call(index, &args, double_mask)
                .map_err(|_| fault(vm, TrapKind::FfiLookupMiss))?;
            vm.regs.set_x(crate::regs::RETURN_REG, result as i64);
        }

        Op::Trap { code } => return Err(fault(vm, code)),
    }

    vm.regs.pc = next_pc;
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::NullHost;
    use crate::memory::{DataSegment, TextSegment};
    use crate::VmFeatures;
    use cvm_ffi::FfiTable;

    fn assemble(ops: &[Op]) -> TextSegment {
        let mut words = vec![0u64];
        for op in ops {
            cvm_isa::encode_one(op, &mut words);
        }
        words[0] = 1;
        TextSegment { words }
    }

    fn run_ops(ops: &[Op]) -> Result<i32, VmFault> {
        let text = assemble(ops);
        let mut vm = Vm::new(text, DataSegment::default(), FfiTable::new(), VmFeatures::default());
        vm.run(0, 0, &mut NullHost)
    }

    #[test]
    fn enter_body_leave_returns_through_return_reg() {
        let x1 = XReg::new(1).unwrap();
        let code = run_ops(&[
            Op::Enter { frame_size: 0, param_count: 0, float_mask: 0 },
            Op::LoadImm { dst: x1, imm: 42 },
            Op::Leave,
        ])
        .unwrap();
        assert_eq!(code, 42);
    }

    #[test]
    fn integer_division_by_zero_traps() {
        let (x1, x2, x3) = (XReg::new(1).unwrap(), XReg::new(2).unwrap(), XReg::new(3).unwrap());
        let err = run_ops(&[
            Op::Enter { frame_size: 0, param_count: 0, float_mask: 0 },
            Op::LoadImm { dst: x2, imm: 10 },
            Op::LoadImm { dst: x3, imm: 0 },
            Op::IDiv { dst: x1, a: x2, b: x3, unsigned: false },
            Op::Leave,
        ])
        .unwrap_err();
        assert_eq!(err.kind, TrapKind::DivisionByZero);
    }

    #[test]
    fn checked_add_traps_on_overflow() {
        let (x1, x2, x3) = (XReg::new(1).unwrap(), XReg::new(2).unwrap(), XReg::new(3).unwrap());
        let err = run_ops(&[
            Op::Enter { frame_size: 0, param_count: 0, float_mask: 0 },
            Op::LoadImm { dst: x2, imm: i64::MAX },
            Op::LoadImm { dst: x3, imm: 1 },
            Op::IAdd { dst: x1, a: x2, b: x3, trap_on_overflow: true },
            Op::Leave,
        ])
        .unwrap_err();
        assert_eq!(err.kind, TrapKind::SignedIntegerOverflow);
    }

    #[test]
    fn stack_store_and_load_round_trip_through_lea() {
        let (x1, x2, x3) = (XReg::new(1).unwrap(), XReg::new(2).unwrap(), XReg::new(3).unwrap());
        let code = run_ops(&[
            Op::Enter { frame_size: 16, param_count: 0, float_mask: 0 },
            Op::LoadImm { dst: x2, imm: 7 },
            Op::Lea { dst: x3, base: FP_REG, offset: -8 },
            Op::Store { addr: x3, src: x2, offset: 0, width: Width::B8 },
            Op::Load { dst: x1, addr: x3, offset: 0, width: Width::B8, signed: false },
            Op::Leave,
        ])
        .unwrap();
        assert_eq!(code, 7);
    }

    #[test]
    fn malloc_store_load_free_round_trip() {
        let (x1, x2, x3) = (XReg::new(1).unwrap(), XReg::new(2).unwrap(), XReg::new(3).unwrap());
        let code = run_ops(&[
            Op::Enter { frame_size: 0, param_count: 0, float_mask: 0 },
            Op::LoadImm { dst: x2, imm: 8 },
            Op::Malloc { dst: x3, size: x2 },
            Op::LoadImm { dst: x2, imm: 99 },
            Op::Store { addr: x3, src: x2, offset: 0, width: Width::B8 },
            Op::Load { dst: x1, addr: x3, offset: 0, width: Width::B8, signed: false },
            Op::Free { ptr: x3 },
            Op::Leave,
        ])
        .unwrap();
        assert_eq!(code, 99);
    }

    #[test]
    fn jmp_if_skips_when_condition_is_zero() {
        let (x1, x2) = (XReg::new(1).unwrap(), XReg::new(2).unwrap());

        // Lay out every instruction after the branch first so its word
        // offset is known, then prepend the branch with that target.
        let mut tail = Vec::new();
        cvm_isa::encode_one(&Op::LoadImm { dst: x1, imm: 111 }, &mut tail);
        let skip_words = tail.len();
        cvm_isa::encode_one(&Op::LoadImm { dst: x1, imm: 222 }, &mut tail);
        cvm_isa::encode_one(&Op::Leave, &mut tail);

        let mut words = vec![0u64];
        cvm_isa::encode_one(&Op::Enter { frame_size: 0, param_count: 0, float_mask: 0 }, &mut words);
        cvm_isa::encode_one(&Op::LoadImm { dst: x2, imm: 0 }, &mut words);
        let mut branch = Vec::new();
        cvm_isa::encode_one(&Op::JmpIf { cond: x2, target: 0, when_zero: true }, &mut branch);
        let target = (words.len() + branch.len() + skip_words) as u64;
        branch.clear();
        cvm_isa::encode_one(&Op::JmpIf { cond: x2, target, when_zero: true }, &mut branch);
        words.extend(branch);
        words.extend(tail);
        words[0] = 1;

        let text = TextSegment { words };
        let mut vm = Vm::new(text, DataSegment::default(), FfiTable::new(), VmFeatures::default());
        let code = vm.run(0, 0, &mut NullHost).unwrap();
        assert_eq!(code, 222);
    }
}
