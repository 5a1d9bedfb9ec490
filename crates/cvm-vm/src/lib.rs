//! The VM executor (spec.md §4.4), its heap manager (§4.5), and debugger
//! hooks (§4.8).
//!
//! Addresses visible to compiled code are plain 64-bit integers, but they
//! must disambiguate which of the three byte-addressable segments (heap,
//! data, stack) they point into without the VM owning one giant shared
//! buffer. This crate tags every address with its segment in the top two
//! bits (`AddrRegion`) — the same spirit as the source's single `int*
//! memory` array sliced into regions by base pointer, reworked so the
//! regions can be three independently-growable `Vec<u8>`s instead of one
//! fixed-size block. Code addresses (`pc`, call targets, function-address
//! takes) are untagged plain word offsets into the text segment; they
//! never alias with tagged data/heap/stack addresses because the two are
//! never compared or loaded through the same opcode.
//!
//! By calling convention `x31` mirrors the current frame's base pointer as
//! a tagged stack address (the register-file analogue of RISC-V's
//! software frame-pointer convention on `x8`, given the VM's `bp` is
//! otherwise a VM-internal index rather than a general register).

pub mod debug;
pub mod heap;
pub mod memory;
pub mod regs;

mod dispatch;

pub use debug::{DebugAction, DebugHost, NullHost, StopReason};
pub use heap::{Heap, HeapFeatures, LeakRecord};
pub use memory::{DataSegment, Stack, TextSegment};
pub use regs::RegisterFile;

use std::fmt;

use cvm_isa::{TrapKind, XReg};
use cvm_ffi::FfiTable;

use debug::Debugger;

/// Frame-pointer-by-convention register (see module docs).
pub const FP_REG: XReg = match XReg::new(31) {
    Some(r) => r,
    None => unreachable!(),
};

const REGION_SHIFT: u32 = 62;
const REGION_MASK: u64 = 0x3 << REGION_SHIFT;
const OFFSET_MASK: u64 = !REGION_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrRegion {
    Heap,
    Data,
    Stack,
}

pub fn tag_addr(region: AddrRegion, offset: u64) -> u64 {
    let tag: u64 = match region {
        AddrRegion::Heap => 1,
        AddrRegion::Data => 2,
        AddrRegion::Stack => 3,
    };
    (tag << REGION_SHIFT) | (offset & OFFSET_MASK)
}

pub fn untag_addr(addr: u64) -> Option<(AddrRegion, u64)> {
    if addr == 0 {
        return None;
    }
    let offset = addr & OFFSET_MASK;
    match addr >> REGION_SHIFT {
        1 => Some((AddrRegion::Heap, offset)),
        2 => Some((AddrRegion::Data, offset)),
        3 => Some((AddrRegion::Stack, offset)),
        _ => None,
    }
}

/// A runtime fault (spec.md §7): the trap category plus whatever
/// diagnostic context was available (offending address, allocation PC).
#[derive(Debug, Clone)]
pub struct VmFault {
    pub kind: TrapKind,
    pub pc: u64,
    pub offending_value: Option<u64>,
    pub alloc_pc: Option<i64>,
}

impl VmFault {
    pub fn new(kind: TrapKind, pc: u64) -> Self {
        VmFault { kind, pc, offending_value: None, alloc_pc: None }
    }

    pub fn with_value(mut self, v: u64) -> Self {
        self.offending_value = Some(v);
        self
    }

    pub fn with_alloc_pc(mut self, pc: i64) -> Self {
        self.alloc_pc = Some(pc);
        self
    }
}

impl fmt::Display for VmFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "+{:-<60}+", "")?;
        writeln!(f, "| {:<58} |", self.kind.category())?;
        if let Some(v) = self.offending_value {
            writeln!(f, "| value = {:#018x}{:<37}|", v, "")?;
        }
        writeln!(f, "| pc = {:#010x}{:<43}|", self.pc, "")?;
        if let Some(apc) = self.alloc_pc {
            writeln!(f, "| allocated at pc = {:#010x}{:<30}|", apc, "")?;
        }
        write!(f, "+{:-<60}+", "")
    }
}

impl std::error::Error for VmFault {}

pub enum StepOutcome {
    Continue,
    Exit(i32),
}

/// Runtime safety features toggled by `cvm-cli`'s `-b -f -t -z -s -k -p -l
/// -i` flags (spec.md §6.1), plus CFI shadow-stack checking.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmFeatures {
    pub heap: HeapFeatures,
    pub stack_canary: bool,
    pub cfi_shadow_stack: bool,
}

pub struct Vm {
    pub text: TextSegment,
    pub data: DataSegment,
    pub stack: Stack,
    pub heap: Heap,
    pub ffi: FfiTable,
    pub regs: RegisterFile,
    pub debugger: Debugger,
    pub features: VmFeatures,
    shadow_stack: Vec<u64>,
    cycle_count: u64,
    pub trace: bool,
}

const DEFAULT_STACK_BYTES: usize = 1 << 20;
const DEFAULT_HEAP_BYTES: usize = 1 << 22;

impl Vm {
    pub fn new(text: TextSegment, data: DataSegment, ffi: FfiTable, features: VmFeatures) -> Self {
        Vm {
            text,
            data,
            stack: Stack::new(DEFAULT_STACK_BYTES),
            heap: Heap::new(DEFAULT_HEAP_BYTES, features.heap),
            ffi,
            regs: RegisterFile::new(),
            debugger: Debugger::new(),
            features,
            shadow_stack: Vec::new(),
            cycle_count: 0,
            trace: false,
        }
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Runs the program from its entry point with `argc`/`argv` loaded into
    /// the first two argument registers (`x1`, `x2`; `x0` is the zero
    /// sink), returning the compiled program's exit status (spec.md §6.3).
    /// A sentinel return address of zero is pushed first; the dispatch
    /// loop ends when `leave` pops it back off (spec.md §4.4).
    pub fn run(&mut self, argc: i64, argv: u64, host: &mut dyn DebugHost) -> Result<i32, VmFault> {
        self.regs.pc = self.text.entry();
        self.regs.sp = self.stack.top();
        self.stack.push_u64(&mut self.regs.sp, 0).map_err(|_| VmFault::new(TrapKind::StackOverflowCanary, self.regs.pc))?;
        self.regs.bp = self.regs.sp;
        self.regs.set_x(XReg::new(1).unwrap(), argc);
        self.regs.set_x(XReg::new(2).unwrap(), argv as i64);

        loop {
            if let Some(reason) = self.debugger.is_stopped_at(self.regs.pc, self.regs.bp) {
                let action = host.on_stop(self.regs.pc, reason);
                self.debugger.apply(action, self.regs.pc, self.regs.bp);
            }
            self.cycle_count += 1;
            match dispatch::step(self)? {
                StepOutcome::Continue => {}
                StepOutcome::Exit(code) => return Ok(code),
            }
        }
    }

    pub fn shadow_push(&mut self, ret_pc: u64) {
        if self.features.cfi_shadow_stack {
            self.shadow_stack.push(ret_pc);
        }
    }

    pub fn shadow_pop_check(&mut self, observed: u64, pc: u64) -> Result<(), VmFault> {
        if !self.features.cfi_shadow_stack {
            return Ok(());
        }
        match self.shadow_stack.pop() {
            Some(expected) if expected == observed => Ok(()),
            _ => Err(VmFault::new(TrapKind::CfiShadowStackMismatch, pc).with_value(observed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_tagging_round_trips_each_region() {
        for region in [AddrRegion::Heap, AddrRegion::Data, AddrRegion::Stack] {
            let tagged = tag_addr(region, 0x1234);
            assert_eq!(untag_addr(tagged), Some((region, 0x1234)));
        }
    }

    #[test]
    fn null_is_never_a_tagged_address() {
        assert_eq!(untag_addr(0), None);
    }

    #[test]
    fn fault_display_includes_category_and_pc() {
        let fault = VmFault::new(TrapKind::DivisionByZero, 0x40);
        let rendered = fault.to_string();
        assert!(rendered.contains("DIVISION BY ZERO"));
        assert!(rendered.contains("40"));
    }
}
