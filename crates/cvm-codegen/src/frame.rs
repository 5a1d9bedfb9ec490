//! Per-function stack frame layout (spec.md §4.3's prologue sequence).
//!
//! Locals are assigned negative bp-relative offsets in declaration order.
//! Parameters are classified per [`crate::abi::classify_args`]: the first
//! few of each register bank (int, float) land in a frame slot like any
//! other local so the prologue can spill them; whatever doesn't fit is
//! read from a positive bp-relative offset the caller pushed before `Call`.

use std::collections::HashMap;

use cvm_ast::obj::ObjKind;
use cvm_ast::{Ast, ObjId};
use cvm_types::TypeStore;

use crate::abi::{self, ArgSlot, SAVED_REGS_GAP};

pub struct FrameLayout {
    pub frame_size: u32,
    /// Where each named parameter (by position) was classified, so the
    /// prologue knows which physical register (if any) to spill.
    pub param_slots: Vec<ArgSlot>,
    /// Frame slot the hidden struct-return pointer is spilled into, for a
    /// function whose return type is a struct/union passed through
    /// `Op::RetBuf` (spec.md §4.3). It occupies the first integer argument
    /// register, ahead of every named parameter.
    pub sret_offset: Option<i64>,
    /// True when every named parameter is stack-passed rather than
    /// register-passed (variadic functions, see DESIGN.md's simplified
    /// calling convention for `va_start`/`va_arg`).
    pub all_stack: bool,
    /// Frame offset of the first stack-passed variadic argument slot
    /// (`va_start`'s starting cursor), once every named parameter (which,
    /// for a variadic function, are all stack-passed too) is accounted for.
    pub variadic_base_offset: i64,
}

fn align_up(n: i64, align: i64) -> i64 {
    (n + align - 1) & !(align - 1)
}

/// Assigns every local and parameter of `func_obj` a `frame_offset`,
/// writing it back into the `Ast` (`ObjKind::Local::frame_offset`, a
/// placeholder `0` until this pass runs).
pub fn layout_frame(ast: &mut Ast, types: &TypeStore, func_obj: ObjId, returns_aggregate: bool) -> FrameLayout {
    let (params, locals, is_variadic) = match &ast.obj(func_obj).kind {
        ObjKind::Function { params, locals, is_variadic, .. } => (params.clone(), locals.clone(), *is_variadic),
        _ => unreachable!("layout_frame called on a non-function Obj"),
    };

    // Variadic functions push every argument (named and extra) on the
    // stack, so `va_arg` can scan forward from the last named parameter
    // without also having to unpack a separate register-save area.
    let all_stack = is_variadic;
    let sret_budget = if returns_aggregate { 1 } else { 0 };
    let is_float: Vec<bool> = params.iter().map(|&p| types.get(ast.obj(p).ty).is_float()).collect();
    let param_slots: Vec<ArgSlot> = if all_stack {
        (0..is_float.len()).map(ArgSlot::Stack).collect()
    } else {
        abi::classify_args(&is_float, abi::INT_ARG_COUNT.saturating_sub(sret_budget), abi::FLOAT_ARG_COUNT)
    };

    let mut cursor: i64 = 0;
    let mut assign_local = |ast: &mut Ast, obj: ObjId| {
        let ty = ast.obj(obj).ty;
        let size = types.size_of(ty).unwrap_or(8).max(1) as i64;
        let align = types.align_of(ty).unwrap_or(8) as i64;
        cursor = align_up(cursor + size, align.max(1));
        let offset = -cursor;
        if let ObjKind::Local { frame_offset } = &mut ast.obj_mut(obj).kind {
            *frame_offset = offset;
        }
    };

    // The sret pointer spills first (it rides in the first integer
    // argument register), so named register-resident parameters follow it.
    let sret_offset = if returns_aggregate && !all_stack {
        cursor = align_up(cursor + 8, 8);
        Some(-cursor)
    } else {
        None
    };

    for (&param, slot) in params.iter().zip(&param_slots) {
        if !matches!(slot, ArgSlot::Stack(_)) {
            assign_local(ast, param);
        }
    }
    for &local in &locals {
        assign_local(ast, local);
    }

    let frame_size = align_up(cursor, 16).max(0) as u32;

    // Stack-passed parameters live above the frame, at a positive offset
    // past the saved bp + return address. The hidden sret pointer, when
    // itself stack-passed (a variadic function returning a struct — a
    // corner case no real test program here exercises), takes slot 0.
    let stack_base = if returns_aggregate && all_stack { 1 } else { 0 };
    let mut max_stack_index = -1i64;
    for (&param, slot) in params.iter().zip(&param_slots) {
        if let ArgSlot::Stack(i) = slot {
            let stack_index = stack_base + *i as i64;
            max_stack_index = max_stack_index.max(stack_index);
            let offset = SAVED_REGS_GAP + 8 * stack_index;
            if let ObjKind::Local { frame_offset } = &mut ast.obj_mut(param).kind {
                *frame_offset = offset;
            }
        }
    }
    let variadic_base_offset = SAVED_REGS_GAP + 8 * (max_stack_index + 1);

    FrameLayout { frame_size, param_slots, sret_offset, all_stack, variadic_base_offset }
}

/// Maps each parameter `ObjId` to its [`ArgSlot`], for callers that need
/// the classification keyed by object rather than position.
pub fn param_slot_map(ast: &Ast, func_obj: ObjId, layout: &FrameLayout) -> HashMap<ObjId, ArgSlot> {
    let params = match &ast.obj(func_obj).kind {
        ObjKind::Function { params, .. } => params.clone(),
        _ => unreachable!("param_slot_map called on a non-function Obj"),
    };
    params.into_iter().zip(layout.param_slots.iter().copied()).collect()
}
