//! Forward-reference patching. A function's body is lowered into one flat
//! [`cvm_isa::Op`] stream with every jump/call target left as a *local op
//! index* (`goto` targets, `break`/`continue` edges, function addresses);
//! [`crate::assemble`] resolves those into real word offsets once every
//! function's length is known, the same two-pass shape a simple assembler
//! uses for forward branches.

use cvm_isa::Op;
use cvm_support::ids::ObjId;
use std::collections::HashMap;

use cvm_support::intern::Symbol;

/// Where a patchable instruction's target eventually resolves.
#[derive(Clone, Copy, Debug)]
pub enum FixupTarget {
    /// An op index within the same function, already known (a loop
    /// back-edge, or a forward label resolved before the function ends).
    Local(usize),
    /// A `goto`'s target label, resolved against [`FuncBuilder::labels`]
    /// once the whole function body has been visited (the label may
    /// follow the `goto` in source order).
    Goto(Symbol),
    /// Another function's entry point, resolved once every function's
    /// length is known (spec.md §4.3's call-patch table).
    FuncEntry(ObjId),
}

/// Accumulates one function's instruction stream plus its outstanding
/// fixups. `builder.len()` while lowering doubles as "the op index the next
/// emitted instruction will get", which is what backward branches (loop
/// conditions, `continue`) record directly as a [`FixupTarget::Local`].
#[derive(Default)]
pub struct FuncBuilder {
    pub ops: Vec<Op>,
    pub fixups: Vec<(usize, FixupTarget)>,
    pub labels: HashMap<Symbol, usize>,
    pending_gotos: Vec<(usize, Symbol)>,
}

impl FuncBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn emit(&mut self, op: Op) -> usize {
        let idx = self.ops.len();
        self.ops.push(op);
        idx
    }

    /// Emits a placeholder jump/call whose target isn't known yet and
    /// records the fixup against it.
    pub fn emit_patchable(&mut self, op: Op, target: FixupTarget) -> usize {
        let idx = self.emit(op);
        self.fixups.push((idx, target));
        idx
    }

    pub fn mark_label(&mut self, name: Symbol) {
        self.labels.insert(name, self.ops.len());
    }

    pub fn emit_goto(&mut self, op: Op, label: Symbol) -> usize {
        let idx = self.emit(op);
        self.pending_gotos.push((idx, label));
        idx
    }

    /// Resolves every `goto` recorded in this function against its label
    /// table. Unknown labels produce `None` so the caller can raise a
    /// diagnostic instead of emitting an unreachable jump.
    pub fn resolve_gotos(&mut self) -> Result<(), Symbol> {
        for (idx, label) in std::mem::take(&mut self.pending_gotos) {
            match self.labels.get(&label) {
                Some(&target) => self.fixups.push((idx, FixupTarget::Local(target))),
                None => return Err(label),
            }
        }
        Ok(())
    }

    /// Overwrites a placeholder op's final operand word target in place.
    /// Used by loop/if/switch lowering once the "jump past the body"
    /// target is known immediately (no cross-function patching needed).
    pub fn patch_local(&mut self, op_index: usize, target: usize) {
        patch_op_target(&mut self.ops[op_index], target as u64);
    }
}

/// Rewrites the target field of a patchable op in place. Every variant
/// `cvm-codegen` emits as "patchable" carries its target as the final
/// encoded word (see `cvm_isa::decode::encode_one`), but at the `Op` level
/// it's simplest to just match the field directly.
pub fn patch_op_target(op: &mut Op, target: u64) {
    match op {
        Op::Jmp { target: t } => *t = target,
        Op::JmpIf { target: t, .. } => *t = target,
        Op::Call { target: t } => *t = target,
        Op::LoadImm { imm, .. } => *imm = target as i64,
        other => unreachable!("{other:?} is not a patchable op"),
    }
}
