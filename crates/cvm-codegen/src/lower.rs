//! AST -> `cvm_isa::Op` lowering for one function body (spec.md §4.3/§4.4).
//!
//! Every expression lowers through one of two paths: [`FuncLower::lower_expr`]
//! for a value, [`FuncLower::lower_lvalue`] for an addressable location (a
//! `(base register, byte offset)` pair that plugs directly into `Load`/
//! `Store`'s own `offset` field). Scratch registers are a simple bump
//! allocator over `x8..x30`/`f8..f31`, reset at each statement boundary —
//! nothing survives a statement, so nothing needs freeing.

use std::collections::HashMap;

use cvm_ast::node::{BinOp, NodeKind, UnOp};
use cvm_ast::obj::ObjKind;
use cvm_ast::{Ast, NodeId, ObjId};
use cvm_diagnostics::{CompileResult, Diagnostic};
use cvm_isa::{AnyReg, CmpOp, FReg, Op, Width, XReg};
use cvm_support::intern::{Interner, Symbol};
use cvm_types::{TypeId, TypeKind, TypeStore};

use crate::abi;
use crate::patch::{FixupTarget, FuncBuilder};

/// Immutable lookup tables shared across every function in a translation
/// unit; borrowed for the duration of lowering one function.
pub struct FuncCtx<'a> {
    pub types: &'a TypeStore,
    pub interner: &'a Interner,
    pub global_offsets: &'a HashMap<ObjId, u64>,
    pub string_offsets: &'a HashMap<Symbol, u64>,
    pub ffi_index: &'a HashMap<ObjId, u32>,
}

#[derive(Clone, Copy)]
enum Val {
    X(XReg),
    F(FReg),
}

#[derive(Default)]
struct SwitchFrame {
    positions: Vec<usize>,
    default_pos: Option<usize>,
}

struct FuncLower<'a, 'ast> {
    ast: &'ast mut Ast,
    ctx: &'a FuncCtx<'a>,
    b: FuncBuilder,
    next_x: u8,
    next_f: u8,
    break_stack: Vec<Vec<usize>>,
    continue_stack: Vec<Vec<usize>>,
    switch_stack: Vec<SwitchFrame>,
    returns_aggregate: bool,
    sret_offset: Option<i64>,
    variadic_base_offset: i64,
}

fn to_cmp(op: BinOp) -> CmpOp {
    match op {
        BinOp::Eq => CmpOp::Eq,
        BinOp::Ne => CmpOp::Ne,
        BinOp::Lt => CmpOp::Lt,
        BinOp::Le => CmpOp::Le,
        BinOp::Gt => CmpOp::Gt,
        BinOp::Ge => CmpOp::Ge,
        _ => unreachable!("to_cmp called on a non-comparison BinOp"),
    }
}

fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Gathers every `case`/`default` under `node` in DFS order, without
/// descending into a nested `switch` (its cases dispatch against its own
/// condition, not the enclosing one).
fn collect_switch_cases(ast: &Ast, node: NodeId) -> (Vec<(i64, i64)>, bool) {
    let mut cases = Vec::new();
    let mut has_default = false;
    collect_walk(ast, node, &mut cases, &mut has_default);
    (cases, has_default)
}

fn collect_walk(ast: &Ast, node: NodeId, cases: &mut Vec<(i64, i64)>, has_default: &mut bool) {
    match &ast.node(node).kind {
        NodeKind::Block(stmts) => {
            for &s in stmts {
                collect_walk(ast, s, cases, has_default);
            }
        }
        NodeKind::Case { lo, hi, body } => {
            cases.push((*lo, *hi));
            collect_walk(ast, *body, cases, has_default);
        }
        NodeKind::Default(body) => {
            *has_default = true;
            collect_walk(ast, *body, cases, has_default);
        }
        NodeKind::Label { body, .. } => collect_walk(ast, *body, cases, has_default),
        NodeKind::If { then, els, .. } => {
            collect_walk(ast, *then, cases, has_default);
            if let Some(e) = els {
                collect_walk(ast, *e, cases, has_default);
            }
        }
        NodeKind::For { body, .. } | NodeKind::DoWhile { body, .. } => collect_walk(ast, *body, cases, has_default),
        NodeKind::Switch { .. } => {}
        _ => {}
    }
}

impl<'a, 'ast> FuncLower<'a, 'ast> {
    fn emit(&mut self, op: Op) -> usize {
        self.b.emit(op)
    }

    fn alloc_x(&mut self) -> XReg {
        assert!(self.next_x < abi::FP_REG.index() as u8, "expression nests deeper than the scratch integer register budget");
        let r = XReg::new(self.next_x).expect("next_x stays below 32 by construction");
        self.next_x += 1;
        r
    }

    fn alloc_f(&mut self) -> FReg {
        assert!(self.next_f < 32, "expression nests deeper than the scratch float register budget");
        let r = FReg::new(self.next_f).expect("next_f stays below 32 by construction");
        self.next_f += 1;
        r
    }

    fn reset_scratch(&mut self) {
        self.next_x = 8;
        self.next_f = 8;
    }

    fn as_x(&mut self, v: Val) -> XReg {
        match v {
            Val::X(r) => r,
            Val::F(f) => {
                let r = self.alloc_x();
                self.emit(Op::F2I { dst: r, src: f });
                r
            }
        }
    }

    fn as_f(&mut self, v: Val) -> FReg {
        match v {
            Val::F(r) => r,
            Val::X(x) => {
                let r = self.alloc_f();
                self.emit(Op::I2F { dst: r, src: x });
                r
            }
        }
    }

    fn zero_val(&mut self) -> Val {
        let r = self.alloc_x();
        self.emit(Op::LoadImm { dst: r, imm: 0 });
        Val::X(r)
    }

    fn coerce(&mut self, v: Val, ty: TypeId) -> Val {
        if self.is_float_ty(ty) {
            Val::F(self.as_f(v))
        } else {
            Val::X(self.as_x(v))
        }
    }

    fn node_ty(&self, node: NodeId) -> TypeId {
        self.ast.node(node).ty.expect("node missing a resolved type after parsing")
    }

    fn is_float_ty(&self, ty: TypeId) -> bool {
        self.ctx.types.get(ty).is_float()
    }

    fn operand_is_float(&self, node: NodeId) -> bool {
        self.is_float_ty(self.node_ty(node))
    }

    fn width_of(&self, ty: TypeId) -> Width {
        match self.ctx.types.size_of(ty).unwrap_or(8) {
            1 => Width::B1,
            2 => Width::B2,
            4 => Width::B4,
            _ => Width::B8,
        }
    }

    fn elem_type(&self, ty: TypeId) -> TypeId {
        match &self.ctx.types.get(ty).kind {
            TypeKind::Ptr { base } | TypeKind::Array { base, .. } | TypeKind::Vla { base, .. } => *base,
            _ => ty,
        }
    }

    fn member_offset(&self, struct_ty: TypeId, field: Symbol) -> (i64, TypeId) {
        let members = match &self.ctx.types.get(struct_ty).kind {
            TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => members,
            _ => return (0, struct_ty),
        };
        for m in members {
            if m.name == field {
                return (m.offset as i64, m.ty);
            }
        }
        (0, struct_ty)
    }

    fn materialize_addr(&mut self, (base, offset): (XReg, i32)) -> XReg {
        if offset == 0 {
            base
        } else {
            let r = self.alloc_x();
            self.emit(Op::Lea { dst: r, base, offset });
            r
        }
    }

    fn lvalue_of_obj(&mut self, obj: ObjId) -> CompileResult<(XReg, i32)> {
        enum Kind {
            Local(i64),
            Global,
            Function,
        }
        let kind = match &self.ast.obj(obj).kind {
            ObjKind::Local { frame_offset } => Kind::Local(*frame_offset),
            ObjKind::Global { .. } => Kind::Global,
            ObjKind::Function { .. } => Kind::Function,
        };
        match kind {
            Kind::Local(off) => Ok((abi::FP_REG, off as i32)),
            Kind::Global => {
                let off = *self.ctx.global_offsets.get(&obj).expect("global missing a data-segment offset");
                let r = self.alloc_x();
                self.emit(Op::LoadImm { dst: r, imm: abi::tag_addr(abi::AddrRegion::Data, off) as i64 });
                Ok((r, 0))
            }
            Kind::Function => {
                let r = self.alloc_x();
                self.b.emit_patchable(Op::LoadImm { dst: r, imm: 0 }, FixupTarget::FuncEntry(obj));
                Ok((r, 0))
            }
        }
    }

    fn rvalue_of_lvalue(&mut self, lv: (XReg, i32), ty: TypeId) -> Val {
        let (is_aggregate_like, is_float, is_unsigned) = {
            let t = self.ctx.types.get(ty);
            (t.is_aggregate() || matches!(t.kind, TypeKind::Array { .. } | TypeKind::Vla { .. }), t.is_float(), t.is_unsigned)
        };
        if is_aggregate_like {
            Val::X(self.materialize_addr(lv))
        } else if is_float {
            let width = self.width_of(ty);
            let dst = self.alloc_f();
            self.emit(Op::FLoad { dst, addr: lv.0, offset: lv.1, width });
            Val::F(dst)
        } else {
            let width = self.width_of(ty);
            let dst = self.alloc_x();
            self.emit(Op::Load { dst, addr: lv.0, offset: lv.1, width, signed: !is_unsigned });
            Val::X(dst)
        }
    }

    fn store_lvalue(&mut self, lv: (XReg, i32), ty: TypeId, val: Val) {
        let (is_aggregate, is_float) = {
            let t = self.ctx.types.get(ty);
            (t.is_aggregate(), t.is_float())
        };
        if is_aggregate {
            let src = self.as_x(val);
            let dst_addr = self.materialize_addr(lv);
            let size = self.ctx.types.size_of(ty).unwrap_or(0);
            let len = self.alloc_x();
            self.emit(Op::LoadImm { dst: len, imm: size as i64 });
            self.emit(Op::Memcpy { dst: dst_addr, src, len });
        } else if is_float {
            let width = self.width_of(ty);
            let f = self.as_f(val);
            self.emit(Op::FStore { addr: lv.0, src: f, offset: lv.1, width });
        } else {
            let width = self.width_of(ty);
            let x = self.as_x(val);
            self.emit(Op::Store { addr: lv.0, src: x, offset: lv.1, width });
        }
    }

    fn lower_lvalue(&mut self, node: NodeId) -> CompileResult<(XReg, i32)> {
        let kind = self.ast.node(node).kind.clone();
        match kind {
            NodeKind::VarRef(obj) => self.lvalue_of_obj(obj),
            NodeKind::Unary { op: UnOp::Deref, operand } => {
                let v = self.lower_expr(operand)?;
                Ok((self.as_x(v), 0))
            }
            NodeKind::Member { base, field, via_pointer } => {
                let base_ty = self.node_ty(base);
                let struct_ty = if via_pointer { self.elem_type(base_ty) } else { base_ty };
                let (off, _) = self.member_offset(struct_ty, field);
                let (base_reg, base_off) = if via_pointer {
                    let v = self.lower_expr(base)?;
                    (self.as_x(v), 0)
                } else {
                    self.lower_lvalue(base)?
                };
                Ok((base_reg, base_off + off as i32))
            }
            NodeKind::Index { base, index } => {
                let base_ty = self.node_ty(base);
                let elem_ty = self.elem_type(base_ty);
                let elem_size = self.ctx.types.size_of(elem_ty).unwrap_or(1) as i64;
                let base_val = self.lower_expr(base)?;
                let base_reg = self.as_x(base_val);
                if let NodeKind::IntLit(c) = self.ast.node(index).kind {
                    Ok((base_reg, (c * elem_size) as i32))
                } else {
                    let idx_val = self.lower_expr(index)?;
                    let idx = self.as_x(idx_val);
                    let size_reg = self.alloc_x();
                    self.emit(Op::LoadImm { dst: size_reg, imm: elem_size });
                    let scaled = self.alloc_x();
                    self.emit(Op::IMul { dst: scaled, a: idx, b: size_reg, trap_on_overflow: false });
                    let addr = self.alloc_x();
                    self.emit(Op::IAdd { dst: addr, a: base_reg, b: scaled, trap_on_overflow: false });
                    Ok((addr, 0))
                }
            }
            NodeKind::CompoundLiteral { init, .. } => {
                let v = self.lower_expr(init)?;
                Ok((self.as_x(v), 0))
            }
            other => {
                let span = self.ast.node(node).span.clone();
                let _ = other;
                Err(Diagnostic::new(span, "expression is not assignable"))
            }
        }
    }

    fn lower_condition(&mut self, node: NodeId) -> CompileResult<XReg> {
        if self.operand_is_float(node) {
            let v = self.lower_expr(node)?;
            let f = self.as_f(v);
            let zero = self.alloc_f();
            self.emit(Op::FLoadImm { dst: zero, imm: 0.0 });
            let dst = self.alloc_x();
            self.emit(Op::FCmp { dst, a: f, b: zero, op: CmpOp::Ne });
            Ok(dst)
        } else {
            let v = self.lower_expr(node)?;
            let x = self.as_x(v);
            let not_once = self.alloc_x();
            self.emit(Op::LogNot { dst: not_once, src: x });
            let dst = self.alloc_x();
            self.emit(Op::LogNot { dst, src: not_once });
            Ok(dst)
        }
    }

    fn lower_logical(&mut self, op: BinOp, lhs: NodeId, rhs: NodeId) -> CompileResult<Val> {
        let lhs_bool = self.lower_condition(lhs)?;
        let dst = self.alloc_x();
        self.emit(Op::Mov { dst, src: lhs_bool });
        let when_zero = matches!(op, BinOp::LogAnd);
        let skip_idx = self.emit(Op::JmpIf { cond: lhs_bool, target: 0, when_zero });
        let rhs_bool = self.lower_condition(rhs)?;
        self.emit(Op::Mov { dst, src: rhs_bool });
        let skip_pos = self.b.len();
        self.b.patch_local(skip_idx, skip_pos);
        Ok(Val::X(dst))
    }

    fn binop_values(&mut self, op: BinOp, a: Val, b: Val, result_ty: TypeId) -> Val {
        use BinOp::*;
        let result_is_float = self.is_float_ty(result_ty);
        let float_mode = matches!(a, Val::F(_)) || matches!(b, Val::F(_)) || result_is_float;
        if float_mode {
            let a = self.as_f(a);
            let b = self.as_f(b);
            match op {
                Add => { let dst = self.alloc_f(); self.emit(Op::FAdd { dst, a, b }); Val::F(dst) }
                Sub => { let dst = self.alloc_f(); self.emit(Op::FSub { dst, a, b }); Val::F(dst) }
                Mul => { let dst = self.alloc_f(); self.emit(Op::FMul { dst, a, b }); Val::F(dst) }
                Div => { let dst = self.alloc_f(); self.emit(Op::FDiv { dst, a, b }); Val::F(dst) }
                Eq | Ne | Lt | Le | Gt | Ge => { let dst = self.alloc_x(); self.emit(Op::FCmp { dst, a, b, op: to_cmp(op) }); Val::X(dst) }
                _ => unreachable!("bitwise/logical op reached binop_values in float mode"),
            }
        } else {
            let a = self.as_x(a);
            let b = self.as_x(b);
            let unsigned = self.ctx.types.get(result_ty).is_unsigned;
            match op {
                Add => { let dst = self.alloc_x(); self.emit(Op::IAdd { dst, a, b, trap_on_overflow: !unsigned }); Val::X(dst) }
                Sub => { let dst = self.alloc_x(); self.emit(Op::ISub { dst, a, b, trap_on_overflow: !unsigned }); Val::X(dst) }
                Mul => { let dst = self.alloc_x(); self.emit(Op::IMul { dst, a, b, trap_on_overflow: !unsigned }); Val::X(dst) }
                Div => { let dst = self.alloc_x(); self.emit(Op::IDiv { dst, a, b, unsigned }); Val::X(dst) }
                Mod => { let dst = self.alloc_x(); self.emit(Op::IMod { dst, a, b, unsigned }); Val::X(dst) }
                BitAnd => { let dst = self.alloc_x(); self.emit(Op::And { dst, a, b }); Val::X(dst) }
                BitOr => { let dst = self.alloc_x(); self.emit(Op::Or { dst, a, b }); Val::X(dst) }
                BitXor => { let dst = self.alloc_x(); self.emit(Op::Xor { dst, a, b }); Val::X(dst) }
                Shl => { let dst = self.alloc_x(); self.emit(Op::Shl { dst, a, b }); Val::X(dst) }
                Shr => { let dst = self.alloc_x(); self.emit(Op::Shr { dst, a, b, unsigned }); Val::X(dst) }
                Eq | Ne | Lt | Le | Gt | Ge => { let dst = self.alloc_x(); self.emit(Op::ICmp { dst, a, b, op: to_cmp(op), unsigned }); Val::X(dst) }
                LogAnd | LogOr => unreachable!("short-circuit operators are handled by lower_logical"),
            }
        }
    }

    fn lower_binary(&mut self, op: BinOp, lhs: NodeId, rhs: NodeId, result_ty: TypeId) -> CompileResult<Val> {
        if matches!(op, BinOp::LogAnd | BinOp::LogOr) {
            return self.lower_logical(op, lhs, rhs);
        }
        let a = self.lower_expr(lhs)?;
        let b = self.lower_expr(rhs)?;
        Ok(self.binop_values(op, a, b, result_ty))
    }

    fn lower_incdec(&mut self, op: UnOp, operand: NodeId) -> CompileResult<Val> {
        let lv = self.lower_lvalue(operand)?;
        let ty = self.node_ty(operand);
        let old = self.rvalue_of_lvalue(lv, ty);
        let is_dec = matches!(op, UnOp::PreDec | UnOp::PostDec);
        let new = if self.is_float_ty(ty) {
            let o = self.as_f(old);
            let one = self.alloc_f();
            self.emit(Op::FLoadImm { dst: one, imm: 1.0 });
            let dst = self.alloc_f();
            if is_dec {
                self.emit(Op::FSub { dst, a: o, b: one });
            } else {
                self.emit(Op::FAdd { dst, a: o, b: one });
            }
            Val::F(dst)
        } else {
            let o = self.as_x(old);
            let step_size = match &self.ctx.types.get(ty).kind {
                TypeKind::Ptr { base } => self.ctx.types.size_of(*base).unwrap_or(1),
                _ => 1,
            };
            let step = self.alloc_x();
            self.emit(Op::LoadImm { dst: step, imm: step_size as i64 });
            let dst = self.alloc_x();
            if is_dec {
                self.emit(Op::ISub { dst, a: o, b: step, trap_on_overflow: false });
            } else {
                self.emit(Op::IAdd { dst, a: o, b: step, trap_on_overflow: false });
            }
            Val::X(dst)
        };
        self.store_lvalue(lv, ty, new);
        Ok(if matches!(op, UnOp::PreInc | UnOp::PreDec) { new } else { old })
    }

    fn lower_unary(&mut self, op: UnOp, operand: NodeId) -> CompileResult<Val> {
        match op {
            UnOp::Neg => {
                let v = self.lower_expr(operand)?;
                if self.operand_is_float(operand) {
                    let a = self.as_f(v);
                    let dst = self.alloc_f();
                    self.emit(Op::FNeg { dst, src: a });
                    Ok(Val::F(dst))
                } else {
                    let a = self.as_x(v);
                    let dst = self.alloc_x();
                    self.emit(Op::INeg { dst, src: a });
                    Ok(Val::X(dst))
                }
            }
            UnOp::Not => {
                let is_float = self.operand_is_float(operand);
                let v = self.lower_expr(operand)?;
                if is_float {
                    let f = self.as_f(v);
                    let zero = self.alloc_f();
                    self.emit(Op::FLoadImm { dst: zero, imm: 0.0 });
                    let dst = self.alloc_x();
                    self.emit(Op::FCmp { dst, a: f, b: zero, op: CmpOp::Eq });
                    Ok(Val::X(dst))
                } else {
                    let x = self.as_x(v);
                    let dst = self.alloc_x();
                    self.emit(Op::LogNot { dst, src: x });
                    Ok(Val::X(dst))
                }
            }
            UnOp::BitNot => {
                let v = self.lower_expr(operand)?;
                let x = self.as_x(v);
                let dst = self.alloc_x();
                self.emit(Op::BNot { dst, src: x });
                Ok(Val::X(dst))
            }
            UnOp::Deref => {
                let ty = self.elem_type(self.node_ty(operand));
                let v = self.lower_expr(operand)?;
                let ptr = self.as_x(v);
                Ok(self.rvalue_of_lvalue((ptr, 0), ty))
            }
            UnOp::Addr => {
                let lv = self.lower_lvalue(operand)?;
                Ok(Val::X(self.materialize_addr(lv)))
            }
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => self.lower_incdec(op, operand),
        }
    }

    fn lower_assign(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<Val> {
        let lv = self.lower_lvalue(lhs)?;
        let ty = self.node_ty(lhs);
        let rhs_val = self.lower_expr(rhs)?;
        let coerced = self.coerce(rhs_val, ty);
        self.store_lvalue(lv, ty, coerced);
        Ok(coerced)
    }

    fn lower_compound_assign(&mut self, op: BinOp, lhs: NodeId, rhs: NodeId) -> CompileResult<Val> {
        let lv = self.lower_lvalue(lhs)?;
        let ty = self.node_ty(lhs);
        let cur = self.rvalue_of_lvalue(lv, ty);
        let mut rhs_val = self.lower_expr(rhs)?;
        if matches!(op, BinOp::Add | BinOp::Sub) {
            let ptr_elem = match &self.ctx.types.get(ty).kind {
                TypeKind::Ptr { base } => Some(*base),
                _ => None,
            };
            if let Some(base) = ptr_elem {
                let elem_size = self.ctx.types.size_of(base).unwrap_or(1);
                if elem_size != 1 {
                    let r = self.as_x(rhs_val);
                    let size_reg = self.alloc_x();
                    self.emit(Op::LoadImm { dst: size_reg, imm: elem_size as i64 });
                    let scaled = self.alloc_x();
                    self.emit(Op::IMul { dst: scaled, a: r, b: size_reg, trap_on_overflow: false });
                    rhs_val = Val::X(scaled);
                }
            }
        }
        let result = self.binop_values(op, cur, rhs_val, ty);
        self.store_lvalue(lv, ty, result);
        Ok(result)
    }

    fn lower_conditional(&mut self, cond: NodeId, then: NodeId, els: NodeId) -> CompileResult<Val> {
        let is_float = self.operand_is_float(then);
        let c = self.lower_condition(cond)?;
        let else_idx = self.emit(Op::JmpIf { cond: c, target: 0, when_zero: true });
        let then_val = self.lower_expr(then)?;
        let result = if is_float {
            let f = self.as_f(then_val);
            let dst = self.alloc_f();
            self.emit(Op::RegBitMove { dst: AnyReg::F(dst), src: AnyReg::F(f) });
            Val::F(dst)
        } else {
            let x = self.as_x(then_val);
            let dst = self.alloc_x();
            self.emit(Op::Mov { dst, src: x });
            Val::X(dst)
        };
        let end_idx = self.emit(Op::Jmp { target: 0 });
        let else_pos = self.b.len();
        self.b.patch_local(else_idx, else_pos);
        let els_val = self.lower_expr(els)?;
        match result {
            Val::F(dst) => {
                let f = self.as_f(els_val);
                self.emit(Op::RegBitMove { dst: AnyReg::F(dst), src: AnyReg::F(f) });
            }
            Val::X(dst) => {
                let x = self.as_x(els_val);
                self.emit(Op::Mov { dst, src: x });
            }
        }
        let end_pos = self.b.len();
        self.b.patch_local(end_idx, end_pos);
        Ok(result)
    }

    fn lower_cast(&mut self, operand: NodeId, to_ty: TypeId) -> CompileResult<Val> {
        let from_float = self.operand_is_float(operand);
        let to_float = self.is_float_ty(to_ty);
        let val = self.lower_expr(operand)?;
        if to_float {
            Ok(Val::F(self.as_f(val)))
        } else if from_float {
            Ok(Val::X(self.as_x(val)))
        } else {
            let x = self.as_x(val);
            let size = self.ctx.types.size_of(to_ty).unwrap_or(8);
            if size >= 8 {
                return Ok(Val::X(x));
            }
            let width = self.width_of(to_ty);
            let unsigned = self.ctx.types.get(to_ty).is_unsigned;
            let dst = self.alloc_x();
            if unsigned {
                self.emit(Op::ZeroExtend { dst, src: x, from: width });
            } else {
                self.emit(Op::SignExtend { dst, src: x, from: width });
            }
            Ok(Val::X(dst))
        }
    }

    fn lower_cas(&mut self, ptr: NodeId, expected: NodeId, desired: NodeId) -> CompileResult<Val> {
        let p = self.lower_expr(ptr)?;
        let ptr_reg = self.as_x(p);
        let e = self.lower_expr(expected)?;
        let exp_reg = self.as_x(e);
        let d = self.lower_expr(desired)?;
        let des_reg = self.as_x(d);
        let old = self.alloc_x();
        self.emit(Op::Load { dst: old, addr: ptr_reg, offset: 0, width: Width::B8, signed: false });
        let eq = self.alloc_x();
        self.emit(Op::ICmp { dst: eq, a: old, b: exp_reg, op: CmpOp::Eq, unsigned: true });
        let skip = self.emit(Op::JmpIf { cond: eq, target: 0, when_zero: true });
        self.emit(Op::Store { addr: ptr_reg, src: des_reg, offset: 0, width: Width::B8 });
        let skip_pos = self.b.len();
        self.b.patch_local(skip, skip_pos);
        Ok(Val::X(old))
    }

    fn lower_atomic_exchange(&mut self, ptr: NodeId, value: NodeId) -> CompileResult<Val> {
        let p = self.lower_expr(ptr)?;
        let ptr_reg = self.as_x(p);
        let v = self.lower_expr(value)?;
        let val_reg = self.as_x(v);
        let old = self.alloc_x();
        self.emit(Op::Load { dst: old, addr: ptr_reg, offset: 0, width: Width::B8, signed: false });
        self.emit(Op::Store { addr: ptr_reg, src: val_reg, offset: 0, width: Width::B8 });
        Ok(Val::X(old))
    }

    fn lower_va_start(&mut self, ap: NodeId) -> CompileResult<Val> {
        let lv = self.lower_lvalue(ap)?;
        let base = self.variadic_base_offset;
        let cursor = self.alloc_x();
        self.emit(Op::Lea { dst: cursor, base: abi::FP_REG, offset: base as i32 });
        let ap_ty = self.node_ty(ap);
        self.store_lvalue(lv, ap_ty, Val::X(cursor));
        Ok(self.zero_val())
    }

    fn lower_va_arg(&mut self, ap: NodeId, ty: TypeId) -> CompileResult<Val> {
        let lv = self.lower_lvalue(ap)?;
        let ap_ty = self.node_ty(ap);
        let cursor_val = self.rvalue_of_lvalue(lv, ap_ty);
        let cursor = self.as_x(cursor_val);
        let val = self.rvalue_of_lvalue((cursor, 0), ty);
        let size = self.ctx.types.size_of(ty).unwrap_or(8).max(8);
        let step = self.alloc_x();
        self.emit(Op::LoadImm { dst: step, imm: align8(size) as i64 });
        let advanced = self.alloc_x();
        self.emit(Op::IAdd { dst: advanced, a: cursor, b: step, trap_on_overflow: false });
        self.store_lvalue(lv, ap_ty, Val::X(advanced));
        Ok(val)
    }

    fn lower_ffi_call(&mut self, index: u32, args: &[NodeId], ret_ty: TypeId) -> CompileResult<Val> {
        let mut vals: Vec<Val> = Vec::with_capacity(args.len());
        let mut double_mask: u16 = 0;
        for (i, &a) in args.iter().enumerate() {
            let v = self.lower_expr(a)?;
            if matches!(v, Val::F(_)) {
                double_mask |= 1 << i;
            }
            vals.push(v);
        }
        for (i, &v) in vals.iter().enumerate() {
            match v {
                Val::X(r) => {
                    if let Some(dst) = abi::ffi_int_reg(i) {
                        self.emit(Op::Mov { dst, src: r });
                    }
                }
                Val::F(f) => {
                    if let Some(dst) = FReg::new(i as u8) {
                        self.emit(Op::RegBitMove { dst: AnyReg::F(dst), src: AnyReg::F(f) });
                    }
                }
            }
        }
        self.emit(Op::CallF { index, nargs: args.len() as u8, double_mask });
        if self.is_float_ty(ret_ty) {
            let dst = self.alloc_f();
            let src = abi::float_return_reg();
            self.emit(Op::RegBitMove { dst: AnyReg::F(dst), src: AnyReg::F(src) });
            Ok(Val::F(dst))
        } else if matches!(self.ctx.types.get(ret_ty).kind, TypeKind::Void) {
            Ok(self.zero_val())
        } else {
            let dst = self.alloc_x();
            let src = abi::return_reg();
            self.emit(Op::Mov { dst, src });
            Ok(Val::X(dst))
        }
    }

    /// `malloc`/`free`/`calloc`/`realloc`/`memcpy`/`setjmp`/`longjmp` compile
    /// to dedicated `cvm_isa::Op` variants rather than an FFI call, so the
    /// heap's allocation tracking (canaries, UAF, leak detection) and the
    /// jump-buffer's pc/sp/bp capture see every call site (spec.md §9).
    /// Returns `None` for any other name, so the caller falls through to a
    /// regular direct/FFI/indirect call.
    fn lower_builtin_call(&mut self, name: &str, args: &[NodeId]) -> CompileResult<Option<Val>> {
        match (name, args.len()) {
            ("malloc", 1) => {
                let size_val = self.lower_expr(args[0])?;
                let size = self.as_x(size_val);
                let dst = self.alloc_x();
                self.emit(Op::Malloc { dst, size });
                Ok(Some(Val::X(dst)))
            }
            ("calloc", 2) => {
                let nmemb_val = self.lower_expr(args[0])?;
                let nmemb = self.as_x(nmemb_val);
                let size_val = self.lower_expr(args[1])?;
                let size = self.as_x(size_val);
                let dst = self.alloc_x();
                self.emit(Op::Calloc { dst, nmemb, size });
                Ok(Some(Val::X(dst)))
            }
            ("realloc", 2) => {
                let ptr_val = self.lower_expr(args[0])?;
                let ptr = self.as_x(ptr_val);
                let size_val = self.lower_expr(args[1])?;
                let size = self.as_x(size_val);
                let dst = self.alloc_x();
                self.emit(Op::Realloc { dst, ptr, size });
                Ok(Some(Val::X(dst)))
            }
            ("free", 1) => {
                let ptr_val = self.lower_expr(args[0])?;
                let ptr = self.as_x(ptr_val);
                self.emit(Op::Free { ptr });
                Ok(Some(self.zero_val()))
            }
            ("memcpy", 3) => {
                let dst_val = self.lower_expr(args[0])?;
                let dst = self.as_x(dst_val);
                let src_val = self.lower_expr(args[1])?;
                let src = self.as_x(src_val);
                let len_val = self.lower_expr(args[2])?;
                let len = self.as_x(len_val);
                self.emit(Op::Memcpy { dst, src, len });
                // Real memcpy returns its destination pointer.
                Ok(Some(Val::X(dst)))
            }
            ("setjmp", 1) => {
                let buf_val = self.lower_expr(args[0])?;
                let buf = self.as_x(buf_val);
                let dst = self.alloc_x();
                self.emit(Op::SetJmp { dst, buf });
                Ok(Some(Val::X(dst)))
            }
            ("longjmp", 2) => {
                let buf_val = self.lower_expr(args[0])?;
                let buf = self.as_x(buf_val);
                let value_val = self.lower_expr(args[1])?;
                let value = self.as_x(value_val);
                self.emit(Op::LongJmp { buf, value });
                Ok(Some(self.zero_val()))
            }
            _ => Ok(None),
        }
    }

    fn lower_call(&mut self, callee: NodeId, callee_ty: TypeId, args: &[NodeId], ret_buf: Option<ObjId>, by_stack: bool) -> CompileResult<Val> {
        let direct_obj = match &self.ast.node(callee).kind {
            NodeKind::FuncAddr(obj) => Some(*obj),
            _ => None,
        };
        let (func_is_variadic, ret_ty) = match &self.ctx.types.get(callee_ty).kind {
            TypeKind::Func { is_variadic, ret, .. } => (*is_variadic, *ret),
            _ => (false, callee_ty),
        };

        if let Some(obj) = direct_obj {
            let name = self.ctx.interner.resolve(self.ast.obj(obj).name);
            if let Some(v) = self.lower_builtin_call(name, args)? {
                return Ok(v);
            }
            if let Some(&idx) = self.ctx.ffi_index.get(&obj) {
                return self.lower_ffi_call(idx, args, ret_ty);
            }
        }

        // The callee pointer, for an indirect call, is evaluated before any
        // argument is moved into its fixed register: a nested call inside
        // an argument expression would otherwise clobber x1..x7/f0..f7
        // while setting up its own arguments.
        let callee_reg: Option<XReg> = if direct_obj.is_none() {
            let v = self.lower_expr(callee)?;
            Some(self.as_x(v))
        } else {
            None
        };

        let mut arg_vals: Vec<Val> = Vec::with_capacity(args.len() + 1);
        let mut arg_is_float: Vec<bool> = Vec::with_capacity(args.len() + 1);

        let sret_reg = if by_stack {
            let size = self.ctx.types.size_of(ret_ty).unwrap_or(0) as u32;
            let r = self.alloc_x();
            self.emit(Op::RetBuf { dst: r, size });
            if let Some(buf_obj) = ret_buf {
                let lv = self.lvalue_of_obj(buf_obj)?;
                let buf_ty = self.ast.obj(buf_obj).ty;
                self.store_lvalue(lv, buf_ty, Val::X(r));
            }
            Some(r)
        } else {
            None
        };
        if let Some(r) = sret_reg {
            arg_vals.push(Val::X(r));
            arg_is_float.push(false);
        }
        for &a in args {
            let v = self.lower_expr(a)?;
            arg_is_float.push(matches!(v, Val::F(_)));
            arg_vals.push(v);
        }

        let sret_budget = if sret_reg.is_some() { 1 } else { 0 };
        let int_budget = if func_is_variadic { 0 } else { abi::INT_ARG_COUNT.saturating_sub(sret_budget) };
        let float_budget = if func_is_variadic { 0 } else { abi::FLOAT_ARG_COUNT };
        let slots = abi::classify_args(&arg_is_float, int_budget, float_budget);

        let mut stack_vals: Vec<Val> = Vec::new();
        for (slot, &val) in slots.iter().zip(&arg_vals) {
            if let abi::ArgSlot::Stack(_) = slot {
                stack_vals.push(val);
            }
        }
        for val in stack_vals.iter().rev() {
            match *val {
                Val::X(r) => {
                    self.emit(Op::Push { src: r });
                }
                Val::F(f) => {
                    let r = self.alloc_x();
                    self.emit(Op::RegBitMove { dst: AnyReg::X(r), src: AnyReg::F(f) });
                    self.emit(Op::Push { src: r });
                }
            }
        }
        for (slot, &val) in slots.iter().zip(&arg_vals) {
            match slot {
                abi::ArgSlot::Int(i) => {
                    let dst = abi::int_arg_reg(*i).expect("int arg slot within budget");
                    let x = self.as_x(val);
                    self.emit(Op::Mov { dst, src: x });
                }
                abi::ArgSlot::Float(i) => {
                    let dst = abi::float_arg_reg(*i).expect("float arg slot within budget");
                    let f = self.as_f(val);
                    self.emit(Op::RegBitMove { dst: AnyReg::F(dst), src: AnyReg::F(f) });
                }
                abi::ArgSlot::Stack(_) => {}
            }
        }

        if let Some(obj) = direct_obj {
            self.b.emit_patchable(Op::Call { target: 0 }, FixupTarget::FuncEntry(obj));
        } else {
            let target = callee_reg.expect("indirect call always computes a callee register");
            self.emit(Op::CallIndirect { target });
        }
        if !stack_vals.is_empty() {
            self.emit(Op::Adjust { delta: (stack_vals.len() * 8) as i32 });
        }

        if by_stack {
            let buf_obj = ret_buf.expect("a by_stack call always carries a ret_buf local");
            let lv = self.lvalue_of_obj(buf_obj)?;
            Ok(self.rvalue_of_lvalue(lv, ret_ty))
        } else if self.is_float_ty(ret_ty) {
            let dst = self.alloc_f();
            let src = abi::float_return_reg();
            self.emit(Op::RegBitMove { dst: AnyReg::F(dst), src: AnyReg::F(src) });
            Ok(Val::F(dst))
        } else {
            let dst = self.alloc_x();
            let src = abi::return_reg();
            self.emit(Op::Mov { dst, src });
            Ok(Val::X(dst))
        }
    }

    fn lower_stmt_expr(&mut self, stmts: &[NodeId]) -> CompileResult<Val> {
        let Some((&last, init)) = stmts.split_last() else {
            return Ok(self.zero_val());
        };
        for &s in init {
            self.lower_stmt(s)?;
        }
        match self.ast.node(last).kind.clone() {
            NodeKind::ExprStmt(e) => self.lower_expr(e),
            _ => {
                self.lower_stmt(last)?;
                Ok(self.zero_val())
            }
        }
    }

    fn lower_expr(&mut self, node: NodeId) -> CompileResult<Val> {
        let kind = self.ast.node(node).kind.clone();
        match kind {
            NodeKind::IntLit(v) => {
                let r = self.alloc_x();
                self.emit(Op::LoadImm { dst: r, imm: v });
                Ok(Val::X(r))
            }
            NodeKind::FloatLit(v) => {
                let r = self.alloc_f();
                self.emit(Op::FLoadImm { dst: r, imm: v });
                Ok(Val::F(r))
            }
            NodeKind::StringLit(sym) => {
                let off = *self.ctx.string_offsets.get(&sym).expect("string literal missing from the pool");
                let r = self.alloc_x();
                self.emit(Op::LoadImm { dst: r, imm: abi::tag_addr(abi::AddrRegion::Data, off) as i64 });
                Ok(Val::X(r))
            }
            NodeKind::VarRef(obj) => {
                if matches!(self.ast.obj(obj).kind, ObjKind::Function { .. }) {
                    let lv = self.lvalue_of_obj(obj)?;
                    Ok(Val::X(lv.0))
                } else {
                    let lv = self.lvalue_of_obj(obj)?;
                    let ty = self.ast.obj(obj).ty;
                    Ok(self.rvalue_of_lvalue(lv, ty))
                }
            }
            NodeKind::LabelAddr(label) => {
                let r = self.alloc_x();
                self.b.emit_goto(Op::LoadImm { dst: r, imm: 0 }, label);
                Ok(Val::X(r))
            }
            NodeKind::FuncAddr(obj) => {
                let r = self.alloc_x();
                self.b.emit_patchable(Op::LoadImm { dst: r, imm: 0 }, FixupTarget::FuncEntry(obj));
                Ok(Val::X(r))
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let ty = self.node_ty(node);
                self.lower_binary(op, lhs, rhs, ty)
            }
            NodeKind::Unary { op, operand } => self.lower_unary(op, operand),
            NodeKind::Assign { lhs, rhs } => self.lower_assign(lhs, rhs),
            NodeKind::CompoundAssign { op, lhs, rhs } => self.lower_compound_assign(op, lhs, rhs),
            NodeKind::Comma { lhs, rhs } => {
                self.lower_expr(lhs)?;
                self.lower_expr(rhs)
            }
            NodeKind::Conditional { cond, then, els } => self.lower_conditional(cond, then, els),
            NodeKind::Cast { operand } => {
                let ty = self.node_ty(node);
                self.lower_cast(operand, ty)
            }
            NodeKind::Sizeof(inner) => {
                let ty = self.node_ty(inner);
                let size = self.ctx.types.size_of(ty).unwrap_or(0);
                let r = self.alloc_x();
                self.emit(Op::LoadImm { dst: r, imm: size as i64 });
                Ok(Val::X(r))
            }
            NodeKind::SizeofType(ty) => {
                let size = self.ctx.types.size_of(ty).unwrap_or(0);
                let r = self.alloc_x();
                self.emit(Op::LoadImm { dst: r, imm: size as i64 });
                Ok(Val::X(r))
            }
            NodeKind::Alignof(ty) => {
                let align = self.ctx.types.align_of(ty).unwrap_or(1);
                let r = self.alloc_x();
                self.emit(Op::LoadImm { dst: r, imm: align as i64 });
                Ok(Val::X(r))
            }
            NodeKind::Generic { selector, assocs } => {
                let sel_ty = self.node_ty(selector);
                let mut chosen = None;
                let mut default = None;
                for (ty_opt, expr) in &assocs {
                    match ty_opt {
                        Some(t) if self.ctx.types.compatible(*t, sel_ty) => {
                            chosen = Some(*expr);
                            break;
                        }
                        None => default = Some(*expr),
                        _ => {}
                    }
                }
                let expr = chosen.or(default).expect("_Generic with no matching association and no default");
                self.lower_expr(expr)
            }
            NodeKind::Member { .. } => {
                let lv = self.lower_lvalue(node)?;
                let ty = self.node_ty(node);
                Ok(self.rvalue_of_lvalue(lv, ty))
            }
            NodeKind::Index { .. } => {
                let lv = self.lower_lvalue(node)?;
                let ty = self.node_ty(node);
                Ok(self.rvalue_of_lvalue(lv, ty))
            }
            NodeKind::CompoundLiteral { init, .. } => self.lower_expr(init),
            NodeKind::Call { callee, callee_ty, args, ret_buf, by_stack } => self.lower_call(callee, callee_ty, &args, ret_buf, by_stack),
            NodeKind::Cas { ptr, expected, desired } => self.lower_cas(ptr, expected, desired),
            NodeKind::AtomicExchange { ptr, value } => self.lower_atomic_exchange(ptr, value),
            NodeKind::VaStart { ap, .. } => self.lower_va_start(ap),
            NodeKind::VaArg { ap, ty } => self.lower_va_arg(ap, ty),
            NodeKind::VaEnd { .. } => Ok(self.zero_val()),
            NodeKind::StmtExpr(stmts) => self.lower_stmt_expr(&stmts),
            other => unreachable!("{other:?} used in expression position"),
        }
    }

    fn record_switch_target(&mut self, pos: usize) {
        if let Some(f) = self.switch_stack.last_mut() {
            f.positions.push(pos);
        }
    }

    fn record_switch_default(&mut self, pos: usize) {
        if let Some(f) = self.switch_stack.last_mut() {
            f.default_pos = Some(pos);
        }
    }

    fn lower_if(&mut self, cond: NodeId, then: NodeId, els: Option<NodeId>) -> CompileResult<()> {
        self.reset_scratch();
        let c = self.lower_condition(cond)?;
        let else_idx = self.emit(Op::JmpIf { cond: c, target: 0, when_zero: true });
        self.lower_stmt(then)?;
        if let Some(e) = els {
            let end_idx = self.emit(Op::Jmp { target: 0 });
            let else_pos = self.b.len();
            self.b.patch_local(else_idx, else_pos);
            self.lower_stmt(e)?;
            let end_pos = self.b.len();
            self.b.patch_local(end_idx, end_pos);
        } else {
            let else_pos = self.b.len();
            self.b.patch_local(else_idx, else_pos);
        }
        Ok(())
    }

    fn lower_for(&mut self, init: Option<NodeId>, cond: Option<NodeId>, step: Option<NodeId>, body: NodeId) -> CompileResult<()> {
        if let Some(i) = init {
            self.lower_stmt(i)?;
        }
        let loop_start = self.b.len();
        self.reset_scratch();
        let end_idx = match cond {
            Some(c) => {
                let r = self.lower_condition(c)?;
                Some(self.emit(Op::JmpIf { cond: r, target: 0, when_zero: true }))
            }
            None => None,
        };
        self.break_stack.push(Vec::new());
        self.continue_stack.push(Vec::new());
        self.lower_stmt(body)?;
        let continue_point = self.b.len();
        for idx in self.continue_stack.pop().unwrap() {
            self.b.patch_local(idx, continue_point);
        }
        if let Some(s) = step {
            self.reset_scratch();
            self.lower_expr(s)?;
        }
        self.emit(Op::Jmp { target: loop_start as u64 });
        let end_pos = self.b.len();
        if let Some(idx) = end_idx {
            self.b.patch_local(idx, end_pos);
        }
        for idx in self.break_stack.pop().unwrap() {
            self.b.patch_local(idx, end_pos);
        }
        Ok(())
    }

    fn lower_do_while(&mut self, body: NodeId, cond: NodeId) -> CompileResult<()> {
        let loop_start = self.b.len();
        self.break_stack.push(Vec::new());
        self.continue_stack.push(Vec::new());
        self.lower_stmt(body)?;
        let continue_point = self.b.len();
        for idx in self.continue_stack.pop().unwrap() {
            self.b.patch_local(idx, continue_point);
        }
        self.reset_scratch();
        let c = self.lower_condition(cond)?;
        self.emit(Op::JmpIf { cond: c, target: loop_start as u64, when_zero: false });
        let end_pos = self.b.len();
        for idx in self.break_stack.pop().unwrap() {
            self.b.patch_local(idx, end_pos);
        }
        Ok(())
    }

    fn lower_switch(&mut self, cond: NodeId, body: NodeId) -> CompileResult<()> {
        self.reset_scratch();
        let cond_val = self.lower_expr(cond)?;
        let cond_reg = self.as_x(cond_val);
        let (cases, _has_default) = collect_switch_cases(self.ast, body);

        let mut dispatch_idx = Vec::with_capacity(cases.len());
        for (lo, hi) in &cases {
            let lo_reg = self.alloc_x();
            self.emit(Op::LoadImm { dst: lo_reg, imm: *lo });
            let diff = self.alloc_x();
            self.emit(Op::ISub { dst: diff, a: cond_reg, b: lo_reg, trap_on_overflow: false });
            let width_reg = self.alloc_x();
            self.emit(Op::LoadImm { dst: width_reg, imm: *hi - *lo });
            let cmp = self.alloc_x();
            self.emit(Op::ICmp { dst: cmp, a: diff, b: width_reg, op: CmpOp::Le, unsigned: true });
            let idx = self.emit(Op::JmpIf { cond: cmp, target: 0, when_zero: false });
            dispatch_idx.push(idx);
        }
        let default_jmp = self.emit(Op::Jmp { target: 0 });

        self.switch_stack.push(SwitchFrame::default());
        self.break_stack.push(Vec::new());
        self.lower_stmt(body)?;
        let end_pos = self.b.len();
        let frame = self.switch_stack.pop().unwrap();
        for (idx, pos) in dispatch_idx.into_iter().zip(frame.positions.into_iter()) {
            self.b.patch_local(idx, pos);
        }
        let default_target = frame.default_pos.unwrap_or(end_pos);
        self.b.patch_local(default_jmp, default_target);
        for idx in self.break_stack.pop().unwrap() {
            self.b.patch_local(idx, end_pos);
        }
        Ok(())
    }

    fn lower_return(&mut self, value: Option<NodeId>) -> CompileResult<()> {
        if let Some(expr) = value {
            if self.returns_aggregate {
                let sret_off = self.sret_offset.expect("an aggregate-returning function always has an sret slot");
                let sret_reg = self.alloc_x();
                self.emit(Op::Load { dst: sret_reg, addr: abi::FP_REG, offset: sret_off as i32, width: Width::B8, signed: false });
                let lv = self.lower_lvalue(expr)?;
                let src_addr = self.materialize_addr(lv);
                let ty = self.node_ty(expr);
                let size = self.ctx.types.size_of(ty).unwrap_or(0);
                let len = self.alloc_x();
                self.emit(Op::LoadImm { dst: len, imm: size as i64 });
                self.emit(Op::Memcpy { dst: sret_reg, src: src_addr, len });
                let ret = abi::return_reg();
                self.emit(Op::Mov { dst: ret, src: sret_reg });
            } else {
                let val = self.lower_expr(expr)?;
                match val {
                    Val::X(r) => {
                        let dst = abi::return_reg();
                        self.emit(Op::Mov { dst, src: r });
                    }
                    Val::F(f) => {
                        let dst = abi::float_return_reg();
                        self.emit(Op::RegBitMove { dst: AnyReg::F(dst), src: AnyReg::F(f) });
                    }
                }
            }
        }
        self.emit(Op::Leave);
        Ok(())
    }

    fn lower_memzero(&mut self, obj: ObjId) -> CompileResult<()> {
        let lv = self.lvalue_of_obj(obj)?;
        let ty = self.ast.obj(obj).ty;
        let size = self.ctx.types.size_of(ty).unwrap_or(0) as i64;
        let zero = self.alloc_x();
        self.emit(Op::LoadImm { dst: zero, imm: 0 });
        let mut off = 0i64;
        while off + 8 <= size {
            self.emit(Op::Store { addr: lv.0, src: zero, offset: (lv.1 as i64 + off) as i32, width: Width::B8 });
            off += 8;
        }
        while off + 4 <= size {
            self.emit(Op::Store { addr: lv.0, src: zero, offset: (lv.1 as i64 + off) as i32, width: Width::B4 });
            off += 4;
        }
        while off + 2 <= size {
            self.emit(Op::Store { addr: lv.0, src: zero, offset: (lv.1 as i64 + off) as i32, width: Width::B2 });
            off += 2;
        }
        while off < size {
            self.emit(Op::Store { addr: lv.0, src: zero, offset: (lv.1 as i64 + off) as i32, width: Width::B1 });
            off += 1;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, node: NodeId) -> CompileResult<()> {
        let kind = self.ast.node(node).kind.clone();
        match kind {
            NodeKind::Block(stmts) => {
                for s in stmts {
                    self.lower_stmt(s)?;
                }
            }
            NodeKind::ExprStmt(e) => {
                self.reset_scratch();
                self.lower_expr(e)?;
            }
            NodeKind::If { cond, then, els } => self.lower_if(cond, then, els)?,
            NodeKind::For { init, cond, step, body } => self.lower_for(init, cond, step, body)?,
            NodeKind::DoWhile { body, cond } => self.lower_do_while(body, cond)?,
            NodeKind::Switch { cond, body } => self.lower_switch(cond, body)?,
            NodeKind::Case { body, .. } => {
                let pos = self.b.len();
                self.record_switch_target(pos);
                self.lower_stmt(body)?;
            }
            NodeKind::Default(body) => {
                let pos = self.b.len();
                self.record_switch_default(pos);
                self.lower_stmt(body)?;
            }
            NodeKind::Label { name, body } => {
                self.b.mark_label(name);
                self.lower_stmt(body)?;
            }
            NodeKind::Goto(label) => {
                self.b.emit_goto(Op::Jmp { target: 0 }, label);
            }
            NodeKind::GotoIndirect(target) => {
                self.reset_scratch();
                let v = self.lower_expr(target)?;
                let r = self.as_x(v);
                self.emit(Op::JmpIndirect { target: r });
            }
            NodeKind::Break => {
                let idx = self.emit(Op::Jmp { target: 0 });
                self.break_stack.last_mut().expect("break outside a loop or switch").push(idx);
            }
            NodeKind::Continue => {
                let idx = self.emit(Op::Jmp { target: 0 });
                self.continue_stack.last_mut().expect("continue outside a loop").push(idx);
            }
            NodeKind::Return(value) => {
                self.reset_scratch();
                self.lower_return(value)?;
            }
            NodeKind::MemZero(obj) => self.lower_memzero(obj)?,
            _ => {
                self.reset_scratch();
                self.lower_expr(node)?;
            }
        }
        Ok(())
    }
}

/// Lowers one function's body into a flat, self-contained [`FuncBuilder`]
/// (gotos resolved against this function's own label table; cross-function
/// fixups — `Call`/`FuncAddr`/`VarRef` of another function — are left for
/// [`crate::generate`] to patch once every function's text offset is known).
pub fn lower_function<'a>(
    ast: &mut Ast,
    layout: &crate::frame::FrameLayout,
    ctx: &'a FuncCtx<'a>,
    func_obj: ObjId,
) -> CompileResult<FuncBuilder> {
    let (body, params, returns_aggregate) = {
        let obj = ast.obj(func_obj);
        let ret_ty = match &ctx.types.get(obj.ty).kind {
            TypeKind::Func { ret, .. } => *ret,
            _ => obj.ty,
        };
        let returns_aggregate = ctx.types.get(ret_ty).is_aggregate();
        let (body, params) = match &obj.kind {
            ObjKind::Function { body, params, .. } => (*body, params.clone()),
            _ => unreachable!("lower_function called on a non-function Obj"),
        };
        (body, params, returns_aggregate)
    };

    let mut lw = FuncLower {
        ast,
        ctx,
        b: FuncBuilder::new(),
        next_x: 8,
        next_f: 8,
        break_stack: Vec::new(),
        continue_stack: Vec::new(),
        switch_stack: Vec::new(),
        returns_aggregate,
        sret_offset: layout.sret_offset,
        variadic_base_offset: layout.variadic_base_offset,
    };

    lw.emit(Op::Enter { frame_size: layout.frame_size, param_count: params.len() as u8, float_mask: 0 });

    if let Some(off) = lw.sret_offset {
        let sret_arg = abi::int_arg_reg(0).expect("int arg slot 0 always exists");
        lw.emit(Op::Store { addr: abi::FP_REG, src: sret_arg, offset: off as i32, width: Width::B8 });
    }
    for (&param, slot) in params.iter().zip(layout.param_slots.iter()) {
        let frame_offset = match &lw.ast.obj(param).kind {
            ObjKind::Local { frame_offset } => *frame_offset,
            _ => unreachable!("a function parameter is always a Local Obj"),
        };
        match slot {
            abi::ArgSlot::Int(i) => {
                let src = abi::int_arg_reg(*i).expect("int arg slot within budget");
                lw.emit(Op::Store { addr: abi::FP_REG, src, offset: frame_offset as i32, width: Width::B8 });
            }
            abi::ArgSlot::Float(i) => {
                let src = abi::float_arg_reg(*i).expect("float arg slot within budget");
                lw.emit(Op::FStore { addr: abi::FP_REG, src, offset: frame_offset as i32, width: Width::B8 });
            }
            abi::ArgSlot::Stack(_) => {}
        }
    }

    if let Some(body_node) = body {
        lw.lower_stmt(body_node)?;
    }
    // A function whose body never reaches an explicit `return` falls off
    // the end here; the caller discards any garbage left in the return
    // register, matching a C function with no trailing `return`.
    lw.emit(Op::Leave);

    let b = lw.b;
    let mut b = b;
    b.resolve_gotos().map_err(|label| {
        let span = ast_span_placeholder();
        Diagnostic::new(span, format!("undefined label '{}'", ctx.interner.resolve(label)))
    })?;
    Ok(b)
}

fn ast_span_placeholder() -> cvm_diagnostics::Span {
    cvm_diagnostics::Span::new("<generated>", 0, 0, "")
}
