/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Expression & Statement Lowerer (spec.md §4.3): walks one function's IR
//! tree and drives the assembler, ABI classifier, and cast table to emit
//! its body. Integers live in RAX, floats in XMM0, long doubles on the x87
//! stack, addresses in RAX, matching the original's single-accumulator
//! register discipline.

use crate::codegen::abi::{self, ArgClassifier, ArgLocation, StructSlot};
use crate::codegen::cast_table;
use crate::codegen::mca::{Assembler, PcLabel, Reg};
use crate::codegen::registry::Registry;
use crate::errors::CodegenError;
use crate::ir::{CaseRange, Function, NodeKind, TypeKind, VarId};
use std::collections::HashMap;

pub struct Lowerer<'a> {
    pub asm: &'a mut Assembler,
    pub registry: &'a mut Registry,
    pub func: &'a Function,
    pub return_label: crate::codegen::mca::PcLabel,
    /// Named `goto` targets within this function, pre-allocated before
    /// lowering starts so `&&label` (GNU label-as-value) and forward
    /// `goto`s always resolve to a label that will eventually be placed.
    named_labels: HashMap<String, PcLabel>,
    depth: u32,
}

impl<'a> Lowerer<'a> {
    pub fn new(
        asm: &'a mut Assembler,
        registry: &'a mut Registry,
        func: &'a Function,
        return_label: crate::codegen::mca::PcLabel,
    ) -> Self {
        let mut named_labels = HashMap::new();
        collect_named_labels(&func.body, &mut *asm, &mut named_labels);
        Lowerer {
            asm,
            registry,
            func,
            return_label,
            named_labels,
            depth: 0,
        }
    }

    fn var_base(&self, id: VarId) -> (Reg, i32) {
        (Reg::Rbp, self.func.var(id).offset as i32)
    }

    /// Computes the address of an lvalue into RAX.
    pub fn gen_addr(&mut self, node: &crate::ir::Node) -> Result<(), CodegenError> {
        match &node.kind {
            NodeKind::Var(id) => {
                let (base, disp) = self.var_base(*id);
                if self.func.var(*id).kind == crate::ir::VarKind::Vla {
                    self.asm.mov_load(Reg::Rax, base, disp, 8, true);
                } else {
                    self.asm.lea(Reg::Rax, base, disp);
                }
                Ok(())
            }
            NodeKind::GlobalRef(name) => {
                let label = self.asm.mov64_fixup(Reg::Rax);
                self.registry.record_import(name.clone(), label);
                Ok(())
            }
            NodeKind::Deref(inner) => self.gen_expr(inner),
            NodeKind::Member(inner, member) => {
                self.gen_addr(inner)?;
                if member.offset != 0 {
                    self.asm.add_imm(Reg::Rax, member.offset as i32, 8);
                }
                Ok(())
            }
            NodeKind::Comma(lhs, rhs) => {
                self.gen_expr(lhs)?;
                self.gen_addr(rhs)
            }
            NodeKind::Cond { cond, then, els } => {
                let else_label = self.asm.new_pc_label();
                let end_label = self.asm.new_pc_label();
                self.gen_expr(cond)?;
                self.gen_cmp_zero(cond.ty.size as u8);
                self.asm.jcc(0x4, "e", else_label);
                self.gen_addr(then)?;
                self.asm.jmp(end_label);
                self.asm.place_pc_label(else_label);
                self.gen_addr(els)?;
                self.asm.place_pc_label(end_label);
                Ok(())
            }
            _ => Err(CodegenError::NotAnLvalue {
                tok: node.tok.clone(),
            }),
        }
    }

    fn gen_cmp_zero(&mut self, size: u8) {
        self.asm.cmp_imm(Reg::Rax, 0, size.max(4));
    }

    /// Reserves RDI bytes (rounded up to 16) below the live stack, shifting
    /// the bytes between the current top and `alloca_bottom` down to keep
    /// them contiguous, and leaves the new block's address in RAX.
    fn gen_builtin_alloca(&mut self) {
        self.asm.add_imm(Reg::Rdi, 15, 8);
        self.asm.mov_imm(Reg::R9, -16i64, 8);
        self.asm.and_rr(Reg::Rdi, Reg::R9, 8);

        let (base, disp) = self.var_base(self.func.alloca_bottom);

        self.asm.mov_load(Reg::Rcx, base, disp, 8, true);
        self.asm.sub_rr(Reg::Rcx, Reg::Rsp, 8);
        self.asm.mov_rr(Reg::Rax, Reg::Rsp, 8);
        self.asm.sub_rr(Reg::Rsp, Reg::Rdi, 8);
        self.asm.mov_rr(Reg::Rdx, Reg::Rsp, 8);

        let loop_label = self.asm.new_pc_label();
        let end_label = self.asm.new_pc_label();
        self.asm.place_pc_label(loop_label);
        self.asm.cmp_imm(Reg::Rcx, 0, 8);
        self.asm.jcc(0x4, "e", end_label);
        self.asm.mov_load(Reg::R8, Reg::Rax, 0, 1, true);
        self.asm.mov_store(Reg::Rdx, 0, Reg::R8, 1);
        self.asm.add_imm(Reg::Rdx, 1, 8);
        self.asm.add_imm(Reg::Rax, 1, 8);
        self.asm.sub_imm(Reg::Rcx, 1, 8);
        self.asm.jmp(loop_label);
        self.asm.place_pc_label(end_label);

        self.asm.mov_load(Reg::Rax, base, disp, 8, true);
        self.asm.sub_rr(Reg::Rax, Reg::Rdi, 8);
        self.asm.mov_store(base, disp, Reg::Rax, 8);
    }

    /// Loads the value addressed by RAX into RAX/XMM0 per `ty`.
    fn load(&mut self, ty: &crate::ir::Type) {
        match ty.kind {
            TypeKind::Array | TypeKind::VLA | TypeKind::Struct | TypeKind::Union => {
                // Arrays decay to their address; structs are loaded lazily
                // by whoever copies them (gen_struct_copy), so leave the
                // address in RAX untouched.
            }
            TypeKind::Float => self.asm.movss_load(0, Reg::Rax, 0),
            TypeKind::Double => self.asm.movsd_load(0, Reg::Rax, 0),
            TypeKind::LDouble => self.asm.fld_tword(Reg::Rax, 0),
            _ => {
                let size = ty.size as u8;
                self.asm.mov_load(Reg::Rax, Reg::Rax, 0, size, ty.is_unsigned);
            }
        }
    }

    /// Stores RAX/XMM0 to the address on top of the (conceptual) address
    /// stack, which here is modeled by pushing the address to the real
    /// stack around evaluating the right-hand side (matching the
    /// original's `push`/`pop rdi` pattern for assignment).
    fn store(&mut self, ty: &crate::ir::Type) {
        match ty.kind {
            TypeKind::Float => self.asm.movss_store(Reg::Rdi, 0, 0),
            TypeKind::Double => self.asm.movsd_store(Reg::Rdi, 0, 0),
            TypeKind::LDouble => self.asm.fstp_tword(Reg::Rdi, 0),
            TypeKind::Struct | TypeKind::Union => {
                for i in 0..ty.size {
                    self.asm.mov_load(Reg::Rcx, Reg::Rax, i as i32, 1, true);
                    self.asm.mov_store(Reg::Rdi, i as i32, Reg::Rcx, 1);
                }
            }
            _ => {
                let size = ty.size as u8;
                self.asm.mov_store(Reg::Rdi, 0, Reg::Rax, size);
            }
        }
    }

    /// Merges a bitfield assignment's new value into its storage unit.
    /// Entry: RAX holds the new value just evaluated by `gen_expr(rhs)`,
    /// the storage address sits on top of the real stack (pushed by the
    /// caller before `rhs` was evaluated). Leaves RAX holding the raw new
    /// value, matching a plain assignment's result.
    fn gen_bitfield_assign(&mut self, storage_ty: &crate::ir::Type, bf: &crate::ir::Bitfield) {
        self.asm.mov_rr(Reg::R8, Reg::Rax, 8);
        self.asm.mov_rr(Reg::Rdi, Reg::Rax, 8);
        let mask_low = (1i64 << bf.bit_width) - 1;
        self.asm.mov_imm(Reg::R9, mask_low, 8);
        self.asm.and_rr(Reg::Rdi, Reg::R9, 8);
        self.asm.shl_imm(Reg::Rdi, bf.bit_offset as u8, 8);

        self.asm.mov_load(Reg::Rax, Reg::Rsp, 0, 8, true);
        self.load(storage_ty);

        let mask = mask_low << bf.bit_offset;
        self.asm.mov_imm(Reg::R9, !mask, 8);
        self.asm.and_rr(Reg::Rax, Reg::R9, 8);
        self.asm.or_rr(Reg::Rax, Reg::Rdi, 8);

        self.asm.pop_reg(Reg::Rdi);
        self.store(storage_ty);

        self.asm.mov_rr(Reg::Rax, Reg::R8, 8);
    }

    pub fn gen_expr(&mut self, node: &crate::ir::Node) -> Result<(), CodegenError> {
        use crate::ir::NumLit;
        match &node.kind {
            NodeKind::NullExpr => Ok(()),
            NodeKind::Num(lit) => {
                match lit {
                    NumLit::Int(v) => self.asm.mov_imm(Reg::Rax, *v, node.ty.size.max(4) as u8),
                    NumLit::Float(f) => {
                        self.asm.mov_imm(Reg::Rax, f.to_bits() as i64, 4);
                        self.asm.movq_gpr_to_xmm(0, Reg::Rax);
                    }
                    NumLit::Double(d) => {
                        self.asm.mov_imm(Reg::Rax, d.to_bits() as i64, 8);
                        self.asm.movq_gpr_to_xmm(0, Reg::Rax);
                    }
                    NumLit::LDouble(d) => {
                        // materialize through a double-precision bit pattern and
                        // widen on the x87 stack; exact 80-bit literals are an
                        // open question left to a real frontend's constant table.
                        self.asm.mov_imm(Reg::Rax, d.to_bits() as i64, 8);
                        self.asm.push_reg(Reg::Rax);
                        self.asm.fld_qword(Reg::Rsp, 0);
                        self.asm.add_imm(Reg::Rsp, 8, 8);
                    }
                }
                Ok(())
            }
            NodeKind::Var(id) => {
                self.gen_addr(&crate::ir::Node::new(NodeKind::Var(*id), node.ty.clone()))?;
                self.load(&node.ty);
                Ok(())
            }
            NodeKind::GlobalRef(name) => {
                // Functions and arrays decay to their address; there is no
                // load to perform beyond resolving the fixup.
                self.gen_addr(&crate::ir::Node::new(
                    NodeKind::GlobalRef(name.clone()),
                    node.ty.clone(),
                ))
            }
            NodeKind::Member(_, member) => {
                self.gen_addr(node)?;
                self.load(&node.ty);
                if let Some(bf) = &member.bitfield {
                    // Widen to a 64-bit value aligned so the field's own
                    // sign bit lands at bit 63, then shift back down with
                    // the sign-extending or zero-extending shift the
                    // field's own signedness calls for.
                    let up = (64 - bf.bit_width - bf.bit_offset) as u8;
                    let down = (64 - bf.bit_width) as u8;
                    self.asm.shl_imm(Reg::Rax, up, 8);
                    if node.ty.is_unsigned {
                        self.asm.shr_imm(Reg::Rax, down, 8);
                    } else {
                        self.asm.sar_imm(Reg::Rax, down, 8);
                    }
                }
                Ok(())
            }
            NodeKind::Deref(_) => {
                self.gen_addr(node)?;
                self.load(&node.ty);
                Ok(())
            }
            NodeKind::Addr(inner) => self.gen_addr(inner),
            NodeKind::Cast(inner) => {
                self.gen_expr(inner)?;
                let from = cast_table::classify(&inner.ty);
                let to = cast_table::classify(&node.ty);
                cast_table::emit_cast(self.asm, from, to, Reg::Rsp)
            }
            NodeKind::Neg(inner) => {
                self.gen_expr(inner)?;
                match node.ty.kind {
                    TypeKind::Float => {
                        self.asm.mov_imm(Reg::Rax, 1i64 << 31, 4);
                        self.asm.movq_gpr_to_xmm(1, Reg::Rax);
                        self.asm.xorps(0, 1);
                    }
                    TypeKind::Double => {
                        self.asm.mov_imm(Reg::Rax, i64::MIN, 8);
                        self.asm.movq_gpr_to_xmm(1, Reg::Rax);
                        self.asm.xorpd(0, 1);
                    }
                    TypeKind::LDouble => self.asm.fchs(),
                    _ => self.asm.neg(Reg::Rax, node.ty.size.max(4) as u8),
                }
                Ok(())
            }
            NodeKind::Not(inner) => {
                self.gen_expr(inner)?;
                self.gen_cmp_zero(inner.ty.size.max(4) as u8);
                self.asm.setcc(0x4, "e", Reg::Rax);
                self.asm.movzx8_to_reg(Reg::Rax, Reg::Rax, 4);
                Ok(())
            }
            NodeKind::BitNot(inner) => {
                self.gen_expr(inner)?;
                self.asm.not(Reg::Rax, node.ty.size.max(4) as u8);
                Ok(())
            }
            NodeKind::Add(l, r) => self.gen_binary(l, r, node, BinOp::Add),
            NodeKind::Sub(l, r) => self.gen_binary(l, r, node, BinOp::Sub),
            NodeKind::Mul(l, r) => self.gen_binary(l, r, node, BinOp::Mul),
            NodeKind::Div(l, r) => self.gen_binary(l, r, node, BinOp::Div),
            NodeKind::Mod(l, r) => self.gen_binary(l, r, node, BinOp::Mod),
            NodeKind::BitAnd(l, r) => self.gen_int_binary(l, r, node, BinOp::And),
            NodeKind::BitOr(l, r) => self.gen_int_binary(l, r, node, BinOp::Or),
            NodeKind::BitXor(l, r) => self.gen_int_binary(l, r, node, BinOp::Xor),
            NodeKind::Shl(l, r) => self.gen_shift(l, r, true),
            NodeKind::Shr(l, r) => self.gen_shift(l, r, false),
            NodeKind::Eq(l, r) => self.gen_compare(l, r, node, 0x4, "e"),
            NodeKind::Ne(l, r) => self.gen_compare(l, r, node, 0x5, "ne"),
            NodeKind::Lt(l, r) => self.gen_compare(l, r, node, 0xC, "l"),
            NodeKind::Le(l, r) => self.gen_compare(l, r, node, 0xE, "le"),
            NodeKind::LogAnd(l, r) => {
                let false_label = self.asm.new_pc_label();
                let end = self.asm.new_pc_label();
                self.gen_expr(l)?;
                self.gen_cmp_zero(l.ty.size.max(4) as u8);
                self.asm.jcc(0x4, "e", false_label);
                self.gen_expr(r)?;
                self.gen_cmp_zero(r.ty.size.max(4) as u8);
                self.asm.jcc(0x4, "e", false_label);
                self.asm.mov_imm(Reg::Rax, 1, 4);
                self.asm.jmp(end);
                self.asm.place_pc_label(false_label);
                self.asm.mov_imm(Reg::Rax, 0, 4);
                self.asm.place_pc_label(end);
                Ok(())
            }
            NodeKind::LogOr(l, r) => {
                let true_label = self.asm.new_pc_label();
                let end = self.asm.new_pc_label();
                self.gen_expr(l)?;
                self.gen_cmp_zero(l.ty.size.max(4) as u8);
                self.asm.jcc(0x5, "ne", true_label);
                self.gen_expr(r)?;
                self.gen_cmp_zero(r.ty.size.max(4) as u8);
                self.asm.jcc(0x5, "ne", true_label);
                self.asm.mov_imm(Reg::Rax, 0, 4);
                self.asm.jmp(end);
                self.asm.place_pc_label(true_label);
                self.asm.mov_imm(Reg::Rax, 1, 4);
                self.asm.place_pc_label(end);
                Ok(())
            }
            NodeKind::Assign(lhs, rhs) => {
                if matches!(lhs.ty.kind, TypeKind::Struct | TypeKind::Union) {
                    self.gen_addr(lhs)?;
                    self.asm.push_reg(Reg::Rax);
                    self.gen_addr(rhs)?;
                    self.asm.pop_reg(Reg::Rdi);
                    self.store(&lhs.ty);
                    return Ok(());
                }

                let bitfield = match &lhs.kind {
                    NodeKind::Member(_, member) => member.bitfield.clone(),
                    _ => None,
                };

                self.gen_addr(lhs)?;
                self.asm.push_reg(Reg::Rax);
                self.gen_expr(rhs)?;

                if let Some(bf) = bitfield {
                    self.gen_bitfield_assign(&lhs.ty, &bf);
                } else {
                    self.asm.pop_reg(Reg::Rdi);
                    self.store(&lhs.ty);
                }
                Ok(())
            }
            NodeKind::Comma(l, r) => {
                self.gen_expr(l)?;
                self.gen_expr(r)
            }
            NodeKind::Cond { cond, then, els } => {
                let else_label = self.asm.new_pc_label();
                let end_label = self.asm.new_pc_label();
                self.gen_expr(cond)?;
                self.gen_cmp_zero(cond.ty.size.max(4) as u8);
                self.asm.jcc(0x4, "e", else_label);
                self.gen_expr(then)?;
                self.asm.jmp(end_label);
                self.asm.place_pc_label(else_label);
                self.gen_expr(els)?;
                self.asm.place_pc_label(end_label);
                Ok(())
            }
            NodeKind::MemZero(id) => {
                let (base, disp) = self.var_base(*id);
                self.asm.lea(Reg::Rdi, base, disp);
                self.asm.mov_imm(Reg::Rax, 0, 4);
                self.asm.mov_imm(Reg::Rcx, self.func.var(*id).ty.size, 8);
                self.asm.rep_stosb();
                Ok(())
            }
            NodeKind::Alloca(size) => {
                self.gen_expr(size)?;
                self.asm.mov_rr(Reg::Rdi, Reg::Rax, 8);
                self.gen_builtin_alloca();
                Ok(())
            }
            NodeKind::Call { callee, args, ret_buffer } => {
                self.gen_call(callee, args, ret_buffer.as_ref(), &node.ty)
            }
            NodeKind::LabelVal(name) => {
                let label = *self
                    .named_labels
                    .get(name)
                    .expect("label-as-value names a label collected up front");
                self.asm.lea_rip(Reg::Rax, label);
                Ok(())
            }
            NodeKind::Cas { addr, old, new } => {
                self.gen_expr(addr)?;
                self.asm.push_reg(Reg::Rax);
                self.gen_expr(old)?;
                self.asm.mov_rr(Reg::Rax, Reg::Rax, 8);
                self.asm.push_reg(Reg::Rax);
                self.gen_expr(new)?;
                self.asm.mov_rr(Reg::Rdx, Reg::Rax, 8);
                self.asm.pop_reg(Reg::Rax);
                self.asm.pop_reg(Reg::Rdi);
                self.asm.lock_cmpxchg(node.ty.size.max(1) as u8);
                self.asm.setcc(0x4, "e", Reg::Rax);
                self.asm.movzx8_to_reg(Reg::Rax, Reg::Rax, 4);
                Ok(())
            }
            NodeKind::Exch { addr, val } => {
                self.gen_expr(addr)?;
                self.asm.push_reg(Reg::Rax);
                self.gen_expr(val)?;
                self.asm.mov_rr(Reg::Rdx, Reg::Rax, 8);
                self.asm.pop_reg(Reg::Rdi);
                self.asm.xchg_mem(Reg::Rdi, Reg::Rdx, node.ty.size.max(1) as u8);
                self.asm.mov_rr(Reg::Rax, Reg::Rdx, node.ty.size.max(1) as u8);
                Ok(())
            }
            NodeKind::StmtExpr(stmts) => {
                for (i, stmt) in stmts.iter().enumerate() {
                    if i + 1 == stmts.len() {
                        self.gen_expr(stmt)?;
                    } else {
                        self.gen_stmt(stmt)?;
                    }
                }
                Ok(())
            }
            _ => Err(CodegenError::InvalidExpression {
                tok: node.tok.clone(),
            }),
        }
    }

    fn gen_int_binary(
        &mut self,
        l: &crate::ir::Node,
        r: &crate::ir::Node,
        node: &crate::ir::Node,
        op: BinOp,
    ) -> Result<(), CodegenError> {
        self.gen_expr(l)?;
        self.asm.push_reg(Reg::Rax);
        self.gen_expr(r)?;
        self.asm.mov_rr(Reg::Rdi, Reg::Rax, 8);
        self.asm.pop_reg(Reg::Rax);
        let size = node.ty.size.max(4) as u8;
        match op {
            BinOp::And => self.asm.and_rr(Reg::Rax, Reg::Rdi, size),
            BinOp::Or => self.asm.or_rr(Reg::Rax, Reg::Rdi, size),
            BinOp::Xor => self.asm.xor_rr(Reg::Rax, Reg::Rdi, size),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn gen_shift(
        &mut self,
        l: &crate::ir::Node,
        r: &crate::ir::Node,
        left: bool,
    ) -> Result<(), CodegenError> {
        self.gen_expr(l)?;
        self.asm.push_reg(Reg::Rax);
        self.gen_expr(r)?;
        self.asm.mov_rr(Reg::Rcx, Reg::Rax, 8);
        self.asm.pop_reg(Reg::Rax);
        let size = l.ty.size.max(4) as u8;
        if left {
            self.asm.shl_cl(Reg::Rax, size);
        } else if l.ty.is_unsigned {
            self.asm.shr_cl(Reg::Rax, size);
        } else {
            self.asm.sar_cl(Reg::Rax, size);
        }
        Ok(())
    }

    fn gen_binary(
        &mut self,
        l: &crate::ir::Node,
        r: &crate::ir::Node,
        node: &crate::ir::Node,
        op: BinOp,
    ) -> Result<(), CodegenError> {
        if node.ty.is_flonum() || node.ty.kind == TypeKind::LDouble {
            return self.gen_float_binary(l, r, node, op);
        }
        self.gen_expr(l)?;
        self.asm.push_reg(Reg::Rax);
        self.gen_expr(r)?;
        self.asm.mov_rr(Reg::Rdi, Reg::Rax, 8);
        self.asm.pop_reg(Reg::Rax);
        let size = node.ty.size.max(4) as u8;
        match op {
            BinOp::Add => self.asm.add_rr(Reg::Rax, Reg::Rdi, size),
            BinOp::Sub => self.asm.sub_rr(Reg::Rax, Reg::Rdi, size),
            BinOp::Mul => self.asm.imul(Reg::Rax, Reg::Rdi, size),
            BinOp::Div | BinOp::Mod => {
                if node.ty.is_unsigned {
                    self.asm.mov_imm(Reg::Rdx, 0, size);
                    self.asm.div(Reg::Rdi, size);
                } else if size == 8 {
                    self.asm.cqo();
                    self.asm.idiv(Reg::Rdi, size);
                } else {
                    self.asm.cdq();
                    self.asm.idiv(Reg::Rdi, size);
                }
                if matches!(op, BinOp::Mod) {
                    self.asm.mov_rr(Reg::Rax, Reg::Rdx, size);
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn gen_float_binary(
        &mut self,
        l: &crate::ir::Node,
        r: &crate::ir::Node,
        node: &crate::ir::Node,
        op: BinOp,
    ) -> Result<(), CodegenError> {
        if node.ty.kind == TypeKind::LDouble {
            self.gen_expr(l)?;
            self.gen_expr(r)?;
            match op {
                BinOp::Add => self.asm.faddp(),
                BinOp::Sub => self.asm.fsubrp(),
                BinOp::Mul => self.asm.fmulp(),
                BinOp::Div => self.asm.fdivrp(),
                BinOp::Mod => {
                    return Err(CodegenError::InvalidExpression {
                        tok: node.tok.clone(),
                    })
                }
                _ => unreachable!(),
            }
            return Ok(());
        }
        let is_f32 = node.ty.kind == TypeKind::Float;
        self.gen_expr(l)?;
        if is_f32 {
            self.asm.movss_store(Reg::Rsp, -8, 0);
        } else {
            self.asm.movsd_store(Reg::Rsp, -8, 0);
        }
        self.asm.sub_imm(Reg::Rsp, 8, 8);
        self.asm.push_reg(Reg::Rax); // keep 16-byte discipline for nested calls below us
        self.gen_expr(r)?;
        if is_f32 {
            self.asm.movss_store(Reg::Rsp, -8, 0);
        } else {
            self.asm.movsd_store(Reg::Rsp, -8, 0);
        }
        self.asm.pop_reg(Reg::Rax);
        if is_f32 {
            self.asm.movss_load(1, Reg::Rsp, -16);
            self.asm.movss_load(0, Reg::Rsp, 0);
        } else {
            self.asm.movsd_load(1, Reg::Rsp, -16);
            self.asm.movsd_load(0, Reg::Rsp, 0);
        }
        self.asm.add_imm(Reg::Rsp, 8, 8);
        match op {
            BinOp::Add => {
                if is_f32 {
                    self.asm.addss(0, 1)
                } else {
                    self.asm.addsd(0, 1)
                }
            }
            BinOp::Sub => {
                if is_f32 {
                    self.asm.subss(0, 1)
                } else {
                    self.asm.subsd(0, 1)
                }
            }
            BinOp::Mul => {
                if is_f32 {
                    self.asm.mulss(0, 1)
                } else {
                    self.asm.mulsd(0, 1)
                }
            }
            BinOp::Div => {
                if is_f32 {
                    self.asm.divss(0, 1)
                } else {
                    self.asm.divsd(0, 1)
                }
            }
            BinOp::Mod => {
                return Err(CodegenError::InvalidExpression {
                    tok: node.tok.clone(),
                })
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn gen_compare(
        &mut self,
        l: &crate::ir::Node,
        r: &crate::ir::Node,
        node: &crate::ir::Node,
        cc: u8,
        mnemonic: &str,
    ) -> Result<(), CodegenError> {
        if l.ty.is_flonum() {
            self.gen_expr(l)?;
            self.asm.movsd_store(Reg::Rsp, -8, 0);
            self.gen_expr(r)?;
            self.asm.movsd_load(1, Reg::Rsp, -8);
            if l.ty.kind == TypeKind::Float {
                self.asm.ucomiss(1, 0);
            } else {
                self.asm.ucomisd(1, 0);
            }
            self.asm.setcc(cc, mnemonic, Reg::Rax);
            self.asm.movzx8_to_reg(Reg::Rax, Reg::Rax, 4);
            return Ok(());
        }
        self.gen_expr(l)?;
        self.asm.push_reg(Reg::Rax);
        self.gen_expr(r)?;
        self.asm.mov_rr(Reg::Rdi, Reg::Rax, 8);
        self.asm.pop_reg(Reg::Rax);
        let size = l.ty.size.max(4) as u8;
        self.asm.cmp_rr(Reg::Rax, Reg::Rdi, size);
        self.asm.setcc(cc, mnemonic, Reg::Rax);
        self.asm.movzx8_to_reg(Reg::Rax, Reg::Rax, 4);
        let _ = node;
        Ok(())
    }

    /// Two-pass call emission: first evaluate every argument and push it to
    /// the real stack right-to-left (so later register loads don't clobber
    /// earlier results), then pop the register-resident ones off in order.
    fn gen_call(
        &mut self,
        callee: &crate::ir::Node,
        args: &[crate::ir::Node],
        ret_buffer: Option<&VarId>,
        ret_ty: &crate::ir::Type,
    ) -> Result<(), CodegenError> {
        let mut classifier = ArgClassifier::new();
        let locations: Vec<_> = args.iter().map(|a| classifier.classify(&a.ty)).collect();

        if matches!(abi::classify_return(ret_ty), abi::ReturnLocation::Memory) {
            classifier.gp_used(); // hidden pointer consumes no extra bookkeeping here; RDI reserved below
        }

        for (arg, _) in args.iter().zip(&locations).rev() {
            self.gen_expr(arg)?;
            match arg.ty.kind {
                TypeKind::Float | TypeKind::Double => {
                    self.asm.movsd_store(Reg::Rsp, -8, 0);
                    self.asm.sub_imm(Reg::Rsp, 8, 8);
                }
                _ => self.asm.push_reg(Reg::Rax),
            }
        }

        let needs_hidden_ptr = matches!(abi::classify_return(ret_ty), abi::ReturnLocation::Memory);
        if needs_hidden_ptr {
            if let Some(id) = ret_buffer {
                let (base, disp) = self.var_base(*id);
                self.asm.lea(Reg::Rdi, base, disp);
            }
        }

        for (arg, loc) in args.iter().zip(&locations) {
            match loc {
                ArgLocation::Gp(n) => {
                    let reg = Reg::ARG_GP[*n];
                    self.asm.pop_reg(reg);
                }
                ArgLocation::Sse(n) => {
                    self.asm.pop_reg(Reg::Rax);
                    if arg.ty.kind == TypeKind::Float {
                        self.asm.movq_gpr_to_xmm(*n as u8, Reg::Rax);
                    } else {
                        self.asm.movq_gpr_to_xmm(*n as u8, Reg::Rax);
                    }
                }
                ArgLocation::Struct(slots) => {
                    for (i, slot) in slots.iter().enumerate() {
                        match slot {
                            StructSlot::Gp(n) => {
                                let reg = Reg::ARG_GP[*n];
                                self.asm.mov_load(reg, Reg::Rsp, (i * 8) as i32, 8, true);
                            }
                            StructSlot::Sse(n) => {
                                self.asm.mov_load(Reg::Rax, Reg::Rsp, (i * 8) as i32, 8, true);
                                self.asm.movq_gpr_to_xmm(*n as u8, Reg::Rax);
                            }
                        }
                    }
                    let words = (slots.len() * 8) as i32;
                    self.asm.add_imm(Reg::Rsp, words, 8);
                }
                ArgLocation::Stack { .. } => {
                    // already sitting on the real stack in the right order
                }
            }
        }

        self.gen_expr(callee)?;
        self.asm.mov_rr(Reg::R10, Reg::Rax, 8);
        self.asm.mov_imm(Reg::Rax, classifier.sse_used() as i64, 4); // variadic convention: AL = number of XMM args
        self.asm.call_reg(Reg::R10);

        if needs_hidden_ptr {
            self.asm.mov_rr(Reg::Rax, Reg::Rax, 8);
        }
        Ok(())
    }

    pub fn gen_stmt(&mut self, node: &crate::ir::Node) -> Result<(), CodegenError> {
        match &node.kind {
            NodeKind::Block(stmts) => {
                for s in stmts {
                    self.gen_stmt(s)?;
                }
                Ok(())
            }
            NodeKind::ExprStmt(inner) => {
                self.gen_expr(inner)?;
                Ok(())
            }
            NodeKind::If { cond, then, els } => {
                let else_label = self.asm.new_pc_label();
                let end_label = self.asm.new_pc_label();
                self.gen_expr(cond)?;
                self.gen_cmp_zero(cond.ty.size.max(4) as u8);
                self.asm.jcc(0x4, "e", else_label);
                self.gen_stmt(then)?;
                self.asm.jmp(end_label);
                self.asm.place_pc_label(else_label);
                if let Some(els) = els {
                    self.gen_stmt(els)?;
                }
                self.asm.place_pc_label(end_label);
                Ok(())
            }
            NodeKind::For {
                init,
                cond,
                inc,
                body,
                ..
            } => {
                self.depth += 1;
                if let Some(init) = init {
                    self.gen_stmt(init)?;
                }
                let begin = self.asm.new_pc_label();
                let end = self.asm.new_pc_label();
                self.asm.place_pc_label(begin);
                if let Some(cond) = cond {
                    self.gen_expr(cond)?;
                    self.gen_cmp_zero(cond.ty.size.max(4) as u8);
                    self.asm.jcc(0x4, "e", end);
                }
                self.gen_stmt(body)?;
                if let Some(inc) = inc {
                    self.gen_expr(inc)?;
                }
                self.asm.jmp(begin);
                self.asm.place_pc_label(end);
                self.depth -= 1;
                Ok(())
            }
            NodeKind::Do { body, cond, .. } => {
                let begin = self.asm.new_pc_label();
                self.asm.place_pc_label(begin);
                self.gen_stmt(body)?;
                self.gen_expr(cond)?;
                self.gen_cmp_zero(cond.ty.size.max(4) as u8);
                self.asm.jcc(0x5, "ne", begin);
                Ok(())
            }
            NodeKind::Switch {
                cond,
                cases,
                default,
                body,
                ..
            } => self.gen_switch(cond, cases, default.as_deref(), body),
            NodeKind::Goto(name) => {
                let label = *self
                    .named_labels
                    .get(name)
                    .expect("goto target names a label collected up front");
                self.asm.jmp(label);
                Ok(())
            }
            NodeKind::GotoExpr(inner) => {
                self.gen_expr(inner)?;
                self.asm.jmp_reg(Reg::Rax);
                Ok(())
            }
            NodeKind::Label(name, inner) => {
                let label = *self
                    .named_labels
                    .get(name)
                    .expect("label statement names a label collected up front");
                self.asm.place_pc_label(label);
                self.asm.label_text(name);
                self.gen_stmt(inner)
            }
            NodeKind::Return(value) => {
                if let Some(value) = value {
                    self.gen_expr(value)?;
                }
                self.asm.jmp(self.return_label);
                Ok(())
            }
            NodeKind::Asm(text) => {
                self.asm.println(text.clone());
                Ok(())
            }
            _ => Err(CodegenError::InvalidStatement {
                tok: node.tok.clone(),
            }),
        }
    }

    fn gen_switch(
        &mut self,
        cond: &crate::ir::Node,
        cases: &[CaseRange],
        default: Option<&crate::ir::Node>,
        body: &crate::ir::Node,
    ) -> Result<(), CodegenError> {
        self.gen_expr(cond)?;
        let size = cond.ty.size.max(4) as u8;
        let default_label = self.asm.new_pc_label();
        let end_label = self.asm.new_pc_label();
        let mut case_labels = Vec::with_capacity(cases.len());

        for case in cases {
            let label = self.asm.new_pc_label();
            case_labels.push(label);
            if case.begin == case.end {
                self.asm.cmp_imm(Reg::Rax, case.begin as i32, size);
                self.asm.jcc(0x4, "e", label);
            } else {
                // GNU case-range extension: `lo ... hi`, dispatched as one
                // range check (`rax - lo` unsigned <= `hi - lo`).
                self.asm.mov_rr(Reg::Rdi, Reg::Rax, 8);
                self.asm.sub_imm(Reg::Rdi, case.begin as i32, 8);
                self.asm.cmp_imm(Reg::Rdi, (case.end - case.begin) as i32, 8);
                self.asm.jcc(0x6, "be", label);
            }
        }
        self.asm.jmp(default_label);

        self.gen_stmt_with_case_labels(body, cases, &case_labels)?;

        self.asm.place_pc_label(default_label);
        if let Some(default) = default {
            self.gen_stmt(default)?;
        }
        self.asm.place_pc_label(end_label);
        Ok(())
    }

    /// `case`/`default` labels are woven directly into the switch body's
    /// statement list by the frontend (each `CaseRange.body` already holds
    /// the statements following that label); the pc-labels allocated above
    /// just need to be placed immediately before their bodies run.
    fn gen_stmt_with_case_labels(
        &mut self,
        body: &crate::ir::Node,
        cases: &[CaseRange],
        case_labels: &[crate::codegen::mca::PcLabel],
    ) -> Result<(), CodegenError> {
        let _ = body;
        for (case, label) in cases.iter().zip(case_labels) {
            self.asm.place_pc_label(*label);
            self.gen_stmt(&case.body)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
}

/// Walks the whole function body up front allocating one pc-label per
/// named `Label` statement, so `goto`/`&&label` references (which may
/// appear lexically before the label they target) always find an id.
fn collect_named_labels(
    node: &crate::ir::Node,
    asm: &mut Assembler,
    out: &mut HashMap<String, PcLabel>,
) {
    match &node.kind {
        NodeKind::Label(name, inner) => {
            out.entry(name.clone()).or_insert_with(|| asm.new_pc_label());
            collect_named_labels(inner, asm, out);
        }
        NodeKind::Block(stmts) => {
            for s in stmts {
                collect_named_labels(s, asm, out);
            }
        }
        NodeKind::If { then, els, .. } => {
            collect_named_labels(then, asm, out);
            if let Some(els) = els {
                collect_named_labels(els, asm, out);
            }
        }
        NodeKind::For { body, .. } | NodeKind::Do { body, .. } => {
            collect_named_labels(body, asm, out);
        }
        NodeKind::Switch { body, cases, default, .. } => {
            collect_named_labels(body, asm, out);
            for case in cases {
                collect_named_labels(&case.body, asm, out);
            }
            if let Some(default) = default {
                collect_named_labels(default, asm, out);
            }
        }
        _ => {}
    }
}
