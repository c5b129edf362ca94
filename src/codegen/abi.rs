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

//! Calling-Convention Classifier (spec.md §4.4): SysV AMD64 argument and
//! return-value classification, eightbyte rules for small structs, and
//! stack alignment bookkeeping.

use crate::ir::{Type, TypeKind};
use std::rc::Rc;

pub const MAX_GP_ARGS: usize = 6;
pub const MAX_SSE_ARGS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EightbyteClass {
    Integer,
    Sse,
}

/// True when every scalar field overlapping byte range `[lo, hi)` of `ty`
/// is floating-point. An all-float eightbyte is classified SSE; anything
/// else (including padding treated conservatively as present) is INTEGER.
pub fn has_flonum(ty: &Type, lo: i64, hi: i64) -> bool {
    match ty.kind {
        TypeKind::Struct | TypeKind::Union => ty
            .members
            .iter()
            .all(|m| has_flonum_at(&m.ty, m.offset, lo, hi)),
        TypeKind::Array => {
            let elem = ty.base.as_ref().expect("array missing base");
            let n = ty.array_len;
            (0..n).all(|i| has_flonum_at(elem, i * elem.size, lo, hi))
        }
        _ => ty.is_flonum(),
    }
}

fn has_flonum_at(ty: &Type, offset: i64, lo: i64, hi: i64) -> bool {
    if offset + ty.size <= lo || hi <= offset {
        return true; // outside the window: doesn't disqualify it
    }
    has_flonum(ty, lo - offset, hi - offset)
}

pub fn has_flonum1(ty: &Type) -> bool {
    has_flonum(ty, 0, 8)
}

pub fn has_flonum2(ty: &Type) -> bool {
    has_flonum(ty, 8, 16)
}

/// Eightbyte classification for a struct/union of size <= 16. Returns one
/// entry per eightbyte actually covered by `ty.size`.
pub fn classify_eightbytes(ty: &Type) -> Vec<EightbyteClass> {
    debug_assert!(ty.size <= 16);
    let mut classes = vec![if has_flonum1(ty) {
        EightbyteClass::Sse
    } else {
        EightbyteClass::Integer
    }];
    if ty.size > 8 {
        classes.push(if has_flonum2(ty) {
            EightbyteClass::Sse
        } else {
            EightbyteClass::Integer
        });
    }
    classes
}

/// Where one argument ends up.
#[derive(Debug, Clone)]
pub enum ArgLocation {
    /// Scalar integer/pointer in a GP argument register, indexed 0..6 into
    /// [`crate::codegen::mca::Reg::ARG_GP`].
    Gp(usize),
    /// Scalar float/double in XMM register `n`.
    Sse(usize),
    /// Struct of size <= 16, passed in one or two eightbytes, each either a
    /// GP or SSE register slot.
    Struct(Vec<StructSlot>),
    /// Passed at `[rsp + offset]` at call time: either a scalar too wide
    /// for remaining registers, or a struct > 16 bytes copied by value.
    Stack { offset: i64, size: i64 },
}

#[derive(Debug, Clone, Copy)]
pub enum StructSlot {
    Gp(usize),
    Sse(usize),
}

/// Walks a parameter/argument list left to right, handing out GP/SSE
/// registers until exhausted and falling back to the stack, exactly as
/// `gen_expr`'s two-pass arg-pushing logic in the original needs to know
/// ahead of time which args land on the stack.
pub struct ArgClassifier {
    gp_used: usize,
    sse_used: usize,
    stack_bytes: i64,
}

impl ArgClassifier {
    pub fn new() -> Self {
        ArgClassifier {
            gp_used: 0,
            sse_used: 0,
            stack_bytes: 0,
        }
    }

    pub fn gp_used(&self) -> usize {
        self.gp_used
    }

    pub fn sse_used(&self) -> usize {
        self.sse_used
    }

    pub fn classify(&mut self, ty: &Rc<Type>) -> ArgLocation {
        match ty.kind {
            TypeKind::Struct | TypeKind::Union if ty.size <= 16 => {
                let classes = classify_eightbytes(ty);
                let needed_gp = classes.iter().filter(|c| **c == EightbyteClass::Integer).count();
                let needed_sse = classes.len() - needed_gp;
                if self.gp_used + needed_gp <= MAX_GP_ARGS
                    && self.sse_used + needed_sse <= MAX_SSE_ARGS
                {
                    let slots = classes
                        .iter()
                        .map(|c| match c {
                            EightbyteClass::Integer => {
                                let slot = StructSlot::Gp(self.gp_used);
                                self.gp_used += 1;
                                slot
                            }
                            EightbyteClass::Sse => {
                                let slot = StructSlot::Sse(self.sse_used);
                                self.sse_used += 1;
                                slot
                            }
                        })
                        .collect();
                    ArgLocation::Struct(slots)
                } else {
                    self.push_stack(ty)
                }
            }
            TypeKind::Struct | TypeKind::Union => self.push_stack(ty),
            _ if ty.is_flonum() => {
                if self.sse_used < MAX_SSE_ARGS {
                    let slot = self.sse_used;
                    self.sse_used += 1;
                    ArgLocation::Sse(slot)
                } else {
                    self.push_stack(ty)
                }
            }
            _ => {
                if self.gp_used < MAX_GP_ARGS {
                    let slot = self.gp_used;
                    self.gp_used += 1;
                    ArgLocation::Gp(slot)
                } else {
                    self.push_stack(ty)
                }
            }
        }
    }

    fn push_stack(&mut self, ty: &Rc<Type>) -> ArgLocation {
        let size = crate::codegen::frame::align_to(ty.size.max(8), 8);
        let offset = self.stack_bytes;
        self.stack_bytes += size;
        ArgLocation::Stack { offset, size }
    }

    pub fn stack_bytes(&self) -> i64 {
        self.stack_bytes
    }
}

impl Default for ArgClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a function's return value ends up.
#[derive(Debug, Clone)]
pub enum ReturnLocation {
    Void,
    Gp1,
    Gp2,
    Sse1,
    Sse2,
    GpThenSse,
    SseThenGp,
    /// Size > 16 bytes: caller passes a hidden pointer in RDI, callee also
    /// returns that same pointer in RAX.
    Memory,
}

pub fn classify_return(ty: &Type) -> ReturnLocation {
    match ty.kind {
        TypeKind::Void => ReturnLocation::Void,
        TypeKind::Struct | TypeKind::Union if ty.size <= 16 => {
            let classes = classify_eightbytes(ty);
            match classes.as_slice() {
                [EightbyteClass::Integer] => ReturnLocation::Gp1,
                [EightbyteClass::Sse] => ReturnLocation::Sse1,
                [EightbyteClass::Integer, EightbyteClass::Integer] => ReturnLocation::Gp2,
                [EightbyteClass::Sse, EightbyteClass::Sse] => ReturnLocation::Sse2,
                [EightbyteClass::Integer, EightbyteClass::Sse] => ReturnLocation::GpThenSse,
                [EightbyteClass::Sse, EightbyteClass::Integer] => ReturnLocation::SseThenGp,
                _ => unreachable!(),
            }
        }
        TypeKind::Struct | TypeKind::Union => ReturnLocation::Memory,
        _ if ty.is_flonum() => ReturnLocation::Sse1,
        _ => ReturnLocation::Gp1,
    }
}

/// SysV requires RSP % 16 == 0 immediately before `call`. `extra` is
/// whatever has already been pushed (e.g. a saved register) since the
/// frame's natural 16-byte-aligned base.
pub fn align_stack_for_call(stack_bytes: i64, extra: i64) -> i64 {
    crate::codegen::frame::align_to(stack_bytes + extra, 16) - extra
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    fn int_ty() -> Rc<Type> {
        Type::basic(TypeKind::Int, 4, 4, false)
    }
    fn double_ty() -> Rc<Type> {
        Type::basic(TypeKind::Double, 8, 8, false)
    }

    #[test]
    fn classifies_int_and_double_into_separate_register_files() {
        let mut c = ArgClassifier::new();
        assert!(matches!(c.classify(&int_ty()), ArgLocation::Gp(0)));
        assert!(matches!(c.classify(&double_ty()), ArgLocation::Sse(0)));
        assert!(matches!(c.classify(&int_ty()), ArgLocation::Gp(1)));
    }

    #[test]
    fn exhausting_gp_registers_spills_to_stack() {
        let mut c = ArgClassifier::new();
        for _ in 0..MAX_GP_ARGS {
            c.classify(&int_ty());
        }
        assert!(matches!(
            c.classify(&int_ty()),
            ArgLocation::Stack { offset: 0, .. }
        ));
    }

    #[test]
    fn small_all_float_struct_uses_two_sse_eightbytes() {
        let mut point = Type::basic(TypeKind::Struct, 16, 8, false);
        let p = Rc::get_mut(&mut point).unwrap();
        p.members = vec![
            crate::ir::Member {
                ty: double_ty(),
                offset: 0,
                bitfield: None,
            },
            crate::ir::Member {
                ty: double_ty(),
                offset: 8,
                bitfield: None,
            },
        ];
        assert_eq!(
            classify_eightbytes(&point),
            vec![EightbyteClass::Sse, EightbyteClass::Sse]
        );
    }
}
