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

//! Function Frame Planner (spec.md §4.6): assigns RBP-relative offsets to
//! every local variable and fixes the function's total stack size.

use crate::ir::{Function, VarKind};

pub fn align_to(n: i64, align: i64) -> i64 {
    (n + align - 1) / align * align
}

/// Stack-passed parameters already carry `offset_fixed = true` and a
/// positive `RBP+16+k` offset assigned during argument classification, in
/// ascending declaration order. Everything else (register-passed params,
/// locals, the alloca-bottom and va-area slots) gets a negative offset
/// below RBP here, walked in declaration order so arrays end up aligned to
/// at least 16 bytes the way the original's `assign_lvar_offsets` does.
pub fn assign_lvar_offsets(func: &mut Function) {
    let mut bottom: i64 = 0;

    let ids: Vec<_> = func
        .vars
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.offset_fixed)
        .map(|(i, _)| crate::ir::VarId(i))
        .collect();

    for id in ids {
        let var = func.var(id);
        let size = var.ty.size;
        let mut align = var.ty.align;
        if var.ty.kind == crate::ir::TypeKind::Array && align < 16 {
            align = 16;
        }
        if matches!(var.kind, VarKind::AllocaBottom | VarKind::VaArea) {
            align = align.max(16);
        }

        bottom += size;
        bottom = align_to(bottom, align);
        func.var_mut(id).offset = -bottom;
    }

    func.stack_size = align_to(bottom, 16);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{LocalVar, Type, TypeKind};
    use std::rc::Rc;

    fn mkvar(name: &str, ty: Rc<Type>) -> LocalVar {
        LocalVar {
            name: name.to_string(),
            ty,
            kind: VarKind::Local,
            offset: 0,
            offset_fixed: false,
        }
    }

    #[test]
    fn locals_get_descending_offsets_and_frame_rounds_to_16() {
        let int_ty = Type::basic(TypeKind::Int, 4, 4, false);
        let long_ty = Type::basic(TypeKind::Long, 8, 8, false);
        let mut func = Function {
            name: "f".into(),
            is_definition: true,
            is_static: false,
            is_live: true,
            return_ty: Type::void(),
            vars: vec![mkvar("a", int_ty.clone()), mkvar("b", long_ty.clone())],
            params: vec![],
            locals: vec![crate::ir::VarId(0), crate::ir::VarId(1)],
            alloca_bottom: crate::ir::VarId(0),
            va_area: None,
            body: crate::ir::Node::new(crate::ir::NodeKind::Block(vec![]), Type::void()),
            stack_size: 0,
        };
        assign_lvar_offsets(&mut func);
        assert_eq!(func.var(crate::ir::VarId(0)).offset, -4);
        assert_eq!(func.var(crate::ir::VarId(1)).offset, -16);
        assert_eq!(func.stack_size, 16);
    }

    #[test]
    fn stack_passed_params_are_left_untouched() {
        let int_ty = Type::basic(TypeKind::Int, 4, 4, false);
        let mut fixed = mkvar("p", int_ty.clone());
        fixed.offset = 16;
        fixed.offset_fixed = true;
        let mut func = Function {
            name: "f".into(),
            is_definition: true,
            is_static: false,
            is_live: true,
            return_ty: Type::void(),
            vars: vec![fixed, mkvar("local", int_ty)],
            params: vec![crate::ir::VarId(0)],
            locals: vec![crate::ir::VarId(1)],
            alloca_bottom: crate::ir::VarId(1),
            va_area: None,
            body: crate::ir::Node::new(crate::ir::NodeKind::Block(vec![]), Type::void()),
            stack_size: 0,
        };
        assign_lvar_offsets(&mut func);
        assert_eq!(func.var(crate::ir::VarId(0)).offset, 16);
        assert_eq!(func.var(crate::ir::VarId(1)).offset, -4);
    }
}
