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

//! End-to-end scenarios exercising compile -> link -> (when safe) execute
//! across the whole pipeline, one per concrete scenario in spec.md §8.

use cbackend::host::fake::FakeHost;
use cbackend::host::{Region, SystemHost};
use cbackend::ir::*;
use cbackend::{compile_unit, link_units};
use std::rc::Rc;

fn int_ty() -> Rc<Type> {
    Type::basic(TypeKind::Int, 4, 4, false)
}

fn uint_ty() -> Rc<Type> {
    Type::basic(TypeKind::Int, 4, 4, true)
}

fn mkvar(name: &str, ty: Rc<Type>) -> LocalVar {
    LocalVar {
        name: name.to_string(),
        ty,
        kind: VarKind::Local,
        offset: 0,
        offset_fixed: false,
    }
}

fn num(v: i64, ty: Rc<Type>) -> Node {
    Node::new(NodeKind::Num(NumLit::Int(v)), ty)
}

fn ret(value: Option<Node>, ty: Rc<Type>) -> Node {
    Node::new(NodeKind::Return(value.map(Box::new)), ty)
}

fn block(stmts: Vec<Node>) -> Node {
    Node::new(NodeKind::Block(stmts), Type::void())
}

fn expr_fn(
    name: &str,
    params: Vec<LocalVar>,
    locals: Vec<LocalVar>,
    body: Node,
    return_ty: Rc<Type>,
) -> Function {
    let n_params = params.len();
    let mut vars = params;
    vars.extend(locals);
    let param_ids = (0..n_params).map(VarId).collect();
    let local_ids = (n_params..vars.len()).map(VarId).collect();
    let alloca_bottom = VarId(vars.len());
    vars.push(LocalVar {
        name: "<alloca_bottom>".to_string(),
        ty: Type::basic(TypeKind::Long, 8, 8, false),
        kind: VarKind::AllocaBottom,
        offset: 0,
        offset_fixed: false,
    });
    Function {
        name: name.to_string(),
        is_definition: true,
        is_static: false,
        is_live: true,
        return_ty,
        vars,
        params: param_ids,
        locals: local_ids,
        alloca_bottom,
        va_area: None,
        body,
        stack_size: 0,
    }
}

unsafe fn call0(addr: usize) -> i32 {
    let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
    f()
}

unsafe fn call1(addr: usize, arg: i32) -> i32 {
    let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(addr) };
    f(arg)
}

/// Scenario 1: `int main(void) { return 0; }` emits a prologue/epilogue,
/// a `FunctionExport` for `main`, and linking yields an entry address that
/// runs and returns 0.
#[test]
fn identity_main_executes_and_returns_zero() {
    let func = expr_fn(
        "main",
        vec![],
        vec![],
        block(vec![ret(Some(num(0, int_ty())), int_ty())]),
        int_ty(),
    );
    let unit = compile_unit(&[TopLevel::Function(func)], Some("main"), None).unwrap();

    let mut mem = SystemHost;
    let host = SystemHost;
    let result = link_units(&[&unit], &mut mem, &host).unwrap();

    let status = unsafe { call0(result.entry_point) };
    assert_eq!(status, 0);
}

/// Scenario 4: `switch (x) { case 10 ... 20: return 1; } return 0;` lowers
/// the range as a single unsigned-subtract-and-compare dispatch.
#[test]
fn switch_range_dispatch_matches_inclusive_bounds() {
    let x = mkvar("x", int_ty());
    let case_body = block(vec![ret(Some(num(1, int_ty())), int_ty())]);
    let switch_stmt = Node::new(
        NodeKind::Switch {
            cond: Box::new(Node::new(NodeKind::Var(VarId(0)), int_ty())),
            cases: vec![CaseRange {
                begin: 10,
                end: 20,
                label: "case_10_20".into(),
                body: Box::new(case_body),
            }],
            default: None,
            body: Box::new(Node::new(NodeKind::NullExpr, Type::void())),
            brk_label: "brk".into(),
        },
        Type::void(),
    );
    let func = expr_fn(
        "classify",
        vec![x],
        vec![],
        block(vec![switch_stmt, ret(Some(num(0, int_ty())), int_ty())]),
        int_ty(),
    );
    let unit = compile_unit(&[TopLevel::Function(func)], Some("classify"), None).unwrap();

    let mut mem = SystemHost;
    let host = SystemHost;
    let result = link_units(&[&unit], &mut mem, &host).unwrap();

    unsafe {
        assert_eq!(call1(result.entry_point, 9), 0);
        assert_eq!(call1(result.entry_point, 10), 1);
        assert_eq!(call1(result.entry_point, 15), 1);
        assert_eq!(call1(result.entry_point, 20), 1);
        assert_eq!(call1(result.entry_point, 21), 0);
    }
}

/// Scenario 5: storing into a 3-bit bitfield merges with the surrounding
/// bits of its storage unit rather than clobbering them.
#[test]
fn bitfield_store_then_load_wraps_modulo_field_width() {
    let bitfield_ty = uint_ty();
    let struct_ty = {
        let mut s = Type::basic(TypeKind::Struct, 4, 4, false);
        Rc::get_mut(&mut s).unwrap().members = vec![Member {
            ty: bitfield_ty.clone(),
            offset: 0,
            bitfield: Some(Bitfield {
                bit_width: 3,
                bit_offset: 0,
            }),
        }];
        s
    };
    let member_ref = MemberRef {
        ty: bitfield_ty.clone(),
        offset: 0,
        bitfield: Some(Bitfield {
            bit_width: 3,
            bit_offset: 0,
        }),
    };
    let s = mkvar("s", struct_ty);
    let field = |m: MemberRef| {
        Node::new(
            NodeKind::Member(Box::new(Node::new(NodeKind::Var(VarId(0)), int_ty())), m),
            bitfield_ty.clone(),
        )
    };
    let assign = |m: MemberRef, v: i64| {
        Node::new(
            NodeKind::Assign(Box::new(field(m)), Box::new(num(v, bitfield_ty.clone()))),
            bitfield_ty.clone(),
        )
    };
    let body = block(vec![
        Node::new(NodeKind::ExprStmt(Box::new(assign(member_ref.clone(), 7))), Type::void()),
        Node::new(NodeKind::ExprStmt(Box::new(assign(member_ref.clone(), 9))), Type::void()),
        ret(Some(field(member_ref)), bitfield_ty.clone()),
    ]);
    let func = expr_fn("bits", vec![], vec![s], body, bitfield_ty);
    let unit = compile_unit(&[TopLevel::Function(func)], Some("bits"), None).unwrap();

    let mut mem = SystemHost;
    let host = SystemHost;
    let result = link_units(&[&unit], &mut mem, &host).unwrap();

    let status = unsafe { call0(result.entry_point) };
    assert_eq!(status, 1); // 9 mod 8 == 1
}

/// Scenario 6: a data relocation in one unit resolves against a data
/// object's runtime address allocated while linking a different unit.
#[test]
fn cross_unit_data_relocation_points_at_the_real_address() {
    let g = GlobalObj {
        name: "g".into(),
        ty: int_ty(),
        is_definition: true,
        is_static: false,
        is_tentative: false,
        is_tls: false,
        init_data: Some(42i32.to_le_bytes().to_vec()),
        relocations: vec![],
    };
    let main_fn = expr_fn(
        "main",
        vec![],
        vec![],
        block(vec![ret(Some(num(0, int_ty())), int_ty())]),
        int_ty(),
    );
    let unit_a = compile_unit(
        &[TopLevel::Object(g), TopLevel::Function(main_fn)],
        Some("main"),
        None,
    )
    .unwrap();

    let pointer_ty = Type::pointer_to(int_ty());
    let p = GlobalObj {
        name: "p".into(),
        ty: pointer_ty,
        is_definition: true,
        is_static: false,
        is_tentative: false,
        is_tls: false,
        init_data: Some(vec![0u8; 8]),
        relocations: vec![GlobalRelocation {
            offset: 0,
            addend: 0,
            target: RelocTarget::Data("g".into()),
        }],
    };
    let unit_b = compile_unit(&[TopLevel::Object(p)], None, None).unwrap();

    let mut mem = FakeHost::new();
    let host = FakeHost::new();
    let result = link_units(&[&unit_a, &unit_b], &mut mem, &host).unwrap();

    let g_addr = result.exports["g"];
    let p_addr = result.exports["p"];
    let stored = unsafe {
        let region = Region { addr: p_addr, len: 8 };
        u64::from_le_bytes(region.as_mut_slice()[..8].try_into().unwrap())
    };
    assert_eq!(stored, g_addr as u64);
}
