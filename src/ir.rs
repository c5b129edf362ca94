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

//! The typed intermediate representation CodeGen consumes. Produced by an
//! (out of scope) frontend; reproduced here just richly enough to drive
//! lowering.

use std::rc::Rc;

/// A source location, kept only so fatal errors can point somewhere.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Token {
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    LDouble,
    Pointer,
    Array,
    VLA,
    Struct,
    Union,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bitfield {
    pub bit_width: i32,
    pub bit_offset: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub ty: Rc<Type>,
    pub offset: i64,
    pub bitfield: Option<Bitfield>,
}

/// A C type. Aggregates carry their member list inline; arrays/pointers
/// carry a `base`. `size`/`align` are always set (data model invariant).
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub size: i64,
    pub align: i64,
    pub is_unsigned: bool,
    pub base: Option<Rc<Type>>,
    pub members: Vec<Member>,
    pub array_len: i64,
    pub return_ty: Option<Rc<Type>>,
}

impl Type {
    pub fn basic(kind: TypeKind, size: i64, align: i64, is_unsigned: bool) -> Rc<Type> {
        Rc::new(Type {
            kind,
            size,
            align,
            is_unsigned,
            base: None,
            members: Vec::new(),
            array_len: 0,
            return_ty: None,
        })
    }

    pub fn void() -> Rc<Type> {
        Type::basic(TypeKind::Void, 1, 1, false)
    }

    pub fn pointer_to(base: Rc<Type>) -> Rc<Type> {
        Rc::new(Type {
            kind: TypeKind::Pointer,
            size: 8,
            align: 8,
            is_unsigned: true,
            base: Some(base),
            members: Vec::new(),
            array_len: 0,
            return_ty: None,
        })
    }

    pub fn array_of(base: Rc<Type>, len: i64) -> Rc<Type> {
        let elem_size = base.size;
        let align = base.align;
        Rc::new(Type {
            kind: TypeKind::Array,
            size: elem_size * len,
            align,
            is_unsigned: false,
            base: Some(base),
            members: Vec::new(),
            array_len: len,
            return_ty: None,
        })
    }

    pub fn is_flonum(&self) -> bool {
        matches!(self.kind, TypeKind::Float | TypeKind::Double)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Bool
                | TypeKind::Char
                | TypeKind::Short
                | TypeKind::Int
                | TypeKind::Long
                | TypeKind::Pointer
                | TypeKind::Function
        )
    }
}

/// Index into a function's variable arena. Kept separate from `Obj` so the
/// IR tree can reference variables without shared mutability: the frame
/// planner mutates offsets by index, lowering reads them by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarKind {
    /// Ordinary local or parameter; offset assigned by the frame planner.
    Local,
    /// Variable-length array: the local slot holds a pointer to the VLA's
    /// backing storage rather than the array itself.
    Vla,
    /// The function's hidden `alloca_bottom` bookkeeping slot.
    AllocaBottom,
    /// The function's `va_list`-compatible register save area, if variadic.
    VaArea,
}

#[derive(Debug, Clone)]
pub struct LocalVar {
    pub name: String,
    pub ty: Rc<Type>,
    pub kind: VarKind,
    /// RBP-relative byte offset; assigned by `frame::assign_lvar_offsets`.
    /// Positive offsets are stack-passed parameters (fixed before planning
    /// runs); negative/zero offsets are assigned by the planner.
    pub offset: i64,
    /// True for pre-assigned stack-passed parameters (`offset` already set,
    /// skip during the local/register-parameter pass).
    pub offset_fixed: bool,
}

#[derive(Debug, Clone)]
pub struct GlobalRelocation {
    pub offset: i64,
    pub addend: i64,
    pub target: RelocTarget,
}

#[derive(Debug, Clone)]
pub enum RelocTarget {
    /// Address of another named global object.
    Data(String),
    /// Address of a code position named by pc-label, resolved once the
    /// function that owns the label has been emitted.
    Code(u32),
}

#[derive(Debug, Clone)]
pub struct GlobalObj {
    pub name: String,
    pub ty: Rc<Type>,
    pub is_definition: bool,
    pub is_static: bool,
    pub is_tentative: bool,
    pub is_tls: bool,
    pub init_data: Option<Vec<u8>>,
    pub relocations: Vec<GlobalRelocation>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub is_definition: bool,
    pub is_static: bool,
    pub is_live: bool,
    pub return_ty: Rc<Type>,
    /// Variable arena: params first (in declaration order), then locals,
    /// then (if present) the alloca-bottom and va-area bookkeeping slots.
    pub vars: Vec<LocalVar>,
    pub params: Vec<VarId>,
    pub locals: Vec<VarId>,
    pub alloca_bottom: VarId,
    pub va_area: Option<VarId>,
    pub body: Node,
    /// Filled in by the frame planner.
    pub stack_size: i64,
}

impl Function {
    pub fn var(&self, id: VarId) -> &LocalVar {
        &self.vars[id.0]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut LocalVar {
        &mut self.vars[id.0]
    }
}

#[derive(Debug, Clone)]
pub enum TopLevel {
    Function(Function),
    Object(GlobalObj),
}

#[derive(Debug, Clone)]
pub struct MemberRef {
    pub ty: Rc<Type>,
    pub offset: i64,
    pub bitfield: Option<Bitfield>,
}

#[derive(Debug, Clone)]
pub enum NumLit {
    Int(i64),
    Float(f32),
    Double(f64),
    LDouble(f64),
}

#[derive(Debug, Clone)]
pub struct CaseRange {
    pub begin: i64,
    pub end: i64,
    pub label: String,
    pub body: Box<Node>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    NullExpr,
    Num(NumLit),
    Var(VarId),
    /// Reference to a named top-level function or data object (as opposed
    /// to `Var`, which always indexes the current function's own arena).
    /// Resolved at emission time to either an intra-unit pc-label or an
    /// external-symbol fixup, depending on whether the named function is
    /// defined in this unit.
    GlobalRef(String),
    Member(Box<Node>, MemberRef),
    Deref(Box<Node>),
    Addr(Box<Node>),
    Cast(Box<Node>),
    Neg(Box<Node>),
    Not(Box<Node>),
    BitNot(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Mod(Box<Node>, Box<Node>),
    BitAnd(Box<Node>, Box<Node>),
    BitOr(Box<Node>, Box<Node>),
    BitXor(Box<Node>, Box<Node>),
    Shl(Box<Node>, Box<Node>),
    Shr(Box<Node>, Box<Node>),
    Eq(Box<Node>, Box<Node>),
    Ne(Box<Node>, Box<Node>),
    Lt(Box<Node>, Box<Node>),
    Le(Box<Node>, Box<Node>),
    LogAnd(Box<Node>, Box<Node>),
    LogOr(Box<Node>, Box<Node>),
    Assign(Box<Node>, Box<Node>),
    Comma(Box<Node>, Box<Node>),
    Cond {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },
    MemZero(VarId),
    /// `alloca(size)`: reserves `size` bytes (rounded up to 16) below the
    /// current stack top and yields their address.
    Alloca(Box<Node>),
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
        /// Hidden buffer for a struct return, if the return type needs one.
        ret_buffer: Option<VarId>,
    },
    LabelVal(String),
    Cas {
        addr: Box<Node>,
        old: Box<Node>,
        new: Box<Node>,
    },
    Exch {
        addr: Box<Node>,
        val: Box<Node>,
    },
    StmtExpr(Vec<Node>),

    // statements
    If {
        cond: Box<Node>,
        then: Box<Node>,
        els: Option<Box<Node>>,
    },
    For {
        init: Option<Box<Node>>,
        cond: Option<Box<Node>>,
        inc: Option<Box<Node>>,
        body: Box<Node>,
        brk_label: String,
        cont_label: String,
    },
    Do {
        body: Box<Node>,
        cond: Box<Node>,
        brk_label: String,
        cont_label: String,
    },
    Switch {
        cond: Box<Node>,
        cases: Vec<CaseRange>,
        default: Option<Box<Node>>,
        body: Box<Node>,
        brk_label: String,
    },
    Block(Vec<Node>),
    Goto(String),
    GotoExpr(Box<Node>),
    Label(String, Box<Node>),
    Return(Option<Box<Node>>),
    ExprStmt(Box<Node>),
    Asm(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub ty: Rc<Type>,
    pub tok: Token,
    /// True when a call argument must be pushed to the stack rather than
    /// loaded into a register (classified before `push_args`/`gen_call` run).
    pub pass_by_stack: bool,
}

impl Node {
    pub fn new(kind: NodeKind, ty: Rc<Type>) -> Node {
        Node {
            kind,
            ty,
            tok: Token::default(),
            pass_by_stack: false,
        }
    }
}
