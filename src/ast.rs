//! Expression and statement trees shared by both languages.
use std::fmt;
use std::rc::Rc;

use crate::bytecode::BinaryOp;
use crate::error::Span;
use crate::macros::Macro;

/// Result type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Not known yet
    Undef,
    Void,
    Number,
    Boolean,
    Fixed,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Undef => "undefined",
            Self::Void => "void",
            Self::Number => "int",
            Self::Boolean => "bool",
            Self::Fixed => "fixed",
        })
    }
}

pub mod priority {
    pub const CONSTANT: u8 = 200;
    pub const PRE: u8 = 150;
    pub const MULT: u8 = 140;
    pub const ADD: u8 = 130;
    pub const SHIFT: u8 = 120;
    pub const BINAND: u8 = 110;
    pub const BINXOR: u8 = 100;
    pub const BINOR: u8 = 90;
    pub const COMP: u8 = 80;
    pub const AND: u8 = 60;
    pub const OR: u8 = 50;
    pub const CONDITIONAL_ELSE: u8 = 41;
    pub const CONDITIONAL: u8 = 40;
    pub const ASSIGNMENT: u8 = 30;
    pub const COMMA: u8 = 25;
    pub const PAR: u8 = 20;
    pub const STATEMENT: u8 = 10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fixity {
    Prefix,
    Postfix,
    Infix,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Operator mapped directly to a VM binary opcode
    Binary(BinaryOp),
    /// `&&`, evaluated lazily
    LogicAnd,
    /// `||`, evaluated lazily
    LogicOr,
    Assign,
    CompoundAssign(BinaryOp),
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
    Negate,
    BitNot,
    Abs,
    /// Logical negation (`not` and `!`)
    Not,
    Cast(Type),
    Size,
    /// `?`, whose second operand is a [`Op::ConditionalElse`]
    Conditional,
    /// `:`
    ConditionalElse,
    Comma,
    Bool(bool),
}

impl Op {
    pub const fn priority(self) -> u8 {
        use priority::*;
        match self {
            Self::Binary(op) => match op {
                BinaryOp::Mult | BinaryOp::Div | BinaryOp::Mod => MULT,
                BinaryOp::Add | BinaryOp::Sub => ADD,
                BinaryOp::Shl | BinaryOp::Shr => SHIFT,
                BinaryOp::BitAnd => BINAND,
                BinaryOp::BitXor => BINXOR,
                BinaryOp::BitOr => BINOR,
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Lt
                | BinaryOp::Le => COMP,
                BinaryOp::And => AND,
                BinaryOp::Or => OR,
            },
            Self::LogicAnd => AND,
            Self::LogicOr => OR,
            Self::Assign | Self::CompoundAssign(_) => ASSIGNMENT,
            Self::PreIncrement
            | Self::PreDecrement
            | Self::PostIncrement
            | Self::PostDecrement
            | Self::Negate
            | Self::BitNot
            | Self::Abs
            | Self::Not
            | Self::Cast(_)
            | Self::Size => PRE,
            Self::Conditional => CONDITIONAL,
            Self::ConditionalElse => CONDITIONAL_ELSE,
            Self::Comma => COMMA,
            Self::Bool(_) => CONSTANT,
        }
    }

    /// Operators whose first operand is written to.
    pub const fn is_assignment(self) -> bool {
        matches!(
            self,
            Self::Assign
                | Self::CompoundAssign(_)
                | Self::PreIncrement
                | Self::PreDecrement
                | Self::PostIncrement
                | Self::PostDecrement
        )
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Binary(op) | Self::CompoundAssign(op) => {
                let compound = matches!(self, Self::CompoundAssign(_));
                match (op, compound) {
                    (BinaryOp::Shl, false) => "<<",
                    (BinaryOp::Shl, true) => "<<=",
                    (BinaryOp::Shr, false) => ">>",
                    (BinaryOp::Shr, true) => ">>=",
                    (BinaryOp::Add, false) => "+",
                    (BinaryOp::Add, true) => "+=",
                    (BinaryOp::Sub, false) => "-",
                    (BinaryOp::Sub, true) => "-=",
                    (BinaryOp::Mult, false) => "*",
                    (BinaryOp::Mult, true) => "*=",
                    (BinaryOp::Div, false) => "/",
                    (BinaryOp::Div, true) => "/=",
                    (BinaryOp::Mod, false) => "%",
                    (BinaryOp::Mod, true) => "%=",
                    (BinaryOp::BitOr, false) => "|",
                    (BinaryOp::BitOr, true) => "|=",
                    (BinaryOp::BitXor, false) => "^",
                    (BinaryOp::BitXor, true) => "^=",
                    (BinaryOp::BitAnd, false) => "&",
                    (BinaryOp::BitAnd, true) => "&=",
                    (BinaryOp::Eq, _) => "==",
                    (BinaryOp::Ne, _) => "!=",
                    (BinaryOp::Gt, _) => ">",
                    (BinaryOp::Ge, _) => ">=",
                    (BinaryOp::Lt, _) => "<",
                    (BinaryOp::Le, _) => "<=",
                    (BinaryOp::Or, _) => "or",
                    (BinaryOp::And, _) => "and",
                }
            }
            Self::LogicAnd => "&&",
            Self::LogicOr => "||",
            Self::Assign => "=",
            Self::PreIncrement | Self::PostIncrement => "++",
            Self::PreDecrement | Self::PostDecrement => "--",
            Self::Negate => "-",
            Self::BitNot => "~",
            Self::Abs => "abs",
            Self::Not => "not",
            Self::Cast(Type::Boolean) => "bool",
            Self::Cast(Type::Fixed) => "fixed",
            Self::Cast(_) => "int",
            Self::Size => "size",
            Self::Conditional => "?",
            Self::ConditionalElse => ":",
            Self::Comma => ",",
            Self::Bool(true) => "true",
            Self::Bool(false) => "false",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: Type,
    /// Empty for scalars
    pub dims: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(i16),
    Fixed(f64),
    Var(Variable),
    Index {
        var: Variable,
        indices: Vec<Expr>,
    },
    /// Items in column-major order
    Array(Vec<Expr>),
    Op {
        op: Op,
        args: Vec<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        callee: Option<Callee>,
    },
    /// Value already pushed on the VM stack (left side of `op=`, `++`, `--`).
    Placeholder,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: Type::Undef,
            dims: Vec::new(),
        }
    }
    pub fn number(n: i16, span: Span) -> Self {
        Self::new(ExprKind::Number(n), span).typed(Type::Number)
    }
    pub fn boolean(b: bool, span: Span) -> Self {
        Self::new(ExprKind::Number(b as i16), span).typed(Type::Boolean)
    }
    pub fn fixed(f: f64, span: Span) -> Self {
        Self::new(ExprKind::Fixed(f), span).typed(Type::Fixed)
    }
    pub fn op(op: Op, args: Vec<Expr>, span: Span) -> Self {
        Self::new(ExprKind::Op { op, args }, span)
    }
    pub fn var(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Var(Variable::new(name)), span)
    }
    pub fn placeholder(ty: Type, span: Span) -> Self {
        Self::new(ExprKind::Placeholder, span).typed(ty)
    }
    #[must_use]
    pub fn typed(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }
    #[must_use]
    pub fn with_dims(mut self, dims: Vec<usize>) -> Self {
        self.dims = dims;
        self
    }

    /// Number of words of the value.
    pub fn size(&self) -> usize {
        if self.ty == Type::Void {
            0
        } else {
            self.dims.iter().product()
        }
    }
    pub fn is_scalar(&self) -> bool {
        self.size() == 1
    }
    pub const fn is_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Number(_) | ExprKind::Fixed(_))
    }
    pub const fn as_number(&self) -> Option<i16> {
        match self.kind {
            ExprKind::Number(n) => Some(n),
            _ => None,
        }
    }
    /// Truth value of a literal.
    pub fn truth(&self) -> Option<bool> {
        match self.kind {
            ExprKind::Number(n) => Some(n != 0),
            ExprKind::Fixed(f) => Some(f != 0.0),
            _ => None,
        }
    }
    /// Can be written to.
    pub const fn is_lvalue(&self) -> bool {
        matches!(self.kind, ExprKind::Var(_) | ExprKind::Index { .. })
    }
    pub fn op_kind(&self) -> Option<Op> {
        match &self.kind {
            ExprKind::Op { op, .. } => Some(*op),
            _ => None,
        }
    }
}

/// A name in an expression, resolved to its storage by the allocation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub storage: Option<Storage>,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Fixed address in variable memory
    Absolute,
    /// Offset from the frame pointer of the current function
    Frame,
    /// Frame slot holding the absolute address of the actual variable
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    pub offset: usize,
    pub dims: Vec<usize>,
    pub ty: Type,
    pub mode: Addressing,
}

impl Storage {
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Function(Rc<FunctionSignature>),
    Macro(Macro),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub dims: Vec<usize>,
    pub by_ref: bool,
    /// Frame offset in the callee
    pub offset: usize,
}

impl Param {
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub const fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    VarDecl(VarDecl),
    ConstDecl {
        name: String,
        value: Expr,
    },
    Expr(Expr),
    If {
        arms: Vec<IfArm>,
        otherwise: Option<Vec<Stmt>>,
    },
    When {
        cond: Expr,
        body: Vec<Stmt>,
    },
    While {
        label: Option<String>,
        /// `None` loops forever
        cond: Option<Expr>,
        body: Vec<Stmt>,
    },
    DoWhile {
        label: Option<String>,
        body: Vec<Stmt>,
        cond: Expr,
    },
    /// `for v in a:b step s`
    RangeFor {
        label: Option<String>,
        var: Expr,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    /// `for (init; cond; step)`
    For {
        label: Option<String>,
        init: Vec<Stmt>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Switch {
        label: Option<String>,
        subject: Expr,
        body: Vec<Stmt>,
    },
    Case(Expr),
    Default,
    Block(Vec<Stmt>),
    Label(String),
    Goto(String),
    Break(Option<String>),
    Continue(Option<String>),
    NativeCall {
        name: String,
        args: Vec<Expr>,
    },
    CallSub(String),
    Emit {
        event: String,
        value: Option<Expr>,
    },
    Return(Option<Expr>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfArm {
    pub cond: Expr,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    /// `None` for a size inferred from the initial value (`x[]`)
    pub dims: Vec<Option<Expr>>,
    pub init: Option<Expr>,
    pub storage: Option<Storage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub ret: Type,
    pub params: Vec<ParamDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: String,
    pub ty: Type,
    pub dims: Vec<Expr>,
    pub by_ref: bool,
    pub span: Span,
}

/// One statement as produced by the parser, before blocks are paired up.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Plain(Stmt),
    Open(Opener, Span),
    ElseIf(Expr, Span),
    Else(Span),
    End(Span),
    /// `} while (cond);` closing a `do` block
    EndWhile(Expr, Span),
    /// Starts a new code unit (simple language `onevent` and `sub`)
    Header(UnitHeader, Span),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Opener {
    If(Expr),
    When(Expr),
    While(Expr),
    Do,
    RangeFor {
        var: Expr,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        step: Option<Expr>,
    },
    Switch(Expr),
    Block,
    OnEvent(String),
    Function(FunctionDecl),
}

impl Opener {
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::If(_) => "if",
            Self::When(_) => "when",
            Self::While(_) => "while",
            Self::Do => "do",
            Self::RangeFor { .. } | Self::For { .. } => "for",
            Self::Switch(_) => "switch",
            Self::Block => "block",
            Self::OnEvent(_) => "onevent",
            Self::Function(_) => "function definition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitHeader {
    OnEvent(String),
    Sub(String),
}

/// Separately placed piece of code: the init code, an event handler, a
/// subroutine or a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub kind: UnitKind,
    pub span: Span,
    pub body: Vec<Stmt>,
    /// Words of frame-relative storage used by a function's locals.
    pub frame_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitKind {
    Init,
    OnEvent(String),
    Sub(String),
    Function {
        decl: FunctionDecl,
        signature: Option<Rc<FunctionSignature>>,
    },
}

impl UnitKind {
    /// Name used to resolve calls to this unit.
    pub fn callable_name(&self) -> Option<&str> {
        match self {
            Self::Sub(name) => Some(name),
            Self::Function { decl, .. } => Some(&decl.name),
            Self::Init | Self::OnEvent(_) => None,
        }
    }
    /// Ends with `ret` rather than `stop`.
    pub const fn is_callable(&self) -> bool {
        matches!(self, Self::Sub(_) | Self::Function { .. })
    }
}

/// Whole program after the tree builder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub units: Vec<Unit>,
    /// Words of absolute storage used by declared variables.
    pub module_size: usize,
}
