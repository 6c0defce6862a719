//! Instruction encoding of the robot virtual machine.
//!
//! Every instruction starts with a 16-bit word whose top 4 bits are the
//! opcode and whose low 12 bits are an operand. Some instructions are
//! followed by extra words (see [`Opcode::len`]).
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Stop = 0,
    SmallImmediate = 1,
    LargeImmediate = 2,
    Load = 3,
    Store = 4,
    LoadIndirect = 5,
    StoreIndirect = 6,
    Unary = 7,
    Binary = 8,
    Jump = 9,
    ConditionalBranch = 10,
    Emit = 11,
    NativeCall = 12,
    SubCall = 13,
    Return = 14,
}

impl Opcode {
    pub const fn from_word(word: u16) -> Option<Self> {
        Some(match word >> 12 {
            0 => Self::Stop,
            1 => Self::SmallImmediate,
            2 => Self::LargeImmediate,
            3 => Self::Load,
            4 => Self::Store,
            5 => Self::LoadIndirect,
            6 => Self::StoreIndirect,
            7 => Self::Unary,
            8 => Self::Binary,
            9 => Self::Jump,
            10 => Self::ConditionalBranch,
            11 => Self::Emit,
            12 => Self::NativeCall,
            13 => Self::SubCall,
            14 => Self::Return,
            _ => return None,
        })
    }

    /// First word of the instruction with the 12-bit operand `arg`.
    pub const fn word(self, arg: u16) -> u16 {
        ((self as u16) << 12) | (arg & 0xfff)
    }

    /// Number of words the instruction occupies.
    pub const fn len(self) -> usize {
        match self {
            Self::LargeImmediate
            | Self::LoadIndirect
            | Self::StoreIndirect
            | Self::ConditionalBranch => 2,
            Self::Emit => 3,
            _ => 1,
        }
    }
}

pub const STOP: u16 = 0x0000;
pub const RET: u16 = 0xe000;

/// Conditional branch flag making it edge-triggered ("when").
pub const WHEN_FLAG: u16 = 0x100;
/// Set by the VM on a "when" branch whose condition held last time.
pub const WHEN_LAST_FLAG: u16 = 0x200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg = 0,
    Abs = 1,
    BitNot = 2,
}

impl UnaryOp {
    pub const fn word(self) -> u16 {
        Opcode::Unary.word(self as u16)
    }
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::Neg,
            1 => Self::Abs,
            2 => Self::BitNot,
            _ => return None,
        })
    }
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Neg => "neg",
            Self::Abs => "abs",
            Self::BitNot => "bitnot",
        }
    }
    pub fn eval(self, n: i32) -> i32 {
        match self {
            Self::Neg => n.wrapping_neg(),
            Self::Abs => n.wrapping_abs(),
            Self::BitNot => !n,
        }
    }
}

/// Binary operators, in VM code order. The same codes select the
/// comparison of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Shl = 0,
    Shr = 1,
    Add = 2,
    Sub = 3,
    Mult = 4,
    Div = 5,
    Mod = 6,
    BitOr = 7,
    BitXor = 8,
    BitAnd = 9,
    Eq = 10,
    Ne = 11,
    Gt = 12,
    Ge = 13,
    Lt = 14,
    Le = 15,
    Or = 16,
    And = 17,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 18] = [
        Self::Shl,
        Self::Shr,
        Self::Add,
        Self::Sub,
        Self::Mult,
        Self::Div,
        Self::Mod,
        Self::BitOr,
        Self::BitXor,
        Self::BitAnd,
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Ge,
        Self::Lt,
        Self::Le,
        Self::Or,
        Self::And,
    ];

    pub const fn code(self) -> u16 {
        self as u16
    }
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
    pub const fn word(self) -> u16 {
        Opcode::Binary.word(self as u16)
    }
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Gt | Self::Ge | Self::Lt | Self::Le
        )
    }
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::Or | Self::And)
    }
    /// Comparison with the opposite outcome, used to branch on `!cond`.
    pub const fn negated(self) -> Option<Self> {
        Some(match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            _ => return None,
        })
    }
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mult => "mult",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::BitOr => "bitor",
            Self::BitXor => "bitxor",
            Self::BitAnd => "bitand",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Or => "or",
            Self::And => "and",
        }
    }

    /// Integer semantics shared by the constant folder and the VM.
    /// Returns `None` on division or modulo by zero. The result is not
    /// wrapped; see [`to_s16`].
    pub fn eval(self, a: i32, b: i32) -> Option<i32> {
        Some(match self {
            Self::Shl => a.wrapping_shl(b as u32 & 31),
            Self::Shr => a.wrapping_shr(b as u32 & 31),
            Self::Add => a.wrapping_add(b),
            Self::Sub => a.wrapping_sub(b),
            Self::Mult => a.wrapping_mul(b),
            Self::Div => a.checked_div(b)?,
            Self::Mod => a.checked_rem(b)?,
            Self::BitOr => a | b,
            Self::BitXor => a ^ b,
            Self::BitAnd => a & b,
            Self::Eq => (a == b) as i32,
            Self::Ne => (a != b) as i32,
            Self::Gt => (a > b) as i32,
            Self::Ge => (a >= b) as i32,
            Self::Lt => (a < b) as i32,
            Self::Le => (a <= b) as i32,
            Self::Or => (a != 0 || b != 0) as i32,
            Self::And => (a != 0 && b != 0) as i32,
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Wraps an integer to the VM's 16-bit signed range.
pub const fn to_s16(n: i32) -> i16 {
    n as i16
}

pub const fn to_s12(word: u16) -> i16 {
    let n = (word & 0xfff) as i16;
    if n >= 0x800 {
        n - 0x1000
    } else {
        n
    }
}

/// Pushes a constant, in one word when it fits in 12 signed bits.
pub fn push_number(n: i16) -> Vec<u16> {
    if (-0x800..0x800).contains(&n) {
        vec![Opcode::SmallImmediate.word(n as u16)]
    } else {
        vec![Opcode::LargeImmediate.word(0), n as u16]
    }
}

pub const fn load(addr: u16) -> u16 {
    Opcode::Load.word(addr)
}

pub const fn store(addr: u16) -> u16 {
    Opcode::Store.word(addr)
}

pub const fn load_indirect(addr: u16, size: u16) -> [u16; 2] {
    [Opcode::LoadIndirect.word(addr), size]
}

pub const fn store_indirect(addr: u16, size: u16) -> [u16; 2] {
    [Opcode::StoreIndirect.word(addr), size]
}

/// Conditional branch with a zero offset, to be patched later.
pub const fn conditional_branch(op: BinaryOp, when: bool) -> [u16; 2] {
    let flag = if when { WHEN_FLAG } else { 0 };
    [Opcode::ConditionalBranch.word(op.code() | flag), 0]
}

pub const fn jump(offset: i16) -> u16 {
    Opcode::Jump.word(offset as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_and_large_immediates() {
        assert_eq!(push_number(11), vec![0x100b]);
        assert_eq!(push_number(-1), vec![0x1fff]);
        assert_eq!(push_number(-0x800), vec![0x1800]);
        assert_eq!(push_number(0x800), vec![0x2000, 0x0800]);
        assert_eq!(push_number(-2000), vec![0x1830]);
        assert_eq!(push_number(-2049), vec![0x2000, (-2049i16) as u16]);
    }

    #[test]
    fn signed_operands() {
        assert_eq!(to_s12(0x9fff), -1);
        assert_eq!(to_s12(0x97ff), 0x7ff);
        assert_eq!(to_s16(40000), -25536);
    }

    #[test]
    fn opcodes_round_trip_through_words() {
        assert_eq!(BinaryOp::Le.word(), 0x800f);
        assert_eq!(BinaryOp::from_code(11), Some(BinaryOp::Ne));
        assert_eq!(Opcode::from_word(RET), Some(Opcode::Return));
        assert_eq!(Opcode::from_word(0xf000), None);
        assert_eq!(conditional_branch(BinaryOp::Eq, true), [0xa10a, 0]);
    }

    #[test]
    fn integer_semantics() {
        assert_eq!(BinaryOp::Div.eval(-7, 2), Some(-3));
        assert_eq!(BinaryOp::Mod.eval(-7, 2), Some(-1));
        assert_eq!(BinaryOp::Div.eval(1, 0), None);
        assert_eq!(BinaryOp::And.eval(3, 0), Some(0));
        assert_eq!(to_s16(BinaryOp::Mult.eval(300, 300).unwrap_or(0)), 24464);
        assert_eq!(UnaryOp::Abs.eval(-5), 5);
    }
}
