//! Per-language tables: keywords, operators and feature switches.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use thiserror::Error;

use crate::ast::{Fixity, Op, Type};
use crate::bytecode::BinaryOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Line-oriented language with `end`-terminated blocks
    Simple,
    /// C-like language with types and functions
    L2,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown language {0:?} (expected \"simple\" or \"l2\")")]
pub struct UnknownLanguage(String);

impl FromStr for Language {
    type Err = UnknownLanguage;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" | "aseba" => Ok(Self::Simple),
            "l2" => Ok(Self::L2),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Simple => "simple",
            Self::L2 => "l2",
        })
    }
}

// Longest symbols first: a keyword is tried before any of its prefixes.
const SIMPLE_KEYWORDS: &[&str] = &[
    "==", "!=", "<=", ">=", "|=", "^=", "&=", "*=", "/=", "%=", "+=", "-=", "<<=", ">>=", "++",
    "--", "(", ")", "[", "]", "-", "~", "*", "/", "%", "+", "<<", ">>", "&", "^", "|", ">", "<",
    "=", ",", ":", "abs", "and", "callsub", "call", "const", "do", "elseif", "else", "emit",
    "end", "for", "if", "in", "not", "onevent", "or", "return", "step", "sub", "then", "var",
    "when", "while",
];

const L2_KEYWORDS: &[&str] = &[
    "==", "!=", "<=", ">=", "|=", "^=", "&=", "*=", "/=", "%=", "+=", "-=", "<<=", ">>=", "++",
    "--", "(", ")", "[", "]", "-", "~", "!", "*", "/", "%", "+", "<<", ">>", "&&", "||", "&",
    "^", "|", ">", "<", "=", ",", "?", ":", "{", "}", ";", "bool", "break", "case", "const",
    "continue", "default", "do", "else", "emit", "false", "fixed", "for", "goto", "if", "int",
    "onevent", "return", "size", "switch", "true", "void", "when", "while",
];

type OperatorTable = HashMap<(&'static str, Fixity), Op>;

fn common_operators() -> Vec<((&'static str, Fixity), Op)> {
    use BinaryOp::*;
    use Fixity::*;
    let mut ops = vec![
        (("--", Prefix), Op::PreDecrement),
        (("++", Prefix), Op::PreIncrement),
        (("-", Prefix), Op::Negate),
        (("~", Prefix), Op::BitNot),
        (("--", Postfix), Op::PostDecrement),
        (("++", Postfix), Op::PostIncrement),
        (("=", Infix), Op::Assign),
    ];
    for (symbol, op) in [
        ("+=", Add),
        ("-=", Sub),
        ("*=", Mult),
        ("/=", Div),
        ("%=", Mod),
        ("<<=", Shl),
        (">>=", Shr),
        ("&=", BitAnd),
        ("|=", BitOr),
        ("^=", BitXor),
    ] {
        ops.push(((symbol, Infix), Op::CompoundAssign(op)));
    }
    for (symbol, op) in [
        ("*", Mult),
        ("/", Div),
        ("%", Mod),
        ("+", Add),
        ("-", Sub),
        ("<<", Shl),
        (">>", Shr),
        ("==", Eq),
        ("!=", Ne),
        ("<", Lt),
        ("<=", Le),
        (">", Gt),
        (">=", Ge),
        ("&", BitAnd),
        ("|", BitOr),
        ("^", BitXor),
    ] {
        ops.push(((symbol, Infix), Op::Binary(op)));
    }
    ops
}

lazy_static! {
    static ref SIMPLE_OPERATORS: OperatorTable = {
        let mut table: OperatorTable = common_operators().into_iter().collect();
        table.insert(("abs", Fixity::Prefix), Op::Abs);
        table.insert(("not", Fixity::Prefix), Op::Not);
        table.insert(("and", Fixity::Infix), Op::Binary(BinaryOp::And));
        table.insert(("or", Fixity::Infix), Op::Binary(BinaryOp::Or));
        table
    };
    static ref L2_OPERATORS: OperatorTable = {
        let mut table: OperatorTable = common_operators().into_iter().collect();
        table.insert(("!", Fixity::Prefix), Op::Not);
        table.insert(("bool", Fixity::Prefix), Op::Cast(Type::Boolean));
        table.insert(("fixed", Fixity::Prefix), Op::Cast(Type::Fixed));
        table.insert(("int", Fixity::Prefix), Op::Cast(Type::Number));
        table.insert(("size", Fixity::Prefix), Op::Size);
        table.insert(("&&", Fixity::Infix), Op::LogicAnd);
        table.insert(("||", Fixity::Infix), Op::LogicOr);
        table.insert(("?", Fixity::Infix), Op::Conditional);
        table.insert((":", Fixity::Infix), Op::ConditionalElse);
        table.insert((",", Fixity::Infix), Op::Comma);
        table.insert(("true", Fixity::Constant), Op::Bool(true));
        table.insert(("false", Fixity::Constant), Op::Bool(false));
        table
    };
}

impl Language {
    /// Guesses the language from the comment style, then from C-like
    /// punctuation.
    pub fn detect(source: &str) -> Self {
        let first_comment = source
            .char_indices()
            .find(|&(i, c)| c == '#' || source[i..].starts_with("//") || source[i..].starts_with("/*"));
        match first_comment {
            Some((_, '#')) => Self::Simple,
            Some(_) => Self::L2,
            None if source.contains(';') || source.contains('{') => Self::L2,
            None => Self::Simple,
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Simple => SIMPLE_KEYWORDS,
            Self::L2 => L2_KEYWORDS,
        }
    }

    pub fn operator(self, symbol: &str, fixity: Fixity) -> Option<Op> {
        let table: &OperatorTable = match self {
            Self::Simple => &SIMPLE_OPERATORS,
            Self::L2 => &L2_OPERATORS,
        };
        table.get(&(symbol, fixity)).copied()
    }

    /// Blocks open a new variable scope.
    pub const fn block_scoping(self) -> bool {
        matches!(self, Self::L2)
    }

    /// Has the `fixed` type and `digits.digits` literals.
    pub const fn has_fixed(self) -> bool {
        matches!(self, Self::L2)
    }

    pub const fn line_comment(self) -> &'static str {
        match self {
            Self::Simple => "#",
            Self::L2 => "//",
        }
    }

    pub const fn block_comment(self) -> (&'static str, &'static str) {
        match self {
            Self::Simple => ("#*", "*#"),
            Self::L2 => ("/*", "*/"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_char_symbols_come_before_prefixes() {
        for lang in [Language::Simple, Language::L2] {
            let kws = lang.keywords();
            for (i, kw) in kws.iter().enumerate() {
                for shorter in &kws[..i] {
                    assert!(
                        !(kw.starts_with(shorter) && kw.len() > shorter.len()
                            && !kw.chars().all(|c| c.is_ascii_alphabetic())),
                        "{kw} is shadowed by {shorter} in {lang}"
                    );
                }
            }
        }
    }

    #[test]
    fn operator_lookup_by_fixity() {
        assert_eq!(
            Language::Simple.operator("-", Fixity::Prefix),
            Some(Op::Negate)
        );
        assert_eq!(
            Language::Simple.operator("-", Fixity::Infix),
            Some(Op::Binary(BinaryOp::Sub))
        );
        assert_eq!(Language::Simple.operator("&&", Fixity::Infix), None);
        assert_eq!(Language::L2.operator("&&", Fixity::Infix), Some(Op::LogicAnd));
        assert_eq!(
            Language::L2.operator("true", Fixity::Constant),
            Some(Op::Bool(true))
        );
    }

    #[test]
    fn detects_language() {
        assert_eq!(Language::detect("# hello\nvar x = 1"), Language::Simple);
        assert_eq!(Language::detect("// c\nint x = 1;"), Language::L2);
        assert_eq!(Language::detect("int x = 1;"), Language::L2);
        assert_eq!(Language::detect("var x\nx = 2"), Language::Simple);
        assert_eq!("L2".parse(), Ok(Language::L2));
    }
}
