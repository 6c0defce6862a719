//! Function-call syntax for the math natives of the target.
use std::fmt;

use crate::ast::Type;
use crate::language::Language;
use crate::target::NodeDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Macro {
    Min,
    Max,
    Clamp,
    MulDiv,
    Atan2,
    Sin,
    Cos,
    Sqrt,
    Rand,
    /// `abs(x)` in the C-like language, where `abs` is not an operator
    Abs,
}

impl Macro {
    pub const ALL: [Macro; 10] = [
        Self::Min,
        Self::Max,
        Self::Clamp,
        Self::MulDiv,
        Self::Atan2,
        Self::Sin,
        Self::Cos,
        Self::Sqrt,
        Self::Rand,
        Self::Abs,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Clamp => "clamp",
            Self::MulDiv => "muldiv",
            Self::Atan2 => "atan2",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Sqrt => "sqrt",
            Self::Rand => "rand",
            Self::Abs => "abs",
        }
    }

    /// Native function doing the work; `None` for macros expanded inline.
    pub const fn native(self) -> Option<&'static str> {
        Some(match self {
            Self::Min => "math.min",
            Self::Max => "math.max",
            Self::Clamp => "math.clamp",
            Self::MulDiv => "math.muldiv",
            Self::Atan2 => "math.atan2",
            Self::Sin => "math.sin",
            Self::Cos => "math.cos",
            Self::Sqrt => "math.sqrt",
            Self::Rand => "math.rand",
            Self::Abs => return None,
        })
    }

    pub const fn arity(self) -> usize {
        match self {
            Self::Rand => 0,
            Self::Sin | Self::Cos | Self::Sqrt | Self::Abs => 1,
            Self::Min | Self::Max | Self::Atan2 => 2,
            Self::Clamp | Self::MulDiv => 3,
        }
    }

    pub fn result_type(self, args: &[Type]) -> Type {
        match self {
            Self::Abs => args.first().copied().unwrap_or(Type::Number),
            _ => Type::Number,
        }
    }

    /// Resolves `name` to a macro usable with this language and target.
    pub fn lookup(name: &str, language: Language, node: &NodeDescription) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| {
            m.name() == name
                && match m.native() {
                    Some(native) => node.native(native).is_some(),
                    None => language == Language::L2,
                }
        })
    }
}

impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{NativeFunction, NodeDescription};

    #[test]
    fn availability_follows_natives() {
        let thymio = NodeDescription::thymio();
        assert_eq!(
            Macro::lookup("muldiv", Language::Simple, &thymio),
            Some(Macro::MulDiv)
        );
        assert_eq!(Macro::lookup("abs", Language::Simple, &thymio), None);
        assert_eq!(Macro::lookup("abs", Language::L2, &thymio), Some(Macro::Abs));

        let bare = NodeDescription {
            native_functions: vec![NativeFunction {
                name: "math.min".into(),
                args: vec![-1, -1, -1],
            }],
            ..thymio
        };
        assert_eq!(Macro::lookup("min", Language::L2, &bare), Some(Macro::Min));
        assert_eq!(Macro::lookup("max", Language::L2, &bare), None);
    }

    #[test]
    fn abs_keeps_argument_type() {
        assert_eq!(Macro::Abs.result_type(&[Type::Fixed]), Type::Fixed);
        assert_eq!(Macro::Sqrt.result_type(&[Type::Fixed]), Type::Number);
    }
}
