use crate::bytecode::to_s16;
use crate::error::{self, SourceMetadata, Span, WantedSpec};
use crate::language::Language;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexErrorKind {
    #[error("syntax error: unexpected {0:?}")]
    UnexpectedChar(char),
    #[error("unexpected {found:?}, expected {wanted}")]
    Expected {
        wanted: WantedSpec<char>,
        found: char,
    },
    #[error("hexadecimal number syntax error")]
    HexNumber,
    #[error("binary number syntax error")]
    BinaryNumber,
    #[error("unterminated comment")]
    UnterminatedComment,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {}", n),
            Self::Float(x) => write!(f, "number {}", x),
            Self::Name => write!(f, "name"),
            Self::Keyword(kw) => write!(f, "\"{}\"", kw),
        }
    }
}

pub struct LexerIter<'a> {
    lexer: Lexer<'a>,
    eof: bool,
}

pub type LexError = error::Error<LexErrorKind>;

impl<'a> Iterator for LexerIter<'a> {
    type Item = Result<Token<'a>, LexError>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.eof {
            None
        } else {
            let next = self.lexer.next_token();
            if matches!(next, Ok(None) | Err(_)) {
                self.eof = true;
            }
            next.transpose()
        }
    }
}

impl<'a> std::iter::FusedIterator for LexerIter<'a> {}

impl<'a> IntoIterator for Lexer<'a> {
    type IntoIter = LexerIter<'a>;
    type Item = <Self::IntoIter as Iterator>::Item;
    fn into_iter(self) -> Self::IntoIter {
        LexerIter {
            lexer: self,
            eof: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub source: Source<'a>,
    /// 1-based
    pub line: usize,
    /// 1-based
    pub col: usize,
}

impl<'a> Token<'a> {
    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.kind, TokenKind::Keyword(k) if k == kw)
    }
    pub const fn span(&self) -> Span {
        self.source.span
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    /// Integer literal, already wrapped to 16 bits
    Number(i16),
    /// `digits.digits` literal
    Float(f64),
    Name,
    Keyword(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source<'a> {
    pub span: Span,
    pub source: &'a str,
}

pub struct Lexer<'a> {
    input: std::iter::Peekable<std::str::CharIndices<'a>>,
    metadata: &'a SourceMetadata<'a>,
    language: Language,
    line: usize,
    line_start: usize,
}

const fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a SourceMetadata<'a>, language: Language) -> Self {
        Self {
            input: input.input().char_indices().peekable(),
            metadata: input,
            language,
            line: 1,
            line_start: 0,
        }
    }

    pub fn tokenize(self) -> Result<Vec<Token<'a>>, LexError> {
        self.into_iter().collect()
    }

    pub fn next_token(&mut self) -> Result<Option<Token<'a>>, LexError> {
        self.skip_blanks()?;
        let start = self.current_offset();
        let (line, col) = (self.line, self.column(start));
        let kind = if let Some(kind) = self.number().map_err(|e| e.add_context("reading number"))? {
            kind
        } else if let Some(kw) = self.keyword() {
            TokenKind::Keyword(kw)
        } else if self.name() {
            TokenKind::Name
        } else {
            return match self.input.peek().copied() {
                None => Ok(None),
                Some((pos, ch)) => Err(self.error(pos, LexErrorKind::UnexpectedChar(ch))),
            };
        };
        let token = Token {
            kind,
            source: self.source_until_current(start),
            line,
            col,
        };
        tracing::trace!(target: "lexer", "token {:?} at {}:{}", token.kind, line, col);
        Ok(Some(token))
    }

    fn skip_blanks(&mut self) -> Result<(), LexError> {
        let (block_start, block_end) = self.language.block_comment();
        loop {
            self.skip_while(char::is_whitespace);
            let start = self.current_offset();
            if self.eat_str(block_start).is_some() {
                if !self.skip_past(block_end) {
                    return Err(self.error(start, LexErrorKind::UnterminatedComment));
                }
            } else if self.eat_str(self.language.line_comment()).is_some() {
                self.skip_while(|c| c != '\n');
            } else {
                return Ok(());
            }
        }
    }

    fn keyword(&mut self) -> Option<&'static str> {
        let rest = &self.metadata.input()[self.current_offset()..];
        let kw = self.language.keywords().iter().copied().find(|kw| {
            if !rest.starts_with(kw) {
                return false;
            }
            // "elsewhere" is a name, not "else" followed by "where"
            let last = kw.chars().last().unwrap_or(' ');
            let next = rest[kw.len()..].chars().next().unwrap_or(' ');
            !(is_name_char(last) && is_name_char(next))
        })?;
        self.eat_str(kw);
        Some(kw)
    }

    fn name(&mut self) -> bool {
        if self
            .skip_if(|c| c.is_ascii_alphabetic() || c == '_')
            .is_none()
        {
            return false;
        }
        self.skip_while(is_name_char);
        true
    }

    fn number(&mut self) -> Result<Option<TokenKind>, LexError> {
        let start = match self.input.peek() {
            Some(&(pos, ch)) if ch.is_ascii_digit() => pos,
            _ => return Ok(None),
        };
        let kind = if self.eat_str("0x").or_else(|| self.eat_str("0X")).is_some() {
            let digits = self.skip_while(|c| c.is_ascii_hexdigit());
            if digits.source.is_empty() {
                return Err(self.error(start, LexErrorKind::HexNumber));
            }
            TokenKind::Number(wrap_digits(digits.source, 16))
        } else if self.eat_str("0b").or_else(|| self.eat_str("0B")).is_some() {
            let digits = self.skip_while(|c| c == '0' || c == '1');
            if digits.source.is_empty() {
                return Err(self.error(start, LexErrorKind::BinaryNumber));
            }
            TokenKind::Number(wrap_digits(digits.source, 2))
        } else {
            let digits = self.skip_while(|c| c.is_ascii_digit());
            if self.language.has_fixed() && self.at_fraction() {
                self.advance();
                self.skip_while(|c| c.is_ascii_digit());
                let text = self.source_until_current(start).source;
                TokenKind::Float(text.parse().unwrap_or(0.0))
            } else {
                TokenKind::Number(wrap_digits(digits.source, 10))
            }
        };
        if let Some((pos, ch)) = self
            .input
            .peek()
            .filter(|(_, ch)| ch.is_ascii_alphanumeric() || *ch == '_')
            .copied()
        {
            return Err(self.error(
                pos,
                LexErrorKind::Expected {
                    wanted: WantedSpec::Description("delimiter or space after number"),
                    found: ch,
                },
            ));
        }
        Ok(Some(kind))
    }

    /// A `.` followed by a digit.
    fn at_fraction(&mut self) -> bool {
        let rest = &self.metadata.input()[self.current_offset()..];
        let mut chars = rest.chars();
        chars.next() == Some('.') && chars.next().map_or(false, |c| c.is_ascii_digit())
    }

    fn eat_str(&mut self, str: &str) -> Option<usize> {
        let current_offset = self.current_offset();
        if self.metadata.input()[current_offset..].starts_with(str) {
            for _ in str.chars() {
                self.advance();
            }
            Some(current_offset)
        } else {
            None
        }
    }

    /// Advances past the next occurrence of `end`, if any.
    fn skip_past(&mut self, end: &str) -> bool {
        while self.input.peek().is_some() {
            if self.eat_str(end).is_some() {
                return true;
            }
            self.advance();
        }
        false
    }

    fn skip_while<F>(&mut self, filter: F) -> Source<'a>
    where
        F: Fn(char) -> bool,
    {
        let current = self.current_offset();
        while self.input.peek().filter(|(_, ch)| filter(*ch)).is_some() {
            self.advance();
        }
        self.source_until_current(current)
    }

    fn skip_if<F>(&mut self, filter: F) -> Option<(usize, char)>
    where
        F: Fn(char) -> bool,
    {
        let (pos, ch) = *self.input.peek()?;
        if filter(ch) {
            self.advance();
            Some((pos, ch))
        } else {
            None
        }
    }

    fn advance(&mut self) {
        if let Some((pos, '\n')) = self.input.next() {
            self.line += 1;
            self.line_start = pos + 1;
        }
    }

    fn column(&self, offset: usize) -> usize {
        self.metadata.input()[self.line_start..offset].chars().count() + 1
    }

    fn source_until_current(&mut self, start: usize) -> Source<'a> {
        let current = self.current_offset();
        Source {
            span: Span::with_len(start, current - start),
            source: &self.metadata.input()[start..current],
        }
    }

    fn error(&self, position: usize, kind: LexErrorKind) -> LexError {
        LexError::new(kind).with_source(Span::new(position), self.metadata)
    }

    pub const fn get_metadata(&self) -> &SourceMetadata {
        self.metadata
    }

    fn current_offset(&mut self) -> usize {
        self.input
            .peek()
            .map(|(x, _)| *x)
            .unwrap_or_else(|| self.metadata.input().len())
    }
}

/// Digits in `radix` taken modulo 2^16, as the VM would see them.
fn wrap_digits(digits: &str, radix: u32) -> i16 {
    let value = digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0i32, |acc, d| {
            acc.wrapping_mul(radix as i32).wrapping_add(d as i32)
        });
    to_s16(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str, language: Language) -> Vec<TokenKind> {
        let meta = SourceMetadata::new(src);
        Lexer::new(&meta, language)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn lex_error(src: &str, language: Language) -> LexErrorKind {
        let meta = SourceMetadata::new(src);
        Lexer::new(&meta, language).tokenize().unwrap_err().kind
    }

    #[test]
    fn simple_statement() {
        use TokenKind::*;
        assert_eq!(
            kinds("var x[3] = 0x10 # comment\nx <<= 2", Language::Simple),
            vec![
                Keyword("var"),
                Name,
                Keyword("["),
                Number(3),
                Keyword("]"),
                Keyword("="),
                Number(16),
                Name,
                Keyword("<<="),
                Number(2),
            ]
        );
    }

    #[test]
    fn keywords_need_a_boundary() {
        use TokenKind::*;
        assert_eq!(
            kinds("elseif elsewhere else", Language::Simple),
            vec![Keyword("elseif"), Name, Keyword("else")]
        );
        assert_eq!(kinds("motor.left.target", Language::Simple), vec![Name]);
    }

    #[test]
    fn comments_per_language() {
        assert_eq!(kinds("#* a\n b *# 1", Language::Simple), vec![TokenKind::Number(1)]);
        assert_eq!(
            kinds("/* x */ 1 // y\n2", Language::L2),
            vec![TokenKind::Number(1), TokenKind::Number(2)]
        );
        assert_eq!(
            lex_error("/* never closed", Language::L2),
            LexErrorKind::UnterminatedComment
        );
    }

    #[test]
    fn numbers() {
        use TokenKind::*;
        assert_eq!(kinds("0b101 1.5", Language::L2), vec![Number(5), Float(1.5)]);
        assert_eq!(kinds("40000", Language::Simple), vec![Number(-25536)]);
        assert_eq!(lex_error("0x", Language::Simple), LexErrorKind::HexNumber);
        assert!(matches!(
            lex_error("12ab", Language::Simple),
            LexErrorKind::Expected { found: 'a', .. }
        ));
    }

    #[test]
    fn float_literals_only_in_l2() {
        assert_eq!(
            lex_error("1.5", Language::Simple),
            LexErrorKind::UnexpectedChar('.')
        );
    }

    #[test]
    fn positions_are_one_based() {
        let meta = SourceMetadata::new("a\n  bc");
        let tokens = Lexer::new(&meta, Language::Simple).tokenize().unwrap();
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
        assert_eq!(tokens[1].source.source, "bc");
        assert_eq!(tokens[1].span(), Span::with_len(4, 2));
    }

    #[test]
    fn unexpected_character_has_position() {
        let meta = SourceMetadata::new("x = 1\ny = $");
        let err = Lexer::new(&meta, Language::Simple).tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedChar('$'));
        assert!(err.to_string().contains("line 2 col 5"));
    }
}
