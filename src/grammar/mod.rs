use crate::ast::Line;
use crate::config::CompilerOptions;
use crate::error::*;
use crate::language::Language;
use crate::lexer::{LexErrorKind, Lexer, Token, TokenKind};

mod expr;
mod l2;
mod simple;

pub use expr::parse_expression;

pub struct Parser<'source> {
    tokens: Vec<Token<'source>>,
    index: usize,
    metadata: &'source SourceMetadata<'source>,
    options: &'source CompilerOptions,
}

impl<'source> Parser<'source> {
    pub fn new(
        source: &'source SourceMetadata<'source>,
        options: &'source CompilerOptions,
    ) -> ParseRes<Self> {
        let tokens = Lexer::new(source, options.language)
            .tokenize()
            .map_err(|e| e.map_kind(ParseErrorKind::LexError))?;
        Ok(Self {
            tokens,
            index: 0,
            metadata: source,
            options,
        })
    }

    pub const fn language(&self) -> Language {
        self.options.language
    }
    pub const fn options(&self) -> &CompilerOptions {
        self.options
    }

    /// Parses the whole source into a flat list of statements.
    pub fn parse_lines(&mut self) -> ParseRes<Vec<Line>> {
        let mut lines = Vec::new();
        while !self.at_end() {
            let parsed = match self.language() {
                Language::Simple => simple::parse_statement(self),
                Language::L2 => l2::parse_statement(self),
            }?;
            lines.extend(parsed);
        }
        tracing::debug!(target: "parser", "parsed {} statements", lines.len());
        Ok(lines)
    }

    pub fn at_end(&self) -> bool {
        self.index >= self.tokens.len()
    }
    pub fn peek_token(&self) -> Option<&Token<'source>> {
        self.peek_nth(0)
    }
    pub fn peek_nth(&self, n: usize) -> Option<&Token<'source>> {
        self.tokens.get(self.index + n)
    }
    pub fn check_keyword(&self, kw: &str) -> bool {
        self.check_keyword_at(0, kw)
    }
    pub fn check_keyword_at(&self, n: usize, kw: &str) -> bool {
        self.peek_nth(n).map_or(false, |t| t.is_keyword(kw))
    }
    pub fn check_name_at(&self, n: usize) -> bool {
        matches!(self.peek_nth(n).map(|t| t.kind), Some(TokenKind::Name))
    }
    /// Span of the current token, or an empty span at the end of input.
    pub fn current_token_span(&self) -> Span {
        self.peek_token().map_or_else(
            || Span::with_len(self.metadata.input().len(), 0),
            |t| t.source.span,
        )
    }
    pub fn current_token_source(&self) -> &'source str {
        self.peek_token().map_or("", |t| t.source.source)
    }
    /// Token index, for backtracking with [`Parser::rewind`].
    pub const fn checkpoint(&self) -> usize {
        self.index
    }
    pub fn rewind(&mut self, checkpoint: usize) {
        self.index = checkpoint;
    }
    pub fn accept_current(&mut self) {
        self.index += 1;
    }
    /// Consumes the keyword if it is the current token.
    pub fn eat_keyword(&mut self, kw: &str) -> bool {
        let found = self.check_keyword(kw);
        if found {
            self.accept_current();
        }
        found
    }
    pub fn emit_error_at<T>(&self, span: Span, kind: ParseErrorKind) -> ParseRes<T> {
        Err(ParseError::new(kind).with_source(span, self.metadata))
    }
    pub fn expect_a_token(
        &self,
        wanted: Option<WantedSpec<TokenKind>>,
    ) -> ParseRes<Token<'source>> {
        match self.peek_token() {
            Some(tok) => Ok(tok.clone()),
            None => self.emit_error_at(
                self.current_token_span(),
                ParseErrorKind::UnexpectedEOF { wanted },
            ),
        }
    }
    pub fn reject_current_token<T>(&self, reason: ParseErrorKind) -> ParseRes<T> {
        self.emit_error_at(self.current_token_span(), reason)
    }
    /// Requires the keyword `kw` and consumes it.
    pub fn keyword(&mut self, kw: &'static str) -> ParseRes<Span> {
        let tok = self.expect_a_token(Some(WantedSpec::Specific(TokenKind::Keyword(kw))))?;
        if tok.is_keyword(kw) {
            self.accept_current();
            Ok(tok.span())
        } else {
            self.reject_current_token(ParseErrorKind::Expected {
                wanted: WantedSpec::Specific(TokenKind::Keyword(kw)),
                found: tok.kind,
            })
        }
    }
    /// Requires a name and consumes it.
    pub fn name(&mut self) -> ParseRes<(String, Span)> {
        let tok = self.expect_a_token(Some(WantedSpec::Specific(TokenKind::Name)))?;
        if let TokenKind::Name = tok.kind {
            self.accept_current();
            Ok((tok.source.source.to_string(), tok.span()))
        } else {
            self.reject_current_token(ParseErrorKind::Expected {
                wanted: WantedSpec::Specific(TokenKind::Name),
                found: tok.kind,
            })
        }
    }
    pub fn parse<T>(&mut self) -> ParseRes<T>
    where
        T: Parse<'source>,
    {
        T::parse(self)
    }
    pub fn with_context<F, T>(&mut self, context: &'static str, mut cont: F) -> ParseRes<T>
    where
        F: FnMut(&mut Self) -> ParseRes<T>,
    {
        cont(self).map_err(|x| x.add_context(context))
    }
}

pub type ParseRes<T> = Result<T, ParseError>;
pub type ParseError = Error<ParseErrorKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    LexError(LexErrorKind),
    Expected {
        wanted: WantedSpec<TokenKind>,
        found: TokenKind,
    },
    UnexpectedEOF {
        wanted: Option<WantedSpec<TokenKind>>,
    },
    /// Self-describing syntax error
    Message(&'static str),
    /// Block structure element in the wrong place
    Unexpected(&'static str),
    Unterminated(&'static str),
}

impl ParseErrorKind {
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::LexError(_))
    }
}

pub trait Parse<'source>: Sized {
    fn parse(parser: &mut Parser<'source>) -> ParseRes<Self>;
}

use std::error;
impl error::Error for ParseErrorKind {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        if let Self::LexError(err) = self {
            Some(err)
        } else {
            None
        }
    }
}

use std::fmt;
impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::LexError(err) => write!(f, "{}", err),
            Self::UnexpectedEOF { wanted } => {
                write!(f, "unexpected end of file")?;
                if let Some(wanted) = wanted {
                    write!(f, ", expected {}", wanted)
                } else {
                    Ok(())
                }
            }
            Self::Expected { wanted, found } => {
                write!(f, "expected {}, but found instead {}", wanted, found)
            }
            Self::Message(msg) => f.write_str(msg),
            Self::Unexpected(what) => write!(f, "unexpected {}", what),
            Self::Unterminated(what) => write!(f, "unterminated {}", what),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Line, StmtKind};

    fn lines(src: &str, language: Language) -> ParseRes<Vec<Line>> {
        let meta = SourceMetadata::new(src);
        let options = CompilerOptions::new(language);
        Parser::new(&meta, &options)?.parse_lines()
    }

    #[test]
    fn lex_errors_surface_as_parse_errors() {
        let err = lines("x = @", Language::Simple).unwrap_err();
        assert!(err.kind.is_critical());
    }

    #[test]
    fn keyword_mismatch_names_both_tokens() {
        let err = lines("while 1 then", Language::Simple).unwrap_err();
        assert_eq!(err.to_string().lines().next(), Some(
            "expected \"do\", but found instead \"then\" line 1 col 9"
        ));
    }

    #[test]
    fn statements_in_order() {
        let parsed = lines("var a\na = 2\ncallsub s", Language::Simple).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(matches!(&parsed[2], Line::Plain(s) if s.kind == StmtKind::CallSub("s".into())));
    }
}
