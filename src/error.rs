use std::error;
use std::fmt;

use thiserror::Error;

use crate::grammar::ParseErrorKind;
use crate::lexer::LexErrorKind;

#[derive(Debug, Clone, PartialEq)]
pub struct Error<T> {
    pub kind: T,
    span: Option<Span>,
    file: Option<std::path::PathBuf>,
    snippet: Option<Snippet>,
    contexts: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub const fn new(offset: usize) -> Self {
        Self { offset, len: 1 }
    }
    pub const fn with_len(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }
    pub const fn as_range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }
    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        let start = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        Span::with_len(start, end - start)
    }
    pub fn position_in(&self, source: &str) -> Position {
        let offset = self.offset.min(source.len());
        let before = &source[..offset];
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        Position {
            line: before.matches('\n').count(),
            col: before[line_start..].chars().count(),
        }
    }
    pub fn snippet_from_source(&self, source: &SourceMetadata) -> Option<Snippet> {
        let input = source.input();
        if self.offset > input.len() {
            return None;
        }
        let position = self.position_in(input);
        let line = input.lines().nth(position.line).unwrap_or("").to_string();
        Some(Snippet { position, line })
    }
}

#[derive(Debug)]
pub struct SourceMetadata<'a> {
    file: Option<std::path::PathBuf>,
    source: &'a str,
}

impl<'a> SourceMetadata<'a> {
    pub const fn input(&self) -> &'a str {
        self.source
    }
    pub const fn new(source: &'a str) -> Self {
        Self { file: None, source }
    }
    #[must_use]
    pub fn with_file(mut self, file: std::path::PathBuf) -> Self {
        self.file = Some(file);
        self
    }
}

impl<T> Error<T> {
    pub const fn new(kind: T) -> Self {
        Self {
            kind,
            span: None,
            snippet: None,
            file: None,
            contexts: Vec::new(),
        }
    }
    pub fn map_kind<F, U>(self, mapper: F) -> Error<U>
    where
        F: Fn(T) -> U,
    {
        Error {
            kind: mapper(self.kind),
            span: self.span,
            snippet: self.snippet,
            file: self.file,
            contexts: self.contexts,
        }
    }
    /// Remembers where the error happened without resolving the snippet yet.
    /// Keeps the innermost span if one was already set.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }
    pub const fn span(&self) -> Option<Span> {
        self.span
    }
    pub fn position(&self) -> Option<Position> {
        self.snippet.as_ref().map(|s| s.position)
    }
    /// The source given is only applied if there was no additional source
    #[must_use]
    pub fn with_backup_source(self, span: Span, source: &SourceMetadata) -> Self {
        if self.snippet.is_some() {
            self
        } else {
            self.with_source(span, source)
        }
    }
    #[must_use]
    pub fn with_source(mut self, span: Span, source: &SourceMetadata) -> Self {
        self.span = Some(span);
        self.file = source.file.clone();
        self.snippet = span.snippet_from_source(source);
        self
    }
    /// Turns the stored span (if any) into a snippet of `source`.
    #[must_use]
    pub fn resolve(self, source: &SourceMetadata) -> Self {
        match (self.span, &self.snippet) {
            (Some(span), None) => self.with_source(span, source),
            _ => self,
        }
    }
    #[must_use]
    pub fn add_context(mut self, ctx: &'static str) -> Self {
        self.contexts.push(ctx);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    position: Position,
    line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WantedSpec<T> {
    Specific(T),
    Description(&'static str),
}

impl<T: fmt::Display> fmt::Display for WantedSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Description(desc) => f.write_str(desc),
            Self::Specific(t) => write!(f, "{}", t),
        }
    }
}

/// Zero-based line and column (in characters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub col: usize,
    pub line: usize,
}

impl<T: error::Error + 'static> error::Error for Error<T> {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl<T: fmt::Display> fmt::Display for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let whiles = self
            .contexts
            .iter()
            .copied()
            .fold(String::new(), |acc, next| acc + "\nwhile " + next);
        let snippet = if let Some(snip) = &self.snippet {
            snip
        } else {
            return write!(f, "{}{}", self.kind, whiles);
        };
        let file = self
            .file
            .as_ref()
            .and_then(|x| x.to_str())
            .unwrap_or("<unknown source>");

        write!(
            f,
            "\
{kind} line {line} col {col}
   --> {file}:{line}:{col}
    |
{line:3} | {snippet}
    | {marker:>0$}{whiles}",
            snippet.position.col + 1,
            marker = '^',
            line = snippet.position.line + 1,
            col = snippet.position.col + 1,
            file = file,
            kind = self.kind,
            snippet = snippet.line,
            whiles = whiles,
        )
    }
}

/// Errors in an otherwise well-formed program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SemanticError {
    #[error("unknown variable \"{0}\"")]
    UnknownVariable(String),
    #[error("duplicate variable declaration \"{0}\"")]
    DuplicateVariable(String),
    #[error("unknown function \"{0}\"")]
    UnknownFunction(String),
    #[error("duplicate definition of \"{0}\"")]
    DuplicateDefinition(String),
    #[error("unknown label \"{0}\"")]
    UnknownLabel(String),
    #[error("duplicate label \"{0}\"")]
    DuplicateLabel(String),
    #[error("unknown {keyword} label \"{label}\"")]
    UnknownLoopLabel {
        keyword: &'static str,
        label: String,
    },
    #[error("{0} outside loop")]
    OutsideLoop(&'static str),
    #[error("return outside function definition")]
    ReturnOutsideFunction,
    #[error("unexpected return value in void function")]
    UnexpectedReturnValue,
    #[error("missing return value in non-void function")]
    MissingReturnValue,
    #[error("division by 0")]
    DivisionByZero,
    #[error("non-constant expression in {0}")]
    NonConstant(&'static str),
    #[error("bad array size")]
    ArraySize,
    #[error("index out of range")]
    IndexOutOfRange,
    #[error("too many indices")]
    TooManyIndices,
    #[error("incompatible sizes")]
    IncompatibleSizes,
    #[error("bad array assignment")]
    BadArrayAssignment,
    #[error("invalid operand")]
    InvalidOperand,
    #[error("cannot use void result in expression")]
    VoidValue,
    #[error("array value in scalar expression")]
    ArrayInExpression,
    #[error("missing else part in conditional expression")]
    MissingElse,
    #[error("else part without conditional expression")]
    UnexpectedElse,
    #[error("wrong number of arguments for \"{0}\"")]
    WrongArgumentCount(String),
    #[error("incompatible size of argument in call to \"{0}\"")]
    ArgumentSize(String),
    #[error("variable reference expected")]
    ReferenceExpected,
    #[error("variable reference type mismatch")]
    ReferenceTypeMismatch,
    #[error("native function \"{0}\" not found")]
    NativeNotFound(String),
    #[error("wrong number of arguments for native function \"{0}\"")]
    NativeArgumentCount(String),
    #[error("argument size mismatch in native function \"{0}\"")]
    NativeArgumentSize(String),
    #[error("unknown event \"{0}\"")]
    UnknownEvent(String),
    #[error("unknown user event \"{0}\"")]
    UnknownUserEvent(String),
    #[error("incompatible data size in emit")]
    EmitSize,
    #[error("{0} must be defined at top level")]
    NestedDefinition(&'static str),
    #[error("not enough memory for variables")]
    OutOfMemory,
    #[error("program too large")]
    CodeTooLarge,
}

/// Broken compiler invariants; never the program's fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("unresolved jump at end of code unit")]
    UnresolvedJumps,
    #[error("unresolved variable \"{0}\"")]
    UnresolvedVariable(String),
    #[error("unresolved placeholder")]
    UnresolvedFixup,
    #[error("malformed operator {0}")]
    MalformedOperator(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    #[error("{0}")]
    Lexical(LexErrorKind),
    #[error("{0}")]
    Syntax(ParseErrorKind),
    #[error("{0}")]
    Semantic(#[from] SemanticError),
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl From<LexErrorKind> for CompileErrorKind {
    fn from(kind: LexErrorKind) -> Self {
        Self::Lexical(kind)
    }
}

impl From<ParseErrorKind> for CompileErrorKind {
    fn from(kind: ParseErrorKind) -> Self {
        match kind {
            ParseErrorKind::LexError(lex) => Self::Lexical(lex),
            other => Self::Syntax(other),
        }
    }
}

pub type CompileError = Error<CompileErrorKind>;
pub type CompileRes<T> = Result<T, CompileError>;

impl CompileError {
    pub fn semantic(kind: SemanticError, span: Span) -> Self {
        Self::new(kind.into()).at(span)
    }
    pub fn internal(kind: InternalError) -> Self {
        Self::new(kind.into())
    }
}
