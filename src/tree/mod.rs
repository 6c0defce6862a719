//! Turns the flat statement list into one tree per code unit, then runs
//! storage allocation, type resolution and local optimization.
use crate::ast::*;
use crate::config::CompilerOptions;
use crate::error::{CompileError, CompileRes, InternalError, SemanticError, Span};
use crate::grammar::ParseErrorKind;
use crate::language::Language;
use crate::target::NodeDescription;

mod optimize;
mod scope;
mod types;

pub use optimize::optimize_expr;
pub use scope::Functions;

/// What every pass needs to know about the compilation.
pub struct TreeContext<'a> {
    pub node: &'a NodeDescription,
    pub options: &'a CompilerOptions,
}

impl<'a> TreeContext<'a> {
    pub const fn language(&self) -> Language {
        self.options.language
    }
}

/// Builds the program and runs every pass over it.
pub fn build_program(
    lines: Vec<Line>,
    node: &NodeDescription,
    options: &CompilerOptions,
) -> CompileRes<Program> {
    let ctx = TreeContext { node, options };
    let units = build_units(lines, options.language)?;
    tracing::debug!(target: "tree", "{} code units", units.len());
    let allocated = scope::allocate(units, &ctx)?;
    let units = types::resolve_units(allocated.units, &allocated.functions, &ctx)?;
    let units = optimize::optimize_units(units)?;
    Ok(Program {
        units,
        module_size: allocated.module_size,
    })
}

/// Pairs openers with their middle and closing lines. The init unit comes
/// first, then the other units in source order.
pub fn build_units(lines: Vec<Line>, language: Language) -> CompileRes<Vec<Unit>> {
    let mut builder = Builder::new(language);
    for line in lines {
        builder.line(line)?;
    }
    builder.finish()
}

enum Open {
    Unit(UnitKind),
    If {
        arms: Vec<IfArm>,
        /// `None` once in the `else` part
        current: Option<(Expr, Span)>,
    },
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
}

impl Open {
    const fn describe(&self) -> &'static str {
        match self {
            Self::Unit(UnitKind::Function { .. }) => "function definition",
            Self::Unit(UnitKind::Sub(_)) => "sub",
            Self::Unit(_) => "onevent",
            Self::If { .. } => "if",
            Self::When(_) => "when",
            Self::While(_) => "while",
            Self::Do => "do",
            Self::RangeFor { .. } | Self::For { .. } => "for",
            Self::Switch(_) => "switch",
            Self::Block => "block",
        }
    }
    const fn is_labelable(&self) -> bool {
        matches!(
            self,
            Self::While(_) | Self::Do | Self::RangeFor { .. } | Self::For { .. } | Self::Switch(_)
        )
    }
}

struct Frame {
    open: Open,
    span: Span,
    label: Option<String>,
    body: Vec<Stmt>,
}

struct Builder {
    language: Language,
    /// Never empty: the bottom frame is the current top-level unit.
    stack: Vec<Frame>,
    init: Option<Unit>,
    units: Vec<Unit>,
}

fn syntax_error<T>(kind: ParseErrorKind, span: Span) -> CompileRes<T> {
    Err(CompileError::new(kind.into()).at(span))
}

impl Builder {
    fn new(language: Language) -> Self {
        Self {
            language,
            stack: vec![Frame {
                open: Open::Unit(UnitKind::Init),
                span: Span::new(0),
                label: None,
                body: Vec::new(),
            }],
            init: None,
            units: Vec::new(),
        }
    }

    fn top(&mut self) -> CompileRes<&mut Frame> {
        self.stack
            .last_mut()
            .ok_or_else(|| CompileError::internal(InternalError::UnresolvedJumps))
    }

    fn line(&mut self, line: Line) -> CompileRes<()> {
        match line {
            Line::Plain(stmt) => self.plain(stmt),
            Line::Open(opener, span) => self.open(opener, span),
            Line::ElseIf(cond, span) => self.else_part(Some(cond), span),
            Line::Else(span) => self.else_part(None, span),
            Line::End(span) => self.close(None, span),
            Line::EndWhile(cond, span) => self.close(Some(cond), span),
            Line::Header(header, span) => self.header(header, span),
        }
    }

    fn plain(&mut self, stmt: Stmt) -> CompileRes<()> {
        let top = self.top()?;
        if matches!(stmt.kind, StmtKind::Case(_) | StmtKind::Default)
            && !matches!(top.open, Open::Switch(_))
        {
            let what = if matches!(stmt.kind, StmtKind::Case(_)) {
                "\"case\""
            } else {
                "\"default\""
            };
            return syntax_error(ParseErrorKind::Unexpected(what), stmt.span);
        }
        top.body.push(stmt);
        Ok(())
    }

    fn open(&mut self, opener: Opener, span: Span) -> CompileRes<()> {
        let open = match opener {
            Opener::OnEvent(name) => self.unit_open(UnitKind::OnEvent(name), "onevent", span)?,
            Opener::Function(decl) => self.unit_open(
                UnitKind::Function {
                    decl,
                    signature: None,
                },
                "function",
                span,
            )?,
            Opener::If(cond) => Open::If {
                arms: Vec::new(),
                current: Some((cond, span)),
            },
            Opener::When(cond) => Open::When(cond),
            Opener::While(cond) => Open::While(cond),
            Opener::Do => Open::Do,
            Opener::RangeFor { var, from, to, step } => Open::RangeFor { var, from, to, step },
            Opener::For { init, cond, step } => Open::For { init, cond, step },
            Opener::Switch(subject) => Open::Switch(subject),
            Opener::Block => Open::Block,
        };
        let label = if open.is_labelable() {
            match self.top()?.body.last() {
                Some(Stmt {
                    kind: StmtKind::Label(name),
                    ..
                }) => Some(name.clone()),
                _ => None,
            }
        } else {
            None
        };
        self.stack.push(Frame {
            open,
            span,
            label,
            body: Vec::new(),
        });
        Ok(())
    }

    fn unit_open(&self, kind: UnitKind, what: &'static str, span: Span) -> CompileRes<Open> {
        if self.stack.len() > 1 {
            return Err(CompileError::semantic(
                SemanticError::NestedDefinition(what),
                span,
            ));
        }
        Ok(Open::Unit(kind))
    }

    fn else_part(&mut self, cond: Option<Expr>, span: Span) -> CompileRes<()> {
        let what = match (&cond, self.language) {
            (None, _) => "\"else\"",
            (Some(_), Language::Simple) => "\"elseif\"",
            (Some(_), Language::L2) => "\"else if\"",
        };
        let top = self.top()?;
        let body = std::mem::take(&mut top.body);
        match &mut top.open {
            Open::If { arms, current } if current.is_some() => {
                if let Some((prev, arm_span)) = current.take() {
                    arms.push(IfArm {
                        cond: prev,
                        body,
                        span: arm_span,
                    });
                }
                *current = cond.map(|c| (c, span));
                Ok(())
            }
            _ => {
                top.body = body;
                syntax_error(ParseErrorKind::Unexpected(what), span)
            }
        }
    }

    fn close(&mut self, end_while: Option<Expr>, span: Span) -> CompileRes<()> {
        if self.stack.len() <= 1 {
            let what = match (&end_while, self.language) {
                (Some(_), _) => "\"while\"",
                (None, Language::Simple) => "\"end\"",
                (None, Language::L2) => "\"}\"",
            };
            return syntax_error(ParseErrorKind::Unexpected(what), span);
        }
        let frame = match self.stack.pop() {
            Some(frame) => frame,
            None => return Err(CompileError::internal(InternalError::UnresolvedJumps)),
        };
        let Frame {
            open,
            span: open_span,
            label,
            body,
        } = frame;
        let kind = match (open, end_while) {
            (Open::Do, Some(cond)) => StmtKind::DoWhile { label, body, cond },
            (Open::Do, None) => {
                return syntax_error(
                    ParseErrorKind::Message("missing \"while\" after \"do\" block"),
                    span,
                )
            }
            (_, Some(_)) => return syntax_error(ParseErrorKind::Unexpected("\"while\""), span),
            (Open::Unit(kind), None) => {
                self.units.push(Unit {
                    kind,
                    span: open_span,
                    body,
                    frame_size: 0,
                });
                return Ok(());
            }
            (Open::If { mut arms, current }, None) => {
                let otherwise = match current {
                    Some((cond, arm_span)) => {
                        arms.push(IfArm {
                            cond,
                            body,
                            span: arm_span,
                        });
                        None
                    }
                    None => Some(body),
                };
                StmtKind::If { arms, otherwise }
            }
            (Open::When(cond), None) => StmtKind::When { cond, body },
            (Open::While(cond), None) => StmtKind::While {
                label,
                cond: Some(cond),
                body,
            },
            (Open::RangeFor { var, from, to, step }, None) => StmtKind::RangeFor {
                label,
                var,
                from,
                to,
                step,
                body,
            },
            (Open::For { init, cond, step }, None) => StmtKind::For {
                label,
                init,
                cond,
                step,
                body,
            },
            (Open::Switch(subject), None) => StmtKind::Switch {
                label,
                subject,
                body,
            },
            (Open::Block, None) => StmtKind::Block(body),
        };
        self.top()?.body.push(Stmt::new(kind, open_span));
        Ok(())
    }

    /// Simple language `onevent` and `sub` lines end the current unit.
    fn header(&mut self, header: UnitHeader, span: Span) -> CompileRes<()> {
        self.finish_unit()?;
        let kind = match header {
            UnitHeader::OnEvent(name) => UnitKind::OnEvent(name),
            UnitHeader::Sub(name) => UnitKind::Sub(name),
        };
        self.stack.push(Frame {
            open: Open::Unit(kind),
            span,
            label: None,
            body: Vec::new(),
        });
        Ok(())
    }

    fn finish_unit(&mut self) -> CompileRes<()> {
        if self.stack.len() > 1 {
            let top = self.top()?;
            let (what, at) = (top.open.describe(), top.span);
            return syntax_error(ParseErrorKind::Unterminated(what), at);
        }
        if let Some(Frame {
            open: Open::Unit(kind),
            span,
            body,
            ..
        }) = self.stack.pop()
        {
            let unit = Unit {
                kind,
                span,
                body,
                frame_size: 0,
            };
            if matches!(unit.kind, UnitKind::Init) {
                self.init = Some(unit);
            } else {
                self.units.push(unit);
            }
        }
        Ok(())
    }

    fn finish(mut self) -> CompileRes<Vec<Unit>> {
        self.finish_unit()?;
        let init = self.init.take().unwrap_or_else(|| Unit {
            kind: UnitKind::Init,
            span: Span::new(0),
            body: Vec::new(),
            frame_size: 0,
        });
        let mut units = vec![init];
        units.append(&mut self.units);
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CompileErrorKind, SourceMetadata};
    use crate::grammar::Parser;

    fn units(src: &str, language: Language) -> CompileRes<Vec<Unit>> {
        let meta = SourceMetadata::new(src);
        let options = CompilerOptions::new(language);
        let lines = Parser::new(&meta, &options)
            .and_then(|mut p| p.parse_lines())
            .map_err(|e| e.map_kind(CompileErrorKind::from))?;
        build_units(lines, language)
    }

    #[test]
    fn simple_units_split_on_headers() {
        let built = units(
            "var a\nonevent button.forward\nif a then\na = 1\nelse\na = 2\nend\nsub s\na = 3",
            Language::Simple,
        )
        .unwrap();
        assert_eq!(built.len(), 3);
        assert!(matches!(built[0].kind, UnitKind::Init));
        assert!(matches!(&built[1].kind, UnitKind::OnEvent(n) if n == "button.forward"));
        match &built[1].body[0].kind {
            StmtKind::If { arms, otherwise } => {
                assert_eq!(arms.len(), 1);
                assert_eq!(otherwise.as_ref().map(Vec::len), Some(1));
            }
            other => panic!("{:?}", other),
        }
        assert!(matches!(&built[2].kind, UnitKind::Sub(n) if n == "s"));
    }

    #[test]
    fn l2_definitions_become_units_and_init_collects_the_rest() {
        let built = units(
            "int x;\nvoid f() {\nx = 1;\n}\nonevent timer0 {\nf();\n}\nx = 2;",
            Language::L2,
        )
        .unwrap();
        assert_eq!(built.len(), 3);
        assert_eq!(built[0].body.len(), 2);
        assert!(matches!(&built[1].kind, UnitKind::Function { decl, .. } if decl.name == "f"));
        assert!(matches!(&built[2].kind, UnitKind::OnEvent(n) if n == "timer0"));
    }

    #[test]
    fn labels_name_the_following_loop() {
        let built = units("outer: while (true) {\nbreak outer;\n}", Language::L2).unwrap();
        assert!(matches!(
            &built[0].body[1].kind,
            StmtKind::While { label: Some(l), .. } if l == "outer"
        ));
    }

    #[test]
    fn structure_errors() {
        let err = units("if a then\na = 1", Language::Simple).unwrap_err();
        assert!(err.to_string().starts_with("unterminated if"));
        let err = units("end", Language::Simple).unwrap_err();
        assert!(err.to_string().starts_with("unexpected \"end\""));
        let err = units("while (1) {\nonevent timer0 {\n}\n}", Language::L2).unwrap_err();
        assert_eq!(
            err.kind,
            CompileErrorKind::Semantic(SemanticError::NestedDefinition("onevent"))
        );
        let err = units("case 1:", Language::L2).unwrap_err();
        assert!(err.to_string().starts_with("unexpected \"case\""));
        let err = units("do {\n}", Language::L2).unwrap_err();
        assert!(err.to_string().starts_with("missing \"while\""));
    }

    #[test]
    fn do_while_and_else_chain() {
        let built = units(
            "do {\nx++;\n} while (x < 3);\nif (a) {\n} else if (b) {\n} else {\n}",
            Language::L2,
        )
        .unwrap();
        assert!(matches!(&built[0].body[0].kind, StmtKind::DoWhile { .. }));
        assert!(matches!(
            &built[0].body[1].kind,
            StmtKind::If { arms, otherwise: Some(_) } if arms.len() == 2
        ));
    }
}
