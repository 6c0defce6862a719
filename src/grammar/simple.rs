//! Statements of the line-oriented language.
use super::{expr::parse_arguments, ParseErrorKind, ParseRes, Parser};
use crate::ast::*;
use crate::error::Span;
use crate::lexer::TokenKind;

pub(super) fn parse_statement(parser: &mut Parser) -> ParseRes<Vec<Line>> {
    let tok = parser.expect_a_token(None)?;
    let span = tok.span();
    let kw = match tok.kind {
        TokenKind::Keyword(kw) => kw,
        _ => return Ok(vec![expression_statement(parser, span)?]),
    };
    let plain = |kind| Line::Plain(Stmt::new(kind, span));
    let line = match kw {
        "const" => {
            parser.accept_current();
            let (name, _) = parser.name()?;
            parser.keyword("=")?;
            let value = parser.parse()?;
            plain(StmtKind::ConstDecl { name, value })
        }
        "var" => {
            parser.accept_current();
            plain(StmtKind::VarDecl(
                parser.with_context("parsing variable declaration", var_declaration)?,
            ))
        }
        "if" | "elseif" => {
            parser.accept_current();
            let cond = parser.parse()?;
            parser.keyword("then")?;
            if kw == "if" {
                Line::Open(Opener::If(cond), span)
            } else {
                Line::ElseIf(cond, span)
            }
        }
        "when" | "while" => {
            parser.accept_current();
            let cond = parser.parse()?;
            parser.keyword("do")?;
            let opener = if kw == "when" {
                Opener::When(cond)
            } else {
                Opener::While(cond)
            };
            Line::Open(opener, span)
        }
        "for" => {
            parser.accept_current();
            Line::Open(parser.with_context("parsing for loop", range_for)?, span)
        }
        "else" => {
            parser.accept_current();
            Line::Else(span)
        }
        "end" => {
            parser.accept_current();
            Line::End(span)
        }
        "call" => {
            parser.accept_current();
            let (name, _) = parser.name()?;
            let args = if parser.check_keyword("(") {
                parse_arguments(parser, "(", ")")?
            } else {
                Vec::new()
            };
            plain(StmtKind::NativeCall { name, args })
        }
        "callsub" => {
            parser.accept_current();
            let (name, _) = parser.name()?;
            plain(StmtKind::CallSub(name))
        }
        "emit" => {
            parser.accept_current();
            let (event, _) = parser.name()?;
            // the data size decides whether a value follows
            let has_value = parser
                .options()
                .user_event(&event)
                .map_or(false, |(_, ev)| ev.size > 0);
            let value = if has_value {
                Some(parser.parse()?)
            } else {
                None
            };
            plain(StmtKind::Emit { event, value })
        }
        "onevent" => {
            parser.accept_current();
            let (name, _) = parser.name()?;
            Line::Header(UnitHeader::OnEvent(name), span)
        }
        "sub" => {
            parser.accept_current();
            let (name, _) = parser.name()?;
            Line::Header(UnitHeader::Sub(name), span)
        }
        "return" => {
            parser.accept_current();
            plain(StmtKind::Return(None))
        }
        _ => expression_statement(parser, span)?,
    };
    Ok(vec![line])
}

/// `name`, `name[size]` or `name[]`, with an optional `= value`.
fn var_declaration(parser: &mut Parser) -> ParseRes<VarDecl> {
    let (name, _) = parser.name()?;
    let mut dims = Vec::new();
    if parser.eat_keyword("[") {
        if parser.check_keyword("]") {
            let at = parser.current_token_span();
            parser.accept_current();
            if !parser.check_keyword("=") {
                return parser.emit_error_at(
                    at,
                    ParseErrorKind::Message("missing size or initial value in array declaration"),
                );
            }
            dims.push(None);
        } else {
            dims.push(Some(parser.parse()?));
            parser.keyword("]")?;
        }
    }
    let init = if parser.eat_keyword("=") {
        Some(parser.parse()?)
    } else {
        None
    };
    Ok(VarDecl {
        name,
        ty: Type::Number,
        dims,
        init,
        storage: None,
    })
}

/// `for v in a:b [step s] do`
fn range_for(parser: &mut Parser) -> ParseRes<Opener> {
    let (name, name_span) = parser.name()?;
    parser.keyword("in")?;
    let from = parser.parse()?;
    parser.keyword(":")?;
    let to = parser.parse()?;
    let step = if parser.eat_keyword("step") {
        Some(parser.parse()?)
    } else {
        None
    };
    parser.keyword("do")?;
    Ok(Opener::RangeFor {
        var: Expr::var(name, name_span),
        from,
        to,
        step,
    })
}

fn expression_statement(parser: &mut Parser, span: Span) -> ParseRes<Line> {
    let expr = parser.parse()?;
    Ok(Line::Plain(Stmt::new(StmtKind::Expr(expr), span)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::error::SourceMetadata;
    use crate::language::Language;

    fn lines_with(src: &str, options: &CompilerOptions) -> ParseRes<Vec<Line>> {
        let meta = SourceMetadata::new(src);
        Parser::new(&meta, options)?.parse_lines()
    }

    fn lines(src: &str) -> ParseRes<Vec<Line>> {
        lines_with(src, &CompilerOptions::new(Language::Simple))
    }

    #[test]
    fn declarations() {
        let parsed = lines("var a\nvar b[3]\nvar c[] = [1, 2]\nvar d = 4\nconst k = 2").unwrap();
        assert_eq!(parsed.len(), 5);
        let decl = |i: usize| match &parsed[i] {
            Line::Plain(Stmt {
                kind: StmtKind::VarDecl(decl),
                ..
            }) => decl.clone(),
            other => panic!("not a declaration: {:?}", other),
        };
        assert!(decl(0).dims.is_empty() && decl(0).init.is_none());
        assert_eq!(decl(1).dims.len(), 1);
        assert_eq!(decl(2).dims, vec![None]);
        assert!(decl(3).init.is_some());
        assert!(matches!(
            &parsed[4],
            Line::Plain(Stmt { kind: StmtKind::ConstDecl { name, .. }, .. }) if name == "k"
        ));
    }

    #[test]
    fn sizeless_array_needs_value() {
        let err = lines("var x[]").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::Message("missing size or initial value in array declaration")
        );
    }

    #[test]
    fn block_structure_lines() {
        let parsed = lines(
            "onevent button.forward\nif a then\nb = 1\nelseif a == 2 then\nelse\nend\nsub s\nreturn",
        )
        .unwrap();
        assert!(matches!(&parsed[0], Line::Header(UnitHeader::OnEvent(n), _) if n == "button.forward"));
        assert!(matches!(&parsed[1], Line::Open(Opener::If(_), _)));
        assert!(matches!(&parsed[3], Line::ElseIf(..)));
        assert!(matches!(&parsed[4], Line::Else(_)));
        assert!(matches!(&parsed[5], Line::End(_)));
        assert!(matches!(&parsed[6], Line::Header(UnitHeader::Sub(n), _) if n == "s"));
        assert!(matches!(&parsed[7], Line::Plain(Stmt { kind: StmtKind::Return(None), .. })));
    }

    #[test]
    fn range_for_with_step() {
        let parsed = lines("for i in 0:10 step 2 do\nend").unwrap();
        match &parsed[0] {
            Line::Open(Opener::RangeFor { var, step, .. }, _) => {
                assert!(matches!(&var.kind, ExprKind::Var(v) if v.name == "i"));
                assert_eq!(step.as_ref().and_then(Expr::as_number), Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn native_call_and_emit() {
        let options = CompilerOptions::new(Language::Simple)
            .with_user_event("ping", 0)
            .with_user_event("data", 2);
        let parsed = lines_with("call math.fill(a, 0)\nemit ping\nemit data v", &options).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(matches!(
            &parsed[0],
            Line::Plain(Stmt { kind: StmtKind::NativeCall { args, .. }, .. }) if args.len() == 2
        ));
        assert!(matches!(
            &parsed[1],
            Line::Plain(Stmt { kind: StmtKind::Emit { value: None, .. }, .. })
        ));
        assert!(matches!(
            &parsed[2],
            Line::Plain(Stmt { kind: StmtKind::Emit { value: Some(_), .. }, .. })
        ));
    }
}
