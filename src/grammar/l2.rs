//! Statements of the C-like language.
use super::{expr::parse_arguments, parse_expression, ParseErrorKind, ParseRes, Parser};
use crate::ast::*;
use crate::error::Span;
use crate::lexer::TokenKind;

const TYPE_KEYWORDS: [&str; 3] = ["int", "bool", "fixed"];

fn keyword_type(kw: &str) -> Option<Type> {
    match kw {
        "int" => Some(Type::Number),
        "bool" => Some(Type::Boolean),
        "fixed" => Some(Type::Fixed),
        "void" => Some(Type::Void),
        _ => None,
    }
}

fn check_type_keyword(parser: &Parser, n: usize) -> bool {
    TYPE_KEYWORDS.iter().any(|kw| parser.check_keyword_at(n, kw))
}

pub(super) fn parse_statement(parser: &mut Parser) -> ParseRes<Vec<Line>> {
    let tok = parser.expect_a_token(None)?;
    let span = tok.span();
    let plain = |kind| Line::Plain(Stmt::new(kind, span));
    let kw = match tok.kind {
        TokenKind::Keyword(kw) => kw,
        TokenKind::Name if parser.check_keyword_at(1, ":") => {
            let (name, _) = parser.name()?;
            parser.accept_current();
            return Ok(vec![plain(StmtKind::Label(name))]);
        }
        _ => return Ok(vec![expression_statement(parser, span)?]),
    };
    let line = match kw {
        "int" | "bool" | "fixed" | "void" => {
            let ty = keyword_type(kw).unwrap_or(Type::Number);
            parser.accept_current();
            if kw == "void" || parser.check_keyword_at(1, "(") {
                let decl = parser.with_context("parsing function definition", |p| {
                    function_header(p, ty)
                })?;
                Line::Open(Opener::Function(decl), span)
            } else {
                return parser.with_context("parsing variable declaration", |p| {
                    var_declarations(p, ty, span)
                });
            }
        }
        "const" => {
            parser.accept_current();
            let (name, _) = parser.name()?;
            parser.keyword("=")?;
            let value = parse_expression(parser, priority::COMMA)?;
            semicolon(parser)?;
            plain(StmtKind::ConstDecl { name, value })
        }
        "if" => {
            parser.accept_current();
            let cond = condition(parser)?;
            parser.keyword("{")?;
            Line::Open(Opener::If(cond), span)
        }
        "when" => {
            parser.accept_current();
            let cond = condition(parser)?;
            parser.keyword("{")?;
            Line::Open(Opener::When(cond), span)
        }
        "switch" => {
            parser.accept_current();
            let subject = condition(parser)?;
            parser.keyword("{")?;
            Line::Open(Opener::Switch(subject), span)
        }
        "case" => {
            parser.accept_current();
            // stop before the colon
            let value = parse_expression(parser, priority::CONDITIONAL_ELSE)?;
            parser.keyword(":")?;
            plain(StmtKind::Case(value))
        }
        "default" => {
            parser.accept_current();
            parser.keyword(":")?;
            plain(StmtKind::Default)
        }
        "goto" => {
            parser.accept_current();
            let (label, _) = parser.name()?;
            semicolon(parser)?;
            plain(StmtKind::Goto(label))
        }
        "while" => {
            parser.accept_current();
            let cond = condition(parser)?;
            if parser.eat_keyword(";") {
                return parser.emit_error_at(span, ParseErrorKind::Unexpected("\"while\" without \"do\""));
            }
            parser.keyword("{")?;
            Line::Open(Opener::While(cond), span)
        }
        "do" => {
            parser.accept_current();
            parser.keyword("{")?;
            Line::Open(Opener::Do, span)
        }
        "for" => {
            parser.accept_current();
            Line::Open(parser.with_context("parsing for loop", c_for)?, span)
        }
        ";" => {
            parser.accept_current();
            plain(StmtKind::Empty)
        }
        "{" => {
            parser.accept_current();
            Line::Open(Opener::Block, span)
        }
        "}" => {
            parser.accept_current();
            closing_brace(parser, span)?
        }
        "else" => {
            return parser.reject_current_token(ParseErrorKind::Unexpected("\"else\""));
        }
        "onevent" => {
            parser.accept_current();
            let (name, _) = parser.name()?;
            parser.keyword("{")?;
            Line::Open(Opener::OnEvent(name), span)
        }
        "return" => {
            parser.accept_current();
            let value = if parser.check_keyword(";") {
                None
            } else {
                Some(parser.parse()?)
            };
            semicolon(parser)?;
            plain(StmtKind::Return(value))
        }
        "break" | "continue" => {
            parser.accept_current();
            let label = if parser.check_name_at(0) {
                Some(parser.name()?.0)
            } else {
                None
            };
            semicolon(parser)?;
            if kw == "break" {
                plain(StmtKind::Break(label))
            } else {
                plain(StmtKind::Continue(label))
            }
        }
        "emit" => {
            parser.accept_current();
            let (event, _) = parser.name()?;
            let value = if parser.check_keyword(";") {
                None
            } else {
                Some(parser.parse()?)
            };
            semicolon(parser)?;
            plain(StmtKind::Emit { event, value })
        }
        _ => expression_statement(parser, span)?,
    };
    Ok(vec![line])
}

fn semicolon(parser: &mut Parser) -> ParseRes<()> {
    if parser.eat_keyword(";") {
        Ok(())
    } else {
        parser.reject_current_token(ParseErrorKind::Message("missing semicolon"))
    }
}

/// Parenthesized expression after `if`, `while`, `when` and `switch`.
fn condition(parser: &mut Parser) -> ParseRes<Expr> {
    parser.keyword("(")?;
    let cond = parse_expression(parser, priority::PAR)?;
    parser.keyword(")")?;
    Ok(cond)
}

/// What follows `}`: `else {`, `else if (c) {`, `while (c);` or nothing.
fn closing_brace(parser: &mut Parser, span: Span) -> ParseRes<Line> {
    if parser.eat_keyword("else") {
        if parser.eat_keyword("if") {
            let cond = condition(parser)?;
            parser.keyword("{")?;
            return Ok(Line::ElseIf(cond, span));
        }
        parser.keyword("{")?;
        return Ok(Line::Else(span));
    }
    if parser.check_keyword("while") {
        // `} while (c) {` is a new loop, `} while (c);` ends a `do`
        let checkpoint = parser.checkpoint();
        parser.accept_current();
        let cond = condition(parser)?;
        if parser.eat_keyword(";") {
            return Ok(Line::EndWhile(cond, span));
        }
        parser.rewind(checkpoint);
    }
    Ok(Line::End(span))
}

/// `name[dims] = value, ...;` after the type keyword.
fn var_declarations(parser: &mut Parser, ty: Type, span: Span) -> ParseRes<Vec<Line>> {
    let mut lines = Vec::new();
    loop {
        let (name, _) = parser.name()?;
        let mut dims = Vec::new();
        if parser.check_keyword("[") {
            if parser.check_keyword_at(1, "]") {
                let at = parser.current_token_span();
                parser.accept_current();
                parser.accept_current();
                if !parser.check_keyword("=") {
                    return parser.emit_error_at(
                        at,
                        ParseErrorKind::Message("missing size or initial value in array declaration"),
                    );
                }
                dims.push(None);
            } else {
                dims = parse_arguments(parser, "[", "]")?
                    .into_iter()
                    .map(Some)
                    .collect();
            }
        }
        let init = if parser.eat_keyword("=") {
            Some(parse_expression(parser, priority::COMMA)?)
        } else {
            None
        };
        lines.push(Line::Plain(Stmt::new(
            StmtKind::VarDecl(VarDecl {
                name,
                ty,
                dims,
                init,
                storage: None,
            }),
            span,
        )));
        if !parser.eat_keyword(",") {
            semicolon(parser)?;
            return Ok(lines);
        }
    }
}

/// `name(type arg, type ref[dims], ...) {` after the result type.
fn function_header(parser: &mut Parser, ret: Type) -> ParseRes<FunctionDecl> {
    let (name, _) = parser.name()?;
    parser.keyword("(")?;
    let mut params = Vec::new();
    if !parser.eat_keyword(")") {
        loop {
            let span = parser.current_token_span();
            let mut ty = Type::Number;
            if check_type_keyword(parser, 0) {
                let kw = parser.current_token_source();
                ty = keyword_type(kw).unwrap_or(Type::Number);
                parser.accept_current();
            }
            let (param, _) = parser.name()?;
            let (by_ref, dims) = if parser.check_keyword("[") {
                (true, parse_arguments(parser, "[", "]")?)
            } else {
                (false, Vec::new())
            };
            params.push(ParamDecl {
                name: param,
                ty,
                dims,
                by_ref,
                span,
            });
            if parser.eat_keyword(")") {
                break;
            }
            if !parser.eat_keyword(",") {
                return parser.reject_current_token(ParseErrorKind::Message(
                    "syntax error in function definition",
                ));
            }
        }
    }
    parser.keyword("{")?;
    Ok(FunctionDecl { name, ret, params })
}

/// `for (init; cond; step) {`; the init part may declare a variable.
fn c_for(parser: &mut Parser) -> ParseRes<Opener> {
    parser.keyword("(")?;
    let mut init = Vec::new();
    if !parser.check_keyword(";") {
        let span = parser.current_token_span();
        if check_type_keyword(parser, 0) {
            let ty = keyword_type(parser.current_token_source()).unwrap_or(Type::Number);
            parser.accept_current();
            let (name, _) = parser.name()?;
            let init_value = if parser.eat_keyword("=") {
                Some(parse_expression(parser, priority::COMMA)?)
            } else {
                None
            };
            init.push(Stmt::new(
                StmtKind::VarDecl(VarDecl {
                    name,
                    ty,
                    dims: Vec::new(),
                    init: init_value,
                    storage: None,
                }),
                span,
            ));
        } else {
            init.push(Stmt::new(StmtKind::Expr(parser.parse()?), span));
        }
    }
    parser.keyword(";")?;
    let cond = if parser.check_keyword(";") {
        None
    } else {
        Some(parser.parse()?)
    };
    parser.keyword(";")?;
    let step = if parser.check_keyword(")") {
        None
    } else {
        Some(parser.parse()?)
    };
    parser.keyword(")")?;
    parser.keyword("{")?;
    Ok(Opener::For { init, cond, step })
}

fn expression_statement(parser: &mut Parser, span: Span) -> ParseRes<Line> {
    let expr = parser.parse()?;
    semicolon(parser)?;
    Ok(Line::Plain(Stmt::new(StmtKind::Expr(expr), span)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::error::SourceMetadata;
    use crate::language::Language;

    fn lines(src: &str) -> ParseRes<Vec<Line>> {
        let meta = SourceMetadata::new(src);
        let options = CompilerOptions::new(Language::L2);
        Parser::new(&meta, &options)?.parse_lines()
    }

    fn plain(line: &Line) -> &StmtKind {
        match line {
            Line::Plain(stmt) => &stmt.kind,
            other => panic!("not a plain statement: {:?}", other),
        }
    }

    #[test]
    fn declaration_list() {
        let parsed = lines("int a, b[2, 3], c[] = [1, 2];\nfixed f = 1.5;").unwrap();
        assert_eq!(parsed.len(), 4);
        match plain(&parsed[1]) {
            StmtKind::VarDecl(decl) => assert_eq!(decl.dims.len(), 2),
            other => panic!("{:?}", other),
        }
        match plain(&parsed[3]) {
            StmtKind::VarDecl(decl) => {
                assert_eq!(decl.ty, Type::Fixed);
                assert!(matches!(decl.init.as_ref().map(|e| &e.kind), Some(ExprKind::Fixed(_))));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn function_definition_with_reference() {
        let parsed = lines("int f(int a, fixed v[3], b) {\nreturn a;\n}").unwrap();
        match &parsed[0] {
            Line::Open(Opener::Function(decl), _) => {
                assert_eq!(decl.name, "f");
                assert_eq!(decl.ret, Type::Number);
                let refs: Vec<_> = decl.params.iter().map(|p| p.by_ref).collect();
                assert_eq!(refs, vec![false, true, false]);
                assert_eq!(decl.params[1].ty, Type::Fixed);
            }
            other => panic!("{:?}", other),
        }
        assert!(matches!(plain(&parsed[1]), StmtKind::Return(Some(_))));
        assert!(matches!(&parsed[2], Line::End(_)));
    }

    #[test]
    fn braces_and_else_chains() {
        let parsed = lines("if (a) {\n} else if (b) {\n} else {\n}").unwrap();
        assert!(matches!(&parsed[0], Line::Open(Opener::If(_), _)));
        assert!(matches!(&parsed[1], Line::ElseIf(..)));
        assert!(matches!(&parsed[2], Line::Else(_)));
        assert!(matches!(&parsed[3], Line::End(_)));
    }

    #[test]
    fn do_while_versus_following_while() {
        let parsed = lines("do {\n} while (x < 3);").unwrap();
        assert!(matches!(&parsed[1], Line::EndWhile(..)));
        let parsed = lines("{\n} while (x) {\n}").unwrap();
        assert!(matches!(&parsed[1], Line::End(_)));
        assert!(matches!(&parsed[2], Line::Open(Opener::While(_), _)));
    }

    #[test]
    fn switch_labels_and_jumps() {
        let parsed = lines(
            "outer: switch (v) {\ncase 1: case 2 + 1:\nbreak outer;\ndefault:\ncontinue;\ngoto outer;\n}",
        )
        .unwrap();
        assert!(matches!(plain(&parsed[0]), StmtKind::Label(l) if l == "outer"));
        assert!(matches!(&parsed[1], Line::Open(Opener::Switch(_), _)));
        assert!(matches!(plain(&parsed[2]), StmtKind::Case(e) if e.as_number() == Some(1)));
        assert!(matches!(plain(&parsed[3]), StmtKind::Case(_)));
        assert!(matches!(plain(&parsed[4]), StmtKind::Break(Some(l)) if l == "outer"));
        assert!(matches!(plain(&parsed[5]), StmtKind::Default));
        assert!(matches!(plain(&parsed[6]), StmtKind::Continue(None)));
        assert!(matches!(plain(&parsed[7]), StmtKind::Goto(l) if l == "outer"));
    }

    #[test]
    fn for_with_declaration() {
        let parsed = lines("for (int i = 0; i < 3; i++) {\n}").unwrap();
        match &parsed[0] {
            Line::Open(Opener::For { init, cond, step }, _) => {
                assert!(matches!(&init[0].kind, StmtKind::VarDecl(d) if d.name == "i"));
                assert!(cond.is_some() && step.is_some());
            }
            other => panic!("{:?}", other),
        }
        let parsed = lines("for (;;) {\n}").unwrap();
        assert!(matches!(
            &parsed[0],
            Line::Open(Opener::For { init, cond: None, step: None }, _) if init.is_empty()
        ));
    }

    #[test]
    fn missing_semicolon() {
        let err = lines("x = 1\ny = 2;").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Message("missing semicolon"));
        assert_eq!(err.position().map(|p| p.line), Some(1));
    }
}
