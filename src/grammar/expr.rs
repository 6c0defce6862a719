use super::{Parse, ParseErrorKind, ParseRes, Parser, WantedSpec};
use crate::ast::{priority, Expr, ExprKind, Fixity, Variable};
use crate::lexer::TokenKind;

impl<'source> Parse<'source> for Expr {
    fn parse(parser: &mut Parser<'source>) -> ParseRes<Self> {
        parse_expression(parser, priority::STATEMENT)
    }
}

/// Precedence climbing: parses operators binding tighter than `pri`
/// (assignments, being right-associative, also bind at equal priority).
pub fn parse_expression(parser: &mut Parser, pri: u8) -> ParseRes<Expr> {
    let mut node = parser.with_context("parsing expression", parse_primary)?;

    while let Some(tok) = parser.peek_token().cloned() {
        let kw = match tok.kind {
            TokenKind::Keyword(kw) => kw,
            _ => break,
        };
        let language = parser.language();
        if let Some(op) = language
            .operator(kw, Fixity::Postfix)
            .filter(|op| op.priority() >= pri)
        {
            parser.accept_current();
            node = Expr::op(op, vec![node], tok.span());
            continue;
        }
        if let Some(op) = language.operator(kw, Fixity::Infix).filter(|op| {
            if pri == priority::ASSIGNMENT {
                op.priority() >= pri
            } else {
                op.priority() > pri
            }
        }) {
            parser.accept_current();
            let rhs = parse_expression(parser, op.priority())?;
            node = Expr::op(op, vec![node, rhs], tok.span());
            continue;
        }
        if kw == "[" {
            let var = match node.kind {
                ExprKind::Var(var) => var,
                _ => return parser.reject_current_token(ParseErrorKind::Message("unexpected indexing")),
            };
            let indices = parse_arguments(parser, "[", "]")?;
            node = Expr::new(ExprKind::Index { var, indices }, node.span);
            continue;
        }
        break;
    }
    Ok(node)
}

fn parse_primary(parser: &mut Parser) -> ParseRes<Expr> {
    let tok = parser.expect_a_token(Some(WantedSpec::Description("expression")))?;
    let span = tok.span();
    match tok.kind {
        TokenKind::Float(f) => {
            parser.accept_current();
            Ok(Expr::fixed(f, span))
        }
        TokenKind::Number(n) => {
            parser.accept_current();
            Ok(Expr::number(n, span))
        }
        TokenKind::Name => {
            let name = tok.source.source.to_string();
            parser.accept_current();
            if parser.check_keyword("(") {
                let args = parse_arguments(parser, "(", ")")?;
                Ok(Expr::new(
                    ExprKind::Call {
                        name,
                        args,
                        callee: None,
                    },
                    span,
                ))
            } else {
                Ok(Expr::new(ExprKind::Var(Variable::new(name)), span))
            }
        }
        TokenKind::Keyword("(") => {
            parser.accept_current();
            let inner = parse_expression(parser, priority::PAR)?;
            parser
                .keyword(")")
                .map_err(|e| e.add_context("parsing subexpression"))?;
            Ok(inner)
        }
        TokenKind::Keyword("[") => parser.with_context("parsing array", parse_array),
        TokenKind::Keyword(kw) => {
            let language = parser.language();
            if let Some(op) = language.operator(kw, Fixity::Prefix) {
                parser.accept_current();
                let arg = parse_expression(parser, priority::PRE)?;
                Ok(Expr::op(op, vec![arg], span))
            } else if let Some(op) = language.operator(kw, Fixity::Constant) {
                parser.accept_current();
                Ok(Expr::op(op, Vec::new(), span))
            } else {
                parser.reject_current_token(ParseErrorKind::Message(
                    "unexpected token in expression",
                ))
            }
        }
    }
}

/// `[a, b; c, d]`: `,` separates columns and `;` rows.
fn parse_array(parser: &mut Parser) -> ParseRes<Expr> {
    let span = parser.keyword("[")?;
    let mut rows: Vec<Vec<Expr>> = vec![Vec::new()];
    loop {
        let item = parse_expression(parser, priority::COMMA)?;
        if let Some(row) = rows.last_mut() {
            row.push(item);
        }
        if parser.eat_keyword(",") {
            continue;
        }
        let row_end = parser.current_token_span();
        let closing = parser.check_keyword("]");
        if !closing && !parser.check_keyword(";") {
            let found = parser.expect_a_token(Some(WantedSpec::Description("\",\", \";\" or \"]\"")))?;
            return parser.reject_current_token(ParseErrorKind::Expected {
                wanted: WantedSpec::Description("\",\", \";\" or \"]\""),
                found: found.kind,
            });
        }
        parser.accept_current();
        if rows.len() > 1 && rows[0].len() != rows[rows.len() - 1].len() {
            return parser.emit_error_at(row_end, ParseErrorKind::Message("non-rectangular array"));
        }
        if closing {
            break;
        }
        rows.push(Vec::new());
    }
    let n_rows = rows.len();
    let n_cols = rows[0].len();
    let dims = if n_rows == 1 {
        vec![n_cols]
    } else {
        vec![n_rows, n_cols]
    };
    // column-major
    let mut cells: Vec<Vec<Option<Expr>>> = rows
        .into_iter()
        .map(|row| row.into_iter().map(Some).collect())
        .collect();
    let mut items = Vec::with_capacity(n_rows * n_cols);
    for col in 0..n_cols {
        for row in cells.iter_mut() {
            if let Some(item) = row[col].take() {
                items.push(item);
            }
        }
    }
    Ok(Expr::new(ExprKind::Array(items), span).with_dims(dims))
}

/// Comma-separated expressions between `open` and `close`.
pub(super) fn parse_arguments(
    parser: &mut Parser,
    open: &'static str,
    close: &'static str,
) -> ParseRes<Vec<Expr>> {
    parser.keyword(open)?;
    let mut args = Vec::new();
    if parser.eat_keyword(close) {
        return Ok(args);
    }
    loop {
        args.push(parse_expression(parser, priority::COMMA)?);
        if parser.eat_keyword(",") {
            continue;
        }
        parser.keyword(close)?;
        return Ok(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Op;
    use crate::bytecode::BinaryOp;
    use crate::config::CompilerOptions;
    use crate::error::SourceMetadata;
    use crate::language::Language;

    fn expr(src: &str, language: Language) -> ParseRes<Expr> {
        let meta = SourceMetadata::new(src);
        let options = CompilerOptions::new(language);
        let mut parser = Parser::new(&meta, &options)?;
        parser.parse()
    }

    fn shape(e: &Expr) -> String {
        match &e.kind {
            ExprKind::Number(n) => n.to_string(),
            ExprKind::Fixed(f) => f.to_string(),
            ExprKind::Var(v) => v.name.clone(),
            ExprKind::Index { var, indices } => format!(
                "{}[{}]",
                var.name,
                indices.iter().map(shape).collect::<Vec<_>>().join(",")
            ),
            ExprKind::Array(items) => format!(
                "[{}]",
                items.iter().map(shape).collect::<Vec<_>>().join(",")
            ),
            ExprKind::Op { op, args } => format!(
                "({}{})",
                op,
                args.iter().map(|a| format!(" {}", shape(a))).collect::<String>()
            ),
            ExprKind::Call { name, args, .. } => format!(
                "{}({})",
                name,
                args.iter().map(shape).collect::<Vec<_>>().join(",")
            ),
            ExprKind::Placeholder => "_".into(),
        }
    }

    #[test]
    fn precedence_and_associativity() {
        let e = expr("a = b = 1 + 2 * 3 - 4", Language::L2).unwrap();
        assert_eq!(shape(&e), "(= a (= b (- (+ 1 (* 2 3)) 4)))");
    }

    #[test]
    fn prefix_and_postfix() {
        let e = expr("-x++ + ~y", Language::L2).unwrap();
        assert_eq!(shape(&e), "(+ (- (++ x)) (~ y))");
        let e = expr("not a == b", Language::Simple).unwrap();
        assert_eq!(shape(&e), "(== (not a) b)");
    }

    #[test]
    fn calls_indexing_and_parentheses() {
        let e = expr("f(a[1, i], (2 + 3) * 4)", Language::L2).unwrap();
        assert_eq!(shape(&e), "f(a[1,i],(* (+ 2 3) 4))");
        let e = expr("g()", Language::L2).unwrap();
        assert_eq!(shape(&e), "g()");
    }

    #[test]
    fn conditional_nests_else_part() {
        let e = expr("c ? 1 : 2", Language::L2).unwrap();
        assert_eq!(shape(&e), "(? c (: 1 2))");
        assert_eq!(e.op_kind(), Some(Op::Conditional));
    }

    #[test]
    fn array_literal_is_column_major() {
        let e = expr("[1, 2, 3; 4, 5, 6]", Language::L2).unwrap();
        assert_eq!(shape(&e), "[1,4,2,5,3,6]");
        assert_eq!(e.dims, vec![2, 3]);
        let e = expr("[7, 8]", Language::Simple).unwrap();
        assert_eq!(e.dims, vec![2]);
    }

    #[test]
    fn errors() {
        let err = expr("[1, 2; 3]", Language::L2).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Message("non-rectangular array"));
        let err = expr("(1)[2]", Language::L2).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Message("unexpected indexing"));
        let err = expr("1 + )", Language::L2).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Message("unexpected token in expression"));
        let err = expr("1 +", Language::L2).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedEOF { .. }));
    }

    #[test]
    fn simple_language_logic_operators() {
        let e = expr("a < 1 or b and c", Language::Simple).unwrap();
        assert_eq!(shape(&e), "(or (< a 1) (and b c))");
        assert!(matches!(
            e.op_kind(),
            Some(Op::Binary(BinaryOp::Or))
        ));
    }
}
