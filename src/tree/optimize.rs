//! Local rewrites on typed trees: constant folding, implicit conversions,
//! expansion of compound assignments and array assignments, and removal of
//! branches that can never run.
use super::types::binary_type;
use crate::ast::*;
use crate::bytecode::{to_s16, BinaryOp, UnaryOp};
use crate::error::{CompileError, CompileRes, InternalError, SemanticError, Span};

pub fn optimize_units(units: Vec<Unit>) -> CompileRes<Vec<Unit>> {
    units
        .into_iter()
        .map(|unit| {
            let ret = match &unit.kind {
                UnitKind::Function { decl, .. } => Some(decl.ret),
                _ => None,
            };
            let before = unit.body.len();
            let body = fold_block(unit.body, ret)?;
            tracing::trace!(
                target: "tree::optimize",
                "{} statements folded to {}",
                before,
                body.len()
            );
            Ok(Unit { body, ..unit })
        })
        .collect()
}

fn semantic<T>(kind: SemanticError, span: Span) -> CompileRes<T> {
    Err(CompileError::semantic(kind, span))
}

fn operands<const N: usize>(op: Op, args: Vec<Expr>) -> CompileRes<[Expr; N]> {
    args.try_into()
        .map_err(|_| CompileError::internal(InternalError::MalformedOperator(op.symbol())))
}

fn fold_block(block: Vec<Stmt>, ret: Option<Type>) -> CompileRes<Vec<Stmt>> {
    let mut out = Vec::with_capacity(block.len());
    for stmt in block {
        out.extend(fold_statement(stmt, ret)?);
    }
    Ok(out)
}

fn has_label(block: &[Stmt]) -> bool {
    block.iter().any(|s| match &s.kind {
        StmtKind::Label(_) => true,
        StmtKind::If { arms, otherwise } => {
            arms.iter().any(|a| has_label(&a.body))
                || otherwise.as_deref().map_or(false, has_label)
        }
        StmtKind::When { body, .. }
        | StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. }
        | StmtKind::RangeFor { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::Switch { body, .. }
        | StmtKind::Block(body) => has_label(body),
        _ => false,
    })
}

fn is_array_assignment(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Op {
            op: Op::Assign,
            args,
        } => args.iter().any(|a| !a.is_scalar()),
        _ => false,
    }
}

fn fold_statement(stmt: Stmt, ret: Option<Type>) -> CompileRes<Vec<Stmt>> {
    let span = stmt.span;
    let kind = match stmt.kind {
        StmtKind::Expr(e) if is_array_assignment(&e) => return explode_assignment(e, span),
        StmtKind::Expr(e) => StmtKind::Expr(optimize_expr(e)?),
        StmtKind::If { arms, otherwise } => {
            let mut kept = Vec::with_capacity(arms.len());
            let mut taken = None;
            for arm in arms {
                let cond = optimize_expr(arm.cond)?;
                let body = fold_block(arm.body, ret)?;
                match cond.truth() {
                    Some(false) if !has_label(&body) => {}
                    Some(true) if kept.is_empty() && !has_label(&body) => {
                        taken = Some(body);
                        break;
                    }
                    _ => kept.push(IfArm {
                        cond,
                        body,
                        span: arm.span,
                    }),
                }
            }
            let otherwise = match taken {
                Some(body) => Some(body),
                None => otherwise.map(|b| fold_block(b, ret)).transpose()?,
            };
            if kept.is_empty() {
                return Ok(otherwise
                    .filter(|b| !b.is_empty())
                    .map(|b| Stmt::new(StmtKind::Block(b), span))
                    .into_iter()
                    .collect());
            }
            StmtKind::If {
                arms: kept,
                otherwise,
            }
        }
        StmtKind::When { cond, body } => StmtKind::When {
            cond: optimize_expr(cond)?,
            body: fold_block(body, ret)?,
        },
        StmtKind::While { label, cond, body } => {
            let body = fold_block(body, ret)?;
            let cond = cond.map(optimize_expr).transpose()?;
            match cond.as_ref().and_then(Expr::truth) {
                Some(false) if !has_label(&body) => return Ok(Vec::new()),
                Some(true) => StmtKind::While {
                    label,
                    cond: None,
                    body,
                },
                _ => StmtKind::While { label, cond, body },
            }
        }
        StmtKind::DoWhile { label, body, cond } => StmtKind::DoWhile {
            label,
            body: fold_block(body, ret)?,
            cond: optimize_expr(cond)?,
        },
        StmtKind::RangeFor {
            label,
            var,
            from,
            to,
            step,
            body,
        } => {
            let step = match step.map(optimize_expr).transpose()? {
                Some(s) if s.as_number().is_none() => {
                    return semantic(SemanticError::NonConstant("loop step"), s.span)
                }
                step => step,
            };
            StmtKind::RangeFor {
                label,
                var,
                from: cast(optimize_expr(from)?, Type::Number),
                to: cast(optimize_expr(to)?, Type::Number),
                step,
                body: fold_block(body, ret)?,
            }
        }
        StmtKind::For {
            label,
            init,
            cond,
            step,
            body,
        } => {
            let cond = cond.map(optimize_expr).transpose()?;
            StmtKind::For {
                label,
                init: fold_block(init, ret)?,
                cond: cond.filter(|c| c.truth() != Some(true)),
                step: step.map(optimize_expr).transpose()?,
                body: fold_block(body, ret)?,
            }
        }
        StmtKind::Switch {
            label,
            subject,
            body,
        } => StmtKind::Switch {
            label,
            subject: cast(optimize_expr(subject)?, Type::Number),
            body: fold_block(body, ret)?,
        },
        StmtKind::Case(value) => {
            let value = cast(optimize_expr(value)?, Type::Number);
            if value.as_number().is_none() {
                return semantic(SemanticError::NonConstant("case"), value.span);
            }
            StmtKind::Case(value)
        }
        StmtKind::Block(body) => StmtKind::Block(fold_block(body, ret)?),
        StmtKind::NativeCall { name, args } => StmtKind::NativeCall {
            name,
            args: args
                .into_iter()
                .map(optimize_expr)
                .collect::<CompileRes<_>>()?,
        },
        StmtKind::Emit { event, value } => StmtKind::Emit {
            event,
            value: value.map(optimize_expr).transpose()?,
        },
        StmtKind::Return(Some(value)) => {
            let value = optimize_expr(value)?;
            let ty = ret.unwrap_or(value.ty);
            StmtKind::Return(Some(cast(value, ty)))
        }
        other => other,
    };
    Ok(vec![Stmt::new(kind, span)])
}

/// `a = b` on whole arrays becomes one assignment per element.
fn explode_assignment(e: Expr, span: Span) -> CompileRes<Vec<Stmt>> {
    let op_span = e.span;
    let args = match e.kind {
        ExprKind::Op { args, .. } => args,
        _ => return semantic(SemanticError::BadArrayAssignment, op_span),
    };
    let [lhs, rhs] = operands(Op::Assign, args)?;
    let var = match lhs.kind {
        ExprKind::Var(var) => var,
        _ => return semantic(SemanticError::BadArrayAssignment, op_span),
    };
    let size = lhs.dims.iter().product::<usize>();
    if size != rhs.size() {
        return semantic(SemanticError::IncompatibleSizes, op_span);
    }
    let (rhs_span, rhs_ty) = (rhs.span, rhs.ty);
    let items = match rhs.kind {
        ExprKind::Array(items) => items,
        ExprKind::Var(source) => (0..size)
            .map(|k| element(&source, k, rhs_span, rhs_ty))
            .collect(),
        _ => return semantic(SemanticError::BadArrayAssignment, op_span),
    };
    items
        .into_iter()
        .enumerate()
        .map(|(k, item)| {
            let target = element(&var, k, lhs.span, lhs.ty);
            let assign = Expr::op(Op::Assign, vec![target, item], op_span).typed(lhs.ty);
            Ok(Stmt::new(StmtKind::Expr(optimize_expr(assign)?), span))
        })
        .collect()
}

fn element(var: &Variable, k: usize, span: Span, ty: Type) -> Expr {
    Expr::new(
        ExprKind::Index {
            var: var.clone(),
            indices: vec![Expr::number(k as i16, span)],
        },
        span,
    )
    .typed(ty)
}

/// Converts `expr` to `to`, folding literals.
pub(super) fn cast(expr: Expr, to: Type) -> Expr {
    if expr.ty == to || matches!(to, Type::Undef | Type::Void) || expr.ty == Type::Void {
        return expr;
    }
    let span = expr.span;
    match (to, &expr.kind) {
        (Type::Fixed, ExprKind::Number(n)) => Expr::fixed(f64::from(*n), span),
        (Type::Number, ExprKind::Fixed(f)) => Expr::number(to_s16(f.trunc() as i32), span),
        (Type::Boolean, _) if expr.is_literal() => Expr::boolean(expr.truth() == Some(true), span),
        // booleans already are 0 or 1
        (Type::Number, _) if expr.ty == Type::Boolean => expr.typed(Type::Number),
        _ => Expr::op(Op::Cast(to), vec![expr], span).typed(to),
    }
}

fn literal_value(e: &Expr) -> Option<f64> {
    match e.kind {
        ExprKind::Number(n) => Some(f64::from(n)),
        ExprKind::Fixed(f) => Some(f),
        _ => None,
    }
}

pub fn optimize_expr(expr: Expr) -> CompileRes<Expr> {
    let Expr {
        kind,
        span,
        ty,
        dims,
    } = expr;
    match kind {
        ExprKind::Op { op, args } => {
            let args = args
                .into_iter()
                .map(optimize_expr)
                .collect::<CompileRes<Vec<_>>>()?;
            fold_op(op, args, span, ty, dims)
        }
        ExprKind::Index { var, indices } => index(var, indices, span, ty),
        ExprKind::Array(items) => {
            let items = items
                .into_iter()
                .map(|i| optimize_expr(i).map(|i| cast(i, ty)))
                .collect::<CompileRes<Vec<_>>>()?;
            Ok(Expr::new(ExprKind::Array(items), span)
                .typed(ty)
                .with_dims(dims))
        }
        ExprKind::Call { name, args, callee } => {
            let mut args = args
                .into_iter()
                .map(optimize_expr)
                .collect::<CompileRes<Vec<_>>>()?;
            if let Some(Callee::Function(sig)) = &callee {
                args = args
                    .into_iter()
                    .zip(&sig.params)
                    .map(|(arg, p)| if p.by_ref { arg } else { cast(arg, p.ty) })
                    .collect();
            }
            Ok(Expr::new(ExprKind::Call { name, args, callee }, span)
                .typed(ty)
                .with_dims(dims))
        }
        kind => Ok(Expr {
            kind,
            span,
            ty,
            dims,
        }),
    }
}

/// Folds constant indices into a single bounds-checked flat index.
fn index(var: Variable, indices: Vec<Expr>, span: Span, ty: Type) -> CompileRes<Expr> {
    let indices = indices
        .into_iter()
        .map(|i| optimize_expr(i).map(|i| cast(i, Type::Number)))
        .collect::<CompileRes<Vec<_>>>()?;
    let dims = match &var.storage {
        Some(storage) => storage.dims.clone(),
        None => {
            return Err(CompileError::internal(InternalError::UnresolvedVariable(
                var.name,
            )))
        }
    };
    let size = dims.iter().product::<usize>().max(1);
    let constant = indices
        .iter()
        .map(Expr::as_number)
        .collect::<Option<Vec<_>>>();
    let indices = match constant {
        Some(values) => {
            let bounds = if values.len() == 1 { vec![size] } else { dims };
            let mut flat = 0;
            let mut stride = 1;
            for (&v, &bound) in values.iter().zip(&bounds) {
                if v < 0 || v as usize >= bound {
                    return semantic(SemanticError::IndexOutOfRange, span);
                }
                flat += v as usize * stride;
                stride *= bound;
            }
            vec![Expr::number(flat as i16, span)]
        }
        None => indices,
    };
    Ok(Expr::new(ExprKind::Index { var, indices }, span).typed(ty))
}

fn fold_op(op: Op, args: Vec<Expr>, span: Span, ty: Type, dims: Vec<usize>) -> CompileRes<Expr> {
    let rebuild = |args: Vec<Expr>| Expr::op(op, args, span).typed(ty);
    Ok(match op {
        Op::Binary(b) => return binary(b, args, span, ty),
        Op::LogicAnd | Op::LogicOr => {
            let [x, y] = operands(op, args)?;
            let (x, y) = (cast(x, Type::Boolean), cast(y, Type::Boolean));
            let and = op == Op::LogicAnd;
            match (x.truth(), y.truth()) {
                (Some(a), Some(b)) => Expr::boolean(if and { a && b } else { a || b }, span),
                (Some(a), None) if a != and => Expr::boolean(a, span),
                (Some(_), None) => y,
                _ => rebuild(vec![x, y]),
            }
        }
        Op::Assign => {
            let [lhs, rhs] = operands(op, args)?;
            if !lhs.is_scalar() || !rhs.is_scalar() {
                return semantic(SemanticError::BadArrayAssignment, span);
            }
            let rhs = cast(rhs, lhs.ty);
            rebuild(vec![lhs, rhs])
        }
        Op::CompoundAssign(b) => {
            let [lhs, rhs] = operands(op, args)?;
            let update = update_value(b, &lhs, rhs, span)?;
            rebuild(vec![lhs, update])
        }
        Op::PreIncrement | Op::PreDecrement => {
            let b = if op == Op::PreIncrement {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            };
            let [x] = operands(op, args)?;
            return fold_op(
                Op::CompoundAssign(b),
                vec![x, Expr::number(1, span)],
                span,
                ty,
                dims,
            );
        }
        Op::PostIncrement | Op::PostDecrement => {
            let [lhs] = operands(op, args)?;
            let b = if op == Op::PostIncrement {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            };
            let update = update_value(b, &lhs, Expr::number(1, span), span)?;
            rebuild(vec![lhs, update])
        }
        Op::Negate | Op::Abs | Op::BitNot => {
            let [x] = operands(op, args)?;
            let x = if op == Op::BitNot {
                cast(x, Type::Number)
            } else {
                x
            };
            let unary = match op {
                Op::Negate => UnaryOp::Neg,
                Op::Abs => UnaryOp::Abs,
                _ => UnaryOp::BitNot,
            };
            match x.kind {
                ExprKind::Number(n) => Expr::number(to_s16(unary.eval(n.into())), span).typed(ty),
                ExprKind::Fixed(f) if unary == UnaryOp::Neg => Expr::fixed(-f, span),
                ExprKind::Fixed(f) if unary == UnaryOp::Abs => Expr::fixed(f.abs(), span),
                _ => rebuild(vec![x]),
            }
        }
        Op::Not => {
            let [x] = operands(op, args)?;
            if let Some(t) = x.truth() {
                return Ok(Expr::boolean(!t, span));
            }
            match x.kind {
                ExprKind::Op {
                    op: Op::Binary(cmp),
                    args,
                } if cmp.negated().is_some() => {
                    let negated = cmp.negated().unwrap_or(cmp);
                    Expr::op(Op::Binary(negated), args, x.span).typed(Type::Boolean)
                }
                kind => rebuild(vec![Expr { kind, ..x }]),
            }
        }
        Op::Cast(to) => {
            let [x] = operands(op, args)?;
            cast(x, to)
        }
        Op::Conditional => {
            let [cond, branches] = operands(op, args)?;
            let else_span = branches.span;
            let [a, b] = match branches.kind {
                ExprKind::Op { args, .. } => operands(Op::ConditionalElse, args)?,
                _ => return semantic(SemanticError::MissingElse, else_span),
            };
            let (a, b) = (cast(a, ty), cast(b, ty));
            match cond.truth() {
                Some(true) => a,
                Some(false) => b,
                None => rebuild(vec![
                    cond,
                    Expr::op(Op::ConditionalElse, vec![a, b], else_span).typed(ty),
                ]),
            }
        }
        Op::Comma => {
            let [a, b] = operands(op, args)?;
            if a.is_literal() || matches!(a.kind, ExprKind::Var(_)) {
                b
            } else {
                rebuild(vec![a, b]).with_dims(dims)
            }
        }
        _ => rebuild(args).with_dims(dims),
    })
}

/// Value stored by `lhs op= rhs`, computed from the current value of
/// `lhs` left on the stack.
fn update_value(b: BinaryOp, lhs: &Expr, rhs: Expr, span: Span) -> CompileRes<Expr> {
    let current = Expr::placeholder(lhs.ty, lhs.span);
    let ty = binary_type(b, lhs.ty, rhs.ty);
    Ok(cast(binary(b, vec![current, rhs], span, ty)?, lhs.ty))
}

const fn reassociates(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add | BinaryOp::Mult | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
    )
}

fn binary(b: BinaryOp, args: Vec<Expr>, span: Span, ty: Type) -> CompileRes<Expr> {
    let [x, y] = operands(Op::Binary(b), args)?;
    let any_fixed = x.ty == Type::Fixed || y.ty == Type::Fixed;
    let (x, y) = match b {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mod if any_fixed => {
            (cast(x, Type::Fixed), cast(y, Type::Fixed))
        }
        _ if b.is_comparison() && any_fixed => (cast(x, Type::Fixed), cast(y, Type::Fixed)),
        BinaryOp::Shl | BinaryOp::Shr => (x, cast(y, Type::Number)),
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
            (cast(x, Type::Number), cast(y, Type::Number))
        }
        _ => (x, y),
    };

    if let (ExprKind::Number(a), ExprKind::Number(c)) = (&x.kind, &y.kind) {
        let r = match b.eval((*a).into(), (*c).into()) {
            Some(r) => r,
            None => return semantic(SemanticError::DivisionByZero, span),
        };
        return Ok(if b.is_comparison() || b.is_logical() {
            Expr::boolean(r != 0, span)
        } else {
            Expr::number(to_s16(r), span).typed(ty)
        });
    }
    if any_fixed {
        if let (Some(a), Some(c)) = (literal_value(&x), literal_value(&y)) {
            let folded = match b {
                BinaryOp::Add => Some(a + c),
                BinaryOp::Sub => Some(a - c),
                BinaryOp::Mult => Some(a * c),
                BinaryOp::Div | BinaryOp::Mod if c == 0.0 => {
                    return semantic(SemanticError::DivisionByZero, span)
                }
                BinaryOp::Div => Some(a / c),
                BinaryOp::Mod => Some(a % c),
                BinaryOp::Eq => return Ok(Expr::boolean(a == c, span)),
                BinaryOp::Ne => return Ok(Expr::boolean(a != c, span)),
                BinaryOp::Gt => return Ok(Expr::boolean(a > c, span)),
                BinaryOp::Ge => return Ok(Expr::boolean(a >= c, span)),
                BinaryOp::Lt => return Ok(Expr::boolean(a < c, span)),
                BinaryOp::Le => return Ok(Expr::boolean(a <= c, span)),
                _ => None,
            };
            if let Some(f) = folded {
                return Ok(Expr::fixed(f, span));
            }
        }
    }

    // (e op k1) op k2 => e op (k1 op k2)
    if reassociates(b) && ty == Type::Number {
        if let (Some(k2), ExprKind::Op { op, args }) = (y.as_number(), &x.kind) {
            if *op == Op::Binary(b) && args.len() == 2 && args[0].ty == Type::Number {
                if let Some(r) = args[1]
                    .as_number()
                    .and_then(|k1| b.eval(k1.into(), k2.into()))
                {
                    let folded = vec![args[0].clone(), Expr::number(to_s16(r), span)];
                    return Ok(Expr::op(Op::Binary(b), folded, span).typed(ty));
                }
            }
        }
    }
    Ok(Expr::op(Op::Binary(b), vec![x, y], span).typed(ty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: i16) -> Expr {
        Expr::number(n, Span::new(0))
    }

    fn var(name: &str, ty: Type) -> Expr {
        Expr::new(
            ExprKind::Var(Variable {
                name: name.into(),
                storage: Some(Storage {
                    offset: 10,
                    dims: Vec::new(),
                    ty,
                    mode: Addressing::Absolute,
                }),
            }),
            Span::new(0),
        )
        .typed(ty)
    }

    fn bin(b: BinaryOp, x: Expr, y: Expr) -> Expr {
        let ty = binary_type(b, x.ty, y.ty);
        Expr::op(Op::Binary(b), vec![x, y], Span::new(0)).typed(ty)
    }

    #[test]
    fn integer_constants_fold_and_wrap() {
        let e = optimize_expr(bin(BinaryOp::Add, num(3), bin(BinaryOp::Mult, num(4), num(2)))).unwrap();
        assert_eq!(e.as_number(), Some(11));
        let e = optimize_expr(bin(BinaryOp::Mult, num(300), num(300))).unwrap();
        assert_eq!(e.as_number(), Some(to_s16(90000)));
        let e = optimize_expr(bin(BinaryOp::Lt, num(1), num(2))).unwrap();
        assert_eq!((e.as_number(), e.ty), (Some(1), Type::Boolean));
    }

    #[test]
    fn division_by_zero_is_reported_at_the_operator() {
        let e = Expr::op(Op::Binary(BinaryOp::Div), vec![num(5), num(0)], Span::new(7))
            .typed(Type::Number);
        let err = optimize_expr(e).unwrap_err();
        assert_eq!(err.span(), Some(Span::new(7)));
        assert_eq!(err.to_string(), "division by 0");
    }

    #[test]
    fn fixed_mixes_insert_conversions() {
        let e = optimize_expr(bin(BinaryOp::Add, var("i", Type::Number), var("f", Type::Fixed))).unwrap();
        match &e.kind {
            ExprKind::Op { args, .. } => {
                assert_eq!(args[0].op_kind(), Some(Op::Cast(Type::Fixed)));
                assert_eq!(args[1].op_kind(), None);
            }
            other => panic!("{:?}", other),
        }
        let e = optimize_expr(bin(BinaryOp::Mult, num(3), Expr::fixed(1.5, Span::new(0)))).unwrap();
        assert!(matches!(e.kind, ExprKind::Fixed(f) if f == 4.5));
    }

    #[test]
    fn assignment_converts_to_target_type() {
        let e = Expr::op(Op::Assign, vec![var("f", Type::Fixed), num(3)], Span::new(0))
            .typed(Type::Fixed);
        match optimize_expr(e).unwrap().kind {
            ExprKind::Op { args, .. } => assert!(matches!(args[1].kind, ExprKind::Fixed(f) if f == 3.0)),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn compound_assignment_uses_the_current_value() {
        let e = Expr::op(
            Op::CompoundAssign(BinaryOp::Add),
            vec![var("x", Type::Number), num(2)],
            Span::new(0),
        )
        .typed(Type::Number);
        match optimize_expr(e).unwrap().kind {
            ExprKind::Op { args, .. } => match &args[1].kind {
                ExprKind::Op { op, args } => {
                    assert_eq!(*op, Op::Binary(BinaryOp::Add));
                    assert_eq!(args[0].kind, ExprKind::Placeholder);
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn constants_reassociate() {
        let e = bin(BinaryOp::Add, bin(BinaryOp::Add, var("x", Type::Number), num(2)), num(3));
        match optimize_expr(e).unwrap().kind {
            ExprKind::Op { args, .. } => assert_eq!(args[1].as_number(), Some(5)),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn logic_short_circuits_on_literals() {
        let x = var("x", Type::Boolean);
        let e = Expr::op(Op::LogicAnd, vec![num(0), x.clone()], Span::new(0)).typed(Type::Boolean);
        assert_eq!(optimize_expr(e).unwrap().truth(), Some(false));
        let e = Expr::op(Op::LogicOr, vec![num(0), x], Span::new(0)).typed(Type::Boolean);
        assert!(matches!(optimize_expr(e).unwrap().kind, ExprKind::Var(_)));
    }

    #[test]
    fn dead_branches_are_removed() {
        let span = Span::new(0);
        let body = vec![Stmt::new(StmtKind::Expr(var("x", Type::Number)), span)];
        let stmt = Stmt::new(
            StmtKind::If {
                arms: vec![IfArm {
                    cond: num(0),
                    body: body.clone(),
                    span,
                }],
                otherwise: None,
            },
            span,
        );
        assert!(fold_statement(stmt, None).unwrap().is_empty());
        let stmt = Stmt::new(
            StmtKind::While {
                label: None,
                cond: Some(num(1)),
                body,
            },
            span,
        );
        assert!(matches!(
            &fold_statement(stmt, None).unwrap()[0].kind,
            StmtKind::While { cond: None, .. }
        ));
    }

    #[test]
    fn constant_indices_are_checked() {
        let a = Variable {
            name: "a".into(),
            storage: Some(Storage {
                offset: 0,
                dims: vec![2, 3],
                ty: Type::Number,
                mode: Addressing::Absolute,
            }),
        };
        let e = Expr::new(
            ExprKind::Index {
                var: a.clone(),
                indices: vec![num(1), num(2)],
            },
            Span::new(0),
        )
        .typed(Type::Number);
        match optimize_expr(e).unwrap().kind {
            ExprKind::Index { indices, .. } => assert_eq!(indices[0].as_number(), Some(5)),
            other => panic!("{:?}", other),
        }
        let e = Expr::new(
            ExprKind::Index {
                var: a,
                indices: vec![num(6)],
            },
            Span::new(0),
        );
        assert!(optimize_expr(e).is_err());
    }
}
