//! Computes the type and dimensions of every expression and binds calls
//! to functions and macros.
use std::rc::Rc;

use super::{scope::Functions, TreeContext};
use crate::ast::*;
use crate::bytecode::BinaryOp;
use crate::error::{CompileError, CompileRes, InternalError, SemanticError, Span};
use crate::macros::Macro;

pub fn resolve_units(
    units: Vec<Unit>,
    functions: &Functions,
    ctx: &TreeContext,
) -> CompileRes<Vec<Unit>> {
    let resolver = Resolver { ctx, functions };
    units
        .into_iter()
        .map(|unit| {
            Ok(Unit {
                body: resolver.statements(unit.body)?,
                ..unit
            })
        })
        .collect()
}

pub fn resolve_expr(expr: Expr, functions: &Functions, ctx: &TreeContext) -> CompileRes<Expr> {
    Resolver { ctx, functions }.expr(expr)
}

struct Resolver<'a> {
    ctx: &'a TreeContext<'a>,
    functions: &'a Functions,
}

fn semantic<T>(kind: SemanticError, span: Span) -> CompileRes<T> {
    Err(CompileError::semantic(kind, span))
}

fn malformed(op: Op) -> CompileError {
    CompileError::internal(InternalError::MalformedOperator(op.symbol()))
}

/// Result of `+ - * / %` on the given operand types.
fn arithmetic(a: Type, b: Type) -> Type {
    if a == Type::Fixed || b == Type::Fixed {
        Type::Fixed
    } else {
        Type::Number
    }
}

/// Result type of a binary operator.
pub(super) fn binary_type(op: BinaryOp, x: Type, y: Type) -> Type {
    match op {
        _ if op.is_comparison() || op.is_logical() => Type::Boolean,
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mult | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(x, y)
        }
        BinaryOp::Shl | BinaryOp::Shr if x == Type::Fixed => Type::Fixed,
        _ => Type::Number,
    }
}

/// Common type of the two branches of `?:`.
fn merge(a: Type, b: Type) -> Type {
    match (a, b) {
        (Type::Fixed, _) | (_, Type::Fixed) => Type::Fixed,
        (Type::Boolean, Type::Boolean) => Type::Boolean,
        _ => Type::Number,
    }
}

fn value(e: Expr) -> CompileRes<Expr> {
    if e.ty == Type::Void {
        return semantic(SemanticError::VoidValue, e.span);
    }
    Ok(e)
}

fn scalar(e: Expr) -> CompileRes<Expr> {
    let e = value(e)?;
    if !e.is_scalar() {
        return semantic(SemanticError::ArrayInExpression, e.span);
    }
    Ok(e)
}

fn pair(op: Op, args: Vec<Expr>) -> CompileRes<[Expr; 2]> {
    args.try_into().map_err(|_| malformed(op))
}

fn single(op: Op, args: Vec<Expr>) -> CompileRes<Expr> {
    let [arg]: [Expr; 1] = args.try_into().map_err(|_| malformed(op))?;
    Ok(arg)
}

impl<'a> Resolver<'a> {
    fn statements(&self, body: Vec<Stmt>) -> CompileRes<Vec<Stmt>> {
        body.into_iter().map(|s| self.statement(s)).collect()
    }

    fn cond(&self, e: Expr) -> CompileRes<Expr> {
        scalar(self.expr(e)?)
    }

    fn statement(&self, stmt: Stmt) -> CompileRes<Stmt> {
        let span = stmt.span;
        let kind = match stmt.kind {
            StmtKind::Expr(e) => match self.as_native_call(e) {
                Ok((name, args)) => StmtKind::NativeCall {
                    name,
                    args: self.native_args(args)?,
                },
                Err(e) => StmtKind::Expr(self.expr(e)?),
            },
            StmtKind::If { arms, otherwise } => StmtKind::If {
                arms: arms
                    .into_iter()
                    .map(|arm| {
                        Ok(IfArm {
                            cond: self.cond(arm.cond)?,
                            body: self.statements(arm.body)?,
                            span: arm.span,
                        })
                    })
                    .collect::<CompileRes<_>>()?,
                otherwise: otherwise.map(|b| self.statements(b)).transpose()?,
            },
            StmtKind::When { cond, body } => StmtKind::When {
                cond: self.cond(cond)?,
                body: self.statements(body)?,
            },
            StmtKind::While { label, cond, body } => StmtKind::While {
                label,
                cond: cond.map(|c| self.cond(c)).transpose()?,
                body: self.statements(body)?,
            },
            StmtKind::DoWhile { label, body, cond } => StmtKind::DoWhile {
                label,
                body: self.statements(body)?,
                cond: self.cond(cond)?,
            },
            StmtKind::RangeFor {
                label,
                var,
                from,
                to,
                step,
                body,
            } => {
                let var = self.cond(var)?;
                if !var.is_lvalue() {
                    return semantic(SemanticError::InvalidOperand, var.span);
                }
                StmtKind::RangeFor {
                    label,
                    var,
                    from: self.cond(from)?,
                    to: self.cond(to)?,
                    step: step.map(|s| self.cond(s)).transpose()?,
                    body: self.statements(body)?,
                }
            }
            StmtKind::For {
                label,
                init,
                cond,
                step,
                body,
            } => StmtKind::For {
                label,
                init: self.statements(init)?,
                cond: cond.map(|c| self.cond(c)).transpose()?,
                step: step.map(|s| self.expr(s)).transpose()?,
                body: self.statements(body)?,
            },
            StmtKind::Switch {
                label,
                subject,
                body,
            } => StmtKind::Switch {
                label,
                subject: self.cond(subject)?,
                body: self.statements(body)?,
            },
            StmtKind::Case(v) => StmtKind::Case(self.cond(v)?),
            StmtKind::Block(body) => StmtKind::Block(self.statements(body)?),
            StmtKind::NativeCall { name, args } => StmtKind::NativeCall {
                name,
                args: self.native_args(args)?,
            },
            StmtKind::Emit { event, value: data } => StmtKind::Emit {
                event,
                value: data.map(|v| self.expr(v).and_then(value)).transpose()?,
            },
            StmtKind::Return(v) => StmtKind::Return(v.map(|v| self.cond(v)).transpose()?),
            other => other,
        };
        Ok(Stmt::new(kind, span))
    }

    /// A call statement naming a native function rather than a function
    /// or macro of the program.
    fn as_native_call(&self, e: Expr) -> Result<(String, Vec<Expr>), Expr> {
        match e.kind {
            ExprKind::Call {
                name,
                args,
                callee: None,
            } if !self.functions.contains_key(&name)
                && Macro::lookup(&name, self.ctx.language(), self.ctx.node).is_none()
                && self.ctx.node.native(&name).is_some() =>
            {
                Ok((name, args))
            }
            kind => Err(Expr { kind, ..e }),
        }
    }

    fn native_args(&self, args: Vec<Expr>) -> CompileRes<Vec<Expr>> {
        args.into_iter()
            .map(|a| self.expr(a).and_then(value))
            .collect()
    }

    pub fn expr(&self, expr: Expr) -> CompileRes<Expr> {
        let Expr {
            kind,
            span,
            ty,
            dims,
        } = expr;
        match kind {
            ExprKind::Number(_) | ExprKind::Fixed(_) | ExprKind::Placeholder => Ok(Expr {
                kind,
                span,
                ty,
                dims,
            }),
            ExprKind::Var(var) => {
                let storage = var.storage.clone().ok_or_else(|| {
                    CompileError::internal(InternalError::UnresolvedVariable(var.name.clone()))
                })?;
                Ok(Expr::new(ExprKind::Var(var), span)
                    .typed(storage.ty)
                    .with_dims(storage.dims))
            }
            ExprKind::Index { var, indices } => {
                let storage = var.storage.clone().ok_or_else(|| {
                    CompileError::internal(InternalError::UnresolvedVariable(var.name.clone()))
                })?;
                if indices.len() != 1 && indices.len() != storage.dims.len() {
                    return semantic(SemanticError::TooManyIndices, span);
                }
                let indices = indices
                    .into_iter()
                    .map(|i| self.cond(i))
                    .collect::<CompileRes<Vec<_>>>()?;
                Ok(Expr::new(ExprKind::Index { var, indices }, span).typed(storage.ty))
            }
            ExprKind::Array(items) => {
                let items = items
                    .into_iter()
                    .map(|i| self.cond(i))
                    .collect::<CompileRes<Vec<_>>>()?;
                let ty = items
                    .iter()
                    .map(|i| i.ty)
                    .reduce(merge)
                    .unwrap_or(Type::Number);
                let dims = if dims.is_empty() {
                    vec![items.len()]
                } else {
                    dims
                };
                Ok(Expr::new(ExprKind::Array(items), span)
                    .typed(ty)
                    .with_dims(dims))
            }
            ExprKind::Op { op, args } => self.op(op, args, span),
            ExprKind::Call { name, args, .. } => self.call(name, args, span),
        }
    }

    fn op(&self, op: Op, args: Vec<Expr>, span: Span) -> CompileRes<Expr> {
        let typed = |args: Vec<Expr>, ty: Type| -> CompileRes<Expr> {
            Ok(Expr::op(op, args, span).typed(ty))
        };
        match op {
            Op::Bool(b) => Ok(Expr::boolean(b, span)),
            Op::ConditionalElse => semantic(SemanticError::UnexpectedElse, span),
            Op::Conditional => {
                let [cond, rest] = pair(op, args)?;
                let (else_span, branches) = match rest.kind {
                    ExprKind::Op {
                        op: Op::ConditionalElse,
                        args,
                    } => (rest.span, args),
                    _ => return semantic(SemanticError::MissingElse, rest.span),
                };
                let [a, b] = pair(Op::ConditionalElse, branches)?;
                let cond = self.cond(cond)?;
                let (a, b) = (self.cond(a)?, self.cond(b)?);
                let ty = merge(a.ty, b.ty);
                let branches = Expr::op(Op::ConditionalElse, vec![a, b], else_span).typed(ty);
                typed(vec![cond, branches], ty)
            }
            Op::Comma => {
                let [a, b] = pair(op, args)?;
                let (a, b) = (self.expr(a)?, self.expr(b)?);
                let (ty, dims) = (b.ty, b.dims.clone());
                Ok(Expr::op(op, vec![a, b], span).typed(ty).with_dims(dims))
            }
            Op::Size => {
                let arg = value(self.expr(single(op, args)?)?)?;
                Ok(Expr::number(arg.size() as i16, span))
            }
            Op::Assign => {
                let [lhs, rhs] = pair(op, args)?;
                let lhs = value(self.expr(lhs)?)?;
                let rhs = value(self.expr(rhs)?)?;
                if !lhs.is_lvalue() {
                    return semantic(SemanticError::InvalidOperand, span);
                }
                let (ty, dims) = (lhs.ty, lhs.dims.clone());
                Ok(Expr::op(op, vec![lhs, rhs], span).typed(ty).with_dims(dims))
            }
            Op::CompoundAssign(_) => {
                let [lhs, rhs] = pair(op, args)?;
                let lhs = scalar(self.expr(lhs)?)?;
                let rhs = scalar(self.expr(rhs)?)?;
                if !lhs.is_lvalue() {
                    return semantic(SemanticError::InvalidOperand, span);
                }
                let ty = lhs.ty;
                typed(vec![lhs, rhs], ty)
            }
            Op::PreIncrement | Op::PreDecrement | Op::PostIncrement | Op::PostDecrement => {
                let arg = scalar(self.expr(single(op, args)?)?)?;
                if !arg.is_lvalue() {
                    return semantic(SemanticError::InvalidOperand, span);
                }
                let ty = arg.ty;
                typed(vec![arg], ty)
            }
            Op::Binary(b) => {
                let [x, y] = pair(op, args)?;
                let (x, y) = (self.cond(x)?, self.cond(y)?);
                let ty = binary_type(b, x.ty, y.ty);
                typed(vec![x, y], ty)
            }
            Op::LogicAnd | Op::LogicOr => {
                let [x, y] = pair(op, args)?;
                typed(vec![self.cond(x)?, self.cond(y)?], Type::Boolean)
            }
            Op::Negate | Op::Abs => {
                let arg = self.cond(single(op, args)?)?;
                let ty = if arg.ty == Type::Fixed {
                    Type::Fixed
                } else {
                    Type::Number
                };
                typed(vec![arg], ty)
            }
            Op::BitNot => typed(vec![self.cond(single(op, args)?)?], Type::Number),
            Op::Not => typed(vec![self.cond(single(op, args)?)?], Type::Boolean),
            Op::Cast(to) => typed(vec![self.cond(single(op, args)?)?], to),
        }
    }

    fn call(&self, name: String, args: Vec<Expr>, span: Span) -> CompileRes<Expr> {
        if let Some(sig) = self.functions.get(&name) {
            if args.len() != sig.params.len() {
                return semantic(SemanticError::WrongArgumentCount(name), span);
            }
            let args = args
                .into_iter()
                .zip(&sig.params)
                .map(|(arg, param)| self.argument(arg, param, &name))
                .collect::<CompileRes<Vec<_>>>()?;
            return Ok(Expr::new(
                ExprKind::Call {
                    name,
                    args,
                    callee: Some(Callee::Function(Rc::clone(sig))),
                },
                span,
            )
            .typed(sig.ret));
        }
        let language = self.ctx.language();
        if let Some(m) = Macro::lookup(&name, language, self.ctx.node) {
            if args.len() != m.arity() {
                return semantic(SemanticError::WrongArgumentCount(name), span);
            }
            let args = args
                .into_iter()
                .map(|a| self.cond(a))
                .collect::<CompileRes<Vec<_>>>()?;
            let types = args.iter().map(|a| a.ty).collect::<Vec<_>>();
            return Ok(Expr::new(
                ExprKind::Call {
                    name,
                    args,
                    callee: Some(Callee::Macro(m)),
                },
                span,
            )
            .typed(m.result_type(&types)));
        }
        semantic(SemanticError::UnknownFunction(name), span)
    }

    fn argument(&self, arg: Expr, param: &Param, function: &str) -> CompileRes<Expr> {
        let arg = value(self.expr(arg)?)?;
        if param.by_ref {
            if !arg.is_lvalue() {
                return semantic(SemanticError::ReferenceExpected, arg.span);
            }
            if arg.ty != param.ty {
                return semantic(SemanticError::ReferenceTypeMismatch, arg.span);
            }
            if arg.size() != param.size() {
                return semantic(SemanticError::ArgumentSize(function.to_string()), arg.span);
            }
        } else if !arg.is_scalar() {
            return semantic(SemanticError::ArgumentSize(function.to_string()), arg.span);
        }
        Ok(arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::error::{CompileErrorKind, SourceMetadata};
    use crate::grammar::Parser;
    use crate::language::Language;
    use crate::target::NodeDescription;

    fn typed_units(src: &str) -> CompileRes<Vec<Unit>> {
        let meta = SourceMetadata::new(src);
        let options = CompilerOptions::new(Language::L2);
        let node = NodeDescription::thymio();
        let ctx = TreeContext {
            node: &node,
            options: &options,
        };
        let lines = Parser::new(&meta, &options)
            .and_then(|mut p| p.parse_lines())
            .map_err(|e| e.map_kind(CompileErrorKind::from))?;
        let alloc = super::super::scope::allocate(super::super::build_units(lines, Language::L2)?, &ctx)?;
        resolve_units(alloc.units, &alloc.functions, &ctx)
    }

    fn last_expr(units: &[Unit]) -> Expr {
        match units[0].body.last().map(|s| &s.kind) {
            Some(StmtKind::Expr(e)) => e.clone(),
            other => panic!("not an expression statement: {:?}", other),
        }
    }

    fn error(src: &str) -> SemanticError {
        match typed_units(src).unwrap_err().kind {
            CompileErrorKind::Semantic(kind) => kind,
            other => panic!("not a semantic error: {:?}", other),
        }
    }

    #[test]
    fn fixed_propagates_through_arithmetic() {
        let units = typed_units("fixed f;\nint i;\ni + f * 2;").unwrap();
        assert_eq!(last_expr(&units).ty, Type::Fixed);
        let units = typed_units("int i;\ni < 3 && i > 0;").unwrap();
        assert_eq!(last_expr(&units).ty, Type::Boolean);
    }

    #[test]
    fn size_folds_to_a_number() {
        let units = typed_units("int a[2, 3];\nint n;\nn = size a;").unwrap();
        match &last_expr(&units).kind {
            ExprKind::Op { args, .. } => assert_eq!(args[1].as_number(), Some(6)),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn calls_bind_to_functions_macros_and_natives() {
        let units = typed_units(
            "int sq(int x) {\nreturn x * x;\n}\nint a[3];\nint m;\nm = sq(2) + min(1, 2);\nmath.fill(a, 0);",
        )
        .unwrap();
        assert!(matches!(&units[0].body.last().unwrap().kind, StmtKind::NativeCall { name, .. } if name == "math.fill"));
    }

    #[test]
    fn call_errors() {
        assert_eq!(
            error("int f(int x) {\nreturn x;\n}\nf();"),
            SemanticError::WrongArgumentCount("f".into())
        );
        assert_eq!(
            error("void f(int v[2]) {\n}\nf(3);"),
            SemanticError::ReferenceExpected
        );
        assert_eq!(
            error("void f(int v[2]) {\n}\nint w[3];\nf(w);"),
            SemanticError::ArgumentSize("f".into())
        );
        assert_eq!(
            error("void f(fixed v[1]) {\n}\nint w;\nf(w);"),
            SemanticError::ReferenceTypeMismatch
        );
        assert_eq!(error("nothing(1);"), SemanticError::UnknownFunction("nothing".into()));
        assert_eq!(
            error("void f() {\n}\nint x;\nx = f();"),
            SemanticError::VoidValue
        );
    }

    #[test]
    fn expression_errors() {
        assert_eq!(error("int a[2];\nint x;\nx = a + 1;"), SemanticError::ArrayInExpression);
        assert_eq!(error("int a[2, 2];\na[1, 1, 1];"), SemanticError::TooManyIndices);
        assert_eq!(error("3 = 4;"), SemanticError::InvalidOperand);
    }
}
