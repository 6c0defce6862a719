//! Name resolution and storage allocation.
//!
//! Every variable gets an address: absolute for globals and event handler
//! locals, frame-relative for function locals and parameters. Constants are
//! substituted, labels are made unique per scope and declarations with an
//! initial value are split into a declaration and an assignment.
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::{optimize, types, TreeContext};
use crate::ast::*;
use crate::error::{CompileError, CompileRes, SemanticError, Span};

/// Functions of the program by name.
pub type Functions = HashMap<String, Rc<FunctionSignature>>;

pub struct Allocation {
    pub units: Vec<Unit>,
    pub module_size: usize,
    pub functions: Functions,
}

pub fn allocate(units: Vec<Unit>, ctx: &TreeContext) -> CompileRes<Allocation> {
    let mut allocator = Allocator::new(ctx);
    let units = units
        .into_iter()
        .map(|unit| allocator.unit(unit))
        .collect::<CompileRes<Vec<_>>>()?;
    tracing::debug!(
        target: "tree::alloc",
        "{} words of variables, {} functions",
        allocator.module_top,
        allocator.functions.len()
    );
    Ok(Allocation {
        units,
        module_size: allocator.module_top,
        functions: allocator.functions,
    })
}

enum Entry {
    Var(Storage),
    Const(i16),
}

struct Scope {
    id: usize,
    names: HashMap<String, Entry>,
    labels: HashSet<String>,
}

#[derive(Default)]
struct FrameAlloc {
    top: usize,
    high: usize,
}

struct Allocator<'a> {
    ctx: &'a TreeContext<'a>,
    scopes: Vec<Scope>,
    next_scope: usize,
    /// First scope belonging to the unit being allocated
    unit_base: usize,
    module_top: usize,
    frame: Option<FrameAlloc>,
    /// Result type of the function being allocated
    ret: Option<Type>,
    functions: Functions,
    subs: HashSet<String>,
}

fn mangle(label: &str, scope: usize) -> String {
    format!("{}@{}", label, scope)
}

impl<'a> Allocator<'a> {
    fn new(ctx: &'a TreeContext<'a>) -> Self {
        let mut names = HashMap::new();
        let mut offset = 0;
        for var in &ctx.node.variables {
            let dims = if var.size > 1 { vec![var.size] } else { Vec::new() };
            names.insert(
                var.name.clone(),
                Entry::Var(Storage {
                    offset,
                    dims,
                    ty: Type::Number,
                    mode: Addressing::Absolute,
                }),
            );
            offset += var.size;
        }
        Self {
            ctx,
            scopes: vec![Scope {
                id: 0,
                names,
                labels: HashSet::new(),
            }],
            next_scope: 1,
            unit_base: 0,
            module_top: ctx.node.variables_size(),
            frame: None,
            ret: None,
            functions: HashMap::new(),
            subs: HashSet::new(),
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(Scope {
            id: self.next_scope,
            names: HashMap::new(),
            labels: HashSet::new(),
        });
        self.next_scope += 1;
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn current(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn lookup(&self, name: &str) -> Option<&Entry> {
        self.scopes.iter().rev().find_map(|s| s.names.get(name))
    }

    fn declare(&mut self, name: &str, entry: Entry, span: Span) -> CompileRes<()> {
        let scope = self.current();
        if scope.names.contains_key(name) {
            return Err(CompileError::semantic(
                SemanticError::DuplicateVariable(name.to_string()),
                span,
            ));
        }
        scope.names.insert(name.to_string(), entry);
        Ok(())
    }

    fn unit(&mut self, unit: Unit) -> CompileRes<Unit> {
        let Unit {
            kind, span, body, ..
        } = unit;
        let scoped = self.ctx.language().block_scoping();
        match kind {
            UnitKind::Function { decl, .. } => {
                if self.functions.contains_key(&decl.name) {
                    return Err(CompileError::semantic(
                        SemanticError::DuplicateDefinition(decl.name),
                        span,
                    ));
                }
                self.push_scope();
                self.unit_base = self.scopes.len() - 1;
                self.frame = Some(FrameAlloc::default());
                self.ret = Some(decl.ret);
                let params = decl
                    .params
                    .iter()
                    .map(|p| self.param(p))
                    .collect::<CompileRes<Vec<_>>>()?;
                let signature = Rc::new(FunctionSignature {
                    name: decl.name.clone(),
                    ret: decl.ret,
                    params,
                });
                self.functions
                    .insert(decl.name.clone(), Rc::clone(&signature));
                let body = self.statements(body)?;
                self.pop_scope();
                self.ret = None;
                let frame_size = self.frame.take().map_or(0, |f| f.high);
                Ok(Unit {
                    kind: UnitKind::Function {
                        decl,
                        signature: Some(signature),
                    },
                    span,
                    body,
                    frame_size,
                })
            }
            kind => {
                if let UnitKind::Sub(name) = &kind {
                    if !self.subs.insert(name.clone()) {
                        return Err(CompileError::semantic(
                            SemanticError::DuplicateDefinition(name.clone()),
                            span,
                        ));
                    }
                }
                // event handlers get their own scope; the init code is global
                let own_scope = scoped && !matches!(kind, UnitKind::Init);
                if own_scope {
                    self.push_scope();
                }
                self.unit_base = self.scopes.len() - 1;
                let body = self.statements(body)?;
                if own_scope {
                    self.pop_scope();
                }
                Ok(Unit {
                    kind,
                    span,
                    body,
                    frame_size: 0,
                })
            }
        }
    }

    fn param(&mut self, param: &ParamDecl) -> CompileRes<Param> {
        let dims = param
            .dims
            .iter()
            .map(|d| self.dimension(d.clone(), "argument dimension"))
            .collect::<CompileRes<Vec<_>>>()?;
        let offset = self.alloc_frame(1);
        let mode = if param.by_ref {
            Addressing::Reference
        } else {
            Addressing::Frame
        };
        self.declare(
            &param.name,
            Entry::Var(Storage {
                offset,
                dims: dims.clone(),
                ty: param.ty,
                mode,
            }),
            param.span,
        )?;
        Ok(Param {
            name: param.name.clone(),
            ty: param.ty,
            dims,
            by_ref: param.by_ref,
            offset,
        })
    }

    fn alloc_frame(&mut self, size: usize) -> usize {
        match &mut self.frame {
            Some(frame) => {
                let offset = frame.top;
                frame.top += size;
                frame.high = frame.high.max(frame.top);
                offset
            }
            None => 0,
        }
    }

    fn alloc(&mut self, size: usize, span: Span) -> CompileRes<(usize, Addressing)> {
        if self.frame.is_some() {
            return Ok((self.alloc_frame(size), Addressing::Frame));
        }
        let offset = self.module_top;
        self.module_top += size;
        if self.module_top > self.ctx.node.return_value_offset() {
            return Err(CompileError::semantic(SemanticError::OutOfMemory, span));
        }
        Ok((offset, Addressing::Absolute))
    }

    /// Statements of a block that opens a new scope.
    fn block(&mut self, body: Vec<Stmt>) -> CompileRes<Vec<Stmt>> {
        let scoped = self.ctx.language().block_scoping();
        if scoped {
            self.push_scope();
        }
        // frame space of block locals is reused after the block
        let frame_top = self.frame.as_ref().map(|f| f.top);
        let body = self.statements(body);
        if let (Some(frame), Some(top)) = (&mut self.frame, frame_top) {
            frame.top = top;
        }
        if scoped {
            self.pop_scope();
        }
        body
    }

    fn statements(&mut self, body: Vec<Stmt>) -> CompileRes<Vec<Stmt>> {
        for stmt in &body {
            if let StmtKind::Label(name) = &stmt.kind {
                if !self.current().labels.insert(name.clone()) {
                    return Err(CompileError::semantic(
                        SemanticError::DuplicateLabel(name.clone()),
                        stmt.span,
                    ));
                }
            }
        }
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            out.extend(self.statement(stmt)?);
        }
        Ok(out)
    }

    fn label_name(&self, label: &str, span: Span) -> CompileRes<String> {
        self.scopes[self.unit_base..]
            .iter()
            .rev()
            .find(|s| s.labels.contains(label))
            .map(|s| mangle(label, s.id))
            .ok_or_else(|| {
                CompileError::semantic(SemanticError::UnknownLabel(label.to_string()), span)
            })
    }

    fn statement(&mut self, stmt: Stmt) -> CompileRes<Vec<Stmt>> {
        let span = stmt.span;
        let one = |kind| Ok(vec![Stmt::new(kind, span)]);
        match stmt.kind {
            StmtKind::VarDecl(decl) => self.var_decl(decl, span),
            StmtKind::ConstDecl { name, value } => {
                let value = self.dimension_value(value, "constant definition")?;
                self.declare(&name, Entry::Const(value), span)?;
                Ok(Vec::new())
            }
            StmtKind::Expr(e) => one(StmtKind::Expr(self.resolve(e)?)),
            StmtKind::If { arms, otherwise } => {
                let arms = arms
                    .into_iter()
                    .map(|arm| {
                        Ok(IfArm {
                            cond: self.resolve(arm.cond)?,
                            body: self.block(arm.body)?,
                            span: arm.span,
                        })
                    })
                    .collect::<CompileRes<Vec<_>>>()?;
                let otherwise = otherwise.map(|b| self.block(b)).transpose()?;
                one(StmtKind::If { arms, otherwise })
            }
            StmtKind::When { cond, body } => one(StmtKind::When {
                cond: self.resolve(cond)?,
                body: self.block(body)?,
            }),
            StmtKind::While { label, cond, body } => one(StmtKind::While {
                label,
                cond: cond.map(|c| self.resolve(c)).transpose()?,
                body: self.block(body)?,
            }),
            StmtKind::DoWhile { label, body, cond } => one(StmtKind::DoWhile {
                label,
                body: self.block(body)?,
                cond: self.resolve(cond)?,
            }),
            StmtKind::RangeFor {
                label,
                var,
                from,
                to,
                step,
                body,
            } => one(StmtKind::RangeFor {
                label,
                var: self.resolve(var)?,
                from: self.resolve(from)?,
                to: self.resolve(to)?,
                step: step.map(|s| self.resolve(s)).transpose()?,
                body: self.block(body)?,
            }),
            StmtKind::For {
                label,
                init,
                cond,
                step,
                body,
            } => {
                // the loop variable lives in its own scope around the body
                let scoped = self.ctx.language().block_scoping();
                if scoped {
                    self.push_scope();
                }
                let frame_top = self.frame.as_ref().map(|f| f.top);
                let mut resolved_init = Vec::new();
                for s in init {
                    resolved_init.extend(self.statement(s)?);
                }
                let stmt = StmtKind::For {
                    label,
                    init: resolved_init,
                    cond: cond.map(|c| self.resolve(c)).transpose()?,
                    step: step.map(|s| self.resolve(s)).transpose()?,
                    body: self.block(body)?,
                };
                if let (Some(frame), Some(top)) = (&mut self.frame, frame_top) {
                    frame.top = top;
                }
                if scoped {
                    self.pop_scope();
                }
                one(stmt)
            }
            StmtKind::Switch {
                label,
                subject,
                body,
            } => one(StmtKind::Switch {
                label,
                subject: self.resolve(subject)?,
                body: self.block(body)?,
            }),
            StmtKind::Case(value) => one(StmtKind::Case(self.resolve(value)?)),
            StmtKind::Block(body) => one(StmtKind::Block(self.block(body)?)),
            StmtKind::Label(name) => {
                let mangled = self.label_name(&name, span)?;
                one(StmtKind::Label(mangled))
            }
            StmtKind::Goto(name) => {
                let mangled = self.label_name(&name, span)?;
                one(StmtKind::Goto(mangled))
            }
            StmtKind::NativeCall { name, args } => one(StmtKind::NativeCall {
                name,
                args: self.resolve_all(args)?,
            }),
            StmtKind::Emit { event, value } => one(StmtKind::Emit {
                event,
                value: value.map(|v| self.resolve(v)).transpose()?,
            }),
            StmtKind::Return(value) => {
                match (self.ret, &value) {
                    (None, Some(_)) => {
                        return Err(CompileError::semantic(
                            SemanticError::ReturnOutsideFunction,
                            span,
                        ))
                    }
                    (Some(Type::Void), Some(_)) => {
                        return Err(CompileError::semantic(
                            SemanticError::UnexpectedReturnValue,
                            span,
                        ))
                    }
                    (Some(ret), None) if ret != Type::Void => {
                        return Err(CompileError::semantic(
                            SemanticError::MissingReturnValue,
                            span,
                        ))
                    }
                    _ => {}
                }
                one(StmtKind::Return(value.map(|v| self.resolve(v)).transpose()?))
            }
            kind @ (StmtKind::Default
            | StmtKind::Break(_)
            | StmtKind::Continue(_)
            | StmtKind::CallSub(_)
            | StmtKind::Empty) => one(kind),
        }
    }

    fn var_decl(&mut self, decl: VarDecl, span: Span) -> CompileRes<Vec<Stmt>> {
        let VarDecl {
            name,
            ty,
            dims,
            init,
            ..
        } = decl;
        // the initial value sees the enclosing declaration of the same name
        let init = init.map(|e| self.resolve(e)).transpose()?;
        let mut sizes = Vec::with_capacity(dims.len());
        for dim in dims {
            match dim {
                Some(d) => sizes.push(self.dimension(d, "array size")?),
                None => match &init {
                    Some(value) => sizes.extend(self.value_dims(value)?),
                    None => {
                        return Err(CompileError::semantic(SemanticError::ArraySize, span))
                    }
                },
            }
        }
        let size = sizes.iter().product();
        let (offset, mode) = self.alloc(size, span)?;
        let storage = Storage {
            offset,
            dims: sizes,
            ty,
            mode,
        };
        self.declare(&name, Entry::Var(storage.clone()), span)?;
        let var = Variable {
            name: name.clone(),
            storage: Some(storage.clone()),
        };
        let target = Expr::new(ExprKind::Var(var), span)
            .typed(ty)
            .with_dims(storage.dims.clone());
        let mut out = vec![Stmt::new(
            StmtKind::VarDecl(VarDecl {
                name,
                ty,
                dims: Vec::new(),
                init: None,
                storage: Some(storage),
            }),
            span,
        )];
        if let Some(value) = init {
            let value_span = value.span;
            out.push(Stmt::new(
                StmtKind::Expr(Expr::op(Op::Assign, vec![target, value], value_span)),
                span,
            ));
        }
        Ok(out)
    }

    /// Dimensions of the initial value of a sizeless array.
    fn value_dims(&self, value: &Expr) -> CompileRes<Vec<usize>> {
        let typed = types::resolve_expr(value.clone(), &self.functions, self.ctx)?;
        Ok(if typed.dims.is_empty() {
            vec![1]
        } else {
            typed.dims
        })
    }

    fn dimension(&self, expr: Expr, what: &'static str) -> CompileRes<usize> {
        let span = expr.span;
        match self.dimension_value(expr, what)? {
            n if n > 0 => Ok(n as usize),
            _ => Err(CompileError::semantic(SemanticError::ArraySize, span)),
        }
    }

    /// Value of an expression that must fold to an integer constant.
    fn dimension_value(&self, expr: Expr, what: &'static str) -> CompileRes<i16> {
        let span = expr.span;
        let resolved = self.resolve(expr)?;
        let typed = types::resolve_expr(resolved, &self.functions, self.ctx)?;
        let folded = optimize::optimize_expr(typed)?;
        match (folded.ty, folded.as_number()) {
            (Type::Number | Type::Boolean, Some(n)) => Ok(n),
            _ => Err(CompileError::semantic(SemanticError::NonConstant(what), span)),
        }
    }

    fn resolve_all(&self, exprs: Vec<Expr>) -> CompileRes<Vec<Expr>> {
        exprs.into_iter().map(|e| self.resolve(e)).collect()
    }

    fn storage_of(&self, var: &Variable, span: Span) -> CompileRes<Result<Storage, i16>> {
        match self.lookup(&var.name) {
            Some(Entry::Var(storage)) => Ok(Ok(storage.clone())),
            Some(Entry::Const(n)) => Ok(Err(*n)),
            None => Err(CompileError::semantic(
                SemanticError::UnknownVariable(var.name.clone()),
                span,
            )),
        }
    }

    /// Binds every variable of `expr` to its storage.
    fn resolve(&self, expr: Expr) -> CompileRes<Expr> {
        let Expr {
            kind,
            span,
            ty,
            dims,
        } = expr;
        let kind = match kind {
            ExprKind::Var(var) => {
                return match self.storage_of(&var, span)? {
                    Ok(storage) => {
                        let (ty, dims) = (storage.ty, storage.dims.clone());
                        Ok(Expr::new(
                            ExprKind::Var(Variable {
                                name: var.name,
                                storage: Some(storage),
                            }),
                            span,
                        )
                        .typed(ty)
                        .with_dims(dims))
                    }
                    Err(n) => Ok(Expr::number(n, span)),
                };
            }
            ExprKind::Index { var, indices } => match self.storage_of(&var, span)? {
                Ok(storage) => ExprKind::Index {
                    var: Variable {
                        name: var.name,
                        storage: Some(storage),
                    },
                    indices: self.resolve_all(indices)?,
                },
                Err(_) => {
                    return Err(CompileError::semantic(SemanticError::InvalidOperand, span))
                }
            },
            ExprKind::Array(items) => ExprKind::Array(self.resolve_all(items)?),
            ExprKind::Op { op, args } => ExprKind::Op {
                op,
                args: self.resolve_all(args)?,
            },
            ExprKind::Call { name, args, callee } => ExprKind::Call {
                name,
                args: self.resolve_all(args)?,
                callee,
            },
            other => other,
        };
        Ok(Expr {
            kind,
            span,
            ty,
            dims,
        })
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

    fn allocated(src: &str, language: Language) -> CompileRes<Allocation> {
        let meta = SourceMetadata::new(src);
        let options = CompilerOptions::new(language);
        let node = NodeDescription::thymio();
        let ctx = TreeContext {
            node: &node,
            options: &options,
        };
        let lines = Parser::new(&meta, &options)
            .and_then(|mut p| p.parse_lines())
            .map_err(|e| e.map_kind(CompileErrorKind::from))?;
        allocate(super::super::build_units(lines, language)?, &ctx)
    }

    fn semantic(res: CompileRes<Allocation>) -> SemanticError {
        match res.map(|_| ()).unwrap_err().kind {
            CompileErrorKind::Semantic(kind) => kind,
            other => panic!("not a semantic error: {:?}", other),
        }
    }

    fn storage_of_decl(stmt: &Stmt) -> Storage {
        match &stmt.kind {
            StmtKind::VarDecl(VarDecl {
                storage: Some(s), ..
            }) => s.clone(),
            other => panic!("not a declaration: {:?}", other),
        }
    }

    #[test]
    fn globals_follow_node_variables() {
        let base = NodeDescription::thymio().variables_size();
        let alloc = allocated("int a;\nint b[3];\nint c;", Language::L2).unwrap();
        let body = &alloc.units[0].body;
        assert_eq!(storage_of_decl(&body[0]).offset, base);
        assert_eq!(storage_of_decl(&body[1]).offset, base + 1);
        assert_eq!(storage_of_decl(&body[2]).offset, base + 4);
        assert_eq!(alloc.module_size, base + 5);
    }

    #[test]
    fn sizes_come_from_constants_and_initial_values() {
        let alloc = allocated("const n = 2 * 3;\nint a[n];\nint b[] = [1, 2; 3, 4];", Language::L2)
            .unwrap();
        let body = &alloc.units[0].body;
        assert_eq!(storage_of_decl(&body[0]).dims, vec![6]);
        assert_eq!(storage_of_decl(&body[1]).dims, vec![2, 2]);
        assert!(matches!(&body[2].kind, StmtKind::Expr(e) if e.op_kind() == Some(Op::Assign)));
    }

    #[test]
    fn function_locals_live_in_the_frame() {
        let alloc = allocated(
            "int f(int x, int v[2]) {\nint y;\n{\nint z;\n}\n{\nint w;\n}\nreturn x;\n}",
            Language::L2,
        )
        .unwrap();
        let unit = &alloc.units[1];
        assert_eq!(unit.frame_size, 4);
        let sig = alloc.functions.get("f").unwrap();
        assert_eq!(sig.params[0].offset, 0);
        assert!(sig.params[1].by_ref);
        assert_eq!(storage_of_decl(&unit.body[0]).mode, Addressing::Frame);
        assert_eq!(storage_of_decl(&unit.body[0]).offset, 2);
    }

    #[test]
    fn block_scoping() {
        let err = allocated("{\nint a;\n}\na = 1;", Language::L2);
        assert_eq!(semantic(err), SemanticError::UnknownVariable("a".into()));
        // the simple language only has globals
        assert!(allocated("if 1 then\nvar a\nend\na = 1", Language::Simple).is_ok());
        let err = allocated("int a;\nint a;", Language::L2);
        assert_eq!(semantic(err), SemanticError::DuplicateVariable("a".into()));
    }

    #[test]
    fn labels() {
        let alloc = allocated("l: ;\ngoto l;", Language::L2).unwrap();
        assert!(matches!(&alloc.units[0].body[2].kind, StmtKind::Goto(l) if l == "l@0"));
        let err = allocated("goto nowhere;", Language::L2);
        assert_eq!(semantic(err), SemanticError::UnknownLabel("nowhere".into()));
        let err = allocated("l: ;\nl: ;", Language::L2);
        assert_eq!(semantic(err), SemanticError::DuplicateLabel("l".into()));
    }

    #[test]
    fn return_checks() {
        let err = allocated("return 1;", Language::L2);
        assert_eq!(semantic(err), SemanticError::ReturnOutsideFunction);
        let err = allocated("void f() {\nreturn 1;\n}", Language::L2);
        assert_eq!(semantic(err), SemanticError::UnexpectedReturnValue);
        let err = allocated("int f() {\nreturn;\n}", Language::L2);
        assert_eq!(semantic(err), SemanticError::MissingReturnValue);
    }

    #[test]
    fn non_constant_sizes() {
        let err = allocated("int n;\nint a[n];", Language::L2);
        assert_eq!(semantic(err), SemanticError::NonConstant("array size"));
        let err = allocated("int a[0];", Language::L2);
        assert_eq!(semantic(err), SemanticError::ArraySize);
    }

    #[test]
    fn running_out_of_memory() {
        let err = allocated("int a[2000];", Language::L2);
        assert_eq!(semantic(err), SemanticError::OutOfMemory);
    }
}
