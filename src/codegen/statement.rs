use super::expr::{storage, ArgRef};
use super::{CodegenContext, Flow, FlowKind};
use crate::ast::*;
use crate::bytecode::{load, store, BinaryOp, Opcode};
use crate::error::{CompileError, CompileRes, InternalError, SemanticError, Span};

impl<'a> CodegenContext<'a> {
    pub(super) fn block(&mut self, block: &[Stmt]) -> CompileRes<()> {
        for stmt in block {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Stmt) -> CompileRes<()> {
        self.statement_code(stmt).map_err(|e| e.at(stmt.span))
    }

    fn statement_code(&mut self, stmt: &Stmt) -> CompileRes<()> {
        self.span = stmt.span;
        self.temps.reset();
        if !matches!(
            stmt.kind,
            StmtKind::Block(_)
                | StmtKind::Empty
                | StmtKind::VarDecl(_)
                | StmtKind::ConstDecl { .. }
                | StmtKind::Label(_)
        ) {
            self.source_map.push((stmt.span, self.buf.here()));
        }
        match &stmt.kind {
            StmtKind::VarDecl(_) | StmtKind::ConstDecl { .. } | StmtKind::Empty => Ok(()),
            // only meaningful directly inside a switch
            StmtKind::Case(_) | StmtKind::Default => Ok(()),
            StmtKind::Expr(e) => self.effect(e),
            StmtKind::If { arms, otherwise } => self.if_chain(arms, otherwise.as_deref()),
            StmtKind::When { cond, body } => {
                let skip = self.branch_if_false(cond, true)?;
                self.block(body)?;
                self.patch_here(skip)
            }
            StmtKind::While { label, cond, body } => {
                let start = self.buf.here();
                let exit = match cond {
                    Some(cond) => Some(self.branch_if_false(cond, false)?),
                    None => None,
                };
                self.open_flow(label, false);
                self.block(body)?;
                self.buf.jump_to(start)?;
                if let Some(exit) = exit {
                    self.patch_here(exit)?;
                }
                self.close_flow(start)
            }
            StmtKind::DoWhile { label, body, cond } => {
                let start = self.buf.here();
                self.open_flow(label, false);
                self.block(body)?;
                let next = self.buf.here();
                let exit = self.branch_if_false(cond, false)?;
                self.buf.jump_to(start)?;
                self.patch_here(exit)?;
                self.close_flow(next)
            }
            StmtKind::RangeFor {
                label,
                var,
                from,
                to,
                step,
                body,
            } => {
                let step = step.as_ref().and_then(Expr::as_number).unwrap_or(1);
                let counter = self.place(var, false)?;
                self.expr(from)?;
                self.store_place(&counter)?;
                let start = self.buf.here();
                self.load_place(&counter)?;
                self.expr(to)?;
                let cmp = if step >= 0 {
                    BinaryOp::Le
                } else {
                    BinaryOp::Ge
                };
                let exit = self.buf.branch_placeholder(cmp, false);
                self.open_flow(label, false);
                self.block(body)?;
                let next = self.buf.here();
                self.load_place(&counter)?;
                self.push(step);
                self.buf.push(BinaryOp::Add.word());
                self.store_place(&counter)?;
                self.buf.jump_to(start)?;
                self.patch_here(exit)?;
                self.close_flow(next)
            }
            StmtKind::For {
                label,
                init,
                cond,
                step,
                body,
            } => {
                self.block(init)?;
                let start = self.buf.here();
                let exit = match cond {
                    Some(cond) => Some(self.branch_if_false(cond, false)?),
                    None => None,
                };
                self.open_flow(label, false);
                self.block(body)?;
                let next = self.buf.here();
                if let Some(step) = step {
                    self.temps.reset();
                    self.effect(step)?;
                }
                self.buf.jump_to(start)?;
                if let Some(exit) = exit {
                    self.patch_here(exit)?;
                }
                self.close_flow(next)
            }
            StmtKind::Switch {
                label,
                subject,
                body,
            } => self.switch(label, subject, body),
            StmtKind::Block(body) => self.block(body),
            StmtKind::Label(name) => {
                self.labels.insert(name.clone(), self.buf.here());
                Ok(())
            }
            StmtKind::Goto(name) => {
                let at = self.buf.jump_placeholder();
                self.gotos.push((at, name.clone(), stmt.span));
                Ok(())
            }
            StmtKind::Break(label) => self.exit_flow(FlowKind::Break, label.as_deref(), stmt.span),
            StmtKind::Continue(label) => {
                self.exit_flow(FlowKind::Continue, label.as_deref(), stmt.span)
            }
            StmtKind::NativeCall { name, args } => self.native_statement(name, args, stmt.span),
            StmtKind::CallSub(name) => {
                self.call(name, stmt.span);
                Ok(())
            }
            StmtKind::Emit { event, value } => self.emit(event, value.as_ref(), stmt.span),
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value)?;
                    let slot = self.return_slot();
                    self.buf.push(store(slot));
                }
                self.buf.push(self.exit);
                Ok(())
            }
        }
    }

    fn if_chain(&mut self, arms: &[IfArm], otherwise: Option<&[Stmt]>) -> CompileRes<()> {
        let mut ends = Vec::new();
        for (i, arm) in arms.iter().enumerate() {
            let skip = self.branch_if_false(&arm.cond, false)?;
            self.block(&arm.body)?;
            if i + 1 < arms.len() || otherwise.is_some() {
                ends.push(self.buf.jump_placeholder());
            }
            self.patch_here(skip)?;
        }
        if let Some(body) = otherwise {
            self.block(body)?;
        }
        for end in ends {
            self.patch_here(end)?;
        }
        Ok(())
    }

    /// The subject is kept in the return slot while the cases are tested
    /// in order. Execution then falls through from the matching case.
    fn switch(&mut self, label: &Option<String>, subject: &Expr, body: &[Stmt]) -> CompileRes<()> {
        let slot = self.return_slot();
        self.expr(subject)?;
        self.buf.push(store(slot));
        let mut tests = Vec::new();
        for stmt in body {
            if let StmtKind::Case(value) = &stmt.kind {
                self.buf.push(load(slot));
                self.expr(value)?;
                tests.push(self.buf.branch_placeholder(BinaryOp::Ne, false));
            }
        }
        let to_default = self.buf.jump_placeholder();
        self.open_flow(label, true);
        let mut tests = tests.into_iter();
        let mut default = None;
        for stmt in body {
            match &stmt.kind {
                StmtKind::Case(_) => {
                    if let Some(test) = tests.next() {
                        self.patch_here(test)?;
                    }
                }
                StmtKind::Default => default = Some(self.buf.here()),
                _ => self.statement(stmt)?,
            }
        }
        let end = self.buf.here();
        self.buf.patch_jump(to_default, default.unwrap_or(end))?;
        self.close_flow(end)
    }

    fn open_flow(&mut self, label: &Option<String>, is_switch: bool) {
        self.flows.push(Flow {
            label: label.clone(),
            is_switch,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
    }

    /// Sends pending breaks here and pending continues to `next`.
    fn close_flow(&mut self, next: usize) -> CompileRes<()> {
        let flow = self
            .flows
            .pop()
            .ok_or_else(|| CompileError::internal(InternalError::UnresolvedJumps))?;
        let end = self.buf.here();
        for at in flow.breaks {
            self.buf.patch_jump(at, end)?;
        }
        for at in flow.continues {
            self.buf.patch_jump(at, next)?;
        }
        Ok(())
    }

    fn exit_flow(&mut self, kind: FlowKind, label: Option<&str>, span: Span) -> CompileRes<()> {
        let keyword = match kind {
            FlowKind::Break => "break",
            FlowKind::Continue => "continue",
        };
        let at = self.buf.jump_placeholder();
        let target = self.flows.iter_mut().rev().find(|f| match label {
            Some(label) => f.label.as_deref() == Some(label),
            None => kind == FlowKind::Break || !f.is_switch,
        });
        let unknown = |label: &str| {
            CompileError::semantic(
                SemanticError::UnknownLoopLabel {
                    keyword,
                    label: label.to_string(),
                },
                span,
            )
        };
        match (target, label) {
            (Some(flow), Some(label)) if kind == FlowKind::Continue && flow.is_switch => {
                Err(unknown(label))
            }
            (Some(flow), _) => {
                match kind {
                    FlowKind::Break => flow.breaks.push(at),
                    FlowKind::Continue => flow.continues.push(at),
                }
                Ok(())
            }
            (None, Some(label)) => Err(unknown(label)),
            (None, None) => Err(CompileError::semantic(
                SemanticError::OutsideLoop(keyword),
                span,
            )),
        }
    }

    /// Variables are passed by address; any other value is first copied to
    /// temporaries, once every value has been computed.
    fn native_statement(&mut self, name: &str, args: &[Expr], span: Span) -> CompileRes<()> {
        let mut refs = Vec::with_capacity(args.len());
        let mut values = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            if arg.is_lvalue() {
                refs.push(Some(ArgRef::Place(self.place(arg, false)?)));
            } else {
                let n = self.push_values(arg)?;
                values.push((i, n));
                refs.push(None);
            }
        }
        for &(i, n) in values.iter().rev() {
            let base = self.pop_to_temps(n)?;
            refs[i] = Some(ArgRef::Address(base));
        }
        let refs = refs
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CompileError::internal(InternalError::UnresolvedFixup))?;
        let sizes = args.iter().map(Expr::size).collect::<Vec<_>>();
        self.native_call(name, &refs, &sizes, span)
    }

    fn emit(&mut self, event: &str, value: Option<&Expr>, span: Span) -> CompileRes<()> {
        let options = self.options;
        let (id, decl) = options.user_event(event).ok_or_else(|| {
            CompileError::semantic(SemanticError::UnknownUserEvent(event.to_string()), span)
        })?;
        let size = value.map_or(0, Expr::size);
        if size != decl.size {
            return Err(CompileError::semantic(SemanticError::EmitSize, span));
        }
        let addr = match value {
            None => 0,
            Some(value) => match &value.kind {
                ExprKind::Var(var) if storage(var)?.mode == Addressing::Absolute => {
                    storage(var)?.offset
                }
                _ => {
                    let n = self.push_values(value)?;
                    self.pop_to_temps(n)?
                }
            },
        };
        let addr = self.address(addr)?;
        self.buf
            .extend([Opcode::Emit.word(id), addr, size as u16]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::bytecode::*;
    use crate::codegen::{generate, Entry, UnitCode};
    use crate::config::CompilerOptions;
    use crate::error::{CompileErrorKind, CompileRes, SourceMetadata};
    use crate::grammar::Parser;
    use crate::language::Language;
    use crate::target::NodeDescription;
    use crate::tree::build_program;

    fn compile_with(src: &str, options: &CompilerOptions) -> CompileRes<Vec<UnitCode>> {
        let node = NodeDescription::thymio();
        let meta = SourceMetadata::new(src);
        let lines = Parser::new(&meta, options)
            .and_then(|mut p| p.parse_lines())
            .map_err(|e| e.map_kind(CompileErrorKind::from))?;
        let program = build_program(lines, &node, options)?;
        generate(&program, &node, options)
    }

    fn compile(src: &str) -> Vec<UnitCode> {
        compile_with(src, &CompilerOptions::new(Language::L2)).unwrap()
    }

    fn init(src: &str) -> Vec<u16> {
        let units = compile(src);
        assert_eq!(units[0].entry, Entry::Init);
        units[0].code.clone()
    }

    const A: u16 = 128;

    #[test]
    fn constant_initializer_is_a_single_push() {
        assert_eq!(init("int a = 3 + 4 * 2;"), vec![0x100b, store(A), STOP]);
    }

    #[test]
    fn fixed_literals_are_scaled() {
        assert_eq!(init("fixed x = 1.5;"), vec![0x1000 | 150, store(A), STOP]);
        assert_eq!(init("fixed x = 3;"), vec![0x1000 | 300, store(A), STOP]);
        // halfway values round towards positive infinity
        assert_eq!(init("fixed x = -0.005;"), vec![0x1000, store(A), STOP]);
        assert_eq!(init("fixed x = 0.005;"), vec![0x1001, store(A), STOP]);
        let code = init("fixed x = 3; int i = x;");
        assert_eq!(
            &code[2..],
            &[load(A), 0x1000 | 100, BinaryOp::Div.word(), store(A + 1), STOP]
        );
    }

    #[test]
    fn while_loop_branches_out_when_false() {
        let code = init("int i = 0; while (i < 3) { i++; }");
        assert_eq!(
            code,
            vec![
                0x1000,
                store(A),
                load(A),
                0x1003,
                0xa000 | BinaryOp::Lt.code(),
                7,
                load(A),
                0x1001,
                BinaryOp::Add.word(),
                store(A),
                jump(-8),
                STOP,
            ]
        );
    }

    #[test]
    fn array_elements_use_checked_indirect_access() {
        let code = init("int a[3]; int i = 1; a[i] = 7;");
        assert_eq!(
            &code[2..],
            &[0x1007, load(A + 3), 0x6000 | A, 3, STOP]
        );
    }

    #[test]
    fn macros_call_natives_through_temporaries() {
        let code = init("int a = min(1, 2);");
        let t = 618 - 3;
        let id = NodeDescription::thymio().native("math.min").unwrap().0;
        assert_eq!(
            code,
            vec![
                0x1001,
                0x1002,
                store(t + 1),
                store(t),
                0x1001,
                0x1000 | (t + 1),
                0x1000 | t,
                0x1000 | (t + 2),
                0xc000 | id,
                load(t + 2),
                store(A),
                STOP,
            ]
        );
    }

    #[test]
    fn functions_return_through_the_return_slot() {
        let units = compile("int twice(int x) { return x * 2; } int y = twice(4);");
        let init = &units[0].code;
        assert_eq!(init[..3], [0x1004, store(A + 1), 0x1000 | (A + 1)]);
        assert_eq!(init[3], store(619));
        assert_eq!(units[0].calls[0].name, "twice");
        assert_eq!(init[init.len() - 3..], [load(618), store(A), STOP]);
        assert_eq!(units[1].entry, Entry::Callable("twice".into()));
        assert_eq!(units[1].code.last(), Some(&RET));
    }

    #[test]
    fn long_loop_body_is_a_user_error() {
        let body = "a = 1;\n".repeat(1100);
        let src = format!("int a; while (a < 1) {{\n{}}}", body);
        let err = compile_with(&src, &CompilerOptions::new(Language::L2)).unwrap_err();
        assert_eq!(err.kind.to_string(), "program too large");
        assert_eq!(err.span().map(|s| s.offset), Some(7));
    }

    #[test]
    fn flow_errors() {
        let options = CompilerOptions::new(Language::L2);
        let err = compile_with("break;", &options).unwrap_err();
        assert_eq!(err.to_string(), "break outside loop");
        let err = compile_with("while (1) { continue outer; }", &options).unwrap_err();
        assert_eq!(err.to_string(), "unknown continue label \"outer\"");
    }

    #[test]
    fn emit_checks_user_events() {
        let options = CompilerOptions::new(Language::L2).with_user_event("pos", 2);
        let units = compile_with("int p[2] = [1, 2]; emit pos p;", &options).unwrap();
        let code = &units[0].code;
        assert_eq!(code[code.len() - 4..], [Opcode::Emit.word(0), A, 2, STOP]);
        assert!(compile_with("emit pos;", &options).is_err());
        assert!(compile_with("emit nope;", &options).is_err());
    }
}
