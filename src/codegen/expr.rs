use std::collections::BTreeMap;
use std::rc::Rc;

use super::{CallFixup, CodegenContext};
use crate::ast::*;
use crate::bytecode::{
    load, load_indirect, push_number, store, store_indirect, to_s16, BinaryOp, Opcode, UnaryOp,
};
use crate::error::{CompileError, CompileRes, InternalError, SemanticError, Span};
use crate::macros::Macro;

/// Element of a variable being accessed.
#[derive(Debug, Clone, Copy)]
pub(super) enum Elem<'e> {
    Const(usize),
    /// Flat index computed by these expressions
    Indices(&'e [Expr]),
    /// Flat index saved in a temporary
    Temp(u16),
}

/// Resolved target of a load, a store or an address.
#[derive(Debug, Clone, Copy)]
pub(super) struct Place<'e> {
    pub storage: &'e Storage,
    pub elem: Elem<'e>,
}

/// How an argument of a native function is passed.
pub(super) enum ArgRef<'e> {
    Address(usize),
    Place(Place<'e>),
}

/// Input of a native called with values rather than variables.
#[derive(Clone, Copy)]
enum Operand<'e> {
    Expr(&'e Expr),
    Const(i16),
}

pub(super) fn storage(var: &Variable) -> CompileRes<&Storage> {
    var.storage
        .as_ref()
        .ok_or_else(|| CompileError::internal(InternalError::UnresolvedVariable(var.name.clone())))
}

fn operands<const N: usize>(op: Op, args: &[Expr]) -> CompileRes<&[Expr; N]> {
    args.try_into()
        .map_err(|_| CompileError::internal(InternalError::MalformedOperator(op.symbol())))
}

/// Evaluating it twice has no visible effect.
fn is_pure(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Number(_) | ExprKind::Fixed(_) | ExprKind::Var(_) => true,
        ExprKind::Index { indices, .. } => indices.iter().all(is_pure),
        ExprKind::Op { op, args } => !op.is_assignment() && args.iter().all(is_pure),
        _ => false,
    }
}

impl<'a> CodegenContext<'a> {
    pub(super) fn push(&mut self, n: i16) {
        self.buf.extend(push_number(n));
    }

    fn fixed(&self, f: f64) -> i16 {
        // halves round up, negative ones included
        to_s16((f * f64::from(self.options.factor) + 0.5).floor() as i32)
    }

    /// Pushes the value of `e`.
    pub(super) fn expr(&mut self, e: &Expr) -> CompileRes<()> {
        match &e.kind {
            ExprKind::Number(n) => self.push(*n),
            ExprKind::Fixed(f) => {
                let n = self.fixed(*f);
                self.push(n);
            }
            ExprKind::Var(var) => {
                let storage = storage(var)?;
                if storage.size() != 1 {
                    return Err(CompileError::semantic(SemanticError::ArrayInExpression, e.span));
                }
                self.load_place(&Place {
                    storage,
                    elem: Elem::Const(0),
                })?;
            }
            ExprKind::Index { .. } => {
                let place = self.place(e, false)?;
                self.load_place(&place)?;
            }
            ExprKind::Array(_) => {
                return Err(CompileError::semantic(SemanticError::ArrayInExpression, e.span))
            }
            ExprKind::Placeholder => {}
            ExprKind::Call { name, args, callee } => match callee {
                Some(Callee::Function(sig)) => self.call_function(sig, args, true, e.span)?,
                Some(Callee::Macro(m)) => self.call_macro(*m, args, true, e.span)?,
                None => {
                    return Err(CompileError::semantic(
                        SemanticError::UnknownFunction(name.clone()),
                        e.span,
                    ))
                }
            },
            ExprKind::Op { op, args } => self.operator(*op, args, e.span)?,
        }
        Ok(())
    }

    /// Generates `e` for its side effects only, leaving the stack as it was.
    pub(super) fn effect(&mut self, e: &Expr) -> CompileRes<()> {
        match &e.kind {
            ExprKind::Number(_) | ExprKind::Fixed(_) | ExprKind::Var(_) | ExprKind::Placeholder => {
                Ok(())
            }
            ExprKind::Op { op, args } if op.is_assignment() => self.assign(*op, args, false),
            ExprKind::Op {
                op: Op::Comma,
                args,
            } => {
                let [a, b] = operands(Op::Comma, args)?;
                self.effect(a)?;
                self.effect(b)
            }
            ExprKind::Call {
                callee: Some(Callee::Function(sig)),
                args,
                ..
            } => self.call_function(sig, args, false, e.span),
            ExprKind::Call {
                callee: Some(Callee::Macro(m)),
                args,
                ..
            } if m.native().is_some() => self.call_macro(*m, args, false, e.span),
            _ => {
                self.expr(e)?;
                let scratch = self.temp(1)?;
                let scratch = self.address(scratch)?;
                self.buf.push(store(scratch));
                Ok(())
            }
        }
    }

    fn operator(&mut self, op: Op, args: &[Expr], span: Span) -> CompileRes<()> {
        match op {
            Op::Binary(b) => {
                let [x, y] = operands(op, args)?;
                self.binary(b, x, y, span)
            }
            Op::LogicAnd | Op::LogicOr => {
                let [x, y] = operands(op, args)?;
                self.logic(op == Op::LogicAnd, x, y)
            }
            op if op.is_assignment() => self.assign(op, args, true),
            Op::Negate | Op::Abs | Op::BitNot => {
                let [x] = operands(op, args)?;
                self.expr(x)?;
                self.buf.push(
                    match op {
                        Op::Negate => UnaryOp::Neg,
                        Op::Abs => UnaryOp::Abs,
                        _ => UnaryOp::BitNot,
                    }
                    .word(),
                );
                Ok(())
            }
            Op::Not => {
                let [x] = operands(op, args)?;
                self.expr(x)?;
                self.push(0);
                self.buf.push(BinaryOp::Eq.word());
                Ok(())
            }
            Op::Cast(to) => {
                let [x] = operands(op, args)?;
                self.expr(x)?;
                self.convert(x.ty, to);
                Ok(())
            }
            Op::Conditional => {
                let [cond, branches] = operands(op, args)?;
                let [a, b] = match &branches.kind {
                    ExprKind::Op {
                        op: Op::ConditionalElse,
                        args,
                    } => operands(Op::ConditionalElse, args)?,
                    _ => {
                        return Err(CompileError::semantic(
                            SemanticError::MissingElse,
                            branches.span,
                        ))
                    }
                };
                let skip = self.branch_if_false(cond, false)?;
                self.expr(a)?;
                let end = self.buf.jump_placeholder();
                self.patch_here(skip)?;
                self.expr(b)?;
                self.patch_here(end)
            }
            Op::Comma => {
                let [a, b] = operands(op, args)?;
                self.effect(a)?;
                self.expr(b)
            }
            // `size`, `true` and a lone `:` never survive the tree passes
            _ => Err(CompileError::internal(InternalError::MalformedOperator(
                op.symbol(),
            ))),
        }
    }

    fn convert(&mut self, from: Type, to: Type) {
        let factor = self.options.factor;
        match (from, to) {
            (Type::Fixed, Type::Fixed) | (Type::Boolean, Type::Boolean) => {}
            (_, Type::Fixed) => {
                self.push(factor);
                self.buf.push(BinaryOp::Mult.word());
            }
            (Type::Fixed, Type::Number) => {
                self.push(factor);
                self.buf.push(BinaryOp::Div.word());
            }
            (_, Type::Boolean) => {
                self.push(0);
                self.buf.push(BinaryOp::Ne.word());
            }
            _ => {}
        }
    }

    fn binary(&mut self, b: BinaryOp, x: &Expr, y: &Expr, span: Span) -> CompileRes<()> {
        let factor = self.options.factor;
        let fixed = (x.ty == Type::Fixed, y.ty == Type::Fixed);
        match (b, fixed) {
            // scaled products and quotients go through the 32-bit native
            (BinaryOp::Mult, (true, true)) => self.call_with_values(
                "math.muldiv",
                &[Operand::Expr(x), Operand::Expr(y), Operand::Const(factor)],
                true,
                span,
            ),
            (BinaryOp::Div, (true, true)) => self.call_with_values(
                "math.muldiv",
                &[Operand::Expr(x), Operand::Const(factor), Operand::Expr(y)],
                true,
                span,
            ),
            (BinaryOp::Div, (false, true)) => self.call_with_values(
                "math.muldiv",
                &[
                    Operand::Expr(x),
                    Operand::Const(to_s16(i32::from(factor) * i32::from(factor))),
                    Operand::Expr(y),
                ],
                true,
                span,
            ),
            _ => {
                self.expr(x)?;
                self.expr(y)?;
                self.buf.push(b.word());
                Ok(())
            }
        }
    }

    /// `&&` and `||`, evaluating `y` only when `x` does not decide.
    fn logic(&mut self, and: bool, x: &Expr, y: &Expr) -> CompileRes<()> {
        let slot = self.return_slot();
        self.expr(x)?;
        self.buf.push(store(slot));
        self.buf.push(load(slot));
        self.push(0);
        let decide = self
            .buf
            .branch_placeholder(if and { BinaryOp::Eq } else { BinaryOp::Ne }, false);
        self.buf.push(load(slot));
        let end = self.buf.jump_placeholder();
        self.patch_here(decide)?;
        self.expr(y)?;
        self.patch_here(end)
    }

    /// Emits a branch taken when `cond` is false and returns its address.
    pub(super) fn branch_if_false(&mut self, cond: &Expr, when: bool) -> CompileRes<usize> {
        let op = match &cond.kind {
            ExprKind::Op {
                op: Op::Binary(b),
                args,
            } if b.is_comparison() => {
                let [x, y] = operands(Op::Binary(*b), args)?;
                self.expr(x)?;
                self.expr(y)?;
                *b
            }
            ExprKind::Op { op: Op::Not, args } => {
                let [x] = operands(Op::Not, args)?;
                self.expr(x)?;
                self.push(0);
                BinaryOp::Eq
            }
            _ => {
                self.expr(cond)?;
                self.push(0);
                BinaryOp::Ne
            }
        };
        Ok(self.buf.branch_placeholder(op, when))
    }

    pub(super) fn patch_here(&mut self, at: usize) -> CompileRes<()> {
        let here = self.buf.here();
        self.buf.patch(at, here)
    }

    fn assign(&mut self, op: Op, args: &[Expr], used: bool) -> CompileRes<()> {
        let [target, value] = operands(op, args)?;
        let place = self.place(target, used || op != Op::Assign)?;
        match op {
            Op::Assign => {
                self.expr(value)?;
                self.store_place(&place)?;
                if used {
                    self.load_place(&place)?;
                }
            }
            Op::PostIncrement | Op::PostDecrement => {
                if used {
                    self.load_place(&place)?;
                }
                self.load_place(&place)?;
                self.expr(value)?;
                self.store_place(&place)?;
            }
            _ => {
                self.load_place(&place)?;
                self.expr(value)?;
                self.store_place(&place)?;
                if used {
                    self.load_place(&place)?;
                }
            }
        }
        Ok(())
    }

    /// Resolves an lvalue. With `reused`, an index with side effects is
    /// computed once and kept in a temporary.
    pub(super) fn place<'e>(&mut self, target: &'e Expr, reused: bool) -> CompileRes<Place<'e>> {
        match &target.kind {
            ExprKind::Var(var) => Ok(Place {
                storage: storage(var)?,
                elem: Elem::Const(0),
            }),
            ExprKind::Index { var, indices } => {
                let storage = storage(var)?;
                let elem = match indices.as_slice() {
                    [i] if i.as_number().map_or(false, |n| n >= 0) => {
                        Elem::Const(i.as_number().unwrap_or(0) as usize)
                    }
                    _ if reused && !indices.iter().all(is_pure) => {
                        self.flat_index(storage, indices)?;
                        let t = self.temp(1)?;
                        let t = self.address(t)?;
                        self.buf.push(store(t));
                        Elem::Temp(t)
                    }
                    _ => Elem::Indices(indices),
                };
                Ok(Place { storage, elem })
            }
            _ => Err(CompileError::semantic(
                SemanticError::InvalidOperand,
                target.span,
            )),
        }
    }

    /// Pushes the column-major flat index of `indices`.
    fn flat_index(&mut self, storage: &Storage, indices: &[Expr]) -> CompileRes<()> {
        let mut stride = 1;
        for (k, index) in indices.iter().enumerate() {
            self.expr(index)?;
            if stride != 1 {
                self.push(to_s16(stride as i32));
                self.buf.push(BinaryOp::Mult.word());
            }
            if k > 0 {
                self.buf.push(BinaryOp::Add.word());
            }
            stride *= storage.dims.get(k).copied().unwrap_or(1);
        }
        Ok(())
    }

    fn elem_index(&mut self, storage: &Storage, elem: Elem) -> CompileRes<()> {
        match elem {
            Elem::Const(k) => self.push(to_s16(k as i32)),
            Elem::Indices(indices) => self.flat_index(storage, indices)?,
            Elem::Temp(t) => self.buf.push(load(t)),
        }
        Ok(())
    }

    /// Pushes the address held by a reference parameter, plus the element.
    fn referenced_address(&mut self, place: &Place) -> CompileRes<()> {
        let slot = self.address(place.storage.offset)?;
        self.buf.push(load(self.frame_pointer()));
        self.buf
            .extend(load_indirect(slot, self.max_var_size()));
        match place.elem {
            Elem::Const(0) => {}
            elem => {
                self.elem_index(place.storage, elem)?;
                self.buf.push(BinaryOp::Add.word());
            }
        }
        Ok(())
    }

    pub(super) fn load_place(&mut self, place: &Place) -> CompileRes<()> {
        let storage = place.storage;
        let max = self.max_var_size();
        match (storage.mode, place.elem) {
            (Addressing::Absolute, Elem::Const(k)) => {
                let addr = self.address(storage.offset + k)?;
                self.buf.push(load(addr));
            }
            (Addressing::Absolute, elem) => {
                let addr = self.address(storage.offset)?;
                self.elem_index(storage, elem)?;
                self.buf
                    .extend(load_indirect(addr, storage.size() as u16));
            }
            (Addressing::Frame, Elem::Const(k)) => {
                let addr = self.address(storage.offset + k)?;
                self.buf.push(load(self.frame_pointer()));
                self.buf.extend(load_indirect(addr, max));
            }
            (Addressing::Frame, elem) => {
                let addr = self.address(storage.offset)?;
                self.elem_index(storage, elem)?;
                self.buf.push(load(self.frame_pointer()));
                self.buf.push(BinaryOp::Add.word());
                self.buf.extend(load_indirect(addr, max));
            }
            (Addressing::Reference, _) => {
                self.referenced_address(place)?;
                self.buf.extend(load_indirect(0, max));
            }
        }
        Ok(())
    }

    /// Stores the value on top of the stack.
    pub(super) fn store_place(&mut self, place: &Place) -> CompileRes<()> {
        let storage = place.storage;
        let max = self.max_var_size();
        match (storage.mode, place.elem) {
            (Addressing::Absolute, Elem::Const(k)) => {
                let addr = self.address(storage.offset + k)?;
                self.buf.push(store(addr));
            }
            (Addressing::Absolute, elem) => {
                let addr = self.address(storage.offset)?;
                self.elem_index(storage, elem)?;
                self.buf
                    .extend(store_indirect(addr, storage.size() as u16));
            }
            (Addressing::Frame, Elem::Const(k)) => {
                let addr = self.address(storage.offset + k)?;
                self.buf.push(load(self.frame_pointer()));
                self.buf.extend(store_indirect(addr, max));
            }
            (Addressing::Frame, elem) => {
                let addr = self.address(storage.offset)?;
                self.elem_index(storage, elem)?;
                self.buf.push(load(self.frame_pointer()));
                self.buf.push(BinaryOp::Add.word());
                self.buf.extend(store_indirect(addr, max));
            }
            (Addressing::Reference, _) => {
                self.referenced_address(place)?;
                self.buf.extend(store_indirect(0, max));
            }
        }
        Ok(())
    }

    /// Pushes the absolute address of a variable element.
    pub(super) fn push_address(&mut self, place: &Place) -> CompileRes<()> {
        let storage = place.storage;
        match (storage.mode, place.elem) {
            (Addressing::Absolute, Elem::Const(k)) => {
                self.push(to_s16((storage.offset + k) as i32));
            }
            (Addressing::Absolute, elem) => {
                self.push(to_s16(storage.offset as i32));
                self.elem_index(storage, elem)?;
                self.buf.push(BinaryOp::Add.word());
            }
            (Addressing::Frame, elem) => {
                self.buf.push(load(self.frame_pointer()));
                self.push(to_s16(storage.offset as i32));
                self.buf.push(BinaryOp::Add.word());
                if !matches!(elem, Elem::Const(0)) {
                    self.elem_index(storage, elem)?;
                    self.buf.push(BinaryOp::Add.word());
                }
            }
            (Addressing::Reference, _) => self.referenced_address(place)?,
        }
        Ok(())
    }

    /// Pushes every word of a value and returns how many there are.
    pub(super) fn push_values(&mut self, value: &Expr) -> CompileRes<usize> {
        match &value.kind {
            ExprKind::Array(items) => {
                for item in items {
                    self.expr(item)?;
                }
                Ok(items.len())
            }
            ExprKind::Var(var) if value.size() != 1 => {
                let storage = storage(var)?;
                for k in 0..storage.size() {
                    self.load_place(&Place {
                        storage,
                        elem: Elem::Const(k),
                    })?;
                }
                Ok(storage.size())
            }
            _ => {
                self.expr(value)?;
                Ok(1)
            }
        }
    }

    /// Pops `n` words into fresh temporaries and returns the first address.
    pub(super) fn pop_to_temps(&mut self, n: usize) -> CompileRes<usize> {
        let base = self.temp(n)?;
        for k in (0..n).rev() {
            let addr = self.address(base + k)?;
            self.buf.push(store(addr));
        }
        Ok(base)
    }

    pub(super) fn call(&mut self, name: &str, span: Span) {
        self.calls.push(CallFixup {
            at: self.buf.here(),
            name: name.to_string(),
            span,
        });
        self.buf.push(Opcode::SubCall.word(0));
    }

    /// Calls a function: arguments go to the callee frame, which starts
    /// past the caller's frame (or past the module variables at top level).
    fn call_function(
        &mut self,
        sig: &Rc<FunctionSignature>,
        args: &[Expr],
        used: bool,
        span: Span,
    ) -> CompileRes<()> {
        if args.len() != sig.params.len() {
            return Err(CompileError::semantic(
                SemanticError::WrongArgumentCount(sig.name.clone()),
                span,
            ));
        }
        for (arg, param) in args.iter().zip(&sig.params) {
            if param.by_ref {
                let place = self.place(arg, false)?;
                self.push_address(&place)?;
            } else {
                self.expr(arg)?;
            }
        }
        // temporaries of this statement are saved in a gap below the callee
        // frame, since the callee reuses the same slots
        let live = self.temps.live();
        let fp = self.frame_pointer();
        match self.function.as_ref().map(|(_, size)| *size) {
            Some(frame_size) => {
                let max = self.max_var_size();
                let callee = frame_size + live.len();
                for param in sig.params.iter().rev() {
                    let slot = self.address(callee + param.offset)?;
                    self.buf.push(load(fp));
                    self.buf.extend(store_indirect(slot, max));
                }
                for (k, temp) in live.clone().enumerate() {
                    let (temp, slot) = (self.address(temp)?, self.address(frame_size + k)?);
                    self.buf.push(load(temp));
                    self.buf.push(load(fp));
                    self.buf.extend(store_indirect(slot, max));
                }
                self.buf.push(load(fp));
                self.push(to_s16(callee as i32));
                self.buf.push(BinaryOp::Add.word());
                self.buf.push(store(fp));
                self.call(&sig.name, span);
                self.buf.push(load(fp));
                self.push(to_s16(callee as i32));
                self.buf.push(BinaryOp::Sub.word());
                self.buf.push(store(fp));
                for (k, temp) in live.enumerate() {
                    let (temp, slot) = (self.address(temp)?, self.address(frame_size + k)?);
                    self.buf.push(load(fp));
                    self.buf.extend(load_indirect(slot, max));
                    self.buf.push(store(temp));
                }
            }
            None => {
                let callee = self.module_size + live.len();
                for param in sig.params.iter().rev() {
                    let slot = self.address(callee + param.offset)?;
                    self.buf.push(store(slot));
                }
                for (k, temp) in live.clone().enumerate() {
                    let (temp, slot) = (self.address(temp)?, self.address(self.module_size + k)?);
                    self.buf.push(load(temp));
                    self.buf.push(store(slot));
                }
                self.push(to_s16(callee as i32));
                self.buf.push(store(fp));
                self.call(&sig.name, span);
                for (k, temp) in live.enumerate() {
                    let (temp, slot) = (self.address(temp)?, self.address(self.module_size + k)?);
                    self.buf.push(load(slot));
                    self.buf.push(store(temp));
                }
            }
        }
        if used {
            self.buf.push(load(self.return_slot()));
        }
        Ok(())
    }

    fn call_macro(&mut self, m: Macro, args: &[Expr], used: bool, span: Span) -> CompileRes<()> {
        match m.native() {
            Some(native) => {
                let operands = args.iter().map(Operand::Expr).collect::<Vec<_>>();
                self.call_with_values(native, &operands, used, span)
            }
            None => {
                let [x] = operands(Op::Abs, args)?;
                self.expr(x)?;
                self.buf.push(UnaryOp::Abs.word());
                if !used {
                    let scratch = self.temp(1)?;
                    let scratch = self.address(scratch)?;
                    self.buf.push(store(scratch));
                }
                Ok(())
            }
        }
    }

    /// Calls a native whose first argument receives the result and whose
    /// other arguments are the values of `operands`.
    fn call_with_values(
        &mut self,
        native: &str,
        operands: &[Operand],
        used: bool,
        span: Span,
    ) -> CompileRes<()> {
        for operand in operands {
            match *operand {
                Operand::Expr(e) => self.expr(e)?,
                Operand::Const(n) => self.push(n),
            }
        }
        let n = operands.len();
        let base = self.temp(n + 1)?;
        for k in (0..n).rev() {
            let addr = self.address(base + k)?;
            self.buf.push(store(addr));
        }
        let result = base + n;
        let refs = std::iter::once(ArgRef::Address(result))
            .chain((0..n).map(|k| ArgRef::Address(base + k)))
            .collect::<Vec<_>>();
        self.native_call(native, &refs, &vec![1; n + 1], span)?;
        if used {
            let result = self.address(result)?;
            self.buf.push(load(result));
        }
        Ok(())
    }

    /// Pushes the size words and argument addresses of a native call, then
    /// calls it. The VM pops the addresses first, in declaration order.
    pub(super) fn native_call(
        &mut self,
        name: &str,
        args: &[ArgRef],
        sizes: &[usize],
        span: Span,
    ) -> CompileRes<()> {
        let node = self.node;
        let (id, native) = node.native(name).ok_or_else(|| {
            CompileError::semantic(SemanticError::NativeNotFound(name.to_string()), span)
        })?;
        if native.args.len() != sizes.len() {
            return Err(CompileError::semantic(
                SemanticError::NativeArgumentCount(name.to_string()),
                span,
            ));
        }
        let mismatch =
            || CompileError::semantic(SemanticError::NativeArgumentSize(name.to_string()), span);
        let mut groups = BTreeMap::new();
        let mut free = Vec::new();
        for (&code, &size) in native.args.iter().zip(sizes) {
            match code {
                0 => free.push(size),
                code if code > 0 => {
                    if size != code as usize {
                        return Err(mismatch());
                    }
                }
                code => {
                    if *groups.entry(-code).or_insert(size) != size {
                        return Err(mismatch());
                    }
                }
            }
        }
        for &size in groups.values() {
            self.push(to_s16(size as i32));
        }
        for &size in free.iter().rev() {
            self.push(to_s16(size as i32));
        }
        for arg in args.iter().rev() {
            match arg {
                ArgRef::Address(addr) => self.push(to_s16(*addr as i32)),
                ArgRef::Place(place) => self.push_address(place)?,
            }
        }
        self.buf.push(Opcode::NativeCall.word(id));
        Ok(())
    }
}
