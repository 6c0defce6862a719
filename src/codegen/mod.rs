//! Bytecode generation for one code unit at a time.
//!
//! Jumps inside a unit are emitted with a zero offset and patched once the
//! target is known. Calls to other units are left as fixups for the linker.
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{FunctionSignature, Program, Unit, UnitKind};
use crate::bytecode::{conditional_branch, jump, BinaryOp, Opcode, RET, STOP};
use crate::config::CompilerOptions;
use crate::error::{CompileError, CompileRes, InternalError, SemanticError, Span};
use crate::language::Language;
use crate::target::NodeDescription;

mod expr;
mod statement;

/// A jump that cannot reach its target; the caller adds the position.
fn too_far() -> CompileError {
    CompileError::new(SemanticError::CodeTooLarge.into())
}

/// Word buffer of a unit under construction.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    words: Vec<u16>,
}

impl CodeBuffer {
    #[inline]
    pub fn push(&mut self, word: u16) {
        self.words.push(word);
    }
    pub fn extend(&mut self, words: impl IntoIterator<Item = u16>) {
        self.words.extend(words);
    }
    /// Address of the next word.
    #[inline]
    pub fn here(&self) -> usize {
        self.words.len()
    }
    pub fn release(self) -> Vec<u16> {
        self.words
    }

    /// Emits a jump to be patched later and returns its address.
    pub fn jump_placeholder(&mut self) -> usize {
        let at = self.here();
        self.push(jump(0));
        at
    }
    pub fn branch_placeholder(&mut self, op: BinaryOp, when: bool) -> usize {
        let at = self.here();
        self.extend(conditional_branch(op, when));
        at
    }
    pub fn jump_to(&mut self, target: usize) -> CompileRes<()> {
        let at = self.jump_placeholder();
        self.patch_jump(at, target)
    }

    pub fn patch_jump(&mut self, at: usize, target: usize) -> CompileRes<()> {
        let offset = target as i64 - at as i64;
        if !(-0x800..0x800).contains(&offset) {
            return Err(too_far());
        }
        self.words[at] = jump(offset as i16);
        Ok(())
    }
    pub fn patch_branch(&mut self, at: usize, target: usize) -> CompileRes<()> {
        let offset = target as i64 - at as i64;
        if !(i64::from(i16::MIN)..=i64::from(i16::MAX)).contains(&offset) {
            return Err(too_far());
        }
        self.words[at + 1] = offset as i16 as u16;
        Ok(())
    }
    /// Patches a jump or a conditional branch, whichever sits at `at`.
    pub fn patch(&mut self, at: usize, target: usize) -> CompileRes<()> {
        match Opcode::from_word(self.words[at]) {
            Some(Opcode::ConditionalBranch) => self.patch_branch(at, target),
            _ => self.patch_jump(at, target),
        }
    }
}

/// Call to a subroutine or function, resolved by the linker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFixup {
    pub at: usize,
    pub name: String,
    pub span: Span,
}

/// What a unit is reached by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Init,
    Event(String),
    Callable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitCode {
    pub entry: Entry,
    pub span: Span,
    pub code: Vec<u16>,
    pub calls: Vec<CallFixup>,
    /// Statement start positions, relative to the unit
    pub source_map: Vec<(Span, usize)>,
}

/// Watermark allocator for per-statement temporaries, growing down from
/// `top` towards the declared variables.
#[derive(Debug)]
struct Temps {
    top: usize,
    next: usize,
    floor: usize,
}

impl Temps {
    fn alloc(&mut self, n: usize, span: Span) -> CompileRes<usize> {
        if self.next < self.floor + n {
            return Err(CompileError::semantic(SemanticError::OutOfMemory, span));
        }
        self.next -= n;
        Ok(self.next)
    }
    fn reset(&mut self) {
        self.next = self.top;
    }
    /// Slots handed out since the last reset.
    fn live(&self) -> std::ops::Range<usize> {
        self.next..self.top
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowKind {
    Break,
    Continue,
}

/// A loop or switch whose exits are still being collected.
#[derive(Debug)]
struct Flow {
    label: Option<String>,
    is_switch: bool,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// Generation state of one unit.
pub struct CodegenContext<'a> {
    node: &'a NodeDescription,
    options: &'a CompilerOptions,
    module_size: usize,
    buf: CodeBuffer,
    calls: Vec<CallFixup>,
    source_map: Vec<(Span, usize)>,
    temps: Temps,
    flows: Vec<Flow>,
    labels: HashMap<String, usize>,
    gotos: Vec<(usize, String, Span)>,
    /// Signature and frame size of the function being generated
    function: Option<(Rc<FunctionSignature>, usize)>,
    /// `ret` for callable units, `stop` otherwise
    exit: u16,
    /// Statement being generated, for errors without a better position
    span: Span,
}

/// Generates every unit of the program.
pub fn generate(
    program: &Program,
    node: &NodeDescription,
    options: &CompilerOptions,
) -> CompileRes<Vec<UnitCode>> {
    program
        .units
        .iter()
        .map(|unit| CodegenContext::new(node, options, program.module_size, unit).unit(unit))
        .collect()
}

impl<'a> CodegenContext<'a> {
    fn new(
        node: &'a NodeDescription,
        options: &'a CompilerOptions,
        module_size: usize,
        unit: &Unit,
    ) -> Self {
        let top = match options.language {
            Language::L2 => node.return_value_offset(),
            Language::Simple => node.max_var_size,
        };
        let function = match &unit.kind {
            UnitKind::Function {
                signature: Some(sig),
                ..
            } => Some((Rc::clone(sig), unit.frame_size)),
            _ => None,
        };
        Self {
            node,
            options,
            module_size,
            buf: CodeBuffer::default(),
            calls: Vec::new(),
            source_map: Vec::new(),
            temps: Temps {
                top,
                next: top,
                floor: module_size,
            },
            flows: Vec::new(),
            labels: HashMap::new(),
            gotos: Vec::new(),
            function,
            exit: if unit.kind.is_callable() { RET } else { STOP },
            span: unit.span,
        }
    }

    fn unit(mut self, unit: &Unit) -> CompileRes<UnitCode> {
        self.block(&unit.body)?;
        let entry = match &unit.kind {
            UnitKind::Init => Entry::Init,
            UnitKind::OnEvent(name) => Entry::Event(name.clone()),
            UnitKind::Sub(name) => Entry::Callable(name.clone()),
            UnitKind::Function { decl, .. } => Entry::Callable(decl.name.clone()),
        };
        self.buf.push(self.exit);
        for (at, label, span) in std::mem::take(&mut self.gotos) {
            let target = self.labels.get(&label).copied().ok_or_else(|| {
                let name = label.split('@').next().unwrap_or(&label).to_string();
                CompileError::semantic(SemanticError::UnknownLabel(name), span)
            })?;
            self.buf.patch_jump(at, target).map_err(|e| e.at(span))?;
        }
        if !self.flows.is_empty() {
            return Err(CompileError::internal(InternalError::UnresolvedJumps));
        }
        tracing::trace!(
            target: "codegen",
            "unit {:?}: {} words, {} calls",
            entry,
            self.buf.here(),
            self.calls.len()
        );
        Ok(UnitCode {
            entry,
            span: unit.span,
            code: self.buf.release(),
            calls: self.calls,
            source_map: self.source_map,
        })
    }

    fn return_slot(&self) -> u16 {
        self.node.return_value_offset() as u16
    }
    fn frame_pointer(&self) -> u16 {
        self.node.frame_offset() as u16
    }
    fn max_var_size(&self) -> u16 {
        self.node.max_var_size as u16
    }

    /// Operand of a direct load or store.
    fn address(&self, addr: usize) -> CompileRes<u16> {
        if addr >= 0x1000 || addr >= self.node.max_var_size {
            return Err(CompileError::semantic(SemanticError::OutOfMemory, self.span));
        }
        Ok(addr as u16)
    }

    fn temp(&mut self, n: usize) -> CompileRes<usize> {
        self.temps.alloc(n, self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jumps_are_patched_relative_to_themselves() {
        let mut buf = CodeBuffer::default();
        let at = buf.jump_placeholder();
        buf.push(0x1001);
        buf.push(0x1002);
        buf.patch(at, 3).unwrap();
        assert_eq!(buf.release()[0], 0x9003);

        let mut buf = CodeBuffer::default();
        buf.push(0x1001);
        let at = buf.branch_placeholder(BinaryOp::Ne, false);
        buf.jump_to(0).unwrap();
        buf.patch(at, 4).unwrap();
        assert_eq!(buf.release(), vec![0x1001, 0xa00b, 3, 0x9ffd]);
    }

    #[test]
    fn far_jumps_are_rejected() {
        let mut buf = CodeBuffer::default();
        let at = buf.jump_placeholder();
        let err = buf.patch_jump(at, 0x800).unwrap_err();
        assert_eq!(
            err.kind,
            crate::error::CompileErrorKind::Semantic(SemanticError::CodeTooLarge)
        );
        assert!(buf.patch_jump(at, 0x7ff).is_ok());
    }

    #[test]
    fn temporaries_grow_down_and_reset() {
        let mut temps = Temps {
            top: 100,
            next: 100,
            floor: 90,
        };
        assert_eq!(temps.alloc(4, Span::new(0)).unwrap(), 96);
        assert_eq!(temps.alloc(6, Span::new(0)).unwrap(), 90);
        assert!(temps.alloc(1, Span::new(0)).is_err());
        temps.reset();
        assert_eq!(temps.alloc(1, Span::new(0)).unwrap(), 99);
    }
}
