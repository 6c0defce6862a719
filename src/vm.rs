//! Reference interpreter for linked images.
//!
//! It follows the robot firmware closely enough to run compiled programs
//! in tests: 16-bit wrapping arithmetic, checked indirect access, edge
//! triggered `when` branches and a handful of math natives.
use std::collections::BTreeMap;

use thiserror::Error;

use crate::bytecode::{to_s12, to_s16, BinaryOp, Opcode, UnaryOp, WHEN_FLAG, WHEN_LAST_FLAG};
use crate::target::{NodeDescription, INIT_EVENT_ID};

const STACK_SIZE: usize = 32;
const CALL_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("no more than {0} steps allowed")]
    StepLimit(u64),
    #[error("stack overflow at {pc}")]
    StackOverflow { pc: usize },
    #[error("stack underflow at {pc}")]
    StackUnderflow { pc: usize },
    #[error("address {addr} out of memory at {pc}")]
    BadAddress { pc: usize, addr: usize },
    #[error("division by zero at {pc}")]
    DivisionByZero { pc: usize },
    #[error("index {index} out of array of size {size} at {pc}")]
    IndexOutOfRange { pc: usize, index: u16, size: u16 },
    #[error("unknown native function {0}")]
    UnknownNative(String),
    #[error("unknown instruction {word:#06x} at {pc}")]
    UnknownInstruction { pc: usize, word: u16 },
    #[error("program counter {0} outside the image")]
    BadJump(usize),
}

type VmRes<T> = Result<T, VmError>;

pub struct Vm<'a> {
    node: &'a NodeDescription,
    /// Owned because `when` branches remember their last outcome in place
    image: Vec<u16>,
    pub memory: Vec<i16>,
    stack: Vec<i16>,
    calls: Vec<usize>,
    pc: usize,
    steps: u64,
    /// User events sent with `emit`, with their data
    pub emitted: Vec<(u16, Vec<i16>)>,
    rng: u16,
}

impl<'a> Vm<'a> {
    pub fn new(node: &'a NodeDescription, image: &[u16]) -> Self {
        Self {
            node,
            image: image.to_vec(),
            memory: vec![0; node.max_var_size],
            stack: Vec::with_capacity(STACK_SIZE),
            calls: Vec::new(),
            pc: 0,
            steps: 0,
            emitted: Vec::new(),
            rng: 0,
        }
    }

    /// Value of the first word of variable memory at `addr`.
    pub fn word(&self, addr: usize) -> i16 {
        self.memory.get(addr).copied().unwrap_or(0)
    }

    fn handler(&self, id: u16) -> Option<usize> {
        let len = usize::from(*self.image.first()?);
        self.image
            .get(1..len)?
            .chunks(2)
            .find(|pair| pair[0] == id)
            .and_then(|pair| pair.get(1))
            .map(|&addr| usize::from(addr))
    }

    pub fn run_init(&mut self, max_steps: u64) -> VmRes<bool> {
        self.run_event(INIT_EVENT_ID, max_steps)
    }

    /// Runs the handler of event `id` to completion. Returns `false` when
    /// the program does not handle it.
    pub fn run_event(&mut self, id: u16, max_steps: u64) -> VmRes<bool> {
        let start = match self.handler(id) {
            Some(addr) => addr,
            None => return Ok(false),
        };
        self.pc = start;
        self.stack.clear();
        self.calls.clear();
        self.steps = 0;
        tracing::trace!(target: "vm", "event {:#06x} at {}", id, start);
        while self.step()? {
            self.steps += 1;
            if self.steps > max_steps {
                return Err(VmError::StepLimit(max_steps));
            }
        }
        Ok(true)
    }

    fn push(&mut self, value: i16) -> VmRes<()> {
        if self.stack.len() >= STACK_SIZE {
            return Err(VmError::StackOverflow { pc: self.pc });
        }
        self.stack.push(value);
        Ok(())
    }
    fn pop(&mut self) -> VmRes<i16> {
        self.stack
            .pop()
            .ok_or(VmError::StackUnderflow { pc: self.pc })
    }
    fn read(&self, addr: usize) -> VmRes<i16> {
        self.memory
            .get(addr)
            .copied()
            .ok_or(VmError::BadAddress { pc: self.pc, addr })
    }
    fn write(&mut self, addr: usize, value: i16) -> VmRes<()> {
        let pc = self.pc;
        *self
            .memory
            .get_mut(addr)
            .ok_or(VmError::BadAddress { pc, addr })? = value;
        Ok(())
    }
    fn fetch(&self, at: usize) -> VmRes<u16> {
        self.image.get(at).copied().ok_or(VmError::BadJump(at))
    }
    fn relative(&self, offset: i16) -> VmRes<usize> {
        let target = self.pc as i64 + i64::from(offset);
        usize::try_from(target).map_err(|_| VmError::BadJump(self.pc))
    }
    /// Pops an index and checks it against `size`.
    fn index(&mut self, base: u16, size: u16) -> VmRes<usize> {
        let index = self.pop()? as u16;
        if index >= size {
            return Err(VmError::IndexOutOfRange {
                pc: self.pc,
                index,
                size,
            });
        }
        Ok(usize::from(base) + usize::from(index))
    }

    /// Executes one instruction; `false` once the event is done.
    fn step(&mut self) -> VmRes<bool> {
        let word = self.fetch(self.pc)?;
        let unknown = VmError::UnknownInstruction { pc: self.pc, word };
        let arg = word & 0xfff;
        match Opcode::from_word(word).ok_or_else(|| unknown.clone())? {
            Opcode::Stop => return Ok(false),
            Opcode::SmallImmediate => {
                self.push(to_s12(word))?;
                self.pc += 1;
            }
            Opcode::LargeImmediate => {
                let value = self.fetch(self.pc + 1)? as i16;
                self.push(value)?;
                self.pc += 2;
            }
            Opcode::Load => {
                let value = self.read(usize::from(arg))?;
                self.push(value)?;
                self.pc += 1;
            }
            Opcode::Store => {
                let value = self.pop()?;
                self.write(usize::from(arg), value)?;
                self.pc += 1;
            }
            Opcode::LoadIndirect => {
                let size = self.fetch(self.pc + 1)?;
                let addr = self.index(arg, size)?;
                let value = self.read(addr)?;
                self.push(value)?;
                self.pc += 2;
            }
            Opcode::StoreIndirect => {
                let size = self.fetch(self.pc + 1)?;
                let addr = self.index(arg, size)?;
                let value = self.pop()?;
                self.write(addr, value)?;
                self.pc += 2;
            }
            Opcode::Unary => {
                let op = UnaryOp::from_code(arg).ok_or(unknown)?;
                let value = self.pop()?;
                self.push(to_s16(op.eval(value.into())))?;
                self.pc += 1;
            }
            Opcode::Binary => {
                let op = BinaryOp::from_code(arg).ok_or(unknown)?;
                let value = self.binary(op)?;
                self.push(value)?;
                self.pc += 1;
            }
            Opcode::Jump => self.pc = self.relative(to_s12(word))?,
            Opcode::ConditionalBranch => {
                let op = BinaryOp::from_code(arg & 0xff).ok_or(unknown)?;
                let holds = self.binary(op)? != 0;
                let taken = if arg & WHEN_FLAG != 0 {
                    let was = word & WHEN_LAST_FLAG != 0;
                    self.image[self.pc] = if holds {
                        word | WHEN_LAST_FLAG
                    } else {
                        word & !WHEN_LAST_FLAG
                    };
                    !holds || was
                } else {
                    !holds
                };
                self.pc = if taken {
                    let offset = self.fetch(self.pc + 1)? as i16;
                    self.relative(offset)?
                } else {
                    self.pc + 2
                };
            }
            Opcode::Emit => {
                let addr = usize::from(self.fetch(self.pc + 1)?);
                let size = usize::from(self.fetch(self.pc + 2)?);
                let data = (addr..addr + size)
                    .map(|a| self.read(a))
                    .collect::<VmRes<Vec<_>>>()?;
                self.emitted.push((arg, data));
                self.pc += 3;
            }
            Opcode::NativeCall => {
                self.native(usize::from(arg))?;
                self.pc += 1;
            }
            Opcode::SubCall => {
                if self.calls.len() >= CALL_DEPTH {
                    return Err(VmError::StackOverflow { pc: self.pc });
                }
                self.calls.push(self.pc + 1);
                self.pc = usize::from(arg);
            }
            Opcode::Return => match self.calls.pop() {
                Some(pc) => self.pc = pc,
                None => return Ok(false),
            },
        }
        Ok(true)
    }

    fn binary(&mut self, op: BinaryOp) -> VmRes<i16> {
        let b = self.pop()?;
        let a = self.pop()?;
        op.eval(a.into(), b.into())
            .map(to_s16)
            .ok_or(VmError::DivisionByZero { pc: self.pc })
    }

    /// Pops the argument addresses (first argument on top), then the free
    /// sizes and the group sizes, and runs the native.
    fn native(&mut self, id: usize) -> VmRes<()> {
        let node = self.node;
        let native = node
            .native_functions
            .get(id)
            .ok_or_else(|| VmError::UnknownNative(format!("#{}", id)))?;
        let mut addrs = Vec::with_capacity(native.args.len());
        for _ in &native.args {
            addrs.push(usize::from(self.pop()? as u16));
        }
        let mut free = Vec::new();
        for _ in native.args.iter().filter(|&&code| code == 0) {
            free.push(usize::from(self.pop()? as u16));
        }
        let mut groups = BTreeMap::new();
        for code in native.args.iter().filter(|&&code| code < 0) {
            groups.insert(-code, 0);
        }
        for size in groups.values_mut().rev() {
            *size = usize::from(self.pop()? as u16);
        }
        let mut free = free.into_iter();
        let sizes = native
            .args
            .iter()
            .map(|&code| match code {
                0 => free.next().unwrap_or(0),
                code if code > 0 => code as usize,
                code => groups.get(&-code).copied().unwrap_or(0),
            })
            .collect::<Vec<_>>();
        let len = sizes.first().copied().unwrap_or(0);
        let arg = |vm: &Self, k: usize, i: usize| match addrs.get(k) {
            Some(addr) => vm.read(addr + i),
            None => Err(VmError::UnknownNative(native.name.clone())),
        };

        match native.name.as_str() {
            "math.copy" => {
                for i in 0..len {
                    let v = arg(self, 1, i)?;
                    self.write(addrs[0] + i, v)?;
                }
            }
            "math.fill" => {
                let v = arg(self, 1, 0)?;
                for i in 0..len {
                    self.write(addrs[0] + i, v)?;
                }
            }
            "math.add" | "math.sub" | "math.min" | "math.max" => {
                for i in 0..len {
                    let (a, b) = (i32::from(arg(self, 1, i)?), i32::from(arg(self, 2, i)?));
                    let v = match native.name.as_str() {
                        "math.add" => a + b,
                        "math.sub" => a - b,
                        "math.min" => a.min(b),
                        _ => a.max(b),
                    };
                    self.write(addrs[0] + i, to_s16(v))?;
                }
            }
            "math.clamp" => {
                for i in 0..len {
                    let (x, lo, hi) = (arg(self, 1, i)?, arg(self, 2, i)?, arg(self, 3, i)?);
                    self.write(addrs[0] + i, x.max(lo).min(hi))?;
                }
            }
            "math.muldiv" => {
                for i in 0..len {
                    let a = i32::from(arg(self, 1, i)?);
                    let b = i32::from(arg(self, 2, i)?);
                    let c = i32::from(arg(self, 3, i)?);
                    let v = (a * b)
                        .checked_div(c)
                        .ok_or(VmError::DivisionByZero { pc: self.pc })?;
                    self.write(addrs[0] + i, to_s16(v))?;
                }
            }
            "math.rand" => {
                for i in 0..len {
                    self.rng = self.rng.wrapping_mul(25173).wrapping_add(13849);
                    self.write(addrs[0] + i, self.rng as i16)?;
                }
            }
            other => return Err(VmError::UnknownNative(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{conditional_branch, jump, load, push_number, store, RET, STOP};
    use crate::target::NodeDescription;

    fn image(code: &[u16]) -> Vec<u16> {
        let mut image = vec![3, INIT_EVENT_ID, 3];
        image.extend_from_slice(code);
        image
    }

    #[test]
    fn arithmetic_wraps_to_16_bits() {
        let node = NodeDescription::thymio();
        let mut code = push_number(300);
        code.extend(push_number(300));
        code.extend([BinaryOp::Mult.word(), store(200), STOP]);
        let mut vm = Vm::new(&node, &image(&code));
        assert_eq!(vm.run_init(100), Ok(true));
        assert_eq!(vm.word(200), to_s16(90000));
    }

    #[test]
    fn runtime_errors() {
        let node = NodeDescription::thymio();
        let code = [0x1001, 0x1000, BinaryOp::Div.word(), STOP];
        let mut vm = Vm::new(&node, &image(&code));
        assert!(matches!(vm.run_init(100), Err(VmError::DivisionByZero { .. })));

        let code = [0x1003, 0x5000 | 200, 3, STOP];
        let mut vm = Vm::new(&node, &image(&code));
        assert!(matches!(
            vm.run_init(100),
            Err(VmError::IndexOutOfRange { index: 3, size: 3, .. })
        ));

        let code = [jump(0)];
        let mut vm = Vm::new(&node, &image(&code));
        assert_eq!(vm.run_init(50), Err(VmError::StepLimit(50)));
    }

    #[test]
    fn when_branches_only_on_rising_edges() {
        let node = NodeDescription::thymio();
        // when mem[200] == 1: mem[201] += 1
        let [branch, _] = conditional_branch(BinaryOp::Eq, true);
        let code = [
            load(200),
            0x1001,
            branch,
            6,
            load(201),
            0x1001,
            BinaryOp::Add.word(),
            store(201),
            STOP,
        ];
        let mut vm = Vm::new(&node, &image(&code));
        vm.memory[200] = 1;
        for _ in 0..3 {
            vm.run_init(100).unwrap();
        }
        assert_eq!(vm.word(201), 1);
        vm.memory[200] = 0;
        vm.run_init(100).unwrap();
        vm.memory[200] = 1;
        vm.run_init(100).unwrap();
        assert_eq!(vm.word(201), 2);
    }

    #[test]
    fn subroutines_return_to_the_caller() {
        let node = NodeDescription::thymio();
        let code = [0xd000 | 8, 0x1002, store(200), STOP, STOP, 0x1007, store(201), RET];
        let mut vm = Vm::new(&node, &image(&code));
        assert!(vm.run_init(100).unwrap());
        assert_eq!((vm.word(200), vm.word(201)), (2, 7));
        assert!(!vm.run_event(0xfffe, 100).unwrap());
    }
}
