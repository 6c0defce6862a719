//! Decoding of linked images back into instructions, and a textual listing.
use std::fmt;

use itertools::Itertools;
use thiserror::Error;

use crate::bytecode::{to_s12, BinaryOp, Opcode, UnaryOp, WHEN_FLAG};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisasmError {
    #[error("bad event table")]
    BadEventTable,
    #[error("unknown instruction {word:#06x} at {addr}")]
    UnknownInstruction { addr: usize, word: u16 },
    #[error("instruction at {addr} is cut short")]
    Truncated { addr: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Stop,
    PushSmall(i16),
    Push(i16),
    Load(u16),
    Store(u16),
    LoadIndirect { addr: u16, size: u16 },
    StoreIndirect { addr: u16, size: u16 },
    Unary(UnaryOp),
    Binary(BinaryOp),
    Jump(i16),
    /// Taken when `op` does not hold
    Branch { op: BinaryOp, when: bool, offset: i16 },
    Emit { id: u16, addr: u16, size: u16 },
    CallNative(u16),
    CallSub(u16),
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub addr: usize,
    pub instr: Instr,
}

impl Instruction {
    pub fn len(&self) -> usize {
        match self.instr {
            Instr::Push(_)
            | Instr::LoadIndirect { .. }
            | Instr::StoreIndirect { .. }
            | Instr::Branch { .. } => 2,
            Instr::Emit { .. } => 3,
            _ => 1,
        }
    }
    fn target(&self, offset: i16) -> i64 {
        self.addr as i64 + i64::from(offset)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.instr {
            Instr::Stop => f.write_str("stop"),
            Instr::PushSmall(n) => write!(f, "push.s {}", n),
            Instr::Push(n) => write!(f, "push {}", n),
            Instr::Load(addr) => write!(f, "load {}", addr),
            Instr::Store(addr) => write!(f, "store {}", addr),
            Instr::LoadIndirect { addr, size } => write!(f, "load.ind {} size={}", addr, size),
            Instr::StoreIndirect { addr, size } => write!(f, "store.ind {} size={}", addr, size),
            Instr::Unary(op) => f.write_str(op.mnemonic()),
            Instr::Binary(op) => f.write_str(op.mnemonic()),
            Instr::Jump(offset) => write!(f, "jump {}", self.target(offset)),
            Instr::Branch { op, when, offset } => write!(
                f,
                "jump.if.not {} {}{}",
                op,
                self.target(offset),
                if when { " (edge)" } else { "" }
            ),
            Instr::Emit { id, addr, size } => write!(f, "emit {} addr={} size={}", id, addr, size),
            Instr::CallNative(id) => write!(f, "callnat {}", id),
            Instr::CallSub(addr) => write!(f, "callsub {}", addr),
            Instr::Return => f.write_str("ret"),
        }
    }
}

/// `(event id, address)` pairs of the image header.
pub fn event_table(image: &[u16]) -> Result<Vec<(u16, usize)>, DisasmError> {
    let len = usize::from(*image.first().ok_or(DisasmError::BadEventTable)?);
    if len % 2 == 0 || len > image.len() {
        return Err(DisasmError::BadEventTable);
    }
    image[1..len]
        .chunks(2)
        .map(|pair| match *pair {
            [id, addr] if usize::from(addr) >= len && usize::from(addr) < image.len() => {
                Ok((id, usize::from(addr)))
            }
            _ => Err(DisasmError::BadEventTable),
        })
        .collect()
}

fn decode(image: &[u16], addr: usize) -> Result<Instruction, DisasmError> {
    let word = image[addr];
    let unknown = DisasmError::UnknownInstruction { addr, word };
    let opcode = Opcode::from_word(word).ok_or_else(|| unknown.clone())?;
    let extra = |k: usize| {
        image
            .get(addr + k)
            .copied()
            .ok_or(DisasmError::Truncated { addr })
    };
    let arg = word & 0xfff;
    let instr = match opcode {
        Opcode::Stop => Instr::Stop,
        Opcode::SmallImmediate => Instr::PushSmall(to_s12(word)),
        Opcode::LargeImmediate => Instr::Push(extra(1)? as i16),
        Opcode::Load => Instr::Load(arg),
        Opcode::Store => Instr::Store(arg),
        Opcode::LoadIndirect => Instr::LoadIndirect {
            addr: arg,
            size: extra(1)?,
        },
        Opcode::StoreIndirect => Instr::StoreIndirect {
            addr: arg,
            size: extra(1)?,
        },
        Opcode::Unary => Instr::Unary(UnaryOp::from_code(arg).ok_or(unknown)?),
        Opcode::Binary => Instr::Binary(BinaryOp::from_code(arg).ok_or(unknown)?),
        Opcode::Jump => Instr::Jump(to_s12(word)),
        Opcode::ConditionalBranch => Instr::Branch {
            op: BinaryOp::from_code(arg & 0xff)
                .filter(|op| op.is_comparison())
                .ok_or(unknown)?,
            when: arg & WHEN_FLAG != 0,
            offset: extra(1)? as i16,
        },
        Opcode::Emit => Instr::Emit {
            id: arg,
            addr: extra(1)?,
            size: extra(2)?,
        },
        Opcode::NativeCall => Instr::CallNative(arg),
        Opcode::SubCall => Instr::CallSub(arg),
        Opcode::Return => Instr::Return,
    };
    Ok(Instruction { addr, instr })
}

/// Decodes the code following the event table.
pub fn disassemble(image: &[u16]) -> Result<Vec<Instruction>, DisasmError> {
    event_table(image)?;
    let mut addr = usize::from(image[0]);
    let mut out = Vec::new();
    while addr < image.len() {
        let instruction = decode(image, addr)?;
        addr += instruction.len();
        out.push(instruction);
    }
    Ok(out)
}

/// Human-readable listing with a label in front of each event handler.
pub fn listing(image: &[u16]) -> Result<String, DisasmError> {
    let events = event_table(image)?;
    let mut lines = disassemble(image)?.into_iter().map(|instruction| {
        let labels = events
            .iter()
            .filter(|&&(_, addr)| addr == instruction.addr)
            .map(|(id, _)| format!("onevent_{:04x}:\n", id))
            .join("");
        format!("{}{:5}: {}", labels, instruction.addr, instruction)
    });
    Ok(lines.join("\n"))
}
