//! Compiler from the Aseba-style scripting language and its C-like
//! successor to bytecode for the robot stack machine.
pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod config;
pub mod disasm;
pub mod error;
pub mod grammar;
pub mod language;
pub mod lexer;
pub mod link;
pub mod macros;
pub mod target;
pub mod tree;
pub mod vm;

use serde::Serialize;

pub use config::CompilerOptions;
pub use error::{CompileError, CompileErrorKind, CompileRes, SourceMetadata};
pub use language::Language;
pub use target::NodeDescription;

/// Address of the first instruction generated for a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceMapEntry {
    pub offset: usize,
    /// One-based
    pub line: usize,
    /// One-based, in characters
    pub col: usize,
    pub addr: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Compiled {
    pub image: Vec<u16>,
    pub source_map: Vec<SourceMapEntry>,
}

pub fn compile(
    source: &str,
    node: &NodeDescription,
    options: &CompilerOptions,
) -> Result<Compiled, CompileError> {
    compile_source(&SourceMetadata::new(source), node, options)
}

/// Compiles `meta`, attaching a source snippet to any error.
pub fn compile_source(
    meta: &SourceMetadata,
    node: &NodeDescription,
    options: &CompilerOptions,
) -> CompileRes<Compiled> {
    let image = lower(meta, node, options).map_err(|e| e.resolve(meta))?;
    let source = meta.input();
    let source_map = image
        .source_map
        .iter()
        .map(|&(span, addr)| {
            let pos = span.position_in(source);
            SourceMapEntry {
                offset: span.offset,
                line: pos.line + 1,
                col: pos.col + 1,
                addr,
            }
        })
        .collect();
    tracing::info!(
        "compiled {} source bytes to {} words ({})",
        source.len(),
        image.words.len(),
        options.language
    );
    Ok(Compiled {
        image: image.words,
        source_map,
    })
}

fn lower(
    meta: &SourceMetadata,
    node: &NodeDescription,
    options: &CompilerOptions,
) -> CompileRes<link::Image> {
    let lines = grammar::Parser::new(meta, options)
        .and_then(|mut parser| parser.parse_lines())
        .map_err(|e| e.map_kind(CompileErrorKind::from))?;
    let program = tree::build_program(lines, node, options)?;
    let units = codegen::generate(&program, node, options)?;
    link::link(units, node)
}
