//! Places the generated units in one image behind the event table and
//! resolves calls between them.
use std::collections::HashMap;

use crate::bytecode::Opcode;
use crate::codegen::{Entry, UnitCode};
use crate::error::{CompileError, CompileRes, SemanticError, Span};
use crate::target::{NodeDescription, INIT_EVENT_ID};

/// Linked bytecode with the address of each generated statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub words: Vec<u16>,
    pub source_map: Vec<(Span, u16)>,
}

/// Highest address a `callsub` can reach.
const MAX_ADDRESS: usize = 0xfff;

pub fn link(units: Vec<UnitCode>, node: &NodeDescription) -> CompileRes<Image> {
    let events = units
        .iter()
        .filter(|u| !matches!(u.entry, Entry::Callable(_)))
        .count();
    let header_len = 1 + 2 * events;

    let mut header = vec![header_len as u16];
    let mut callables = HashMap::new();
    let mut handled = HashMap::new();
    let mut bases = Vec::with_capacity(units.len());
    let mut next = header_len;
    for unit in &units {
        let base = next;
        next += unit.code.len();
        if next > MAX_ADDRESS + 1 {
            return Err(CompileError::semantic(SemanticError::CodeTooLarge, unit.span));
        }
        bases.push(base);
        let id = match &unit.entry {
            Entry::Init => INIT_EVENT_ID,
            Entry::Event(name) => node.local_event_id(name).ok_or_else(|| {
                CompileError::semantic(SemanticError::UnknownEvent(name.clone()), unit.span)
            })?,
            Entry::Callable(name) => {
                if callables.insert(name.as_str(), base).is_some() {
                    return Err(CompileError::semantic(
                        SemanticError::DuplicateDefinition(name.clone()),
                        unit.span,
                    ));
                }
                continue;
            }
        };
        if handled.insert(id, base).is_some() {
            let name = match &unit.entry {
                Entry::Event(name) => name.clone(),
                _ => "init".to_string(),
            };
            return Err(CompileError::semantic(
                SemanticError::DuplicateDefinition(name),
                unit.span,
            ));
        }
        header.push(id);
        header.push(base as u16);
    }

    let mut words = header;
    words.reserve(next - header_len);
    let mut source_map = Vec::new();
    for (unit, &base) in units.iter().zip(&bases) {
        let mut code = unit.code.clone();
        for call in &unit.calls {
            let target = callables.get(call.name.as_str()).copied().ok_or_else(|| {
                CompileError::semantic(SemanticError::UnknownFunction(call.name.clone()), call.span)
            })?;
            code[call.at] = Opcode::SubCall.word(target as u16);
        }
        words.extend(code);
        source_map.extend(
            unit.source_map
                .iter()
                .map(|&(span, at)| (span, (base + at) as u16)),
        );
    }
    tracing::debug!(
        target: "link",
        "linked {} units, {} events, {} words",
        units.len(),
        events,
        words.len()
    );
    Ok(Image { words, source_map })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{RET, STOP};
    use crate::codegen::CallFixup;

    fn unit(entry: Entry, code: Vec<u16>) -> UnitCode {
        UnitCode {
            entry,
            span: Span::new(0),
            code,
            calls: Vec::new(),
            source_map: vec![(Span::new(0), 0)],
        }
    }

    #[test]
    fn header_lists_init_and_events() {
        let node = NodeDescription::thymio();
        let mut init = unit(Entry::Init, vec![0xd000, STOP]);
        init.calls.push(CallFixup {
            at: 0,
            name: "blink".into(),
            span: Span::new(0),
        });
        let units = vec![
            init,
            unit(Entry::Event("button.left".into()), vec![0x1001, STOP]),
            unit(Entry::Callable("blink".into()), vec![RET]),
        ];
        let image = link(units, &node).unwrap();
        assert_eq!(
            image.words,
            vec![5, 0xffff, 5, 0xfffd, 7, 0xd009, STOP, 0x1001, STOP, RET]
        );
        let addrs: Vec<_> = image.source_map.iter().map(|&(_, a)| a).collect();
        assert_eq!(addrs, vec![5, 7, 9]);
    }

    #[test]
    fn unknown_names_are_reported() {
        let node = NodeDescription::thymio();
        let units = vec![
            unit(Entry::Init, vec![STOP]),
            unit(Entry::Event("nope".into()), vec![STOP]),
        ];
        assert_eq!(
            link(units, &node).unwrap_err().to_string(),
            "unknown event \"nope\""
        );

        let mut init = unit(Entry::Init, vec![0xd000, STOP]);
        init.calls.push(CallFixup {
            at: 0,
            name: "missing".into(),
            span: Span::new(0),
        });
        assert!(link(vec![init], &node).is_err());
    }

    #[test]
    fn event_handled_twice() {
        let node = NodeDescription::thymio();
        let units = vec![
            unit(Entry::Init, vec![STOP]),
            unit(Entry::Event("prox".into()), vec![STOP]),
            unit(Entry::Event("prox".into()), vec![STOP]),
        ];
        assert!(matches!(
            link(units, &node).unwrap_err().kind,
            crate::error::CompileErrorKind::Semantic(SemanticError::DuplicateDefinition(_))
        ));
    }
}
