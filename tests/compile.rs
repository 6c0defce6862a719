use asebac::bytecode::{store, STOP};
use asebac::{compile, disasm, CompileErrorKind, CompilerOptions, Language, NodeDescription};

fn l2(source: &str) -> Result<asebac::Compiled, asebac::CompileError> {
    compile(
        source,
        &NodeDescription::thymio(),
        &CompilerOptions::new(Language::L2),
    )
}

#[test]
fn constant_initializer_folds_to_one_push() {
    let compiled = l2("int a = 3 + 4 * 2;").unwrap();
    assert_eq!(compiled.image, vec![3, 0xffff, 3, 0x100b, store(128), STOP]);
}

#[test]
fn output_is_deterministic() {
    let source = "int a[4];\nfor (int i = 0; i < 4; i++) {\n  a[i] = i * i;\n}\n";
    assert_eq!(l2(source).unwrap(), l2(source).unwrap());
}

#[test]
fn constant_division_by_zero_is_located() {
    let err = l2("int x;\nx = 5 / 0;\n").unwrap_err();
    assert!(matches!(err.kind, CompileErrorKind::Semantic(_)));
    assert_eq!(err.position().map(|p| p.line), Some(1));
    assert!(err.to_string().starts_with("division by 0 line 2 col "));
}

#[test]
fn scoping_and_label_errors() {
    let err = l2("goto nowhere;").unwrap_err();
    assert_eq!(err.kind.to_string(), "unknown label \"nowhere\"");
    let err = l2("{ int b = 1; }\nb = 2;").unwrap_err();
    assert_eq!(err.kind.to_string(), "unknown variable \"b\"");
}

#[test]
fn source_map_points_at_statements() {
    let compiled = l2("int a;\na = 1;\na = 2;\n").unwrap();
    let lines: Vec<_> = compiled.source_map.iter().map(|e| e.line).collect();
    assert_eq!(lines, vec![2, 3]);
    assert_eq!(compiled.source_map[0].addr, 3);
    assert!(compiled.source_map[1].addr > 3);

    let json = serde_json::to_value(&compiled).unwrap();
    assert_eq!(json["image"][0], 3);
    assert_eq!(json["source_map"][0]["col"], 1);
}

#[test]
fn listing_of_a_small_program() {
    let compiled = l2("int a = 3 + 4 * 2;").unwrap();
    assert_eq!(
        disasm::listing(&compiled.image).unwrap(),
        "onevent_ffff:\n    3: push.s 11\n    4: store 128\n    5: stop"
    );
}

#[test]
fn simple_language_event_table() {
    let node = NodeDescription::thymio();
    let source = "var n = 0\nonevent button.left\nn = n + 1\nonevent prox\nn = 0\n";
    let compiled = compile(source, &node, &CompilerOptions::new(Language::Simple)).unwrap();
    let events = disasm::event_table(&compiled.image).unwrap();
    let ids: Vec<_> = events.iter().map(|&(id, _)| id).collect();
    assert_eq!(
        ids,
        vec![
            0xffff,
            node.local_event_id("button.left").unwrap(),
            node.local_event_id("prox").unwrap()
        ]
    );
    assert_eq!(events[0].1, 7);
}

#[test]
fn unknown_event_handler() {
    let err = compile(
        "onevent nothing\n",
        &NodeDescription::thymio(),
        &CompilerOptions::new(Language::Simple),
    )
    .unwrap_err();
    assert_eq!(err.kind.to_string(), "unknown event \"nothing\"");
}

#[test]
fn language_detection() {
    assert_eq!(Language::detect("var a = 1\n"), Language::Simple);
    assert_eq!(Language::detect("int a = 1;\n"), Language::L2);
}
