use asebac::vm::{Vm, VmError};
use asebac::{compile, CompilerOptions, Language, NodeDescription};

const STEPS: u64 = 10_000;
/// First word after the robot's own variables.
const A: usize = 128;

fn run(source: &str, options: &CompilerOptions, check: impl FnOnce(&Vm)) {
    let node = NodeDescription::thymio();
    let compiled = compile(source, &node, options).unwrap();
    let mut vm = Vm::new(&node, &compiled.image);
    assert!(vm.run_init(STEPS).unwrap());
    check(&vm);
}

fn run_l2(source: &str, check: impl FnOnce(&Vm)) {
    run(source, &CompilerOptions::new(Language::L2), check)
}

#[test]
fn fixed_point_arithmetic() {
    run_l2("fixed x = 1.5; fixed y = x * 2.0; int i = y;", |vm| {
        assert_eq!(vm.word(A), 150);
        assert_eq!(vm.word(A + 1), 300);
        assert_eq!(vm.word(A + 2), 3);
    });
}

#[test]
fn switch_falls_through_until_break() {
    let program = |v: i16| {
        format!(
            "int v = {}; int r = 0;\n\
             switch (v) {{\n\
             case 1:\n\
             case 2: r = 10; break;\n\
             case 3: r += 1;\n\
             case 4: r += 2;\n\
             default: r += 20;\n\
             }}\n",
            v
        )
    };
    for (v, r) in [(1, 10), (2, 10), (3, 23), (4, 22), (9, 20)] {
        run_l2(&program(v), |vm| assert_eq!(vm.word(A + 1), r, "v = {}", v));
    }
}

#[test]
fn arrays_pass_by_reference() {
    let source = "void bump(int x, int y[1]) {\n  x = x + 1;\n  y[0] = y[0] + 1;\n}\n\
                  int a = 1;\nint b[1];\nb[0] = 1;\nbump(a, b);\n";
    run_l2(source, |vm| {
        assert_eq!(vm.word(A), 1);
        assert_eq!(vm.word(A + 1), 2);
    });
}

#[test]
fn recursive_function() {
    let source = "int fact(int n) {\n  if (n <= 1) { return 1; }\n  return n * fact(n - 1);\n}\n\
                  int f = fact(5);\n";
    run_l2(source, |vm| assert_eq!(vm.word(A), 120));
}

#[test]
fn labeled_continue_skips_the_outer_iteration() {
    let source = "int count = 0;\n\
                  outer: for (int i = 0; i < 3; i++) {\n\
                  for (int j = 0; j < 3; j++) {\n\
                  if (j == 1) { continue outer; }\n\
                  count++;\n\
                  }\n\
                  }\n";
    run_l2(source, |vm| assert_eq!(vm.word(A), 3));
}

#[test]
fn macros_call_natives() {
    run_l2("int a = 4; int b = 9; int m = min(a, b);", |vm| {
        assert_eq!(vm.word(A + 2), 4);
    });
}

#[test]
fn emitted_events_are_recorded() {
    let options = CompilerOptions::new(Language::L2).with_user_event("pos", 2);
    run("int p[2] = [3, 4];\nemit pos p;\n", &options, |vm| {
        assert_eq!(vm.emitted, vec![(0, vec![3, 4])]);
    });
}

#[test]
fn simple_language_native_call_and_loop() {
    let source = "var a[3]\nvar s = 0\nvar i\ncall math.fill(a, 7)\nfor i in 0:2 do\ns = s + a[i]\nend\n";
    run(source, &CompilerOptions::new(Language::Simple), |vm| {
        assert_eq!((vm.word(A), vm.word(A + 1), vm.word(A + 2)), (7, 7, 7));
        assert_eq!(vm.word(A + 3), 21);
    });
}

#[test]
fn when_runs_on_the_rising_edge() {
    let node = NodeDescription::thymio();
    let source = "var n = 0\nvar c = 0\nonevent button.left\nn = n + 1\nwhen n > 1 do\nc = c + 1\nend\n";
    let compiled = compile(source, &node, &CompilerOptions::new(Language::Simple)).unwrap();
    let mut vm = Vm::new(&node, &compiled.image);
    vm.run_init(STEPS).unwrap();
    let left = node.local_event_id("button.left").unwrap();
    for _ in 0..3 {
        assert!(vm.run_event(left, STEPS).unwrap());
    }
    assert_eq!(vm.word(A), 3);
    assert_eq!(vm.word(A + 1), 1);
    assert!(!vm.run_event(node.local_event_id("tap").unwrap(), STEPS).unwrap());
}

#[test]
fn index_checked_at_run_time() {
    let node = NodeDescription::thymio();
    let compiled = compile(
        "int a[3]; int i = 5; a[i] = 1;",
        &node,
        &CompilerOptions::new(Language::L2),
    )
    .unwrap();
    let mut vm = Vm::new(&node, &compiled.image);
    assert!(matches!(
        vm.run_init(STEPS),
        Err(VmError::IndexOutOfRange { index: 5, size: 3, .. })
    ));
}

#[test]
fn cached_index_survives_a_call() {
    let source = "int g(int k) {\n  int b[4] = [0, 0, 0, 0];\n  int j = 3;\n  b[j--] += k;\n  return k;\n}\n\
                  int a[4];\nint i = 0;\na[i++] += g(5);\n";
    run_l2(source, |vm| {
        let a: Vec<_> = (A..A + 4).map(|addr| vm.word(addr)).collect();
        assert_eq!(a, vec![5, 0, 0, 0]);
        assert_eq!(vm.word(A + 4), 1);
    });
}

#[test]
fn cached_index_survives_recursion() {
    let source = "int depth(int n) {\n  int c[3] = [0, 0, 0];\n  int j = 0;\n  if (n > 0) {\n    c[j++] += depth(n - 1);\n  }\n  return n + c[0];\n}\n\
                  int r = depth(3);\n";
    run_l2(source, |vm| assert_eq!(vm.word(A), 6));
}
