use super::*;
use parlance_ast::{
    AssignOp, BinaryOp, Declaration, Expr, HeaderDecl, IfClause, Line, LineCondition, LineGroupItem, NodeDecl,
    NodeTarget, Script, ShortcutOption, Span, Stmt, TextPart,
};
use parlance_core::{crc32_ieee, Constant, Instruction as I};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const FILE: &str = "intro.parl";

fn declare(name: &str, value: Expr) -> Declaration {
    Declaration { name: name.into(), ty: None, value, smart: false, span: None }
}

fn node(title: &str, body: Vec<Stmt>) -> NodeDecl { NodeDecl { title: title.into(), body, ..NodeDecl::default() } }

fn script(nodes: Vec<NodeDecl>) -> Script {
    Script {
        file: FILE.into(),
        declarations: vec![declare("$gold", Expr::number(0.0)), declare("$met", Expr::bool(false))],
        nodes,
    }
}

fn line(text: &str, id: &str) -> Line { Line::text(text).with_id(id) }

fn compile_ok(scripts: &[Script]) -> Program {
    let result = compile(scripts, &Library::with_defaults(), None);
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    result.program
}

fn instructions(program: &Program, name: &str) -> Vec<I> {
    program.node(name).map(|n| n.instructions.clone()).unwrap_or_default()
}

fn run_line(id: &str) -> I { I::RunLine { line_id: id.into(), substitutions: 0 } }

/* ───── lignes & table de chaînes ───── */

#[test]
fn lines_fill_the_string_table() {
    let greeting = Line {
        text: vec![TextPart::Text("You have ".into()), TextPart::Expr(Expr::var("$gold")), TextPart::Text(" coins".into())],
        tags: vec!["mood:happy".into()],
        span: Some(Span::new(4, 1, 0)),
        ..Line::default()
    };
    let program = compile_ok(&[script(vec![node("Start", vec![Stmt::Line(greeting)])])]);

    let id = "line:intro.parl-Start-1";
    assert_eq!(
        instructions(&program, "Start"),
        vec![I::PushVariable { name: "$gold".into() }, I::RunLine { line_id: id.into(), substitutions: 1 }, I::Return]
    );
    let info = &program.strings[id];
    assert_eq!(info.text, "You have {0} coins");
    assert_eq!((info.node.as_str(), info.line_number), ("Start", 4));
    assert_eq!(info.tags, vec!["mood:happy".to_string()]);
    assert_eq!(program.initial_values.get("$gold"), Some(&Constant::Number(0.0)));
}

#[test]
fn line_id_prefix_is_configurable() {
    let library = Library::with_defaults();
    let options = CompilerOptions { line_id_prefix: "text:".into(), ..CompilerOptions::default() };
    let result = Compiler::new(options, &library).compile(&[script(vec![node("Start", vec![Stmt::Line(Line::text("x"))])])], None);
    assert!(result.program.strings.contains_key("text:intro.parl-Start-1"));
}

/* ───── contrôle ───── */

#[test]
fn if_else_lowering() {
    let stmt = Stmt::If {
        clauses: vec![
            IfClause { condition: Some(Expr::var("$met")), body: vec![Stmt::Line(line("A", "a"))] },
            IfClause { condition: None, body: vec![Stmt::Line(line("B", "b"))] },
        ],
        span: None,
    };
    let program = compile_ok(&[script(vec![node("Start", vec![stmt])])]);
    assert_eq!(
        instructions(&program, "Start"),
        vec![
            I::PushVariable { name: "$met".into() },
            I::JumpIfFalse { destination: 5 },
            I::Pop,
            run_line("a"),
            I::JumpTo { destination: 8 },
            I::Pop,
            run_line("b"),
            I::JumpTo { destination: 8 },
            I::Return,
        ]
    );
    program.validate().unwrap();
}

#[test]
fn shortcut_options_lowering() {
    let options = vec![
        ShortcutOption { line: line("One", "o1"), body: vec![Stmt::Line(line("r1", "r1"))] },
        ShortcutOption {
            line: line("Two", "o2").with_condition(LineCondition::If(Expr::var("$met"))),
            body: vec![Stmt::Line(line("r2", "r2"))],
        },
        ShortcutOption { line: line("Three", "o3"), body: vec![Stmt::Line(line("r3", "r3"))] },
    ];
    let program = compile_ok(&[script(vec![node("Start", vec![Stmt::Options { options, span: None }])])]);
    let add = |id: &str, destination, has_condition| I::AddOption {
        line_id: id.into(),
        destination,
        substitutions: 0,
        has_condition,
    };
    assert_eq!(
        instructions(&program, "Start"),
        vec![
            add("o1", 6, false),
            I::PushVariable { name: "$met".into() },
            add("o2", 8, true),
            add("o3", 10, false),
            I::ShowOptions,
            I::PeekAndJump,
            run_line("r1"),
            I::JumpTo { destination: 12 },
            run_line("r2"),
            I::JumpTo { destination: 12 },
            run_line("r3"),
            I::JumpTo { destination: 12 },
            I::Pop,
            I::Return,
        ]
    );
}

#[test]
fn once_line_uses_a_named_guard() {
    let greet = line("Hi", "greet").with_condition(LineCondition::Once(None));
    let program = compile_ok(&[script(vec![node("Start", vec![Stmt::Line(greet)])])]);
    let guard = format!("{ONCE_PREFIX}greet");
    assert_eq!(
        instructions(&program, "Start"),
        vec![
            I::PushVariable { name: guard.clone() },
            I::PushNumber(1.0),
            I::CallFunction { name: "Bool.Not".into() },
            I::JumpIfFalse { destination: 8 },
            I::PushBool(true),
            I::StoreVariable { name: guard.clone() },
            I::Pop,
            run_line("greet"),
            I::Pop,
            I::Return,
        ]
    );
    assert_eq!(program.initial_values.get(&guard), Some(&Constant::Bool(false)));
}

#[test]
fn once_statement_guard_is_stable_and_position_derived() {
    let once = || Stmt::Once {
        condition: Some(Expr::var("$met")),
        body: vec![Stmt::Line(line("first", "first"))],
        alternate: Some(vec![Stmt::Line(line("again", "again"))]),
        span: Some(Span::new(3, 1, 40)),
    };
    let a = compile_ok(&[script(vec![node("Start", vec![once()])])]);
    let b = compile_ok(&[script(vec![node("Start", vec![once()])])]);
    assert_eq!(a, b);

    let guard = format!("{ONCE_PREFIX}{:08x}", crc32_ieee(b"intro.parl:Start:3:1"));
    assert_eq!(a.initial_values.get(&guard), Some(&Constant::Bool(false)));

    let code = instructions(&a, "Start");
    assert_eq!(code[3], I::PushVariable { name: "$met".into() });
    assert_eq!(code[5], I::CallFunction { name: "Bool.And".into() });
    // corps, puis saut par-dessus l’alternative
    assert_eq!(code[6], I::JumpIfFalse { destination: 13 });
    assert_eq!(code[11], run_line("first"));
    assert_eq!(code[12], I::JumpTo { destination: 15 });
    assert_eq!(code[14], run_line("again"));
    a.validate().unwrap();
}

#[test]
fn line_group_lowering() {
    let rich = Expr::binary(Expr::var("$met"), BinaryOp::And, Expr::binary(Expr::var("$gold"), BinaryOp::Gt, Expr::number(1.0)));
    let items = vec![
        LineGroupItem { line: line("a", "ga").with_condition(LineCondition::If(rich)), body: vec![] },
        LineGroupItem { line: line("b", "gb"), body: vec![] },
    ];
    let program = compile_ok(&[script(vec![node("Start", vec![Stmt::LineGroup { items, span: None }])])]);
    let code = instructions(&program, "Start");
    assert_eq!(code[7], I::AddSaliencyCandidate { content_id: "ga".into(), complexity: 2, destination: 14 });
    assert_eq!(code[8], I::PushBool(true));
    assert_eq!(code[9], I::AddSaliencyCandidate { content_id: "gb".into(), complexity: 0, destination: 17 });
    assert_eq!(
        code[10..],
        [
            I::SelectSaliencyCandidate,
            I::JumpIfFalse { destination: 20 },
            I::Pop,
            I::PeekAndJump,
            I::Pop,
            run_line("ga"),
            I::JumpTo { destination: 21 },
            I::Pop,
            run_line("gb"),
            I::JumpTo { destination: 21 },
            I::Pop,
            I::Return,
        ]
    );
}

/* ───── groupes de nœuds ───── */

fn grouped(title: &str, whens: &[&str], body: Vec<Stmt>) -> NodeDecl {
    let headers = whens.iter().map(|w| HeaderDecl { key: "when".into(), value: (*w).into() }).collect();
    NodeDecl { title: title.into(), headers, body, span: None }
}

fn member_name(title: &str, ordinal: usize) -> String {
    format!("{title}.{:08x}", crc32_ieee(format!("{FILE}:{title}:{ordinal}").as_bytes()))
}

#[test]
fn node_group_hub_lowering() {
    let program = compile_ok(&[script(vec![
        grouped("Greet", &["$met"], vec![Stmt::Line(line("Hi again", "again"))]),
        grouped("Greet", &["once"], vec![Stmt::Line(line("Hello", "hello"))]),
    ])]);
    let (first, second) = (member_name("Greet", 0), member_name("Greet", 1));
    let once = format!("{ONCE_PREFIX}{second}");
    assert_eq!(
        instructions(&program, "Greet"),
        vec![
            I::PushVariable { name: "$met".into() },
            I::AddSaliencyCandidate { content_id: first.clone(), complexity: 1, destination: 10 },
            I::PushVariable { name: once.clone() },
            I::PushNumber(1.0),
            I::CallFunction { name: "Bool.Not".into() },
            I::AddSaliencyCandidate { content_id: second.clone(), complexity: 1, destination: 13 },
            I::SelectSaliencyCandidate,
            I::JumpIfFalse { destination: 19 },
            I::Pop,
            I::PeekAndJump,
            I::Pop,
            I::DetourToNode { name: first.clone() },
            I::Return,
            I::Pop,
            I::PushBool(true),
            I::StoreVariable { name: once.clone() },
            I::Pop,
            I::DetourToNode { name: second.clone() },
            I::Return,
            I::Pop,
            I::Return,
        ]
    );
    assert_eq!(program.initial_values.get(&once), Some(&Constant::Bool(false)));
    for member in [&first, &second] {
        let node = program.node(member).expect("member compiled");
        assert_eq!(node.header(NODE_GROUP_HEADER), Some("Greet"));
    }
    assert_eq!(instructions(&program, &second), vec![run_line("hello"), I::Return]);
}

#[test]
fn node_group_complexity_counts_every_condition() {
    let cases: [(&[&str], usize); 9] = [
        (&["$met"], 1),
        (&["true"], 1),
        (&["!false"], 1),
        (&["$met == true"], 1),
        (&["once"], 1),
        (&["once if $met"], 2),
        (&["once if $met && true"], 3),
        (&["once if $met && true", "always"], 3),
        (&["always"], 0),
    ];
    let nodes = cases.iter().map(|(whens, _)| grouped("Group", whens, vec![])).collect();
    let program = compile_ok(&[script(nodes)]);
    let complexities: Vec<usize> = instructions(&program, "Group")
        .into_iter()
        .filter_map(|i| match i {
            I::AddSaliencyCandidate { complexity, .. } => Some(complexity),
            _ => None,
        })
        .collect();
    assert_eq!(complexities, cases.iter().map(|(_, c)| *c).collect::<Vec<_>>());
}

#[test]
fn node_group_conditions_are_combined() {
    let program = compile_ok(&[script(vec![grouped("Greet", &["$met", "once"], vec![])])]);
    let once = format!("{ONCE_PREFIX}{}", member_name("Greet", 0));
    assert_eq!(
        instructions(&program, "Greet")[..7],
        [
            I::PushVariable { name: "$met".into() },
            I::PushVariable { name: once },
            I::PushNumber(1.0),
            I::CallFunction { name: "Bool.Not".into() },
            I::PushNumber(2.0),
            I::CallFunction { name: "Bool.And".into() },
            I::AddSaliencyCandidate { content_id: member_name("Greet", 0), complexity: 2, destination: 11 },
        ]
    );

    let always = compile_ok(&[script(vec![grouped("Greet", &["always"], vec![])])]);
    assert_eq!(instructions(&always, "Greet")[0], I::PushBool(true));
}

#[test]
fn node_group_diagnostics() {
    let result = compile(
        &[script(vec![
            grouped("Greet", &["$met"], vec![]),
            node("Greet", vec![]),
            grouped("Shop", &["$gold"], vec![]),
            grouped("Shop", &["$nope"], vec![]),
            grouped("Shop", &["once $met"], vec![]),
        ])],
        &Library::with_defaults(),
        None,
    );
    let messages: Vec<&str> = result.diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "condition `$gold` must be a Bool, found Number",
            "undeclared variable `$nope`",
            "invalid `when` header on `Shop`: expected `once if <condition>`, found `once $met`",
            "all nodes in the group `Greet` must have a `when` header (use `when: always` to always run it)",
        ]
    );
    // le nœud sans `when` n’écrase pas le pivot
    assert_eq!(instructions(&result.program, "Greet")[0], I::PushVariable { name: "$met".into() });
}

/* ───── expressions, affectations, commandes ───── */

#[test]
fn smart_variables_are_inlined() {
    let mut s = script(vec![node(
        "Start",
        vec![Stmt::Line(line("rich!", "rich").with_condition(LineCondition::If(Expr::var("$rich"))))],
    )]);
    s.declarations.push(Declaration {
        smart: true,
        ..declare("$rich", Expr::binary(Expr::var("$gold"), BinaryOp::Gt, Expr::number(10.0)))
    });
    let program = compile_ok(&[s]);
    let code = instructions(&program, "Start");
    assert_eq!(
        code[..4],
        [
            I::PushVariable { name: "$gold".into() },
            I::PushNumber(10.0),
            I::PushNumber(2.0),
            I::CallFunction { name: "Number.GreaterThan".into() },
        ]
    );
    assert!(!code.contains(&I::PushVariable { name: "$rich".into() }));
    assert!(!program.initial_values.contains_key("$rich"));
}

#[test]
fn assignments_calls_and_commands() {
    let body = vec![
        Stmt::Set { variable: "$gold".into(), op: AssignOp::Mul, value: Expr::number(2.0), span: None },
        Stmt::Call { name: "round".into(), args: vec![Expr::var("$gold")], span: None },
        Stmt::Command {
            parts: vec![TextPart::Text("give ".into()), TextPart::Expr(Expr::var("$gold")), TextPart::Text(" gems".into())],
            span: None,
        },
        Stmt::Command { parts: vec![TextPart::Text("stop".into())], span: None },
    ];
    let program = compile_ok(&[script(vec![node("Start", vec![Stmt::Jump { target: NodeTarget::Named("Start".into()), span: None }]), node("Shop", body)])]);
    assert_eq!(
        instructions(&program, "Shop"),
        vec![
            I::PushVariable { name: "$gold".into() },
            I::PushNumber(2.0),
            I::PushNumber(2.0),
            I::CallFunction { name: "Number.Multiply".into() },
            I::StoreVariable { name: "$gold".into() },
            I::Pop,
            I::PushVariable { name: "$gold".into() },
            I::PushNumber(1.0),
            I::CallFunction { name: "round".into() },
            I::Pop,
            I::PushVariable { name: "$gold".into() },
            I::RunCommand { text: "give {0} gems".into(), substitutions: 1 },
            I::Stop,
            I::Return,
        ]
    );
}

#[test]
fn jumps_and_detours() {
    let body = vec![
        Stmt::Detour { target: NodeTarget::Named("Shop".into()), span: None },
        Stmt::Jump { target: NodeTarget::Expr(Expr::string("Shop")), span: None },
        Stmt::Detour { target: NodeTarget::Expr(Expr::string("Shop")), span: None },
        Stmt::Return { span: None },
    ];
    let program = compile_ok(&[script(vec![node("Start", body), node("Shop", vec![])])]);
    assert_eq!(
        instructions(&program, "Start"),
        vec![
            I::DetourToNode { name: "Shop".into() },
            I::PushString("Shop".into()),
            I::PeekAndRunNode,
            I::PushString("Shop".into()),
            I::PeekAndDetourToNode,
            I::Pop,
            I::Return,
            I::Return,
        ]
    );
}

#[test]
fn visit_tracking_variables() {
    let seen = Expr::call("visited", vec![Expr::string("Other")]);
    let start = node("Start", vec![Stmt::Line(line("back", "back").with_condition(LineCondition::If(seen)))]);
    let mut always = node("Always", vec![]);
    always.headers.push(HeaderDecl { key: "tracking".into(), value: "always".into() });
    let program = compile_ok(&[script(vec![start, node("Other", vec![]), always])]);

    let var = tracking_variable("Other");
    assert_eq!(program.node("Other").and_then(|n| n.tracking_variable.clone()), Some(var.clone()));
    assert_eq!(program.initial_values.get(&var), Some(&Constant::Number(0.0)));
    assert!(program.node("Always").is_some_and(|n| n.tracking_variable.is_some()));
    assert!(program.node("Start").is_some_and(|n| n.tracking_variable.is_none()));
    assert_eq!(program.node("Always").and_then(|n| n.header("tracking")), Some("always"));
}

/* ───── diagnostics & combinaison ───── */

#[test]
fn duplicate_nodes_and_unknown_targets() {
    let jump = Stmt::Jump { target: NodeTarget::Named("Nowhere".into()), span: None };
    let result = compile(&[script(vec![node("Start", vec![jump]), node("Start", vec![])])], &Library::with_defaults(), None);
    let messages: Vec<String> = result.diagnostics.iter().map(ToString::to_string).collect();
    assert_eq!(
        messages,
        vec![
            "error: duplicate node `Start` (intro.parl)".to_string(),
            "warning: `Start` jumps to unknown node `Nowhere` (intro.parl)".to_string(),
        ]
    );
    assert!(result.has_errors());
    assert_eq!(result.program.nodes.len(), 1);
}

#[test]
fn errors_still_produce_a_partial_program() {
    let bad = Stmt::Set { variable: "$nope".into(), op: AssignOp::Assign, value: Expr::number(1.0), span: None };
    let result = compile(&[script(vec![node("Start", vec![bad, Stmt::Line(line("ok", "ok"))])])], &Library::with_defaults(), None);
    assert_eq!(result.of_severity(Severity::Error).count(), 1);
    assert!(result.program.node("Start").is_some());
    assert!(matches!(result.into_result(false), Err(CompileError { diagnostics }) if diagnostics.len() == 1));
}

#[test]
fn deny_warnings_rejects_warnings() {
    let jump = Stmt::Jump { target: NodeTarget::Named("Later".into()), span: None };
    let result = compile(&[script(vec![node("Start", vec![jump])])], &Library::with_defaults(), None);
    assert!(!result.has_errors());
    assert!(result.clone().into_result(false).is_ok());
    assert!(result.into_result(true).is_err());
}

#[test]
fn combining_with_an_existing_program() {
    let library = Library::with_defaults();
    let first = compile_ok(&[script(vec![node("Start", vec![])])]);

    // le saut vers Start est résolu par le programme existant
    let back = Stmt::Jump { target: NodeTarget::Named("Start".into()), span: None };
    let second = compile(&[script(vec![node("Shop", vec![back])])], &library, Some(first.clone()));
    assert!(second.diagnostics.is_empty(), "{:?}", second.diagnostics);
    assert_eq!(second.program.nodes.keys().cloned().collect::<Vec<_>>(), vec!["Shop".to_string(), "Start".to_string()]);

    let clash = compile(&[script(vec![node("Start", vec![])])], &library, Some(first.clone()));
    assert_eq!(clash.diagnostics[0].message, "duplicate node `Start`");

    let mut other = script(vec![node("Other", vec![])]);
    other.declarations[0] = declare("$gold", Expr::number(5.0));
    let conflict = compile(&[other], &library, Some(first));
    assert_eq!(conflict.diagnostics[0].message, "conflicting declarations for `$gold`");
}

#[test]
fn scripts_share_variables_with_an_existing_program() {
    let library = Library::with_defaults();
    let first = compile_ok(&[script(vec![node("Start", vec![])])]);

    let spend = Stmt::Set { variable: "$gold".into(), op: AssignOp::Add, value: Expr::number(1.0), span: None };
    let shop = Script { file: "shop.parl".into(), declarations: Vec::new(), nodes: vec![node("Shop", vec![spend])] };
    let result = compile(&[shop], &library, Some(first));
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    assert_eq!(result.program.initial_values.get("$gold"), Some(&Constant::Number(0.0)));
    assert_eq!(
        instructions(&result.program, "Shop")[..2],
        [I::PushVariable { name: "$gold".into() }, I::PushNumber(1.0)]
    );

    // le type vient de la valeur initiale reprise
    let wrong = Stmt::Set { variable: "$met".into(), op: AssignOp::Assign, value: Expr::number(1.0), span: None };
    let first = compile_ok(&[script(vec![node("Start", vec![])])]);
    let bad = Script { file: "bad.parl".into(), declarations: Vec::new(), nodes: vec![node("Bad", vec![wrong])] };
    let result = compile(&[bad], &library, Some(first));
    assert_eq!(result.diagnostics[0].message, "cannot assign a Number to `$met` (Bool)");
}

#[test]
fn parse_expression_checks_arity_against_the_library() {
    let library = Library::with_defaults();
    let compiler = Compiler::new(CompilerOptions::default(), &library);
    assert_eq!(compiler.parse_expression("min(1, 2) + 3").unwrap().to_string(), "(min(1, 2) + 3)");
    assert!(compiler.parse_expression("min(1)").is_err());
}

/* ───── propriétés ───── */

fn leaf() -> impl Strategy<Value = Stmt> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|t| Stmt::Line(Line::text(t))),
        (0.0f64..100.0).prop_map(|n| Stmt::Set {
            variable: "$gold".into(),
            op: AssignOp::Add,
            value: Expr::number(n),
            span: None,
        }),
        "[a-z]{1,8}".prop_map(|t| Stmt::Command { parts: vec![TextPart::Text(t)], span: None }),
        Just(Stmt::Line(Line::text("once").with_condition(LineCondition::Once(Some(Expr::var("$met")))))),
    ]
}

fn statement() -> impl Strategy<Value = Stmt> {
    leaf().prop_recursive(3, 24, 3, |inner| {
        let block = || prop::collection::vec(inner.clone(), 0..3);
        prop_oneof![
            (block(), block()).prop_map(|(then, otherwise)| Stmt::If {
                clauses: vec![
                    IfClause { condition: Some(Expr::var("$met")), body: then },
                    IfClause { condition: None, body: otherwise },
                ],
                span: None,
            }),
            prop::collection::vec(block(), 1..4).prop_map(|bodies| Stmt::Options {
                options: bodies
                    .into_iter()
                    .map(|body| ShortcutOption { line: Line::text("choice"), body })
                    .collect(),
                span: None,
            }),
            prop::collection::vec(block(), 1..3).prop_map(|bodies| Stmt::LineGroup {
                items: bodies.into_iter().map(|body| LineGroupItem { line: Line::text("maybe"), body }).collect(),
                span: None,
            }),
            (block(), proptest::option::of(block())).prop_map(|(body, alternate)| Stmt::Once {
                condition: None,
                body,
                alternate,
                span: None,
            }),
        ]
    })
}

proptest! {
    #[test]
    fn compilation_is_idempotent_and_jumps_resolve(body in prop::collection::vec(statement(), 0..6)) {
        let scripts = [script(vec![node("Start", body)])];
        let library = Library::with_defaults();
        let a = compile(&scripts, &library, None);
        let b = compile(&scripts, &library, None);
        prop_assert!(!a.has_errors(), "{:?}", a.diagnostics);
        prop_assert_eq!(&a.program, &b.program);
        prop_assert!(a.program.validate().is_ok());
        prop_assert_eq!(a.program.node("Start").and_then(|n| n.instructions.last()), Some(&I::Return));
    }
}
