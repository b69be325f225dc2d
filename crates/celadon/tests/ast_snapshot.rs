use celadon::{Ast, CelType, Env, EnvOptions};
use pretty_assertions::assert_eq;

fn env() -> Env {
    Env::new(
        EnvOptions::new()
            .with_variable("x", CelType::Int)
            .with_variable("xs", CelType::List(Box::new(CelType::Int))),
    )
}

/// A parsed AST survives a serde round trip structurally intact.
#[test]
fn parsed_ast_round_trips_through_json() {
    let env = env();
    let ast = env.parse("xs.map(i, i + x) + [x]").unwrap();

    let json = serde_json::to_string(&ast).unwrap();
    let restored: Ast = serde_json::from_str(&json).unwrap();

    assert_eq!(ast.expr, restored.expr);
    assert_eq!(ast.is_checked(), restored.is_checked());
    assert_eq!(
        ast.source_info.location(ast.expr.id),
        restored.source_info.location(restored.expr.id)
    );
}

/// Checked ASTs keep their type and reference tables through serialization.
#[test]
fn checked_ast_keeps_its_side_tables() {
    let env = env();
    let ast = env.compile("xs.exists(i, i == x)").unwrap();

    let json = serde_json::to_string(&ast).unwrap();
    let restored: Ast = serde_json::from_str(&json).unwrap();

    assert!(restored.is_checked());
    assert_eq!(restored.result_type(), CelType::Bool);
    assert_eq!(ast.type_map, restored.type_map);
    assert_eq!(ast.ref_map, restored.ref_map);
}

/// The macro-call table records the surface form of every expansion, keyed
/// by the id of the node that replaced it.
#[test]
fn macro_calls_record_pre_expansion_forms() {
    let env = env();
    let ast = env.parse("xs.map(i, i * 2).exists(j, j == x)").unwrap();
    assert_eq!(ast.source_info.macro_call_count(), 2);

    // The root node is the exists expansion; its recorded call names the
    // original macro.
    let call = ast.source_info.macro_call(ast.expr.id).expect("macro call for root");
    let celadon::ExprKind::Call { function, .. } = &call.kind else {
        panic!("expected recorded call, got {call:?}");
    };
    assert_eq!(function, "exists");
}

/// A restored AST plans and evaluates identically.
#[test]
fn restored_ast_evaluates_like_the_original() {
    let env = env();
    let ast = env.compile("xs.filter(i, i > x)").unwrap();
    let json = serde_json::to_string(&ast).unwrap();
    let restored: Ast = serde_json::from_str(&json).unwrap();

    let input = celadon::MapActivation::new().bind("xs", vec![1i64, 5, 9]).bind("x", 4i64);
    let first = env.program(&ast).eval(&input).unwrap();
    let second = env.program(&restored).eval(&input).unwrap();
    assert!(first.equals(&second));
    assert!(first.equals(&celadon::Value::list(vec![celadon::Value::Int(5), celadon::Value::Int(9)])));
}
