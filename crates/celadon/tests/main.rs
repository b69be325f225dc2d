use std::sync::Arc;

use celadon::{
    Activation, CelType, Env, EnvOptions, FieldDecl, MapActivation, PartialActivation, StructDecl, StructValue, Value,
};

fn eval_source(env: &Env, source: &str, input: MapActivation) -> Value {
    let ast = env.compile(source).unwrap_or_else(|err| panic!("compile failed for {source:?}: {err}"));
    let program = env.program(&ast);
    program
        .eval(input)
        .unwrap_or_else(|err| panic!("eval failed for {source:?}: {err}"))
}

/// Declared int variable, added to a literal.
#[test]
fn variable_addition() {
    let env = Env::new(EnvOptions::new().with_variable("x", CelType::Int));
    let result = eval_source(&env, "x + 1", MapActivation::new().bind("x", 2i64));
    assert!(result.equals(&Value::Int(3)));
}

/// Constants fold at compile time; no input is needed.
#[test]
fn constant_folding_through_the_pipeline() {
    let env = Env::new(EnvOptions::new().with_constant("ANSWER", CelType::Int, Value::Int(42)));
    let ast = env.compile("ANSWER + 1").unwrap();
    let program = env.program(&ast);
    let result = program.eval(()).unwrap();
    assert!(result.equals(&Value::Int(43)));
}

#[test]
fn exists_macro_over_list() {
    let env = Env::new(EnvOptions::new().with_variable("nums", CelType::List(Box::new(CelType::Int))));
    let result = eval_source(
        &env,
        "nums.exists(n, n % 2 == 0)",
        MapActivation::new().bind("nums", vec![1i64, 3, 4]),
    );
    assert!(result.equals(&Value::Bool(true)));

    let result = eval_source(
        &env,
        "nums.exists(n, n % 2 == 0)",
        MapActivation::new().bind("nums", vec![1i64, 3, 5]),
    );
    assert!(result.equals(&Value::Bool(false)));
}

#[test]
fn struct_fields_and_logic() {
    let env = Env::new(
        EnvOptions::new()
            .with_struct(StructDecl::new(
                "Person",
                vec![
                    FieldDecl::new("name", CelType::String),
                    FieldDecl::new("age", CelType::Int),
                ],
            ))
            .with_variable("person", CelType::Struct("Person".to_owned())),
    );
    let mut person = StructValue::new("Person");
    person.fields.insert("name".to_owned(), Value::string("Ada"));
    person.fields.insert("age".to_owned(), Value::Int(36));

    let result = eval_source(
        &env,
        "person.age >= 21 && person.name != \"\"",
        MapActivation::new().bind("person", Value::Struct(Arc::new(person))),
    );
    assert!(result.equals(&Value::Bool(true)));
}

/// Partial activations make both operands unknown; the unknowns merge.
#[test]
fn partial_activation_yields_merged_unknown() {
    let env = Env::new(
        EnvOptions::new()
            .with_variable("x", CelType::Bool)
            .with_variable("y", CelType::Bool),
    );
    let ast = env.compile("x && y").unwrap();
    let program = env.program(&ast);

    let delegate: Arc<dyn Activation> = Arc::new(MapActivation::new());
    let partial = PartialActivation::new(delegate, vec!["x".to_owned(), "y".to_owned()]);
    let result = program.eval(&partial).unwrap();
    let Value::Unknown(set) = result else {
        panic!("expected unknown, got {result:?}");
    };
    assert_eq!(set.attributes().collect::<Vec<_>>(), vec!["x", "y"]);
}

/// Division by zero type-checks but fails at evaluation with a position.
#[test]
fn division_by_zero_is_a_runtime_error() {
    let env = Env::new(EnvOptions::new());
    let ast = env.compile("1/0").unwrap();
    let program = env.program(&ast);
    let err = program.eval(()).unwrap_err();
    assert!(err.message.contains("division by zero"), "unexpected message: {err}");
    assert!(err.location.is_some());
}

#[test]
fn map_then_filter_projection() {
    let env = Env::new(EnvOptions::new());
    let result = eval_source(&env, "[1, 2, 3].map(i, i * i).filter(i, i > 4)", MapActivation::new());
    assert!(result.equals(&Value::list(vec![Value::Int(9)])));
}

/// Two evaluations of the same program against equal inputs agree.
#[test]
fn evaluation_is_deterministic_and_repeatable() {
    let env = Env::new(EnvOptions::new().with_variable("xs", CelType::List(Box::new(CelType::Int))));
    let ast = env.compile("xs.map(x, x * 2)").unwrap();
    let program = env.program(&ast);

    let first = program.eval([("xs", vec![1i64, 2, 3])]).unwrap();
    let second = program.eval([("xs", vec![1i64, 2, 3])]).unwrap();
    assert!(first.equals(&second));
    assert!(first.equals(&Value::list(vec![Value::Int(2), Value::Int(4), Value::Int(6)])));
}

/// Extending an environment never affects the parent.
#[test]
fn extend_is_independent_of_the_parent() {
    let parent = Env::new(EnvOptions::new().with_variable("a", CelType::Int));
    let child = parent.extend(EnvOptions::new().with_variable("b", CelType::Int));

    assert!(child.compile("a + b").is_ok());
    let err = parent.compile("b").unwrap_err();
    assert!(err.issues.iter().any(|i| i.message.contains("undeclared reference")));
    // The parent still compiles what it always could.
    assert!(parent.compile("a").is_ok());
}

#[test]
fn checked_result_type_is_recorded() {
    let env = Env::new(EnvOptions::new().with_variable("x", CelType::Int));
    let ast = env.compile("x > 1").unwrap();
    assert!(ast.is_checked());
    assert_eq!(ast.result_type(), CelType::Bool);
}
