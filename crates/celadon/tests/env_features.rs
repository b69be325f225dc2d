use std::sync::Arc;

use celadon::{
    Activation, CelType, EnumDecl, Env, EnvOptions, ErrorValue, FunctionDecl, HierarchicalActivation, LazyActivation,
    MapActivation, OverloadDecl, OverloadImpl, Value,
};

#[test]
fn container_resolution_prefers_the_most_specific_name() {
    let env = Env::new(
        EnvOptions::new()
            .with_container("a.b")
            .with_variable("a.b.x", CelType::Int)
            .with_variable("x", CelType::String),
    );
    let ast = env.compile("x").unwrap();
    assert_eq!(ast.result_type(), CelType::Int);

    let program = env.program(&ast);
    let result = program
        .eval(MapActivation::new().bind("a.b.x", 7i64).bind("x", "shadowed"))
        .unwrap();
    assert!(result.equals(&Value::Int(7)));
}

#[test]
fn leading_dot_names_bypass_the_container() {
    let env = Env::new(
        EnvOptions::new()
            .with_container("a.b")
            .with_variable("a.b.x", CelType::Int)
            .with_variable("x", CelType::String),
    );
    let ast = env.compile(".x").unwrap();
    assert_eq!(ast.result_type(), CelType::String);
}

#[test]
fn enum_constants_and_conversions() {
    let env = Env::new(EnvOptions::new().with_enum(EnumDecl::new(
        "Color",
        vec![("RED".to_owned(), 0), ("BLUE".to_owned(), 2)],
    )));
    let eval = |source: &str| {
        let ast = env.compile(source).unwrap_or_else(|err| panic!("compile failed for {source:?}: {err}"));
        env.program(&ast).eval(()).unwrap_or_else(|err| panic!("eval failed for {source:?}: {err}"))
    };
    assert!(eval("Color.BLUE == Color(2)").equals(&Value::Bool(true)));
    assert!(eval("int(Color.BLUE) == 2").equals(&Value::Bool(true)));
    assert!(eval("Color.RED == Color.BLUE").equals(&Value::Bool(false)));
    // Enums compare with ints by value.
    assert!(eval("dyn(Color.BLUE) == 2").equals(&Value::Bool(true)));
}

#[test]
fn enum_values_as_int_types_constants_as_int() {
    let options = EnvOptions::new().with_enum(EnumDecl::new("Color", vec![("BLUE".to_owned(), 2)]));
    let as_enum = Env::new(options.clone());
    let as_int = Env::new(EnvOptions {
        enum_values_as_int: true,
        ..options
    });

    let ast = as_enum.compile("type(Color.BLUE) == int").unwrap();
    let result = as_enum.program(&ast).eval(()).unwrap();
    assert!(result.equals(&Value::Bool(false)));

    let ast = as_int.compile("type(Color.BLUE) == int").unwrap();
    let result = as_int.program(&ast).eval(()).unwrap();
    assert!(result.equals(&Value::Bool(true)));
}

#[test]
fn user_functions_declare_and_dispatch() {
    let env = Env::new(
        EnvOptions::new()
            .with_function(
                FunctionDecl::new("shout")
                    .with_overload(OverloadDecl::global("shout_string", vec![CelType::String], CelType::String)),
            )
            .with_function_impl(OverloadImpl::unary("shout_string", false, |value| match value {
                Value::String(s) => Ok(Value::string(&s.to_uppercase())),
                other => Err(ErrorValue::no_such_overload(format!("shout({})", other.type_of()))),
            })),
    );
    let ast = env.compile("shout('hi') == 'HI'").unwrap();
    let result = env.program(&ast).eval(()).unwrap();
    assert!(result.equals(&Value::Bool(true)));
}

#[test]
fn user_member_functions_take_the_receiver_first() {
    let env = Env::new(
        EnvOptions::new()
            .with_function(
                FunctionDecl::new("repeated")
                    .with_overload(OverloadDecl::member(
                        "string_repeated_int",
                        vec![CelType::String, CelType::Int],
                        CelType::String,
                    )),
            )
            .with_function_impl(OverloadImpl::binary("string_repeated_int", true, |target, count| {
                match (&target, &count) {
                    (Value::String(s), Value::Int(n)) => {
                        let n = usize::try_from(*n).unwrap_or(0);
                        Ok(Value::string(&s.repeat(n)))
                    }
                    _ => Err(ErrorValue::no_such_overload("repeated")),
                }
            })),
    );
    let ast = env.compile("'ab'.repeated(3) == 'ababab'").unwrap();
    let result = env.program(&ast).eval(()).unwrap();
    assert!(result.equals(&Value::Bool(true)));
}

#[test]
fn unchecked_programs_evaluate_in_dyn_mode() {
    let env = Env::new(EnvOptions {
        disable_type_checking: true,
        ..EnvOptions::new()
    });
    // `x` is never declared; the runtime resolves it from the activation.
    let ast = env.compile("x + 1").unwrap();
    assert!(!ast.is_checked());
    let program = env.program(&ast);
    let result = program.eval([("x", 2i64)]).unwrap();
    assert!(result.equals(&Value::Int(3)));

    // A runtime type mismatch surfaces as a missing-overload error.
    let err = program.eval([("x", "two")]).unwrap_err();
    assert!(err.message.contains("no such overload"), "got: {err}");
}

#[test]
fn disabled_standard_library_removes_operators() {
    let env = Env::new(EnvOptions {
        disable_standard_library: true,
        ..EnvOptions::new()
    });
    let err = env.compile("1 + 1").unwrap_err();
    assert!(err.issues.iter().any(|i| i.message.contains("undeclared reference")), "got: {err}");
}

#[test]
fn macros_can_be_disabled() {
    let env = Env::new(EnvOptions {
        disable_macros: true,
        disable_type_checking: true,
        ..EnvOptions::new()
    });
    // Without expansion `all` is a plain (undeclared) member function.
    let ast = env.compile("[1].all(x, true)").unwrap();
    let err = env.program(&ast).eval(()).unwrap_err();
    assert!(err.message.contains("undeclared reference to 'all'"), "got: {err}");
}

#[test]
fn layered_activations_resolve_through_programs() {
    let env = Env::new(
        EnvOptions::new()
            .with_variable("base", CelType::Int)
            .with_variable("derived", CelType::Int),
    );
    let ast = env.compile("base + derived").unwrap();
    let program = env.program(&ast);

    let parent: Arc<dyn Activation> = Arc::new(MapActivation::new().bind("base", 10i64).bind("derived", 1i64));
    let child: Arc<dyn Activation> = Arc::new(MapActivation::new().bind("derived", 32i64));
    let layered = HierarchicalActivation::new(parent, child);
    let result = program.eval(&layered).unwrap();
    assert!(result.equals(&Value::Int(42)));
}

#[test]
fn lazy_activation_converts_on_demand() {
    let env = Env::new(EnvOptions::new().with_variable("expensive", CelType::Int));
    let ast = env.compile("expensive * 2").unwrap();
    let program = env.program(&ast);

    let lazy = LazyActivation::new().bind("expensive", || Value::Int(21));
    let result = program.eval(&lazy).unwrap();
    assert!(result.equals(&Value::Int(42)));
}

#[test]
fn overriding_a_standard_overload_replaces_its_binding() {
    // Re-registering `add_int64` changes + for ints only.
    let env = Env::new(EnvOptions::new().with_function_impl(OverloadImpl::binary("add_int64", true, |a, b| {
        match (&a, &b) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int((a + b) * 100)),
            _ => Err(ErrorValue::no_such_overload("add")),
        }
    })));
    let ast = env.compile("1 + 2").unwrap();
    let result = env.program(&ast).eval(()).unwrap();
    assert!(result.equals(&Value::Int(300)));
}
