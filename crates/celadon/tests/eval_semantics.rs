use std::sync::Arc;

use celadon::{
    Activation, CelType, Env, EnvOptions, FieldDecl, MapActivation, PartialActivation, StructDecl, StructValue, Value,
};

fn env() -> Env {
    Env::new(EnvOptions::new())
}

fn eval(source: &str) -> Result<Value, celadon::EvalError> {
    let env = env();
    let ast = env.compile(source).unwrap_or_else(|err| panic!("compile failed for {source:?}: {err}"));
    env.program(&ast).eval(())
}

fn eval_ok(source: &str) -> Value {
    eval(source).unwrap_or_else(|err| panic!("eval failed for {source:?}: {err}"))
}

fn assert_bool(source: &str, expected: bool) {
    let result = eval_ok(source);
    assert!(result.equals(&Value::Bool(expected)), "{source} => {result:?}");
}

// ---- short-circuit absorption ----

#[test]
fn false_and_absorbs_errors() {
    assert_bool("false && 1/0 == 0", false);
    assert_bool("1/0 == 0 && false", false);
    assert_bool("true || 1/0 == 0", true);
    assert_bool("1/0 == 0 || true", true);
}

#[test]
fn non_absorbed_errors_propagate_through_logic() {
    let err = eval("true && 1/0 == 0").unwrap_err();
    assert!(err.message.contains("division by zero"));
    let err = eval("false || 1/0 == 0").unwrap_err();
    assert!(err.message.contains("division by zero"));
}

#[test]
fn ternary_only_evaluates_the_selected_branch() {
    assert_bool("false ? 1/0 == 0 : true", true);
    assert_bool("true ? true : 1/0 == 0", true);
    let err = eval("true ? 1/0 == 0 : false").unwrap_err();
    assert!(err.message.contains("division by zero"));
}

#[test]
fn error_beats_unknown_when_both_occur() {
    let env = Env::new(EnvOptions::new().with_variable("u", CelType::Bool));
    let ast = env.compile("u && 1/0 == 0").unwrap();
    let program = env.program(&ast);
    let delegate: Arc<dyn Activation> = Arc::new(MapActivation::new());
    let partial = PartialActivation::new(delegate, vec!["u".to_owned()]);
    let err = program.eval(&partial).unwrap_err();
    assert!(err.message.contains("division by zero"), "got: {err}");
}

// ---- arithmetic ----

#[test]
fn overflow_is_detected_not_wrapped() {
    let err = eval("9223372036854775807 + 1").unwrap_err();
    assert!(err.message.contains("int overflow"));
    let err = eval("0u - 1u").unwrap_err();
    assert!(err.message.contains("uint overflow"));
    let err = eval("-(-9223372036854775808)").unwrap_err();
    assert!(err.message.contains("int overflow"));
}

#[test]
fn uint_literals_above_int_range() {
    assert_bool("9223372036854775808u > 9223372036854775807u - 1u", true);
    assert_bool("18446744073709551615u == 18446744073709551615u", true);
}

#[test]
fn double_division_follows_ieee() {
    assert_bool("1.0 / 0.0 > 0.0", true);
    let err = eval("0.0 / 0.0 < 1.0").unwrap_err();
    assert!(err.message.contains("NaN"));
}

// ---- equality and ordering ----

#[test]
fn cross_numeric_equality_through_dyn() {
    assert_bool("dyn(1) == 1u", true);
    assert_bool("dyn(1) == 1.0", true);
    assert_bool("dyn(2u) == 2.0", true);
    assert_bool("dyn(-1) == 18446744073709551615u", false);
}

#[test]
fn cross_numeric_ordering_is_declared() {
    assert_bool("1 < 2u", true);
    assert_bool("2u < 3.5", true);
    assert_bool("-1 < 0u", true);
    assert_bool("1.5 >= 1", true);
}

#[test]
fn equality_across_kinds_is_false_not_an_error() {
    assert_bool("dyn(1) == dyn('1')", false);
    assert_bool("dyn(true) == dyn(1)", false);
}

#[test]
fn bytes_and_strings_order_lexicographically() {
    assert_bool("b'abc' < b'abd'", true);
    assert_bool("'abc' < 'abd'", true);
}

#[test]
fn list_and_map_deep_equality() {
    assert_bool("[1, [2, 3]] == [1, [2, 3]]", true);
    assert_bool("{'a': 1, 'b': 2} == {'b': 2, 'a': 1}", true);
    assert_bool("{'a': 1} == {'a': 2}", false);
}

// ---- collections ----

#[test]
fn list_index_out_of_bounds() {
    let err = eval("[1, 2, 3][3]").unwrap_err();
    assert!(err.message.contains("index out of bounds"));
    assert_bool("[1, 2, 3][2] == 3", true);
}

#[test]
fn missing_map_key_errors_without_has_guard() {
    let err = eval("{'a': 1}['b']").unwrap_err();
    assert!(err.message.contains("no such key"));
}

#[test]
fn index_by_error_propagates_the_error() {
    let err = eval("[1, 2][1/0]").unwrap_err();
    assert!(err.message.contains("division by zero"));
}

#[test]
fn membership_operator() {
    assert_bool("3 in [1, 2, 3]", true);
    assert_bool("4 in [1, 2, 3]", false);
    assert_bool("'k' in {'k': 1}", true);
    assert_bool("'x' in {'k': 1}", false);
}

#[test]
fn size_of_strings_counts_code_points() {
    assert_bool("size('héllo') == 5", true);
    assert_bool("'héllo'.size() == 5", true);
    assert_bool("size(b'h\\xc3\\xa9') == 3", true);
    assert_bool("size([1, 2]) == 2", true);
    assert_bool("{'a': 1}.size() == 1", true);
}

#[test]
fn repeated_map_literal_keys_error() {
    let err = eval("{'a': 1, 'a': 2}").unwrap_err();
    assert!(err.message.contains("repeated key"));
}

#[test]
fn cross_numeric_map_keys_unify() {
    let err = eval("{1: 'a', 1u: 'b'}").unwrap_err();
    assert!(err.message.contains("repeated key"));
}

// ---- comprehensions ----

#[test]
fn quantifiers() {
    assert_bool("[1, 2, 3].all(x, x > 0)", true);
    assert_bool("[1, -2, 3].all(x, x > 0)", false);
    assert_bool("[1, 2, 3].exists(x, x == 2)", true);
    assert_bool("[1, 2, 3].exists_one(x, x > 2)", true);
    assert_bool("[1, 2, 3].exists_one(x, x > 1)", false);
    assert_bool("[].all(x, 1/0 == 0)", true);
}

#[test]
fn quantifiers_absorb_errors_like_their_operators() {
    // One failing predicate cannot veto an exists that finds a witness.
    assert_bool("[0, 1].exists(x, 1 / x > 0)", true);
    // all short-circuits on the first false even with later errors.
    assert_bool("[0, 1].all(x, x > 0)", false);
}

#[test]
fn two_variable_comprehensions() {
    assert_bool("{'a': 1, 'b': 2}.all(k, v, v > 0)", true);
    assert_bool("{'a': 1, 'b': 2}.exists(k, v, k == 'b' && v == 2)", true);
    // The two-variable list form binds (index, element).
    assert_bool("['x', 'y'].all(i, e, i < 2 && e != '')", true);
}

#[test]
fn map_comprehension_iterates_keys_in_insertion_order() {
    let result = eval_ok("{'b': 1, 'a': 2}.map(k, k)");
    assert!(result.equals(&Value::list(vec![Value::string("b"), Value::string("a")])));
}

#[test]
fn filtered_map_macro() {
    let result = eval_ok("[1, 2, 3, 4].map(i, i % 2 == 0, i * 10)");
    assert!(result.equals(&Value::list(vec![Value::Int(20), Value::Int(40)])));
}

// ---- presence tests and struct defaults ----

#[test]
fn has_on_maps_reflects_key_presence() {
    assert_bool("has({'f': 1}.f)", true);
    assert_bool("has({'g': 1}.f)", false);
}

#[test]
fn unset_struct_fields_read_as_typed_defaults() {
    let env = Env::new(
        EnvOptions::new()
            .with_struct(StructDecl::new(
                "Person",
                vec![
                    FieldDecl::new("name", CelType::String),
                    FieldDecl::new("age", CelType::Int),
                    FieldDecl::new("tags", CelType::List(Box::new(CelType::String))),
                ],
            ))
            .with_variable("person", CelType::Struct("Person".to_owned())),
    );
    let mut person = StructValue::new("Person");
    person.fields.insert("name".to_owned(), Value::string("Ada"));
    let input = MapActivation::new().bind("person", Value::Struct(Arc::new(person)));

    let check = |source: &str, expected: bool| {
        let ast = env.compile(source).unwrap();
        let result = env.program(&ast).eval(&input).unwrap();
        assert!(result.equals(&Value::Bool(expected)), "{source} => {result:?}");
    };
    check("person.age == 0", true);
    check("person.tags == []", true);
    check("has(person.name)", true);
    check("has(person.age)", false);
}

#[test]
fn struct_literals_evaluate_and_compare() {
    let env = Env::new(EnvOptions::new().with_struct(StructDecl::new(
        "Point",
        vec![FieldDecl::new("x", CelType::Int), FieldDecl::new("y", CelType::Int)],
    )));
    let ast = env.compile("Point{x: 1, y: 2} == Point{x: 1, y: 2}").unwrap();
    let result = env.program(&ast).eval(()).unwrap();
    assert!(result.equals(&Value::Bool(true)));
}

// ---- optionals ----

#[test]
fn optional_navigation_over_maps() {
    assert_bool("{'k': 1}.?k.hasValue()", true);
    assert_bool("{'k': 1}.?missing.hasValue()", false);
    assert_bool("{'k': 1}.?k.value() == 1", true);
    assert_bool("{'k': 1}.?missing.orValue(42) == 42", true);
    assert_bool("{'k': 1}[?'k'].value() == 1", true);
    assert_bool("[1, 2][?5].orValue(0) == 0", true);
}

#[test]
fn optional_constructors_and_entries() {
    assert_bool("optional.of(5).hasValue()", true);
    assert_bool("optional.none().hasValue()", false);
    assert_bool("optional.ofNonZeroValue(0).hasValue()", false);
    let err = eval("optional.none().value()").unwrap_err();
    assert!(err.message.contains("optional.none() dereference"));

    let result = eval_ok("[1, ?optional.none(), 3]");
    assert!(result.equals(&Value::list(vec![Value::Int(1), Value::Int(3)])));
    let result = eval_ok("{'a': 1, ?'b': optional.none(), ?'c': optional.of(3)}");
    let Value::Map(map) = result else { panic!("expected map") };
    assert_eq!(map.len(), 2);
}

#[test]
fn opt_map_and_opt_flat_map() {
    assert_bool("optional.of(5).optMap(v, v * 2).value() == 10", true);
    assert_bool("optional.none().optMap(v, v * 2).hasValue()", false);
    assert_bool("optional.of(5).optFlatMap(v, optional.of(v + 1)).value() == 6", true);
}

// ---- temporal ----

#[test]
fn timestamp_arithmetic_and_accessors() {
    assert_bool("timestamp('2023-06-01T12:30:45Z').getFullYear() == 2023", true);
    assert_bool("timestamp('2023-06-01T12:30:45Z').getMonth() == 5", true);
    assert_bool("timestamp('2023-06-01T12:30:45Z').getHours(\"+02:00\") == 14", true);
    assert_bool(
        "timestamp('2023-06-01T00:00:00Z') + duration('1h') == timestamp('2023-06-01T01:00:00Z')",
        true,
    );
    assert_bool(
        "timestamp('2023-06-02T00:00:00Z') - timestamp('2023-06-01T00:00:00Z') == duration('24h')",
        true,
    );
    assert_bool("duration('90m').getMinutes() == 90", true);
}

#[test]
fn timestamp_range_violations_error() {
    let err = eval("timestamp('9999-12-31T23:59:59Z') + duration('1h')").unwrap_err();
    assert!(err.message.contains("timestamp out of range"));
}

#[test]
fn named_time_zones_are_rejected() {
    let err = eval("timestamp('2023-06-01T12:00:00Z').getHours('America/New_York')").unwrap_err();
    assert!(err.message.contains("unsupported time zone"));
}

// ---- strings and conversions ----

#[test]
fn string_predicates_and_matches() {
    assert_bool("'hello world'.contains('lo w')", true);
    assert_bool("'hello'.startsWith('he')", true);
    assert_bool("'hello'.endsWith('lo')", true);
    assert_bool("'foobar'.matches('fo+.*')", true);
    assert_bool("matches('foobar', 'o{2}')", true);
    let err = eval("'x'.matches('(')").unwrap_err();
    assert!(err.message.contains("invalid regex"));
}

#[test]
fn conversions() {
    assert_bool("int('42') == 42", true);
    assert_bool("int(3.9) == 3", true);
    assert_bool("uint(7) == 7u", true);
    assert_bool("double('2.5') == 2.5", true);
    assert_bool("string(42) == '42'", true);
    assert_bool("string(duration('90s')) == '90s'", true);
    assert_bool("bytes('abc') == b'abc'", true);
    assert_bool("string(b'abc') == 'abc'", true);
    assert_bool("bool('true')", true);
    let err = eval("int('forty-two')").unwrap_err();
    assert!(err.message.contains("invalid int"));
    let err = eval("uint(-1)").unwrap_err();
    assert!(err.message.contains("uint overflow"));
}

#[test]
fn type_function_and_type_values() {
    assert_bool("type(1) == int", true);
    assert_bool("type('a') == string", true);
    assert_bool("type(1) != type(1u)", true);
    assert_bool("type(type(1)) == type", true);
}
