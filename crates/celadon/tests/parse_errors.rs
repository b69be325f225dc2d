use celadon::{Env, EnvOptions, ParseError};

fn parse_err(source: &str) -> ParseError {
    let env = Env::new(EnvOptions::new());
    env.parse(source).expect_err("expected parse failure")
}

fn has_message(err: &ParseError, needle: &str) -> bool {
    err.issues.iter().any(|issue| issue.message.contains(needle))
}

#[test]
fn truncated_expression() {
    let err = parse_err("1 +");
    assert!(has_message(&err, "expected expression"), "got: {err}");
}

#[test]
fn reserved_keyword_as_identifier() {
    let err = parse_err("while");
    assert!(has_message(&err, "reserved identifier"), "got: {err}");
}

#[test]
fn invalid_escape_sequence() {
    let err = parse_err(r#""\q""#);
    assert!(has_message(&err, "invalid escape sequence"), "got: {err}");
}

#[test]
fn unterminated_string() {
    let err = parse_err("\"abc");
    assert!(has_message(&err, "unterminated string"), "got: {err}");
}

#[test]
fn has_macro_requires_a_field_selection() {
    let err = parse_err("has(foo + 1)");
    assert!(has_message(&err, "invalid argument to has() macro"), "got: {err}");
}

#[test]
fn macro_iteration_variable_must_be_an_identifier() {
    let err = parse_err("xs.all(x.y, true)");
    assert!(has_message(&err, "simple identifier"), "got: {err}");
}

#[test]
fn macro_iteration_variable_cannot_shadow_the_accumulator() {
    let err = parse_err("xs.filter(__result__, true)");
    assert!(has_message(&err, "accumulator"), "got: {err}");
}

#[test]
fn locations_are_one_based_lines_and_columns() {
    let err = parse_err("1 +\n@");
    let issue = err.issues.iter().find(|i| i.message.contains("unexpected")).unwrap();
    assert_eq!(issue.location.line, 2);
    assert_eq!(issue.location.column, 1);
}

#[test]
fn multiple_errors_accumulate() {
    let err = parse_err("@ @");
    assert!(err.issues.len() >= 2, "expected several issues, got: {err}");
}

#[test]
fn deeply_nested_input_aborts_cleanly() {
    let source = format!("{}1{}", "(".repeat(500), ")".repeat(500));
    let err = parse_err(&source);
    assert!(has_message(&err, "nesting is too deep"), "got: {err}");
}
