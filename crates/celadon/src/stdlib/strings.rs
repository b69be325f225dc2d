//! String receiver functions: `contains`, `startsWith`, `endsWith`, and
//! regex `matches` (also available as a global).

use regex::Regex;

use crate::{
    decls::{FunctionDecl, OverloadDecl},
    dispatch::{Dispatcher, OverloadImpl},
    types::CelType,
    value::{ErrorValue, EvalResult, Value},
};

pub fn declarations(out: &mut Vec<FunctionDecl>) {
    let mut contains = FunctionDecl::new("contains");
    contains.add_overload(OverloadDecl::member(
        "contains_string",
        vec![CelType::String, CelType::String],
        CelType::Bool,
    ));
    out.push(contains);

    let mut starts_with = FunctionDecl::new("startsWith");
    starts_with.add_overload(OverloadDecl::member(
        "starts_with_string",
        vec![CelType::String, CelType::String],
        CelType::Bool,
    ));
    out.push(starts_with);

    let mut ends_with = FunctionDecl::new("endsWith");
    ends_with.add_overload(OverloadDecl::member(
        "ends_with_string",
        vec![CelType::String, CelType::String],
        CelType::Bool,
    ));
    out.push(ends_with);

    let mut matches = FunctionDecl::new("matches");
    matches.add_overload(OverloadDecl::global(
        "matches",
        vec![CelType::String, CelType::String],
        CelType::Bool,
    ));
    matches.add_overload(OverloadDecl::member(
        "matches_string",
        vec![CelType::String, CelType::String],
        CelType::Bool,
    ));
    out.push(matches);
}

fn string_pair(left: &Value, right: &Value, name: &str) -> EvalResult<(std::sync::Arc<str>, std::sync::Arc<str>)> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok((a.clone(), b.clone())),
        _ => Err(ErrorValue::no_such_overload(format!(
            "{name}({}, {})",
            left.type_of(),
            right.type_of()
        ))),
    }
}

fn contains_fn(target: Value, substring: Value) -> EvalResult {
    let (target, substring) = string_pair(&target, &substring, "contains")?;
    Ok(Value::Bool(target.contains(&*substring)))
}

fn starts_with_fn(target: Value, prefix: Value) -> EvalResult {
    let (target, prefix) = string_pair(&target, &prefix, "startsWith")?;
    Ok(Value::Bool(target.starts_with(&*prefix)))
}

fn ends_with_fn(target: Value, suffix: Value) -> EvalResult {
    let (target, suffix) = string_pair(&target, &suffix, "endsWith")?;
    Ok(Value::Bool(target.ends_with(&*suffix)))
}

/// Unanchored RE2-style match; an invalid pattern is a runtime error.
fn matches_fn(target: Value, pattern: Value) -> EvalResult {
    let (target, pattern) = string_pair(&target, &pattern, "matches")?;
    let regex = Regex::new(&pattern).map_err(|err| ErrorValue::new(format!("invalid regex: {err}")))?;
    Ok(Value::Bool(regex.is_match(&target)))
}

pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register(OverloadImpl::binary("contains_string", true, contains_fn));
    dispatcher.register(OverloadImpl::binary("starts_with_string", true, starts_with_fn));
    dispatcher.register(OverloadImpl::binary("ends_with_string", true, ends_with_fn));
    // Regex compilation happens at evaluation; matches is kept out of
    // plan-time folding so the cost stays observable and patterns can come
    // from variables without surprising the embedder.
    dispatcher.register(OverloadImpl::binary("matches", false, matches_fn));
    dispatcher.register(OverloadImpl::binary("matches_string", false, matches_fn));
}
