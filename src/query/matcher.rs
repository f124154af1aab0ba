use crate::core::context::Bindings;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, FieldValue};
use crate::query::ast::{CompareOp, Expr, LikePattern};

/// Read access to the attributes of the document currently being matched
pub trait Attributes {
    fn attribute(&self, field: &str) -> Option<&FieldValue>;
}

impl Attributes for Document {
    fn attribute(&self, field: &str) -> Option<&FieldValue> {
        self.get_field(field)
    }
}

/// Everything an expression can read while being evaluated
pub struct Scope<'a> {
    pub bindings: &'a Bindings,
    pub attributes: Option<&'a dyn Attributes>,
}

impl<'a> Scope<'a> {
    pub fn new(bindings: &'a Bindings) -> Self {
        Scope { bindings, attributes: None }
    }

    pub fn with_document(bindings: &'a Bindings, attributes: &'a dyn Attributes) -> Self {
        Scope { bindings, attributes: Some(attributes) }
    }
}

/// Missing variables surface as NotFound so callers can tell "unbound" from bad input
pub fn unbound_variable(name: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::NotFound, format!("Variable {} is not bound", name))
}

pub fn is_unbound(err: &Error) -> bool {
    err.kind == ErrorKind::NotFound
}

pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<FieldValue> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Var(var) => scope.bindings
            .get(*var)
            .cloned()
            .ok_or_else(|| unbound_variable(var)),

        Expr::Field(path) => {
            let attributes = scope.attributes.ok_or_else(|| {
                Error::new(ErrorKind::InvalidState, format!("No document in scope for '{}'", path))
            })?;
            Ok(resolve_field(attributes, path))
        }

        Expr::Attribute(var, path) => {
            let value = scope.bindings.get(*var).ok_or_else(|| unbound_variable(var))?;
            Ok(resolve_path(value, path.split('.')))
        }

        Expr::Compare(op, lhs, rhs) => {
            let l = evaluate(lhs, scope)?;
            let r = evaluate(rhs, scope)?;
            Ok(FieldValue::Boolean(compare_values(*op, &l, &r)))
        }

        // Short-circuit like the boolean clauses of a bool query
        Expr::And(items) => {
            for item in items {
                if !evaluate(item, scope)?.is_truthy() {
                    return Ok(FieldValue::Boolean(false));
                }
            }
            Ok(FieldValue::Boolean(true))
        }

        Expr::Or(items) => {
            for item in items {
                if evaluate(item, scope)?.is_truthy() {
                    return Ok(FieldValue::Boolean(true));
                }
            }
            Ok(FieldValue::Boolean(false))
        }

        Expr::Not(inner) => Ok(FieldValue::Boolean(!evaluate(inner, scope)?.is_truthy())),

        Expr::In(needle, haystack) => {
            let n = evaluate(needle, scope)?;
            let h = evaluate(haystack, scope)?;
            Ok(FieldValue::Boolean(contains_value(&h, &n)))
        }

        Expr::Like(inner, pattern) => {
            let value = evaluate(inner, scope)?;
            Ok(FieldValue::Boolean(like_matches(pattern, &value)))
        }

        // Boost only affects scoring, the match decision is the inner expression's
        Expr::Boost(inner, _) => evaluate(inner, scope),

        Expr::Call(function, args) => {
            let values = args.iter()
                .map(|arg| evaluate(arg, scope))
                .collect::<Result<Vec<_>>>()?;
            (function.call)(&values)
        }
    }
}

pub fn compare_values(op: CompareOp, lhs: &FieldValue, rhs: &FieldValue) -> bool {
    match op {
        CompareOp::Eq => lhs.loose_eq(rhs),
        CompareOp::Ne => !lhs.loose_eq(rhs),
        CompareOp::Lt => lhs.compare(rhs).is_lt(),
        CompareOp::Le => lhs.compare(rhs).is_le(),
        CompareOp::Gt => lhs.compare(rhs).is_gt(),
        CompareOp::Ge => lhs.compare(rhs).is_ge(),
    }
}

/// Membership test; a non-array haystack never contains anything
pub fn contains_value(haystack: &FieldValue, needle: &FieldValue) -> bool {
    match haystack {
        FieldValue::Array(items) => items.iter().any(|item| item.loose_eq(needle)),
        _ => false,
    }
}

pub fn like_matches(pattern: &LikePattern, value: &FieldValue) -> bool {
    match value {
        FieldValue::Text(text) => pattern.regex.is_match(text),
        _ => false,
    }
}

/// Resolves `a.b.c` against the document, missing parts yield null
pub fn resolve_field(attributes: &dyn Attributes, path: &str) -> FieldValue {
    if let Some(value) = attributes.attribute(path) {
        return value.clone();
    }

    let mut parts = path.split('.');
    let head = parts.next().unwrap_or(path);
    match attributes.attribute(head) {
        Some(value) => resolve_path(value, parts),
        None => FieldValue::Null,
    }
}

fn resolve_path<'p>(value: &FieldValue, parts: impl Iterator<Item = &'p str>) -> FieldValue {
    let mut current = value;
    for part in parts {
        match current {
            FieldValue::Object(map) => match map.get(part) {
                Some(next) => current = next,
                None => return FieldValue::Null,
            },
            _ => return FieldValue::Null,
        }
    }
    current.clone()
}
