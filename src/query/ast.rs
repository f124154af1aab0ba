use std::fmt;
use std::sync::Arc;
use regex::Regex;
use crate::core::error::{Error, Result};
use crate::core::types::{FieldValue, VariableId};
use crate::query::matcher::{self, Scope};
use crate::query::validator::ValidationConfig;

/// Capability the search layer needs from an expression.
///
/// The filter compiler and the classifier only talk to expressions through
/// this trait; [`Expr`] is the implementation shipped with the crate.
pub trait Expression: fmt::Debug + Send + Sync {
    /// Same inputs always give the same output, no hidden side effects
    fn is_deterministic(&self) -> bool;

    /// Referenced variables in order of first appearance, without duplicates
    fn free_variables(&self) -> Vec<VariableId>;

    fn evaluate(&self, scope: &Scope<'_>) -> Result<FieldValue>;

    /// Value of the expression if it can be folded without bindings or a document
    fn as_constant(&self) -> Option<FieldValue> {
        None
    }

    /// Expression-level boost factor (BOOST wrapper), 1.0 when absent
    fn boost(&self) -> Result<f32> {
        Ok(1.0)
    }

    /// (field, term) pairs the expression matches on; drives scorer statistics
    fn terms(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Structural checks performed at compile time
    fn validate(&self, _config: &ValidationConfig) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

pub type FunctionImpl = dyn Fn(&[FieldValue]) -> Result<FieldValue> + Send + Sync;

/// Host-provided function callable from expressions
#[derive(Clone)]
pub struct Function {
    pub name: String,
    pub deterministic: bool,
    pub call: Arc<FunctionImpl>,
}

impl Function {
    pub fn new<F>(name: impl Into<String>, deterministic: bool, call: F) -> Self
    where
        F: Fn(&[FieldValue]) -> Result<FieldValue> + Send + Sync + 'static,
    {
        Function {
            name: name.into(),
            deterministic,
            call: Arc::new(call),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("deterministic", &self.deterministic)
            .finish()
    }
}

/// LIKE pattern: `%` matches any run of characters, `_` exactly one
#[derive(Debug, Clone)]
pub struct LikePattern {
    pub source: String,
    pub regex: Regex,
}

impl LikePattern {
    pub fn new(source: &str) -> Result<Self> {
        let mut pattern = String::with_capacity(source.len() + 8);
        pattern.push('^');
        let mut escaped = false;
        for c in source.chars() {
            match c {
                '\\' if !escaped => {
                    escaped = true;
                    continue;
                }
                '%' if !escaped => pattern.push_str(".*"),
                '_' if !escaped => pattern.push('.'),
                _ => pattern.push_str(&regex::escape(&c.to_string())),
            }
            escaped = false;
        }
        pattern.push('$');

        Ok(LikePattern {
            source: source.to_string(),
            regex: Regex::new(&pattern)?,
        })
    }
}

/// Expression tree evaluated per document
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(FieldValue),
    Var(VariableId),                         // Whole value of a variable
    Field(String),                           // Attribute of the document being searched
    Attribute(VariableId, String),           // Attribute of a bound object variable
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    In(Box<Expr>, Box<Expr>),                // Needle IN haystack array
    Like(Box<Expr>, LikePattern),
    Boost(Box<Expr>, Box<Expr>),             // BOOST(expr, factor)
    Call(Function, Vec<Expr>),
}

impl Expr {
    pub fn lit(value: impl Into<FieldValue>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn var(var: VariableId) -> Self {
        Expr::Var(var)
    }

    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn attribute(var: VariableId, name: impl Into<String>) -> Self {
        Expr::Attribute(var, name.into())
    }

    pub fn compare(op: CompareOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Compare(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::compare(CompareOp::Eq, lhs, rhs)
    }

    pub fn ne(lhs: Expr, rhs: Expr) -> Self {
        Self::compare(CompareOp::Ne, lhs, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Self {
        Self::compare(CompareOp::Lt, lhs, rhs)
    }

    pub fn le(lhs: Expr, rhs: Expr) -> Self {
        Self::compare(CompareOp::Le, lhs, rhs)
    }

    pub fn gt(lhs: Expr, rhs: Expr) -> Self {
        Self::compare(CompareOp::Gt, lhs, rhs)
    }

    pub fn ge(lhs: Expr, rhs: Expr) -> Self {
        Self::compare(CompareOp::Ge, lhs, rhs)
    }

    pub fn and(exprs: Vec<Expr>) -> Self {
        Expr::And(exprs)
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn in_array(needle: Expr, haystack: Expr) -> Self {
        Expr::In(Box::new(needle), Box::new(haystack))
    }

    pub fn like(expr: Expr, pattern: &str) -> Result<Self> {
        Ok(Expr::Like(Box::new(expr), LikePattern::new(pattern)?))
    }

    pub fn boost(expr: Expr, factor: Expr) -> Self {
        Expr::Boost(Box::new(expr), Box::new(factor))
    }

    pub fn call(function: Function, args: Vec<Expr>) -> Self {
        Expr::Call(function, args)
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Var(_) | Expr::Field(_) | Expr::Attribute(_, _) => Vec::new(),
            Expr::Compare(_, lhs, rhs) | Expr::In(lhs, rhs) | Expr::Boost(lhs, rhs) => {
                vec![lhs.as_ref(), rhs.as_ref()]
            }
            Expr::And(items) | Expr::Or(items) | Expr::Call(_, items) => items.iter().collect(),
            Expr::Not(inner) | Expr::Like(inner, _) => vec![inner.as_ref()],
        }
    }

    pub fn depth(&self) -> usize {
        1 + self.children().into_iter().map(Expr::depth).max().unwrap_or(0)
    }

    /// True if the expression reads attributes of the document being searched
    pub fn references_document(&self) -> bool {
        matches!(self, Expr::Field(_)) || self.children().into_iter().any(Expr::references_document)
    }

    fn collect_variables(&self, out: &mut Vec<VariableId>) {
        match self {
            Expr::Var(v) | Expr::Attribute(v, _) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            _ => {
                for child in self.children() {
                    child.collect_variables(out);
                }
            }
        }
    }

    fn collect_terms(&self, out: &mut Vec<(String, String)>) {
        match self {
            Expr::Compare(CompareOp::Eq, lhs, rhs) => match (lhs.as_ref(), rhs.as_ref()) {
                (Expr::Field(f), Expr::Literal(FieldValue::Text(t)))
                | (Expr::Literal(FieldValue::Text(t)), Expr::Field(f)) => {
                    out.push((f.clone(), t.clone()));
                }
                _ => {}
            },
            Expr::In(needle, haystack) => {
                if let (Expr::Field(f), Expr::Literal(FieldValue::Array(items))) =
                    (needle.as_ref(), haystack.as_ref())
                {
                    for item in items {
                        if let FieldValue::Text(t) = item {
                            out.push((f.clone(), t.clone()));
                        }
                    }
                }
            }
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_terms(out);
                }
            }
            Expr::Boost(inner, _) => inner.collect_terms(out),
            // Negated terms do not contribute to relevance
            _ => {}
        }
    }

    fn fold(&self) -> Option<FieldValue> {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::Var(_) | Expr::Field(_) | Expr::Attribute(_, _) => None,
            Expr::Compare(op, lhs, rhs) => {
                let (l, r) = (lhs.fold()?, rhs.fold()?);
                Some(FieldValue::Boolean(matcher::compare_values(*op, &l, &r)))
            }
            Expr::And(items) => {
                let mut all_constant = true;
                for item in items {
                    match item.fold() {
                        Some(v) if !v.is_truthy() => return Some(FieldValue::Boolean(false)),
                        Some(_) => {}
                        None => all_constant = false,
                    }
                }
                all_constant.then_some(FieldValue::Boolean(true))
            }
            Expr::Or(items) => {
                let mut all_constant = true;
                for item in items {
                    match item.fold() {
                        Some(v) if v.is_truthy() => return Some(FieldValue::Boolean(true)),
                        Some(_) => {}
                        None => all_constant = false,
                    }
                }
                all_constant.then_some(FieldValue::Boolean(false))
            }
            Expr::Not(inner) => inner.fold().map(|v| FieldValue::Boolean(!v.is_truthy())),
            Expr::In(needle, haystack) => {
                let (n, h) = (needle.fold()?, haystack.fold()?);
                Some(FieldValue::Boolean(matcher::contains_value(&h, &n)))
            }
            Expr::Like(inner, pattern) => {
                let v = inner.fold()?;
                Some(FieldValue::Boolean(matcher::like_matches(pattern, &v)))
            }
            Expr::Boost(inner, _) => inner.fold(),
            Expr::Call(function, args) => {
                if !function.deterministic {
                    return None;
                }
                let values = args.iter().map(Expr::fold).collect::<Option<Vec<_>>>()?;
                (function.call)(&values).ok()
            }
        }
    }

    fn validate_node(&self, config: &ValidationConfig) -> Result<()> {
        match self {
            Expr::Compare(op, lhs, rhs) => {
                let target = match (lhs.as_ref(), rhs.as_ref()) {
                    (Expr::Field(_), other) | (other, Expr::Field(_)) => other.fold(),
                    _ => None,
                };
                if let Some(value) = target {
                    if !value.is_scalar() {
                        return Err(Error::bad_parameter(format!(
                            "'{}' expects a scalar value to match against an attribute, got {}",
                            op.symbol(),
                            value.type_name()
                        )));
                    }
                }
            }
            Expr::In(_, haystack) => {
                if let Some(value) = haystack.fold() {
                    match value {
                        FieldValue::Array(items) => {
                            if items.len() > config.max_array_len {
                                return Err(Error::bad_parameter(format!(
                                    "IN array has {} elements, max is {}",
                                    items.len(),
                                    config.max_array_len
                                )));
                            }
                            if let Some(bad) = items.iter().find(|v| !v.is_scalar()) {
                                return Err(Error::bad_parameter(format!(
                                    "IN expects a flat array of scalars, found nested {}",
                                    bad.type_name()
                                )));
                            }
                        }
                        other => {
                            return Err(Error::bad_parameter(format!(
                                "IN expects an array, got {}",
                                other.type_name()
                            )));
                        }
                    }
                }
            }
            Expr::Boost(_, factor) => {
                boost_factor(factor)?;
            }
            _ => {}
        }

        for child in self.children() {
            child.validate_node(config)?;
        }
        Ok(())
    }
}

fn boost_factor(factor: &Expr) -> Result<f32> {
    match factor.fold() {
        Some(FieldValue::Number(n)) if n.is_finite() => Ok(n as f32),
        Some(other) => Err(Error::bad_parameter(format!(
            "BOOST factor must be a number, got {}",
            other.type_name()
        ))),
        None => Err(Error::bad_parameter("BOOST factor must be a constant number")),
    }
}

impl Expression for Expr {
    fn is_deterministic(&self) -> bool {
        match self {
            Expr::Call(function, args) => function.deterministic && args.iter().all(Expr::is_deterministic),
            _ => self.children().into_iter().all(Expr::is_deterministic),
        }
    }

    fn free_variables(&self) -> Vec<VariableId> {
        let mut vars = Vec::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn evaluate(&self, scope: &Scope<'_>) -> Result<FieldValue> {
        matcher::evaluate(self, scope)
    }

    fn as_constant(&self) -> Option<FieldValue> {
        self.fold()
    }

    fn boost(&self) -> Result<f32> {
        match self {
            Expr::Boost(inner, factor) => Ok(boost_factor(factor)? * inner.boost()?),
            _ => Ok(1.0),
        }
    }

    fn terms(&self) -> Vec<(String, String)> {
        let mut terms = Vec::new();
        self.collect_terms(&mut terms);
        terms
    }

    fn validate(&self, config: &ValidationConfig) -> Result<()> {
        let depth = self.depth();
        if depth > config.max_expression_depth {
            return Err(Error::bad_parameter(format!(
                "Expression depth {} exceeds maximum {}",
                depth, config.max_expression_depth
            )));
        }
        self.validate_node(config)
    }
}
