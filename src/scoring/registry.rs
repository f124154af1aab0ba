//! Named scorer factories.
//!
//! Search clauses refer to scorers by name with argument values. The registry
//! resolves the name and lets the factory validate the arguments, so a typo or a
//! bad argument is reported while planning, before any document is produced.
//!
//! Unlike a process-wide table, a registry is an ordinary value; callers share
//! one through an `Arc` when several planners need it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::error::{Error, Result};
use crate::core::types::FieldValue;
use crate::scoring::scorer::{Bm25Scorer, Scorer, TfIdfScorer};

pub type ScorerFactory = dyn Fn(&[FieldValue]) -> Result<Arc<dyn Scorer>> + Send + Sync;

#[derive(Default)]
pub struct ScorerRegistry {
    factories: RwLock<HashMap<String, Arc<ScorerFactory>>>,
}

impl ScorerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `bm25` and `tfidf`
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.add("bm25", bm25_factory);
        registry.add("tfidf", tfidf_factory);
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    ///
    /// Names are case-insensitive.
    pub fn add<F>(&self, name: impl AsRef<str>, factory: F)
    where
        F: Fn(&[FieldValue]) -> Result<Arc<dyn Scorer>> + Send + Sync + 'static,
    {
        let name = name.as_ref().to_lowercase();
        self.factories.write().insert(name, Arc::new(factory));
    }

    /// # Errors
    ///
    /// Returns `BadParameter` if no scorer with that name is registered.
    pub fn get(&self, name: impl AsRef<str>) -> Result<Arc<ScorerFactory>> {
        let name = name.as_ref();
        let factory = self.factories.read().get(&name.to_lowercase()).cloned();
        factory.ok_or_else(|| Error::bad_parameter(format!("Scorer '{name}' not found")))
    }

    pub fn create(&self, name: impl AsRef<str>, args: &[FieldValue]) -> Result<Arc<dyn Scorer>> {
        let factory = self.get(name)?;
        factory(args)
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.factories.read().contains_key(&name.as_ref().to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ScorerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn numeric_arg(name: &str, args: &[FieldValue], index: usize, default: f32) -> Result<f32> {
    match args.get(index) {
        None => Ok(default),
        Some(FieldValue::Number(n)) if n.is_finite() => Ok(*n as f32),
        Some(other) => Err(Error::bad_parameter(format!(
            "{name} argument {} must be a number, got {}",
            index + 1,
            other.type_name()
        ))),
    }
}

fn check_arity(name: &str, args: &[FieldValue], max: usize) -> Result<()> {
    if args.len() > max {
        return Err(Error::bad_parameter(format!(
            "{name} takes at most {max} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

/// BM25(k1?, b?)
fn bm25_factory(args: &[FieldValue]) -> Result<Arc<dyn Scorer>> {
    check_arity("BM25", args, 2)?;
    let defaults = Bm25Scorer::default();
    let k1 = numeric_arg("BM25", args, 0, defaults.k1)?;
    let b = numeric_arg("BM25", args, 1, defaults.b)?;
    if k1 < 0.0 || !(0.0..=1.0).contains(&b) {
        return Err(Error::bad_parameter(format!("BM25 parameters out of range: k1={k1}, b={b}")));
    }
    Ok(Arc::new(Bm25Scorer { k1, b }))
}

/// TFIDF(normalize?)
fn tfidf_factory(args: &[FieldValue]) -> Result<Arc<dyn Scorer>> {
    check_arity("TFIDF", args, 1)?;
    let normalize = match args.first() {
        None => false,
        Some(FieldValue::Boolean(b)) => *b,
        Some(other) => {
            return Err(Error::bad_parameter(format!(
                "TFIDF argument 1 must be a boolean, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Arc::new(TfIdfScorer::new(normalize)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn test_defaults_registered() {
        let registry = ScorerRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["bm25".to_string(), "tfidf".to_string()]);
        assert!(registry.contains("BM25"));
        assert_eq!(registry.create("bm25", &[]).unwrap().name(), "bm25");
    }

    #[test]
    fn test_unknown_scorer() {
        let registry = ScorerRegistry::with_defaults();
        let err = registry.get("pagerank").err().unwrap();
        assert_eq!(err.kind, ErrorKind::BadParameter);
    }

    #[test]
    fn test_bad_arguments() {
        let registry = ScorerRegistry::with_defaults();
        let err = registry.create("bm25", &[FieldValue::Text("1.2".into())]).err().unwrap();
        assert_eq!(err.kind, ErrorKind::BadParameter);

        let err = registry.create("tfidf", &[FieldValue::Number(1.0)]).err().unwrap();
        assert_eq!(err.kind, ErrorKind::BadParameter);

        let err = registry
            .create("bm25", &[FieldValue::Number(1.2), FieldValue::Number(2.0)])
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::BadParameter);
    }
}
