use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_boost: f32,             // Neutral multiplier applied when a clause has no BOOST
    pub deferred_binding: bool,         // Context supplied after compile() instead of at compile()
    pub filter_cache_size: usize,       // Compiled filters kept per executor
    pub max_expression_depth: usize,    // Deeper expressions are rejected at compile time
    pub max_array_len: usize,           // Longest flat array accepted as an IN target
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_boost: 1.0,
            deferred_binding: false,
            filter_cache_size: 64,
            max_expression_depth: 64,
            max_array_len: 1024,
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.default_boost.is_finite() || self.default_boost < 0.0 {
            return Err(Error::bad_parameter(format!(
                "default_boost must be a non-negative number, got {}",
                self.default_boost
            )));
        }
        if self.filter_cache_size == 0 {
            return Err(Error::bad_parameter("filter_cache_size must be positive"));
        }
        Ok(())
    }
}
