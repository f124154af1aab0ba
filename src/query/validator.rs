use crate::core::config::Config;
use crate::core::error::Result;
use crate::query::ast::Expression;

/// Limits on expressions accepted by the filter compiler
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub max_expression_depth: usize,
    pub max_array_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig::from(&Config::default())
    }
}

impl From<&Config> for ValidationConfig {
    fn from(config: &Config) -> Self {
        ValidationConfig {
            max_expression_depth: config.max_expression_depth,
            max_array_len: config.max_array_len,
        }
    }
}

/// Rejects malformed expression shapes before anything is executed
pub struct ExpressionValidator {
    config: ValidationConfig,
}

impl ExpressionValidator {
    pub fn new(config: ValidationConfig) -> Self {
        ExpressionValidator { config }
    }

    pub fn validate(&self, expr: &dyn Expression) -> Result<()> {
        expr.validate(&self.config)?;
        // BOOST factors are checked here so a bad factor fails at compile, not on first row
        expr.boost()?;
        Ok(())
    }
}
