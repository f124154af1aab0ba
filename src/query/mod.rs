pub mod ast;
pub mod planner;
pub mod cache;
pub mod validator;
pub mod types;
pub mod matcher;
pub mod classifier;
