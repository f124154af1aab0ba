pub mod executor;
pub mod filter;
pub mod iterator;
pub mod results;
