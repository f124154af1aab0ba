pub mod scorer;
pub mod order;
pub mod registry;
