pub mod compatibility;
pub mod processor;
pub mod services;
