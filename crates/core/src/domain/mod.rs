pub mod chain;
pub mod execution;
pub mod request;
