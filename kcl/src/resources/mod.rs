//! Resource implementations

pub mod exec;

pub use exec::KclExecResource;
