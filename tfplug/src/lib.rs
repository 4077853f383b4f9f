//! tfplug - Terraform Plugin Framework for Rust
//!
//! The resource lifecycle half of a Terraform provider: value types, schemas,
//! plan modifiers, the provider and resource contracts, and a
//! transport-independent server that plans and applies resource changes.

// Core modules
pub mod context;
pub mod error;
pub mod schema;
pub mod types;

// Provider API modules
pub mod provider;
pub mod resource;

// Helper modules
pub mod plan_modifier;

// Lifecycle driver
pub mod server;

// Re-exports for convenience
pub use context::Context;
pub use error::{Result, TfplugError};
pub use provider::{Provider, ProviderMetadataRequest, ProviderMetadataResponse, ResourceFactory};
pub use resource::{Resource, ResourceWithConfigure};
pub use schema::{AttributeBuilder, AttributeType, Schema, SchemaBuilder};
pub use server::{Applied, Plan, PlannedAction, ProviderServer};
pub use types::{
    AttributePath, Diagnostic, DiagnosticSeverity, DiagnosticsExt, Dynamic, DynamicValue,
};
