//! nodal-core: Shared types, configuration, and error handling for the Nodal graph client.
//!
//! This crate provides the foundational types used across all Nodal components:
//! - Entity identities (node and relationship handles assigned by the database)
//! - The closed property value model with its equality and conversion rules
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::Settings;
pub use error::CoreError;
pub use types::{EntityKind, Identity};
pub use value::{PropertyMap, Value};
