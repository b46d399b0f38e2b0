//! flexdb-core: Shared types, configuration, and error handling for flexdb.
//!
//! This crate provides the foundational types used across all flexdb components:
//! - Typed identifiers and entity models for the control store and tenant databases
//! - Create/update inputs and list filters
//! - The cursor pagination protocol
//! - Configuration management
//! - The error taxonomy surfaced to callers

pub mod config;
pub mod deadline;
pub mod error;
pub mod pagination;
pub mod types;

pub use config::FlexConfig;
pub use error::{ErrorKind, FlexError, FlexResult};
pub use pagination::{Cursor, Page, PageRequest};
