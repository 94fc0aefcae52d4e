//! Matchbox-Common: Shared types, naming rules, and utilities.
//!
//! This crate provides common functionality used across matchbox:
//!
//! - **Typed IDs**: Field numbers and clip job keys
//! - **Path Utilities**: The deterministic artifact naming rule and file type checks
//! - **Backoff**: The retry policy shared by every retry loop
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use matchbox_common::{ClipId, FieldNumber};
//! use matchbox_common::paths::artifact_file_name;
//!
//! let field = FieldNumber::new(1).unwrap();
//! let id = ClipId::new(field, "Q3");
//!
//! assert_eq!(artifact_file_name(&id, "mp4"), "Q3 - Field 1.mp4");
//! ```

pub mod backoff;
pub mod error;
pub mod ids;
pub mod paths;

pub use backoff::BackoffPolicy;
pub use error::{Error, Result};
pub use ids::*;
