//! CPE Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, identifier grammar, and logging for the CPE loader.
//!
//! # Overview
//!
//! - **Error Handling**: crate error type and result alias
//! - **CPE**: CPE 2.3 formatted-string unbinding into well-formed names
//! - **Types**: the storage-ready row every backend persists
//! - **Logging**: `tracing` subscriber setup shared by binaries
//!
//! # Example
//!
//! ```
//! use cpe_common::cpe::{Attribute, WellFormedName};
//!
//! let wfn: WellFormedName = "cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*".parse().unwrap();
//! assert_eq!(wfn.get_string(Attribute::Vendor), "acme");
//! assert_eq!(wfn.get_string(Attribute::Update), "ANY");
//! ```

pub mod cpe;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, CpeError, Result};
pub use types::{NormalizedRow, Reference, SCHEMA_VERSION};
