//! Error types for the CPE loader

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Main error type for shared functionality
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while unbinding a CPE 2.3 formatted string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpeError {
    #[error("missing 'cpe:2.3:' prefix in '{0}'")]
    MissingPrefix(String),

    #[error("expected at most 11 components, found {0}")]
    TooManyComponents(usize),

    #[error("component '{attribute}' is empty")]
    EmptyComponent { attribute: &'static str },

    #[error("invalid part '{0}', expected one of a, o, h")]
    InvalidPart(String),

    #[error("invalid character {ch:?} in component '{attribute}'")]
    InvalidCharacter { attribute: &'static str, ch: char },

    #[error("dangling escape at end of component '{attribute}'")]
    DanglingEscape { attribute: &'static str },

    #[error("wildcard in the middle of component '{attribute}'")]
    MisplacedWildcard { attribute: &'static str },
}
