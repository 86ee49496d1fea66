//! Centralized error handling for station-verify
//!
//! Verification itself never fails for network reasons: every transport or
//! protocol problem is folded into a [`crate::models::ReasonCode`]. The types
//! here cover what is left over at the edges.
//!
//! # Error Categories
//!
//! - **Configuration Errors**: invalid or unreadable settings
//! - **Validation Errors**: batch parameters the verifier cannot honour
//! - **HTTP Client Errors**: failure to construct the outbound client
//! - **I/O and JSON Errors**: reading candidate files, writing results
//!
//! # Usage
//!
//! ```rust
//! use station_verify::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;
