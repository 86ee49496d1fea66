pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod streaming;
pub mod utils;

pub use config::Config;
pub use errors::{AppError, AppResult};
pub use models::{ReasonCode, StationCandidate, VerificationRequest, VerificationResult};
pub use services::{BatchOptions, BatchVerifier};
