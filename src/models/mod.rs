pub mod station;
pub mod verification;

pub use station::{StationCandidate, VerificationRequest};
pub use verification::{ReasonCode, VerificationResult};
