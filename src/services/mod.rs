//! Service layer: connection limiting, single-URL probing and batch orchestration

pub mod batch_verifier;
pub mod connection_limiter;
pub mod stream_prober;

pub use batch_verifier::{BatchOptions, BatchSummary, BatchVerifier, prepare_requests};
pub use connection_limiter::{ConnectionLimiter, ConnectionPermit};
pub use stream_prober::{PROBE_STAGES, ProbeOutcome, ProbeSettings, Stage, StreamProber};
