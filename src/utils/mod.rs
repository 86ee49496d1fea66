//! Utility modules for station-verify
//!
//! Reusable pieces shared by the prober, the resolver and the binary.

pub mod http_client;
pub mod url;

pub use http_client::ProbeHttpClient;
