/*!
 * Streaming inspection
 *
 * Submodules:
 *   - classification: ordered signature rule table turning one response into a verdict.
 *   - playlist: PLS/M3U detection and one-level indirection resolution.
 *   - metrics: OpenTelemetry counters for verdicts and probe stages.
 */
pub mod classification;
pub mod playlist;

pub use classification::{ResponseSnapshot, SIGNATURE_RULES, Verdict, classify};
pub use playlist::{PlaylistKind, PlaylistResolver, detect_playlist, extract_stream_url};

// Verification metrics instrumentation module
pub mod metrics {
    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Meter};
    use std::sync::OnceLock;

    /// Aggregated metric instruments for stream verification.
    pub struct VerificationMetrics {
        pub verification_total: Counter<u64>,
        pub probe_stage_total: Counter<u64>,
    }

    impl VerificationMetrics {
        fn new() -> Self {
            let meter: Meter = global::meter("station-verify.verification");
            Self {
                verification_total: meter
                    .u64_counter("verification_total")
                    .with_description("Finalized stream verdicts by reason")
                    .build(),
                probe_stage_total: meter
                    .u64_counter("probe_stage_total")
                    .with_description("Probe stage attempts by stage and outcome")
                    .build(),
            }
        }
    }

    static METRICS: OnceLock<VerificationMetrics> = OnceLock::new();

    /// Public accessor for global verification metrics instruments.
    pub fn metrics() -> &'static VerificationMetrics {
        METRICS.get_or_init(VerificationMetrics::new)
    }

    pub use opentelemetry::KeyValue as MetricsKeyValue;
}
