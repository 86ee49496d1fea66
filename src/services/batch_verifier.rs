//! Batch Verification Service
//!
//! Turns a list of station candidates into one [`VerificationResult`] per
//! surviving candidate. Candidates are truncated, filtered, then probed in
//! fixed-width sub-batches: probes inside a sub-batch run concurrently and the
//! whole sub-batch settles before the next one starts.

use futures::StreamExt;
use futures::stream;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, VerificationConfig};
use crate::errors::{AppError, AppResult};
use crate::models::{ReasonCode, StationCandidate, VerificationRequest, VerificationResult};
use crate::services::connection_limiter::ConnectionLimiter;
use crate::services::stream_prober::{ProbeOutcome, ProbeSettings, StreamProber};
use crate::streaming::metrics::{MetricsKeyValue, metrics};
use crate::streaming::playlist::PlaylistResolver;
use crate::utils::ProbeHttpClient;

/// Slack on top of the per-URL timeout before a probe task is abandoned
const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Sizing and timing of one batch call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub max_count: usize,
    pub sub_batch_width: usize,
    pub per_url_timeout: Duration,
}

impl From<&VerificationConfig> for BatchOptions {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            max_count: config.max_batch_size,
            sub_batch_width: config.sub_batch_width,
            per_url_timeout: config.batch_timeout,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&VerificationConfig::default())
    }
}

impl BatchOptions {
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_sub_batch_width(mut self, width: usize) -> Self {
        self.sub_batch_width = width;
        self
    }

    pub fn with_timeout(mut self, per_url_timeout: Duration) -> Self {
        self.per_url_timeout = per_url_timeout;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.max_count == 0 {
            return Err(AppError::validation("max_count must be greater than 0"));
        }
        if self.sub_batch_width == 0 {
            return Err(AppError::validation("sub_batch_width must be greater than 0"));
        }
        if self.per_url_timeout.is_zero() {
            return Err(AppError::validation("per_url_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Truncate to `max_count`, then drop blank entries and repeated identifiers
pub fn prepare_requests(
    candidates: impl IntoIterator<Item = StationCandidate>,
    max_count: usize,
) -> Vec<VerificationRequest> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .take(max_count)
        .filter_map(StationCandidate::into_request)
        .filter(|request| seen.insert(request.identifier().to_string()))
        .collect()
}

/// Live/offline tally of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub live: usize,
    pub offline: usize,
    pub reasons: BTreeMap<String, usize>,
}

impl BatchSummary {
    pub fn from_results(results: &[VerificationResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            if result.is_live {
                summary.live += 1;
            } else {
                summary.offline += 1;
            }
            *summary.reasons.entry(result.reason.to_string()).or_insert(0) += 1;
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.live + self.offline
    }
}

/// Service verifying single stations and batches of stations
#[derive(Clone)]
pub struct BatchVerifier {
    prober: StreamProber,
    resolver: PlaylistResolver,
    options: BatchOptions,
    single_timeout: Duration,
}

impl BatchVerifier {
    pub fn new(
        prober: StreamProber,
        resolver: PlaylistResolver,
        options: BatchOptions,
        single_timeout: Duration,
    ) -> Self {
        Self {
            prober,
            resolver,
            options,
            single_timeout,
        }
    }

    /// Wire the HTTP client, limiter, prober and resolver from configuration
    pub fn from_config(config: &Config) -> AppResult<Self> {
        config.validate()?;
        let client = ProbeHttpClient::new(&config.http)?;
        let limiter = ConnectionLimiter::new(config.http.max_concurrent_connections);
        let prober = StreamProber::new(
            client.clone(),
            limiter,
            ProbeSettings::from(&config.verification),
        );
        let resolver = PlaylistResolver::new(client, config.verification.resolver_timeout);
        Ok(Self::new(
            prober,
            resolver,
            BatchOptions::from(&config.verification),
            config.verification.single_timeout,
        ))
    }

    /// Verify candidates with the configured batch options
    pub async fn verify_batch(
        &self,
        candidates: Vec<StationCandidate>,
    ) -> AppResult<Vec<VerificationResult>> {
        self.verify_batch_with(candidates, self.options).await
    }

    pub async fn verify_batch_with(
        &self,
        candidates: Vec<StationCandidate>,
        options: BatchOptions,
    ) -> AppResult<Vec<VerificationResult>> {
        options.validate()?;

        let submitted = candidates.len();
        let requests = prepare_requests(candidates, options.max_count);
        if requests.len() < submitted.min(options.max_count) {
            debug!(
                "Dropped {} candidates with blank identifier, blank URL or repeated identifier",
                submitted.min(options.max_count) - requests.len()
            );
        }

        let started = Instant::now();
        let mut results = Vec::with_capacity(requests.len());

        for (index, sub_batch) in requests.chunks(options.sub_batch_width).enumerate() {
            debug!(
                "Starting sub-batch {} ({} probes)",
                index + 1,
                sub_batch.len()
            );
            let settled: Vec<VerificationResult> = stream::iter(sub_batch.iter().cloned())
                .map(|request| self.verify_request(request, options.per_url_timeout))
                .buffer_unordered(options.sub_batch_width)
                .collect()
                .await;
            results.extend(settled);
        }

        let summary = BatchSummary::from_results(&results);
        info!(
            "Verified {} stations in {:?}: {} live, {} offline, reasons {:?}",
            summary.total(),
            started.elapsed(),
            summary.live,
            summary.offline,
            summary.reasons
        );

        Ok(results)
    }

    /// Foreground check of one station with the longer single-station timeout
    ///
    /// Returns `None` when the identifier or URL is blank.
    pub async fn verify_single(
        &self,
        identifier: impl Into<String>,
        url: impl Into<String>,
    ) -> Option<VerificationResult> {
        self.verify_single_with(identifier, url, self.single_timeout)
            .await
    }

    pub async fn verify_single_with(
        &self,
        identifier: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Option<VerificationResult> {
        let url = url.into();
        let request = VerificationRequest::new(identifier, url.trim())?;
        Some(self.verify_request(request, timeout).await)
    }

    /// Follow one level of playlist indirection
    pub async fn resolve(&self, url: &str) -> String {
        self.resolver.resolve(url).await
    }

    async fn verify_request(
        &self,
        request: VerificationRequest,
        per_url_timeout: Duration,
    ) -> VerificationResult {
        let (identifier, url) = request.into_parts();
        let prober = self.prober.clone();
        let probe = async move { prober.probe(&url, per_url_timeout).await };
        guard_probe(identifier, probe, per_url_timeout + PROBE_GRACE).await
    }
}

/// Run a probe on its own task so a panic or a stuck probe only costs its own result
pub(crate) async fn guard_probe<F>(
    identifier: String,
    probe: F,
    outer_timeout: Duration,
) -> VerificationResult
where
    F: Future<Output = ProbeOutcome> + Send + 'static,
{
    let mut handle = tokio::spawn(probe);

    let outcome = match tokio::time::timeout(outer_timeout, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => {
            warn!("Probe task for {} failed: {}", identifier, join_error);
            ProbeOutcome {
                reason: ReasonCode::ConnectFailed,
                content_type: None,
            }
        }
        Err(_) => {
            handle.abort();
            warn!(
                "Probe task for {} exceeded {:?}, abandoning",
                identifier, outer_timeout
            );
            ProbeOutcome {
                reason: ReasonCode::Timeout,
                content_type: None,
            }
        }
    };

    let result = VerificationResult::new(identifier, outcome.reason, outcome.content_type);
    metrics().verification_total.add(
        1,
        &[
            MetricsKeyValue::new("reason", result.reason.metric_label()),
            MetricsKeyValue::new("live", result.is_live),
        ],
    );
    result
}
