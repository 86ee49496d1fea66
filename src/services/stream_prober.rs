//! Stream Probing Service
//!
//! Decides whether one URL is serving live audio right now. The probe walks an
//! ordered stage table (HEAD, ranged GET, plain streaming GET), feeding each
//! response through the signature classifier until a stage produces a verdict.
//! Every network failure is folded into a [`ReasonCode`]; `probe` never errors.

use futures::StreamExt;
use reqwest::Response;
use reqwest::header::HeaderMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::config::VerificationConfig;
use crate::models::ReasonCode;
use crate::services::connection_limiter::ConnectionLimiter;
use crate::streaming::classification::{Verdict, classify, content_type_header};
use crate::streaming::metrics::{MetricsKeyValue, metrics};
use crate::utils::ProbeHttpClient;
use crate::utils::url::UrlUtils;

/// Byte ceilings for the body-reading stages
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub ranged_probe_bytes: usize,
    pub stream_probe_bytes: usize,
}

impl From<&VerificationConfig> for ProbeSettings {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            ranged_probe_bytes: config.ranged_probe_bytes,
            stream_probe_bytes: config.stream_probe_bytes,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&VerificationConfig::default())
    }
}

/// Final answer for one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reason: ReasonCode,
    pub content_type: Option<String>,
}

impl ProbeOutcome {
    pub fn is_live(&self) -> bool {
        self.reason.is_positive()
    }
}

/// Why a stage ended without a verdict
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("body read failed: {0}")]
    Body(String),
    #[error("no data received")]
    Empty,
}

impl ProbeError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Connect(error.to_string())
        }
    }

    pub fn reason(&self) -> ReasonCode {
        match self {
            ProbeError::Timeout => ReasonCode::Timeout,
            ProbeError::Connect(_) | ProbeError::Body(_) | ProbeError::Empty => {
                ReasonCode::ConnectFailed
            }
        }
    }
}

/// One entry of the fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Head,
    RangedGet,
    StreamingGet,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Head => "head",
            Stage::RangedGet => "ranged_get",
            Stage::StreamingGet => "streaming_get",
        }
    }

    /// Share of the per-URL budget, in percent
    fn budget_percent(&self) -> u32 {
        match self {
            Stage::Head => 25,
            Stage::RangedGet => 35,
            Stage::StreamingGet => 40,
        }
    }
}

/// Stages in the order they are attempted
pub const PROBE_STAGES: [Stage; 3] = [Stage::Head, Stage::RangedGet, Stage::StreamingGet];

enum StageResult {
    Verdict(ReasonCode),
    NoVerdict(Option<ProbeError>),
}

enum BodyRead {
    Verdict(Verdict),
    Exhausted { bytes: usize },
    TimedOut { bytes: usize },
    Failed { bytes: usize, error: String },
}

/// Service for probing candidate stream URLs
#[derive(Clone)]
pub struct StreamProber {
    client: ProbeHttpClient,
    limiter: ConnectionLimiter,
    settings: ProbeSettings,
}

impl StreamProber {
    pub fn new(client: ProbeHttpClient, limiter: ConnectionLimiter, settings: ProbeSettings) -> Self {
        Self {
            client,
            limiter,
            settings,
        }
    }

    /// Probe `url` within `per_url_timeout`, including the wait for a connection slot
    pub async fn probe(&self, url: &str, per_url_timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        let deadline = started + per_url_timeout;
        let safe_url = UrlUtils::obfuscate_credentials(url);

        let _permit = match timeout_at(deadline, self.limiter.acquire(url)).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(e)) => {
                debug!(target = "stream.verify", url = %safe_url, error = %e, "No connection slot");
                return ProbeOutcome {
                    reason: ReasonCode::ConnectFailed,
                    content_type: None,
                };
            }
            Err(_) => {
                debug!(target = "stream.verify", url = %safe_url, "Timed out waiting for a connection slot");
                return ProbeOutcome {
                    reason: ReasonCode::Timeout,
                    content_type: None,
                };
            }
        };

        let mut observed_content_type: Option<String> = None;
        let mut last_failure: Option<ProbeError> = None;

        for (index, stage) in PROBE_STAGES.iter().enumerate() {
            let now = Instant::now();
            if now >= deadline {
                last_failure = Some(ProbeError::Timeout);
                break;
            }

            let stage_deadline = if index + 1 == PROBE_STAGES.len() {
                deadline
            } else {
                (now + per_url_timeout * stage.budget_percent() / 100).min(deadline)
            };

            let result = self
                .run_stage(*stage, url, stage_deadline, &mut observed_content_type)
                .await;

            match result {
                StageResult::Verdict(reason) => {
                    record_stage(*stage, "verdict");
                    debug!(
                        target = "stream.verify",
                        url = %safe_url,
                        stage = stage.name(),
                        reason = %reason,
                        content_type = observed_content_type.as_deref().unwrap_or(""),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Probe verdict"
                    );
                    return ProbeOutcome {
                        reason,
                        content_type: observed_content_type,
                    };
                }
                StageResult::NoVerdict(failure) => {
                    let outcome = match &failure {
                        Some(ProbeError::Timeout) => "timeout",
                        Some(_) => "error",
                        None => "inconclusive",
                    };
                    record_stage(*stage, outcome);
                    debug!(
                        target = "stream.verify",
                        url = %safe_url,
                        stage = stage.name(),
                        outcome,
                        error = %failure.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                        "Probe stage gave no verdict"
                    );
                    if failure.is_some() {
                        last_failure = failure;
                    }
                }
            }
        }

        let reason = last_failure
            .map(|e| e.reason())
            .unwrap_or(ReasonCode::ConnectFailed);
        debug!(
            target = "stream.verify",
            url = %safe_url,
            reason = %reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Probe exhausted all stages"
        );
        ProbeOutcome {
            reason,
            content_type: observed_content_type,
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        url: &str,
        deadline: Instant,
        observed_content_type: &mut Option<String>,
    ) -> StageResult {
        let request = match stage {
            Stage::Head => self.client.head(url),
            Stage::RangedGet => self.client.ranged_get(url, self.settings.ranged_probe_bytes),
            Stage::StreamingGet => self.client.get(url),
        };

        let resp = match timeout_at(deadline, request.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return StageResult::NoVerdict(Some(ProbeError::from_reqwest(e))),
            Err(_) => return StageResult::NoVerdict(Some(ProbeError::Timeout)),
        };

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();

        // Error statuses are only final on the last stage
        if status >= 400 && stage != Stage::StreamingGet {
            return StageResult::NoVerdict(None);
        }

        if let Some(content_type) = content_type_header(&headers) {
            *observed_content_type = Some(content_type);
        }

        let header_verdict = classify(status, &headers, &[]);
        match stage {
            Stage::Head => {
                return match header_verdict {
                    Some(verdict) if verdict.is_live() => StageResult::Verdict(verdict.reason),
                    _ => StageResult::NoVerdict(None),
                };
            }
            _ => {
                if let Some(verdict) = header_verdict {
                    return StageResult::Verdict(verdict.reason);
                }
            }
        }

        let limit = match stage {
            Stage::RangedGet => self.settings.ranged_probe_bytes,
            _ => self.settings.stream_probe_bytes,
        };

        match read_and_classify(resp, status, &headers, limit, deadline).await {
            BodyRead::Verdict(verdict) => StageResult::Verdict(verdict.reason),
            BodyRead::Exhausted { bytes } | BodyRead::TimedOut { bytes }
                if stage == Stage::StreamingGet && bytes > 0 =>
            {
                StageResult::Verdict(ReasonCode::BinaryAudio)
            }
            BodyRead::Exhausted { bytes: 0 } if stage == Stage::StreamingGet => {
                StageResult::NoVerdict(Some(ProbeError::Empty))
            }
            BodyRead::Exhausted { .. } => StageResult::NoVerdict(None),
            BodyRead::TimedOut { .. } => StageResult::NoVerdict(Some(ProbeError::Timeout)),
            BodyRead::Failed { bytes, error } => {
                debug!(target = "stream.verify", bytes, error = %error, "Body read failed");
                StageResult::NoVerdict(Some(ProbeError::Body(error)))
            }
        }
    }
}

/// Read at most `limit` body bytes, classifying after every chunk
async fn read_and_classify(
    resp: Response,
    status: u16,
    headers: &HeaderMap,
    limit: usize,
    deadline: Instant,
) -> BodyRead {
    let mut body = resp.bytes_stream();
    let mut collected: Vec<u8> = Vec::with_capacity(limit.min(8192));

    loop {
        let chunk = match timeout_at(deadline, body.next()).await {
            Err(_) => {
                return BodyRead::TimedOut {
                    bytes: collected.len(),
                };
            }
            Ok(None) => {
                return BodyRead::Exhausted {
                    bytes: collected.len(),
                };
            }
            Ok(Some(Err(e))) => {
                return BodyRead::Failed {
                    bytes: collected.len(),
                    error: e.to_string(),
                };
            }
            Ok(Some(Ok(chunk))) => chunk,
        };

        let take = chunk.len().min(limit - collected.len());
        collected.extend_from_slice(&chunk[..take]);

        if let Some(verdict) = classify(status, headers, &collected) {
            return BodyRead::Verdict(verdict);
        }
        if collected.len() >= limit {
            return BodyRead::Exhausted {
                bytes: collected.len(),
            };
        }
    }
}

fn record_stage(stage: Stage, outcome: &'static str) {
    metrics().probe_stage_total.add(
        1,
        &[
            MetricsKeyValue::new("stage", stage.name()),
            MetricsKeyValue::new("outcome", outcome),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober() -> StreamProber {
        let client = ProbeHttpClient::new(&HttpConfig::default()).unwrap();
        StreamProber::new(client, ConnectionLimiter::new(4), ProbeSettings::default())
    }

    #[test]
    fn test_stage_budgets_fit_timeout() {
        let total: u32 = PROBE_STAGES.iter().map(|s| s.budget_percent()).sum();
        assert!(total <= 100);
        assert_eq!(PROBE_STAGES[0], Stage::Head);
        assert_eq!(PROBE_STAGES[2], Stage::StreamingGet);
    }

    #[test]
    fn test_probe_error_reasons() {
        assert_eq!(ProbeError::Timeout.reason(), ReasonCode::Timeout);
        assert_eq!(
            ProbeError::Connect("refused".into()).reason(),
            ReasonCode::ConnectFailed
        );
        assert_eq!(ProbeError::Empty.reason(), ReasonCode::ConnectFailed);
    }

    #[tokio::test]
    async fn test_head_icy_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("icy-name", "SomaFM")
                    .insert_header("content-type", "audio/mpeg"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = prober()
            .probe(&format!("{}/stream", server.uri()), Duration::from_secs(4))
            .await;
        assert_eq!(outcome.reason, ReasonCode::IcyStream);
        assert_eq!(outcome.content_type.as_deref(), Some("audio/mpeg"));
        assert!(outcome.is_live());
    }

    #[tokio::test]
    async fn test_head_rejected_falls_through_to_range() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=0-512"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"OggS\x00\x02".to_vec()))
            .mount(&server)
            .await;

        let outcome = prober()
            .probe(&format!("{}/live.ogg", server.uri()), Duration::from_secs(4))
            .await;
        assert_eq!(outcome.reason, ReasonCode::BinaryAudio);
    }

    #[tokio::test]
    async fn test_html_is_not_audio() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>offline</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let outcome = prober()
            .probe(&server.uri(), Duration::from_secs(4))
            .await;
        assert_eq!(outcome.reason, ReasonCode::NotAudio);
        assert_eq!(outcome.content_type.as_deref(), Some("text/html"));
        assert!(!outcome.is_live());
    }

    #[tokio::test]
    async fn test_error_status_on_final_stage() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = prober()
            .probe(&format!("{}/gone", server.uri()), Duration::from_secs(4))
            .await;
        assert_eq!(outcome.reason, ReasonCode::Http(404));
        assert_eq!(outcome.reason.to_string(), "http_404");
    }

    #[tokio::test]
    async fn test_unknown_bytes_on_plain_get_count_as_audio() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=0-512"))
            .respond_with(ResponseTemplate::new(416))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0x42u8; 64])
                    .insert_header("content-type", "binary/x-unknown"),
            )
            .mount(&server)
            .await;

        let outcome = prober()
            .probe(&format!("{}/raw", server.uri()), Duration::from_secs(4))
            .await;
        assert_eq!(outcome.reason, ReasonCode::BinaryAudio);
    }

    #[tokio::test]
    async fn test_stalled_head_falls_through_to_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(20)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 64], "audio/mpeg"))
            .mount(&server)
            .await;

        let budget = Duration::from_secs(4);
        let started = std::time::Instant::now();
        let outcome = prober()
            .probe(&format!("{}/live.mp3", server.uri()), budget)
            .await;

        assert_eq!(outcome.reason, ReasonCode::ValidAudio);
        assert!(outcome.is_live());
        assert_eq!(outcome.content_type.as_deref(), Some("audio/mpeg"));
        // HEAD used up its share, the rest of the budget was left for GET
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900));
        assert!(elapsed < budget);
    }

    #[tokio::test]
    async fn test_unreachable_is_connect_failed() {
        let started = std::time::Instant::now();
        let outcome = prober()
            .probe("http://127.0.0.1:1/stream", Duration::from_secs(3))
            .await;
        assert_eq!(outcome.reason, ReasonCode::ConnectFailed);
        assert_eq!(outcome.content_type, None);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_slow_server_times_out_within_budget() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let outcome = prober()
            .probe(&server.uri(), Duration::from_millis(600))
            .await;
        assert_eq!(outcome.reason, ReasonCode::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
