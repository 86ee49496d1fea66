//! Verification verdicts and the closed reason taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Why a stream was judged live or offline.
///
/// The string forms are stable; callers branch on them. Positive reasons are
/// exactly the ones a player could act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// `icy-*` headers from a Shoutcast/Icecast server
    IcyStream,
    /// Audio or container content type
    ValidAudio,
    /// PLS playlist document
    PlsPlaylist,
    /// M3U/M3U8 (HLS) playlist document
    HlsPlaylist,
    /// Recognised audio signature, or bytes flowing on the last-resort GET
    BinaryAudio,
    /// Known non-audio content type (HTML, JSON, plain text...)
    NotAudio,
    /// Error status (>= 400) that reached classification
    Http(u16),
    /// DNS, refused or reset connection, or no data at all
    ConnectFailed,
    /// Probe budget exhausted
    Timeout,
}

impl ReasonCode {
    pub const POSITIVE: [ReasonCode; 5] = [
        ReasonCode::IcyStream,
        ReasonCode::ValidAudio,
        ReasonCode::PlsPlaylist,
        ReasonCode::HlsPlaylist,
        ReasonCode::BinaryAudio,
    ];

    pub fn is_positive(&self) -> bool {
        matches!(
            self,
            ReasonCode::IcyStream
                | ReasonCode::ValidAudio
                | ReasonCode::PlsPlaylist
                | ReasonCode::HlsPlaylist
                | ReasonCode::BinaryAudio
        )
    }

    /// Short label for metrics; collapses every HTTP status into `http_error`.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReasonCode::IcyStream => "icy_stream",
            ReasonCode::ValidAudio => "valid_audio",
            ReasonCode::PlsPlaylist => "pls_playlist",
            ReasonCode::HlsPlaylist => "hls_playlist",
            ReasonCode::BinaryAudio => "binary_audio",
            ReasonCode::NotAudio => "not_audio",
            ReasonCode::Http(_) => "http_error",
            ReasonCode::ConnectFailed => "connect_failed",
            ReasonCode::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::Http(status) => write!(f, "http_{status}"),
            other => f.write_str(other.metric_label()),
        }
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "icy_stream" => Ok(ReasonCode::IcyStream),
            "valid_audio" => Ok(ReasonCode::ValidAudio),
            "pls_playlist" => Ok(ReasonCode::PlsPlaylist),
            "hls_playlist" => Ok(ReasonCode::HlsPlaylist),
            "binary_audio" => Ok(ReasonCode::BinaryAudio),
            "not_audio" => Ok(ReasonCode::NotAudio),
            "connect_failed" => Ok(ReasonCode::ConnectFailed),
            "timeout" => Ok(ReasonCode::Timeout),
            other => other
                .strip_prefix("http_")
                .and_then(|code| code.parse::<u16>().ok())
                .filter(|code| (400..=999).contains(code))
                .map(ReasonCode::Http)
                .ok_or_else(|| format!("Unknown reason code: {s}")),
        }
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReasonCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Point-in-time verdict for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub identifier: String,
    pub is_live: bool,
    pub reason: ReasonCode,
    pub content_type: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl VerificationResult {
    /// Finalize a verdict now. `is_live` is derived from the reason so the two
    /// can never disagree.
    pub fn new(
        identifier: impl Into<String>,
        reason: ReasonCode,
        content_type: Option<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            is_live: reason.is_positive(),
            reason,
            content_type,
            checked_at: Utc::now(),
        }
    }
}
