//! Candidate stations handed to the verifier by catalog search or favourites.

use serde::{Deserialize, Serialize};

/// A station as supplied by upstream collaborators.
///
/// Directory services hand out both the URL as registered and a "resolved"
/// URL after their own redirect chasing; the latter is preferred when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCandidate {
    #[serde(alias = "stationuuid", default)]
    pub identifier: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_resolved: Option<String>,
}

impl StationCandidate {
    pub fn new(identifier: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            url: url.into(),
            url_resolved: None,
        }
    }

    pub fn with_resolved(mut self, url_resolved: impl Into<String>) -> Self {
        self.url_resolved = Some(url_resolved.into());
        self
    }

    /// The URL that should actually be probed: the resolved URL when present
    /// and non-blank, otherwise the primary one.
    pub fn effective_url(&self) -> &str {
        self.url_resolved
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.url.trim())
    }

    /// Convert into a probe request, or `None` when either the identifier or
    /// the effective URL is empty.
    pub fn into_request(self) -> Option<VerificationRequest> {
        let url = self.effective_url().to_string();
        VerificationRequest::new(self.identifier, url)
    }
}

/// One URL to probe on behalf of one station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    identifier: String,
    url: String,
}

impl VerificationRequest {
    pub fn new(identifier: impl Into<String>, url: impl Into<String>) -> Option<Self> {
        let identifier = identifier.into();
        let url = url.into();
        if identifier.trim().is_empty() || url.trim().is_empty() {
            return None;
        }
        Some(Self { identifier, url })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn into_parts(self) -> (String, String) {
        (self.identifier, self.url)
    }
}
