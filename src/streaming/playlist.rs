//! PLS / M3U indirection playlists
//!
//! Station directories often hand out "tune" URLs that answer with a tiny
//! playlist pointing at the real stream. [`PlaylistResolver`] follows one level
//! of that indirection; the detection helpers are shared with the classifier.

use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::utils::ProbeHttpClient;
use crate::utils::url::UrlUtils;

/// Upper bound on playlist bytes fetched by the resolver
pub const MAX_PLAYLIST_BYTES: usize = 64 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Pls,
    M3u,
}

#[derive(Debug, Error)]
enum PlaylistError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Non-success status: {0}")]
    Status(u16),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

fn strip_leading(body: &[u8]) -> &[u8] {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    &body[start..]
}

/// Recognise a playlist document from its first bytes
pub fn detect_playlist(body: &[u8]) -> Option<PlaylistKind> {
    let body = strip_leading(body);
    if body.starts_with(b"#EXTM3U") {
        return Some(PlaylistKind::M3u);
    }
    if body.len() >= 10 && body[..10].eq_ignore_ascii_case(b"[playlist]") {
        return Some(PlaylistKind::Pls);
    }
    let has_file1 = body
        .split(|b| *b == b'\n')
        .map(strip_leading)
        .any(|line| line.len() >= 6 && line[..6].eq_ignore_ascii_case(b"file1="));
    has_file1.then_some(PlaylistKind::Pls)
}

/// First usable stream URL in a PLS or M3U document
///
/// A PLS `File1=` entry wins when present; relative values are joined against
/// `base_url`. Otherwise the first non-comment line that is an absolute
/// http(s) URL is returned.
pub fn extract_stream_url(text: &str, base_url: &str) -> Option<String> {
    let text = text.trim_start_matches('\u{feff}');

    for line in text.lines() {
        let line = line.trim();
        if let Some(prefix) = line.get(..6)
            && prefix.eq_ignore_ascii_case("file1=")
        {
            let value = line[6..].trim();
            if value.is_empty() {
                continue;
            }
            if UrlUtils::is_http_url(value) {
                return Some(value.to_string());
            }
            if let Ok(joined) = UrlUtils::join(base_url, value)
                && UrlUtils::is_http_url(&joined)
            {
                return Some(joined);
            }
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find(|line| UrlUtils::is_http_url(line))
        .map(str::to_string)
}

/// Follows one level of playlist indirection
#[derive(Clone)]
pub struct PlaylistResolver {
    client: ProbeHttpClient,
    timeout: Duration,
}

impl PlaylistResolver {
    pub fn new(client: ProbeHttpClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Resolve `playlist_url` to the stream it points at
    ///
    /// Returns the nested URL when the body is a PLS/M3U playlist, the
    /// post-redirect URL when that differs from the input, and the input
    /// unchanged otherwise. Fetch failures are logged and never returned.
    pub async fn resolve(&self, playlist_url: &str) -> String {
        let safe_url = UrlUtils::obfuscate_credentials(playlist_url);

        let (final_url, text) = match self.fetch_bounded(playlist_url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                debug!(target = "stream.resolve", url = %safe_url, error = %e, "Playlist fetch failed, keeping original URL");
                return playlist_url.to_string();
            }
        };

        if let Some(stream_url) = extract_stream_url(&text, &final_url) {
            debug!(
                target = "stream.resolve",
                url = %safe_url,
                resolved = %UrlUtils::obfuscate_credentials(&stream_url),
                "Resolved playlist entry"
            );
            return stream_url;
        }

        if final_url != playlist_url {
            debug!(
                target = "stream.resolve",
                url = %safe_url,
                resolved = %UrlUtils::obfuscate_credentials(&final_url),
                "No playlist entry, using redirect target"
            );
            return final_url;
        }

        playlist_url.to_string()
    }

    async fn fetch_bounded(&self, url: &str) -> Result<(String, String), PlaylistError> {
        tokio::time::timeout(self.timeout, self.fetch(url))
            .await
            .map_err(|_| PlaylistError::Timeout(self.timeout))?
    }

    async fn fetch(&self, url: &str) -> Result<(String, String), PlaylistError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlaylistError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PlaylistError::Status(resp.status().as_u16()));
        }

        let final_url = resp.url().to_string();

        // Stream body in chunks, limit total
        let mut body = resp.bytes_stream();
        let mut collected: Vec<u8> = Vec::with_capacity(4096);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| PlaylistError::Http(e.to_string()))?;
            if collected.len() + chunk.len() > MAX_PLAYLIST_BYTES {
                collected.extend_from_slice(&chunk[..(MAX_PLAYLIST_BYTES - collected.len())]);
                break;
            }
            collected.extend_from_slice(&chunk);
        }

        Ok((final_url, String::from_utf8_lossy(&collected).into_owned()))
    }
}
