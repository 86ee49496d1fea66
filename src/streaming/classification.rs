/*!
 * Signature Classification
 * ========================
 *
 * Pure classification of one HTTP response (status, headers, a few hundred body
 * bytes) into a liveness verdict. No I/O happens here; the prober feeds each
 * stage's response through [`classify`] and decides what to do with an
 * inconclusive answer.
 *
 * Rules live in [`SIGNATURE_RULES`] and are evaluated in order, first match
 * wins:
 *
 *   1. status >= 400                     -> http_<status>
 *   2. non-audio content type            -> not_audio
 *   3. any `icy-*` header                -> icy_stream
 *   4. playlist content type             -> pls_playlist / hls_playlist
 *   5. audio / container content type    -> valid_audio
 *   6. body starts with `#EXTM3U`        -> hls_playlist
 *   7. body is a PLS document            -> pls_playlist
 *   8. body carries an audio signature   -> binary_audio
 *
 * Header rules come before body rules, so classifying with an empty body
 * yields the same answer the full classification would give whenever a header
 * rule matches. Explicit negatives come before positives so an HTML error
 * page never trips a loose audio heuristic.
 */

use reqwest::header::{CONTENT_TYPE, HeaderMap};

use crate::models::ReasonCode;
use crate::streaming::playlist::{PlaylistKind, detect_playlist};

/// Content types that are definitely not a stream
const NON_AUDIO_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "text/plain",
    "text/xml",
    "text/css",
    "text/javascript",
    "application/json",
    "application/xml",
    "application/xhtml+xml",
    "application/javascript",
    "application/problem+json",
];

const PLS_CONTENT_TYPES: &[&str] = &["audio/x-scpls", "audio/scpls", "application/pls+xml"];

const M3U_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/x-mpegurl",
    "audio/mpegurl",
];

/// Non-`audio/*` types that still carry audio
const CONTAINER_CONTENT_TYPES: &[&str] = &[
    "application/ogg",
    "application/x-ogg",
    "application/octet-stream",
    "video/mp4",
    "video/mp2t",
];

/// One response as seen by the classifier
#[derive(Debug, Clone, Copy)]
pub struct ResponseSnapshot<'a> {
    pub status: u16,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

impl<'a> ResponseSnapshot<'a> {
    pub fn new(status: u16, headers: &'a HeaderMap, body: &'a [u8]) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Lower-cased MIME essence without parameters (`audio/mpeg; charset=x` -> `audio/mpeg`)
    pub fn mime(&self) -> Option<String> {
        mime_essence(self.headers)
    }
}

/// A decisive classification and the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub reason: ReasonCode,
    pub rule: &'static str,
}

impl Verdict {
    pub fn is_live(&self) -> bool {
        self.reason.is_positive()
    }
}

type RuleCheck = fn(&ResponseSnapshot<'_>) -> Option<ReasonCode>;

/// One `(predicate, verdict)` entry of the ordered rule table
pub struct SignatureRule {
    pub name: &'static str,
    check: RuleCheck,
}

pub const SIGNATURE_RULES: &[SignatureRule] = &[
    SignatureRule {
        name: "http_error",
        check: http_error,
    },
    SignatureRule {
        name: "non_audio_content_type",
        check: non_audio_content_type,
    },
    SignatureRule {
        name: "icy_headers",
        check: icy_headers,
    },
    SignatureRule {
        name: "playlist_content_type",
        check: playlist_content_type,
    },
    SignatureRule {
        name: "audio_content_type",
        check: audio_content_type,
    },
    SignatureRule {
        name: "hls_signature",
        check: hls_signature,
    },
    SignatureRule {
        name: "pls_signature",
        check: pls_signature,
    },
    SignatureRule {
        name: "binary_audio_signature",
        check: binary_audio_signature,
    },
];

/// Classify a response; `None` means inconclusive.
pub fn classify(status: u16, headers: &HeaderMap, body_prefix: &[u8]) -> Option<Verdict> {
    classify_snapshot(&ResponseSnapshot::new(status, headers, body_prefix))
}

pub fn classify_snapshot(snapshot: &ResponseSnapshot<'_>) -> Option<Verdict> {
    SIGNATURE_RULES.iter().find_map(|rule| {
        (rule.check)(snapshot).map(|reason| Verdict {
            reason,
            rule: rule.name,
        })
    })
}

/// Content type header as sent, for reporting
pub fn content_type_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn mime_essence(headers: &HeaderMap) -> Option<String> {
    content_type_header(headers)
        .and_then(|v| v.split(';').next().map(|m| m.trim().to_ascii_lowercase()))
        .filter(|m| !m.is_empty())
}

/* -----------------------------
 * Header rules
 * --------------------------- */

fn http_error(snapshot: &ResponseSnapshot<'_>) -> Option<ReasonCode> {
    (snapshot.status >= 400).then_some(ReasonCode::Http(snapshot.status))
}

fn non_audio_content_type(snapshot: &ResponseSnapshot<'_>) -> Option<ReasonCode> {
    let mime = snapshot.mime()?;
    (NON_AUDIO_CONTENT_TYPES.contains(&mime.as_str()) || mime.starts_with("image/"))
        .then_some(ReasonCode::NotAudio)
}

fn icy_headers(snapshot: &ResponseSnapshot<'_>) -> Option<ReasonCode> {
    snapshot
        .headers
        .keys()
        .any(|name| name.as_str().starts_with("icy-"))
        .then_some(ReasonCode::IcyStream)
}

fn playlist_content_type(snapshot: &ResponseSnapshot<'_>) -> Option<ReasonCode> {
    let mime = snapshot.mime()?;
    if PLS_CONTENT_TYPES.contains(&mime.as_str()) {
        Some(ReasonCode::PlsPlaylist)
    } else if M3U_CONTENT_TYPES.contains(&mime.as_str()) {
        Some(ReasonCode::HlsPlaylist)
    } else {
        None
    }
}

fn audio_content_type(snapshot: &ResponseSnapshot<'_>) -> Option<ReasonCode> {
    let mime = snapshot.mime()?;
    (mime.starts_with("audio/") || CONTAINER_CONTENT_TYPES.contains(&mime.as_str()))
        .then_some(ReasonCode::ValidAudio)
}

/* -----------------------------
 * Body rules
 * --------------------------- */

fn hls_signature(snapshot: &ResponseSnapshot<'_>) -> Option<ReasonCode> {
    matches!(detect_playlist(snapshot.body), Some(PlaylistKind::M3u))
        .then_some(ReasonCode::HlsPlaylist)
}

fn pls_signature(snapshot: &ResponseSnapshot<'_>) -> Option<ReasonCode> {
    matches!(detect_playlist(snapshot.body), Some(PlaylistKind::Pls))
        .then_some(ReasonCode::PlsPlaylist)
}

fn binary_audio_signature(snapshot: &ResponseSnapshot<'_>) -> Option<ReasonCode> {
    has_audio_signature(snapshot.body).then_some(ReasonCode::BinaryAudio)
}

/// ID3 tag, OGG capture pattern, FLAC marker, or an MPEG/ADTS frame header
/// anywhere in the prefix (live streams rarely start on a frame boundary).
pub fn has_audio_signature(body: &[u8]) -> bool {
    const MAGIC: &[&[u8]] = &[b"ID3", b"OggS", b"fLaC"];
    if MAGIC.iter().any(|magic| body.starts_with(magic)) {
        return true;
    }
    body.windows(3).any(is_frame_header)
}

fn is_frame_header(window: &[u8]) -> bool {
    let (b0, b1, b2) = (window[0], window[1], window[2]);
    if b0 != 0xFF || b1 & 0xE0 != 0xE0 {
        return false;
    }
    // ADTS (AAC): 12-bit sync, layer 00
    if b1 & 0xF6 == 0xF0 {
        return (b2 >> 2) & 0x0F < 13;
    }
    let version = (b1 >> 3) & 0x03;
    let layer = (b1 >> 1) & 0x03;
    let bitrate_index = b2 >> 4;
    let sample_rate_index = (b2 >> 2) & 0x03;
    version != 0x01 && layer != 0x00 && bitrate_index != 0x0F && sample_rate_index != 0x03
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};
    use rstest::rstest;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    const MP3_FRAME: &[u8] = &[0xFF, 0xFB, 0x90, 0x64, 0x00, 0x00];
    const ADTS_FRAME: &[u8] = &[0xFF, 0xF1, 0x50, 0x80, 0x2E, 0x7F];

    #[rstest]
    #[case(404, &[], b"", Some(ReasonCode::Http(404)))]
    #[case(503, &[("content-type", "audio/mpeg")], b"", Some(ReasonCode::Http(503)))]
    #[case(200, &[("content-type", "text/html; charset=utf-8")], b"", Some(ReasonCode::NotAudio))]
    #[case(200, &[("content-type", "application/json")], b"", Some(ReasonCode::NotAudio))]
    #[case(200, &[("content-type", "audio/mpeg")], b"", Some(ReasonCode::ValidAudio))]
    #[case(200, &[("content-type", "audio/aacp")], b"", Some(ReasonCode::ValidAudio))]
    #[case(200, &[("content-type", "application/ogg")], b"", Some(ReasonCode::ValidAudio))]
    #[case(200, &[("content-type", "video/mp4")], b"", Some(ReasonCode::ValidAudio))]
    #[case(200, &[("content-type", "application/octet-stream")], b"", Some(ReasonCode::ValidAudio))]
    #[case(200, &[("content-type", "audio/x-scpls")], b"", Some(ReasonCode::PlsPlaylist))]
    #[case(200, &[("content-type", "application/vnd.apple.mpegurl")], b"", Some(ReasonCode::HlsPlaylist))]
    #[case(200, &[("content-type", "audio/x-mpegurl")], b"", Some(ReasonCode::HlsPlaylist))]
    #[case(200, &[("icy-name", "SomaFM")], b"", Some(ReasonCode::IcyStream))]
    #[case(200, &[], b"#EXTM3U\n#EXT-X-VERSION:3\n", Some(ReasonCode::HlsPlaylist))]
    #[case(200, &[], b"[Playlist]\nNumberOfEntries=1\n", Some(ReasonCode::PlsPlaylist))]
    #[case(200, &[], b"NumberOfEntries=1\nFile1=http://a/b\n", Some(ReasonCode::PlsPlaylist))]
    #[case(200, &[], b"ID3\x04\x00\x00\x00\x00\x00\x00", Some(ReasonCode::BinaryAudio))]
    #[case(200, &[], b"OggS\x00\x02", Some(ReasonCode::BinaryAudio))]
    #[case(200, &[], b"fLaC\x00\x00\x00\x22", Some(ReasonCode::BinaryAudio))]
    #[case(200, &[], b"hello world", None)]
    #[case(200, &[("content-type", "binary/x-unknown")], b"", None)]
    #[case(206, &[], b"", None)]
    fn classification_table(
        #[case] status: u16,
        #[case] header_pairs: &[(&str, &str)],
        #[case] body: &[u8],
        #[case] expected: Option<ReasonCode>,
    ) {
        let map = headers(header_pairs);
        assert_eq!(classify(status, &map, body).map(|v| v.reason), expected);
    }

    #[test]
    fn icy_preferred_over_octet_stream() {
        let map = headers(&[
            ("content-type", "application/octet-stream"),
            ("icy-br", "128"),
            ("icy-genre", "ambient"),
        ]);
        let verdict = classify(200, &map, b"").unwrap();
        assert_eq!(verdict.reason, ReasonCode::IcyStream);
        assert_eq!(verdict.rule, "icy_headers");
        assert!(verdict.is_live());
    }

    #[test]
    fn icy_preferred_over_audio_mpeg() {
        let map = headers(&[("content-type", "audio/mpeg"), ("icy-name", "Groove Salad")]);
        assert_eq!(
            classify(200, &map, MP3_FRAME).unwrap().reason,
            ReasonCode::IcyStream
        );
    }

    #[test]
    fn html_never_matches_audio_heuristics() {
        let map = headers(&[("content-type", "text/html")]);
        let mut body = b"<html>".to_vec();
        body.extend_from_slice(MP3_FRAME);
        let verdict = classify(200, &map, &body).unwrap();
        assert_eq!(verdict.reason, ReasonCode::NotAudio);
        assert!(!verdict.is_live());
    }

    #[test]
    fn error_status_beats_icy_headers() {
        let map = headers(&[("icy-name", "Down Station")]);
        assert_eq!(
            classify(502, &map, b"").unwrap().reason,
            ReasonCode::Http(502)
        );
    }

    #[test]
    fn text_plain_playlist_is_not_audio() {
        // Content-type negatives run before body signatures
        let map = headers(&[("content-type", "text/plain")]);
        assert_eq!(
            classify(200, &map, b"[playlist]\nFile1=http://x/\n")
                .unwrap()
                .reason,
            ReasonCode::NotAudio
        );
    }

    #[test]
    fn header_only_classification_matches_full_when_header_rule_fires() {
        let map = headers(&[("content-type", "audio/ogg")]);
        let header_only = classify(200, &map, b"");
        let full = classify(200, &map, b"OggS\x00\x02\x00\x00");
        assert_eq!(header_only, full);
    }

    #[test]
    fn frame_sync_detected_mid_stream() {
        let mut body = vec![0x12, 0x34, 0x56];
        body.extend_from_slice(MP3_FRAME);
        assert!(has_audio_signature(&body));
        assert!(has_audio_signature(ADTS_FRAME));
    }

    #[test]
    fn invalid_frame_headers_rejected() {
        // reserved version
        assert!(!has_audio_signature(&[0xFF, 0xEB, 0x90]));
        // bad bitrate index
        assert!(!has_audio_signature(&[0xFF, 0xFB, 0xF0]));
        // bad sample rate index
        assert!(!has_audio_signature(&[0xFF, 0xFB, 0x9C]));
        assert!(!has_audio_signature(b"plain ascii text"));
        assert!(!has_audio_signature(&[]));
    }

    #[test]
    fn rule_table_order_is_fixed() {
        let names: Vec<_> = SIGNATURE_RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "http_error",
                "non_audio_content_type",
                "icy_headers",
                "playlist_content_type",
                "audio_content_type",
                "hls_signature",
                "pls_signature",
                "binary_audio_signature",
            ]
        );
    }

    #[test]
    fn content_type_header_keeps_parameters() {
        let map = headers(&[("content-type", "audio/mpeg; charset=binary")]);
        assert_eq!(
            content_type_header(&map).as_deref(),
            Some("audio/mpeg; charset=binary")
        );
        assert_eq!(
            ResponseSnapshot::new(200, &map, b"").mime().as_deref(),
            Some("audio/mpeg")
        );
    }
}
