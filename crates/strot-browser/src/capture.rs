//! C4: interception of XHR/fetch responses and server-rendered HTML,
//! filtering of analytics/asset noise, storage keyed by arrival order.

use crate::session::RawNetworkEvent;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use strot_core::model::{Body, CapturedResponse, Method, Preprocessor, Request, ResponseKind};
use std::sync::OnceLock;

/// Whether same-URL duplicate captures are treated as noise (drop later) or
/// updates (replace earlier). Defaults to "replace earlier"; exposed as a
/// configurable policy for tests that need the alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    ReplaceEarlier,
    DropLater,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        DedupPolicy::ReplaceEarlier
    }
}

fn noise_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)google-analytics\.com",
            r"(?i)googletagmanager\.com",
            r"(?i)doubleclick\.net",
            r"(?i)facebook\.com/tr",
            r"(?i)segment\.(io|com)",
            r"(?i)/analytics/",
            r"(?i)/telemetry/",
            r"(?i)/collect\b",
            r"(?i)\.(png|jpe?g|gif|svg|webp|ico|css|woff2?|ttf|eot|map)(\?|$)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern is valid"))
        .collect()
    })
}

fn is_noise(url: &str) -> bool {
    noise_patterns().iter().any(|re| re.is_match(url))
}

fn body_hash(body: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    hasher.finish()
}

/// Accumulates captures for the duration of one `analyze()` call.
#[derive(Debug, Default)]
pub struct ResponseCapture {
    dedup_policy: DedupPolicy,
    captures: Vec<CapturedResponse>,
    next_ordinal: u64,
    first_ssr_seen: bool,
    /// (request identity, body hash) -> index into `captures`, for
    /// coalescing duplicates.
    seen: std::collections::HashMap<(String, String, u64), usize>,
}

impl ResponseCapture {
    pub fn new(dedup_policy: DedupPolicy) -> Self {
        Self {
            dedup_policy,
            ..Default::default()
        }
    }

    pub fn captures(&self) -> &[CapturedResponse] {
        &self.captures
    }

    /// Attach a preprocessor to an already-captured response, late, as the
    /// data model allows (the only mutation a CapturedResponse ever
    /// receives after creation).
    pub fn attach_preprocessor(&mut self, index: usize, preprocessor: Preprocessor) {
        if let Some(capture) = self.captures.get_mut(index) {
            capture.preprocessor = Some(preprocessor);
        }
    }

    /// Ingest one raw network event, applying the filter/classify/dedup/
    /// header-normalization pipeline. Returns true if the event resulted in
    /// a new or updated capture.
    pub fn ingest(&mut self, event: RawNetworkEvent) -> bool {
        if is_noise(&event.request.url) {
            return false;
        }

        let kind = if event.request.is_document {
            ResponseKind::Ssr
        } else {
            ResponseKind::Ajax
        };

        if kind == ResponseKind::Ssr && !self.first_ssr_seen {
            self.first_ssr_seen = true;
            return false;
        }

        let request = Self::to_request(&event, kind);
        let identity = (
            event.request.method.clone(),
            event.request.url.clone(),
            body_hash(&event.body),
        );

        if let Some(&existing_idx) = self.seen.get(&identity) {
            return match self.dedup_policy {
                DedupPolicy::DropLater => false,
                DedupPolicy::ReplaceEarlier => {
                    let ordinal = self.captures[existing_idx].ordinal;
                    self.captures[existing_idx] = CapturedResponse {
                        request,
                        body: event.body,
                        ordinal,
                        preprocessor: None,
                    };
                    true
                }
            };
        }

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        let idx = self.captures.len();
        self.captures.push(CapturedResponse {
            request,
            body: event.body,
            ordinal,
            preprocessor: None,
        });
        self.seen.insert(identity, idx);
        true
    }

    fn to_request(event: &RawNetworkEvent, kind: ResponseKind) -> Request {
        let method = if event.request.method.eq_ignore_ascii_case("post") {
            Method::Post
        } else {
            Method::Get
        };

        let (base_url, query) = split_url(&event.request.url);

        let headers = event
            .request
            .headers
            .iter()
            .filter(|(name, _)| !Request::is_hop_by_hop_or_pseudo(name))
            .cloned()
            .collect();

        let body = event.request.post_body.as_ref().and_then(|raw| {
            serde_json::from_str::<serde_json::Value>(raw)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .map(Body::Json)
        });

        Request {
            method,
            base_url,
            headers,
            query,
            body,
            kind,
        }
    }
}

fn split_url(url: &str) -> (String, std::collections::BTreeMap<String, String>) {
    let mut map = std::collections::BTreeMap::new();
    let Some((base, qs)) = url.split_once('?') else {
        return (url.to_string(), map);
    };
    for pair in qs.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        map.insert(urldecode(k), urldecode(v));
    }
    (base.to_string(), map)
}

fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
