//! Turns a [`Source`]'s pagination strategy into a sequence of requests,
//! decoupled from any HTTP transport. `strot-core` has no HTTP client of its
//! own; callers supply the fetch capability, keeping this crate usable from
//! any runtime or test double.

use crate::cursor::CursorPatternSet;
use crate::model::{PaginationParameter, PaginationStrategy, Request, Source};
use futures::stream::{self, Stream};
use std::collections::BTreeMap;
use std::future::Future;

/// Drives one `Source`'s pagination strategy one page at a time. Holds no
/// transport: callers fetch the body for `next_request()` themselves and
/// report it back via `advance`.
pub struct Paginator<'a> {
    source: &'a Source,
    limit: u32,
    next_offset: u32,
    dynamic_params: BTreeMap<String, String>,
    cursor_patterns: Option<CursorPatternSet>,
    current_cursor: Option<String>,
    exhausted: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        source: &'a Source,
        limit: u32,
        offset: u32,
        dynamic_params: BTreeMap<String, String>,
    ) -> Self {
        let cursor_patterns = match &source.strategy {
            PaginationStrategy::CursorBased {
                cursor: PaginationParameter::Cursor { patterns, .. },
                ..
            } => Some(CursorPatternSet::from_regexes(patterns)),
            _ => None,
        };
        Self {
            source,
            limit: limit.max(1),
            next_offset: offset,
            dynamic_params,
            cursor_patterns,
            current_cursor: None,
            exhausted: false,
        }
    }

    /// True once a cursor-based strategy has run out of successor cursors.
    /// Number-based strategies never self-report exhaustion — the caller
    /// stops pulling once a fetched page comes back with no records.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// The request for the page `advance` should next be called with the
    /// body of.
    pub fn next_request(&self) -> Request {
        let mut params = self.dynamic_params.clone();
        if let Some(cursor) = &self.current_cursor {
            if let PaginationStrategy::CursorBased { cursor: param, .. } = &self.source.strategy {
                params.insert(param.name().to_string(), cursor.clone());
            }
        }
        self.source.build_request_for_page(self.limit, self.next_offset, &params)
    }

    /// Feed back the body fetched for the request `next_request()` most
    /// recently returned, advancing internal counters or cursor state.
    pub fn advance(&mut self, body: &str) {
        match &self.source.strategy {
            PaginationStrategy::CursorBased { .. } => {
                match self.cursor_patterns.as_ref().and_then(|set| set.next_cursor(body)) {
                    Some(cursor) => self.current_cursor = Some(cursor),
                    None => self.exhausted = true,
                }
            }
            _ => self.next_offset += self.limit,
        }
    }
}

/// Turn a `Source` plus an injected async fetch capability into a page
/// stream starting at `limit`/`offset`. Each item is one fetched response
/// body; the stream ends when a cursor-based strategy runs dry or the fetch
/// closure returns an error. Number-based strategies never end on their
/// own — the caller's own consumer decides when to stop (e.g. on an empty
/// extracted page).
pub fn generate<'a, F, Fut, E>(
    source: &'a Source,
    limit: u32,
    offset: u32,
    dynamic_params: BTreeMap<String, String>,
    fetch: F,
) -> impl Stream<Item = Result<String, E>> + 'a
where
    F: Fn(Request) -> Fut + 'a,
    Fut: Future<Output = Result<String, E>> + 'a,
{
    let paginator = Paginator::new(source, limit, offset, dynamic_params);
    stream::unfold((paginator, fetch, false), move |(mut paginator, fetch, stop)| async move {
        if stop || paginator.is_exhausted() {
            return None;
        }
        let request = paginator.next_request();
        match fetch(request).await {
            Ok(body) => {
                paginator.advance(&body);
                let now_exhausted = paginator.is_exhausted();
                Some((Ok(body), (paginator, fetch, now_exhausted)))
            }
            Err(e) => Some((Err(e), (paginator, fetch, true))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Method, NumberRole, ResponseKind};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limit_offset_source() -> Source {
        let mut query = BTreeMap::new();
        query.insert("limit".to_string(), "5".to_string());
        query.insert("offset".to_string(), "0".to_string());
        Source {
            request: Request {
                method: Method::Get,
                base_url: "https://example.com/api/products".to_string(),
                headers: BTreeMap::new(),
                query,
                body: None,
                kind: ResponseKind::Ajax,
            },
            strategy: PaginationStrategy::LimitOffset {
                limit: PaginationParameter::Number {
                    name: "limit".to_string(),
                    default: 20,
                    role: NumberRole::Limit,
                },
                offset: PaginationParameter::Number {
                    name: "offset".to_string(),
                    default: 0,
                    role: NumberRole::Offset,
                },
            },
            preprocessor: None,
            extraction_source: String::new(),
            default_limit: 20,
        }
    }

    #[test]
    fn paginator_advances_offset_by_limit_each_page() {
        let source = limit_offset_source();
        let mut paginator = Paginator::new(&source, 5, 5, BTreeMap::new());

        let first = paginator.next_request();
        assert_eq!(first.query.get("offset").map(String::as_str), Some("5"));
        paginator.advance("{}");

        let second = paginator.next_request();
        assert_eq!(second.query.get("offset").map(String::as_str), Some("10"));
        assert!(!paginator.is_exhausted());
    }

    fn cursor_source() -> Source {
        let mut query = BTreeMap::new();
        query.insert("lastEvaluated".to_string(), "seed-0000".to_string());
        Source {
            request: Request {
                method: Method::Get,
                base_url: "https://example.com/api/reviews".to_string(),
                headers: BTreeMap::new(),
                query,
                body: None,
                kind: ResponseKind::Ajax,
            },
            strategy: PaginationStrategy::CursorBased {
                cursor: PaginationParameter::Cursor {
                    name: "lastEvaluated".to_string(),
                    observed_value: "seed-0000".to_string(),
                    patterns: vec![r#""next":"(?P<value>[^"]{8,})""#.to_string()],
                },
                limit: None,
            },
            preprocessor: None,
            extraction_source: String::new(),
            default_limit: 5,
        }
    }

    #[tokio::test]
    async fn generate_stops_once_cursor_based_strategy_runs_dry() {
        let source = cursor_source();
        let call_count = AtomicUsize::new(0);

        let bodies = generate(&source, 5, 0, BTreeMap::new(), |_request| {
            let n = call_count.fetch_add(1, Ordering::SeqCst);
            async move {
                let body = match n {
                    0 => r#"{"next":"cursor-abcdefgh"}"#.to_string(),
                    1 => r#"{"items":[]}"#.to_string(), // no "next" field: exhausted
                    _ => panic!("should not be called after exhaustion"),
                };
                Ok::<_, std::convert::Infallible>(body)
            }
        })
        .collect::<Vec<_>>()
        .await;

        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].is_ok());
        assert!(bodies[1].is_ok());
    }

    #[tokio::test]
    async fn generate_propagates_fetch_errors_and_stops() {
        let source = limit_offset_source();
        let bodies = generate(&source, 5, 0, BTreeMap::new(), |_request| async {
            Err::<String, _>("network down")
        })
        .collect::<Vec<_>>()
        .await;

        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].is_err());
    }
}
