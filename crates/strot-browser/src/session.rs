//! The narrow capability interface the Analyzer consumes from its
//! environment, plus a concrete implementation on top of `eoka`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

/// Raw network-level metadata for one completed request, captured before
/// any filtering or classification.
#[derive(Debug, Clone)]
pub struct RawRequestMeta {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub post_body: Option<String>,
    /// True for the top-level document load/navigation; false for XHR/fetch.
    pub is_document: bool,
}

/// One network event as delivered to a subscriber: the request metadata
/// paired with the decoded response body text.
#[derive(Debug, Clone)]
pub struct RawNetworkEvent {
    pub request: RawRequestMeta,
    pub body: String,
}

/// The minimum capability surface the Analyzer requires of a controlled
/// browser session. Kept `async_trait`-based and dyn-compatible so the
/// Analyzer crate never depends on `eoka` directly, and so callers can
/// substitute a test double behind a narrow method set instead of exposing
/// the CDP client itself.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn screenshot(&self) -> Result<Vec<u8>>;
    /// Evaluate `script` in the page. `script` must `JSON.stringify` its own
    /// return value; the raw JSON text is parsed into a `Value` here so the
    /// trait stays dyn-compatible. Typed callers deserialize further with
    /// `serde_json::from_value`.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;
    async fn click(&self, x: f64, y: f64) -> Result<()>;
    /// Drain network events observed since the last call. Non-blocking:
    /// returns whatever has arrived so far.
    async fn drain_events(&self) -> Result<Vec<RawNetworkEvent>>;
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Concrete `eoka`-backed session. Owns the browser and page outright so
/// callers never juggle lifetimes — the Analyzer owns its session for the
/// duration of one `analyze()` call and never shares it across calls.
pub struct EokaSession {
    browser: eoka::Browser,
    page: eoka::Page,
    events: Arc<Mutex<Vec<RawNetworkEvent>>>,
    network_listener: JoinHandle<()>,
}

impl EokaSession {
    pub async fn launch(config: eoka::StealthConfig) -> Result<Self> {
        let browser = eoka::Browser::launch_with_config(config).await?;
        let page = browser.new_page("about:blank").await?;
        let events = Arc::new(Mutex::new(Vec::new()));
        Self::install_plugin(&page).await?;
        let network_listener = Self::spawn_network_listener(&page, Arc::clone(&events)).await?;
        Ok(Self {
            browser,
            page,
            events,
            network_listener,
        })
    }

    /// Re-inject the DOM plugin's idempotency guard. Re-invoked by `navigate`
    /// after same-site navigations, since a fresh document detaches
    /// previously injected script state. The network listener is unaffected
    /// by navigation — it is attached once per page at the CDP level.
    async fn install_plugin(page: &eoka::Page) -> Result<()> {
        let _: String = page.evaluate(crate::plugin::INSTALL_JS).await?;
        Ok(())
    }

    /// Subscribe to the page's CDP Network domain and push a `RawNetworkEvent`
    /// for every response once its body finishes loading. Request metadata
    /// arrives on `RequestWillBeSent`/`ResponseReceived` and is joined with
    /// the body fetched on `LoadingFinished`, matched by CDP request id.
    async fn spawn_network_listener(
        page: &eoka::Page,
        events: Arc<Mutex<Vec<RawNetworkEvent>>>,
    ) -> Result<JoinHandle<()>> {
        let mut request_sent = page
            .event_listener::<eoka::cdp::EventRequestWillBeSent>()
            .await?;
        let mut response_received = page
            .event_listener::<eoka::cdp::EventResponseReceived>()
            .await?;
        let mut loading_finished = page
            .event_listener::<eoka::cdp::EventLoadingFinished>()
            .await?;
        let page = page.clone();

        Ok(tokio::spawn(async move {
            let mut pending: HashMap<String, RawRequestMeta> = HashMap::new();

            loop {
                tokio::select! {
                    Some(event) = request_sent.next() => {
                        let id = event.request_id.inner().to_string();
                        let is_document = matches!(event.ty, Some(eoka::cdp::ResourceType::Document));
                        pending.insert(
                            id,
                            RawRequestMeta {
                                method: event.request.method.clone(),
                                url: event.request.url.clone(),
                                headers: event
                                    .request
                                    .headers
                                    .iter()
                                    .map(|(k, v)| (k.clone(), v.to_string()))
                                    .collect(),
                                post_body: event.request.post_data.clone(),
                                is_document,
                            },
                        );
                    }
                    Some(event) = response_received.next() => {
                        let id = event.request_id.inner().to_string();
                        if let Some(meta) = pending.get_mut(&id) {
                            meta.url = event.response.url.clone();
                        }
                    }
                    Some(event) = loading_finished.next() => {
                        let id = event.request_id.inner().to_string();
                        let Some(meta) = pending.remove(&id) else { continue };
                        let Ok(body) = page.get_response_body(&event.request_id).await else {
                            continue;
                        };
                        let mut guard = events.lock().await;
                        guard.push(RawNetworkEvent { request: meta, body: body.body });
                    }
                    else => break,
                }
            }
        }))
    }
}

impl Drop for EokaSession {
    fn drop(&mut self) {
        self.network_listener.abort();
    }
}

#[async_trait]
impl BrowserSession for EokaSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Self::install_plugin(&self.page).await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let raw: String = self.page.evaluate(script).await?;
        serde_json::from_str(&raw).map_err(Error::from)
    }

    async fn click(&self, x: f64, y: f64) -> Result<()> {
        self.page.click_at(x, y).await?;
        Ok(())
    }

    async fn drain_events(&self) -> Result<Vec<RawNetworkEvent>> {
        let mut guard = self.events.lock().await;
        Ok(std::mem::take(&mut *guard))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}
