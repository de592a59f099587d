//! Streamed relay of `GET {stream_prefix}{id}` with inline completion
//! detection.
//!
//! Chunks are forwarded to the client unmodified as they arrive. A
//! [`CompletionTap`] watches them on the way through and publishes state
//! changes for the account:
//!
//! - first chunk: `processing`
//! - first chunk matching a completion marker: `done` + `cui-response-ready`
//! - upstream end after at least one chunk: `done` + `cui-response-ready`
//!   again (duplicates are expected by observers)
//! - upstream read error: `done`
//!
//! A client that disconnects drops the tap without any publish.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::response::Response;
use bytes::Bytes;
use cuihub_core::detector::detect;
use cuihub_core::{AccountId, CuiState, HubEvent, ProxyError};
use futures::Stream;
use pin_project_lite::pin_project;
use tracing::{debug, info, warn};

use super::headers::relay_request_headers;
use super::transparent::stream_response;
use super::{AccountContext, path_and_query};
use crate::websocket::broadcast::BroadcastHub;

/// Publishes state transitions for one relayed stream.
pub struct RelayTracker {
    account: AccountId,
    hub: Arc<BroadcastHub>,
    chunks: u64,
    bytes: u64,
    detected: bool,
    finished: bool,
}

impl RelayTracker {
    /// Tracker for `account`, publishing to `hub`.
    pub fn new(account: AccountId, hub: Arc<BroadcastHub>) -> Self {
        Self {
            account,
            hub,
            chunks: 0,
            bytes: 0,
            detected: false,
            finished: false,
        }
    }

    fn publish(&self, event: &HubEvent) {
        let _ = self.hub.publish(event);
    }

    fn complete(&self) {
        self.publish(&HubEvent::state(self.account.clone(), CuiState::Done));
        self.publish(&HubEvent::response_ready(self.account.clone()));
    }

    /// A chunk passed through.
    pub fn on_chunk(&mut self, chunk: &[u8]) {
        if self.finished || chunk.is_empty() {
            return;
        }
        if self.chunks == 0 {
            self.publish(&HubEvent::state(self.account.clone(), CuiState::Processing));
        }
        self.chunks += 1;
        self.bytes += chunk.len() as u64;
        if !self.detected && detect(chunk) {
            self.detected = true;
            debug!(account_id = %self.account, chunk = self.chunks, "completion marker in stream");
            self.complete();
        }
    }

    /// Upstream ended cleanly.
    pub fn on_end(&mut self) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        info!(
            account_id = %self.account,
            chunks = self.chunks,
            bytes = self.bytes,
            detected = self.detected,
            "stream relay ended"
        );
        if self.chunks > 0 {
            self.complete();
        }
    }

    /// Upstream failed mid-stream.
    pub fn on_error(&mut self) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        warn!(account_id = %self.account, chunks = self.chunks, "stream relay read error");
        self.publish(&HubEvent::state(self.account.clone(), CuiState::Done));
    }
}

pin_project! {
    /// Byte stream adapter that feeds every item through a [`RelayTracker`].
    pub struct CompletionTap<S> {
        #[pin]
        inner: S,
        tracker: RelayTracker,
    }
}

impl<S> CompletionTap<S> {
    /// Wrap `inner`.
    pub fn new(inner: S, tracker: RelayTracker) -> Self {
        Self { inner, tracker }
    }
}

impl<S, E> Stream for CompletionTap<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = ready!(this.inner.poll_next(cx));
        match &item {
            Some(Ok(chunk)) => this.tracker.on_chunk(chunk),
            Some(Err(_)) => this.tracker.on_error(),
            None => this.tracker.on_end(),
        }
        Poll::Ready(item)
    }
}

/// Relay a stream request, tapping it for completion.
///
/// Connection failures publish `done` and answer `502`. A non-success
/// upstream status is relayed verbatim and also publishes `done`, since no
/// stream will follow.
pub async fn relay_stream(ctx: AccountContext, req: Request, stream_id: String) -> Response {
    let (parts, _body) = req.into_parts();
    let path = path_and_query(&parts.uri);
    let url = ctx.route.target_url(path);
    debug!(account_id = %ctx.route.id, stream_id = %stream_id, "opening stream relay");

    let resp = match ctx
        .client
        .request(parts.method.clone(), &url)
        .headers(relay_request_headers(&parts.headers))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            ctx.publish_state(CuiState::Done);
            return ctx.upstream_failed(&ProxyError::UpstreamUnreachable(e.to_string()), path);
        }
    };

    if !resp.status().is_success() {
        warn!(
            account_id = %ctx.route.id,
            stream_id = %stream_id,
            status = resp.status().as_u16(),
            "stream request rejected upstream"
        );
        ctx.publish_state(CuiState::Done);
        return stream_response(resp);
    }

    let tracker = RelayTracker::new(ctx.route.id.clone(), Arc::clone(&ctx.hub));
    let tap = CompletionTap::new(resp.bytes_stream(), tracker);

    let mut out = Response::new(Body::from_stream(tap));
    let headers = out.headers_mut();
    let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    let _ = headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    let _ = headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    let _ = headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ObserverConnection;
    use futures::StreamExt;
    use futures::stream;

    fn hub_with_observer() -> (Arc<BroadcastHub>, tokio::sync::mpsc::Receiver<Arc<String>>) {
        let hub = Arc::new(BroadcastHub::new());
        let (conn, rx) = ObserverConnection::channel(64);
        hub.register(conn);
        (hub, rx)
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<Arc<String>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
            let kind = v["type"].as_str().unwrap().to_string();
            match v["state"].as_str() {
                Some(state) => out.push(format!("{kind}:{state}")),
                None => out.push(kind),
            }
        }
        out
    }

    fn chunks(items: &[&'static str]) -> Vec<Result<Bytes, std::io::Error>> {
        items.iter().map(|s| Ok(Bytes::from_static(s.as_bytes()))).collect()
    }

    async fn run(items: Vec<Result<Bytes, std::io::Error>>) -> Vec<String> {
        let (hub, mut rx) = hub_with_observer();
        let tap = CompletionTap::new(
            stream::iter(items),
            RelayTracker::new(AccountId::from("a1"), Arc::clone(&hub)),
        );
        let _: Vec<_> = tap.collect().await;
        drain(&mut rx)
    }

    #[tokio::test]
    async fn marker_then_end_publishes_done_twice() {
        let events = run(chunks(&[
            "data: {\"type\":\"assistant\"}\n\n",
            "data: {\"type\":\"result\"}\n\n",
        ]))
        .await;
        assert_eq!(
            events,
            vec![
                "cui-state:processing",
                "cui-state:done",
                "cui-response-ready",
                "cui-state:done",
                "cui-response-ready",
            ]
        );
    }

    #[tokio::test]
    async fn end_without_marker_still_completes() {
        let events = run(chunks(&["data: {\"type\":\"assistant\"}\n\n"])).await;
        assert_eq!(
            events,
            vec!["cui-state:processing", "cui-state:done", "cui-response-ready"]
        );
    }

    #[tokio::test]
    async fn empty_stream_publishes_nothing() {
        assert!(run(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn repeated_markers_publish_once() {
        let events = run(chunks(&[
            "data: {\"type\":\"result\"}\n\n",
            "data: {\"type\":\"result\"}\n\n",
            "data: {\"type\":\"closed\"}\n\n",
        ]))
        .await;
        let ready = events.iter().filter(|e| *e == "cui-response-ready").count();
        assert_eq!(ready, 2, "one for the marker, one for the end: {events:?}");
    }

    #[tokio::test]
    async fn read_error_publishes_done_only() {
        let mut items = chunks(&["data: {}\n\n"]);
        items.push(Err(std::io::Error::other("reset")));
        let events = run(items).await;
        assert_eq!(events, vec!["cui-state:processing", "cui-state:done"]);
    }

    #[tokio::test]
    async fn dropped_client_publishes_nothing_after_processing() {
        let (hub, mut rx) = hub_with_observer();
        let mut tap = CompletionTap::new(
            stream::iter(chunks(&["data: a\n\n", "data: b\n\n"])),
            RelayTracker::new(AccountId::from("a1"), Arc::clone(&hub)),
        );
        let _ = tap.next().await;
        drop(tap);
        assert_eq!(drain(&mut rx), vec!["cui-state:processing"]);
        assert_eq!(hub.state_of(&AccountId::from("a1")), Some(CuiState::Processing));
    }
}
