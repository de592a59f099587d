//! Interception of conversation-start and message-send POSTs.
//!
//! The request is relayed verbatim and its response returned to the client
//! unchanged. On the way, the account is marked `processing`, and the JSON
//! response is searched for a streaming id so a background monitor can
//! watch the reply stream. Without an id, a fallback timer publishes
//! `cui-response-ready` instead.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::CONTENT_LENGTH;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use cuihub_core::{CuiState, ProxyError};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info};

use super::classify::PostKind;
use super::headers::{auth_headers, forward_request_headers, relay_response_headers};
use super::{AccountContext, path_and_query};
use crate::monitor::{StreamHandle, spawn_fallback};

/// Keys the backend has used for the streaming id.
const STREAMING_ID_KEYS: &[&str] = &["streamingId", "streaming_id", "streamId", "stream_id"];

/// Envelopes the id may be nested under.
const ENVELOPES: &[&str] = &["data", "result", "conversation"];

/// Find the streaming id in a POST response body.
///
/// Looks at the top level first, then one envelope deep. Non-JSON bodies
/// and empty ids yield `None`.
pub fn extract_streaming_id(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    id_in(&value).or_else(|| {
        ENVELOPES
            .iter()
            .find_map(|key| value.get(*key).and_then(id_in))
    })
}

fn id_in(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    STREAMING_ID_KEYS.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Collect a request body, failing once it grows past `limit` bytes.
///
/// Covers chunked uploads that carry no `content-length`.
pub async fn read_limited(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(ProxyError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Relay an intercepted POST and arrange completion tracking.
pub async fn relay_with_interception(ctx: AccountContext, req: Request, kind: PostKind) -> Response {
    ctx.publish_state(CuiState::Processing);

    let (parts, body) = req.into_parts();
    let path = path_and_query(&parts.uri);
    let limit = ctx.settings.max_body_bytes;

    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let read = match declared {
        Some(len) if u64::try_from(limit).is_ok_and(|max| len > max) => {
            Err(ProxyError::PayloadTooLarge { limit })
        }
        _ => read_limited(body, limit).await,
    };
    let body = match read {
        Ok(bytes) => bytes,
        Err(err) => {
            ctx.publish_state(CuiState::Done);
            return ctx.client_rejected(&err, path);
        }
    };

    let url = ctx.route.target_url(path);
    let credentials = auth_headers(&parts.headers);
    let resp = match ctx
        .client
        .request(parts.method.clone(), &url)
        .headers(forward_request_headers(&parts.headers))
        .body(body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            ctx.publish_state(CuiState::Done);
            return ctx.upstream_failed(&ProxyError::UpstreamUnreachable(e.to_string()), path);
        }
    };

    let status = resp.status();
    let headers = relay_response_headers(resp.headers());
    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            ctx.publish_state(CuiState::Done);
            return ctx.upstream_failed(&ProxyError::MalformedUpstreamResponse(e.to_string()), path);
        }
    };

    track_completion(&ctx, &kind, &bytes, credentials);

    let mut out = Response::new(Body::from(bytes));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

fn track_completion(ctx: &AccountContext, kind: &PostKind, body: &[u8], credentials: axum::http::HeaderMap) {
    match extract_streaming_id(body) {
        Some(streaming_id) => {
            info!(
                account_id = %ctx.route.id,
                streaming_id = %streaming_id,
                kind = ?kind,
                "monitoring reply stream"
            );
            ctx.monitors.spawn(StreamHandle {
                streaming_id,
                account_id: ctx.route.id.clone(),
                target_base_url: ctx.route.target_base_url.clone(),
                auth_headers: credentials,
            });
        }
        None => {
            debug!(
                account_id = %ctx.route.id,
                kind = ?kind,
                delay_ms = ctx.settings.post_fallback_ms,
                "no streaming id, scheduling fallback"
            );
            drop(spawn_fallback(
                std::sync::Arc::clone(&ctx.hub),
                ctx.route.id.clone(),
                ctx.settings.post_fallback(),
                ctx.shutdown.child_token(),
                "no_streaming_id",
            ));
        }
    }
}
