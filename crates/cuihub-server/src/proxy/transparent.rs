//! Unbuffered passthrough.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::response::Response;
use cuihub_core::ProxyError;

use super::headers::{forward_request_headers, relay_response_headers};
use super::{AccountContext, path_and_query};

/// Forward a request to the backend, streaming both bodies.
///
/// Status, headers (minus hop-by-hop) and body are relayed as-is. Connection
/// failures answer `502`.
pub async fn forward(ctx: AccountContext, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let path = path_and_query(&parts.uri);
    let url = ctx.route.target_url(path);

    let has_body =
        parts.headers.contains_key(CONTENT_LENGTH) || parts.headers.contains_key(TRANSFER_ENCODING);
    let mut upstream = ctx
        .client
        .request(parts.method.clone(), &url)
        .headers(forward_request_headers(&parts.headers));
    if has_body {
        upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    match upstream.send().await {
        Ok(resp) => stream_response(resp),
        Err(e) => ctx.upstream_failed(&ProxyError::UpstreamUnreachable(e.to_string()), path),
    }
}

/// Relay an upstream response without buffering.
pub fn stream_response(resp: reqwest::Response) -> Response {
    let status = resp.status();
    let headers = relay_response_headers(resp.headers());
    let mut out = Response::new(Body::from_stream(resp.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}
