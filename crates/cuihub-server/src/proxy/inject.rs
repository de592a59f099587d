//! HTML script injection for page loads.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use cuihub_core::ProxyError;
use futures::stream;
use tracing::debug;

use super::headers::{forward_request_headers, rewritten_response_headers};
use super::transparent::stream_response;
use super::{AccountContext, path_and_query};

/// Script inserted into every proxied page.
///
/// Unregisters any service worker left over from a direct visit and reports
/// the current location to the embedding dashboard.
pub const INJECTED_SCRIPT: &str = r"<script data-cuihub>
(function () {
  if ('serviceWorker' in navigator) {
    navigator.serviceWorker.getRegistrations().then(function (regs) {
      regs.forEach(function (r) { r.unregister(); });
    });
  }
  function report() {
    if (window.parent !== window) {
      window.parent.postMessage({ type: 'cui-location', href: location.href, path: location.pathname }, '*');
    }
  }
  window.addEventListener('popstate', report);
  var push = history.pushState;
  history.pushState = function () { push.apply(this, arguments); report(); };
  report();
})();
</script>";

const HEAD_CLOSE: &[u8] = b"</head>";

/// Insert `script` immediately before the first `</head>` (ASCII
/// case-insensitive).
///
/// Returns `None` when the document has no `</head>`; callers relay it
/// unchanged.
pub fn inject_script(html: &[u8], script: &str) -> Option<Vec<u8>> {
    let at = html
        .windows(HEAD_CLOSE.len())
        .position(|w| w.eq_ignore_ascii_case(HEAD_CLOSE))?;
    let mut out = Vec::with_capacity(html.len() + script.len());
    out.extend_from_slice(&html[..at]);
    out.extend_from_slice(script.as_bytes());
    out.extend_from_slice(&html[at..]);
    Some(out)
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

/// Fetch a page, inject [`INJECTED_SCRIPT`] into HTML responses, and relay
/// everything else untouched.
pub async fn serve_page(ctx: AccountContext, req: Request) -> Response {
    let (parts, _body) = req.into_parts();
    let path = path_and_query(&parts.uri);
    let url = ctx.route.target_url(path);

    let mut headers = forward_request_headers(&parts.headers);
    let _ = headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    let resp = match ctx
        .client
        .request(parts.method.clone(), &url)
        .headers(headers)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => return ctx.upstream_failed(&ProxyError::UpstreamUnreachable(e.to_string()), path),
    };

    if !is_html(resp.headers()) {
        return stream_response(resp);
    }

    let status = resp.status();
    let headers = rewritten_response_headers(resp.headers());
    let html = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ctx.upstream_failed(&ProxyError::MalformedUpstreamResponse(e.to_string()), path);
        }
    };

    let body = match inject_script(&html, INJECTED_SCRIPT) {
        Some(injected) => unsized_body(injected),
        None => {
            debug!(account_id = %ctx.route.id, path, "no </head>, relaying page unchanged");
            Body::from(html)
        }
    };
    let mut out = Response::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// One-chunk body with no exact size, so the page goes out without a
/// `content-length`.
fn unsized_body(bytes: Vec<u8>) -> Body {
    Body::from_stream(stream::once(async move { Ok::<_, Infallible>(Bytes::from(bytes)) }))
}
