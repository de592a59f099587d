//! WebSocket upgrade tunnelling.

use axum::extract::FromRequestParts;
use axum::extract::Request;
use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::response::{IntoResponse, Response};
use cuihub_core::ProxyError;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tracing::{debug, info, warn};

use super::headers::auth_headers;
use super::{AccountContext, path_and_query};

/// Failures while bridging a tunnelled socket.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The backend socket could not be opened or failed.
    #[error("backend websocket error: {0}")]
    Backend(#[from] tokio_tungstenite::tungstenite::Error),
    /// The client side failed.
    #[error("client websocket error: {0}")]
    Client(#[from] axum::Error),
}

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the backend, then accept the client's upgrade and bridge the two.
///
/// The backend handshake completes before the client sees `101`, so a dead
/// backend answers the client with `502` instead of an empty socket.
pub async fn upgrade(ctx: AccountContext, req: Request) -> Response {
    let (mut parts, _body) = req.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let path = path_and_query(&parts.uri).to_string();
    let target = ctx.route.ws_target_url(&path);
    let protocols = requested_protocols(&parts.headers);
    let credentials = auth_headers(&parts.headers);
    let account = ctx.route.id.clone();
    debug!(account_id = %account, backend = %target, "tunnelling websocket");

    let backend = match connect_backend(&target, &protocols, &credentials).await {
        Ok(backend) => backend,
        Err(e) => {
            return ctx.upstream_failed(&ProxyError::UpstreamUnreachable(e.to_string()), &path);
        }
    };

    ws.protocols(protocols)
        .on_upgrade(move |socket| async move {
            match bridge(socket, backend).await {
                Ok(()) => info!(account_id = %account, "websocket tunnel closed"),
                Err(e) => warn!(account_id = %account, error = %e, "websocket tunnel failed"),
            }
        })
}

fn requested_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

async fn connect_backend(
    target: &str,
    protocols: &[String],
    credentials: &HeaderMap,
) -> Result<BackendSocket, TunnelError> {
    let mut request = target.into_client_request()?;
    if !protocols.is_empty() {
        if let Ok(value) = protocols.join(", ").parse() {
            let _ = request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
    }
    for (name, value) in credentials {
        let _ = request.headers_mut().append(name.clone(), value.clone());
    }
    let (backend, _) = connect_async(request).await?;
    Ok(backend)
}

async fn bridge(client: WebSocket, backend: BackendSocket) -> Result<(), TunnelError> {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let client_to_backend = async {
        while let Some(msg) = client_rx.next().await {
            let msg = msg?;
            let closing = matches!(msg, AxumMessage::Close(_));
            if backend_tx.send(to_backend(msg)).await.is_err() || closing {
                break;
            }
        }
        Ok::<(), TunnelError>(())
    };

    let backend_to_client = async {
        while let Some(msg) = backend_rx.next().await {
            let msg = msg?;
            let Some(forward) = to_client(msg) else {
                continue;
            };
            let closing = matches!(forward, AxumMessage::Close(_));
            if client_tx.send(forward).await.is_err() || closing {
                break;
            }
        }
        Ok::<(), TunnelError>(())
    };

    tokio::select! {
        result = client_to_backend => result,
        result = backend_to_client => result,
    }
}

fn to_backend(msg: AxumMessage) -> WsMessage {
    match msg {
        AxumMessage::Text(text) => WsMessage::Text(text.as_str().into()),
        AxumMessage::Binary(data) => WsMessage::Binary(data),
        AxumMessage::Ping(data) => WsMessage::Ping(data),
        AxumMessage::Pong(data) => WsMessage::Pong(data),
        AxumMessage::Close(frame) => WsMessage::Close(frame.map(|f| WsCloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        })),
    }
}

fn to_client(msg: WsMessage) -> Option<AxumMessage> {
    Some(match msg {
        WsMessage::Text(text) => AxumMessage::Text(text.as_str().into()),
        WsMessage::Binary(data) => AxumMessage::Binary(data),
        WsMessage::Ping(data) => AxumMessage::Ping(data),
        WsMessage::Pong(data) => AxumMessage::Pong(data),
        WsMessage::Close(frame) => AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        })),
        WsMessage::Frame(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn protocols_split_and_trimmed() {
        let mut h = HeaderMap::new();
        let _ = h.append(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("graphql-ws, json"));
        let _ = h.append(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(" v2 "));
        assert_eq!(requested_protocols(&h), vec!["graphql-ws", "json", "v2"]);
        assert!(requested_protocols(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn text_frames_cross_unchanged() {
        let out = to_backend(AxumMessage::Text("hello".into()));
        assert_eq!(out, WsMessage::Text("hello".into()));
        let back = to_client(WsMessage::Text("world".into())).unwrap();
        assert_eq!(back, AxumMessage::Text("world".into()));
    }

    #[test]
    fn close_codes_are_preserved() {
        let out = to_backend(AxumMessage::Close(Some(AxumCloseFrame {
            code: 4001,
            reason: "bye".into(),
        })));
        match out {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4001);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
