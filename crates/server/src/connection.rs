//! WebSocket upgrade and the bridge between a socket and its stream session.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use hyper::header::{self, HeaderValue};
use hyper::upgrade::Upgraded;
use hyper::{Body, Request, Response, StatusCode};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use facestream_core::pipeline::protocol::ClientEvent;
use facestream_core::pipeline::result_publisher::{OutboundReceiver, ResultPublisher};
use facestream_core::pipeline::stream_session::StreamSession;

use crate::proxy::json_error;
use crate::server::AppState;

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Answers the handshake and hands the upgraded socket to a new session.
pub fn upgrade(req: Request<Body>, state: Arc<AppState>) -> Response<Body> {
    if !is_websocket_upgrade(&req) {
        return json_error(StatusCode::BAD_REQUEST, "WebSocket upgrade required");
    }
    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY) else {
        return json_error(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key");
    };
    let accept = derive_accept_key(key.as_bytes());

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => serve_socket(upgraded, state).await,
            Err(e) => log::error!("WebSocket upgrade failed: {e}"),
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    if let Ok(value) = HeaderValue::from_str(&accept) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    }
    response
}

async fn serve_socket(upgraded: Upgraded, state: Arc<AppState>) {
    let socket = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
    let (sink, stream) = socket.split();

    let (publisher, outbound) = ResultPublisher::channel();
    let writer = tokio::spawn(write_outbound(sink, outbound));

    let session = StreamSession::new(
        state.next_session_id(),
        Arc::clone(&state.launcher),
        state.dispatcher.clone(),
        state.throttle,
        publisher,
    );
    session
        .run(stream.filter_map(|msg| futures_util::future::ready(client_event(msg))))
        .await;

    // The session owned the only publisher, so the writer drains and stops.
    if let Err(e) = writer.await {
        log::debug!("WebSocket writer ended abnormally: {e}");
    }
}

/// Drains the outbound queue into the socket, in order.
async fn write_outbound<S>(mut sink: S, mut outbound: OutboundReceiver)
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outbound.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to serialize {message:?}: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text)).await {
            log::debug!("WebSocket send failed, closing writer: {e}");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Maps a socket frame to a session event; control frames are dropped.
fn client_event(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<ClientEvent> {
    match msg {
        Ok(Message::Text(text)) => Some(ClientEvent::Text(text)),
        Ok(Message::Binary(bytes)) => Some(ClientEvent::Text(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Ok(Message::Close(_)) => Some(ClientEvent::Closed),
        Ok(_) => None,
        Err(e) => Some(ClientEvent::Error(e.to_string())),
    }
}
