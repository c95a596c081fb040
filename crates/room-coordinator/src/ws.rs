//! WebSocket signaling endpoint.
//!
//! Each accepted socket gets a connection ID, a bounded outbound queue and
//! two halves:
//!
//! - a writer task that drains the outbound queue into the socket
//! - a reader loop that decodes frames and hands them to a
//!   [`ClientConnection`]
//!
//! Rooms only ever see the outbound queue, so a slow socket cannot block a
//! room. When the reader loop ends the connection leaves its room, which
//! notifies the other participant with `peer-left`.

use crate::actors::RoomCoordinatorActorHandle;
use crate::connection::ClientConnection;
use crate::errors::RcError;
use crate::observability::metrics;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common::protocol::SignalingEvent;
use common::secret::SecretString;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Path the signaling WebSocket is served on.
pub const SIGNALING_PATH: &str = "/signaling";

/// Outbound queue depth per connection.
const OUTBOUND_BUFFER: usize = 256;

/// Shared state of the signaling router.
#[derive(Clone)]
pub struct SignalingState {
    pub coordinator: RoomCoordinatorActorHandle,
    pub require_auth_token: bool,
}

/// Router serving the signaling WebSocket on [`SIGNALING_PATH`].
pub fn signaling_router(state: SignalingState) -> Router {
    Router::new()
        .route(SIGNALING_PATH, get(upgrade_handler))
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
struct UpgradeParams {
    token: Option<SecretString>,
}

/// Auth token from `Authorization: Bearer` or `?token=`.
fn auth_token(headers: &HeaderMap, params: UpgradeParams) -> Option<SecretString> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| SecretString::from(token.to_string()));

    from_header.or(params.token)
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SignalingState>>,
    headers: HeaderMap,
    Query(params): Query<UpgradeParams>,
) -> Response {
    if state.require_auth_token && auth_token(&headers, params).is_none() {
        debug!(target: "rc.ws", "Upgrade rejected, no auth token");
        return (
            StatusCode::UNAUTHORIZED,
            RcError::Unauthorized.client_message(),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<SignalingState>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let cancel_token = state.coordinator.child_token();
    let (sink, stream) = socket.split();

    metrics::connection_opened();

    let writer = tokio::spawn(write_loop(sink, outbound_rx, cancel_token.child_token()));

    let connection = ClientConnection::new(state.coordinator.clone(), outbound_tx);
    read_loop(connection, stream, cancel_token.clone()).await;

    cancel_token.cancel();
    let _ = writer.await;
    metrics::connection_closed();
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<SignalingEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            event = outbound.recv() => {
                let Some(event) = event else { break };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(target: "rc.ws", error = %e, "Failed to encode outbound event");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(target: "rc.ws", error = %e, "Socket write failed, writer exiting");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

#[instrument(skip_all, name = "rc.ws", fields(connection_id = %connection.connection_id()))]
async fn read_loop(
    mut connection: ClientConnection,
    mut stream: futures::stream::SplitStream<WebSocket>,
    cancel_token: CancellationToken,
) {
    debug!(target: "rc.ws", "Connection opened");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "rc.ws", "Connection cancelled");
                break;
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match SignalingEvent::from_json(&text) {
                    Ok(event) => connection.handle_event(event).await,
                    Err(e) => {
                        warn!(target: "rc.ws", error = %e, len = text.len(), "Malformed frame dropped");
                        metrics::record_dropped(metrics::DROP_MALFORMED);
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: "rc.ws", error = %e, "Socket read failed");
                    break;
                }
            }
        }
    }

    connection.leave().await;
    debug!(target: "rc.ws", "Connection closed");
}
