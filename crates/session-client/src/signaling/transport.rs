//! Signaling transports.
//!
//! A [`SignalingConnector`] opens one transport connection and returns a
//! [`SignalingLink`]: a pair of queues carrying decoded
//! [`SignalingEvent`]s. The inbound queue closing means the transport
//! dropped. Dropping the link closes the transport.

use async_trait::async_trait;
use common::protocol::SignalingEvent;
use common::secret::{ExposeSecret, SecretString};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Queue depth of each link direction.
pub const LINK_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("transport closed")]
    Closed,

    #[error("outbound queue full")]
    Busy,
}

/// One open transport connection.
#[derive(Debug)]
pub struct SignalingLink {
    pub outbound: mpsc::Sender<SignalingEvent>,
    pub inbound: mpsc::Receiver<SignalingEvent>,
}

/// Opens transport connections to the Room Coordinator.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        auth_token: &SecretString,
    ) -> Result<SignalingLink, TransportError>;
}

/// WebSocket transport speaking the JSON wire protocol.
///
/// The auth token is presented as `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &str,
        auth_token: &SecretString,
    ) -> Result<SignalingLink, TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", auth_token.expose_secret()))
            .map_err(|_| TransportError::Connect("auth token is not a valid header value".to_string()))?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<SignalingEvent>(LINK_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(LINK_BUFFER);

        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(target: "session.signaling", error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(target: "session.signaling", error = %e, "Socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalingEvent::from_json(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(target: "session.signaling", error = %e, len = text.len(), "Malformed frame dropped");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(target: "session.signaling", error = %e, "Socket read failed");
                        break;
                    }
                }
            }
        });

        Ok(SignalingLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
