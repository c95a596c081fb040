//! Peer Session.
//!
//! Wraps one platform peer connection (consumed through [`PeerConnection`])
//! and enforces the negotiation rules:
//!
//! - every local track is attached before any description exists
//! - an offer is answered (remote, answer, local) and the answer returned
//! - an answer is applied as the remote description only
//! - remote candidates that arrive before the remote description are queued
//!   and applied in arrival order once it lands
//! - `Connected` is reported only once a remote track has been received and
//!   the transport is up; ICE completing alone is not enough
//!
//! Platform callbacks arrive as [`PeerConnectionEvent`]s on a queue the
//! factory is given at creation, and the derived [`PeerConnectionState`] is
//! published on a `watch` channel.

use crate::config::IceServer;
use crate::media::{LocalMediaTrackSet, MediaTrack};

use async_trait::async_trait;
use common::protocol::{IceCandidate, NegotiationMessage};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("failed to create peer connection: {0}")]
    Create(String),

    #[error("failed to attach track: {0}")]
    AttachTrack(String),

    #[error("session description rejected: {0}")]
    Description(String),

    #[error("candidate rejected: {0}")]
    Candidate(String),

    /// The message is not valid in the session's current negotiation state.
    #[error("unexpected {0}")]
    Unexpected(&'static str),

    #[error("peer session closed")]
    Closed,
}

/// Which half of the description exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Transport state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks from the platform peer connection.
#[derive(Debug, Clone)]
pub enum PeerConnectionEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(Arc<dyn MediaTrack>),
    IceStateChanged(IceConnectionState),
}

/// Session-level connection state shown to the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<String, PeerError>;

    async fn create_answer(&self) -> Result<String, PeerError>;

    async fn set_local_description(&self, kind: SdpKind, sdp: &str) -> Result<(), PeerError>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError>;

    fn close(&self);
}

/// Creates platform peer connections.
pub trait PeerConnectionFactory: Send + Sync {
    /// Build a connection using `ice_servers`. Platform callbacks are pushed
    /// onto `events`.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Create` if the platform refuses.
    fn create(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// One negotiation attempt between the two participants.
pub struct PeerSession {
    connection: Arc<dyn PeerConnection>,
    events: mpsc::UnboundedReceiver<PeerConnectionEvent>,
    events_closed: bool,
    state: watch::Sender<PeerConnectionState>,
    pending_candidates: VecDeque<IceCandidate>,
    has_local_description: bool,
    has_remote_description: bool,
    remote_tracks: Vec<Arc<dyn MediaTrack>>,
    ice_state: IceConnectionState,
    closed: bool,
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("state", &*self.state.borrow())
            .field("ice_state", &self.ice_state)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("has_remote_description", &self.has_remote_description)
            .field("remote_tracks", &self.remote_tracks.len())
            .finish_non_exhaustive()
    }
}

impl PeerSession {
    /// Create the connection and attach every local track.
    ///
    /// # Errors
    ///
    /// Fails if the platform cannot create the connection or attach a track.
    pub fn new(
        factory: &dyn PeerConnectionFactory,
        ice_servers: &[IceServer],
        local_media: &LocalMediaTrackSet,
    ) -> Result<Self, PeerError> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let connection = factory.create(ice_servers, events_tx)?;

        for track in local_media.tracks() {
            if let Err(e) = connection.add_track(Arc::clone(track)) {
                connection.close();
                return Err(e);
            }
        }
        debug!(
            target: "session.peer",
            tracks = local_media.tracks().len(),
            ice_servers = ice_servers.len(),
            "Peer session created"
        );

        let (state, _) = watch::channel(PeerConnectionState::New);
        Ok(Self {
            connection,
            events,
            events_closed: false,
            state,
            pending_candidates: VecDeque::new(),
            has_local_description: false,
            has_remote_description: false,
            remote_tracks: Vec::new(),
            ice_state: IceConnectionState::New,
            closed: false,
        })
    }

    #[must_use]
    pub fn state(&self) -> PeerConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PeerConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    /// Whether any description has been set on either side.
    #[must_use]
    pub fn has_negotiated(&self) -> bool {
        self.has_local_description || self.has_remote_description
    }

    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    #[must_use]
    pub fn remote_tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.remote_tracks
    }

    /// Create an offer and apply it locally. Only valid once per session.
    ///
    /// # Errors
    ///
    /// `PeerError::Unexpected` if this session has already negotiated,
    /// otherwise whatever the platform reports.
    pub async fn create_offer(&mut self) -> Result<NegotiationMessage, PeerError> {
        self.ensure_open()?;
        if self.has_negotiated() {
            return Err(PeerError::Unexpected("offer on a negotiated session"));
        }

        let sdp = self.connection.create_offer().await?;
        self.connection
            .set_local_description(SdpKind::Offer, &sdp)
            .await?;
        self.has_local_description = true;
        self.recompute_state();

        debug!(target: "session.peer", sdp_len = sdp.len(), "Local offer created");
        Ok(NegotiationMessage::Offer { sdp })
    }

    /// Apply a message from the other participant. Returns the reply to send,
    /// if any.
    ///
    /// # Errors
    ///
    /// Returns a `PeerError` for descriptions or candidates the platform
    /// rejects and for messages out of order.
    pub async fn handle_remote(
        &mut self,
        message: NegotiationMessage,
    ) -> Result<Option<NegotiationMessage>, PeerError> {
        self.ensure_open()?;

        match message {
            NegotiationMessage::Offer { sdp } => {
                if self.has_negotiated() {
                    return Err(PeerError::Unexpected("offer on a negotiated session"));
                }
                self.connection
                    .set_remote_description(SdpKind::Offer, &sdp)
                    .await?;
                self.has_remote_description = true;
                self.drain_pending_candidates().await;

                let answer = self.connection.create_answer().await?;
                self.connection
                    .set_local_description(SdpKind::Answer, &answer)
                    .await?;
                self.has_local_description = true;
                self.recompute_state();

                debug!(
                    target: "session.peer",
                    offer_len = sdp.len(),
                    answer_len = answer.len(),
                    "Remote offer answered"
                );
                Ok(Some(NegotiationMessage::Answer { sdp: answer }))
            }

            NegotiationMessage::Answer { sdp } => {
                if !self.has_local_description || self.has_remote_description {
                    return Err(PeerError::Unexpected("answer"));
                }
                self.connection
                    .set_remote_description(SdpKind::Answer, &sdp)
                    .await?;
                self.has_remote_description = true;
                self.drain_pending_candidates().await;
                self.recompute_state();

                debug!(target: "session.peer", sdp_len = sdp.len(), "Remote answer applied");
                Ok(None)
            }

            NegotiationMessage::IceCandidate(candidate) => {
                if self.has_remote_description {
                    self.connection.add_ice_candidate(&candidate).await?;
                } else {
                    self.pending_candidates.push_back(candidate);
                    debug!(
                        target: "session.peer",
                        queued = self.pending_candidates.len(),
                        "Candidate queued until remote description"
                    );
                }
                Ok(None)
            }
        }
    }

    async fn drain_pending_candidates(&mut self) {
        let count = self.pending_candidates.len();
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(e) = self.connection.add_ice_candidate(&candidate).await {
                warn!(target: "session.peer", error = %e, "Queued candidate rejected");
            }
        }
        if count > 0 {
            debug!(target: "session.peer", count = count, "Queued candidates applied");
        }
    }

    /// Next platform callback. Never resolves once the platform has
    /// dropped its sender.
    pub async fn next_event(&mut self) -> PeerConnectionEvent {
        if !self.events_closed {
            if let Some(event) = self.events.recv().await {
                return event;
            }
            self.events_closed = true;
        }
        std::future::pending().await
    }

    /// Fold a platform callback into the session. Returns a message to relay
    /// to the other participant, if any.
    pub fn handle_event(&mut self, event: PeerConnectionEvent) -> Option<NegotiationMessage> {
        if self.closed {
            return None;
        }

        match event {
            PeerConnectionEvent::LocalCandidate(candidate) => {
                return Some(NegotiationMessage::IceCandidate(candidate));
            }
            PeerConnectionEvent::RemoteTrack(track) => {
                info!(target: "session.peer", kind = %track.kind(), "Remote track received");
                self.remote_tracks.push(track);
            }
            PeerConnectionEvent::IceStateChanged(ice_state) => {
                debug!(target: "session.peer", ice_state = ?ice_state, "ICE state changed");
                self.ice_state = ice_state;
            }
        }
        self.recompute_state();
        None
    }

    fn recompute_state(&self) {
        let next = if self.closed {
            PeerConnectionState::Closed
        } else {
            match self.ice_state {
                IceConnectionState::Failed => PeerConnectionState::Failed,
                IceConnectionState::Disconnected => PeerConnectionState::Disconnected,
                IceConnectionState::Closed => PeerConnectionState::Closed,
                IceConnectionState::Connected | IceConnectionState::Completed
                    if !self.remote_tracks.is_empty() =>
                {
                    PeerConnectionState::Connected
                }
                IceConnectionState::New if !self.has_negotiated() => PeerConnectionState::New,
                _ => PeerConnectionState::Connecting,
            }
        };

        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!(target: "session.peer", from = %current, to = %next, "Peer connection state changed");
            *current = next;
            true
        });
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.closed {
            return Err(PeerError::Closed);
        }
        Ok(())
    }

    /// Release the platform connection. Only the first call does anything;
    /// returns whether this call did.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.pending_candidates.clear();
        self.connection.close();
        self.recompute_state();
        true
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.close();
    }
}
