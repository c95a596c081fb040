//! Session Controller.
//!
//! One actor per consultation attempt. It owns the local media, the Peer
//! Session and the Signaling Channel, reacts to their events one at a time,
//! and publishes a [`SessionSnapshot`] for the presentation layer.
//!
//! ```text
//! Idle -> AcquiringMedia -> JoiningRoom -> WaitingForPeer -> Negotiating -> Connected
//!                                                ^                            |
//!                                                +------ transient loss ------+
//! any non-terminal state -> Ended | Failed
//! ```
//!
//! Only the clinician offers, and only on `start-call`. Teardown (stop media,
//! close the peer connection, disconnect signaling) runs exactly once,
//! whichever of `end_call`, a fatal error or dropping the last handle
//! triggers it first.

use crate::config::ClientConfig;
use crate::errors::SessionError;
use crate::media::{
    LocalMediaTrackSet, MediaAccessError, MediaAcquirer, MediaConstraints, MediaDevices, TrackKind,
};
use crate::peer::{
    PeerConnectionEvent, PeerConnectionFactory, PeerConnectionState, PeerError, PeerSession,
};
use crate::signaling::{
    ChannelEvent, CloseReason, SignalingChannelHandle, SignalingConnector, TransportError,
};
use crate::state::{SessionSnapshot, SessionState};

use common::protocol::{NegotiationMessage, SignalingEvent};
use common::secret::SecretString;
use common::types::{MeetingId, ParticipantRole};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument, warn};

/// Command mailbox depth.
const COMMAND_BUFFER: usize = 32;

type MediaFuture = BoxFuture<'static, Result<LocalMediaTrackSet, MediaAccessError>>;

/// Inputs from the calling surface.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Meeting identifier from routing; may be blank.
    pub meeting_id: String,
    pub role: ParticipantRole,
    /// Token from the login subsystem, presented to the coordinator.
    pub auth_token: SecretString,
}

/// Platform bindings the controller drives.
#[derive(Clone)]
pub struct SessionPlatform {
    pub media: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub signaling: Arc<dyn SignalingConnector>,
}

enum ControllerCommand {
    Start {
        respond_to: oneshot::Sender<()>,
    },
    Toggle {
        kind: TrackKind,
        respond_to: oneshot::Sender<Option<bool>>,
    },
    EndCall {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a Session Controller.
///
/// Clones share the controller. Dropping the last clone tears the session
/// down as if the page had been unloaded.
#[derive(Clone)]
pub struct SessionControllerHandle {
    sender: mpsc::Sender<ControllerCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
    _guard: Arc<DropGuard>,
}

impl SessionControllerHandle {
    /// Create a controller in `Idle`. Nothing happens until [`Self::start`].
    #[must_use]
    pub fn new(params: SessionParams, platform: SessionPlatform, config: ClientConfig) -> Self {
        let cancel_token = CancellationToken::new();
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot) = watch::channel(SessionSnapshot::initial(params.role));

        let actor = SessionControllerActor {
            meeting_id: MeetingId::parse(&params.meeting_id)
                .map_err(|e| SessionError::InvalidMeeting(e.to_string())),
            raw_meeting_id: params.meeting_id,
            role: params.role,
            auth_token: params.auth_token,
            config,
            platform,
            commands,
            snapshot: snapshot_tx,
            cancel_token: cancel_token.clone(),
            acquisition: None,
            local_media: None,
            peer: None,
            signaling: None,
            signaling_events: None,
            signaling_alive: false,
            peer_present: false,
            deferred_start_call: false,
            negotiation_errors: 0,
            torn_down: false,
        };
        tokio::spawn(actor.run());

        Self {
            sender,
            snapshot,
            _guard: Arc::new(cancel_token.drop_guard()),
        }
    }

    /// Begin the session: acquire media, join the room, negotiate.
    ///
    /// Returns once the first transition has been made. Ignored unless the
    /// session is `Idle`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` if the session has already finished.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerCommand::Start { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Flip the microphone. Returns the new `enabled` flag, or `None` when
    /// there is no local media yet (or any more).
    pub async fn toggle_mute(&self) -> Option<bool> {
        self.toggle(TrackKind::Audio).await
    }

    /// Flip the camera. Same contract as [`Self::toggle_mute`].
    pub async fn toggle_video(&self) -> Option<bool> {
        self.toggle(TrackKind::Video).await
    }

    async fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerCommand::Toggle {
                kind,
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// End the call and wait for teardown to finish. Safe to call any number
    /// of times and from any state.
    pub async fn end_call(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ControllerCommand::EndCall { respond_to: tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state.clone()
    }

    #[must_use]
    pub fn status_message(&self) -> String {
        self.snapshot.borrow().status_message.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Observe every snapshot change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

struct SessionControllerActor {
    meeting_id: Result<MeetingId, SessionError>,
    raw_meeting_id: String,
    role: ParticipantRole,
    auth_token: SecretString,
    config: ClientConfig,
    platform: SessionPlatform,
    commands: mpsc::Receiver<ControllerCommand>,
    snapshot: watch::Sender<SessionSnapshot>,
    cancel_token: CancellationToken,

    acquisition: Option<MediaFuture>,
    local_media: Option<LocalMediaTrackSet>,
    peer: Option<PeerSession>,
    signaling: Option<SignalingChannelHandle>,
    signaling_events: Option<mpsc::Receiver<ChannelEvent>>,

    signaling_alive: bool,
    /// The other participant is in the room as far as signaling knows.
    peer_present: bool,
    /// A `start-call` arrived while media was flowing.
    deferred_start_call: bool,
    negotiation_errors: u32,
    torn_down: bool,
}

impl SessionControllerActor {
    #[instrument(
        skip_all,
        name = "session.controller",
        fields(meeting_id = %self.raw_meeting_id, role = %self.role)
    )]
    async fn run(mut self) {
        debug!(target: "session.controller", "Session controller started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "session.controller", "Session controller cancelled");
                    self.finish(SessionState::Ended).await;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.finish(SessionState::Ended).await,
                },

                result = next_acquisition(&mut self.acquisition) => {
                    self.acquisition = None;
                    self.on_media(result).await;
                }

                event = next_channel_event(&mut self.signaling_events) => {
                    self.on_channel_event(event).await;
                }

                event = next_peer_event(&mut self.peer) => {
                    self.on_peer_event(event).await;
                }
            }

            if self.state().is_terminal() {
                break;
            }
        }

        debug!(target: "session.controller", "Session controller stopped");
    }

    async fn handle_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::Start { respond_to } => {
                self.start().await;
                let _ = respond_to.send(());
            }
            ControllerCommand::Toggle { kind, respond_to } => {
                let _ = respond_to.send(self.toggle(kind));
            }
            ControllerCommand::EndCall { respond_to } => {
                info!(target: "session.controller", "End call requested");
                self.finish(SessionState::Ended).await;
                let _ = respond_to.send(());
            }
        }
    }

    async fn start(&mut self) {
        if self.state() != SessionState::Idle {
            debug!(target: "session.controller", state = %self.state(), "Start ignored");
            return;
        }

        if let Err(e) = &self.meeting_id {
            let e = e.clone();
            self.fail(e).await;
            return;
        }

        info!(target: "session.controller", "Session starting");
        self.transition(SessionState::AcquiringMedia);
        let acquirer = MediaAcquirer::new(Arc::clone(&self.platform.media));
        self.acquisition = Some(Box::pin(async move {
            acquirer.acquire(MediaConstraints::default()).await
        }));
    }

    fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let local_media = self.local_media.as_ref()?;
        let enabled = match kind {
            TrackKind::Audio => {
                let enabled = !local_media.is_audio_enabled();
                local_media.set_audio_enabled(enabled);
                enabled
            }
            TrackKind::Video => {
                let enabled = !local_media.is_video_enabled();
                local_media.set_video_enabled(enabled);
                enabled
            }
        };

        debug!(target: "session.controller", kind = %kind, enabled = enabled, "Local track toggled");
        self.snapshot.send_modify(|s| match kind {
            TrackKind::Audio => s.audio_enabled = enabled,
            TrackKind::Video => s.video_enabled = enabled,
        });
        Some(enabled)
    }

    async fn on_media(&mut self, result: Result<LocalMediaTrackSet, MediaAccessError>) {
        let local_media = match result {
            Ok(local_media) => local_media,
            Err(e) => {
                self.fail(SessionError::MediaAccess(e)).await;
                return;
            }
        };

        let audio_enabled = local_media.is_audio_enabled();
        let video_enabled = local_media.is_video_enabled();
        self.local_media = Some(local_media);
        self.snapshot.send_modify(|s| {
            s.audio_enabled = audio_enabled;
            s.video_enabled = video_enabled;
        });

        if let Err(e) = self.rebuild_peer() {
            self.fail(SessionError::PeerConnectionFailed(e.to_string()))
                .await;
            return;
        }

        let meeting_id = match &self.meeting_id {
            Ok(meeting_id) => meeting_id.clone(),
            Err(e) => {
                let e = e.clone();
                self.fail(e).await;
                return;
            }
        };

        let (channel, events) = SignalingChannelHandle::connect(
            Arc::clone(&self.platform.signaling),
            self.config.signaling_url.clone(),
            self.auth_token.clone(),
            self.config.reconnect,
            self.cancel_token.child_token(),
        );
        let joined = channel.join_room(meeting_id, self.role).await;
        self.signaling = Some(channel);
        self.signaling_events = Some(events);
        self.signaling_alive = true;

        if joined.is_err() {
            self.fail(SessionError::SignalingUnavailable).await;
            return;
        }
        self.transition(SessionState::JoiningRoom);
    }

    async fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        let Some(event) = event else {
            self.signaling_events = None;
            return;
        };

        match event {
            ChannelEvent::Connected => {
                self.signaling_alive = true;
                let status = self.state().status_message(self.role);
                self.set_status(status);
            }
            ChannelEvent::Degraded {
                attempt,
                max_attempts,
            } => {
                let degraded = SessionError::ConnectionDegraded {
                    attempt,
                    max_attempts,
                };
                warn!(target: "session.controller", error = %degraded, "Signaling degraded");
                self.set_status(degraded.status_message());
            }
            ChannelEvent::Closed(CloseReason::Exhausted) => {
                self.signaling_alive = false;
                if self.state() == SessionState::Connected {
                    warn!(target: "session.controller", "Signaling lost, call continues");
                    self.set_status(
                        "Connection to the consultation service was lost. The call continues."
                            .to_string(),
                    );
                } else {
                    self.fail(SessionError::SignalingUnavailable).await;
                }
            }
            ChannelEvent::Closed(CloseReason::Requested) => {
                self.signaling_alive = false;
            }
            ChannelEvent::Message(event) => self.on_signaling_message(event).await,
        }
    }

    async fn on_signaling_message(&mut self, event: SignalingEvent) {
        if let (Some(event_meeting), Ok(meeting_id)) = (event.meeting_id(), &self.meeting_id) {
            if event_meeting != meeting_id {
                warn!(target: "session.controller", event = event.name(), "Event for another meeting dropped");
                return;
            }
        }

        match event {
            SignalingEvent::JoinedRoom {
                success: true, ..
            } => {
                if self.state() == SessionState::JoiningRoom {
                    info!(target: "session.controller", "Room joined");
                    self.transition(SessionState::WaitingForPeer);
                } else {
                    debug!(target: "session.controller", "Rejoin acknowledged");
                }
            }
            SignalingEvent::JoinedRoom {
                success: false,
                reason,
                ..
            } => {
                let reason = reason.unwrap_or_else(|| "join refused".to_string());
                if self.state() == SessionState::JoiningRoom {
                    self.fail(SessionError::RoomRejected(reason)).await;
                } else {
                    warn!(target: "session.controller", reason = %reason, "Rejoin refused");
                }
            }
            SignalingEvent::StartCall {} => self.on_start_call().await,
            SignalingEvent::PeerLeft { .. } => self.on_peer_left().await,
            SignalingEvent::JoinRoom { .. } => {
                warn!(target: "session.controller", "Unexpected join-room from coordinator dropped");
            }
            relayed => {
                if let Some((_, message)) = relayed.into_negotiation() {
                    self.on_negotiation(message).await;
                }
            }
        }
    }

    async fn on_start_call(&mut self) {
        if !self.role.is_offerer() {
            warn!(target: "session.controller", "start-call for answering role ignored");
            return;
        }

        match self.state() {
            SessionState::WaitingForPeer | SessionState::JoiningRoom => {
                self.peer_present = true;
                self.offer().await;
            }
            SessionState::Connected => {
                debug!(target: "session.controller", "start-call while connected deferred");
                self.peer_present = true;
                self.deferred_start_call = true;
            }
            state => {
                debug!(target: "session.controller", state = %state, "Duplicate start-call ignored");
            }
        }
    }

    /// Create and send the offer, on a fresh Peer Session if the current one
    /// has already negotiated.
    async fn offer(&mut self) {
        if self.peer.as_ref().is_some_and(PeerSession::has_negotiated) {
            if let Err(e) = self.rebuild_peer() {
                self.fail(SessionError::PeerConnectionFailed(e.to_string()))
                    .await;
                return;
            }
        }
        let Some(peer) = self.peer.as_mut() else {
            return;
        };

        match peer.create_offer().await {
            Ok(offer) => {
                info!(target: "session.controller", "Offer created");
                self.negotiation_errors = 0;
                self.transition(SessionState::Negotiating);
                self.publish_peer();
                self.send_signaling(offer);
            }
            Err(e) => self.negotiation_error(e).await,
        }
    }

    async fn on_negotiation(&mut self, message: NegotiationMessage) {
        let offerer = self.role.is_offerer();
        match &message {
            NegotiationMessage::Offer { .. } if offerer => {
                self.negotiation_error(PeerError::Unexpected("offer for the offering role"))
                    .await;
                return;
            }
            NegotiationMessage::Answer { .. } if !offerer => {
                self.negotiation_error(PeerError::Unexpected("answer for the answering role"))
                    .await;
                return;
            }
            _ => {}
        }

        let is_offer = matches!(message, NegotiationMessage::Offer { .. });
        let is_description = !matches!(message, NegotiationMessage::IceCandidate(_));

        if is_offer {
            self.peer_present = true;
            if self.peer.as_ref().is_some_and(PeerSession::has_negotiated) {
                info!(target: "session.controller", "New offer on a negotiated session, rebuilding");
                if let Err(e) = self.rebuild_peer() {
                    self.fail(SessionError::PeerConnectionFailed(e.to_string()))
                        .await;
                    return;
                }
            }
        }

        let Some(peer) = self.peer.as_mut() else {
            debug!(target: "session.controller", kind = message.kind(), "No peer session, message dropped");
            return;
        };

        match peer.handle_remote(message).await {
            Ok(reply) => {
                if is_description {
                    self.negotiation_errors = 0;
                }
                if is_offer {
                    self.transition(SessionState::Negotiating);
                }
                self.publish_peer();
                if let Some(reply) = reply {
                    self.send_signaling(reply);
                }
            }
            Err(e) => self.negotiation_error(e).await,
        }
    }

    async fn negotiation_error(&mut self, e: PeerError) {
        self.negotiation_errors += 1;
        warn!(
            target: "session.controller",
            error = %e,
            count = self.negotiation_errors,
            max = self.config.max_negotiation_errors,
            "Negotiation error"
        );

        if self.negotiation_errors >= self.config.max_negotiation_errors {
            self.fail(SessionError::Negotiation(e.to_string())).await;
        }
    }

    async fn on_peer_left(&mut self) {
        info!(target: "session.controller", "Other participant left the room");
        self.peer_present = false;
        self.deferred_start_call = false;

        match self.state() {
            SessionState::Negotiating | SessionState::WaitingForPeer => {
                if self.peer.as_ref().is_some_and(PeerSession::has_negotiated) {
                    if let Err(e) = self.rebuild_peer() {
                        self.fail(SessionError::PeerConnectionFailed(e.to_string()))
                            .await;
                        return;
                    }
                }
                self.transition(SessionState::WaitingForPeer);
            }
            // Media may still be flowing; the transport state decides.
            _ => {}
        }
    }

    async fn on_peer_event(&mut self, event: PeerConnectionEvent) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };

        if let Some(message) = peer.handle_event(event) {
            self.send_signaling(message);
            return;
        }

        self.publish_peer();
        let peer_state = self
            .peer
            .as_ref()
            .map_or(PeerConnectionState::Closed, PeerSession::state);
        self.on_peer_state(peer_state).await;
    }

    async fn on_peer_state(&mut self, peer_state: PeerConnectionState) {
        match (peer_state, self.state()) {
            (
                PeerConnectionState::Connected,
                SessionState::Negotiating | SessionState::WaitingForPeer,
            ) => {
                info!(target: "session.controller", "Remote media flowing");
                self.transition(SessionState::Connected);
            }

            (PeerConnectionState::Disconnected, SessionState::Connected) => {
                if !self.signaling_alive {
                    self.fail(SessionError::PeerConnectionFailed(
                        "connection lost and signaling unavailable".to_string(),
                    ))
                    .await;
                    return;
                }

                warn!(target: "session.controller", "Peer connection interrupted, waiting for recovery");
                self.transition(SessionState::WaitingForPeer);
                if std::mem::take(&mut self.deferred_start_call) {
                    self.offer().await;
                }
            }

            (
                PeerConnectionState::Failed,
                SessionState::Connected | SessionState::Negotiating | SessionState::WaitingForPeer,
            ) => {
                if self.signaling_alive && !self.peer_present {
                    info!(target: "session.controller", "Peer connection failed after peer left, rebuilding");
                    if let Err(e) = self.rebuild_peer() {
                        self.fail(SessionError::PeerConnectionFailed(e.to_string()))
                            .await;
                        return;
                    }
                    self.transition(SessionState::WaitingForPeer);
                } else {
                    self.fail(SessionError::PeerConnectionFailed(
                        "ICE connectivity failed".to_string(),
                    ))
                    .await;
                }
            }

            _ => {}
        }
    }

    /// Replace the Peer Session with a fresh one carrying the local tracks.
    fn rebuild_peer(&mut self) -> Result<(), PeerError> {
        if let Some(mut old) = self.peer.take() {
            old.close();
        }
        let Some(local_media) = &self.local_media else {
            return Err(PeerError::Closed);
        };

        let peer = PeerSession::new(
            self.platform.peers.as_ref(),
            &self.config.ice_servers,
            local_media,
        )?;
        self.peer = Some(peer);
        self.publish_peer();
        Ok(())
    }

    /// Never waits on the channel mailbox: the channel actor may itself be
    /// waiting for this actor to take its events.
    fn send_signaling(&self, message: NegotiationMessage) {
        let Some(channel) = &self.signaling else {
            return;
        };
        let kind = message.kind();
        match channel.try_send(message) {
            Ok(()) => {}
            Err(TransportError::Busy) => {
                warn!(target: "session.controller", kind = kind, "Signaling mailbox full, message dropped");
            }
            Err(e) => {
                debug!(target: "session.controller", kind = kind, error = %e, "Signaling closed, message dropped");
            }
        }
    }

    fn state(&self) -> SessionState {
        self.snapshot.borrow().state.clone()
    }

    fn transition(&mut self, next: SessionState) {
        let role = self.role;
        self.snapshot.send_if_modified(|s| {
            if s.state == next {
                return false;
            }
            info!(target: "session.controller", from = %s.state, to = %next, "Session state changed");
            s.status_message = next.status_message(role);
            if next.is_terminal() {
                s.exit_route = Some(role.appointment_list_route());
            }
            s.state = next;
            true
        });
    }

    fn set_status(&self, status: String) {
        self.snapshot.send_if_modified(|s| {
            if s.status_message == status {
                return false;
            }
            s.status_message = status;
            true
        });
    }

    fn publish_peer(&self) {
        let (peer_state, remote_tracks) = match &self.peer {
            Some(peer) => (peer.state(), peer.remote_tracks().to_vec()),
            None => (PeerConnectionState::Closed, Vec::new()),
        };
        self.snapshot.send_if_modified(|s| {
            if s.peer_state == peer_state && s.remote_tracks.len() == remote_tracks.len() {
                return false;
            }
            s.peer_state = peer_state;
            s.remote_tracks = remote_tracks;
            true
        });
    }

    async fn fail(&mut self, error: SessionError) {
        error!(target: "session.controller", error = %error, "Session failed");
        self.finish(SessionState::Failed(error)).await;
    }

    /// Release everything and enter a terminal state. No-op once terminal.
    async fn finish(&mut self, terminal: SessionState) {
        if self.state().is_terminal() {
            return;
        }
        self.teardown().await;
        self.transition(terminal);
    }

    /// Stop local media, close the peer connection, disconnect signaling.
    async fn teardown(&mut self) {
        if std::mem::replace(&mut self.torn_down, true) {
            return;
        }

        self.acquisition = None;
        if let Some(local_media) = self.local_media.take() {
            local_media.release();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close();
            self.publish_peer();
        }
        if let Some(channel) = self.signaling.take() {
            channel.disconnect().await;
        }
        self.signaling_events = None;
        self.signaling_alive = false;

        self.snapshot.send_modify(|s| {
            s.audio_enabled = false;
            s.video_enabled = false;
            s.remote_tracks.clear();
        });
        info!(target: "session.controller", "Session resources released");
    }
}

async fn next_acquisition(
    acquisition: &mut Option<MediaFuture>,
) -> Result<LocalMediaTrackSet, MediaAccessError> {
    match acquisition {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_channel_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_peer_event(peer: &mut Option<PeerSession>) -> PeerConnectionEvent {
    match peer {
        Some(peer) => peer.next_event().await,
        None => std::future::pending().await,
    }
}
