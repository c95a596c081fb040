//! Signaling Channel actor.
//!
//! Owns the transport connection to the Room Coordinator and keeps it alive
//! independently of negotiation state:
//!
//! - The room membership set with [`SignalingChannelHandle::join_room`] is
//!   re-sent after every (re)connect, because the coordinator forgets
//!   membership when a transport drops.
//! - Negotiation messages sent while the transport is down are buffered and
//!   flushed in order after the re-join.
//! - Reconnection uses exponential backoff per [`ReconnectPolicy`]; every
//!   retry is surfaced as [`ChannelEvent::Degraded`] and giving up as
//!   [`ChannelEvent::Closed`] with [`CloseReason::Exhausted`]. The attempt
//!   count only resets once the coordinator has sent something on a link,
//!   so links that are accepted and dropped straight away still exhaust.

use super::transport::{SignalingConnector, SignalingLink, TransportError};
use crate::config::ReconnectPolicy;

use common::protocol::{NegotiationMessage, SignalingEvent};
use common::secret::SecretString;
use common::types::{MeetingId, ParticipantRole};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Command mailbox depth.
const COMMAND_BUFFER: usize = 256;

/// Event queue depth towards the owner.
const EVENT_BUFFER: usize = 256;

/// Maximum negotiation messages held while the transport is down.
pub const PENDING_OUTBOUND_LIMIT: usize = 256;

/// Why the channel stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called or the owner went away.
    Requested,
    /// Every reconnection attempt failed.
    Exhausted,
}

/// Events emitted by the channel to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Transport (re)established; the join has been re-sent.
    Connected,
    /// Transport down, about to retry.
    Degraded { attempt: u32, max_attempts: u32 },
    /// Event received from the coordinator.
    Message(SignalingEvent),
    /// The channel has stopped and will emit nothing further.
    Closed(CloseReason),
}

#[derive(Debug)]
enum ChannelCommand {
    JoinRoom {
        meeting_id: MeetingId,
        role: ParticipantRole,
    },
    Send(NegotiationMessage),
}

/// Handle to a Signaling Channel actor.
#[derive(Clone, Debug)]
pub struct SignalingChannelHandle {
    sender: mpsc::Sender<ChannelCommand>,
    cancel_token: CancellationToken,
}

impl SignalingChannelHandle {
    /// Spawn the channel and start connecting to `endpoint`.
    ///
    /// Returns the handle and the event stream. The channel stops when
    /// `cancel_token` is cancelled, on [`Self::disconnect`], or after
    /// reconnection is exhausted.
    #[must_use]
    pub fn connect(
        connector: Arc<dyn SignalingConnector>,
        endpoint: impl Into<String>,
        auth_token: SecretString,
        policy: ReconnectPolicy,
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);

        let actor = SignalingChannelActor {
            connector,
            endpoint: endpoint.into(),
            auth_token,
            policy,
            commands,
            events: events_tx,
            cancel_token: cancel_token.clone(),
            membership: None,
            pending: VecDeque::new(),
        };
        tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            events,
        )
    }

    /// Join `meeting_id` as `role`, now and after every reconnect.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the channel has stopped.
    pub async fn join_room(
        &self,
        meeting_id: MeetingId,
        role: ParticipantRole,
    ) -> Result<(), TransportError> {
        self.sender
            .send(ChannelCommand::JoinRoom { meeting_id, role })
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Send a negotiation message to the other participant.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the channel has stopped.
    pub async fn send(&self, message: NegotiationMessage) -> Result<(), TransportError> {
        self.sender
            .send(ChannelCommand::Send(message))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Queue a negotiation message without waiting for mailbox space.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Busy` if the mailbox is full and
    /// `TransportError::Closed` if the channel has stopped.
    pub fn try_send(&self, message: NegotiationMessage) -> Result<(), TransportError> {
        self.sender
            .try_send(ChannelCommand::Send(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Busy,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    /// Close the transport and wait for the actor to stop.
    ///
    /// Safe to call any number of times, including after the channel has
    /// already stopped on its own.
    pub async fn disconnect(&self) {
        self.cancel_token.cancel();
        self.sender.closed().await;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// How a served transport ended.
enum LinkEnd {
    /// The channel must stop.
    Stop(CloseReason),
    /// The transport dropped. `answered` once the coordinator sent anything.
    Dropped { answered: bool },
}

struct SignalingChannelActor {
    connector: Arc<dyn SignalingConnector>,
    endpoint: String,
    auth_token: SecretString,
    policy: ReconnectPolicy,
    commands: mpsc::Receiver<ChannelCommand>,
    events: mpsc::Sender<ChannelEvent>,
    cancel_token: CancellationToken,
    membership: Option<(MeetingId, ParticipantRole)>,
    pending: VecDeque<NegotiationMessage>,
}

impl SignalingChannelActor {
    #[instrument(skip_all, name = "session.signaling")]
    async fn run(mut self) {
        let mut next_attempt = 0;

        let reason = loop {
            let (link, attempt) = match self.establish(next_attempt).await {
                Ok(established) => established,
                Err(reason) => break reason,
            };

            match self.serve(link).await {
                LinkEnd::Stop(reason) => break reason,
                LinkEnd::Dropped { answered: true } => {
                    warn!(target: "session.signaling", "Signaling transport dropped");
                    next_attempt = 1;
                }
                LinkEnd::Dropped { answered: false } => {
                    warn!(
                        target: "session.signaling",
                        attempt = attempt,
                        "Signaling transport dropped before the coordinator answered"
                    );
                    next_attempt = attempt + 1;
                }
            }
        };

        match reason {
            CloseReason::Exhausted => {
                error!(
                    target: "session.signaling",
                    max_attempts = self.policy.max_attempts,
                    "Signaling reconnection exhausted"
                );
                self.emit(ChannelEvent::Closed(reason)).await;
            }
            CloseReason::Requested => {
                info!(target: "session.signaling", "Signaling channel closed");
                let _ = self.events.try_send(ChannelEvent::Closed(reason));
            }
        }
    }

    /// Connect, retrying with backoff. `attempt` 0 connects immediately.
    /// Returns the link and the attempt that produced it.
    async fn establish(&mut self, mut attempt: u32) -> Result<(SignalingLink, u32), CloseReason> {
        loop {
            if attempt > 0 {
                if attempt > self.policy.max_attempts {
                    return Err(CloseReason::Exhausted);
                }

                let delay = self.policy.delay_for(attempt);
                warn!(
                    target: "session.signaling",
                    attempt = attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Signaling unavailable, retrying with backoff"
                );
                if !self
                    .emit(ChannelEvent::Degraded {
                        attempt,
                        max_attempts: self.policy.max_attempts,
                    })
                    .await
                {
                    return Err(CloseReason::Requested);
                }

                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        () = self.cancel_token.cancelled() => return Err(CloseReason::Requested),
                        () = &mut sleep => break,
                        command = self.commands.recv() => {
                            if let Some(reason) = self.handle_offline(command) {
                                return Err(reason);
                            }
                        }
                    }
                }
            }

            let connector = Arc::clone(&self.connector);
            let endpoint = self.endpoint.clone();
            let auth_token = self.auth_token.clone();
            let connect = async move { connector.connect(&endpoint, &auth_token).await };
            tokio::pin!(connect);

            let result = loop {
                tokio::select! {
                    () = self.cancel_token.cancelled() => return Err(CloseReason::Requested),
                    result = &mut connect => break result,
                    command = self.commands.recv() => {
                        if let Some(reason) = self.handle_offline(command) {
                            return Err(reason);
                        }
                    }
                }
            };

            match result {
                Ok(link) => {
                    info!(target: "session.signaling", attempt = attempt, "Signaling connected");
                    return Ok((link, attempt));
                }
                Err(e) => {
                    warn!(target: "session.signaling", error = %e, attempt = attempt, "Signaling connect failed");
                    attempt += 1;
                }
            }
        }
    }

    /// Commands received while no transport is up.
    fn handle_offline(&mut self, command: Option<ChannelCommand>) -> Option<CloseReason> {
        match command {
            None => Some(CloseReason::Requested),
            Some(ChannelCommand::JoinRoom { meeting_id, role }) => {
                self.membership = Some((meeting_id, role));
                None
            }
            Some(ChannelCommand::Send(message)) => {
                self.buffer(message);
                None
            }
        }
    }

    fn buffer(&mut self, message: NegotiationMessage) {
        if self.pending.len() >= PENDING_OUTBOUND_LIMIT {
            warn!(
                target: "session.signaling",
                kind = message.kind(),
                "Outbound buffer full, message dropped"
            );
            return;
        }
        self.pending.push_back(message);
    }

    /// Run one connected transport until it drops or the channel stops.
    async fn serve(&mut self, mut link: SignalingLink) -> LinkEnd {
        let mut answered = false;

        if !self.emit(ChannelEvent::Connected).await {
            return LinkEnd::Stop(CloseReason::Requested);
        }

        if let Some((meeting_id, role)) = self.membership.clone() {
            if !deliver(&link, SignalingEvent::JoinRoom { meeting_id, role }).await {
                return LinkEnd::Dropped { answered };
            }
        }
        if !self.flush(&link).await {
            return LinkEnd::Dropped { answered };
        }

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => return LinkEnd::Stop(CloseReason::Requested),

                command = self.commands.recv() => match command {
                    None => return LinkEnd::Stop(CloseReason::Requested),
                    Some(ChannelCommand::JoinRoom { meeting_id, role }) => {
                        debug!(target: "session.signaling", meeting_id = %meeting_id, role = %role, "Joining room");
                        self.membership = Some((meeting_id.clone(), role));
                        if !deliver(&link, SignalingEvent::JoinRoom { meeting_id, role }).await {
                            return LinkEnd::Dropped { answered };
                        }
                    }
                    Some(ChannelCommand::Send(message)) => {
                        self.pending.push_back(message);
                        if !self.flush(&link).await {
                            return LinkEnd::Dropped { answered };
                        }
                    }
                },

                event = link.inbound.recv() => match event {
                    Some(event) => {
                        answered = true;
                        if !self.emit(ChannelEvent::Message(event)).await {
                            return LinkEnd::Stop(CloseReason::Requested);
                        }
                    }
                    None => return LinkEnd::Dropped { answered },
                },
            }
        }
    }

    /// Send buffered messages in order. Stops early (keeping the rest) if
    /// not joined yet or the transport fails.
    async fn flush(&mut self, link: &SignalingLink) -> bool {
        let Some((meeting_id, _)) = self.membership.clone() else {
            return true;
        };

        while let Some(message) = self.pending.pop_front() {
            if !deliver(link, message.clone().into_event(meeting_id.clone())).await {
                self.pending.push_front(message);
                return false;
            }
        }
        true
    }

    /// Hand an event to the owner. False once the channel should stop.
    async fn emit(&self, event: ChannelEvent) -> bool {
        tokio::select! {
            () = self.cancel_token.cancelled() => false,
            result = self.events.send(event) => {
                if result.is_err() {
                    debug!(target: "session.signaling", "Channel owner gone");
                }
                result.is_ok()
            }
        }
    }
}

async fn deliver(link: &SignalingLink, event: SignalingEvent) -> bool {
    link.outbound.send(event).await.is_ok()
}
