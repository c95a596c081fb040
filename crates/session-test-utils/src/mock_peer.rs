//! Scriptable fake peer connections.
//!
//! By default a [`FakePeerConnection`] behaves like a healthy platform
//! connection: once both descriptions are set it reports a local candidate,
//! walks ICE to `Connected` and then delivers a remote video track. Tests
//! can turn the automatic steps off and drive them by hand.
//!
//! # Example
//!
//! ```rust,ignore
//! use session_test_utils::FakePeerConnectionFactory;
//!
//! let peers = FakePeerConnectionFactory::builder()
//!     .auto_remote_track(false)
//!     .build();
//!
//! // ... later, deliver the track by hand
//! peers.latest().unwrap().emit_remote_track();
//! ```

use async_trait::async_trait;
use common::protocol::IceCandidate;
use session_client::config::IceServer;
use session_client::media::{MediaTrack, TrackKind};
use session_client::peer::{
    IceConnectionState, PeerConnection, PeerConnectionEvent, PeerConnectionFactory, PeerError,
    SdpKind,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::mock_media::FakeMediaTrack;

#[derive(Debug, Default)]
struct Recorded {
    tracks: Vec<String>,
    offers_created: u32,
    answers_created: u32,
    local: Option<(SdpKind, String)>,
    remote: Option<(SdpKind, String)>,
    candidates: Vec<IceCandidate>,
    progressed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Behavior {
    auto_connect: bool,
    auto_remote_track: bool,
    reject_remote_descriptions: bool,
}

/// A fake platform peer connection that records every call.
#[derive(Debug)]
pub struct FakePeerConnection {
    id: u32,
    ice_servers: Vec<String>,
    events: mpsc::UnboundedSender<PeerConnectionEvent>,
    behavior: Behavior,
    recorded: Mutex<Recorded>,
    close_count: AtomicU32,
}

impl FakePeerConnection {
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn ice_servers(&self) -> Vec<String> {
        self.ice_servers.clone()
    }

    /// Ids of attached local tracks, in attach order.
    #[must_use]
    pub fn attached_tracks(&self) -> Vec<String> {
        self.recorded.lock().unwrap().tracks.clone()
    }

    #[must_use]
    pub fn offers_created(&self) -> u32 {
        self.recorded.lock().unwrap().offers_created
    }

    #[must_use]
    pub fn answers_created(&self) -> u32 {
        self.recorded.lock().unwrap().answers_created
    }

    #[must_use]
    pub fn local_description(&self) -> Option<(SdpKind, String)> {
        self.recorded.lock().unwrap().local.clone()
    }

    #[must_use]
    pub fn remote_description(&self) -> Option<(SdpKind, String)> {
        self.recorded.lock().unwrap().remote.clone()
    }

    /// Remote candidates applied, in application order.
    #[must_use]
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.recorded.lock().unwrap().candidates.clone()
    }

    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Push a platform callback.
    pub fn emit(&self, event: PeerConnectionEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_ice_state(&self, state: IceConnectionState) {
        self.emit(PeerConnectionEvent::IceStateChanged(state));
    }

    pub fn emit_local_candidate(&self, candidate: &str) {
        self.emit(PeerConnectionEvent::LocalCandidate(IceCandidate::new(candidate)));
    }

    /// Deliver a remote video track.
    pub fn emit_remote_track(&self) -> Arc<FakeMediaTrack> {
        let track = FakeMediaTrack::new(format!("remote-video-{}", self.id), TrackKind::Video);
        self.emit(PeerConnectionEvent::RemoteTrack(
            Arc::clone(&track) as Arc<dyn MediaTrack>
        ));
        track
    }

    fn maybe_progress(&self) {
        let ready = {
            let mut recorded = self.recorded.lock().unwrap();
            let ready = recorded.local.is_some() && recorded.remote.is_some() && !recorded.progressed;
            if ready {
                recorded.progressed = true;
            }
            ready
        };
        if !ready || !self.behavior.auto_connect {
            return;
        }

        self.emit_local_candidate(&format!(
            "candidate:{} 1 udp 2122260223 192.0.2.{} 54400 typ host",
            self.id, self.id
        ));
        self.emit_ice_state(IceConnectionState::Checking);
        self.emit_ice_state(IceConnectionState::Connected);
        if self.behavior.auto_remote_track {
            self.emit_remote_track();
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError> {
        self.recorded
            .lock()
            .unwrap()
            .tracks
            .push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PeerError> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.offers_created += 1;
        Ok(format!("v=0 offer pc{} #{}", self.id, recorded.offers_created))
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        let mut recorded = self.recorded.lock().unwrap();
        if recorded.remote.is_none() {
            return Err(PeerError::Description("no remote offer".to_string()));
        }
        recorded.answers_created += 1;
        Ok(format!("v=0 answer pc{} #{}", self.id, recorded.answers_created))
    }

    async fn set_local_description(&self, kind: SdpKind, sdp: &str) -> Result<(), PeerError> {
        self.recorded.lock().unwrap().local = Some((kind, sdp.to_string()));
        self.maybe_progress();
        Ok(())
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), PeerError> {
        if self.behavior.reject_remote_descriptions {
            return Err(PeerError::Description("rejected by fake".to_string()));
        }
        self.recorded.lock().unwrap().remote = Some((kind, sdp.to_string()));
        self.maybe_progress();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        let mut recorded = self.recorded.lock().unwrap();
        // Platforms refuse candidates before a remote description.
        if recorded.remote.is_none() {
            return Err(PeerError::Candidate("no remote description".to_string()));
        }
        recorded.candidates.push(candidate.clone());
        Ok(())
    }

    fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`FakePeerConnection`]s and remembering them.
#[derive(Debug)]
pub struct FakePeerConnectionFactory {
    behavior: Behavior,
    fail_create: bool,
    created: Mutex<Vec<Arc<FakePeerConnection>>>,
}

impl Default for FakePeerConnectionFactory {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FakePeerConnectionFactory {
    #[must_use]
    pub fn builder() -> FakePeerConnectionFactoryBuilder {
        FakePeerConnectionFactoryBuilder::default()
    }

    /// Every connection created so far, oldest first.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<FakePeerConnection>> {
        self.created.lock().unwrap().clone()
    }

    #[must_use]
    pub fn latest(&self) -> Option<Arc<FakePeerConnection>> {
        self.created.lock().unwrap().last().cloned()
    }

    /// Offers created across every connection.
    #[must_use]
    pub fn total_offers(&self) -> u32 {
        self.connections().iter().map(|c| c.offers_created()).sum()
    }
}

impl PeerConnectionFactory for FakePeerConnectionFactory {
    fn create(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        if self.fail_create {
            return Err(PeerError::Create("refused by fake".to_string()));
        }

        let mut created = self.created.lock().unwrap();
        let connection = Arc::new(FakePeerConnection {
            id: u32::try_from(created.len()).unwrap() + 1,
            ice_servers: ice_servers.iter().map(|s| s.url.clone()).collect(),
            events,
            behavior: self.behavior,
            recorded: Mutex::new(Recorded::default()),
            close_count: AtomicU32::new(0),
        });
        created.push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Builder for FakePeerConnectionFactory configuration.
#[derive(Debug)]
pub struct FakePeerConnectionFactoryBuilder {
    behavior: Behavior,
    fail_create: bool,
}

impl Default for FakePeerConnectionFactoryBuilder {
    fn default() -> Self {
        Self {
            behavior: Behavior {
                auto_connect: true,
                auto_remote_track: true,
                reject_remote_descriptions: false,
            },
            fail_create: false,
        }
    }
}

impl FakePeerConnectionFactoryBuilder {
    /// Emit a candidate and walk ICE to `Connected` once both descriptions
    /// are set.
    #[must_use]
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.behavior.auto_connect = enabled;
        self
    }

    /// Deliver a remote track after ICE connects.
    #[must_use]
    pub fn auto_remote_track(mut self, enabled: bool) -> Self {
        self.behavior.auto_remote_track = enabled;
        self
    }

    /// Reject every remote description.
    #[must_use]
    pub fn reject_remote_descriptions(mut self) -> Self {
        self.behavior.reject_remote_descriptions = true;
        self
    }

    /// Refuse to create connections.
    #[must_use]
    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    #[must_use]
    pub fn build(self) -> FakePeerConnectionFactory {
        FakePeerConnectionFactory {
            behavior: self.behavior,
            fail_create: self.fail_create,
            created: Mutex::new(Vec::new()),
        }
    }
}
