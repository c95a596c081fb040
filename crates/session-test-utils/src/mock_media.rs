//! Fake camera and microphone.
//!
//! # Example
//!
//! ```rust,ignore
//! use session_test_utils::FakeMediaDevices;
//!
//! let media = FakeMediaDevices::builder()
//!     .deny(MediaAccessError::PermissionDenied)
//!     .build();
//! ```

use async_trait::async_trait;
use session_client::media::{
    MediaAccessError, MediaConstraints, MediaDevices, MediaTrack, TrackKind,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A track whose flag flips and stops are observable.
#[derive(Debug)]
pub struct FakeMediaTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stop_count: AtomicU32,
}

impl FakeMediaTrack {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stop_count: AtomicU32::new(0),
        })
    }

    /// Times the hardware was stopped.
    #[must_use]
    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_count() > 0
    }
}

impl MediaTrack for FakeMediaTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fake platform device access.
#[derive(Debug)]
pub struct FakeMediaDevices {
    outcome: Result<(), MediaAccessError>,
    delay: Duration,
    requests: AtomicU32,
    granted: Mutex<Vec<Arc<FakeMediaTrack>>>,
}

impl Default for FakeMediaDevices {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FakeMediaDevices {
    #[must_use]
    pub fn builder() -> FakeMediaDevicesBuilder {
        FakeMediaDevicesBuilder::default()
    }

    /// Devices that grant every request immediately.
    #[must_use]
    pub fn granting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `get_user_media` calls.
    #[must_use]
    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Every track handed out so far.
    #[must_use]
    pub fn tracks(&self) -> Vec<Arc<FakeMediaTrack>> {
        self.granted.lock().unwrap().clone()
    }

    #[must_use]
    pub fn audio_track(&self) -> Option<Arc<FakeMediaTrack>> {
        self.track_of(TrackKind::Audio)
    }

    #[must_use]
    pub fn video_track(&self) -> Option<Arc<FakeMediaTrack>> {
        self.track_of(TrackKind::Video)
    }

    fn track_of(&self, kind: TrackKind) -> Option<Arc<FakeMediaTrack>> {
        self.granted
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.kind() == kind)
            .cloned()
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, MediaAccessError> {
        let request = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()?;

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(FakeMediaTrack::new(format!("mic-{request}"), TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(FakeMediaTrack::new(format!("camera-{request}"), TrackKind::Video));
        }
        self.granted.lock().unwrap().extend(tracks.iter().cloned());

        Ok(tracks
            .into_iter()
            .map(|t| t as Arc<dyn MediaTrack>)
            .collect())
    }
}

/// Builder for FakeMediaDevices configuration.
#[derive(Debug, Default)]
pub struct FakeMediaDevicesBuilder {
    deny: Option<MediaAccessError>,
    delay: Duration,
}

impl FakeMediaDevicesBuilder {
    /// Refuse every request with `error`.
    #[must_use]
    pub fn deny(mut self, error: MediaAccessError) -> Self {
        self.deny = Some(error);
        self
    }

    /// Simulate a permission prompt that takes `delay` to answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn build(self) -> FakeMediaDevices {
        FakeMediaDevices {
            outcome: self.deny.map_or(Ok(()), Err),
            delay: self.delay,
            requests: AtomicU32::new(0),
            granted: Mutex::new(Vec::new()),
        }
    }
}
