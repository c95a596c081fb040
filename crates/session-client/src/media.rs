//! Media Acquirer.
//!
//! The platform camera/microphone stack is consumed through the
//! [`MediaDevices`] and [`MediaTrack`] traits. [`MediaAcquirer::acquire`]
//! suspends until the platform grants or denies access and hands back a
//! [`LocalMediaTrackSet`] exclusively owned by one session.
//!
//! Mute and camera-off only flip track `enabled` flags. The hardware track
//! keeps running, so no renegotiation is needed.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why the platform refused to hand out media tracks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaAccessError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("no matching device found")]
    NotFound,

    /// The device exists but could not be opened (in use, hardware error).
    #[error("device not readable")]
    NotReadable,

    #[error("{0}")]
    Other(String),
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform media track, local or remote.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn is_enabled(&self) -> bool;

    /// Flip the `enabled` flag in place. Must not stop the hardware.
    fn set_enabled(&self, enabled: bool);

    /// Stop the underlying hardware capture.
    fn stop(&self);
}

/// Requested device kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Platform device access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Ask the platform for tracks matching `constraints`.
    ///
    /// May suspend on a permission prompt.
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, MediaAccessError>;
}

/// Local tracks owned by one session.
#[derive(Debug)]
pub struct LocalMediaTrackSet {
    tracks: Vec<Arc<dyn MediaTrack>>,
    released: AtomicBool,
}

impl LocalMediaTrackSet {
    #[must_use]
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            tracks,
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    fn of_kind(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.of_kind(TrackKind::Audio)
            .for_each(|t| t.set_enabled(enabled));
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.of_kind(TrackKind::Video)
            .for_each(|t| t.set_enabled(enabled));
    }

    /// True if any audio track is enabled.
    #[must_use]
    pub fn is_audio_enabled(&self) -> bool {
        self.of_kind(TrackKind::Audio).any(|t| t.is_enabled())
    }

    /// True if any video track is enabled.
    #[must_use]
    pub fn is_video_enabled(&self) -> bool {
        self.of_kind(TrackKind::Video).any(|t| t.is_enabled())
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stop every track. Only the first call stops anything; returns whether
    /// this call did.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        for track in &self.tracks {
            track.stop();
        }
        debug!(target: "session.media", tracks = self.tracks.len(), "Local media released");
        true
    }
}

impl Drop for LocalMediaTrackSet {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!(target: "session.media", "Local media dropped without release, stopping tracks");
            self.release();
        }
    }
}

/// Acquires local media from the platform.
#[derive(Clone)]
pub struct MediaAcquirer {
    devices: Arc<dyn MediaDevices>,
}

impl MediaAcquirer {
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    /// Acquire tracks. Never retried here: a denied prompt stays denied until
    /// the participant acts.
    ///
    /// # Errors
    ///
    /// Returns the platform's `MediaAccessError` on denial or missing hardware.
    pub async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalMediaTrackSet, MediaAccessError> {
        debug!(
            target: "session.media",
            audio = constraints.audio,
            video = constraints.video,
            "Requesting local media"
        );

        match self.devices.get_user_media(constraints).await {
            Ok(tracks) => {
                info!(target: "session.media", tracks = tracks.len(), "Local media acquired");
                Ok(LocalMediaTrackSet::new(tracks))
            }
            Err(e) => {
                warn!(target: "session.media", error = %e, "Local media acquisition failed");
                Err(e)
            }
        }
    }
}
