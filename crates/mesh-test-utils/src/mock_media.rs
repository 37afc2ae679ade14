//! Mock local media.

use async_trait::async_trait;
use mesh_peer::errors::PeerError;
use mesh_peer::media::{LocalMedia, MediaStream, MediaTrack, TrackKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Local media that yields one audio and one video track, or fails.
#[derive(Debug)]
pub struct MockMedia {
    stream: MediaStream,
    fail: bool,
    acquisitions: AtomicUsize,
}

impl Default for MockMedia {
    fn default() -> Self {
        let id = format!("local-{}", Uuid::new_v4());
        let stream = MediaStream::new(
            id.clone(),
            vec![
                MediaTrack::new(format!("{id}-audio"), TrackKind::Audio),
                MediaTrack::new(format!("{id}-video"), TrackKind::Video),
            ],
        );
        Self {
            stream,
            fail: false,
            acquisitions: AtomicUsize::new(0),
        }
    }
}

impl MockMedia {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Media that is never granted.
    #[must_use]
    pub fn denied() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// The stream handed out by `acquire`.
    #[must_use]
    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    /// Number of `acquire` calls.
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalMedia for MockMedia {
    async fn acquire(&self) -> Result<MediaStream, PeerError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PeerError::CapabilityUnavailable(
                "permission denied".to_string(),
            ));
        }
        Ok(self.stream.clone())
    }
}
