//! Display surface capability.
//!
//! One labeled video tile per participant identity. Rendering is entirely up
//! to the implementation.

use crate::media::MediaStream;

use common::types::{ParticipantId, ParticipantInfo};

/// Placeholder shown while a participant's address is unknown.
pub const UNKNOWN_ADDRESS: &str = "...";

/// Labels shown on a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMetadata {
    pub address: String,
    pub is_leader: bool,
}

impl TileMetadata {
    /// Metadata for a participant the directory does not (or no longer) know.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            address: UNKNOWN_ADDRESS.to_string(),
            is_leader: false,
        }
    }
}

impl From<&ParticipantInfo> for TileMetadata {
    fn from(info: &ParticipantInfo) -> Self {
        Self {
            address: info.address.clone(),
            is_leader: info.is_leader,
        }
    }
}

/// Rendering target for participant tiles.
pub trait DisplaySurface: Send {
    /// Create or update the tile for `id`. A `None` stream keeps whatever
    /// stream the tile already shows.
    fn upsert_tile(
        &mut self,
        id: &ParticipantId,
        metadata: &TileMetadata,
        stream: Option<&MediaStream>,
    );

    /// Remove the tile for `id`. Unknown identities are ignored.
    fn remove_tile(&mut self, id: &ParticipantId);
}
