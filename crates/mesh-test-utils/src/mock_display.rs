//! Mock display surface.
//!
//! Clones share state, so a test keeps one clone and hands the other to the
//! session.

use common::types::ParticipantId;
use mesh_peer::display::{DisplaySurface, TileMetadata};
use mesh_peer::media::MediaStream;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// What one tile shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub metadata: TileMetadata,
    /// Id of the stream attached to the tile.
    pub stream_id: Option<String>,
}

#[derive(Debug, Default)]
struct DisplayState {
    tiles: BTreeMap<ParticipantId, Tile>,
    upserts: usize,
    removals: usize,
}

/// Display surface that records tiles.
#[derive(Debug, Clone, Default)]
pub struct MockDisplay {
    state: Arc<Mutex<DisplayState>>,
}

impl MockDisplay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities with a tile, sorted.
    #[must_use]
    pub fn tile_ids(&self) -> Vec<ParticipantId> {
        self.state.lock().unwrap().tiles.keys().cloned().collect()
    }

    #[must_use]
    pub fn tile(&self, id: &ParticipantId) -> Option<Tile> {
        self.state.lock().unwrap().tiles.get(id).cloned()
    }

    /// Total `upsert_tile` calls.
    #[must_use]
    pub fn upserts(&self) -> usize {
        self.state.lock().unwrap().upserts
    }

    /// Total `remove_tile` calls.
    #[must_use]
    pub fn removals(&self) -> usize {
        self.state.lock().unwrap().removals
    }
}

impl DisplaySurface for MockDisplay {
    fn upsert_tile(
        &mut self,
        id: &ParticipantId,
        metadata: &TileMetadata,
        stream: Option<&MediaStream>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.upserts += 1;

        let stream_id = stream.map(|s| s.id.clone());
        let tile = state.tiles.entry(id.clone()).or_insert_with(|| Tile {
            metadata: metadata.clone(),
            stream_id: None,
        });
        tile.metadata = metadata.clone();
        if stream_id.is_some() {
            tile.stream_id = stream_id;
        }
    }

    fn remove_tile(&mut self, id: &ParticipantId) {
        let mut state = self.state.lock().unwrap();
        state.removals += 1;
        state.tiles.remove(id);
    }
}
