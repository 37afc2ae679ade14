//! Participant directory reconciliation.
//!
//! [`TileBook`] remembers what every displayed tile currently shows and
//! pushes only the differences to the [`DisplaySurface`]. It is owned by the
//! session actor, so it needs no locking.
//!
//! Reconciliation rules for a directory snapshot:
//! - the anonymous local tile is re-bound to the assigned identity once that
//!   identity appears in the directory;
//! - a tile whose identity is in the directory is refreshed when its address
//!   or leader flag differs from what is shown;
//! - a tile whose identity is absent is reset to the unknown placeholder.
//!
//! Connections are never touched here.

use crate::display::{DisplaySurface, TileMetadata};
use crate::media::MediaStream;

use common::types::{Directory, ParticipantId};
use std::collections::HashMap;
use tracing::debug;

/// Displayed tiles and the metadata each one shows.
pub struct TileBook {
    display: Box<dyn DisplaySurface>,
    tiles: HashMap<ParticipantId, TileMetadata>,
    /// Key of the local tile; anonymous until bound.
    local_key: Option<ParticipantId>,
    local_stream: Option<MediaStream>,
}

impl TileBook {
    #[must_use]
    pub fn new(display: Box<dyn DisplaySurface>) -> Self {
        Self {
            display,
            tiles: HashMap::new(),
            local_key: None,
            local_stream: None,
        }
    }

    /// Show the local stream under the anonymous identity.
    pub fn show_local(&mut self, stream: &MediaStream) {
        let key = ParticipantId::anonymous();
        let metadata = TileMetadata {
            address: String::new(),
            is_leader: false,
        };

        self.display.upsert_tile(&key, &metadata, Some(stream));
        self.tiles.insert(key.clone(), metadata);
        self.local_key = Some(key);
        self.local_stream = Some(stream.clone());
    }

    /// Show (or replace) the stream received from a remote participant.
    pub fn show_remote(&mut self, id: &ParticipantId, stream: &MediaStream, directory: &Directory) {
        let metadata = directory
            .get(id)
            .map_or_else(TileMetadata::unknown, TileMetadata::from);

        self.display.upsert_tile(id, &metadata, Some(stream));
        self.tiles.insert(id.clone(), metadata);
    }

    /// Bring every tile in line with a new directory snapshot.
    pub fn reconcile(&mut self, directory: &Directory, self_id: Option<&ParticipantId>) {
        if let Some(self_id) = self_id {
            if directory.contains(self_id) {
                self.bind_local(self_id);
            }
        }

        let mut updates = Vec::new();
        for (id, shown) in &self.tiles {
            if id.is_anonymous() {
                continue;
            }
            let wanted = directory
                .get(id)
                .map_or_else(TileMetadata::unknown, TileMetadata::from);
            if *shown != wanted {
                updates.push((id.clone(), wanted));
            }
        }

        for (id, metadata) in updates {
            debug!(
                target: "mesh.actor.session",
                participant_id = %id,
                address = %metadata.address,
                is_leader = metadata.is_leader,
                "Refreshing tile metadata"
            );
            self.display.upsert_tile(&id, &metadata, None);
            self.tiles.insert(id, metadata);
        }
    }

    /// Remove the tile for `id`. Returns whether a tile existed.
    pub fn remove(&mut self, id: &ParticipantId) -> bool {
        if self.tiles.remove(id).is_some() {
            self.display.remove_tile(id);
            true
        } else {
            false
        }
    }

    /// Remove every tile except the local one.
    pub fn clear_remote(&mut self) {
        let remote: Vec<ParticipantId> = self
            .tiles
            .keys()
            .filter(|id| Some(*id) != self.local_key.as_ref())
            .cloned()
            .collect();

        for id in remote {
            self.remove(&id);
        }
    }

    /// Metadata currently shown for `id`.
    #[must_use]
    pub fn metadata(&self, id: &ParticipantId) -> Option<&TileMetadata> {
        self.tiles.get(id)
    }

    /// Identities with a tile, sorted.
    #[must_use]
    pub fn tile_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.tiles.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn bind_local(&mut self, self_id: &ParticipantId) {
        let Some(local_key) = self.local_key.as_ref() else {
            return;
        };
        if !local_key.is_anonymous() {
            return;
        }

        let anonymous = ParticipantId::anonymous();
        let metadata = self.tiles.remove(&anonymous).unwrap_or_else(TileMetadata::unknown);
        self.display.remove_tile(&anonymous);
        self.display
            .upsert_tile(self_id, &metadata, self.local_stream.as_ref());
        self.tiles.insert(self_id.clone(), metadata);
        self.local_key = Some(self_id.clone());

        debug!(
            target: "mesh.actor.session",
            participant_id = %self_id,
            "Local tile bound to assigned identity"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, TrackKind};
    use common::types::ParticipantInfo;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Upsert(String, TileMetadata, Option<String>),
        Remove(String),
    }

    #[derive(Clone, Default)]
    struct RecordingDisplay {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl DisplaySurface for RecordingDisplay {
        fn upsert_tile(
            &mut self,
            id: &ParticipantId,
            metadata: &TileMetadata,
            stream: Option<&MediaStream>,
        ) {
            self.calls.lock().unwrap().push(Call::Upsert(
                id.to_string(),
                metadata.clone(),
                stream.map(|s| s.id.clone()),
            ));
        }

        fn remove_tile(&mut self, id: &ParticipantId) {
            self.calls.lock().unwrap().push(Call::Remove(id.to_string()));
        }
    }

    fn stream(id: &str) -> MediaStream {
        MediaStream::new(id, vec![MediaTrack::new(format!("{id}-v"), TrackKind::Video)])
    }

    fn directory(entries: &[(&str, &str, bool)]) -> Directory {
        entries
            .iter()
            .map(|(id, address, leader)| ParticipantInfo::new(*id, *address, *leader))
            .collect()
    }

    fn book() -> (TileBook, Arc<Mutex<Vec<Call>>>) {
        let display = RecordingDisplay::default();
        let calls = Arc::clone(&display.calls);
        (TileBook::new(Box::new(display)), calls)
    }

    #[test]
    fn test_local_tile_rebound_on_first_directory() {
        let (mut tiles, calls) = book();
        tiles.show_local(&stream("local"));

        let dir = directory(&[("A", "203.0.113.1", true)]);
        tiles.reconcile(&dir, Some(&"A".into()));

        assert_eq!(tiles.tile_ids(), vec![ParticipantId::new("A")]);
        assert_eq!(
            tiles.metadata(&"A".into()),
            Some(&TileMetadata {
                address: "203.0.113.1".to_string(),
                is_leader: true
            })
        );

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&Call::Remove(String::new())));
        assert!(calls.iter().any(
            |c| matches!(c, Call::Upsert(id, _, Some(s)) if id == "A" && s == "local")
        ));
    }

    #[test]
    fn test_local_tile_stays_anonymous_until_listed() {
        let (mut tiles, _calls) = book();
        tiles.show_local(&stream("local"));

        tiles.reconcile(&directory(&[("B", "", false)]), Some(&"A".into()));

        assert_eq!(tiles.tile_ids(), vec![ParticipantId::anonymous()]);
    }

    #[test]
    fn test_unchanged_metadata_is_not_rewritten() {
        let (mut tiles, calls) = book();
        let dir = directory(&[("B", "198.51.100.2", false)]);
        tiles.show_remote(&"B".into(), &stream("b"), &dir);

        let before = calls.lock().unwrap().len();
        tiles.reconcile(&dir, None);
        assert_eq!(calls.lock().unwrap().len(), before);

        let changed = directory(&[("B", "198.51.100.2", true)]);
        tiles.reconcile(&changed, None);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), before + 1);
        assert_eq!(
            calls.last(),
            Some(&Call::Upsert(
                "B".to_string(),
                TileMetadata {
                    address: "198.51.100.2".to_string(),
                    is_leader: true
                },
                None
            ))
        );
    }

    #[test]
    fn test_absent_identity_metadata_reset() {
        let (mut tiles, _calls) = book();
        let dir = directory(&[("B", "198.51.100.2", true), ("C", "198.51.100.3", false)]);
        tiles.show_remote(&"B".into(), &stream("b"), &dir);
        tiles.show_remote(&"C".into(), &stream("c"), &dir);

        tiles.reconcile(&directory(&[("C", "198.51.100.3", false)]), None);

        assert_eq!(tiles.metadata(&"B".into()), Some(&TileMetadata::unknown()));
        assert_eq!(
            tiles.metadata(&"C".into()).map(|m| m.address.as_str()),
            Some("198.51.100.3")
        );
    }

    #[test]
    fn test_remove_and_clear_remote() {
        let (mut tiles, _calls) = book();
        tiles.show_local(&stream("local"));
        let dir = Directory::new();
        tiles.show_remote(&"B".into(), &stream("b"), &dir);
        tiles.show_remote(&"C".into(), &stream("c"), &dir);

        assert!(tiles.remove(&"B".into()));
        assert!(!tiles.remove(&"B".into()));

        tiles.clear_remote();
        assert_eq!(tiles.tile_ids(), vec![ParticipantId::anonymous()]);
    }
}
