use jukebox_proto::protocol::Track;
use serde::{Deserialize, Serialize};

/// An ordered, non-empty track list together with the catalog playlist it
/// was taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPlaylist")]
pub struct Playlist {
    source_id: String,
    tracks: Vec<Track>,
}

#[derive(Deserialize)]
struct RawPlaylist {
    source_id: String,
    tracks: Vec<Track>,
}

impl TryFrom<RawPlaylist> for Playlist {
    type Error = &'static str;

    fn try_from(raw: RawPlaylist) -> Result<Self, Self::Error> {
        Playlist::new(raw.source_id, raw.tracks).ok_or("playlist has no tracks")
    }
}

impl Playlist {
    /// Returns `None` for an empty track list.
    pub fn new(source_id: impl Into<String>, tracks: Vec<Track>) -> Option<Self> {
        if tracks.is_empty() {
            return None;
        }
        Some(Self {
            source_id: source_id.into(),
            tracks,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Always false; kept so `len` has its usual companion.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }
}
