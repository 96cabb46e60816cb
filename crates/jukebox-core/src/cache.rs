//! Timestamped playlist snapshots kept in a [`KeyValueStore`].
//!
//! An entry is used for normal acquisition only while it is younger than the
//! freshness window and belongs to the requested playlist.  Older entries
//! with a matching identifier remain available as a last resort when the
//! catalog cannot be reached.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jukebox_proto::config::{CacheConfig, CacheKeyMode};
use jukebox_proto::protocol::Track;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::playlist::Playlist;
use crate::store::KeyValueStore;

pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(3600);

/// On-disk record: `{playlistId, tracks, timestamp}` with the timestamp in
/// milliseconds since the epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub playlist_id: String,
    pub tracks: Vec<Track>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(playlist: &Playlist, timestamp: DateTime<Utc>) -> Self {
        Self {
            playlist_id: playlist.source_id().to_string(),
            tracks: playlist.tracks().to_vec(),
            timestamp,
        }
    }

    /// Entries stamped in the future count as brand new.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now) < window
    }

    pub fn into_playlist(self) -> Option<Playlist> {
        Playlist::new(self.playlist_id, self.tracks)
    }
}

/// How playlist identifiers map onto store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKeyStrategy {
    /// Every playlist shares one key; a snapshot of another playlist is a miss.
    Single(String),
    /// One key per playlist: `{prefix}{id}`.
    PerPlaylist(String),
}

impl CacheKeyStrategy {
    pub fn key_for(&self, playlist_id: &str) -> String {
        match self {
            CacheKeyStrategy::Single(key) => key.clone(),
            CacheKeyStrategy::PerPlaylist(prefix) => format!("{prefix}{playlist_id}"),
        }
    }
}

impl Default for CacheKeyStrategy {
    fn default() -> Self {
        CacheKeyStrategy::Single("jukebox_playlist_cache".to_string())
    }
}

impl From<&CacheConfig> for CacheKeyStrategy {
    fn from(config: &CacheConfig) -> Self {
        match config.key {
            CacheKeyMode::Single => CacheKeyStrategy::Single(config.key_name.clone()),
            CacheKeyMode::PerPlaylist => CacheKeyStrategy::PerPlaylist(config.key_name.clone()),
        }
    }
}

pub struct PlaylistCache<S> {
    store: S,
    keys: CacheKeyStrategy,
    freshness: Duration,
}

impl<S: KeyValueStore> PlaylistCache<S> {
    pub fn new(store: S, keys: CacheKeyStrategy, freshness: Duration) -> Self {
        Self {
            store,
            keys,
            freshness,
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// The stored entry for `playlist_id`, whatever its age.  Unreadable or
    /// foreign entries are reported as absent.
    pub fn lookup(&self, playlist_id: &str) -> Option<CacheEntry> {
        let key = self.keys.key_for(playlist_id);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("cache: failed to read '{}': {}", key, e);
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("cache: ignoring malformed entry '{}': {}", key, e);
                return None;
            }
        };
        if entry.playlist_id != playlist_id {
            debug!(
                "cache: entry under '{}' belongs to playlist {}, wanted {}",
                key, entry.playlist_id, playlist_id
            );
            return None;
        }
        Some(entry)
    }

    /// A playlist usable for normal acquisition: matching and inside the window.
    pub fn fresh(&self, playlist_id: &str, now: DateTime<Utc>) -> Option<Playlist> {
        let entry = self.lookup(playlist_id)?;
        if !entry.is_fresh(now, self.freshness) {
            debug!(
                "cache: entry for {} is stale (age {}s)",
                playlist_id,
                entry.age(now).as_secs()
            );
            return None;
        }
        entry.into_playlist()
    }

    /// Any playlist stored for the identifier, for fallback after a failed fetch.
    pub fn any_age(&self, playlist_id: &str) -> Option<Playlist> {
        self.lookup(playlist_id)?.into_playlist()
    }

    pub fn write(&self, playlist: &Playlist, now: DateTime<Utc>) -> Result<(), CacheError> {
        let key = self.keys.key_for(playlist.source_id());
        let json = serde_json::to_string(&CacheEntry::new(playlist, now))?;
        self.store.set(&key, &json)?;
        debug!(
            "cache: stored {} tracks for {} under '{}'",
            playlist.len(),
            playlist.source_id(),
            key
        );
        Ok(())
    }

    /// Removes the entry for `playlist_id`.  Under a shared key, a snapshot of
    /// a different playlist is left alone.
    pub fn invalidate(&self, playlist_id: &str) -> Result<(), CacheError> {
        let key = self.keys.key_for(playlist_id);
        if let CacheKeyStrategy::Single(_) = self.keys {
            let foreign = self
                .store
                .get(&key)?
                .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok())
                .is_some_and(|entry| entry.playlist_id != playlist_id);
            if foreign {
                return Ok(());
            }
        }
        self.store.remove(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn playlist(id: &str, n: usize) -> Playlist {
        let tracks = (0..n)
            .map(|i| Track {
                id: format!("{id}-{i}"),
                title: format!("Song {i}"),
                ..Track::default()
            })
            .collect();
        Playlist::new(id, tracks).unwrap()
    }

    fn cache(keys: CacheKeyStrategy) -> PlaylistCache<MemoryStore> {
        PlaylistCache::new(MemoryStore::new(), keys, DEFAULT_FRESHNESS)
    }

    #[test]
    fn test_fresh_entry_is_returned() {
        let cache = cache(CacheKeyStrategy::default());
        let now = Utc::now();
        cache.write(&playlist("p1", 3), now).unwrap();
        let hit = cache.fresh("p1", now + chrono::Duration::seconds(10)).unwrap();
        assert_eq!(hit.len(), 3);
    }

    #[test]
    fn test_entry_at_window_boundary_is_stale() {
        let cache = cache(CacheKeyStrategy::default());
        let now = Utc::now();
        cache.write(&playlist("p1", 3), now).unwrap();
        assert!(cache
            .fresh("p1", now + chrono::Duration::seconds(3599))
            .is_some());
        assert!(cache
            .fresh("p1", now + chrono::Duration::seconds(3600))
            .is_none());
        assert!(cache.any_age("p1").is_some());
    }

    #[test]
    fn test_single_key_mismatch_is_a_miss() {
        let cache = cache(CacheKeyStrategy::default());
        let now = Utc::now();
        cache.write(&playlist("p1", 2), now).unwrap();
        assert!(cache.fresh("p2", now).is_none());
        assert!(cache.any_age("p2").is_none());
    }

    #[test]
    fn test_invalidate_under_shared_key_spares_other_playlist() {
        let cache = cache(CacheKeyStrategy::default());
        let now = Utc::now();
        cache.write(&playlist("p1", 2), now).unwrap();
        cache.invalidate("p2").unwrap();
        assert!(cache.fresh("p1", now).is_some());
        cache.invalidate("p1").unwrap();
        assert!(cache.any_age("p1").is_none());
    }

    #[test]
    fn test_per_playlist_keys_keep_entries_apart() {
        let cache = cache(CacheKeyStrategy::PerPlaylist("pl_".to_string()));
        let now = Utc::now();
        cache.write(&playlist("a", 2), now).unwrap();
        cache.write(&playlist("b", 4), now).unwrap();
        assert_eq!(cache.fresh("a", now).unwrap().len(), 2);
        assert_eq!(cache.fresh("b", now).unwrap().len(), 4);
        assert_eq!(
            CacheKeyStrategy::PerPlaylist("pl_".to_string()).key_for("a"),
            "pl_a"
        );
    }

    #[test]
    fn test_entry_json_shape() {
        let now = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let json = serde_json::to_value(CacheEntry::new(&playlist("p", 1), now)).unwrap();
        assert_eq!(json["playlistId"], "p");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["tracks"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_entry_is_a_miss() {
        let store = MemoryStore::new();
        store.set("jukebox_playlist_cache", "{oops").unwrap();
        let cache = PlaylistCache::new(store, CacheKeyStrategy::default(), DEFAULT_FRESHNESS);
        assert!(cache.lookup("p").is_none());
    }
}
