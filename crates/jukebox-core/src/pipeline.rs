//! Playlist acquisition: cache probe, catalog fetch over a random window,
//! URL resolution, sanitization and the fallback chain.
//!
//! Acquisition never fails from the caller's point of view.  Whatever goes
//! wrong, the result is a playable [`Playlist`] together with the
//! [`SourceStatus`] it came from.

use std::collections::HashMap;

use chrono::Utc;
use jukebox_proto::config::{CatalogConfig, SanitizePolicy};
use jukebox_proto::protocol::{SourceStatus, Track};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::cache::PlaylistCache;
use crate::catalog::{Catalog, Song};
use crate::defaults::builtin_playlist;
use crate::error::{CatalogError, CatalogResult};
use crate::playlist::Playlist;
use crate::store::KeyValueStore;

pub const LOAD_FAILED_CACHED: &str = "Load failed, playing cached playlist";
pub const LOAD_FAILED_OFFLINE: &str = "Load failed, switched to offline mode";

pub const STATUS_FETCHING_INFO: &str = "Fetching playlist info...";
pub const STATUS_RESOLVING: &str = "Resolving audio sources...";

fn status_digging(offset: u32) -> String {
    format!("Digging for tracks (start: {offset})...")
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub window_size: u32,
    /// `{id}` is replaced by the track identifier.
    pub fallback_url_template: String,
    pub placeholder_cover: String,
    pub sanitize: SanitizePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&CatalogConfig::default())
    }
}

impl From<&CatalogConfig> for PipelineSettings {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            window_size: config.window_size.max(1),
            fallback_url_template: config.fallback_url_template.clone(),
            placeholder_cover: config.placeholder_cover.clone(),
            sanitize: config.sanitize,
        }
    }
}

/// Outcome of one acquisition run.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquired {
    pub playlist: Playlist,
    pub source: SourceStatus,
    pub load_error: Option<String>,
    /// Fetched from the catalog in this run and not yet written to the cache.
    pub from_catalog: bool,
}

impl Acquired {
    fn cached(playlist: Playlist) -> Self {
        Self {
            playlist,
            source: SourceStatus::Online,
            load_error: None,
            from_catalog: false,
        }
    }

    fn fetched(playlist: Playlist) -> Self {
        Self {
            from_catalog: true,
            ..Self::cached(playlist)
        }
    }
}

/// Identifies acquisition runs so that only the latest one is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct AcquisitionGeneration {
    current: u64,
}

impl AcquisitionGeneration {
    /// Starts a new run, superseding every earlier ticket.
    pub fn begin(&mut self) -> Ticket {
        self.current += 1;
        Ticket(self.current)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.current
    }
}

pub struct Pipeline<C, K> {
    catalog: C,
    cache: PlaylistCache<K>,
    settings: PipelineSettings,
}

impl<C: Catalog, K: KeyValueStore> Pipeline<C, K> {
    pub fn new(catalog: C, cache: PlaylistCache<K>, settings: PipelineSettings) -> Self {
        Self {
            catalog,
            cache,
            settings,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn cache(&self) -> &PlaylistCache<K> {
        &self.cache
    }

    /// Normal acquisition.  A fresh cache entry is used without contacting
    /// the catalog.  `progress` receives stage descriptions and a final `""`.
    pub async fn acquire<P>(&self, playlist_id: &str, progress: &P) -> Acquired
    where
        P: Fn(&str) + Sync,
    {
        if let Some(playlist) = self.cache.fresh(playlist_id, Utc::now()) {
            info!(
                "pipeline: using cached playlist {} ({} tracks)",
                playlist_id,
                playlist.len()
            );
            progress("");
            return Acquired::cached(playlist);
        }
        self.acquire_remote(playlist_id, progress).await
    }

    /// Drops the cached entry and fetches again.  A failure afterwards falls
    /// straight through to the built-in playlist.
    pub async fn refresh<P>(&self, playlist_id: &str, progress: &P) -> Acquired
    where
        P: Fn(&str) + Sync,
    {
        if let Err(e) = self.cache.invalidate(playlist_id) {
            warn!("pipeline: failed to invalidate cache for {}: {}", playlist_id, e);
        }
        self.acquire_remote(playlist_id, progress).await
    }

    /// Persists a catalog result.  Only call this for the run that is still
    /// current; a superseded run must not overwrite the entry of a newer one.
    pub fn commit(&self, acquired: &Acquired) {
        if !acquired.from_catalog {
            return;
        }
        match self.cache.write(&acquired.playlist, Utc::now()) {
            Ok(()) => debug!(
                "pipeline: cached playlist {} ({} tracks)",
                acquired.playlist.source_id(),
                acquired.playlist.len()
            ),
            Err(e) => warn!("pipeline: cache write failed: {}", e),
        }
    }

    async fn acquire_remote<P>(&self, playlist_id: &str, progress: &P) -> Acquired
    where
        P: Fn(&str) + Sync,
    {
        let result = self.fetch(playlist_id, progress).await;
        progress("");
        match result {
            Ok(playlist) => {
                info!(
                    "pipeline: loaded {} tracks for playlist {}",
                    playlist.len(),
                    playlist_id
                );
                Acquired::fetched(playlist)
            }
            Err(e) => {
                if e.is_rate_limit() {
                    warn!("pipeline: catalog rate limit hit for {}: {}", playlist_id, e);
                } else {
                    warn!("pipeline: acquisition of {} failed: {}", playlist_id, e);
                }
                self.fallback(playlist_id)
            }
        }
    }

    async fn fetch<P>(&self, playlist_id: &str, progress: &P) -> CatalogResult<Playlist>
    where
        P: Fn(&str) + Sync,
    {
        progress(STATUS_FETCHING_INFO);
        let detail = self.catalog.playlist_detail(playlist_id).await?;

        let window = self.settings.window_size;
        let offset = random_offset(&mut rand::thread_rng(), detail.track_count, window);
        debug!(
            "pipeline: playlist {} has {} tracks, window {} at {}",
            playlist_id, detail.track_count, window, offset
        );
        progress(&status_digging(offset));
        let songs = self.catalog.track_list(playlist_id, window, offset).await?;

        progress(STATUS_RESOLVING);
        let ids: Vec<String> = songs.iter().map(|s| s.id.clone()).collect();
        let urls = match self.catalog.resolve_urls(&ids).await {
            Ok(resolved) => resolved
                .into_iter()
                .filter_map(|r| match r.url {
                    Some(url) if !url.is_empty() => Some((r.id, url)),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                warn!("pipeline: URL resolution failed, using fallback URLs: {}", e);
                HashMap::new()
            }
        };

        let tracks = songs
            .into_iter()
            .map(|song| build_track(song, &urls, &self.settings))
            .collect();
        let tracks = sanitize(tracks, self.settings.sanitize);
        Playlist::new(playlist_id, tracks).ok_or(CatalogError::EmptyAfterSanitize)
    }

    fn fallback(&self, playlist_id: &str) -> Acquired {
        match self.cache.any_age(playlist_id) {
            Some(playlist) => {
                info!(
                    "pipeline: falling back to cached playlist {} ({} tracks)",
                    playlist_id,
                    playlist.len()
                );
                Acquired {
                    playlist,
                    source: SourceStatus::Degraded,
                    load_error: Some(LOAD_FAILED_CACHED.to_string()),
                    from_catalog: false,
                }
            }
            None => {
                info!("pipeline: falling back to built-in playlist");
                Acquired {
                    playlist: builtin_playlist(),
                    source: SourceStatus::Offline,
                    load_error: Some(LOAD_FAILED_OFFLINE.to_string()),
                    from_catalog: false,
                }
            }
        }
    }
}

/// Start of a `window`-sized slice of a `total`-track playlist, uniform over
/// every position that keeps the slice inside the playlist.
pub fn random_offset<R: Rng + ?Sized>(rng: &mut R, total: u32, window: u32) -> u32 {
    if total > window {
        rng.gen_range(0..=total - window)
    } else {
        0
    }
}

pub fn build_track(song: Song, urls: &HashMap<String, String>, settings: &PipelineSettings) -> Track {
    let artist = song
        .artists
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| a.name)
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(" / ");
    let cover = song
        .album
        .and_then(|al| al.pic_url)
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| settings.placeholder_cover.clone());
    let url = match urls.get(&song.id) {
        Some(url) => url.clone(),
        None => settings.fallback_url_template.replace("{id}", &song.id),
    };
    Track {
        title: song.name,
        artist: if artist.is_empty() {
            "Unknown".to_string()
        } else {
            artist
        },
        cover,
        url,
        id: song.id,
    }
}

pub fn sanitize(mut tracks: Vec<Track>, policy: SanitizePolicy) -> Vec<Track> {
    match policy {
        SanitizePolicy::DropFirst if tracks.len() > 1 => {
            tracks.remove(0);
            tracks
        }
        _ => tracks,
    }
}
