#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use jukebox_core::catalog::{
    Album, Artist, Catalog, PlaylistDetail, ResolvedUrl, Song, UserPlaylist,
};
use jukebox_core::error::{CatalogError, CatalogResult};

/// How the fake catalog misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    /// `playlist_detail` answers with a non-success code.
    Detail,
    /// `track_list` comes back empty.
    EmptyTracks,
    /// `resolve_urls` fails as a whole.
    Resolve,
}

/// In-process catalog holding `total` songs with ids `s0`, `s1`, ...
pub struct FakeCatalog {
    pub total: u32,
    pub failure: Failure,
    /// Songs whose URL the catalog cannot resolve.
    pub unresolved: Vec<String>,
    calls: AtomicUsize,
    offsets: Mutex<Vec<u32>>,
}

impl FakeCatalog {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            failure: Failure::None,
            unresolved: Vec::new(),
            calls: AtomicUsize::new(0),
            offsets: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(failure: Failure) -> Self {
        Self {
            failure,
            ..Self::new(10)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn offsets(&self) -> Vec<u32> {
        self.offsets.lock().unwrap().clone()
    }

    fn song(i: u32) -> Song {
        Song {
            id: format!("s{i}"),
            name: format!("Song {i}"),
            artists: Some(vec![Artist {
                name: Some(format!("Artist {i}")),
            }]),
            album: Some(Album {
                pic_url: Some(format!("http://img/{i}.jpg")),
            }),
        }
    }
}

impl Catalog for FakeCatalog {
    async fn playlist_detail(&self, _playlist_id: &str) -> CatalogResult<PlaylistDetail> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failure == Failure::Detail {
            return Err(CatalogError::Api { code: 404 });
        }
        Ok(PlaylistDetail {
            track_count: self.total,
        })
    }

    async fn track_list(
        &self,
        _playlist_id: &str,
        limit: u32,
        offset: u32,
    ) -> CatalogResult<Vec<Song>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.offsets.lock().unwrap().push(offset);
        if self.failure == Failure::EmptyTracks {
            return Err(CatalogError::EmptyTrackList);
        }
        let end = self.total.min(offset.saturating_add(limit));
        Ok((offset..end).map(Self::song).collect())
    }

    async fn resolve_urls(&self, ids: &[String]) -> CatalogResult<Vec<ResolvedUrl>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failure == Failure::Resolve {
            return Err(CatalogError::Api { code: 502 });
        }
        Ok(ids
            .iter()
            .map(|id| ResolvedUrl {
                id: id.clone(),
                url: (!self.unresolved.contains(id)).then(|| format!("http://audio/{id}.mp3")),
            })
            .collect())
    }

    async fn user_playlists(&self, user_id: &str) -> CatalogResult<Vec<UserPlaylist>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![UserPlaylist {
            id: "1".to_string(),
            name: format!("{user_id}'s list"),
            cover_url: None,
            track_count: self.total,
        }])
    }
}
