//! Client for the remote music catalog (a NetEase Cloud Music compatible API).
//!
//! Every call is a single HTTP request with no retry; the acquisition
//! pipeline decides what a failure means.

use std::future::Future;
use std::time::Duration;

use jukebox_proto::config::CatalogConfig;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};

const SUCCESS_CODE: i64 = 200;

/// The remote calls the jukebox needs from a catalog.
pub trait Catalog: Send + Sync {
    /// Total number of tracks in a playlist.
    fn playlist_detail(
        &self,
        playlist_id: &str,
    ) -> impl Future<Output = CatalogResult<PlaylistDetail>> + Send;

    /// Up to `limit` songs starting at `offset`.
    fn track_list(
        &self,
        playlist_id: &str,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = CatalogResult<Vec<Song>>> + Send;

    /// Playable URLs for a batch of song identifiers, in one request.
    fn resolve_urls(
        &self,
        ids: &[String],
    ) -> impl Future<Output = CatalogResult<Vec<ResolvedUrl>>> + Send;

    /// Public playlists of a catalog user, for playlist discovery.
    fn user_playlists(
        &self,
        user_id: &str,
    ) -> impl Future<Output = CatalogResult<Vec<UserPlaylist>>> + Send;
}

// ── response models ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistDetail {
    pub track_count: u32,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    code: i64,
    playlist: Option<DetailPlaylist>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailPlaylist {
    #[serde(default)]
    track_count: u32,
}

#[derive(Debug, Deserialize)]
struct TrackListResponse {
    #[serde(default)]
    songs: Option<Vec<Song>>,
}

/// Song metadata as listed by the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct Song {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "ar")]
    pub artists: Option<Vec<Artist>>,
    #[serde(default, rename = "al")]
    pub album: Option<Album>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    #[serde(default, rename = "picUrl")]
    pub pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SongUrlResponse {
    code: i64,
    #[serde(default)]
    data: Option<Vec<ResolvedUrl>>,
}

/// One entry of a URL resolution batch; `url` is absent when the catalog
/// could not provide a stream for the song.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedUrl {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPlaylistResponse {
    code: i64,
    #[serde(default)]
    playlist: Option<Vec<UserPlaylist>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPlaylist {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename(deserialize = "coverImgUrl"))]
    pub cover_url: Option<String>,
    #[serde(default, rename(deserialize = "trackCount"))]
    pub track_count: u32,
}

/// Catalog identifiers arrive as JSON numbers; the jukebox treats them as
/// opaque strings.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

fn check_code(code: i64) -> CatalogResult<()> {
    if code == SUCCESS_CODE {
        Ok(())
    } else {
        Err(CatalogError::Api { code })
    }
}

pub(crate) fn parse_detail(body: &[u8]) -> CatalogResult<PlaylistDetail> {
    let resp: DetailResponse = serde_json::from_slice(body)?;
    check_code(resp.code)?;
    let playlist = resp.playlist.ok_or(CatalogError::Api { code: resp.code })?;
    Ok(PlaylistDetail {
        track_count: playlist.track_count,
    })
}

pub(crate) fn parse_track_list(body: &[u8]) -> CatalogResult<Vec<Song>> {
    let resp: TrackListResponse = serde_json::from_slice(body)?;
    match resp.songs {
        Some(songs) if !songs.is_empty() => Ok(songs),
        _ => Err(CatalogError::EmptyTrackList),
    }
}

pub(crate) fn parse_song_urls(body: &[u8]) -> CatalogResult<Vec<ResolvedUrl>> {
    let resp: SongUrlResponse = serde_json::from_slice(body)?;
    check_code(resp.code)?;
    Ok(resp.data.unwrap_or_default())
}

pub(crate) fn parse_user_playlists(body: &[u8]) -> CatalogResult<Vec<UserPlaylist>> {
    let resp: UserPlaylistResponse = serde_json::from_slice(body)?;
    check_code(resp.code)?;
    Ok(resp.playlist.unwrap_or_default())
}

// ── HTTP client ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> CatalogResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("jukebox/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &CatalogConfig) -> CatalogResult<Self> {
        Self::new(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> CatalogResult<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("catalog: GET {} {:?}", url, query);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_parsed<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
        parse: fn(&[u8]) -> CatalogResult<T>,
    ) -> CatalogResult<T> {
        let body = self.get(path, query).await?;
        parse(&body)
    }
}

impl Catalog for CatalogClient {
    async fn playlist_detail(&self, playlist_id: &str) -> CatalogResult<PlaylistDetail> {
        self.get_parsed(
            "/playlist/detail",
            &[("id", playlist_id.to_string())],
            parse_detail,
        )
        .await
    }

    async fn track_list(
        &self,
        playlist_id: &str,
        limit: u32,
        offset: u32,
    ) -> CatalogResult<Vec<Song>> {
        self.get_parsed(
            "/playlist/track/all",
            &[
                ("id", playlist_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
            parse_track_list,
        )
        .await
    }

    async fn resolve_urls(&self, ids: &[String]) -> CatalogResult<Vec<ResolvedUrl>> {
        self.get_parsed("/song/url", &[("id", ids.join(","))], parse_song_urls)
            .await
    }

    async fn user_playlists(&self, user_id: &str) -> CatalogResult<Vec<UserPlaylist>> {
        self.get_parsed(
            "/user/playlist",
            &[("uid", user_id.to_string())],
            parse_user_playlists,
        )
        .await
    }
}
