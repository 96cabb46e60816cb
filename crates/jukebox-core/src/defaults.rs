//! The built-in playlist used before the first acquisition completes and
//! whenever neither the catalog nor the cache can provide one.

use jukebox_proto::protocol::Track;

use crate::playlist::Playlist;

/// Identifier reported for the built-in playlist.
pub const BUILTIN_PLAYLIST_ID: &str = "builtin";

pub fn builtin_playlist() -> Playlist {
    let tracks = vec![
        Track {
            id: "1".to_string(),
            title: "Late Night Code".to_string(),
            artist: "Lofi Dreamer".to_string(),
            cover: "https://images.unsplash.com/photo-1516280440614-6697288d5d38?q=80&w=200"
                .to_string(),
            url: "https://cdn.pixabay.com/download/audio/2022/05/27/audio_1808fbf07a.mp3"
                .to_string(),
        },
        Track {
            id: "2".to_string(),
            title: "Rainy Window".to_string(),
            artist: "Chill Beats".to_string(),
            cover: "https://images.unsplash.com/photo-1496360938681-982092429813?q=80&w=200"
                .to_string(),
            url: "https://cdn.pixabay.com/download/audio/2022/03/24/audio_07a0c9175d.mp3"
                .to_string(),
        },
    ];
    // Both entries above are static.
    match Playlist::new(BUILTIN_PLAYLIST_ID, tracks) {
        Some(p) => p,
        None => unreachable!("built-in playlist is non-empty"),
    }
}
