//! OS media controls bridge (MPRIS/SMTC/Now Playing).
//!
//! Mirrors the current track and play state onto the platform's now-playing
//! surface via `souvlaki`, and turns its transport buttons into daemon
//! commands.  Runs on its own thread because some backends are not `Send`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jukebox_proto::protocol::{Command, JukeboxState};
use souvlaki::{MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, PlatformConfig};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::core::DaemonEvent;
use crate::state::StateManager;
use crate::BroadcastMessage;

const DISPLAY_NAME: &str = "Jukebox";
const DBUS_NAME: &str = "jukebox";

/// What the OS surface is showing.
#[derive(Debug, Clone, Default, PartialEq)]
struct NowPlaying {
    title: String,
    artist: String,
    cover: String,
    playing: bool,
}

impl NowPlaying {
    fn from_state(state: &JukeboxState) -> Self {
        let track = state.current_track.clone().unwrap_or_default();
        Self {
            title: track.title,
            artist: track.artist,
            cover: track.cover,
            playing: state.is_playing,
        }
    }

    fn same_track(&self, other: &Self) -> bool {
        self.title == other.title && self.artist == other.artist && self.cover == other.cover
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PublishPlan {
    metadata: bool,
    playback: bool,
}

fn plan(previous: Option<&NowPlaying>, next: &NowPlaying) -> PublishPlan {
    match previous {
        None => PublishPlan {
            metadata: true,
            playback: true,
        },
        Some(previous) => PublishPlan {
            metadata: !previous.same_track(next),
            playback: previous.playing != next.playing,
        },
    }
}

/// `is_playing` is the last published state; there is no absolute play/pause
/// command, so explicit buttons only toggle when they would change something.
fn map_control_event(event: MediaControlEvent, is_playing: bool) -> Option<Command> {
    match event {
        MediaControlEvent::Toggle => Some(Command::TogglePlay),
        MediaControlEvent::Play => (!is_playing).then_some(Command::TogglePlay),
        MediaControlEvent::Pause | MediaControlEvent::Stop => {
            is_playing.then_some(Command::TogglePlay)
        }
        MediaControlEvent::Next => Some(Command::Next),
        MediaControlEvent::Previous => Some(Command::Prev),
        MediaControlEvent::SetVolume(volume) => Some(Command::SetVolume {
            value: volume as f32,
        }),
        _ => None,
    }
}

pub struct MediaControlsManager {
    broadcast_rx: broadcast::Receiver<BroadcastMessage>,
    state_manager: Arc<StateManager>,
    controls: MediaControls,
    is_playing: Arc<AtomicBool>,
    published: Option<NowPlaying>,
}

/// Spawns the bridge thread.  Returns `None` when the platform backend is
/// unavailable; the daemon runs on without it.
pub fn start(
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) -> Option<std::thread::JoinHandle<()>> {
    let spawned = std::thread::Builder::new()
        .name("media-controls".to_string())
        .spawn(move || {
            let is_playing = Arc::new(AtomicBool::new(false));
            let Some(controls) = create_controls(event_tx, Arc::clone(&is_playing)) else {
                return;
            };
            let mut manager = MediaControlsManager {
                broadcast_rx,
                state_manager,
                controls,
                is_playing,
                published: None,
            };
            manager.run();
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("MediaControls: failed to spawn thread: {}", e);
            None
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn create_controls(
    event_tx: mpsc::Sender<DaemonEvent>,
    is_playing: Arc<AtomicBool>,
) -> Option<MediaControls> {
    let mut controls = match MediaControls::new(PlatformConfig {
        display_name: DISPLAY_NAME,
        dbus_name: DBUS_NAME,
        hwnd: None,
    }) {
        Ok(controls) => controls,
        Err(e) => {
            warn!("MediaControls: backend unavailable: {}", e);
            return None;
        }
    };

    let attached = controls.attach(move |event| {
        debug!("MediaControls: event {:?}", event);
        let Some(cmd) = map_control_event(event, is_playing.load(Ordering::Relaxed)) else {
            return;
        };
        if event_tx.try_send(DaemonEvent::ClientCommand(cmd)).is_err() {
            warn!("MediaControls: dropped command, event channel full or closed");
        }
    });
    if let Err(e) = attached {
        warn!("MediaControls: failed to attach handler: {}", e);
        return None;
    }

    info!("MediaControls: attached as '{}'", DISPLAY_NAME);
    Some(controls)
}

#[cfg(target_os = "windows")]
fn create_controls(
    _event_tx: mpsc::Sender<DaemonEvent>,
    _is_playing: Arc<AtomicBool>,
) -> Option<MediaControls> {
    // SMTC needs a window handle and the daemon has no window.
    warn!("MediaControls: not supported without a window on Windows");
    None
}

impl MediaControlsManager {
    fn run(&mut self) {
        let state = self.state_manager.blocking_state();
        self.publish(&state);

        loop {
            match self.broadcast_rx.blocking_recv() {
                Ok(BroadcastMessage::StateUpdated) => {}
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("MediaControls: lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
            let state = self.state_manager.blocking_state();
            self.publish(&state);
        }
        info!("MediaControls: stopped");
    }

    fn publish(&mut self, state: &JukeboxState) {
        let next = NowPlaying::from_state(state);
        let plan = plan(self.published.as_ref(), &next);

        if plan.metadata {
            let result = self.controls.set_metadata(MediaMetadata {
                title: Some(next.title.as_str()),
                artist: Some(next.artist.as_str()),
                album: None,
                cover_url: (!next.cover.is_empty()).then_some(next.cover.as_str()),
                duration: None,
            });
            if let Err(e) = result {
                warn!("MediaControls: failed to publish metadata: {}", e);
                return;
            }
        }
        if plan.playback {
            let playback = if next.playing {
                MediaPlayback::Playing { progress: None }
            } else {
                MediaPlayback::Paused { progress: None }
            };
            if let Err(e) = self.controls.set_playback(playback) {
                warn!("MediaControls: failed to publish playback state: {}", e);
                return;
            }
        }

        self.is_playing.store(next.playing, Ordering::Relaxed);
        self.published = Some(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_proto::protocol::Track;

    fn state(title: &str, playing: bool) -> JukeboxState {
        JukeboxState {
            current_track: Some(Track {
                title: title.to_string(),
                artist: "Artist".to_string(),
                cover: "http://img/1.jpg".to_string(),
                ..Track::default()
            }),
            is_playing: playing,
            ..JukeboxState::default()
        }
    }

    #[test]
    fn test_transport_buttons_map_to_commands() {
        assert!(matches!(
            map_control_event(MediaControlEvent::Toggle, true),
            Some(Command::TogglePlay)
        ));
        assert!(matches!(
            map_control_event(MediaControlEvent::Next, false),
            Some(Command::Next)
        ));
        assert!(matches!(
            map_control_event(MediaControlEvent::Previous, false),
            Some(Command::Prev)
        ));
        assert!(map_control_event(MediaControlEvent::Raise, false).is_none());
    }

    #[test]
    fn test_play_and_pause_only_toggle_on_change() {
        assert!(matches!(
            map_control_event(MediaControlEvent::Play, false),
            Some(Command::TogglePlay)
        ));
        assert!(map_control_event(MediaControlEvent::Play, true).is_none());
        assert!(matches!(
            map_control_event(MediaControlEvent::Pause, true),
            Some(Command::TogglePlay)
        ));
        assert!(map_control_event(MediaControlEvent::Pause, false).is_none());
    }

    #[test]
    fn test_volume_event_is_forwarded() {
        match map_control_event(MediaControlEvent::SetVolume(0.25), false) {
            Some(Command::SetVolume { value }) => assert_eq!(value, 0.25),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_now_playing_follows_current_track() {
        let now = NowPlaying::from_state(&state("Song 1", true));
        assert_eq!(now.title, "Song 1");
        assert_eq!(now.artist, "Artist");
        assert_eq!(now.cover, "http://img/1.jpg");
        assert!(now.playing);

        let empty = NowPlaying::from_state(&JukeboxState::default());
        assert_eq!(empty, NowPlaying::default());
    }

    #[test]
    fn test_publishes_only_what_changed() {
        let first = NowPlaying::from_state(&state("Song 1", false));
        assert_eq!(
            plan(None, &first),
            PublishPlan {
                metadata: true,
                playback: true
            }
        );

        let resumed = NowPlaying::from_state(&state("Song 1", true));
        assert_eq!(
            plan(Some(&first), &resumed),
            PublishPlan {
                metadata: false,
                playback: true
            }
        );

        let advanced = NowPlaying::from_state(&state("Song 2", true));
        assert_eq!(
            plan(Some(&resumed), &advanced),
            PublishPlan {
                metadata: true,
                playback: false
            }
        );
        assert_eq!(
            plan(Some(&advanced), &advanced.clone()),
            PublishPlan {
                metadata: false,
                playback: false
            }
        );
    }
}
