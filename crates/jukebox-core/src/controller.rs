//! Playback controller: the single owner of playback state.
//!
//! State is `(index, playing, shuffle, volume, consecutive_errors)` over a
//! non-empty [`Playlist`].  Every transition is a method call; device
//! notifications arrive through [`PlaybackController::handle_event`] and
//! delayed transitions through [`PlaybackController::handle_timer`].
//!
//! Playback failures are absorbed here.  Up to `error_threshold - 1`
//! consecutive failures each schedule a skip to the next track; reaching the
//! threshold stops playback and clears the streak.  A single successful
//! ready-to-play notification also clears it.

use std::time::Duration;

use jukebox_proto::config::PlayerConfig;
use jukebox_proto::protocol::Track;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::PlaybackError;
use crate::output::{AudioOutput, ControllerTimer, OutputEvent, Scheduler, ABORTED_ERROR_CODE};
use crate::playlist::Playlist;

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub default_volume: f32,
    pub error_threshold: u32,
    pub skip_delay: Duration,
    pub resume_delay: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&PlayerConfig::default())
    }
}

impl From<&PlayerConfig> for ControllerSettings {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            default_volume: config.default_volume.clamp(0.0, 1.0),
            error_threshold: config.error_threshold.max(1),
            skip_delay: Duration::from_millis(config.skip_delay_ms),
            resume_delay: Duration::from_millis(config.resume_delay_ms),
        }
    }
}

pub struct PlaybackController<O, S> {
    output: O,
    scheduler: S,
    settings: ControllerSettings,
    playlist: Playlist,
    index: usize,
    playing: bool,
    shuffle: bool,
    volume: f32,
    consecutive_errors: u32,
    /// Bumped when pending timers must be dropped: playlist replaced, user
    /// selection, circuit breaker tripped.
    epoch: u64,
    skip_pending: bool,
    rng: StdRng,
}

impl<O: AudioOutput, S: Scheduler> PlaybackController<O, S> {
    pub fn new(playlist: Playlist, output: O, scheduler: S, settings: ControllerSettings) -> Self {
        Self::with_rng(playlist, output, scheduler, settings, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new) with a caller-supplied random source for
    /// shuffle.
    pub fn with_rng(
        playlist: Playlist,
        mut output: O,
        scheduler: S,
        settings: ControllerSettings,
        rng: StdRng,
    ) -> Self {
        let volume = settings.default_volume;
        output.set_volume(volume);
        if let Some(track) = playlist.get(0) {
            output.load(&track.url);
        }
        Self {
            output,
            scheduler,
            settings,
            playlist,
            index: 0,
            playing: false,
            shuffle: false,
            volume,
            consecutive_errors: 0,
            epoch: 0,
            skip_pending: false,
            rng,
        }
    }

    // ── accessors ────────────────────────────────────────────────────────────

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_track(&self) -> &Track {
        // `index` is kept inside the non-empty playlist by every transition.
        &self.playlist.tracks()[self.index]
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    // ── commands ─────────────────────────────────────────────────────────────

    pub fn toggle_play(&mut self) {
        self.set_playing(!self.playing);
    }

    /// Jump to `index` and play it.  `index` must lie within the playlist.
    pub fn select(&mut self, index: usize) -> Result<(), PlaybackError> {
        if index >= self.playlist.len() {
            return Err(PlaybackError::IndexOutOfBounds {
                index,
                len: self.playlist.len(),
            });
        }
        self.consecutive_errors = 0;
        self.go_to(index);
        Ok(())
    }

    /// Sequential or shuffled advance.  Under shuffle a different track is
    /// always chosen when there is more than one.
    pub fn next(&mut self) {
        let len = self.playlist.len();
        let next = if !self.shuffle {
            (self.index + 1) % len
        } else if len == 1 {
            0
        } else {
            let pick = self.rng.gen_range(0..len - 1);
            if pick >= self.index {
                pick + 1
            } else {
                pick
            }
        };
        self.go_to(next);
    }

    /// Always sequential, whatever the shuffle setting.
    pub fn prev(&mut self) {
        let len = self.playlist.len();
        self.go_to((self.index + len - 1) % len);
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        if self.shuffle != enabled {
            info!("controller: shuffle {}", if enabled { "on" } else { "off" });
        }
        self.shuffle = enabled;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.output.set_volume(self.volume);
    }

    /// Swap in a new playlist.  Playback stops immediately and resumes from
    /// the first track once the resume delay has elapsed.
    pub fn replace_playlist(&mut self, playlist: Playlist) {
        info!(
            "controller: new playlist {} ({} tracks)",
            playlist.source_id(),
            playlist.len()
        );
        self.set_playing(false);
        self.playlist = playlist;
        self.index = 0;
        self.consecutive_errors = 0;
        self.cancel_timers();
        let url = self.current_track().url.clone();
        self.output.load(&url);
        self.scheduler.schedule(
            self.settings.resume_delay,
            ControllerTimer::Resume { epoch: self.epoch },
        );
    }

    // ── device notifications and timers ──────────────────────────────────────

    pub fn handle_event(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::Ended => {
                debug!("controller: '{}' ended", self.current_track().title);
                self.next();
            }
            OutputEvent::Error { code, message } => self.on_playback_error(code, message),
            OutputEvent::Ready => {
                if self.consecutive_errors > 0 {
                    debug!(
                        "controller: '{}' ready, clearing {} error(s)",
                        self.current_track().title,
                        self.consecutive_errors
                    );
                }
                self.consecutive_errors = 0;
            }
            OutputEvent::PlayRejected { reason } => {
                warn!("controller: play rejected by output: {}", reason);
                self.playing = false;
            }
        }
    }

    pub fn handle_timer(&mut self, timer: ControllerTimer) {
        match timer {
            ControllerTimer::Resume { epoch } if epoch == self.epoch => {
                self.set_playing(true);
            }
            ControllerTimer::SkipAfterError { epoch } if epoch == self.epoch => {
                self.skip_pending = false;
                self.next();
            }
            stale => debug!("controller: dropping stale timer {:?}", stale),
        }
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn on_playback_error(&mut self, code: i32, message: Option<String>) {
        if self.playlist.len() <= 1 {
            debug!("controller: playback error code {} with nothing to skip to", code);
            return;
        }
        if code != ABORTED_ERROR_CODE {
            warn!(
                "controller: playback error on '{}' code {}: {}",
                self.current_track().title,
                code,
                message.as_deref().unwrap_or("-")
            );
        }

        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.settings.error_threshold {
            warn!(
                "controller: {} consecutive playback errors, stopping",
                self.consecutive_errors
            );
            self.consecutive_errors = 0;
            self.cancel_timers();
            self.set_playing(false);
        } else if !self.skip_pending {
            self.skip_pending = true;
            self.scheduler.schedule(
                self.settings.skip_delay,
                ControllerTimer::SkipAfterError { epoch: self.epoch },
            );
        }
    }

    /// Any track change supersedes a pending skip or resume.
    fn go_to(&mut self, index: usize) {
        self.cancel_timers();
        self.index = index;
        let url = self.current_track().url.clone();
        debug!("controller: track {} -> {}", index, url);
        self.output.load(&url);
        self.set_playing(true);
    }

    fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
        if playing {
            self.output.play();
        } else {
            self.output.pause();
        }
    }

    fn cancel_timers(&mut self) {
        self.epoch += 1;
        self.skip_pending = false;
    }
}
