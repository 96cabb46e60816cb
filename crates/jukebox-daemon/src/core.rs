/// DaemonCore: single-owner event loop for all mutable state.
///
/// The playback controller, the acquisition generation and the published
/// snapshot live here and nowhere else.  Client commands, output device
/// notifications, controller timers and acquisition progress all arrive as
/// `DaemonEvent`s on one channel and are applied in order.
///
/// After each event the snapshot is rebuilt; when it changed, its revision is
/// bumped and `BroadcastMessage::StateUpdated` goes out to every listener.
use std::sync::Arc;
use std::time::Duration;

use jukebox_core::catalog::Catalog;
use jukebox_core::controller::{ControllerSettings, PlaybackController};
use jukebox_core::defaults::builtin_playlist;
use jukebox_core::output::{AudioOutput, ControllerTimer, OutputEvent, Scheduler};
use jukebox_core::pipeline::{Acquired, AcquisitionGeneration, Pipeline, Ticket};
use jukebox_core::store::KeyValueStore;
use jukebox_proto::config::Config;
use jukebox_proto::protocol::{Command, JukeboxState, SourceStatus};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::StateManager;
use crate::BroadcastMessage;

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Notification from the audio output.
    Output(OutputEvent),
    /// A controller timer has elapsed.
    Timer(ControllerTimer),
    AcquisitionProgress { ticket: Ticket, status: String },
    AcquisitionFinished { ticket: Ticket, acquired: Acquired },
    Shutdown,
}

/// Delivers controller timers back through the event channel.
pub struct TokioScheduler {
    tx: mpsc::Sender<DaemonEvent>,
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, timer: ControllerTimer) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DaemonEvent::Timer(timer)).await;
        });
    }
}

/// Progress of the most recent playlist request.
struct AcquisitionView {
    /// Playlist most recently requested, whether or not it has loaded yet.
    playlist_id: String,
    loading: bool,
    status: String,
    source: SourceStatus,
    load_error: Option<String>,
}

pub struct DaemonCore<C, K, O> {
    controller: PlaybackController<O, TokioScheduler>,
    pipeline: Arc<Pipeline<C, K>>,
    generation: AcquisitionGeneration,
    acquisition: AcquisitionView,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl<C, K, O> DaemonCore<C, K, O>
where
    C: Catalog + 'static,
    K: KeyValueStore + 'static,
    O: AudioOutput,
{
    /// Starts on the built-in playlist; `run` kicks off the first acquisition.
    pub fn new(
        config: &Config,
        pipeline: Arc<Pipeline<C, K>>,
        output: O,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let scheduler = TokioScheduler {
            tx: event_tx.clone(),
        };
        let controller = PlaybackController::new(
            builtin_playlist(),
            output,
            scheduler,
            ControllerSettings::from(&config.player),
        );
        let acquisition = AcquisitionView {
            playlist_id: config.catalog.default_playlist_id.clone(),
            loading: false,
            status: String::new(),
            source: SourceStatus::Offline,
            load_error: None,
        };
        let state_manager = Arc::new(StateManager::new(snapshot(&controller, &acquisition)));
        Self {
            controller,
            pipeline,
            generation: AcquisitionGeneration::default(),
            acquisition,
            state_manager,
            event_tx,
            broadcast_tx,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run until `Shutdown` arrives or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");
        self.start_acquisition(self.acquisition.playlist_id.clone(), false);
        self.publish().await;

        while let Some(event) = event_rx.recv().await {
            if !self.handle_event(event).await {
                info!("DaemonCore: shutdown requested");
                return Ok(());
            }
        }
        info!("DaemonCore: event channel closed, shutting down");
        Ok(())
    }

    /// Applies one event and publishes the result.  Returns `false` on shutdown.
    pub async fn handle_event(&mut self, event: DaemonEvent) -> bool {
        match event {
            DaemonEvent::Shutdown => return false,
            DaemonEvent::ClientCommand(cmd) => {
                info!("DaemonCore: command {:?}", cmd);
                if let Err(e) = self.handle_command(cmd) {
                    warn!("DaemonCore: command rejected: {}", e);
                    let _ = self.broadcast_tx.send(BroadcastMessage::Error(e.to_string()));
                }
            }
            DaemonEvent::Output(event) => {
                debug!("DaemonCore: output event {:?}", event);
                self.controller.handle_event(event);
            }
            DaemonEvent::Timer(timer) => self.controller.handle_timer(timer),
            DaemonEvent::AcquisitionProgress { ticket, status } => {
                if self.generation.is_current(ticket) {
                    self.acquisition.status = status;
                }
            }
            DaemonEvent::AcquisitionFinished { ticket, acquired } => {
                self.finish_acquisition(ticket, acquired);
            }
        }
        self.publish().await;
        true
    }

    fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::TogglePlay => self.controller.toggle_play(),
            Command::Next => self.controller.next(),
            Command::Prev => self.controller.prev(),
            Command::Select { index } => self.controller.select(index)?,
            Command::SetShuffle { enabled } => self.controller.set_shuffle(enabled),
            Command::SetVolume { value } => self.controller.set_volume(value),
            Command::ChangePlaylist { playlist_id } => {
                let playlist_id = playlist_id.trim().to_string();
                if playlist_id.is_empty() {
                    anyhow::bail!("playlist id is empty");
                }
                self.start_acquisition(playlist_id, false);
            }
            Command::Refresh => {
                self.start_acquisition(self.acquisition.playlist_id.clone(), true)
            }
            Command::GetState => {}
        }
        Ok(())
    }

    fn start_acquisition(&mut self, playlist_id: String, refresh: bool) {
        let ticket = self.generation.begin();
        info!(
            "DaemonCore: {} playlist {} ({:?})",
            if refresh { "refreshing" } else { "acquiring" },
            playlist_id,
            ticket
        );
        self.acquisition.playlist_id = playlist_id.clone();
        self.acquisition.loading = true;
        self.acquisition.load_error = None;

        let pipeline = Arc::clone(&self.pipeline);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let progress_tx = tx.clone();
            let progress = move |status: &str| {
                let event = DaemonEvent::AcquisitionProgress {
                    ticket,
                    status: status.to_string(),
                };
                if progress_tx.try_send(event).is_err() {
                    debug!("DaemonCore: dropped progress update");
                }
            };
            let acquired = if refresh {
                pipeline.refresh(&playlist_id, &progress).await
            } else {
                pipeline.acquire(&playlist_id, &progress).await
            };
            let _ = tx
                .send(DaemonEvent::AcquisitionFinished { ticket, acquired })
                .await;
        });
    }

    fn finish_acquisition(&mut self, ticket: Ticket, acquired: Acquired) {
        if !self.generation.is_current(ticket) {
            debug!("DaemonCore: discarding superseded acquisition {:?}", ticket);
            return;
        }
        info!(
            "DaemonCore: playlist {} ready, {} tracks, source {}",
            self.acquisition.playlist_id,
            acquired.playlist.len(),
            acquired.source.label()
        );
        self.pipeline.commit(&acquired);
        let view = &mut self.acquisition;
        view.loading = false;
        view.status.clear();
        view.source = acquired.source;
        view.load_error = acquired.load_error;
        self.controller.replace_playlist(acquired.playlist);
    }

    async fn publish(&self) {
        let next = snapshot(&self.controller, &self.acquisition);
        if let Some(rev) = self.state_manager.publish(next).await {
            debug!("DaemonCore: state rev {}", rev);
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }
}

fn snapshot<O: AudioOutput, S: Scheduler>(
    c: &PlaybackController<O, S>,
    acquisition: &AcquisitionView,
) -> JukeboxState {
    JukeboxState {
        rev: 0,
        playlist_id: acquisition.playlist_id.clone(),
        tracks: c.playlist().tracks().to_vec(),
        current_index: c.current_index(),
        current_track: Some(c.current_track().clone()),
        is_playing: c.is_playing(),
        shuffle: c.shuffle(),
        volume: c.volume(),
        consecutive_errors: c.consecutive_errors(),
        loading: acquisition.loading,
        acquisition_status: acquisition.status.clone(),
        source: acquisition.source,
        load_error: acquisition.load_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_core::cache::{CacheKeyStrategy, PlaylistCache, DEFAULT_FRESHNESS};
    use jukebox_core::catalog::{PlaylistDetail, ResolvedUrl, Song, UserPlaylist};
    use jukebox_core::error::{CatalogError, CatalogResult};
    use jukebox_core::pipeline::PipelineSettings;
    use jukebox_core::store::MemoryStore;
    use jukebox_core::Playlist;
    use jukebox_proto::protocol::Track;

    /// Catalog that is always down.
    struct Unreachable;

    impl Catalog for Unreachable {
        async fn playlist_detail(&self, _: &str) -> CatalogResult<PlaylistDetail> {
            Err(CatalogError::Api { code: 503 })
        }
        async fn track_list(&self, _: &str, _: u32, _: u32) -> CatalogResult<Vec<Song>> {
            Err(CatalogError::EmptyTrackList)
        }
        async fn resolve_urls(&self, _: &[String]) -> CatalogResult<Vec<ResolvedUrl>> {
            Ok(Vec::new())
        }
        async fn user_playlists(&self, _: &str) -> CatalogResult<Vec<UserPlaylist>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct NullOutput;

    impl AudioOutput for NullOutput {
        fn load(&mut self, _: &str) {}
        fn play(&mut self) {}
        fn pause(&mut self) {}
        fn set_volume(&mut self, _: f32) {}
    }

    type TestCore = DaemonCore<Unreachable, MemoryStore, NullOutput>;

    fn new_core() -> (TestCore, mpsc::Receiver<DaemonEvent>, broadcast::Receiver<BroadcastMessage>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(64);
        let cache = PlaylistCache::new(
            MemoryStore::new(),
            CacheKeyStrategy::default(),
            DEFAULT_FRESHNESS,
        );
        let pipeline = Arc::new(Pipeline::new(Unreachable, cache, PipelineSettings::default()));
        let core = DaemonCore::new(&Config::default(), pipeline, NullOutput, broadcast_tx, event_tx);
        (core, event_rx, broadcast_rx)
    }

    fn acquired(id: &str, n: usize) -> Acquired {
        let tracks = (0..n)
            .map(|i| Track {
                id: i.to_string(),
                url: format!("http://a/{i}.mp3"),
                ..Track::default()
            })
            .collect();
        Acquired {
            playlist: Playlist::new(id, tracks).unwrap(),
            source: SourceStatus::Online,
            load_error: None,
            from_catalog: true,
        }
    }

    async fn finished(rx: &mut mpsc::Receiver<DaemonEvent>) -> (Ticket, Acquired) {
        loop {
            if let Some(DaemonEvent::AcquisitionFinished { ticket, acquired }) = rx.recv().await {
                return (ticket, acquired);
            }
        }
    }

    #[tokio::test]
    async fn test_starts_on_builtin_playlist() {
        let (core, _rx, _b) = new_core();
        let state = core.state_manager().get_state().await;
        assert_eq!(state.rev, 1);
        assert_eq!(state.tracks.len(), 2);
        assert_eq!(state.playlist_id, "6654477071");
        assert!(!state.is_playing);
        assert_eq!(state.volume, 0.5);
        assert_eq!(state.source, SourceStatus::Offline);
    }

    #[tokio::test]
    async fn test_commands_publish_state() {
        let (mut core, _rx, mut b) = new_core();
        core.handle_event(DaemonEvent::ClientCommand(Command::Select { index: 1 }))
            .await;
        let state = core.state_manager().get_state().await;
        assert_eq!(state.current_index, 1);
        assert!(state.is_playing);
        assert_eq!(state.rev, 2);
        assert!(matches!(b.try_recv(), Ok(BroadcastMessage::StateUpdated)));
    }

    #[tokio::test]
    async fn test_rejected_select_broadcasts_error() {
        let (mut core, _rx, mut b) = new_core();
        core.handle_event(DaemonEvent::ClientCommand(Command::Select { index: 9 }))
            .await;
        assert!(matches!(b.try_recv(), Ok(BroadcastMessage::Error(_))));
        assert_eq!(core.state_manager().get_state().await.rev, 1);
    }

    #[tokio::test]
    async fn test_failed_acquisition_lands_offline() {
        let (mut core, mut rx, _b) = new_core();
        core.handle_event(DaemonEvent::ClientCommand(Command::ChangePlaylist {
            playlist_id: "42".to_string(),
        }))
        .await;
        assert!(core.state_manager().get_state().await.loading);

        let (ticket, acquired) = finished(&mut rx).await;
        core.handle_event(DaemonEvent::AcquisitionFinished { ticket, acquired })
            .await;

        let state = core.state_manager().get_state().await;
        assert!(!state.loading);
        assert_eq!(state.playlist_id, "42");
        assert_eq!(state.source, SourceStatus::Offline);
        assert_eq!(
            state.load_error.as_deref(),
            Some("Load failed, switched to offline mode")
        );
    }

    #[tokio::test]
    async fn test_superseded_acquisition_is_discarded() {
        let (mut core, mut rx, _b) = new_core();
        core.handle_event(DaemonEvent::ClientCommand(Command::ChangePlaylist {
            playlist_id: "old".to_string(),
        }))
        .await;
        let (old_ticket, _) = finished(&mut rx).await;
        core.handle_event(DaemonEvent::ClientCommand(Command::ChangePlaylist {
            playlist_id: "new".to_string(),
        }))
        .await;

        core.handle_event(DaemonEvent::AcquisitionFinished {
            ticket: old_ticket,
            acquired: acquired("old", 7),
        })
        .await;
        let state = core.state_manager().get_state().await;
        assert!(state.loading);
        assert_eq!(state.tracks.len(), 2);

        core.handle_event(DaemonEvent::AcquisitionProgress {
            ticket: old_ticket,
            status: "Fetching playlist info...".to_string(),
        })
        .await;
        assert_eq!(core.state_manager().get_state().await.acquisition_status, "");
    }

    #[tokio::test]
    async fn test_only_the_current_acquisition_is_cached() {
        let (mut core, mut rx, _b) = new_core();
        core.handle_event(DaemonEvent::ClientCommand(Command::ChangePlaylist {
            playlist_id: "old".to_string(),
        }))
        .await;
        let (old_ticket, _) = finished(&mut rx).await;
        core.handle_event(DaemonEvent::ClientCommand(Command::ChangePlaylist {
            playlist_id: "new".to_string(),
        }))
        .await;
        let (new_ticket, _) = finished(&mut rx).await;

        core.handle_event(DaemonEvent::AcquisitionFinished {
            ticket: new_ticket,
            acquired: acquired("new", 5),
        })
        .await;
        core.handle_event(DaemonEvent::AcquisitionFinished {
            ticket: old_ticket,
            acquired: acquired("old", 7),
        })
        .await;

        let cache = core.pipeline.cache();
        assert!(cache.any_age("old").is_none());
        assert_eq!(cache.any_age("new").map(|p| p.len()), Some(5));
        assert_eq!(core.state_manager().get_state().await.tracks.len(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        let (mut core, _rx, _b) = new_core();
        assert!(!core.handle_event(DaemonEvent::Shutdown).await);
    }
}
