//! Playback controller and playlist acquisition for the jukebox daemon.

pub mod cache;
pub mod catalog;
pub mod controller;
pub mod defaults;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod playlist;
pub mod store;

pub use cache::{CacheKeyStrategy, PlaylistCache};
pub use catalog::{Catalog, CatalogClient};
pub use controller::{ControllerSettings, PlaybackController};
pub use output::{AudioOutput, ControllerTimer, OutputEvent, Scheduler};
pub use pipeline::{Acquired, AcquisitionGeneration, Pipeline, PipelineSettings, Ticket};
pub use playlist::Playlist;
pub use store::{FileStore, KeyValueStore, MemoryStore};
