//! Seams between the playback controller and the outside world: the audio
//! output device it drives and the timer facility it uses for delayed
//! transitions.

use std::time::Duration;

/// Error code an output device reports when a load was aborted by a newer
/// one.  Counted like any other failure but not worth a warning.
pub const ABORTED_ERROR_CODE: i32 = 20;

/// Single playback primitive owned by the controller.  Commands are fire and
/// forget; their outcome comes back as [`OutputEvent`]s.
pub trait AudioOutput {
    /// Replace the current source.  Loading alone does not start playback.
    fn load(&mut self, url: &str);
    fn play(&mut self);
    fn pause(&mut self);
    /// `volume` is in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);
}

/// Notifications from the output device, delivered in order.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// The current track played to its end.
    Ended,
    /// The current source failed.  `code` is device-defined.
    Error { code: i32, message: Option<String> },
    /// The current source is ready to play.
    Ready,
    /// The device refused a play command.
    PlayRejected { reason: String },
}

/// Delayed controller transitions.  `epoch` identifies the controller state
/// the timer was armed in; the controller ignores timers from an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerTimer {
    /// Resume playback once a freshly attached playlist has had time to load.
    Resume { epoch: u64 },
    /// Skip past a track the output device failed on.
    SkipAfterError { epoch: u64 },
}

/// Arms timers on behalf of the controller.  When `delay` has elapsed the
/// owner of the controller must hand `timer` back via
/// `PlaybackController::handle_timer`.
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration, timer: ControllerTimer);
}
