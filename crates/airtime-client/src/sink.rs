//! The single playable audio resource.
//!
//! Exactly one sink exists per client, and the audio session state machine
//! is the only component permitted to set its source or seek it.  The
//! embedding application implements this for its host audio stack.

use thiserror::Error;

/// The host refused to start playback programmatically (autoplay policy).
/// Non-fatal: the session stays in a paused view and the user-initiated play
/// control is the recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("playback refused by host")]
pub struct PlaybackRefused;

pub trait AudioSink {
    /// Load a new source.  Implicitly resets the position to 0.
    fn set_source(&mut self, url: &str);

    /// Seek within the current source.
    fn seek(&mut self, position_secs: f64);

    /// Start producing sound.  May be refused by the host.
    fn play(&mut self) -> Result<(), PlaybackRefused>;

    /// Stop producing sound without unloading the source.
    fn pause(&mut self);

    /// Mute/unmute.  Orthogonal to source selection and play/pause.
    fn set_muted(&mut self, muted: bool);
}
