//! Clock-sync arithmetic for the shared timeline.
//!
//! Every client derives its playback position from the song's server-stamped
//! `started_at_ms` and nominal duration.  These functions are pure; the
//! caller re-evaluates them on a timer (at least once per second) while a
//! timeline is active.

use crate::model::RadioState;

/// Elapsed/remaining/progress triple for one instant of one track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPosition {
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
    /// Clamped to 0..=100.
    pub progress_pct: f64,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Compute the position of a track started at `started_at_ms` with nominal
/// `duration_secs`, as seen at `now_ms`.
///
/// `elapsed_secs` is reported raw (it can be negative under clock skew or
/// exceed the duration on stale state); `remaining_secs` and `progress_pct`
/// are clamped so consumers can render them directly.
pub fn track_position(started_at_ms: i64, duration_secs: f64, now_ms: i64) -> TrackPosition {
    let elapsed_secs = (now_ms - started_at_ms) as f64 / 1000.0;
    let progress_pct = if duration_secs > 0.0 {
        (elapsed_secs / duration_secs * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    TrackPosition {
        elapsed_secs,
        remaining_secs: (duration_secs - elapsed_secs).max(0.0),
        progress_pct,
    }
}

/// Where to seek when (re)loading this track, or `None` when the computed
/// position is at a boundary.
///
/// Negative elapsed (skew, just-started song) and elapsed at/past the
/// duration (stale state before the next update) both mean: do not seek —
/// start at 0 and expect the server to move on shortly.
pub fn seek_target(started_at_ms: i64, duration_secs: f64, now_ms: i64) -> Option<f64> {
    let elapsed = (now_ms - started_at_ms) as f64 / 1000.0;
    if elapsed < 0.0 || elapsed >= duration_secs {
        return None;
    }
    Some(elapsed)
}

/// True once the current song's play window has fully elapsed, with
/// `tolerance_secs` of slack for network and clock jitter.  Used by the
/// server to decide when a client's "song ended" report is credible.
pub fn song_window_elapsed(state: &RadioState, now_ms: i64, tolerance_secs: f64) -> bool {
    match &state.current_song {
        Some(song) => {
            let pos = track_position(song.started_at_ms, song.duration_secs, now_ms);
            pos.elapsed_secs >= song.duration_secs - tolerance_secs
        }
        None => true,
    }
}
