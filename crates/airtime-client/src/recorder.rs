//! Recording capture pipeline.
//!
//! ```text
//!   Idle ──start──▶ Recording ──stop / cap hit──▶ Recorded ──take──▶ Uploading
//!                      │ permission / device error          ▲              │
//!                      ▼                                    │ failed       │ succeeded
//!                    Idle (error surfaced)                  └──────────────┴──▶ Idle
//! ```
//!
//! A failed upload returns to `Recorded` with the clip intact — losing a
//! captured clip is a data-loss bug, not an error path.  Capture capability
//! (preferred codec, fallback codec, or nothing) is decided once at
//! recording start, not probed mid-flight.

use tracing::{info, warn};

use airtime_proto::config::RecordingConfig;
use airtime_proto::error::RequestError;
use airtime_proto::model::VoiceNoteKind;

/// What the host's capture stack can do, decided once per recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSupport {
    /// The preferred codec is available (mime type).
    Preferred(String),
    /// Only a fallback codec is available (mime type).
    Fallback(String),
    /// No usable capture path.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The user or host denied microphone access.
    #[error("microphone permission denied")]
    PermissionDenied,
    /// No capture device present.
    #[error("no capture device available")]
    DeviceUnavailable,
}

/// Host capture stack.  Implementations wrap the platform microphone API.
pub trait CaptureDevice {
    /// Capability check — consulted once when a recording starts.
    fn support(&self) -> CaptureSupport;

    /// Open the device and start capturing.
    fn begin(&mut self) -> Result<(), CaptureError>;

    /// Stop capturing and return the encoded clip bytes.
    fn finish(&mut self) -> Vec<u8>;
}

/// A finished recording, previewable before submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedClip {
    pub bytes: Vec<u8>,
    pub duration_secs: f64,
    pub content_type: String,
    pub kind: VoiceNoteKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderState {
    Idle,
    Recording {
        kind: VoiceNoteKind,
        started_at_ms: i64,
        content_type: String,
    },
    Recorded(RecordedClip),
    Uploading(RecordedClip),
}

pub struct Recorder<D: CaptureDevice> {
    device: D,
    config: RecordingConfig,
    state: RecorderState,
}

impl<D: CaptureDevice> Recorder<D> {
    pub fn new(device: D, config: RecordingConfig) -> Self {
        Self {
            device,
            config,
            state: RecorderState::Idle,
        }
    }

    pub fn state(&self) -> &RecorderState {
        &self.state
    }

    /// Begin capturing a clip of the given kind.  Permission and
    /// device-missing failures are distinct and not retried automatically.
    pub fn start(&mut self, kind: VoiceNoteKind, now_ms: i64) -> Result<(), RequestError> {
        if !matches!(self.state, RecorderState::Idle | RecorderState::Recorded(_)) {
            return Err(RequestError::Invalid("recording already in progress".into()));
        }

        let content_type = match self.device.support() {
            CaptureSupport::Preferred(mime) => mime,
            CaptureSupport::Fallback(mime) => {
                info!("preferred capture codec unavailable, using {}", mime);
                mime
            }
            CaptureSupport::Unavailable => return Err(RequestError::DeviceUnavailable),
        };

        self.device.begin().map_err(|e| match e {
            CaptureError::PermissionDenied => RequestError::PermissionDenied,
            CaptureError::DeviceUnavailable => RequestError::DeviceUnavailable,
        })?;

        info!("recording {} started", kind.label());
        self.state = RecorderState::Recording {
            kind,
            started_at_ms: now_ms,
            content_type,
        };
        Ok(())
    }

    /// Timer hook: force-stops capture once the per-kind cap is reached.
    /// Returns true when the cap fired.
    pub fn tick(&mut self, now_ms: i64) -> bool {
        let RecorderState::Recording {
            kind, started_at_ms, ..
        } = &self.state
        else {
            return false;
        };
        let cap_secs = self.config.max_secs(*kind) as f64;
        let elapsed = (now_ms - started_at_ms) as f64 / 1000.0;
        if elapsed < cap_secs {
            return false;
        }
        warn!("recording hit the {}s cap, force-stopping", cap_secs);
        self.stop(now_ms);
        true
    }

    /// Stop capturing.  The clip stays local for preview / re-record until
    /// submitted.
    pub fn stop(&mut self, now_ms: i64) {
        let RecorderState::Recording {
            kind,
            started_at_ms,
            content_type,
        } = self.state.clone()
        else {
            return;
        };
        let cap_secs = self.config.max_secs(kind) as f64;
        let duration_secs = ((now_ms - started_at_ms) as f64 / 1000.0).min(cap_secs);
        let bytes = self.device.finish();
        info!("recording stopped after {:.1}s ({} bytes)", duration_secs, bytes.len());
        self.state = RecorderState::Recorded(RecordedClip {
            bytes,
            duration_secs,
            content_type,
            kind,
        });
    }

    /// The captured clip, when one is ready for preview.
    pub fn preview(&self) -> Option<&RecordedClip> {
        match &self.state {
            RecorderState::Recorded(clip) => Some(clip),
            _ => None,
        }
    }

    /// Throw the current clip away and return to idle.
    pub fn discard(&mut self) {
        if matches!(self.state, RecorderState::Recorded(_)) {
            self.state = RecorderState::Idle;
        }
    }

    /// Move `Recorded → Uploading`, handing out the clip for the admission
    /// call.  The clip is retained so a failed upload can restore it.
    pub fn take_for_upload(&mut self) -> Result<RecordedClip, RequestError> {
        match self.state.clone() {
            RecorderState::Recorded(clip) => {
                self.state = RecorderState::Uploading(clip.clone());
                Ok(clip)
            }
            _ => Err(RequestError::Invalid("no recorded clip to submit".into())),
        }
    }

    /// Terminal success: the note is in the admission queue; drop the local
    /// copy.
    pub fn submission_succeeded(&mut self) {
        if matches!(self.state, RecorderState::Uploading(_)) {
            self.state = RecorderState::Idle;
        }
    }

    /// Terminal failure: back to `Recorded` — the clip is not lost and the
    /// caller may retry without re-recording.
    pub fn submission_failed(&mut self) {
        if let RecorderState::Uploading(clip) = self.state.clone() {
            self.state = RecorderState::Recorded(clip);
        }
    }
}
