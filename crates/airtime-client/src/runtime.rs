//! ClientRuntime — the client's single cooperative event loop.
//!
//! Everything that can touch the audio session funnels through here as a
//! `RuntimeEvent` and is processed to completion in arrival order, so no two
//! state updates are ever in flight against the one audio resource.
//! Heartbeats and end-reports go out as fire-and-forget tasks — they are
//! independent request/response calls with no ordering guarantee relative to
//! snapshots, and their failures never interrupt playback.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use airtime_proto::api::{HeartbeatReport, SongEndedReport};
use airtime_proto::timeline::now_ms;

use crate::channel::ChannelEvent;
use crate::ops::OpsClient;
use crate::session::{AudioSession, SessionEvent};
use crate::sink::AudioSink;
use crate::state::ClientSession;

/// All inputs into the client loop.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A delivery from the live state channel.
    Channel(ChannelEvent),
    /// The sink finished its current source (host-observed "ended").
    AudioEnded,
    /// Heartbeat cadence tick.
    HeartbeatTick,
    /// User toggled play/pause.
    SetPlaybackEnabled(bool),
    /// User toggled mute.
    SetMuted(bool),
    /// Session teardown.
    Shutdown,
}

pub struct ClientRuntime<S: AudioSink> {
    session: AudioSession<S>,
    state: ClientSession,
    ops: OpsClient,
    event_tx: mpsc::Sender<RuntimeEvent>,
    heartbeat_interval: Duration,
}

impl<S: AudioSink> ClientRuntime<S> {
    pub fn new(
        session: AudioSession<S>,
        state: ClientSession,
        ops: OpsClient,
        event_tx: mpsc::Sender<RuntimeEvent>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            session,
            state,
            ops,
            event_tx,
            heartbeat_interval,
        }
    }

    pub fn state(&self) -> &ClientSession {
        &self.state
    }

    pub fn session(&self) -> &AudioSession<S> {
        &self.session
    }

    /// Run until shutdown.  The caller feeds `RuntimeEvent`s through the
    /// sender handed to `new` (channel deliveries, sink-ended notifications,
    /// user toggles).
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<RuntimeEvent>) -> anyhow::Result<()> {
        info!("client runtime: starting event loop");

        let beat_tx = self.event_tx.clone();
        let beat_interval = self.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(beat_interval).await;
                if beat_tx.send(RuntimeEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        while let Some(evt) = event_rx.recv().await {
            if matches!(evt, RuntimeEvent::Shutdown) {
                info!("client runtime: shutting down");
                break;
            }
            self.handle_event(evt);
        }
        Ok(())
    }

    fn handle_event(&mut self, evt: RuntimeEvent) {
        match evt {
            RuntimeEvent::Channel(delivery) => self.handle_channel(delivery),

            RuntimeEvent::AudioEnded => {
                if let Some(SessionEvent::ReportSongEnded {
                    token_id,
                    started_at_ms,
                }) = self.session.on_audio_ended(now_ms())
                {
                    let ops = self.ops.clone();
                    tokio::spawn(async move {
                        let report = SongEndedReport {
                            token_id,
                            started_at_ms,
                        };
                        if let Err(e) = ops.song_ended(&report).await {
                            debug!("song-ended report failed: {}", e);
                        }
                    });
                }
            }

            RuntimeEvent::HeartbeatTick => self.emit_heartbeat(),

            RuntimeEvent::SetPlaybackEnabled(enabled) => {
                self.session.set_playback_enabled(enabled, now_ms());
            }

            RuntimeEvent::SetMuted(muted) => self.session.set_muted(muted),

            RuntimeEvent::Shutdown => {}
        }
    }

    /// Apply one channel delivery.  Snapshots overwrite wholesale; the
    /// session sees radio-state snapshots synchronously, in arrival order.
    fn handle_channel(&mut self, delivery: ChannelEvent) {
        match delivery {
            ChannelEvent::State(radio) => {
                self.session.apply_snapshot(&radio, now_ms());
                self.state.radio = radio;
            }
            ChannelEvent::Queue(queue) => self.state.queue = queue,
            ChannelEvent::PendingNotes(notes) => self.state.pending_notes = notes,
            ChannelEvent::Status(status) => {
                // Observational only — playback is untouched.
                self.state.connection_status = status;
            }
            ChannelEvent::Leaderboard(board) => self.state.leaderboard = board,
            ChannelEvent::History(history) => self.state.history = history,
            ChannelEvent::Stats(stats) => self.state.stats = stats,
            ChannelEvent::ServerLog(line) => self.state.push_server_log(line),
        }
    }

    /// Fire one heartbeat when a song is audibly playing here.  Best-effort:
    /// a failure is logged and that interval's credit is forfeited.
    fn emit_heartbeat(&mut self) {
        if !self.session.is_actively_listening() {
            return;
        }
        let Some(instance) = self.session.current_play_instance().cloned() else {
            return;
        };
        let report = HeartbeatReport {
            listener: self.state.listener_address.clone(),
            token_id: instance.token_id,
            started_at_ms: instance.started_at_ms,
        };
        let ops = self.ops.clone();
        tokio::spawn(async move {
            match ops.heartbeat(&report).await {
                Ok(ack) if ack.accrued => debug!("heartbeat credited {}", report_key(&report)),
                Ok(_) => {}
                Err(e) => warn!("heartbeat dropped ({}), forfeiting interval", e),
            }
        });
    }
}

fn report_key(report: &HeartbeatReport) -> String {
    format!("{}@{}", report.token_id, report.started_at_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airtime_proto::model::{ConnectionStatus, RadioState, Song};
    use crate::session::SessionPhase;
    use crate::sink::{AudioSink, PlaybackRefused};

    #[derive(Default)]
    struct NullSink {
        playing: bool,
    }

    impl AudioSink for NullSink {
        fn set_source(&mut self, _url: &str) {}
        fn seek(&mut self, _position_secs: f64) {}
        fn play(&mut self) -> Result<(), PlaybackRefused> {
            self.playing = true;
            Ok(())
        }
        fn pause(&mut self) {
            self.playing = false;
        }
        fn set_muted(&mut self, _muted: bool) {}
    }

    fn runtime() -> ClientRuntime<NullSink> {
        let (event_tx, _event_rx) = mpsc::channel(16);
        ClientRuntime::new(
            AudioSession::new(NullSink::default()),
            ClientSession::new("0xbeef".into(), None),
            OpsClient::new("http://127.0.0.1:0".into()),
            event_tx,
            Duration::from_secs(30),
        )
    }

    fn live_state(rev: u64, token_id: &str) -> RadioState {
        RadioState {
            rev,
            is_live: true,
            current_song: Some(Song {
                token_id: token_id.into(),
                name: "n".into(),
                artist: "a".into(),
                audio_url: format!("https://cdn.example/{}.mp3", token_id),
                image_url: String::new(),
                queued_by: String::new(),
                queued_by_fid: None,
                started_at_ms: now_ms() - 5_000,
                duration_secs: 180.0,
            }),
            current_voice_note: None,
            listener_count: 2,
            last_updated_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn snapshots_update_session_and_shared_state() {
        let mut rt = runtime();
        rt.handle_event(RuntimeEvent::SetPlaybackEnabled(true));
        rt.handle_event(RuntimeEvent::Channel(ChannelEvent::State(live_state(1, "5"))));

        assert_eq!(rt.state().radio.rev, 1);
        assert!(matches!(rt.session().phase(), SessionPhase::PlayingSong(_)));
        assert!(rt.session().is_actively_listening());
    }

    #[tokio::test]
    async fn status_changes_never_touch_playback() {
        let mut rt = runtime();
        rt.handle_event(RuntimeEvent::SetPlaybackEnabled(true));
        rt.handle_event(RuntimeEvent::Channel(ChannelEvent::State(live_state(1, "5"))));
        let phase_before = rt.session().phase().clone();

        rt.handle_event(RuntimeEvent::Channel(ChannelEvent::Status(
            ConnectionStatus::Fallback,
        )));
        assert_eq!(rt.state().connection_status, ConnectionStatus::Fallback);
        assert_eq!(*rt.session().phase(), phase_before);

        rt.handle_event(RuntimeEvent::Channel(ChannelEvent::Status(
            ConnectionStatus::Disconnected,
        )));
        assert_eq!(*rt.session().phase(), phase_before);
    }

    #[tokio::test]
    async fn server_logs_are_capped() {
        let mut rt = runtime();
        for i in 0..150 {
            rt.handle_event(RuntimeEvent::Channel(ChannelEvent::ServerLog(format!(
                "line {}",
                i
            ))));
        }
        assert_eq!(rt.state().server_logs.len(), 100);
        assert_eq!(rt.state().server_logs.last().unwrap(), "line 149");
    }
}
