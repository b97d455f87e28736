//! Live state channel — push stream with transparent polling fallback.
//!
//! The TCP push socket is the primary transport.  When it cannot be
//! established or drops, the channel polls the HTTP API at the configured
//! (materially slower) interval and keeps retrying the socket.  Consumers
//! see the tri-state [`ConnectionStatus`] but must never change playback
//! behaviour because of it — snapshots are snapshots, whatever road they
//! took.
//!
//! Low-priority aggregates (leaderboard, play history) refresh on their own
//! slow interval, independent of the live channel.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use airtime_proto::model::{
    ConnectionStatus, HistoryEntry, LeaderboardEntry, ListenerStats, PendingVoiceNote, QueuedSong,
    RadioState,
};
use airtime_proto::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};

/// Everything the channel delivers to the runtime.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    State(RadioState),
    Queue(Vec<QueuedSong>),
    PendingNotes(Vec<PendingVoiceNote>),
    Status(ConnectionStatus),
    Leaderboard(Vec<LeaderboardEntry>),
    History(Vec<HistoryEntry>),
    Stats(ListenerStats),
    ServerLog(String),
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Push socket address, e.g. `127.0.0.1:9797`.
    pub push_addr: String,
    /// HTTP API base, e.g. `http://127.0.0.1:8787`.
    pub http_base: String,
    /// Fallback polling interval.
    pub poll_interval: Duration,
    /// Leaderboard / history refresh interval.
    pub aggregate_interval: Duration,
    /// Listener address announced on subscribe.
    pub listener: Option<String>,
}

pub struct LiveChannel {
    config: ChannelConfig,
    http: reqwest::Client,
}

impl LiveChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Spawn the channel tasks.  Snapshots and status changes flow out on
    /// `events`; the tasks end when the receiver is dropped.
    pub fn spawn(self, events: mpsc::Sender<ChannelEvent>) -> tokio::task::JoinHandle<()> {
        let aggregates = AggregateFetcher {
            http: self.http.clone(),
            http_base: self.config.http_base.clone(),
            interval: self.config.aggregate_interval,
            listener: self.config.listener.clone(),
        };
        aggregates.spawn(events.clone());

        tokio::spawn(async move {
            self.run(events).await;
        })
    }

    async fn run(self, events: mpsc::Sender<ChannelEvent>) {
        let mut last_status: Option<ConnectionStatus> = None;
        loop {
            // Push first — it is authoritative for time-sensitive sync.
            match TcpStream::connect(&self.config.push_addr).await {
                Ok(stream) => {
                    set_status(&events, &mut last_status, ConnectionStatus::Connected).await;
                    if let Err(e) = self.push_session(stream, &events).await {
                        debug!("push stream ended: {}", e);
                    }
                }
                Err(e) => {
                    debug!("push connect failed: {}", e);
                }
            }
            if events.is_closed() {
                return;
            }

            // Degraded mode: one poll per interval, retrying the socket each
            // time around.
            match self.poll_once(&events).await {
                Ok(()) => {
                    set_status(&events, &mut last_status, ConnectionStatus::Fallback).await
                }
                Err(e) => {
                    warn!("fallback poll failed: {}", e);
                    set_status(&events, &mut last_status, ConnectionStatus::Disconnected).await;
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One full push-stream session: subscribe, then relay frames until the
    /// stream breaks.
    async fn push_session(
        &self,
        mut stream: TcpStream,
        events: &mpsc::Sender<ChannelEvent>,
    ) -> anyhow::Result<()> {
        let subscribe = Message::Command(Command::Subscribe {
            listener: self.config.listener.clone(),
        })
        .encode()?;
        stream.write_all(&subscribe).await?;

        let mut tmp = [0u8; 4096];
        let mut read_buf: Vec<u8> = Vec::new();

        loop {
            let n = stream.read(&mut tmp).await?;
            if n == 0 {
                anyhow::bail!("server closed the stream");
            }
            read_buf.extend_from_slice(&tmp[..n]);

            loop {
                if read_buf.len() < 4 {
                    break;
                }
                match Message::decode(&read_buf) {
                    Ok((Message::Broadcast(broadcast), consumed)) => {
                        read_buf.drain(..consumed);
                        if !dispatch_broadcast(*broadcast, events).await {
                            anyhow::bail!("event receiver dropped");
                        }
                    }
                    Ok((_, consumed)) => {
                        read_buf.drain(..consumed);
                    }
                    Err(_) => break, // partial frame
                }
            }
        }
    }

    /// Fetch one round of snapshots over HTTP.  At-least-once, most-recent
    /// -wins: these are the same wholesale snapshots the socket pushes, just
    /// slower.
    async fn poll_once(&self, events: &mpsc::Sender<ChannelEvent>) -> anyhow::Result<()> {
        let base = &self.config.http_base;
        let state: RadioState = self
            .http
            .get(format!("{}/api/state", base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let queue: Vec<QueuedSong> = self
            .http
            .get(format!("{}/api/queue", base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let pending: Vec<PendingVoiceNote> = self
            .http
            .get(format!("{}/api/pending-notes", base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let _ = events.send(ChannelEvent::State(state)).await;
        let _ = events.send(ChannelEvent::Queue(queue)).await;
        let _ = events.send(ChannelEvent::PendingNotes(pending)).await;
        Ok(())
    }
}

async fn dispatch_broadcast(broadcast: Broadcast, events: &mpsc::Sender<ChannelEvent>) -> bool {
    let event = match broadcast {
        Broadcast::Hello {
            protocol_version,
            state,
            queue,
            pending_notes,
            ..
        } => {
            if protocol_version != PROTOCOL_VERSION {
                warn!(
                    "server speaks protocol {} but we expect {}",
                    protocol_version, PROTOCOL_VERSION
                );
                return false;
            }
            info!("push stream established (rev {})", state.rev);
            let ok = events.send(ChannelEvent::State(state)).await.is_ok()
                && events.send(ChannelEvent::Queue(queue)).await.is_ok()
                && events
                    .send(ChannelEvent::PendingNotes(pending_notes))
                    .await
                    .is_ok();
            return ok;
        }
        Broadcast::State { data } => ChannelEvent::State(data),
        Broadcast::Queue { data } => ChannelEvent::Queue(data),
        Broadcast::PendingNotes { data } => ChannelEvent::PendingNotes(data),
        Broadcast::Log { message } => ChannelEvent::ServerLog(message),
    };
    events.send(event).await.is_ok()
}

async fn set_status(
    events: &mpsc::Sender<ChannelEvent>,
    last: &mut Option<ConnectionStatus>,
    status: ConnectionStatus,
) {
    if *last != Some(status) {
        *last = Some(status);
        info!("connection status: {:?}", status);
        let _ = events.send(ChannelEvent::Status(status)).await;
    }
}

// ── Aggregates ────────────────────────────────────────────────────────────────

/// Slow-interval fetcher for data that tolerates staleness.
struct AggregateFetcher {
    http: reqwest::Client,
    http_base: String,
    interval: Duration,
    listener: Option<String>,
}

impl AggregateFetcher {
    fn spawn(self, events: mpsc::Sender<ChannelEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.fetch().await {
                    Ok((leaderboard, history)) => {
                        if events
                            .send(ChannelEvent::Leaderboard(leaderboard))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        let _ = events.send(ChannelEvent::History(history)).await;
                    }
                    Err(e) => debug!("aggregate refresh failed: {}", e),
                }
                if let Some(listener) = &self.listener {
                    match self.fetch_stats(listener).await {
                        Ok(stats) => {
                            let _ = events.send(ChannelEvent::Stats(stats)).await;
                        }
                        Err(e) => debug!("stats refresh failed: {}", e),
                    }
                }
                tokio::time::sleep(self.interval).await;
                if events.is_closed() {
                    return;
                }
            }
        })
    }

    async fn fetch(&self) -> anyhow::Result<(Vec<LeaderboardEntry>, Vec<HistoryEntry>)> {
        let leaderboard = self
            .http
            .get(format!("{}/api/leaderboard", self.http_base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let history = self
            .http
            .get(format!("{}/api/history", self.http_base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok((leaderboard, history))
    }

    async fn fetch_stats(&self, listener: &str) -> anyhow::Result<ListenerStats> {
        Ok(self
            .http
            .get(format!("{}/api/stats/{}", self.http_base, listener))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
