//! Live state channel transport behaviour against real sockets.
//!
//! The HTTP side is a minimal axum app serving canned snapshots; the push
//! side is a raw TCP listener speaking the framed protocol.  Everything binds
//! port 0 so tests never collide.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::Json, routing::get, Router};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use airtime_client::channel::{ChannelConfig, ChannelEvent, LiveChannel};
use airtime_proto::model::{ConnectionStatus, RadioState, Song};
use airtime_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};

fn live_state(rev: u64) -> RadioState {
    RadioState {
        rev,
        is_live: true,
        current_song: Some(Song {
            token_id: "5".into(),
            name: "on air".into(),
            artist: "artist".into(),
            audio_url: "https://cdn.example/5.mp3".into(),
            image_url: String::new(),
            queued_by: String::new(),
            queued_by_fid: None,
            started_at_ms: 0,
            duration_secs: 180.0,
        }),
        current_voice_note: None,
        listener_count: 1,
        last_updated_ms: 0,
    }
}

/// Serve the polling endpoints the channel hits, on an ephemeral port.
async fn spawn_api(state: RadioState) -> String {
    let shared = Arc::new(state);

    async fn get_state(State(s): State<Arc<RadioState>>) -> Json<RadioState> {
        Json((*s).clone())
    }
    async fn empty_list() -> Json<Vec<serde_json::Value>> {
        Json(Vec::new())
    }

    let app = Router::new()
        .route("/api/state", get(get_state))
        .route("/api/queue", get(empty_list))
        .route("/api/pending-notes", get(empty_list))
        .route("/api/leaderboard", get(empty_list))
        .route("/api/history", get(empty_list))
        .with_state(shared);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// An address where nothing is listening (bound, observed, dropped).
async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

fn config(push_addr: String, http_base: String) -> ChannelConfig {
    ChannelConfig {
        push_addr,
        http_base,
        poll_interval: Duration::from_millis(200),
        aggregate_interval: Duration::from_secs(60),
        listener: None,
    }
}

/// Receive events until `pred` matches, within `secs` seconds.
async fn wait_for<F>(rx: &mut mpsc::Receiver<ChannelEvent>, secs: u64, pred: F) -> ChannelEvent
where
    F: Fn(&ChannelEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(secs), async {
        loop {
            let evt = rx.recv().await.expect("channel task ended");
            if pred(&evt) {
                return evt;
            }
        }
    })
    .await
    .expect("timed out waiting for channel event")
}

#[tokio::test]
async fn falls_back_to_polling_when_push_unavailable() {
    let http_base = spawn_api(live_state(7)).await;
    let push_addr = dead_addr().await;

    let (tx, mut rx) = mpsc::channel(64);
    LiveChannel::new(config(push_addr, http_base)).spawn(tx);

    // Degraded mode is reported within one polling interval...
    let status = wait_for(&mut rx, 5, |e| matches!(e, ChannelEvent::Status(_))).await;
    match status {
        ChannelEvent::Status(s) => assert_eq!(s, ConnectionStatus::Fallback),
        _ => unreachable!(),
    }

    // ...and snapshots keep arriving, just over the slower road.
    let state = wait_for(&mut rx, 5, |e| matches!(e, ChannelEvent::State(_))).await;
    match state {
        ChannelEvent::State(s) => {
            assert_eq!(s.rev, 7);
            assert_eq!(s.current_song.unwrap().token_id, "5");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn push_stream_delivers_hello_snapshot() {
    let http_base = spawn_api(live_state(1)).await;

    let push_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let push_addr = push_listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut stream, _) = push_listener.accept().await.unwrap();
        let state = live_state(42);
        let hello = Message::broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: state.rev,
            state,
            queue: Vec::new(),
            pending_notes: Vec::new(),
        })
        .encode()
        .unwrap();
        stream.write_all(&hello).await.unwrap();
        // Hold the stream open so the channel stays in push mode.
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let (tx, mut rx) = mpsc::channel(64);
    LiveChannel::new(config(push_addr, http_base)).spawn(tx);

    let status = wait_for(&mut rx, 5, |e| matches!(e, ChannelEvent::Status(_))).await;
    match status {
        ChannelEvent::Status(s) => assert_eq!(s, ConnectionStatus::Connected),
        _ => unreachable!(),
    }

    let state = wait_for(&mut rx, 5, |e| matches!(e, ChannelEvent::State(_))).await;
    match state {
        ChannelEvent::State(s) => assert_eq!(s.rev, 42),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn dropped_push_stream_degrades_to_fallback() {
    let http_base = spawn_api(live_state(9)).await;

    let push_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let push_addr = push_listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        // Accept exactly one connection, greet it, then hang up for good.
        let (mut stream, _) = push_listener.accept().await.unwrap();
        let state = live_state(2);
        let hello = Message::broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: state.rev,
            state,
            queue: Vec::new(),
            pending_notes: Vec::new(),
        })
        .encode()
        .unwrap();
        stream.write_all(&hello).await.unwrap();
        drop(stream);
        drop(push_listener);
    });

    let (tx, mut rx) = mpsc::channel(64);
    LiveChannel::new(config(push_addr, http_base)).spawn(tx);

    let first = wait_for(&mut rx, 5, |e| matches!(e, ChannelEvent::Status(_))).await;
    match first {
        ChannelEvent::Status(s) => assert_eq!(s, ConnectionStatus::Connected),
        _ => unreachable!(),
    }

    // After the stream dies the channel degrades and snapshots continue via
    // polling — the reduced update rate is the only difference.
    let status = wait_for(
        &mut rx,
        5,
        |e| matches!(e, ChannelEvent::Status(ConnectionStatus::Fallback)),
    )
    .await;
    assert!(matches!(
        status,
        ChannelEvent::Status(ConnectionStatus::Fallback)
    ));
    let state = wait_for(&mut rx, 5, |e| {
        matches!(e, ChannelEvent::State(s) if s.rev == 9)
    })
    .await;
    match state {
        ChannelEvent::State(s) => assert!(s.is_live),
        _ => unreachable!(),
    }
}
