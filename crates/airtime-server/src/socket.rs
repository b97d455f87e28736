//! TCP push socket — the primary live state channel.
//!
//! Each subscriber gets a `Hello` with the full snapshot on connect, then a
//! framed broadcast for every change.  Delivery is at-least-once with
//! most-recent-wins semantics: a lagged receiver is healed by resending the
//! current snapshot, never by replaying history.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{error, info, warn};

use airtime_proto::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};

use crate::core::StationEvent;
use crate::state::StateManager;
use crate::BroadcastMessage;

pub struct ClientHandle {
    pub id: usize,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: StateManager,
    clients: Arc<RwLock<Vec<ClientHandle>>>,
    event_tx: mpsc::Sender<StationEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("Push socket listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;

                    let client_count = {
                        let mut guard = clients.write().await;
                        guard.push(ClientHandle { id });
                        guard.len()
                    };

                    info!("Listener {} connected from {}", id, peer);
                    let _ = event_tx
                        .send(StationEvent::ClientCountChanged(client_count))
                        .await;

                    let sm = state.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    let clients_ref = clients.clone();
                    let evt_tx2 = event_tx.clone();

                    tokio::spawn(async move {
                        handle_client(stream, sm, id, evt_tx, bcast_rx).await;

                        let client_count = {
                            let mut guard = clients_ref.write().await;
                            guard.retain(|c| c.id != id);
                            guard.len()
                        };
                        info!("Listener {} disconnected", id);
                        let _ = evt_tx2
                            .send(StationEvent::ClientCountChanged(client_count))
                            .await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    state: StateManager,
    client_id: usize,
    event_tx: mpsc::Sender<StationEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Full snapshot on connect — a reconnecting client needs nothing else.
    if let Ok(encoded) = encode_hello(&state).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Listener {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    if !handle_command(cmd, client_id, &state, &event_tx, &mut write_half).await {
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from listener {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(BroadcastMessage::StateUpdated) => {
                        if let Ok(encoded) = encode_state(&state).await {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(BroadcastMessage::QueueUpdated) => {
                        let data = state.queue().await;
                        if let Ok(encoded) = Message::broadcast(Broadcast::Queue { data }).encode() {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(BroadcastMessage::PendingNotesUpdated) => {
                        let data = state.pending_notes().await;
                        if let Ok(encoded) = Message::broadcast(Broadcast::PendingNotes { data }).encode() {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        if let Ok(encoded) = Message::broadcast(Broadcast::Log { message }).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Listener {} missed {} broadcast messages", client_id, n);
                        if let Ok(encoded) = encode_hello(&state).await {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

/// Returns false when the connection should be dropped.
async fn handle_command(
    cmd: Command,
    client_id: usize,
    state: &StateManager,
    event_tx: &mpsc::Sender<StationEvent>,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
) -> bool {
    match cmd {
        Command::Subscribe { listener } => {
            info!(
                "Listener {} subscribed{}",
                client_id,
                listener.map(|l| format!(" as {}", l)).unwrap_or_default()
            );
            true
        }
        Command::GetState => match encode_state(state).await {
            Ok(encoded) => write_half.write_all(&encoded).await.is_ok(),
            Err(_) => true,
        },
        Command::SongEnded {
            token_id,
            started_at_ms,
        } => {
            if event_tx
                .send(StationEvent::SongEndedReport {
                    token_id,
                    started_at_ms,
                })
                .await
                .is_err()
            {
                warn!("StationEvent channel closed");
                return false;
            }
            true
        }
    }
}

async fn encode_hello(state: &StateManager) -> anyhow::Result<Vec<u8>> {
    let radio = state.radio_state().await;
    let rev = radio.rev;
    Message::broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        rev,
        state: radio,
        queue: state.queue().await,
        pending_notes: state.pending_notes().await,
    })
    .encode()
}

async fn encode_state(state: &StateManager) -> anyhow::Result<Vec<u8>> {
    let data = state.radio_state().await;
    Message::broadcast(Broadcast::State { data }).encode()
}
