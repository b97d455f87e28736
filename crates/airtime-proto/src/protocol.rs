//! Wire protocol between the timeline server and its clients.
//!
//! Snapshots, not deltas: every broadcast carries the full value it names,
//! so redelivery and reordering cannot corrupt a client — applying an older
//! snapshot after a newer one is the only possible anomaly, and the `rev`
//! counter lets clients drop those on arrival.

use serde::{Deserialize, Serialize};

use crate::model::{PendingVoiceNote, QueuedSong, RadioState};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible server.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the server over the push socket.
///
/// Mutating operations (queue, voice note, heartbeat, claim) are NOT part of
/// this channel — they are discrete HTTP request/response calls, so they work
/// identically in push and fallback modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Register interest; the server replies with `Hello` and starts pushing.
    Subscribe {
        #[serde(default)]
        listener: Option<String>,
    },
    /// Client-observed end of the current song.  Advisory — the server
    /// advances only when its own clock agrees.
    SongEnded { token_id: String, started_at_ms: i64 },
    /// Request an immediate full snapshot.
    GetState,
}

/// Messages pushed from the server to subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full snapshot of
    /// everything a client needs to start rendering and playing.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: RadioState,
        queue: Vec<QueuedSong>,
        pending_notes: Vec<PendingVoiceNote>,
    },
    State {
        data: RadioState,
    },
    Queue {
        data: Vec<QueuedSong>,
    },
    PendingNotes {
        data: Vec<PendingVoiceNote>,
    },
    Log {
        message: String,
    },
}

/// Wrapper for socket communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Box<Broadcast>),
}

impl Message {
    pub fn broadcast(b: Broadcast) -> Self {
        Message::Broadcast(Box::new(b))
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode_decode() {
        let msg = Message::Command(Command::SongEnded {
            token_id: "9".into(),
            started_at_ms: 123_456,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::SongEnded {
                token_id,
                started_at_ms,
            }) => {
                assert_eq!(token_id, "9");
                assert_eq!(started_at_ms, 123_456);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_hello_encode_decode() {
        let state = RadioState {
            rev: 42,
            is_live: true,
            ..Default::default()
        };
        let msg = Message::broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 42,
            state,
            queue: Vec::new(),
            pending_notes: Vec::new(),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(b) => match *b {
                Broadcast::Hello {
                    protocol_version,
                    rev,
                    state,
                    ..
                } => {
                    assert_eq!(protocol_version, PROTOCOL_VERSION);
                    assert_eq!(rev, 42);
                    assert!(state.is_live);
                }
                _ => panic!("Wrong broadcast type"),
            },
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_partial_frame() {
        let msg = Message::Command(Command::GetState);
        let encoded = msg.encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }
}
