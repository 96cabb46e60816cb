use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    TogglePlay,
    Next,
    Prev,
    Select { index: usize },
    SetShuffle { enabled: bool },
    SetVolume { value: f32 },
    ChangePlaylist { playlist_id: String },
    /// Drop the cached snapshot of the current playlist and fetch a new window.
    Refresh,
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: JukeboxState,
    },
    State {
        data: JukeboxState,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Where the active playlist came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SourceStatus {
    /// Fresh from the catalog, or from a cache entry inside its freshness window.
    Online,
    /// The live fetch failed and a stale cache entry is playing.
    Degraded,
    /// Nothing usable came back; the built-in playlist is playing.
    #[default]
    Offline,
}

impl SourceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SourceStatus::Online => "Online",
            SourceStatus::Degraded => "Degraded",
            SourceStatus::Offline => "Offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Track {
    /// Catalog-assigned identifier.
    pub id: String,
    pub title: String,
    /// Contributing artists joined with " / ".
    pub artist: String,
    pub cover: String,
    pub url: String,
}

/// Full state exposed to presentation clients.  `rev` increases on every
/// change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JukeboxState {
    #[serde(default)]
    pub rev: u64,
    pub playlist_id: String,
    pub tracks: Vec<Track>,
    pub current_index: usize,
    pub current_track: Option<Track>,
    pub is_playing: bool,
    pub shuffle: bool,
    pub volume: f32,
    pub consecutive_errors: u32,
    /// True while an acquisition run is in flight.
    pub loading: bool,
    /// Human-readable progress of the running acquisition; empty when idle.
    #[serde(default)]
    pub acquisition_status: String,
    pub source: SourceStatus,
    #[serde(default)]
    pub load_error: Option<String>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    /// Length-prefixed (u32 big-endian) JSON frame.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Size of the first frame in `data`, header included, once all of it
    /// has arrived.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        let total = 4 + u32::from_be_bytes(header) as usize;
        (data.len() >= total).then_some(total)
    }

    /// Returns the decoded message and the number of bytes consumed.
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
    fn test_select_command_frame() {
        let msg = Message::Command(Command::Select { index: 3 });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Select { index }) => assert_eq!(index, 3),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let encoded = Message::Command(Command::ChangePlaylist {
            playlist_id: "42".to_string(),
        })
        .encode()
        .unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert_eq!(Message::frame_len(&encoded[..2]), None);
        assert_eq!(Message::frame_len(&encoded[..encoded.len() - 1]), None);
        assert_eq!(Message::frame_len(&encoded), Some(encoded.len()));
    }

    #[test]
    fn test_frame_len_covers_undecodable_frames() {
        let body = br#"{"cmd":"NoSuchCommand"}"#;
        let mut data = (body.len() as u32).to_be_bytes().to_vec();
        data.extend_from_slice(body);
        let next = Message::Command(Command::Next).encode().unwrap();
        data.extend_from_slice(&next);

        assert!(Message::decode(&data).is_err());
        assert_eq!(Message::frame_len(&data), Some(4 + body.len()));
        let (msg, _) = Message::decode(&data[4 + body.len()..]).unwrap();
        assert!(matches!(msg, Message::Command(Command::Next)));
    }

    #[test]
    fn test_hello_carries_state() {
        let state = JukeboxState {
            rev: 7,
            playlist_id: "6654477071".to_string(),
            source: SourceStatus::Degraded,
            ..Default::default()
        };
        let encoded = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 7,
            state,
        })
        .encode()
        .unwrap();
        match Message::decode(&encoded).unwrap().0 {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 7);
                assert_eq!(state.source, SourceStatus::Degraded);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_string(&Command::SetShuffle { enabled: true }).unwrap();
        assert_eq!(json, r#"{"cmd":"SetShuffle","enabled":true}"#);
        let parsed: Command = serde_json::from_str(r#"{"cmd":"Refresh"}"#).unwrap();
        assert!(matches!(parsed, Command::Refresh));
    }
}
