use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{FrameError, UnknownMood};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  The TUI checks this on connect and refuses to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client (TUI, HTTP bridge) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    SelectStation { id: String },
    TogglePlayPause,
    SkipNext,
    SkipPrev,
    Random,
    SetVolume { level: u8 },
    ToggleMute,
    SetMood { mood: Mood },
    GetState,
}

/// Messages sent from the daemon to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        state: PlayerSnapshot,
    },
    State {
        data: PlayerSnapshot,
    },
    PlayingChanged {
        playing: bool,
    },
    StationChanged {
        station: StationDescriptor,
    },
    VolumeChanged {
        level: u8,
        muted: bool,
    },
    PlaybackFailed {
        reason: String,
    },
    MoodChanged {
        mood: Mood,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Phase of the playback state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    /// No media handle yet (before init, after teardown).
    #[default]
    Idle,
    /// Source (re)pointed, waiting for the handle to signal readiness.
    Loading,
    ReadyPaused,
    ReadyPlaying,
    /// The handle reported a non-recoverable error.
    Failed,
}

impl PlaybackPhase {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackPhase::Idle => "idle",
            PlaybackPhase::Loading => "loading",
            PlaybackPhase::ReadyPaused => "paused",
            PlaybackPhase::ReadyPlaying => "playing",
            PlaybackPhase::Failed => "failed",
        }
    }
}

/// Health of the mpv process as observed by the daemon.
///
/// Transitions:
///   Absent -> Starting -> Running -> Dead
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MediaHealth {
    #[default]
    Absent,
    Starting,
    Running,
    Dead,
}

impl MediaHealth {
    /// Short label for the status bar (≤5 chars).
    pub fn badge_label(&self) -> Option<&str> {
        match self {
            MediaHealth::Absent => None,
            MediaHealth::Starting => Some("INIT"),
            MediaHealth::Running => None,
            MediaHealth::Dead => Some("DEAD"),
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, MediaHealth::Dead)
    }
}

/// Cosmetic preset for the presentation layer.  Orthogonal to playback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Study,
    Sleep,
    Rain,
    Ocean,
}

impl Mood {
    pub const ALL: [Mood; 4] = [Mood::Study, Mood::Sleep, Mood::Rain, Mood::Ocean];

    pub fn label(&self) -> &'static str {
        match self {
            Mood::Study => "Study",
            Mood::Sleep => "Sleep",
            Mood::Rain => "Rainy",
            Mood::Ocean => "Ocean",
        }
    }

    /// Next mood in tab order, wrapping around.
    pub fn next(self) -> Mood {
        let idx = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl FromStr for Mood {
    type Err = UnknownMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "study" => Ok(Mood::Study),
            "sleep" => Ok(Mood::Sleep),
            "rain" | "rainy" => Ok(Mood::Rain),
            "ocean" => Ok(Mood::Ocean),
            other => Err(UnknownMood(other.to_string())),
        }
    }
}

/// Accent colour of a station card.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccentColor {
    #[default]
    Amber,
    Purple,
    Blue,
    Indigo,
    Emerald,
    Rose,
    Cyan,
    Slate,
}

impl AccentColor {
    pub const ALL: [AccentColor; 8] = [
        AccentColor::Amber,
        AccentColor::Purple,
        AccentColor::Blue,
        AccentColor::Indigo,
        AccentColor::Emerald,
        AccentColor::Rose,
        AccentColor::Cyan,
        AccentColor::Slate,
    ];

    /// RGB triple, so clients don't need their own palette.
    pub fn rgb(&self) -> (u8, u8, u8) {
        match self {
            AccentColor::Amber => (245, 158, 11),
            AccentColor::Purple => (168, 85, 247),
            AccentColor::Blue => (59, 130, 246),
            AccentColor::Indigo => (99, 102, 241),
            AccentColor::Emerald => (16, 185, 129),
            AccentColor::Rose => (244, 63, 94),
            AccentColor::Cyan => (6, 182, 212),
            AccentColor::Slate => (100, 116, 139),
        }
    }
}

/// Immutable description of one internet radio station.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub stream_url: String,
    #[serde(default)]
    pub accent: AccentColor,
}

/// Read-only copy of the player state handed to clients.  `rev` increases
/// on every change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub stations: Vec<StationDescriptor>,
    pub current_station: String,
    pub phase: PlaybackPhase,
    pub is_playing: bool,
    pub volume: u8,
    pub is_muted: bool,
    #[serde(default)]
    pub mood: Mood,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub media_health: MediaHealth,
}

impl PlayerSnapshot {
    pub fn current(&self) -> Option<&StationDescriptor> {
        self.stations.iter().find(|s| s.id == self.current_station)
    }
}

/// Largest frame body either side accepts.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// One step of splitting a byte stream into frames.
#[derive(Debug)]
pub enum Frame {
    /// Not enough bytes yet for a whole frame.
    Incomplete,
    Message(Message, usize),
    /// A whole frame arrived but its body is not a known message.  The
    /// caller drains `consumed` bytes and carries on.
    Malformed { consumed: usize, reason: String },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
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

    /// Split the next frame off `data`.  Fails only when the length header
    /// exceeds `MAX_FRAME_LEN`, after which the stream cannot be resynced.
    pub fn next_frame(data: &[u8]) -> Result<Frame, FrameError> {
        if data.len() < 4 {
            return Ok(Frame::Incomplete);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        if data.len() < 4 + len {
            return Ok(Frame::Incomplete);
        }
        match serde_json::from_slice::<Self>(&data[4..4 + len]) {
            Ok(msg) => Ok(Frame::Message(msg, 4 + len)),
            Err(e) => Ok(Frame::Malformed {
                consumed: 4 + len,
                reason: e.to_string(),
            }),
        }
    }
}
