//! Wire messages for the voice-AI engine connection.
//!
//! The engine contract is fixed: binary frames are 16-bit little-endian PCM
//! at 16 kHz mono in both directions; everything else is a tagged JSON
//! control message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who is speaking in a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    /// The called lead
    Caller,
    /// The AI agent
    Agent,
}

impl std::fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeakerRole::Caller => write!(f, "caller"),
            SpeakerRole::Agent => write!(f, "agent"),
        }
    }
}

/// Structured qualification result extracted by the engine at the end of a
/// conversation. Versioned so stored rows survive schema evolution; parsed
/// exactly once at this boundary and passed around as a typed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qualification {
    #[serde(default = "Qualification::current_version")]
    pub version: u32,
    /// Engine's qualification verdict, e.g. "qualified" / "disqualified"
    pub status: String,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub disposition: Option<String>,
    #[serde(default)]
    pub callback_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Vec<QualificationAnswer>,
}

impl Qualification {
    pub const VERSION: u32 = 1;

    fn current_version() -> u32 {
        Self::VERSION
    }
}

/// One answered qualifying question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationAnswer {
    pub question: String,
    pub answer: String,
}

/// Messages we send to the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AgentClientEvent {
    /// Open a conversation session with composed instructions.
    #[serde(rename = "session.start")]
    SessionStart {
        instructions: String,
        voice: String,
        model: String,
        /// Sample rate of the audio we will send, in Hz
        sample_rate: u32,
    },

    /// Ask the engine to close the session gracefully.
    #[serde(rename = "session.end")]
    SessionEnd,
}

/// Messages the engine sends us.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentServerEvent {
    /// Session accepted; greeting audio may already be in flight.
    #[serde(rename = "session.ready")]
    SessionReady { session_id: String },

    /// Incremental or final transcript line.
    #[serde(rename = "transcript")]
    Transcript {
        role: SpeakerRole,
        text: String,
        #[serde(default)]
        is_final: bool,
    },

    /// Terminal qualification result, sent at most once per session.
    #[serde(rename = "qualification")]
    Qualification(Qualification),

    /// Engine-side error.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
}
