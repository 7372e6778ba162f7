//! Voice-AI engine integration.
//!
//! The engine is an opaque WebSocket peer with a fixed media contract:
//! 16-bit linear PCM, 16 kHz, mono in both directions, plus structured JSON
//! control messages. This module owns the client and the message types;
//! conversation behavior lives entirely on the engine side.

mod client;
mod messages;

pub use client::{
    AgentAudioCallback, AgentClient, AgentClosedCallback, AgentConfig, AgentError,
    AgentErrorCallback, AgentQualificationCallback, AgentResult, AgentTranscript,
    AgentTranscriptCallback,
};
pub use messages::{
    AgentClientEvent, AgentServerEvent, Qualification, QualificationAnswer, SpeakerRole,
};
