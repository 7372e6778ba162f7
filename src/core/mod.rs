pub mod agent;
pub mod audio;
pub mod bridge;
pub mod orchestrator;
pub mod scheduler;
pub mod sessions;
pub mod telephony;

// Re-export commonly used types for convenience
pub use telephony::{
    AmdConfig, AmdResult, BaseTelephony, BoxedTelephony, CallEvent, CallEventType, CallStatus,
    EndReason, HealthCheckOutcome, InitiateOptions, InitiateOutcome, ProviderConfig, ProviderSet,
    RawWebhook, Recording, TelephonyError, TelephonyProvider, TelephonyResult,
    create_telephony_provider, get_supported_telephony_providers, normalize_amd_confidence,
};

pub use agent::{AgentClient, AgentConfig, AgentError, Qualification, SpeakerRole};

pub use bridge::{
    AudioBridge, BridgeCloseReason, BridgeError, BridgeEvent, BridgeRegistry, BridgeState,
    CallContext, DisqualifierAction, DisqualifierRule, MonitorFrame,
};

pub use orchestrator::Orchestrator;

pub use scheduler::{
    CallQueueEntry, CallingHours, FixedDelay, OutcomeClass, OutcomeRules, QueueStatus, QueueStore,
    RetryDelayPolicy, Scheduler, SchedulerConfig, SchedulerStatus,
};

pub use sessions::{CallSession, LeadProfile, SessionStore, TranscriptLine};
