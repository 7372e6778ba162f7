use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration; anything omitted
/// falls back to the environment variable or default for that setting.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// public:
///   webhook_base: "https://dial.example.com/webhooks"
///   media_base: "wss://dial.example.com/media"
///
/// telephony:
///   dial_provider: "twilio"
///   twilio:
///     account_sid: "ACxxxx"
///     auth_token: "secret"
///     from_number: "+15550001111"
///   telnyx:
///     api_key: "KEYxxxx"
///     connection_id: "conn-1"
///     from_number: "+15550002222"
///
/// agent:
///   url: "wss://engine.example/v1/stream"
///   api_key: "engine-key"
///   model: "conversational-v2"
///   voice: "river"
///
/// script:
///   greeting: "Hi {{first_name}}, I'm calling about {{property_address}}."
///   questions:
///     - "Are you the owner of {{property_address}}?"
///     - "Would you consider an offer this month?"
///   disqualifiers:
///     - phrase: "stop calling"
///       action: end_politely
///     - phrase: "already sold"
///       action: mark_disqualified
///
/// scheduler:
///   max_attempts: 3
///   retry_delay_seconds: 3600
///   calling_hours_start: "09:00"
///   calling_hours_end: "19:00"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub public: Option<PublicYaml>,
    pub telephony: Option<TelephonyYaml>,
    pub agent: Option<AgentYaml>,
    pub script: Option<ScriptYaml>,
    pub scheduler: Option<SchedulerYaml>,
    pub health: Option<HealthYaml>,
    pub auth: Option<AuthYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Publicly reachable base URLs handed to telephony vendors
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PublicYaml {
    /// Base for status webhooks, e.g. `https://host/webhooks`
    pub webhook_base: Option<String>,
    /// Base for media streams, e.g. `wss://host/media`
    pub media_base: Option<String>,
}

/// Telephony vendor credentials and selection
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelephonyYaml {
    /// Which configured vendor outbound calls are placed through
    pub dial_provider: Option<String>,
    pub twilio: Option<TwilioYaml>,
    pub telnyx: Option<TelnyxYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TwilioYaml {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    /// Shared secret for HMAC-SHA256 webhook signature verification
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelnyxYaml {
    pub api_key: Option<String>,
    pub connection_id: Option<String>,
    pub from_number: Option<String>,
    /// Shared secret for HMAC-SHA256 webhook signature verification
    pub webhook_secret: Option<String>,
}

/// Voice-AI engine connection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// Conversation script: greeting, qualifying questions, disqualifiers
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ScriptYaml {
    pub greeting: Option<String>,
    pub questions: Option<Vec<String>>,
    pub disqualifiers: Option<Vec<DisqualifierYaml>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisqualifierYaml {
    pub phrase: String,
    /// `end_politely` or `mark_disqualified`
    pub action: Option<String>,
}

/// Dialing scheduler settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerYaml {
    pub pass_interval_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub ring_timeout_seconds: Option<u64>,
    /// "HH:MM" in lead-local time
    pub calling_hours_start: Option<String>,
    /// "HH:MM" in lead-local time
    pub calling_hours_end: Option<String>,
}

/// Provider health probe settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HealthYaml {
    pub interval_seconds: Option<u64>,
    pub probe_timeout_seconds: Option<u64>,
    pub failure_threshold: Option<u32>,
}

/// Operator API authentication from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    pub api_secrets: Option<Vec<AuthApiSecretYaml>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthApiSecretYaml {
    pub id: String,
    pub secret: String,
}

/// Security settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load and parse a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        let config: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {e}", path.display()))?;
        Ok(config)
    }
}

/// TLS paths as a typed pair, produced during merge when TLS is enabled.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080

telephony:
  dial_provider: "telnyx"
  telnyx:
    api_key: "KEY1"
    connection_id: "conn-1"
    from_number: "+15550002222"

script:
  greeting: "Hi {{first_name}}"
  questions:
    - "First question?"
  disqualifiers:
    - phrase: "stop calling"
      action: end_politely

scheduler:
  max_attempts: 5
  calling_hours_start: "08:30"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.as_ref().unwrap().port, Some(8080));
        let telephony = config.telephony.as_ref().unwrap();
        assert_eq!(telephony.dial_provider.as_deref(), Some("telnyx"));
        assert_eq!(
            telephony.telnyx.as_ref().unwrap().api_key.as_deref(),
            Some("KEY1")
        );
        let script = config.script.as_ref().unwrap();
        assert_eq!(script.questions.as_ref().unwrap().len(), 1);
        assert_eq!(
            script.disqualifiers.as_ref().unwrap()[0].phrase,
            "stop calling"
        );
        assert_eq!(
            config
                .scheduler
                .as_ref()
                .unwrap()
                .calling_hours_start
                .as_deref(),
            Some("08:30")
        );
    }

    #[test]
    fn test_empty_yaml_is_all_defaults() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.telephony.is_none());
        assert!(config.script.is_none());
    }
}
