//! Configuration for the Dialgate server.
//!
//! Settings come from three places, highest priority first: a YAML file
//! (`--config`), environment variables (including a `.env` file loaded at
//! startup), and built-in defaults. [`ServerConfig`] is the flat, validated
//! result the rest of the process reads; nothing else touches the
//! environment after startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;

use crate::core::agent::AgentConfig;
use crate::core::bridge::{DisqualifierAction, DisqualifierRule};
use crate::core::scheduler::CallingHours;
use crate::core::telephony::{
    ProviderConfig, TelephonyProvider, TelnyxConfig, TwilioConfig,
};
use crate::utils::url_validation::{validate_public_http_url, validate_public_ws_url};

pub mod yaml;

use yaml::YamlConfig;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// One operator API credential: a bearer secret and the id it authenticates.
#[derive(Debug, Clone)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Per-vendor dialing settings that are not part of the adapter itself.
#[derive(Debug, Clone, Default)]
pub struct VendorSettings {
    /// Caller id (E.164) for outbound calls through this vendor
    pub from_number: Option<String>,
    /// Shared secret for webhook HMAC-SHA256 signature verification
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    // Publicly reachable bases handed to vendors at initiation
    pub public_webhook_base: Option<String>,
    pub public_media_base: Option<String>,

    // Telephony vendors
    pub dial_provider: TelephonyProvider,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub telnyx_api_key: Option<String>,
    pub telnyx_connection_id: Option<String>,
    pub vendor_settings: HashMap<TelephonyProvider, VendorSettings>,

    // Voice-AI engine
    pub agent_url: String,
    pub agent_api_key: String,
    pub agent_model: String,
    pub agent_voice: String,

    // Conversation script
    pub greeting: String,
    pub questions: Vec<String>,
    pub disqualifiers: Vec<DisqualifierRule>,

    // Scheduler
    pub pass_interval: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub ring_timeout_secs: u64,
    pub calling_hours: CallingHours,

    // Provider health probes
    pub health_interval: Duration,
    pub health_probe_timeout: Duration,
    pub health_failure_threshold: u32,

    // Operator API authentication
    pub auth_required: bool,
    pub auth_api_secrets: Vec<AuthApiSecret>,

    // Security
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest): YAML values, environment
    /// variables (a `.env` file is loaded into the environment in `main`),
    /// built-in defaults.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// The bind address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// Find the API secret identifier that matches a bearer token.
    pub fn find_api_secret_id(&self, token: &str) -> Option<&str> {
        self.auth_api_secrets
            .iter()
            .find(|entry| entry.secret == token)
            .map(|entry| entry.id.as_str())
    }

    /// Build the adapter configuration for every vendor with credentials.
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        let mut configs = Vec::new();
        if let (Some(sid), Some(token)) = (&self.twilio_account_sid, &self.twilio_auth_token) {
            configs.push(ProviderConfig::Twilio(TwilioConfig::new(sid, token)));
        }
        if let (Some(key), Some(connection)) = (&self.telnyx_api_key, &self.telnyx_connection_id) {
            configs.push(ProviderConfig::Telnyx(TelnyxConfig::new(key, connection)));
        }
        configs
    }

    /// Caller ids per vendor, for the scheduler's initiation requests.
    pub fn from_numbers(&self) -> HashMap<TelephonyProvider, String> {
        self.vendor_settings
            .iter()
            .filter_map(|(provider, settings)| {
                settings
                    .from_number
                    .clone()
                    .map(|number| (*provider, number))
            })
            .collect()
    }

    /// Webhook signature secret for a vendor, when configured.
    pub fn webhook_secret(&self, provider: TelephonyProvider) -> Option<&str> {
        self.vendor_settings
            .get(&provider)
            .and_then(|settings| settings.webhook_secret.as_deref())
    }

    /// Voice-AI engine connection settings.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            url: self.agent_url.clone(),
            api_key: self.agent_api_key.clone(),
            model: self.agent_model.clone(),
            voice: self.agent_voice.clone(),
        }
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let configured: Vec<TelephonyProvider> = self
            .provider_configs()
            .iter()
            .map(|c| c.provider())
            .collect();
        if configured.is_empty() {
            return Err(
                "No telephony provider configured. Set TWILIO_ACCOUNT_SID/TWILIO_AUTH_TOKEN \
                 or TELNYX_API_KEY/TELNYX_CONNECTION_ID"
                    .into(),
            );
        }
        if !configured.contains(&self.dial_provider) {
            return Err(format!(
                "DIAL_PROVIDER is {} but that vendor has no credentials configured",
                self.dial_provider
            )
            .into());
        }
        if self
            .vendor_settings
            .get(&self.dial_provider)
            .and_then(|s| s.from_number.as_ref())
            .is_none()
        {
            return Err(format!(
                "No caller id configured for {} (set {}_FROM_NUMBER)",
                self.dial_provider,
                self.dial_provider.to_string().to_uppercase()
            )
            .into());
        }

        if let Some(base) = &self.public_webhook_base {
            validate_public_http_url(base).map_err(|e| format!("PUBLIC_WEBHOOK_BASE: {e}"))?;
        }
        if let Some(base) = &self.public_media_base {
            validate_public_ws_url(base).map_err(|e| format!("PUBLIC_MEDIA_BASE: {e}"))?;
        }

        if self.auth_required && self.auth_api_secrets.is_empty() {
            return Err(
                "AUTH_REQUIRED is set but no API secrets are configured (set AUTH_API_SECRET \
                 or auth.api_secrets in YAML)"
                    .into(),
            );
        }
        if self.max_attempts == 0 {
            return Err("MAX_ATTEMPTS must be at least 1".into());
        }

        Ok(())
    }
}

// =============================================================================
// Merge: defaults <- environment <- YAML
// =============================================================================

fn merge(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let public = yaml.public.unwrap_or_default();
    let telephony = yaml.telephony.unwrap_or_default();
    let twilio = telephony.twilio.unwrap_or_default();
    let telnyx = telephony.telnyx.unwrap_or_default();
    let agent = yaml.agent.unwrap_or_default();
    let script = yaml.script.unwrap_or_default();
    let scheduler = yaml.scheduler.unwrap_or_default();
    let health = yaml.health.unwrap_or_default();
    let auth = yaml.auth.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let host = server
        .host
        .or_else(|| env_opt("HOST"))
        .unwrap_or_else(|| "0.0.0.0".to_string());
    let port = pick(server.port, "PORT")?.unwrap_or(3001);

    let tls = {
        let tls_yaml = server.tls.unwrap_or_default();
        let enabled = pick(tls_yaml.enabled, "TLS_ENABLED")?.unwrap_or(false);
        let cert = tls_yaml.cert_path.or_else(|| env_opt("TLS_CERT_PATH"));
        let key = tls_yaml.key_path.or_else(|| env_opt("TLS_KEY_PATH"));
        match (enabled, cert, key) {
            (true, Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert_path),
                key_path: PathBuf::from(key_path),
            }),
            (true, _, _) => {
                return Err(
                    "TLS_ENABLED is set but TLS_CERT_PATH/TLS_KEY_PATH are missing".into(),
                );
            }
            _ => None,
        }
    };

    let dial_provider = telephony
        .dial_provider
        .or_else(|| env_opt("DIAL_PROVIDER"))
        .unwrap_or_else(|| "twilio".to_string())
        .parse::<TelephonyProvider>()
        .map_err(|e| e.to_string())?;

    let mut vendor_settings = HashMap::new();
    vendor_settings.insert(
        TelephonyProvider::Twilio,
        VendorSettings {
            from_number: twilio.from_number.or_else(|| env_opt("TWILIO_FROM_NUMBER")),
            webhook_secret: twilio
                .webhook_secret
                .or_else(|| env_opt("TWILIO_WEBHOOK_SECRET")),
        },
    );
    vendor_settings.insert(
        TelephonyProvider::Telnyx,
        VendorSettings {
            from_number: telnyx.from_number.or_else(|| env_opt("TELNYX_FROM_NUMBER")),
            webhook_secret: telnyx
                .webhook_secret
                .or_else(|| env_opt("TELNYX_WEBHOOK_SECRET")),
        },
    );

    let disqualifiers = script
        .disqualifiers
        .map(|rules| {
            rules
                .into_iter()
                .map(|rule| DisqualifierRule {
                    phrase: rule.phrase,
                    action: match rule.action.as_deref() {
                        Some("mark_disqualified") => DisqualifierAction::MarkDisqualified,
                        _ => DisqualifierAction::EndPolitely,
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    let calling_hours = CallingHours {
        start: parse_hhmm(
            scheduler
                .calling_hours_start
                .or_else(|| env_opt("CALLING_HOURS_START"))
                .as_deref(),
            NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
        )?,
        end: parse_hhmm(
            scheduler
                .calling_hours_end
                .or_else(|| env_opt("CALLING_HOURS_END"))
                .as_deref(),
            NaiveTime::from_hms_opt(19, 0, 0).expect("valid time"),
        )?,
    };

    let auth_api_secrets = auth
        .api_secrets
        .map(|secrets| {
            secrets
                .into_iter()
                .map(|entry| AuthApiSecret {
                    id: entry.id,
                    secret: entry.secret,
                })
                .collect::<Vec<_>>()
        })
        .or_else(|| {
            // AUTH_API_SECRET=id:secret for single-credential deployments.
            env_opt("AUTH_API_SECRET").map(|raw| {
                let (id, secret) = raw.split_once(':').unwrap_or(("default", raw.as_str()));
                vec![AuthApiSecret {
                    id: id.to_string(),
                    secret: secret.to_string(),
                }]
            })
        })
        .unwrap_or_default();

    Ok(ServerConfig {
        host,
        port,
        tls,
        public_webhook_base: public
            .webhook_base
            .or_else(|| env_opt("PUBLIC_WEBHOOK_BASE")),
        public_media_base: public.media_base.or_else(|| env_opt("PUBLIC_MEDIA_BASE")),
        dial_provider,
        twilio_account_sid: twilio.account_sid.or_else(|| env_opt("TWILIO_ACCOUNT_SID")),
        twilio_auth_token: twilio.auth_token.or_else(|| env_opt("TWILIO_AUTH_TOKEN")),
        telnyx_api_key: telnyx.api_key.or_else(|| env_opt("TELNYX_API_KEY")),
        telnyx_connection_id: telnyx
            .connection_id
            .or_else(|| env_opt("TELNYX_CONNECTION_ID")),
        vendor_settings,
        agent_url: agent
            .url
            .or_else(|| env_opt("AGENT_URL"))
            .unwrap_or_default(),
        agent_api_key: agent
            .api_key
            .or_else(|| env_opt("AGENT_API_KEY"))
            .unwrap_or_default(),
        agent_model: agent
            .model
            .or_else(|| env_opt("AGENT_MODEL"))
            .unwrap_or_else(|| "conversational-v2".to_string()),
        agent_voice: agent
            .voice
            .or_else(|| env_opt("AGENT_VOICE"))
            .unwrap_or_else(|| "river".to_string()),
        greeting: script
            .greeting
            .or_else(|| env_opt("GREETING"))
            .unwrap_or_else(|| {
                "Hi {{first_name}}, I'm calling about {{property_address}}.".to_string()
            }),
        questions: script.questions.unwrap_or_default(),
        disqualifiers,
        pass_interval: Duration::from_secs(
            pick(scheduler.pass_interval_seconds, "PASS_INTERVAL_SECONDS")?.unwrap_or(15),
        ),
        max_attempts: pick(scheduler.max_attempts, "MAX_ATTEMPTS")?.unwrap_or(3),
        retry_delay: Duration::from_secs(
            pick(scheduler.retry_delay_seconds, "RETRY_DELAY_SECONDS")?.unwrap_or(3_600),
        ),
        ring_timeout_secs: pick(scheduler.ring_timeout_seconds, "RING_TIMEOUT_SECONDS")?
            .unwrap_or(30),
        calling_hours,
        health_interval: Duration::from_secs(
            pick(health.interval_seconds, "HEALTH_INTERVAL_SECONDS")?.unwrap_or(30),
        ),
        health_probe_timeout: Duration::from_secs(
            pick(health.probe_timeout_seconds, "HEALTH_PROBE_TIMEOUT_SECONDS")?.unwrap_or(5),
        ),
        health_failure_threshold: pick(health.failure_threshold, "HEALTH_FAILURE_THRESHOLD")?
            .unwrap_or(3),
        auth_required: pick(auth.required, "AUTH_REQUIRED")?.unwrap_or(false),
        auth_api_secrets,
        cors_allowed_origins: security
            .cors_allowed_origins
            .or_else(|| env_opt("CORS_ALLOWED_ORIGINS")),
        rate_limit_requests_per_second: pick(
            security.rate_limit_requests_per_second,
            "RATE_LIMIT_REQUESTS_PER_SECOND",
        )?
        .unwrap_or(60),
        rate_limit_burst_size: pick(security.rate_limit_burst_size, "RATE_LIMIT_BURST_SIZE")?
            .unwrap_or(10),
        max_websocket_connections: pick(
            security.max_websocket_connections,
            "MAX_WEBSOCKET_CONNECTIONS",
        )?,
        max_connections_per_ip: pick(security.max_connections_per_ip, "MAX_CONNECTIONS_PER_IP")?
            .unwrap_or(100),
    })
}

/// Read a non-empty environment variable.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment variable; a malformed value is an error,
/// not a silent fallback.
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key}: {e}").into()),
        None => Ok(None),
    }
}

/// YAML value if present, otherwise the parsed environment variable.
fn pick<T: std::str::FromStr>(
    yaml: Option<T>,
    key: &str,
) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T::Err: std::fmt::Display,
{
    match yaml {
        Some(value) => Ok(Some(value)),
        None => env_parse(key),
    }
}

fn parse_hhmm(
    raw: Option<&str>,
    default: NaiveTime,
) -> Result<NaiveTime, Box<dyn std::error::Error>> {
    match raw {
        Some(text) => NaiveTime::parse_from_str(text.trim(), "%H:%M")
            .map_err(|_| format!("Invalid calling-hours time '{text}', expected HH:MM").into()),
        None => Ok(default),
    }
}
