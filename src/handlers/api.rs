//! Operator API handlers.
//!
//! Everything an operator (or the dashboard acting for one) can do: dial a
//! lead immediately, hang up, inspect calls, manage the queue, and read
//! provider health. All endpoints are JSON over the authenticated router.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::core::scheduler::SchedulerStatus;
use crate::core::sessions::{CallSession, LeadProfile};
use crate::core::telephony::{
    EndReason, InitiateOptions, Recording, RecordingRef, TaxonomyKind, TelephonyError,
};
use crate::state::AppState;
use crate::utils::validate_phone_number;

/// Operator-facing error envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Telephony(#[from] TelephonyError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Telephony(e) => {
                let status = match e.kind() {
                    TaxonomyKind::ResourceNotFound => StatusCode::NOT_FOUND,
                    TaxonomyKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                    TaxonomyKind::Authentication | TaxonomyKind::PermissionDenied => {
                        StatusCode::BAD_GATEWAY
                    }
                    TaxonomyKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
                    TaxonomyKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// `GET /` — public liveness probe.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "dialgate",
        "version": env!("CARGO_PKG_VERSION"),
        "active_bridges": state.registry().active_count(),
        "providers": state.providers.providers(),
    }))
}

// =============================================================================
// Calls
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DialRequest {
    pub lead: LeadProfile,
    /// Which of the lead's numbers to dial; defaults to the first
    #[serde(default)]
    pub phone_index: usize,
}

#[derive(Debug, Serialize)]
pub struct DialResponse {
    pub call_id: Uuid,
    pub provider_call_id: String,
    pub status: crate::core::telephony::CallStatus,
}

/// `POST /v1/calls` — place a call immediately, outside the queue.
pub async fn dial_now(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DialRequest>,
) -> Result<(StatusCode, Json<DialResponse>), ApiError> {
    let lead = validated_lead(request.lead)?;
    if request.phone_index >= lead.phone_numbers.len() {
        return Err(ApiError::BadRequest(format!(
            "phone_index {} out of range for {} number(s)",
            request.phone_index,
            lead.phone_numbers.len()
        )));
    }

    let provider_kind = state.config.dial_provider;
    let provider = state
        .providers
        .get(provider_kind)
        .ok_or_else(|| ApiError::BadRequest(format!("Provider {provider_kind} not configured")))?;
    let from = state
        .config
        .from_numbers()
        .get(&provider_kind)
        .cloned()
        .ok_or_else(|| {
            ApiError::BadRequest(format!("No caller id configured for {provider_kind}"))
        })?;

    let to = lead.phone_numbers[request.phone_index].clone();
    let options = InitiateOptions {
        stream_url: state
            .config
            .public_media_base
            .as_ref()
            .map(|base| format!("{base}/{provider_kind}")),
        status_callback_url: state
            .config
            .public_webhook_base
            .as_ref()
            .map(|base| format!("{base}/{provider_kind}")),
        amd: None,
        timeout_secs: Some(state.config.ring_timeout_secs),
    };

    let lead_id = lead.id.clone();
    state.store.upsert_lead(lead);
    let outcome = provider.initiate_call(&to, &from, &options).await?;

    let session = CallSession::new(
        provider_kind,
        outcome.provider_call_id.clone(),
        lead_id,
        request.phone_index,
        1,
        outcome.status,
    );
    let call_id = state.store.insert_session(session);

    tracing::info!(%call_id, provider_call_id = %outcome.provider_call_id, "Operator dial placed");
    Ok((
        StatusCode::CREATED,
        Json(DialResponse {
            call_id,
            provider_call_id: outcome.provider_call_id,
            status: outcome.status,
        }),
    ))
}

/// `GET /v1/calls/{id}` — full session record, including transcript and
/// qualification once present.
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<Uuid>,
) -> Result<Json<CallSession>, ApiError> {
    state
        .store
        .session(&call_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No call session {call_id}")))
}

/// `DELETE /v1/calls/{id}` — hang up; force-closes any live bridge.
pub async fn hangup_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .orchestrator
        .end_call(&call_id, EndReason::Operator)
        .await?;
    Ok(Json(json!({ "call_id": call_id, "status": outcome.status })))
}

/// `GET /v1/calls/{id}/status` — poll the vendor for the call's live
/// status instead of waiting for the next webhook.
pub async fn poll_call_status(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .store
        .session(&call_id)
        .ok_or_else(|| ApiError::NotFound(format!("No call session {call_id}")))?;
    let adapter = state.providers.get(session.provider).ok_or_else(|| {
        ApiError::BadRequest(format!("Provider {} not configured", session.provider))
    })?;

    let snapshot = adapter.get_call_status(&session.provider_call_id).await?;
    Ok(Json(json!({
        "call_id": call_id,
        "status": snapshot.status,
        "duration_secs": snapshot.duration_secs,
        "amd_result": snapshot.amd_result,
    })))
}

/// `PUT /v1/providers/amd` — replace the AMD settings every adapter uses
/// for subsequent initiations.
pub async fn set_amd_config(
    State(state): State<Arc<AppState>>,
    Json(config): Json<crate::core::telephony::AmdConfig>,
) -> Json<serde_json::Value> {
    for (kind, adapter) in state.providers.iter() {
        adapter.configure_amd(config.clone());
        tracing::info!(provider = %kind, enabled = config.enabled, "AMD configuration updated");
    }
    Json(json!({ "applied": true }))
}

/// `GET /v1/calls/{id}/recording` — re-resolve the stored recording
/// reference through the owning vendor adapter.
pub async fn get_call_recording(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<Uuid>,
) -> Result<Json<Recording>, ApiError> {
    let session = state
        .store
        .session(&call_id)
        .ok_or_else(|| ApiError::NotFound(format!("No call session {call_id}")))?;
    let stored = session
        .recording
        .ok_or_else(|| ApiError::NotFound(format!("Call {call_id} has no recording")))?;
    let adapter = state.providers.get(session.provider).ok_or_else(|| {
        ApiError::BadRequest(format!("Provider {} not configured", session.provider))
    })?;

    let recording = adapter.get_recording(RecordingRef::Url(stored.url)).await?;
    Ok(Json(recording))
}

// =============================================================================
// Queue
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub lead: LeadProfile,
    /// Delay before the first attempt, in seconds
    #[serde(default)]
    pub delay_seconds: u64,
}

/// `POST /v1/queue` — enqueue the first attempt for a lead.
pub async fn enqueue_lead(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let lead = validated_lead(request.lead)?;
    let entry_id = state
        .scheduler
        .enqueue_lead(
            lead,
            Some(std::time::Duration::from_secs(request.delay_seconds)),
        )
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "entry_id": entry_id })),
    ))
}

/// `GET /v1/queue` — all queue entries, newest last.
pub async fn list_queue(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "entries": state.queue.list() }))
}

/// `DELETE /v1/queue/{id}` — operator skip.
pub async fn skip_queue_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .queue
        .skip(&entry_id)
        .map_err(|e| ApiError::NotFound(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/queue/pause` — manual pause; never auto-resumed by probes.
pub async fn pause_queue(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    state.scheduler.pause_manual();
    Json(state.scheduler.status())
}

/// `POST /v1/queue/resume` — lift a manual pause.
pub async fn resume_queue(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    state.scheduler.resume_manual();
    Json(state.scheduler.status())
}

/// `GET /v1/queue/status`.
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = state.scheduler.status();
    Json(json!({
        "scheduler": status,
        "active_bridges": state.registry().active_count(),
        "sessions": state.store.session_count(),
    }))
}

// =============================================================================
// Providers
// =============================================================================

/// `GET /v1/providers/health` — probe every configured vendor now and
/// include the recent gating history.
pub async fn providers_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut probes = Vec::new();
    for (kind, adapter) in state.providers.iter() {
        let outcome = tokio::time::timeout(
            state.config.health_probe_timeout,
            adapter.health_check(),
        )
        .await
        .unwrap_or_else(|_| crate::core::telephony::HealthCheckOutcome {
            healthy: false,
            response_time_ms: state.config.health_probe_timeout.as_millis() as u64,
            error: Some("probe timed out".to_string()),
        });
        probes.push(json!({
            "provider": kind,
            "healthy": outcome.healthy,
            "response_time_ms": outcome.response_time_ms,
            "error": outcome.error,
        }));
    }

    Json(json!({
        "probes": probes,
        "recent_events": state.store.health_events(),
    }))
}

// =============================================================================
// Helpers
// =============================================================================

fn validated_lead(mut lead: LeadProfile) -> Result<LeadProfile, ApiError> {
    if lead.phone_numbers.is_empty() {
        return Err(ApiError::BadRequest(
            "Lead has no phone numbers".to_string(),
        ));
    }
    lead.phone_numbers = lead
        .phone_numbers
        .iter()
        .map(|raw| validate_phone_number(raw).map_err(ApiError::BadRequest))
        .collect::<Result<Vec<_>, _>>()?;

    // Ingestion may hand us a region/state code instead of an IANA name;
    // resolve it once here, never again downstream.
    let timezone = lead.timezone.trim();
    lead.timezone = if timezone.is_empty() {
        crate::core::scheduler::DEFAULT_TIMEZONE.to_string()
    } else if timezone.len() == 2 && !timezone.contains('/') {
        crate::core::scheduler::resolve_timezone(timezone).to_string()
    } else {
        timezone.to_string()
    };
    Ok(lead)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(numbers: &[&str], timezone: &str) -> LeadProfile {
        LeadProfile {
            id: "lead-1".to_string(),
            first_name: None,
            last_name: None,
            property_address: None,
            phone_numbers: numbers.iter().map(|n| n.to_string()).collect(),
            timezone: timezone.to_string(),
        }
    }

    #[test]
    fn test_validated_lead_normalizes_numbers() {
        let validated = validated_lead(lead(&["+1 (555) 000-1111"], "America/Chicago")).unwrap();
        assert_eq!(validated.phone_numbers, vec!["+15550001111"]);
        assert_eq!(validated.timezone, "America/Chicago");
    }

    #[test]
    fn test_validated_lead_rejects_bad_numbers() {
        assert!(validated_lead(lead(&["5550001111"], "UTC")).is_err());
        assert!(validated_lead(lead(&[], "UTC")).is_err());
    }

    #[test]
    fn test_validated_lead_defaults_timezone() {
        let validated = validated_lead(lead(&["+15550001111"], "  ")).unwrap();
        assert_eq!(validated.timezone, crate::core::scheduler::DEFAULT_TIMEZONE);
    }

    #[test]
    fn test_validated_lead_resolves_region_codes() {
        let validated = validated_lead(lead(&["+15550001111"], "TX")).unwrap();
        assert_eq!(validated.timezone, "America/Chicago");

        let validated = validated_lead(lead(&["+15550001111"], "UTC")).unwrap();
        assert_eq!(validated.timezone, "UTC");
    }
}
