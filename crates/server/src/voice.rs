//! HTTP face of the turn executor, called by the voice transport once per
//! caller utterance.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use callquote_agent::runtime::{AgentRuntime, TurnReply, TurnRequest};
use callquote_core::domain::conversation::CallId;
use callquote_core::domain::tenant::TenantId;
use callquote_core::errors::{ApplicationError, DomainError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct VoiceState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    pub tenant_id: String,
    pub call_id: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub utterance: String,
}

#[derive(Debug, Serialize)]
pub struct VoiceError {
    pub error: String,
    pub correlation_id: String,
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new().route("/api/v1/voice/turn", post(handle_turn)).with_state(VoiceState { runtime })
}

async fn handle_turn(
    State(state): State<VoiceState>,
    headers: HeaderMap,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnReply>, (StatusCode, Json<VoiceError>)> {
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let tenant_id = body.tenant_id.trim();
    let call_id = body.call_id.trim();
    if tenant_id.is_empty() || call_id.is_empty() {
        warn!(
            event_name = "voice.turn.rejected",
            correlation_id = %correlation_id,
            "turn request without tenant_id or call_id"
        );
        let rejection = ApplicationError::from(DomainError::InvariantViolation(
            "tenant_id and call_id are required".to_string(),
        ))
        .into_interface(correlation_id);
        return Err(reject(rejection, "tenant_id and call_id are required"));
    }

    info!(
        event_name = "voice.turn.received",
        correlation_id = %correlation_id,
        call_id = %call_id,
        tenant_id = %tenant_id,
        "turn received"
    );

    let reply = state
        .runtime
        .handle_turn(TurnRequest {
            tenant_id: TenantId(tenant_id.to_string()),
            call_id: CallId(call_id.to_string()),
            customer_phone: body.customer_phone,
            utterance: body.utterance,
            correlation_id,
        })
        .await;
    Ok(Json(reply))
}

fn reject(error: InterfaceError, detail: &str) -> (StatusCode, Json<VoiceError>) {
    let status = match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(VoiceError { error: detail.to_string(), correlation_id: error.correlation_id().to_string() }),
    )
}
