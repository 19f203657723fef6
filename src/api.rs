//! REST API Server for the Relationship Copilot
//!
//! Thin HTTP layer over the orchestrator, dispatcher and conversation
//! service. Every response uses the `ApiResponse` wrapper.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::agents::{OPPORTUNITY_AGENT, RISK_COMPLIANCE_AGENT};
use crate::app::Copilot;
use crate::dispatcher::{ReminderRequest, UpdateRequest};
use crate::error::OrchestrationError;
use crate::models::{FicheDeVisite, MeetingInput, NormalizedSnapshot};
use crate::orchestrator::DEFAULT_LANGUAGE;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct PrepPackRequest {
    pub client_id: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AfterMeetingRequest {
    pub client_id: String,
    #[serde(flatten)]
    pub meeting: MeetingInput,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

/// Agent-to-agent message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2AEnvelope {
    pub message_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub payload: Value,
}

const A2A_REQUIRED_KEYS: [&str; 4] = ["message_id", "from_agent", "to_agent", "payload"];

/// Both remote agents work from a snapshot and a brief.
#[derive(Debug, Deserialize)]
struct A2APayload {
    snapshot: NormalizedSnapshot,
    brief: FicheDeVisite,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn status_for(e: &OrchestrationError) -> StatusCode {
    match e {
        OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestrationError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::Generation { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(route: &str, result: crate::Result<T>) -> ApiResult {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            error!(route, kind = e.kind(), "Request failed: {}", e);
            (status_for(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

fn bad_request(message: String) -> ApiResult {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message)))
}

/// Decode a JSON body, answering malformed input with a wrapped 400.
fn parse_body<T: DeserializeOwned>(
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> std::result::Result<T, ApiResult> {
    let Json(body) = payload.map_err(|e| bad_request(e.body_text()))?;
    serde_json::from_value(body).map_err(|e| bad_request(format!("Invalid request body: {}", e)))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub copilot: Copilot,
}

/// =============================
/// Endpoints
/// =============================

async fn health(State(state): State<ApiState>) -> ApiResult {
    (
        StatusCode::OK,
        Json(ApiResponse::success(json!({
            "status": "ok",
            "model": state.copilot.model,
        }))),
    )
}

async fn prep_pack(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let req: PrepPackRequest = match parse_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    info!(client_id = %req.client_id, "Received prep pack request");

    let language = req.language.as_deref().unwrap_or(DEFAULT_LANGUAGE);
    let result = state
        .copilot
        .orchestrator
        .build_prep_pack(&req.client_id, language)
        .await;
    respond("/prep-pack", result)
}

async fn after_meeting(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let req: AfterMeetingRequest = match parse_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    info!(client_id = %req.client_id, "Received after-meeting request");

    let result = state
        .copilot
        .orchestrator
        .update_case_after_meeting(&req.client_id, req.meeting)
        .await;
    respond("/after-meeting", result)
}

async fn chat(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let req: ChatRequest = match parse_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };

    let result = state
        .copilot
        .conversation
        .process_session_message(&req.session_id, &req.message)
        .await;
    respond("/chat", result)
}

async fn create_reminder(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let req: ReminderRequest = match parse_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };

    let result = state.copilot.dispatcher.create_reminder(req).await;
    respond("/reminders", result)
}

async fn log_update(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let req: UpdateRequest = match parse_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };

    let result = state.copilot.dispatcher.log_update(req).await;
    respond("/updates", result)
}

/// =============================
/// A2A Endpoint
/// =============================

async fn a2a_message(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let body: Value = match parse_body(payload) {
        Ok(body) => body,
        Err(rejection) => return rejection,
    };

    let missing: Vec<&str> = A2A_REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| body.get(key).is_none())
        .collect();
    if !missing.is_empty() {
        return bad_request(format!(
            "Invalid A2A envelope, missing: {}",
            missing.join(", ")
        ));
    }

    let envelope: A2AEnvelope = match serde_json::from_value(body) {
        Ok(envelope) => envelope,
        Err(e) => return bad_request(format!("Invalid A2A envelope: {}", e)),
    };

    info!(
        message_id = %envelope.message_id,
        from = %envelope.from_agent,
        to = %envelope.to_agent,
        "Received A2A message"
    );

    if envelope.to_agent != OPPORTUNITY_AGENT && envelope.to_agent != RISK_COMPLIANCE_AGENT {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!(
                "Agent {} not found",
                envelope.to_agent
            ))),
        );
    }

    let outcome = run_a2a_agent(&state, &envelope).await;
    let (status, output) = match outcome {
        Ok(output) => ("success", output),
        Err(e) => {
            error!(message_id = %envelope.message_id, "A2A agent execution failed: {}", e);
            ("error", json!({"error": e.to_string()}))
        }
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(json!({
            "message_id": format!("{}_resp", envelope.message_id),
            "reply_to": envelope.message_id,
            "from_agent": envelope.to_agent,
            "to_agent": envelope.from_agent,
            "status": status,
            "payload": output,
            "metadata": {
                "service": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        }))),
    )
}

async fn run_a2a_agent(state: &ApiState, envelope: &A2AEnvelope) -> crate::Result<Value> {
    let payload: A2APayload = serde_json::from_value(envelope.payload.clone())
        .map_err(|e| OrchestrationError::Validation(format!("Invalid A2A payload: {}", e)))?;
    let agents = state.copilot.orchestrator.agents();

    if envelope.to_agent == RISK_COMPLIANCE_AGENT {
        let mut assessment = agents.assess_risk(&payload.snapshot, &payload.brief).await?;
        assessment.requires_human_approval = true;
        Ok(serde_json::to_value(assessment)?)
    } else {
        let plan = agents
            .plan_opportunities(&payload.snapshot, &payload.brief)
            .await?;
        Ok(serde_json::to_value(plan)?)
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(copilot: Copilot) -> Router {
    let state = ApiState { copilot };

    Router::new()
        .route("/health", get(health))
        .route("/prep-pack", post(prep_pack))
        .route("/after-meeting", post(after_meeting))
        .route("/chat", post(chat))
        .route("/reminders", post(create_reminder))
        .route("/updates", post(log_update))
        .route("/a2a/message", post(a2a_message))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    copilot: Copilot,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(copilot);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
