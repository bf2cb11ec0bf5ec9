//! HTTP surface over the orchestration engines.
//!
//! Thin handlers only: every rule lives in the engines, and their typed
//! errors are mapped onto status codes here. Rule violations answer 422
//! with the allowed alternatives spelled out in the message; races answer
//! 409.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::Deserialize;

use crate::errors::{MissionError, OrchestratorError, SignalError, WidgetError};
use crate::missions::{MissionEngine, NewMission};
use crate::phase::{PillarKind, StrategyPhase};
use crate::pillars::Orchestrator;
use crate::signals::{NewDecision, NewSignal, SignalEngine};
use crate::store::DbHandle;
use crate::store::models::{DebriefData, DecisionStatus, MissionStatus, SignalStatus};
use crate::widgets::WidgetEngine;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub orchestrator: Orchestrator,
    pub signals: SignalEngine,
    pub missions: MissionEngine,
    pub widgets: WidgetEngine,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

fn default_actor() -> String {
    "system".to_string()
}

#[derive(Deserialize)]
pub struct CreateStrategyRequest {
    pub name: String,
    #[serde(default)]
    pub survey: serde_json::Value,
}

#[derive(Deserialize)]
pub struct AdvancePhaseRequest {
    pub to: StrategyPhase,
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Deserialize)]
pub struct EditUnitRequest {
    pub content: serde_json::Value,
    pub summary: Option<String>,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Deserialize)]
pub struct RestoreRequest {
    pub version: i64,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Deserialize)]
pub struct EnrichmentRequest {
    pub synthesis: serde_json::Value,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Deserialize)]
pub struct CreateSignalRequest {
    #[serde(flatten)]
    pub signal: NewSignal,
}

#[derive(Deserialize)]
pub struct MutateSignalRequest {
    pub to: SignalStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Deserialize)]
pub struct UpdateDecisionRequest {
    pub status: DecisionStatus,
}

#[derive(Deserialize)]
pub struct TransitionMissionRequest {
    pub to: MissionStatus,
}

#[derive(Deserialize)]
pub struct DebriefRequest {
    #[serde(flatten)]
    pub data: DebriefData,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Deserialize)]
pub struct CreateBriefRequest {
    pub locale: String,
    pub doc_type: String,
    pub source_kinds: Vec<PillarKind>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Internal(String),
    Orchestrator(OrchestratorError),
    Signal(SignalError),
    Mission(MissionError),
    Widget(WidgetError),
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self::Orchestrator(e)
    }
}

impl From<SignalError> for ApiError {
    fn from(e: SignalError) -> Self {
        Self::Signal(e)
    }
}

impl From<MissionError> for ApiError {
    fn from(e: MissionError) -> Self {
        Self::Mission(e)
    }
}

impl From<WidgetError> for ApiError {
    fn from(e: WidgetError) -> Self {
        Self::Widget(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Orchestrator(e) => {
                let status = match &e {
                    OrchestratorError::StrategyNotFound { .. }
                    | OrchestratorError::UnitNotFound { .. }
                    | OrchestratorError::SnapshotNotFound { .. } => StatusCode::NOT_FOUND,
                    OrchestratorError::AlreadyGenerating { .. } => StatusCode::CONFLICT,
                    OrchestratorError::KindLocked { .. }
                    | OrchestratorError::PhaseTransition(_)
                    | OrchestratorError::PhaseRequirementsUnmet { .. }
                    | OrchestratorError::EnrichmentLocked { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    OrchestratorError::Generation { .. } => StatusCode::BAD_GATEWAY,
                    OrchestratorError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::Signal(e) => {
                let status = match &e {
                    SignalError::StrategyNotFound { .. }
                    | SignalError::SignalNotFound { .. }
                    | SignalError::DecisionNotFound { .. } => StatusCode::NOT_FOUND,
                    SignalError::InvalidStatus { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    SignalError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::Mission(e) => {
                let status = match &e {
                    MissionError::StrategyNotFound { .. }
                    | MissionError::MissionNotFound { .. } => StatusCode::NOT_FOUND,
                    MissionError::DebriefAlreadyExists { .. } => StatusCode::CONFLICT,
                    MissionError::InvalidTransition { .. }
                    | MissionError::DebriefRequired { .. }
                    | MissionError::DebriefWrongState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    MissionError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::Widget(e) => {
                let status = match &e {
                    WidgetError::StrategyNotFound { .. } | WidgetError::UnknownWidget { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    WidgetError::MissingUnits { .. } | WidgetError::PhaseTooEarly { .. } => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    WidgetError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

fn parse_kind(raw: &str) -> Result<PillarKind, ApiError> {
    PillarKind::from_str(raw).map_err(ApiError::BadRequest)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/strategies", get(list_strategies).post(create_strategy))
        .route(
            "/api/strategies/{id}",
            get(get_strategy).delete(delete_strategy),
        )
        .route("/api/strategies/{id}/advance", post(advance_phase))
        .route(
            "/api/strategies/{id}/units/{kind}/generate",
            post(generate_unit),
        )
        .route("/api/strategies/{id}/units/{kind}", put(edit_unit))
        .route(
            "/api/strategies/{id}/units/{kind}/snapshots",
            get(list_snapshots),
        )
        .route(
            "/api/strategies/{id}/units/{kind}/restore",
            post(restore_snapshot),
        )
        .route("/api/strategies/{id}/enrichment", post(record_enrichment))
        .route(
            "/api/strategies/{id}/signals",
            get(list_signals).post(create_signal),
        )
        .route(
            "/api/strategies/{id}/signals/from-audit",
            post(signals_from_audit),
        )
        .route("/api/signals/{id}", get(get_signal))
        .route("/api/signals/{id}/mutate", post(mutate_signal))
        .route("/api/signals/{id}/history", get(signal_history))
        .route(
            "/api/strategies/{id}/decisions",
            get(list_decisions).post(create_decision),
        )
        .route("/api/decisions/{id}", patch(update_decision))
        .route(
            "/api/strategies/{id}/missions",
            get(list_missions).post(create_mission),
        )
        .route("/api/missions/{id}", get(get_mission))
        .route("/api/missions/{id}/transition", post(transition_mission))
        .route(
            "/api/missions/{id}/debrief",
            get(get_debrief).post(complete_debrief),
        )
        .route("/api/strategies/{id}/widgets", get(list_widgets))
        .route(
            "/api/strategies/{id}/widgets/compute",
            post(compute_available_widgets),
        )
        .route(
            "/api/strategies/{id}/widgets/{widget}/compute",
            post(compute_widget),
        )
        .route(
            "/api/strategies/{id}/briefs",
            get(list_briefs).post(create_brief),
        )
        .route("/api/pricing", get(list_pricing))
        .route("/health", get(health_check))
}

// ── Strategy handlers ─────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_strategy(
    State(state): State<SharedState>,
    Json(req): Json<CreateStrategyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let survey = if req.survey.is_null() {
        serde_json::json!({})
    } else {
        req.survey
    };
    let strategy = state.orchestrator.create_strategy(req.name, survey).await?;
    Ok((StatusCode::CREATED, Json(strategy)))
}

async fn list_strategies(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.list_strategies().await?))
}

async fn get_strategy(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.get_overview(&id).await?))
}

async fn delete_strategy(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.delete_strategy(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn advance_phase(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<AdvancePhaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.advance_phase(&id, req.to).await?))
}

// ── Unit handlers ─────────────────────────────────────────────────────

async fn generate_unit(
    State(state): State<SharedState>,
    Path((id, kind)): Path<(String, String)>,
    Json(req): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    let unit = state.orchestrator.generate_unit(&id, kind, &req.actor).await?;
    Ok((StatusCode::ACCEPTED, Json(unit)))
}

async fn edit_unit(
    State(state): State<SharedState>,
    Path((id, kind)): Path<(String, String)>,
    Json(req): Json<EditUnitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    let unit = state
        .orchestrator
        .edit_unit(&id, kind, req.content, req.summary, &req.actor)
        .await?;
    Ok(Json(unit))
}

async fn list_snapshots(
    State(state): State<SharedState>,
    Path((id, kind)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.orchestrator.list_snapshots(&id, kind).await?))
}

async fn restore_snapshot(
    State(state): State<SharedState>,
    Path((id, kind)): Path<(String, String)>,
    Json(req): Json<RestoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    let unit = state
        .orchestrator
        .restore_snapshot(&id, kind, req.version, &req.actor)
        .await?;
    Ok(Json(unit))
}

async fn record_enrichment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<EnrichmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let enrichment = state
        .orchestrator
        .record_enrichment(&id, req.synthesis, &req.actor)
        .await?;
    Ok((StatusCode::CREATED, Json(enrichment)))
}

// ── Signal handlers ───────────────────────────────────────────────────

async fn create_signal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<CreateSignalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.signals.create(&id, req.signal).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn list_signals(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.signals.list(&id).await?))
}

async fn signals_from_audit(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let signals = state.signals.bulk_create_from_audit(&id).await?;
    Ok((StatusCode::CREATED, Json(signals)))
}

async fn get_signal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.signals.get(&id).await?))
}

async fn mutate_signal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<MutateSignalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .signals
        .mutate(&id, req.to, &req.reason, &req.actor)
        .await?;
    Ok(Json(outcome))
}

async fn signal_history(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.signals.history(&id).await?))
}

async fn list_decisions(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.signals.list_decisions(&id).await?))
}

async fn create_decision(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<NewDecision>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = state.signals.create_decision(&id, req).await?;
    Ok((StatusCode::CREATED, Json(decision)))
}

async fn update_decision(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.signals.set_decision_status(&id, req.status).await?))
}

// ── Mission handlers ──────────────────────────────────────────────────

async fn create_mission(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<NewMission>,
) -> Result<impl IntoResponse, ApiError> {
    let mission = state.missions.create(&id, req).await?;
    Ok((StatusCode::CREATED, Json(mission)))
}

async fn list_missions(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.missions.list(&id).await?))
}

async fn get_mission(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.missions.get(&id).await?))
}

async fn transition_mission(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<TransitionMissionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.missions.transition(&id, req.to).await?))
}

async fn complete_debrief(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<DebriefRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let debrief = state.missions.complete_debrief(&id, req.data, &req.actor).await?;
    Ok((StatusCode::CREATED, Json(debrief)))
}

async fn get_debrief(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.missions.get_debrief(&id).await? {
        Some(debrief) => Ok(Json(debrief).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

// ── Widget handlers ───────────────────────────────────────────────────

async fn list_widgets(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.widgets.list(&id).await?))
}

async fn compute_widget(
    State(state): State<SharedState>,
    Path((id, widget)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.widgets.compute(&id, &widget).await?))
}

async fn compute_available_widgets(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.widgets.compute_available(&id).await?))
}

// ── Brief and pricing handlers ────────────────────────────────────────

async fn create_brief(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<CreateBriefRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let brief = state
        .db
        .call(move |db| {
            if db.get_strategy(&id)?.is_none() {
                return Ok(Err(OrchestratorError::StrategyNotFound { id }));
            }
            Ok(Ok(db.create_brief(&id, &req.locale, &req.doc_type, &req.source_kinds)?))
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok((StatusCode::CREATED, Json(brief)))
}

async fn list_briefs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let briefs = state
        .db
        .call(move |db| db.list_briefs(&id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(briefs))
}

async fn list_pricing(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let pricing = state
        .db
        .call(|db| db.list_pricing())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(pricing))
}
