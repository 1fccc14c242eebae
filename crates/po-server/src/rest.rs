// Read-only REST surface (spec §6 "REST surface (non-mutating)"):
// list/describe prompt objects, list/describe sessions, environment info.
// Grounded on everruns-api's `Router::new().route(...).with_state(state)`
// per-module shape (see threads.rs/sessions.rs).

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use po_core::capability::CapabilityKind;
use po_core::prompt_object::PromptObjectCapability;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/prompt-objects", get(list_prompt_objects))
        .route("/v1/prompt-objects/:name", get(get_prompt_object))
        .route("/v1/prompt-objects/:name/sessions", get(list_po_sessions))
        .route("/v1/sessions/:id", get(get_session))
        .route("/v1/environment", get(get_environment))
        .with_state(state)
}

#[derive(Serialize)]
struct PromptObjectSummary {
    name: String,
    description: String,
    capabilities: Vec<String>,
}

async fn list_prompt_objects(State(state): State<AppState>) -> Json<Vec<PromptObjectSummary>> {
    let pos = state.env.registry.list(Some(CapabilityKind::PromptObject));
    let summaries = pos
        .into_iter()
        .filter_map(|cap| {
            cap.as_any()
                .downcast_ref::<PromptObjectCapability>()
                .map(|po| {
                    let config = po.config();
                    PromptObjectSummary {
                        name: config.name,
                        description: config.description,
                        capabilities: config.capabilities,
                    }
                })
        })
        .collect();
    Json(summaries)
}

#[derive(Serialize)]
struct PromptObjectDetail {
    name: String,
    description: String,
    capabilities: Vec<String>,
    body: String,
}

async fn get_prompt_object(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PromptObjectDetail>, ApiError> {
    let capability = state
        .env
        .registry
        .get(&name)
        .ok_or_else(|| po_core::error::EngineError::PromptObjectNotFound(name.clone()))?;
    let po = capability
        .as_any()
        .downcast_ref::<PromptObjectCapability>()
        .ok_or_else(|| po_core::error::EngineError::config(format!("'{name}' is not a prompt object")))?;
    let config = po.config();
    Ok(Json(PromptObjectDetail {
        name: config.name,
        description: config.description,
        capabilities: config.capabilities,
        body: po.body(),
    }))
}

async fn list_po_sessions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<po_core::session::Session>>, ApiError> {
    let sessions = state.env.store.list_sessions(Some(&name), None).await?;
    Ok(Json(sessions))
}

#[derive(Serialize)]
struct SessionDetail {
    session: po_core::session::Session,
    messages: Vec<po_core::message::Message>,
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionDetail>, ApiError> {
    let session = state
        .env
        .store
        .get_session(id)
        .await?
        .ok_or(po_core::error::EngineError::SessionNotFound(id))?;
    let messages = state.env.store.get_messages(id).await?;
    Ok(Json(SessionDetail { session, messages }))
}

async fn get_environment(State(state): State<AppState>) -> Json<serde_json::Value> {
    let po_names: Vec<String> = state
        .env
        .registry
        .list(Some(CapabilityKind::PromptObject))
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    Json(json!({
        "root": state.env.root.display().to_string(),
        "default_model": state.env.default_model,
        "prompt_object_count": po_names.len(),
        "prompt_objects": po_names,
        "active_runs": state.runner.active_count().await,
    }))
}
