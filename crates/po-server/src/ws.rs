// WebSocket connector (spec §4.9, §6 "WebSocket message vocabulary").
//
// Grounded on `everruns-api::events::stream_events`'s "one connection, one
// background forwarding task" shape, generalized from SSE-over-polling to a
// genuine push subscriber: a `Subscriber` impl that forwards bus callbacks
// (which must stay non-blocking, spec §4.8) onto an unbounded channel a
// dedicated writer task drains onto the socket.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use po_core::bus::{BusEvent, PoStatus, Subscriber};
use po_core::capability::CapabilityKind;
use po_core::human::HumanRequest;
use po_core::prompt_object::PromptObjectCapability;
use po_core::session::{Session, Source};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new().route("/v1/ws", get(upgrade)).with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Client -> server command vocabulary (spec §6).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    SendMessage {
        po_name: String,
        message: String,
        #[serde(default)]
        session_id: Option<Uuid>,
    },
    RespondToNotification {
        request_id: Uuid,
        response: String,
    },
    UpdatePo {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        capabilities: Option<Vec<String>>,
        #[serde(default)]
        body: Option<String>,
    },
    CreateSession {
        po_name: String,
        #[serde(default)]
        name: Option<String>,
    },
    SwitchSession {
        session_id: Uuid,
    },
    CreateThread {
        po_name: String,
        #[serde(default)]
        parent_session_id: Option<Uuid>,
        #[serde(default)]
        name: Option<String>,
    },
    UpdatePrompt {
        name: String,
        body: String,
    },
    GetSessionUsage {
        session_id: Uuid,
        #[serde(default)]
        include_tree: bool,
    },
    ExportThread {
        session_id: Uuid,
        #[serde(default = "default_export_format")]
        format: String,
    },
    SwitchLlm {
        session_id: Uuid,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        provider: Option<String>,
    },
    RequestEnvData {
        root_thread_id: Uuid,
        #[serde(default)]
        key: Option<String>,
    },
}

fn default_export_format() -> String {
    "markdown".to_string()
}

/// Server -> client event vocabulary (spec §6). `cancel`/`bus_message`
/// share a tag namespace with the command vocabulary only conceptually —
/// these are always outbound.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerEvent {
    PoState {
        po_name: String,
        status: PoStatus,
    },
    Stream {
        session_id: Uuid,
        po_name: String,
        chunk: String,
    },
    StreamEnd {
        session_id: Uuid,
        po_name: String,
    },
    BusMessage {
        event: BusEvent,
    },
    Notification {
        request: HumanRequest,
    },
    NotificationResolved {
        request_id: Uuid,
    },
    SessionUsage {
        session_id: Uuid,
        usage: po_core::store::SessionUsage,
    },
    ThreadExport {
        session_id: Uuid,
        format: String,
        content: String,
    },
    EnvDataChange {
        root_thread_id: Uuid,
        key: String,
    },
    Error {
        message: String,
    },
}

/// Forwards bus callbacks (which must not block, spec §4.8) onto an
/// unbounded channel; the writer task drains it and serializes to the
/// socket.
struct WsSubscriber {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Subscriber for WsSubscriber {
    fn on_message(&self, event: &BusEvent) {
        let _ = self.tx.send(ServerEvent::BusMessage { event: event.clone() });
    }

    fn on_po_state_change(&self, po_name: &str, status: PoStatus) {
        let _ = self.tx.send(ServerEvent::PoState {
            po_name: po_name.to_string(),
            status,
        });
    }

    fn on_stream_chunk(&self, session_id: Uuid, po_name: &str, chunk: &str) {
        let _ = self.tx.send(ServerEvent::Stream {
            session_id,
            po_name: po_name.to_string(),
            chunk: chunk.to_string(),
        });
    }

    fn on_stream_end(&self, session_id: Uuid, po_name: &str) {
        let _ = self.tx.send(ServerEvent::StreamEnd {
            session_id,
            po_name: po_name.to_string(),
        });
    }

    fn on_notification(&self, request: &HumanRequest) {
        let _ = self.tx.send(ServerEvent::Notification { request: request.clone() });
    }

    fn on_notification_resolved(&self, request_id: Uuid) {
        let _ = self.tx.send(ServerEvent::NotificationResolved { request_id });
    }

    fn on_env_data_change(&self, root_thread_id: Uuid, key: &str) {
        let _ = self.tx.send(ServerEvent::EnvDataChange {
            root_thread_id,
            key: key.to_string(),
        });
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let subscriber_id = state.bus().subscribe(Arc::new(WsSubscriber { tx: tx.clone() }));

    // Spec §4.9: send current PO state and pending notifications before
    // any live event.
    for po in state.env.registry.list(Some(CapabilityKind::PromptObject)) {
        let _ = tx.send(ServerEvent::PoState {
            po_name: po.name().to_string(),
            status: PoStatus::Idle,
        });
    }
    for request in state.env.human_queue.pending(None) {
        let _ = tx.send(ServerEvent::Notification { request });
    }

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else { continue };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let WsMessage::Text(text) = message else { continue };
        let command: ClientCommand = match serde_json::from_str(&text) {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(ServerEvent::Error { message: format!("malformed command: {e}") });
                continue;
            }
        };
        if let Err(e) = dispatch(&state, &tx, command).await {
            let _ = tx.send(ServerEvent::Error { message: e.user_message() });
        }
    }

    state.bus().unsubscribe(subscriber_id);
    writer.abort();
}

async fn dispatch(
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    command: ClientCommand,
) -> po_core::error::EngineResult<()> {
    match command {
        ClientCommand::SendMessage { po_name, message, session_id } => {
            state
                .runner
                .start_run(&state.env, &po_name, serde_json::json!(message), session_id, Source::Web)
                .await?;
        }
        ClientCommand::RespondToNotification { request_id, response } => {
            state.env.human_queue.respond(request_id, response)?;
        }
        ClientCommand::UpdatePo { name, description, capabilities, body } => {
            update_po(state, &name, description, capabilities, body).await?;
        }
        ClientCommand::CreateSession { po_name, name } => {
            let mut session = Session::new_root(&po_name, Source::Web);
            session.name = name;
            let session = state.env.store.create_session(session).await?;
            let _ = tx.send(ServerEvent::BusMessage {
                event: state.bus().publish("server", &po_name, format!("created session {}", session.id), Some(session.id)),
            });
        }
        ClientCommand::SwitchSession { session_id } => {
            send_thread_export(state, tx, session_id, "json").await?;
        }
        ClientCommand::CreateThread { po_name, parent_session_id, name } => {
            let mut session = match parent_session_id {
                Some(parent_id) => {
                    let parent = state
                        .env
                        .store
                        .get_session(parent_id)
                        .await?
                        .ok_or(po_core::error::EngineError::SessionNotFound(parent_id))?;
                    Session::new_delegation(&po_name, parent_id, &parent.po_name, Uuid::nil(), Source::Web)
                }
                None => Session::new_root(&po_name, Source::Web),
            };
            session.name = name;
            state.env.store.create_session(session).await?;
        }
        ClientCommand::UpdatePrompt { name, body } => {
            update_po(state, &name, None, None, Some(body)).await?;
        }
        ClientCommand::GetSessionUsage { session_id, include_tree } => {
            let usage = if include_tree {
                state.env.store.thread_tree_usage(session_id).await?
            } else {
                state.env.store.session_usage(session_id).await?
            };
            let _ = tx.send(ServerEvent::SessionUsage { session_id, usage });
        }
        ClientCommand::ExportThread { session_id, format } => {
            send_thread_export(state, tx, session_id, &format).await?;
        }
        ClientCommand::SwitchLlm { session_id, model, provider } => {
            // po-core's dispatcher always resolves the environment-wide
            // default provider/model (see Environment::default_model,
            // LlmRegistry::resolve(None)); there is no per-session override
            // point to hook into without changing po-core. Persisted here
            // so the choice is visible to clients and survives reconnects;
            // wiring it into dispatch is an open question for a future
            // engine change.
            let metadata = serde_json::json!({ "requested_model": model, "requested_provider": provider });
            state
                .env
                .store
                .update_session(
                    session_id,
                    po_core::store::SessionUpdate { metadata: Some(metadata), ..Default::default() },
                )
                .await?;
        }
        ClientCommand::RequestEnvData { root_thread_id, key } => {
            match key {
                Some(key) => {
                    if let Some(entry) = state.env.store.get_env_data(root_thread_id, &key).await? {
                        let _ = tx.send(ServerEvent::EnvDataChange { root_thread_id, key: entry.key });
                    }
                }
                None => {
                    for summary in state.env.store.list_env_data(root_thread_id).await? {
                        let _ = tx.send(ServerEvent::EnvDataChange { root_thread_id, key: summary.key });
                    }
                }
            }
        }
    }
    Ok(())
}

async fn send_thread_export(
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    session_id: Uuid,
    format: &str,
) -> po_core::error::EngineResult<()> {
    let content = if format == "json" {
        state.env.store.export_thread_tree_json(session_id).await?.to_string()
    } else {
        state.env.store.export_thread_tree_markdown(session_id).await?
    };
    let _ = tx.send(ServerEvent::ThreadExport {
        session_id,
        format: format.to_string(),
        content,
    });
    Ok(())
}

/// Shared by `update_po`/`update_prompt`: merge the provided fields into
/// the PO's current config/body, reload it in the registry, and persist to
/// disk (spec §4.1 `reload_po`, §4.4 `modify_prompt`).
async fn update_po(
    state: &AppState,
    name: &str,
    description: Option<String>,
    capabilities: Option<Vec<String>>,
    body: Option<String>,
) -> po_core::error::EngineResult<()> {
    let capability = state
        .env
        .registry
        .get(name)
        .ok_or_else(|| po_core::error::EngineError::PromptObjectNotFound(name.to_string()))?;
    let po = capability
        .as_any()
        .downcast_ref::<PromptObjectCapability>()
        .ok_or_else(|| po_core::error::EngineError::config(format!("'{name}' is not a prompt object")))?;

    let mut config = po.config();
    if let Some(description) = description {
        config.description = description;
    }
    if let Some(capabilities) = capabilities {
        config.capabilities = capabilities;
    }
    let new_body = body.unwrap_or_else(|| po.body());

    let file = po_core::config::PromptObjectFile { config: config.clone(), body: new_body.clone() };
    let rendered = po_core::loader::render_po_file(&file)?;
    let path = po_core::loader::po_file_path(&state.env.root, name);
    tokio::fs::write(&path, rendered)
        .await
        .map_err(|e| po_core::error::EngineError::store(format!("failed to write {}: {e}", path.display())))?;

    po.replace(config, new_body);
    Ok(())
}
