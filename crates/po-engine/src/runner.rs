// In-process runner: executes PO turns as tokio tasks (spec §5 "cooperative,
// single-process, with multiple concurrent tasks").
//
// Grounded on `everruns-worker::inprocess::InProcessRunner`: a
// `tokio::spawn` per invocation, a `JoinHandle` map for liveness tracking,
// and a cleanup block that removes both map entries once the task finishes.
// The teacher tracks cancellation as a bare `bool` flag polled by the
// workflow; here the engine already carries a real cooperative
// `CancellationToken` per turn (spec §5), so the runner just keeps a map of
// those tokens instead of a flag map and fires them on `cancel_run`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use po_core::capability::{extract_message, Capability, CapabilityKind};
use po_core::environment::Environment;
use po_core::error::{EngineError, EngineResult};
use po_core::session::Source;
use po_core::turn::{CancellationToken, TurnContext};

/// One PO invocation tracked by the runner: the session it's bound to (the
/// key used for liveness/cancellation lookups) and the task driving it.
pub struct Runner {
    active: Arc<RwLock<HashMap<Uuid, JoinHandle<()>>>>,
    cancellations: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a PO turn as a background task, returning the session id it
    /// runs in (resolved before the task is spawned so the caller can
    /// immediately track/cancel it).
    pub async fn start_run(
        &self,
        env: &Arc<Environment>,
        po_name: &str,
        incoming: serde_json::Value,
        session_id: Option<Uuid>,
        source: Source,
    ) -> EngineResult<Uuid> {
        let capability = env
            .registry
            .get(po_name)
            .ok_or_else(|| EngineError::PromptObjectNotFound(po_name.to_string()))?;
        if capability.kind() != CapabilityKind::PromptObject {
            return Err(EngineError::config(format!("'{po_name}' is not a prompt object")));
        }

        let session = match session_id {
            Some(id) => env
                .store
                .get_session(id)
                .await?
                .ok_or(EngineError::SessionNotFound(id))?,
            None => env.store.get_or_create_session(po_name, source).await?,
        };
        let run_id = session.id;

        let cancellation = CancellationToken::new();
        self.cancellations
            .lock()
            .await
            .insert(run_id, cancellation.clone());

        let ctx = TurnContext {
            env: env.clone(),
            session_id: Some(run_id),
            caller: None,
            source,
            cancellation,
            calling_po: None,
        };

        let message = match &incoming {
            serde_json::Value::String(s) => s.clone(),
            other => extract_message(other),
        };

        let active = self.active.clone();
        let cancellations = self.cancellations.clone();
        let po_name_owned = po_name.to_string();

        let handle = tokio::spawn(async move {
            info!(session_id = %run_id, po_name = %po_name_owned, "starting prompt object turn");
            let result = capability
                .receive(serde_json::json!({ "message": message }), ctx)
                .await;
            if let Err(e) = result {
                warn!(session_id = %run_id, po_name = %po_name_owned, error = %e, "turn ended with an error");
            }
            cancellations.lock().await.remove(&run_id);
            active.write().await.remove(&run_id);
        });

        self.active.write().await.insert(run_id, handle);
        Ok(run_id)
    }

    /// Cooperative cancellation (spec §5): fires the turn's token; the
    /// runner does not abort the task, letting the dispatcher unwind
    /// cleanly at its next check.
    pub async fn cancel_run(&self, session_id: Uuid) -> EngineResult<()> {
        if let Some(token) = self.cancellations.lock().await.get(&session_id) {
            token.cancel();
        }
        Ok(())
    }

    pub async fn is_running(&self, session_id: Uuid) -> bool {
        self.active.read().await.contains_key(&session_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use po_core::bus::{BusEvent, MessageBus};
    use po_core::config::PromptObjectConfig;
    use po_core::env_data::{EnvDataEntry, EnvDataSummary};
    use po_core::error::EngineResult as Result;
    use po_core::llm::{LlmCallConfig, LlmChunkStream, LlmMessage, LlmProvider, LlmRegistry, LlmStreamEvent};
    use po_core::message::Message;
    use po_core::prompt_object::PromptObjectCapability;
    use po_core::session::Session;
    use po_core::store::{SessionUpdate, SessionUsage, ThreadStore, ThreadTree};
    use std::sync::Mutex as StdMutex;

    /// Minimal `ThreadStore` double: enough session/message bookkeeping to
    /// drive a turn end to end, none of the search/usage/export machinery
    /// `po-storage` actually implements.
    #[derive(Default)]
    struct MemoryStore {
        sessions: StdMutex<HashMap<Uuid, Session>>,
        messages: StdMutex<HashMap<Uuid, Vec<Message>>>,
    }

    #[async_trait]
    impl ThreadStore for MemoryStore {
        async fn create_session(&self, session: Session) -> Result<Session> {
            self.sessions.lock().unwrap().insert(session.id, session.clone());
            Ok(session)
        }

        async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
            Ok(self.sessions.lock().unwrap().get(&id).cloned())
        }

        async fn get_or_create_session(&self, po_name: &str, source: Source) -> Result<Session> {
            if let Some(existing) = self
                .sessions
                .lock()
                .unwrap()
                .values()
                .find(|s| s.po_name == po_name)
                .cloned()
            {
                return Ok(existing);
            }
            let session = Session::new_root(po_name, source);
            self.sessions.lock().unwrap().insert(session.id, session.clone());
            Ok(session)
        }

        async fn update_session(&self, id: Uuid, update: SessionUpdate) -> Result<()> {
            if let Some(session) = self.sessions.lock().unwrap().get_mut(&id) {
                if let Some(name) = update.name {
                    session.name = Some(name);
                }
                session.updated_at = Utc::now();
            }
            Ok(())
        }

        async fn delete_session(&self, id: Uuid) -> Result<()> {
            self.sessions.lock().unwrap().remove(&id);
            self.messages.lock().unwrap().remove(&id);
            Ok(())
        }

        async fn list_sessions(&self, _po_name: Option<&str>, _source: Option<Source>) -> Result<Vec<Session>> {
            Ok(self.sessions.lock().unwrap().values().cloned().collect())
        }

        async fn list_all_sessions(&self, _source: Option<Source>) -> Result<Vec<Session>> {
            Ok(self.sessions.lock().unwrap().values().cloned().collect())
        }

        async fn count_sessions(&self) -> Result<i64> {
            Ok(self.sessions.lock().unwrap().len() as i64)
        }

        async fn add_message(&self, message: Message) -> Result<Uuid> {
            let id = message.id;
            self.messages
                .lock()
                .unwrap()
                .entry(message.session_id)
                .or_default()
                .push(message);
            Ok(id)
        }

        async fn get_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
            Ok(self.messages.lock().unwrap().get(&session_id).cloned().unwrap_or_default())
        }

        async fn clear_messages(&self, session_id: Uuid) -> Result<()> {
            self.messages.lock().unwrap().remove(&session_id);
            Ok(())
        }

        async fn count_messages(&self, session_id: Uuid) -> Result<i64> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .get(&session_id)
                .map(|m| m.len() as i64)
                .unwrap_or(0))
        }

        async fn get_thread_tree(&self, session_id: Uuid, include_messages: bool) -> Result<ThreadTree> {
            let session = self
                .get_session(session_id)
                .await?
                .ok_or(EngineError::SessionNotFound(session_id))?;
            let messages = if include_messages {
                Some(self.get_messages(session_id).await?)
            } else {
                None
            };
            Ok(ThreadTree {
                session,
                messages,
                children: Vec::new(),
            })
        }

        async fn get_thread_lineage(&self, session_id: Uuid) -> Result<Vec<Session>> {
            Ok(vec![self
                .get_session(session_id)
                .await?
                .ok_or(EngineError::SessionNotFound(session_id))?])
        }

        async fn resolve_root_thread(&self, session_id: Uuid) -> Result<Uuid> {
            Ok(session_id)
        }

        async fn get_child_threads(&self, _session_id: Uuid) -> Result<Vec<Session>> {
            Ok(Vec::new())
        }

        async fn search_sessions(&self, _query: Option<&str>, _source: Option<Source>) -> Result<Vec<Session>> {
            Ok(Vec::new())
        }

        async fn store_env_data(&self, _entry: EnvDataEntry) -> Result<()> {
            Ok(())
        }

        async fn update_env_data(
            &self,
            _root_thread_id: Uuid,
            _key: &str,
            _short_description: &str,
            _value: serde_json::Value,
            _stored_by: &str,
        ) -> Result<bool> {
            Ok(false)
        }

        async fn delete_env_data(&self, _root_thread_id: Uuid, _key: &str) -> Result<bool> {
            Ok(false)
        }

        async fn get_env_data(&self, _root_thread_id: Uuid, _key: &str) -> Result<Option<EnvDataEntry>> {
            Ok(None)
        }

        async fn list_env_data(&self, _root_thread_id: Uuid) -> Result<Vec<EnvDataSummary>> {
            Ok(Vec::new())
        }

        async fn export_session_markdown(&self, _id: Uuid) -> Result<String> {
            Ok(String::new())
        }

        async fn export_session_json(&self, _id: Uuid) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn export_thread_tree_markdown(&self, _id: Uuid) -> Result<String> {
            Ok(String::new())
        }

        async fn export_thread_tree_json(&self, _id: Uuid) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn session_usage(&self, _id: Uuid) -> Result<SessionUsage> {
            Ok(SessionUsage::default())
        }

        async fn thread_tree_usage(&self, _id: Uuid) -> Result<SessionUsage> {
            Ok(SessionUsage::default())
        }

        async fn record_event(&self, _event: BusEvent) -> Result<()> {
            Ok(())
        }

        async fn get_events_since(&self, _since: chrono::DateTime<Utc>) -> Result<Vec<BusEvent>> {
            Ok(Vec::new())
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn provider_name(&self) -> &str {
            "echo"
        }

        async fn chat_stream(
            &self,
            _system: &str,
            _messages: Vec<LlmMessage>,
            _config: &LlmCallConfig,
        ) -> Result<LlmChunkStream> {
            use futures::stream;
            let events = vec![
                Ok(LlmStreamEvent::TextDelta("hi".to_string())),
                Ok(LlmStreamEvent::Done(Default::default())),
            ];
            Ok(Box::pin(stream::iter(events)))
        }
    }

    async fn test_env() -> Arc<Environment> {
        let store: Arc<dyn ThreadStore> = Arc::new(MemoryStore::default());
        let bus = Arc::new(MessageBus::new());
        let llm = LlmRegistry::new("echo", Arc::new(EchoProvider));
        let env = Environment::new(store, bus, llm, "echo-model", std::env::temp_dir());
        env.registry
            .register(Arc::new(PromptObjectCapability::new(
                PromptObjectConfig::new("greeter"),
                "You are friendly.".to_string(),
            )))
            .unwrap();
        env
    }

    #[tokio::test]
    async fn start_run_tracks_liveness_until_completion() {
        let env = test_env().await;
        let runner = Runner::new();
        let session_id = runner
            .start_run(&env, "greeter", serde_json::json!("hello"), None, Source::Api)
            .await
            .unwrap();

        for _ in 0..50 {
            if !runner.is_running(session_id).await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!runner.is_running(session_id).await);
        assert_eq!(runner.active_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_po_is_rejected_before_spawning() {
        let env = test_env().await;
        let runner = Runner::new();
        let err = runner
            .start_run(&env, "nope", serde_json::json!("hi"), None, Source::Api)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PromptObjectNotFound(_)));
    }
}
