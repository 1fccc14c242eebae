// Human Queue (spec §4.7)
//
// A process-wide registry of pending `HumanRequest`s. Delivery to a
// suspended turn is cooperative: the engine awaits a per-request one-shot
// completion signal, grounded in
// `everruns-worker::inprocess::InProcessRunner`'s cancel-flag bookkeeping
// (`Arc<Mutex<HashMap<...>>>`) but keyed by request id instead of session id.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanRequestState {
    Pending,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanRequest {
    pub id: Uuid,
    pub po_name: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub state: HumanRequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// What a suspended turn resumes with.
#[derive(Debug, Clone)]
pub enum HumanOutcome {
    Answered(String),
    Cancelled,
}

struct Entry {
    request: HumanRequest,
    completion: Option<oneshot::Sender<HumanOutcome>>,
}

#[derive(Default)]
pub struct HumanQueue {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl HumanQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request and return its id plus the receiver half the
    /// caller awaits to resume the turn.
    pub fn enqueue(
        &self,
        po_name: impl Into<String>,
        question: impl Into<String>,
        options: Option<Vec<String>>,
    ) -> (Uuid, oneshot::Receiver<HumanOutcome>) {
        let id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        let request = HumanRequest {
            id,
            po_name: po_name.into(),
            question: question.into(),
            options,
            created_at: Utc::now(),
            state: HumanRequestState::Pending,
            response: None,
        };
        self.entries.lock().unwrap().insert(
            id,
            Entry {
                request,
                completion: Some(tx),
            },
        );
        (id, rx)
    }

    pub fn pending(&self, po_name: Option<&str>) -> Vec<HumanRequest> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.request.state == HumanRequestState::Pending)
            .filter(|e| po_name.is_none_or(|name| e.request.po_name == name))
            .map(|e| e.request.clone())
            .collect()
    }

    /// Marks resolved and delivers `response` to the suspended turn.
    /// Idempotent: a second response on an already-resolved request fails.
    pub fn respond(&self, request_id: Uuid, response: impl Into<String>) -> EngineResult<()> {
        let mut guard = self.entries.lock().unwrap();
        let entry = guard
            .get_mut(&request_id)
            .ok_or_else(|| EngineError::resolution(request_id.to_string()))?;
        if entry.request.state != HumanRequestState::Pending {
            return Err(EngineError::AlreadyResolved(request_id));
        }
        let response = response.into();
        entry.request.state = HumanRequestState::Resolved;
        entry.request.response = Some(response.clone());
        if let Some(tx) = entry.completion.take() {
            let _ = tx.send(HumanOutcome::Answered(response));
        }
        Ok(())
    }

    pub fn cancel(&self, request_id: Uuid) -> EngineResult<()> {
        let mut guard = self.entries.lock().unwrap();
        let entry = guard
            .get_mut(&request_id)
            .ok_or_else(|| EngineError::resolution(request_id.to_string()))?;
        if entry.request.state != HumanRequestState::Pending {
            return Err(EngineError::AlreadyResolved(request_id));
        }
        entry.request.state = HumanRequestState::Cancelled;
        if let Some(tx) = entry.completion.take() {
            let _ = tx.send(HumanOutcome::Cancelled);
        }
        Ok(())
    }

    pub fn get(&self, request_id: Uuid) -> Option<HumanRequest> {
        self.entries
            .lock()
            .unwrap()
            .get(&request_id)
            .map(|e| e.request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn respond_delivers_answer_to_receiver() {
        let queue = HumanQueue::new();
        let (id, rx) = queue.enqueue("greeter", "Proceed?", Some(vec!["yes".into(), "no".into()]));
        assert_eq!(queue.pending(None).len(), 1);
        queue.respond(id, "yes").unwrap();
        match rx.await.unwrap() {
            HumanOutcome::Answered(text) => assert_eq!(text, "yes"),
            HumanOutcome::Cancelled => panic!("expected answer"),
        }
        assert_eq!(queue.pending(None).len(), 0);
    }

    #[test]
    fn second_respond_is_rejected() {
        let queue = HumanQueue::new();
        let (id, _rx) = queue.enqueue("greeter", "Proceed?", None);
        queue.respond(id, "yes").unwrap();
        let err = queue.respond(id, "no").unwrap_err();
        assert!(matches!(err, EngineError::AlreadyResolved(_)));
    }

    #[tokio::test]
    async fn cancel_resumes_with_cancellation() {
        let queue = HumanQueue::new();
        let (id, rx) = queue.enqueue("greeter", "Proceed?", None);
        queue.cancel(id).unwrap();
        assert!(matches!(rx.await.unwrap(), HumanOutcome::Cancelled));
    }
}
