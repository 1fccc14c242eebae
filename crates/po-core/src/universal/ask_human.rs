use async_trait::async_trait;

use crate::capability::{Capability, CapabilityKind, CapabilityOutput};
use crate::error::{EngineError, EngineResult};
use crate::human::HumanOutcome;
use crate::turn::TurnContext;

use super::required_str;

/// `ask_human` (spec §4.4, §4.7): enqueue a human request, suspend the
/// turn, resume with the human's answer as the tool result. Suspension is
/// modeled as a plain `.await` on the queue's one-shot receiver — no
/// dispatcher-level suspend/resume bookkeeping is needed.
pub struct AskHuman;

#[async_trait]
impl Capability for AskHuman {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn description(&self) -> String {
        "Ask a human a question and wait for their response.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "description": "The question to ask"},
                "options": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional fixed set of acceptable answers"
                }
            },
            "required": ["question"]
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(
        &self,
        arguments: serde_json::Value,
        ctx: TurnContext,
    ) -> EngineResult<CapabilityOutput> {
        let question = match required_str(&arguments, "question") {
            Ok(q) => q,
            Err(msg) => return Ok(CapabilityOutput::text(msg)),
        };
        let options = arguments.get("options").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        });

        let po_name = ctx.calling_po.clone().unwrap_or_default();
        let (id, rx) = ctx.env.human_queue.enqueue(po_name, question, options);
        if let Some(request) = ctx.env.human_queue.get(id) {
            ctx.env.bus.notify_notification(&request);
        }

        tokio::select! {
            outcome = rx => {
                ctx.env.bus.notify_notification_resolved(id);
                match outcome {
                    Ok(HumanOutcome::Answered(text)) => Ok(CapabilityOutput::text(text)),
                    Ok(HumanOutcome::Cancelled) => Err(EngineError::HumanCancelled(id)),
                    Err(_) => Err(EngineError::Internal(anyhow::anyhow!(
                        "human queue completion sender dropped for request {id}"
                    ))),
                }
            }
            _ = ctx.cancellation.cancelled() => {
                let _ = ctx.env.human_queue.cancel(id);
                ctx.env.bus.notify_notification_resolved(id);
                Err(EngineError::Cancelled)
            }
        }
    }
}
