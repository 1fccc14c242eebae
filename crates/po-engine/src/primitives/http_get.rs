use async_trait::async_trait;

use po_core::error::{EngineError, EngineResult};
use po_core::primitive::{PrimitiveFn, PrimitiveOrigin};
use po_core::turn::TurnContext;

pub struct HttpGet;

#[async_trait]
impl PrimitiveFn for HttpGet {
    fn name(&self) -> &str {
        "http_get"
    }

    fn description(&self) -> &str {
        "Perform an HTTP GET request and return the response body as text."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "headers": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Optional request headers"
                }
            },
            "required": ["url"]
        })
    }

    fn origin(&self) -> PrimitiveOrigin {
        PrimitiveOrigin::Stdlib
    }

    async fn invoke(&self, arguments: serde_json::Value, _ctx: &TurnContext) -> EngineResult<String> {
        let url = arguments
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::capability("http_get", "missing required argument: url"))?;

        let client = reqwest::Client::new();
        let mut request = client.get(url);
        if let Some(headers) = arguments.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::capability("http_get", e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::capability("http_get", e.to_string()))?;

        if !status.is_success() {
            return Err(EngineError::capability(
                "http_get",
                format!("http status {status}: {body}"),
            ));
        }
        Ok(body)
    }
}
