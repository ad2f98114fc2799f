//! Optional forwarding of finished LLM exchanges to an external trace
//! collector.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::capture::CaptureRecord;
use crate::config::ExporterConfig;
use crate::error::ExportError;

#[async_trait]
pub trait TraceExporter: Send + Sync {
    /// Ship one finished record. Implementations decide whether a record
    /// is worth exporting; skipping is not an error.
    async fn export(&self, record: &CaptureRecord) -> Result<(), ExportError>;
}

/// POSTs one span-shaped JSON document per completed LLM call to a
/// collector endpoint. Records without provider metadata or without a
/// response are skipped.
pub struct HttpTraceExporter {
    client: reqwest::Client,
    config: ExporterConfig,
}

impl HttpTraceExporter {
    pub fn new(config: ExporterConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TraceExporter for HttpTraceExporter {
    async fn export(&self, record: &CaptureRecord) -> Result<(), ExportError> {
        let Some(payload) = span_payload(record) else {
            return Ok(());
        };

        let mut req = self.client.post(&self.config.endpoint).json(&payload);
        if let Some(key) = &self.config.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }

        let res = req
            .send()
            .await
            .map_err(|err| ExportError::Http(err.to_string()))?;
        if !res.status().is_success() {
            return Err(ExportError::Rejected(res.status().as_u16()));
        }
        Ok(())
    }
}

/// Flatten a record into span attributes. Returns `None` for records that
/// are not completed LLM calls.
pub fn span_payload(record: &CaptureRecord) -> Option<Value> {
    let llm = record.llm.as_ref()?;
    let response = record.response.as_ref()?;

    let mut attrs = serde_json::Map::new();
    attrs.insert("http.method".to_string(), json!(record.request.method));
    attrs.insert("http.url".to_string(), json!(record.request.url));
    attrs.insert("http.status_code".to_string(), json!(response.status));
    attrs.insert("llm.provider".to_string(), json!(llm.provider.name()));
    if let Some(model) = &llm.model {
        attrs.insert("llm.model_name".to_string(), json!(model));
    }
    if let Some(prompt) = llm.prompt_tokens {
        attrs.insert("llm.token_count.prompt".to_string(), json!(prompt));
    }
    if let Some(completion) = llm.completion_tokens {
        attrs.insert("llm.token_count.completion".to_string(), json!(completion));
    }
    if let Some(total) = llm.total_tokens {
        attrs.insert("llm.token_count.total".to_string(), json!(total));
    }
    if let Some(cost) = llm.cost {
        attrs.insert("llm.cost".to_string(), json!(cost));
    }
    if let Some(temperature) = llm.temperature {
        attrs.insert("llm.invocation_parameters.temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = llm.max_tokens {
        attrs.insert("llm.invocation_parameters.max_tokens".to_string(), json!(max_tokens));
    }
    if let Some(reason) = &llm.finish_reason {
        attrs.insert("llm.finish_reason".to_string(), json!(reason));
    }

    Some(json!({
        "name": "llm.call",
        "span_id": record.id,
        "start_time_ms": record.request.ts,
        "end_time_ms": response.ts,
        "duration_ms": response.duration_ms,
        "attributes": Value::Object(attrs),
    }))
}
