//! HTTP sink for the Langfuse public ingestion API.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use tracelift_config::BackendSettings;
use tracelift_core::TransportError;

use crate::{Primitive, SinkObject, TraceSink};

const INGESTION_PATH: &str = "/api/public/ingestion";

/// Buffers objects per trace and sends them in batches.
///
/// A batch goes out when a trace's buffer reaches the configured size, and on
/// [`TraceSink::flush`].
pub struct LangfuseSink {
    client: Client,
    endpoint: String,
    public_key: String,
    secret_key: String,
    environment: String,
    batch_size: usize,
    pending: Mutex<HashMap<String, Vec<Value>>>,
}

#[derive(Deserialize, Default)]
struct IngestionResponse {
    #[serde(default)]
    successes: Vec<Value>,
    #[serde(default)]
    errors: Vec<IngestionError>,
}

#[derive(Deserialize)]
struct IngestionError {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

impl LangfuseSink {
    pub fn new(settings: &BackendSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", settings.api_url, INGESTION_PATH),
            public_key: settings.public_key.clone(),
            secret_key: settings.secret_key.clone(),
            environment: settings.environment.clone(),
            batch_size: settings.flush_batch_size.max(1),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Removes the buffered batch for `trace_id`. With `only_full`, only a
    /// batch that reached the batch size is taken.
    fn take(&self, trace_id: &str, only_full: bool) -> Result<Vec<Value>, TransportError> {
        let Ok(mut pending) = self.pending.lock() else {
            error!("Failed to acquire ingestion buffer lock");
            return Err(TransportError::Unavailable("ingestion buffer lock poisoned".into()));
        };
        let full = pending
            .get(trace_id)
            .map(|b| b.len() >= self.batch_size)
            .unwrap_or(false);
        if only_full && !full {
            return Ok(Vec::new());
        }
        Ok(pending.remove(trace_id).unwrap_or_default())
    }

    async fn send(&self, batch: Vec<Value>) -> Result<(), TransportError> {
        if batch.is_empty() {
            return Ok(());
        }
        let total = batch.len();
        debug!(endpoint = %self.endpoint, total, "Sending ingestion batch");

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&json!({ "batch": batch }))
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        check_response(status, &body, total)
    }
}

#[async_trait]
impl TraceSink for LangfuseSink {
    async fn create(&self, object: SinkObject) -> Result<(), TransportError> {
        let trace_id = object.trace_id.clone();
        let event = ingestion_event(&object, &self.environment);
        {
            let Ok(mut pending) = self.pending.lock() else {
                return Err(TransportError::Unavailable("ingestion buffer lock poisoned".into()));
            };
            pending.entry(trace_id.clone()).or_default().push(event);
        }

        let batch = self.take(&trace_id, true)?;
        self.send(batch).await
    }

    async fn flush(&self, trace_id: &str) -> Result<(), TransportError> {
        let batch = self.take(trace_id, false)?;
        self.send(batch).await
    }
}

/// Interprets an ingestion response. The API answers 207 with per-item errors.
fn check_response(status: StatusCode, body: &str, total: usize) -> Result<(), TransportError> {
    if !status.is_success() {
        warn!(status = status.as_u16(), "Ingestion request rejected");
        return Err(TransportError::Status {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        });
    }

    let parsed: IngestionResponse = serde_json::from_str(body).unwrap_or_default();
    if parsed.errors.is_empty() {
        debug!(accepted = parsed.successes.len(), total, "Ingestion batch accepted");
        return Ok(());
    }

    let first = &parsed.errors[0];
    let detail = format!(
        "{} ({}): {}",
        first.id.as_deref().unwrap_or("unknown"),
        first.status.map(|s| s.to_string()).unwrap_or_else(|| "?".into()),
        first.message.as_deref().unwrap_or("no message"),
    );
    warn!(rejected = parsed.errors.len(), total, detail = %detail, "Ingestion batch partially rejected");
    Err(TransportError::Rejected {
        rejected: parsed.errors.len(),
        total,
        detail,
    })
}

/// Builds one ingestion event for `object`.
fn ingestion_event(object: &SinkObject, environment: &str) -> Value {
    let now = Utc::now().to_rfc3339();
    let mut body = Map::new();
    body.insert("id".into(), json!(object.id));
    body.insert("name".into(), json!(object.name));
    body.insert("input".into(), object.input.clone());
    body.insert("output".into(), object.output.clone());
    body.insert("metadata".into(), Value::Object(object.metadata.clone()));
    body.insert("environment".into(), json!(environment));

    let event_type = match object.primitive {
        Primitive::Trace => {
            body.insert("timestamp".into(), json!(now));
            body.insert("sessionId".into(), json!(object.session_id));
            body.insert("userId".into(), json!(object.user_id));
            body.insert("tags".into(), json!(object.tags));
            "trace-create"
        }
        Primitive::Span | Primitive::Generation | Primitive::Event => {
            body.insert("traceId".into(), json!(object.trace_id));
            body.insert("parentObservationId".into(), json!(object.parent_id));
            body.insert("startTime".into(), json!(now));
            if let Some(level) = object.level {
                body.insert("level".into(), json!(level));
            }
            match object.primitive {
                Primitive::Generation => {
                    body.insert("endTime".into(), json!(now));
                    body.insert("model".into(), json!(object.model));
                    if let Some(usage) = object.usage {
                        body.insert(
                            "usage".into(),
                            json!({
                                "input": usage.input,
                                "output": usage.output,
                                "total": usage.total,
                                "unit": "TOKENS",
                            }),
                        );
                    }
                    "generation-create"
                }
                Primitive::Event => "event-create",
                _ => {
                    body.insert("endTime".into(), json!(now));
                    "span-create"
                }
            }
        }
    };

    json!({
        "id": Uuid::new_v4().to_string(),
        "timestamp": now,
        "type": event_type,
        "body": body,
    })
}
