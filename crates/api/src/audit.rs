//! Asynchronous audit trail of calls.
//!
//! Records are queued on a bounded channel and written by a background task.
//! When the queue is full the record is dropped and counted; the call path
//! never waits on audit output.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::call::{CallContext, CallResult};
use crate::status::Status;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

const REDACTED_HEADERS: &[&str] = &["authorization", "cookie"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub procedure: String,
    pub received_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub request: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Status>,
    pub headers: BTreeMap<String, String>,
}

impl AuditRecord {
    pub fn new(ctx: &CallContext, request: &Value, result: &CallResult) -> Self {
        let (response, error) = match result {
            Ok(value) => (Some(value.clone()), None),
            Err(status) => (None, Some(status.clone())),
        };
        Self {
            procedure: ctx.procedure.clone(),
            received_at: ctx.received_at,
            duration_ms: (Utc::now() - ctx.received_at).num_milliseconds(),
            request: request.clone(),
            response,
            error,
            headers: header_map(&ctx.headers),
        }
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                "[redacted]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

/// Destination for drained audit records.
pub trait AuditWriter: Send + Sync {
    fn write(&self, record: &AuditRecord);
}

/// Emits each record as a structured event on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditWriter;

impl AuditWriter for TracingAuditWriter {
    fn write(&self, record: &AuditRecord) {
        let payload = serde_json::to_string(record).unwrap_or_else(|e| format!("{{\"unencodable\":\"{e}\"}}"));
        info!(
            target: "audit",
            procedure = %record.procedure,
            ok = record.error.is_none(),
            duration_ms = record.duration_ms,
            record = %payload,
            "call audited"
        );
    }
}

/// Cloneable handle onto the audit queue.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// Start the drain task with the default tracing writer.
    pub fn spawn(capacity: usize) -> Self {
        Self::with_writer(capacity, Arc::new(TracingAuditWriter))
    }

    pub fn with_writer(capacity: usize, writer: Arc<dyn AuditWriter>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                writer.write(&record);
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue without waiting.
    pub fn log(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(procedure = %record.procedure, dropped, "audit queue full; record dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("audit writer stopped; record dropped");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records dropped since start.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("capacity", &self.tx.max_capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}
