//! Sink that keeps everything in memory.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use tracelift_core::TransportError;

use crate::{SinkObject, TraceSink};

/// Records every create and flush. Can be told to fail for testing retries.
#[derive(Default)]
pub struct InMemorySink {
    objects: Mutex<Vec<SinkObject>>,
    flushed: Mutex<Vec<String>>,
    create_calls: AtomicUsize,
    fail_create_at: Mutex<Option<usize>>,
    fail_flush: AtomicBool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`-th create call (0-based, counted from now on) fail.
    pub fn fail_create_at(&self, n: usize) {
        let calls = self.create_calls.load(Ordering::SeqCst);
        if let Ok(mut guard) = self.fail_create_at.lock() {
            *guard = Some(calls + n);
        }
    }

    pub fn fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Clears any injected failure.
    pub fn heal(&self) {
        if let Ok(mut guard) = self.fail_create_at.lock() {
            *guard = None;
        }
        self.fail_flush.store(false, Ordering::SeqCst);
    }

    pub fn objects(&self) -> Vec<SinkObject> {
        self.objects.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Trace ids in the order they were flushed.
    pub fn flushes(&self) -> Vec<String> {
        self.flushed.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TraceSink for InMemorySink {
    async fn create(&self, object: SinkObject) -> Result<(), TransportError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_create_at
            .lock()
            .map(|g| *g == Some(call))
            .unwrap_or(false);
        if failing {
            return Err(TransportError::Unavailable(format!(
                "create of {} refused",
                object.id
            )));
        }

        let Ok(mut guard) = self.objects.lock() else {
            warn!("Failed to acquire sink lock");
            return Err(TransportError::Unavailable("sink lock poisoned".into()));
        };
        guard.push(object);
        Ok(())
    }

    async fn flush(&self, trace_id: &str) -> Result<(), TransportError> {
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("flush refused".into()));
        }
        let Ok(mut guard) = self.flushed.lock() else {
            return Err(TransportError::Unavailable("sink lock poisoned".into()));
        };
        guard.push(trace_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Primitive;
    use serde_json::{Map, Value};

    fn object(id: &str) -> SinkObject {
        SinkObject {
            primitive: Primitive::Span,
            id: id.into(),
            trace_id: "t".into(),
            parent_id: None,
            name: "span".into(),
            input: Value::Null,
            output: Value::Null,
            metadata: Map::new(),
            level: None,
            model: None,
            usage: None,
            session_id: None,
            user_id: None,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_records_creates_and_flushes() {
        let sink = InMemorySink::new();
        sink.create(object("a")).await.unwrap();
        sink.create(object("b")).await.unwrap();
        sink.flush("t").await.unwrap();

        let ids: Vec<String> = sink.objects().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(sink.flushes(), vec!["t"]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let sink = InMemorySink::new();
        sink.fail_create_at(1);
        assert!(sink.create(object("a")).await.is_ok());
        assert!(sink.create(object("b")).await.is_err());
        assert!(sink.create(object("c")).await.is_ok());

        sink.fail_flush(true);
        assert!(sink.flush("t").await.is_err());
        sink.heal();
        assert!(sink.flush("t").await.is_ok());
        assert_eq!(sink.objects().len(), 2);
    }
}
