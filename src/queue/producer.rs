//! Producer side: batch encoded records onto the shared list

use async_trait::async_trait;
use std::sync::Arc;

use super::envelope::{AnalyticsSample, HostingRecord, LogLine};
use super::QueueError;
use crate::buffer::{BatchingBuffer, BufferConfig, Flusher};
use crate::cache::{HostCache, RouteResolver};
use crate::store::SharedStore;

/// Flusher that appends a batch to a store list with one call
pub struct QueueFlusher {
    store: SharedStore,
    list_key: String,
}

impl QueueFlusher {
    pub fn new(store: SharedStore, list_key: impl Into<String>) -> Self {
        Self {
            store,
            list_key: list_key.into(),
        }
    }
}

#[async_trait]
impl Flusher<String> for QueueFlusher {
    async fn flush(&self, items: Vec<String>) -> anyhow::Result<()> {
        let len = self.store.push_batch(&self.list_key, &items).await?;
        tracing::debug!(key = %self.list_key, pushed = items.len(), len, "Pushed batch to queue");
        Ok(())
    }
}

/// Encodes records and pushes them through a [`BatchingBuffer`]
pub struct QueueProducer {
    buffer: BatchingBuffer<String>,
}

impl QueueProducer {
    /// Start a producer writing to `list_key`
    pub fn new(
        store: SharedStore,
        list_key: impl Into<String>,
        config: BufferConfig,
    ) -> Result<Self, QueueError> {
        let flusher = Arc::new(QueueFlusher::new(store, list_key));
        Ok(Self {
            buffer: BatchingBuffer::new(config, flusher)?,
        })
    }

    /// Queue one record
    pub async fn enqueue(&self, record: &HostingRecord) -> Result<(), QueueError> {
        let encoded = record.encode()?;
        self.buffer.push(encoded).await?;
        Ok(())
    }

    /// Push whatever is buffered now
    pub async fn flush(&self) -> Result<(), QueueError> {
        Ok(self.buffer.flush().await?)
    }

    /// Push what is buffered and stop
    pub async fn close(&self) -> Result<(), QueueError> {
        Ok(self.buffer.close().await?)
    }
}

/// Traffic observed for one request, before routing is attached
#[derive(Debug, Clone, Default)]
pub struct HostingEvent {
    pub logs: Vec<LogLine>,
    pub analytics: Option<AnalyticsSample>,
    pub bandwidth_bytes: u64,
    pub function_invoked: bool,
}

/// Attaches cached routing identifiers to events and enqueues them
pub struct HostingRecorder {
    cache: Arc<HostCache>,
    resolver: Arc<dyn RouteResolver>,
    producer: Arc<QueueProducer>,
}

impl HostingRecorder {
    pub fn new(
        cache: Arc<HostCache>,
        resolver: Arc<dyn RouteResolver>,
        producer: Arc<QueueProducer>,
    ) -> Self {
        Self {
            cache,
            resolver,
            producer,
        }
    }

    /// Record `event` for `host`. Returns `false` if the host is unknown
    /// and the event was dropped.
    pub async fn record(&self, host: &str, event: HostingEvent) -> anyhow::Result<bool> {
        let Some(route) = self.cache.get_or_resolve(host, self.resolver.as_ref()).await? else {
            tracing::debug!(host, "Unknown host, dropping event");
            return Ok(false);
        };

        let mut record = HostingRecord::new(&route, host);
        record.logs = event.logs;
        record.analytics = event.analytics;
        record.bandwidth_bytes = event.bandwidth_bytes;
        record.function_invoked = event.function_invoked;

        self.producer.enqueue(&record).await?;
        Ok(true)
    }
}
