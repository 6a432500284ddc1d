//! Size- and time-triggered batching buffer
//!
//! A [`BatchingBuffer`] accumulates pushed items and hands them, as one
//! batch, to a [`Flusher`] when:
//!
//! - the batch reaches `size` items,
//! - `flush_interval` elapses with a non-empty batch,
//! - [`BatchingBuffer::flush`] is called,
//! - the buffer is closed or dropped.
//!
//! ```text
//! push ──┐
//! flush ─┼──▶ mpsc ──▶ consumer task ──▶ Flusher::flush(Vec<T>)
//! close ─┘              ▲ (sole owner of the batch)
//!               ticker ─┘
//! ```
//!
//! The pending batch is owned by a single consumer task, so sink calls are
//! strictly serialized. Every request is acknowledged after the consumer has
//! processed it: when `push` returns, any flush it triggered has completed.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::metrics;

// ============================================================================
// Flusher
// ============================================================================

/// Sink receiving complete batches
#[async_trait]
pub trait Flusher<T>: Send + Sync {
    /// Consume one batch. Errors are logged by the buffer; the batch is not retried.
    async fn flush(&self, items: Vec<T>) -> anyhow::Result<()>;
}

// ============================================================================
// Configuration and Errors
// ============================================================================

/// Buffer capacity and timing
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Items per batch
    pub size: usize,

    /// Flush a partial batch this long after the previous flush
    pub flush_interval: Duration,

    /// Bound on `push` and `flush` waiting for the consumer to accept the request
    pub push_timeout: Duration,

    /// Bound on a single sink call
    pub flush_timeout: Duration,

    /// Bound on `close`, final flush included
    pub close_timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: 1000,
            flush_interval: Duration::from_secs(1),
            push_timeout: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(15),
        }
    }
}

impl BufferConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.size == 0 {
            return Err(BufferError::InvalidConfig("size must be greater than 0".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(BufferError::InvalidConfig(
                "flush_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The consumer did not accept the request in time
    #[error("Buffer {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The buffer has been closed
    #[error("Buffer is closed")]
    Closed,

    /// Invalid buffer settings
    #[error("Invalid buffer config: {0}")]
    InvalidConfig(String),
}

impl BufferError {
    /// Whether retrying the operation can succeed
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// What triggered a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Interval,
    Manual,
    Close,
}

impl FlushReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Interval => "interval",
            Self::Manual => "manual",
            Self::Close => "close",
        }
    }
}

// ============================================================================
// Buffer Handle
// ============================================================================

enum Command<T> {
    Item(T, oneshot::Sender<()>),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Handle to a running batching buffer
///
/// Dropping the handle without calling [`close`](Self::close) still flushes
/// the pending batch, but nothing waits for it.
pub struct BatchingBuffer<T> {
    tx: mpsc::Sender<Command<T>>,
    config: BufferConfig,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BatchingBuffer<T> {
    /// Start the consumer task. Must be called inside a tokio runtime.
    pub fn new(config: BufferConfig, flusher: Arc<dyn Flusher<T>>) -> Result<Self, BufferError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(1);
        let consumer = Consumer {
            items: Vec::with_capacity(config.size),
            config: config.clone(),
            flusher,
        };
        let task = tokio::spawn(consumer.run(rx));

        Ok(Self {
            tx,
            config,
            closed: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        })
    }

    /// The configuration the buffer runs with
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Append one item, flushing first if the batch becomes full
    pub async fn push(&self, item: T) -> Result<(), BufferError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Item(item, ack_tx), "push", self.config.push_timeout)
            .await?;
        ack_rx.await.map_err(|_| BufferError::Closed)
    }

    /// Flush the pending batch now
    pub async fn flush(&self) -> Result<(), BufferError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Flush(ack_tx), "flush", self.config.push_timeout)
            .await?;
        ack_rx.await.map_err(|_| BufferError::Closed)
    }

    /// Flush what is pending and stop the consumer
    pub async fn close(&self) -> Result<(), BufferError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BufferError::Closed);
        }

        let limit = self.config.close_timeout;
        let finished = tokio::time::timeout(limit, async {
            let (ack_tx, ack_rx) = oneshot::channel();
            if self.tx.send(Command::Close(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
            if let Some(task) = self.task.lock().await.take() {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "Buffer consumer ended abnormally");
                }
            }
        })
        .await;

        finished.map_err(|_| BufferError::Timeout {
            operation: "close",
            timeout: limit,
        })
    }

    async fn send(
        &self,
        command: Command<T>,
        operation: &'static str,
        limit: Duration,
    ) -> Result<(), BufferError> {
        if self.is_closed() {
            return Err(BufferError::Closed);
        }
        match tokio::time::timeout(limit, self.tx.send(command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BufferError::Closed),
            Err(_) => Err(BufferError::Timeout {
                operation,
                timeout: limit,
            }),
        }
    }
}

// ============================================================================
// Consumer
// ============================================================================

struct Consumer<T> {
    items: Vec<T>,
    config: BufferConfig,
    flusher: Arc<dyn Flusher<T>>,
}

impl<T: Send + 'static> Consumer<T> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command<T>>) {
        let period = self.config.flush_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Item(item, ack)) => {
                        self.items.push(item);
                        if self.items.len() >= self.config.size {
                            self.flush(FlushReason::Size, &mut ticker).await;
                        }
                        let _ = ack.send(());
                    }
                    Some(Command::Flush(ack)) => {
                        self.flush(FlushReason::Manual, &mut ticker).await;
                        let _ = ack.send(());
                    }
                    Some(Command::Close(ack)) => {
                        self.flush(FlushReason::Close, &mut ticker).await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.flush(FlushReason::Close, &mut ticker).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.flush(FlushReason::Interval, &mut ticker).await;
                }
            }
        }

        tracing::debug!("Buffer consumer stopped");
    }

    async fn flush(&mut self, reason: FlushReason, ticker: &mut Interval) {
        if self.items.is_empty() {
            return;
        }

        let batch = std::mem::replace(&mut self.items, Vec::with_capacity(self.config.size));
        let count = batch.len();

        match tokio::time::timeout(self.config.flush_timeout, self.flusher.flush(batch)).await {
            Ok(Ok(())) => {
                tracing::debug!(count, reason = reason.as_str(), "Buffer flushed");
            }
            Ok(Err(e)) => {
                tracing::error!(count, reason = reason.as_str(), error = %e, "Buffer flush failed, batch dropped");
            }
            Err(_) => {
                tracing::error!(
                    count,
                    reason = reason.as_str(),
                    timeout = ?self.config.flush_timeout,
                    "Buffer flush timed out, batch dropped"
                );
            }
        }
        metrics::record_flush(reason.as_str());

        // next interval flush counts from the end of this one
        ticker.reset();
    }
}
