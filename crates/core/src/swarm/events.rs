//! # Swarm Events
//!
//! The observer contract: every component reports progress as
//! [`ExecutionEvent`]s delivered to one [`EventSink`] owned by the caller.
//!
//! Delivery never blocks and never fails from the sender's point of view.
//! If the observer has gone away, events are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::AgentId;

/// Channel an event was emitted on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    /// Lifecycle and progress messages
    Status,
    /// One line of the process' standard output
    Stdout,
    /// One line of the process' standard error
    Stderr,
    /// A failure, always human readable
    Error,
    /// The command finished successfully
    Complete,
}

/// One unit of observable output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Agent (or coordinator) that produced the event
    pub source: AgentId,
    pub channel: EventChannel,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(source: AgentId, channel: EventChannel, payload: impl Into<String>) -> Self {
        Self {
            source,
            channel,
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Write side of the observer channel
///
/// Cloning is cheap; every clone feeds the same receiver. Each event is sent
/// as a single message so concurrent writers never interleave fields.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ExecutionEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink plus the receiver the observer reads from
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Deliver one event; failures are swallowed
    pub fn deliver(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("observer gone, dropping event");
            }
        }
    }

    /// Bind this sink to one event source
    pub fn emitter(&self, source: AgentId) -> EventEmitter {
        EventEmitter {
            source,
            sink: self.clone(),
        }
    }
}

/// Emits events on behalf of a single source
#[derive(Debug, Clone)]
pub struct EventEmitter {
    source: AgentId,
    sink: EventSink,
}

impl EventEmitter {
    pub fn source(&self) -> &AgentId {
        &self.source
    }

    pub fn emit(&self, channel: EventChannel, payload: impl Into<String>) {
        self.sink
            .deliver(ExecutionEvent::new(self.source.clone(), channel, payload));
    }

    pub fn status(&self, payload: impl Into<String>) {
        self.emit(EventChannel::Status, payload);
    }

    pub fn error(&self, payload: impl Into<String>) {
        self.emit(EventChannel::Error, payload);
    }

    pub fn complete(&self, payload: impl Into<String>) {
        self.emit(EventChannel::Complete, payload);
    }
}
