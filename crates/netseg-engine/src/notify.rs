//! Dataplane change notifications.
//!
//! The engine never waits on the dataplane: events go onto a bounded queue
//! with `try_send` and are dropped (and counted) when the queue is full. A
//! dispatch task drains the queue into a `DataplaneSink`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use netseg_core::error::Result;
use netseg_core::model::GroupKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    GroupCreated,
    GroupDeleted,
    PolicyAttached,
    PolicyDetached,
    RuleAdded,
    RuleRemoved,
    EndpointAdded,
    EndpointRemoved,
    NetworkUpdated,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::GroupCreated => "group_created",
            EventKind::GroupDeleted => "group_deleted",
            EventKind::PolicyAttached => "policy_attached",
            EventKind::PolicyDetached => "policy_detached",
            EventKind::RuleAdded => "rule_added",
            EventKind::RuleRemoved => "rule_removed",
            EventKind::EndpointAdded => "endpoint_added",
            EventKind::EndpointRemoved => "endpoint_removed",
            EventKind::NetworkUpdated => "network_updated",
        }
    }
}

/// Policy state of `group` changed; the dataplane should re-derive its
/// enforcement state for the group's members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEvent {
    pub kind: EventKind,
    pub group: GroupKey,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification queue full")]
    QueueFull,
    #[error("notification queue closed")]
    Closed,
}

impl NotifyError {
    pub fn label(&self) -> &'static str {
        match self {
            NotifyError::QueueFull => "queue_full",
            NotifyError::Closed => "closed",
        }
    }
}

/// Consumer of policy change events (dataplane programming).
#[async_trait]
pub trait DataplaneSink: Send + Sync {
    async fn policy_changed(&self, event: PolicyEvent) -> Result<()>;
}

/// Sending half handed to the engine.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: Option<mpsc::Sender<PolicyEvent>>,
}

impl Notifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PolicyEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Notifier that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, event: PolicyEvent) -> std::result::Result<(), NotifyError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

/// Drain events into `sink` until every sender is gone.
/// Returns the number of events delivered without error.
pub async fn run_dispatch(mut rx: mpsc::Receiver<PolicyEvent>, sink: Arc<dyn DataplaneSink>) -> u64 {
    let mut delivered = 0;
    while let Some(event) = rx.recv().await {
        let kind = event.kind.as_str();
        let group = event.group.to_string();
        match sink.policy_changed(event).await {
            Ok(()) => delivered += 1,
            Err(e) => tracing::warn!(%group, kind, error = %e, "dataplane sink rejected event"),
        }
    }
    delivered
}

/// Sink that only logs; used by the standalone binary.
pub struct LoggingSink;

#[async_trait]
impl DataplaneSink for LoggingSink {
    async fn policy_changed(&self, event: PolicyEvent) -> Result<()> {
        tracing::info!(group = %event.group, kind = event.kind.as_str(), "policy state changed");
        Ok(())
    }
}
