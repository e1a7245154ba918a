use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use txcoord_core::{ParticipantId, TransactionId, TransactionKind, TransactionState};

/// Lifecycle notifications published on the coordinator's event channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    Started {
        transaction: TransactionId,
        kind: TransactionKind,
    },
    StateChanged {
        transaction: TransactionId,
        from: TransactionState,
        to: TransactionState,
    },
    Committed {
        transaction: TransactionId,
    },
    Aborted {
        transaction: TransactionId,
        reason: String,
    },
    Failed {
        transaction: TransactionId,
        error: String,
    },
    CommitFailure {
        transaction: TransactionId,
        participant: ParticipantId,
        error: String,
    },
    CompensationFailed {
        transaction: TransactionId,
        step: String,
        error: String,
    },
}

impl TransactionEvent {
    #[must_use]
    pub fn transaction(&self) -> TransactionId {
        match self {
            Self::Started { transaction, .. }
            | Self::StateChanged { transaction, .. }
            | Self::Committed { transaction }
            | Self::Aborted { transaction, .. }
            | Self::Failed { transaction, .. }
            | Self::CommitFailure { transaction, .. }
            | Self::CompensationFailed { transaction, .. } => *transaction,
        }
    }
}

/// Broadcast channel for [`TransactionEvent`]s.
///
/// Publishing with no subscribers is not an error. After [`close`](Self::close)
/// new subscribers receive a channel that is already closed.
pub struct EventBus {
    sender: RwLock<Option<broadcast::Sender<TransactionEvent>>>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    pub fn publish(&self, event: TransactionEvent) {
        if let Some(sender) = self.sender.read().as_ref() {
            let _ = sender.send(event);
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        if let Some(sender) = self.sender.read().as_ref() {
            return sender.subscribe();
        }
        let (_, receiver) = broadcast::channel(1);
        receiver
    }

    /// Drop the sender so existing receivers observe `Closed` once drained.
    pub fn close(&self) {
        self.sender.write().take();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    use super::*;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);

        bus.publish(TransactionEvent::Committed {
            transaction: TransactionId::new(),
        });

        assert!(!bus.is_closed());
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() -> anyhow::Result<()> {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let id = TransactionId::new();

        bus.publish(TransactionEvent::Aborted {
            transaction: id,
            reason: "operator".to_string(),
        });

        let event = rx.recv().await?;
        assert_eq!(event.transaction(), id);
        assert!(matches!(event, TransactionEvent::Aborted { reason, .. } if reason == "operator"));
        Ok(())
    }

    #[tokio::test]
    async fn close_ends_existing_and_new_subscriptions() {
        let bus = EventBus::new(4);
        let mut existing = bus.subscribe();

        bus.close();
        let mut late = bus.subscribe();

        assert!(matches!(existing.recv().await, Err(RecvError::Closed)));
        assert!(matches!(late.try_recv(), Err(TryRecvError::Closed)));
    }

    #[test]
    fn events_serialize_with_tag() -> anyhow::Result<()> {
        let event = TransactionEvent::StateChanged {
            transaction: TransactionId::new(),
            from: TransactionState::Pending,
            to: TransactionState::Preparing,
        };

        let json = serde_json::to_value(&event)?;

        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["from"], "pending");
        assert_eq!(json["to"], "preparing");
        Ok(())
    }
}
