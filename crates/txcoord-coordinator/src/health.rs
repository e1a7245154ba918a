use std::fmt;

use futures::future::join_all;
use serde::Serialize;
use txcoord_core::ParticipantId;

use crate::engine::Engine;
use crate::transaction::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// At least one participant is unhealthy or could not be probed.
    Degraded,
    ShuttingDown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::ShuttingDown => "shutting down",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ParticipantStatus {
    Healthy,
    Unhealthy,
    /// The participant has no health probe.
    Unknown,
    Error(String),
}

impl ParticipantStatus {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Unhealthy | Self::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantHealth {
    pub participant: ParticipantId,
    pub status: ParticipantStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub statistics: Statistics,
    pub participants: Vec<ParticipantHealth>,
}

impl HealthReport {
    pub(crate) fn new(
        shutting_down: bool,
        statistics: Statistics,
        participants: Vec<ParticipantHealth>,
    ) -> Self {
        let status = if shutting_down {
            HealthStatus::ShuttingDown
        } else if participants.iter().any(|p| p.status.is_degraded()) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            statistics,
            participants,
        }
    }
}

impl Engine {
    /// Probe every registered participant concurrently, each bounded by its
    /// own timeout. Probes are not retried.
    pub(crate) async fn probe_participants(&self) -> Vec<ParticipantHealth> {
        let probes = self.registry.all().into_iter().map(|participant| async move {
            let probe = self.client.health_check(&participant);
            let status = match tokio::time::timeout(participant.timeout, probe).await {
                Ok(Ok(Some(true))) => ParticipantStatus::Healthy,
                Ok(Ok(Some(false))) => ParticipantStatus::Unhealthy,
                Ok(Ok(None)) => ParticipantStatus::Unknown,
                Ok(Err(error)) => ParticipantStatus::Error(error.to_string()),
                Err(_) => ParticipantStatus::Error(format!(
                    "health check timed out after {:?}",
                    participant.timeout
                )),
            };
            ParticipantHealth {
                participant: participant.id,
                status,
            }
        });
        join_all(probes).await
    }
}
