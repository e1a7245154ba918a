use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use txcoord_core::{Participant, ParticipantConfig, ParticipantId};

use crate::error::{CoordinatorError, Result};

/// Known participants and their calling contracts.
///
/// Unset timeouts and retry limits in a [`ParticipantConfig`] are resolved
/// against the registry defaults at registration time.
pub struct ParticipantRegistry {
    participants: DashMap<ParticipantId, Participant>,
    default_timeout: Duration,
    default_max_retries: u32,
}

impl ParticipantRegistry {
    #[must_use]
    pub fn new(default_timeout: Duration, default_max_retries: u32) -> Self {
        Self {
            participants: DashMap::new(),
            default_timeout,
            default_max_retries,
        }
    }

    /// Insert or replace a participant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the id is empty.
    pub fn register(&self, id: ParticipantId, config: ParticipantConfig) -> Result<Participant> {
        if id.as_str().is_empty() {
            return Err(CoordinatorError::InvalidRequest(
                "participant id must not be empty".to_string(),
            ));
        }

        let participant = Participant {
            id: id.clone(),
            endpoint: config.endpoint,
            timeout: config.timeout.unwrap_or(self.default_timeout),
            max_retries: config.max_retries.unwrap_or(self.default_max_retries),
            supports_compensation: config.supports_compensation,
        };
        let replaced = self.participants.insert(id, participant.clone()).is_some();
        debug!(participant = %participant.id, replaced, "registered participant");
        Ok(participant)
    }

    /// # Errors
    ///
    /// Returns `ParticipantNotFound` if the id was never registered.
    pub fn get(&self, id: &ParticipantId) -> Result<Participant> {
        self.participants
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinatorError::ParticipantNotFound(id.clone()))
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Registered ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.participants.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Snapshot of every registered participant, sorted by id.
    #[must_use]
    pub fn all(&self) -> Vec<Participant> {
        let mut all: Vec<_> = self.participants.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ParticipantRegistry {
        ParticipantRegistry::new(Duration::from_secs(30), 3)
    }

    #[test]
    fn register_applies_defaults() -> anyhow::Result<()> {
        let registry = registry();

        let participant =
            registry.register(ParticipantId::from("ledger"), ParticipantConfig::new("mem://"))?;

        assert_eq!(participant.timeout, Duration::from_secs(30));
        assert_eq!(participant.max_retries, 3);
        assert_eq!(participant.endpoint, "mem://");
        Ok(())
    }

    #[test]
    fn register_keeps_explicit_values() -> anyhow::Result<()> {
        let registry = registry();

        let participant = registry.register(
            ParticipantId::from("ledger"),
            ParticipantConfig::new("mem://")
                .with_timeout(Duration::from_millis(50))
                .with_max_retries(0)
                .with_compensation(true),
        )?;

        assert_eq!(participant.timeout, Duration::from_millis(50));
        assert_eq!(participant.max_retries, 0);
        assert!(participant.supports_compensation);
        Ok(())
    }

    #[test]
    fn reregistration_is_an_upsert() -> anyhow::Result<()> {
        let registry = registry();
        let id = ParticipantId::from("ledger");

        registry.register(id.clone(), ParticipantConfig::new("old"))?;
        registry.register(id.clone(), ParticipantConfig::new("new"))?;

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id)?.endpoint, "new");
        Ok(())
    }

    #[test]
    fn get_unknown_participant_fails() {
        let registry = registry();

        let result = registry.get(&ParticipantId::from("ghost"));

        assert!(matches!(
            result,
            Err(CoordinatorError::ParticipantNotFound(id)) if id.as_str() == "ghost"
        ));
    }

    #[test]
    fn empty_id_is_rejected() {
        let registry = registry();

        let result = registry.register(ParticipantId::from(""), ParticipantConfig::new("x"));

        assert!(matches!(result, Err(CoordinatorError::InvalidRequest(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_are_sorted() -> anyhow::Result<()> {
        let registry = registry();
        for id in ["b", "c", "a"] {
            registry.register(ParticipantId::from(id), ParticipantConfig::new("x"))?;
        }

        let ids: Vec<_> = registry.ids().iter().map(ToString::to_string).collect();

        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(registry.contains(&ParticipantId::from("c")));
        Ok(())
    }
}
