use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::errors::TallyError;

// ============================================================================
// Command Context - who, for whom, when, and under which contest state
// ============================================================================

/// Lifecycle of the contest a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContestState {
    TestingPhase,
    Active,
    PastUnlocked,
    PastLocked,
    Archived,
}

impl ContestState {
    pub fn is_locked(self) -> bool {
        matches!(self, ContestState::PastLocked | ContestState::Archived)
    }
}

#[derive(Debug, Clone)]
pub struct CommandContext {
    pub actor: String,
    pub tenant: String,
    pub contest_id: Uuid,
    pub contest_state: ContestState,
    pub correlation_id: Uuid,
    pub now: DateTime<Utc>,
}

impl CommandContext {
    pub fn new(actor: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            tenant: tenant.into(),
            contest_id: Uuid::nil(),
            contest_state: ContestState::Active,
            correlation_id: Uuid::new_v4(),
            // the event store keeps milliseconds
            now: Utc::now().trunc_subsecs(3),
        }
    }

    pub fn with_contest(mut self, contest_id: Uuid, contest_state: ContestState) -> Self {
        self.contest_id = contest_id;
        self.contest_state = contest_state;
        self
    }

    /// Global gate evaluated before every other precondition
    pub fn ensure_contest_unlocked(&self) -> Result<(), TallyError> {
        if self.contest_state.is_locked() {
            return Err(TallyError::ContestLocked(self.contest_id));
        }
        Ok(())
    }
}

// ============================================================================
// Contest Lookup - the contest aggregate is owned elsewhere
// ============================================================================

#[async_trait]
pub trait ContestLookup: Send + Sync {
    async fn contest_state(&self, contest_id: Uuid) -> anyhow::Result<ContestState>;
}

/// Contest states held in memory; unknown contests are reported as `Active`
#[derive(Default)]
pub struct InMemoryContests {
    states: RwLock<HashMap<Uuid, ContestState>>,
}

impl InMemoryContests {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_state(&self, contest_id: Uuid, state: ContestState) {
        self.states.write().await.insert(contest_id, state);
    }
}

#[async_trait]
impl ContestLookup for InMemoryContests {
    async fn contest_state(&self, contest_id: Uuid) -> anyhow::Result<ContestState> {
        Ok(self
            .states
            .read()
            .await
            .get(&contest_id)
            .copied()
            .unwrap_or(ContestState::Active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_contest_states() {
        assert!(ContestState::PastLocked.is_locked());
        assert!(ContestState::Archived.is_locked());
        assert!(!ContestState::PastUnlocked.is_locked());
        assert!(!ContestState::TestingPhase.is_locked());
    }

    #[test]
    fn test_locked_contest_is_rejected() {
        let contest_id = Uuid::new_v4();
        let ctx = CommandContext::new("user", "tenant").with_contest(contest_id, ContestState::Archived);
        assert_eq!(ctx.ensure_contest_unlocked(), Err(TallyError::ContestLocked(contest_id)));
    }

    #[tokio::test]
    async fn test_in_memory_contests_default_active() {
        let contests = InMemoryContests::new();
        let id = Uuid::new_v4();
        assert_eq!(contests.contest_state(id).await.unwrap(), ContestState::Active);

        contests.set_state(id, ContestState::PastLocked).await;
        assert_eq!(contests.contest_state(id).await.unwrap(), ContestState::PastLocked);
    }
}
