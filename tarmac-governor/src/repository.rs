use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::limits::BookingLimit;
use crate::overrides::OverrideRule;
use crate::GovernanceError;

/// Storage for booking limits. `save` compares `version` and bumps it, the
/// same contract inventory rows follow.
#[async_trait]
pub trait LimitRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<BookingLimit>, GovernanceError>;

    async fn list(&self) -> Result<Vec<BookingLimit>, GovernanceError>;

    async fn insert(&self, limit: &BookingLimit) -> Result<(), GovernanceError>;

    async fn save(&self, limit: &BookingLimit) -> Result<BookingLimit, GovernanceError>;
}

#[async_trait]
pub trait OverrideRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<OverrideRule>, GovernanceError>;

    async fn list(&self) -> Result<Vec<OverrideRule>, GovernanceError>;

    /// Insert or replace.
    async fn put(&self, rule: &OverrideRule) -> Result<(), GovernanceError>;
}

#[derive(Default)]
pub struct MemoryLimitRepository {
    rows: RwLock<HashMap<Uuid, BookingLimit>>,
}

impl MemoryLimitRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LimitRepository for MemoryLimitRepository {
    async fn get(&self, id: Uuid) -> Result<Option<BookingLimit>, GovernanceError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<BookingLimit>, GovernanceError> {
        let mut limits: Vec<_> = self.rows.read().await.values().cloned().collect();
        limits.sort_by_key(|l| l.id);
        Ok(limits)
    }

    async fn insert(&self, limit: &BookingLimit) -> Result<(), GovernanceError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&limit.id) {
            return Err(GovernanceError::Invalid(format!("limit {} already exists", limit.id)));
        }
        rows.insert(limit.id, limit.clone());
        Ok(())
    }

    async fn save(&self, limit: &BookingLimit) -> Result<BookingLimit, GovernanceError> {
        let mut rows = self.rows.write().await;
        let stored = rows.get_mut(&limit.id).ok_or(GovernanceError::LimitNotFound(limit.id))?;
        if stored.version != limit.version {
            return Err(GovernanceError::VersionConflict {
                limit_id: limit.id,
                expected: limit.version,
                actual: stored.version,
            });
        }
        let mut saved = limit.clone();
        saved.version += 1;
        *stored = saved.clone();
        Ok(saved)
    }
}

#[derive(Default)]
pub struct MemoryOverrideRepository {
    rows: RwLock<HashMap<Uuid, OverrideRule>>,
}

impl MemoryOverrideRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideRepository for MemoryOverrideRepository {
    async fn get(&self, id: Uuid) -> Result<Option<OverrideRule>, GovernanceError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<OverrideRule>, GovernanceError> {
        let mut rules: Vec<_> = self.rows.read().await.values().cloned().collect();
        rules.sort_by_key(|r| r.requested_at);
        Ok(rules)
    }

    async fn put(&self, rule: &OverrideRule) -> Result<(), GovernanceError> {
        self.rows.write().await.insert(rule.id, rule.clone());
        Ok(())
    }
}
