//! In-memory storage implementation.
//!
//! All state sits behind one `RwLock`; every ledger write takes the write
//! lock, which makes check-then-debit atomic within the process.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use fittrack_core::{
    Activity, BonusAward, BonusRule, BonusRuleId, LedgerEntry, LedgerOutcome, LedgerRequest, Plan,
    RecipeDetails, Session, SessionId, TokenBalance, UserId,
};

use crate::error::{Result, StoreError};
use crate::{award_credit, replay, AwardOutcome, Store};

#[derive(Default)]
struct Inner {
    balances: HashMap<UserId, TokenBalance>,
    entries: Vec<LedgerEntry>,
    entries_by_key: HashMap<String, usize>,
    sessions: HashMap<SessionId, Session>,
    sessions_by_token: HashMap<String, SessionId>,
    activities: Vec<Activity>,
    activity_external_ids: HashSet<(UserId, String)>,
    rules: Vec<BonusRule>,
    awards: Vec<BonusAward>,
    recipes: HashMap<String, RecipeDetails>,
}

impl Inner {
    fn apply(&mut self, request: &LedgerRequest) -> Result<LedgerOutcome> {
        if let Some(&idx) = self.entries_by_key.get(&request.idempotency_key) {
            return replay(self.entries[idx].clone(), request);
        }

        let balance = self
            .balances
            .get_mut(&request.user_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "balance",
                id: request.user_id.to_string(),
            })?;

        // Apply to a copy so a failed mutation leaves the row untouched.
        let mut updated = balance.clone();
        let entry = updated.apply(request, Utc::now())?;
        *balance = updated;

        self.entries_by_key
            .insert(entry.idempotency_key.clone(), self.entries.len());
        self.entries.push(entry.clone());

        Ok(LedgerOutcome {
            entry,
            replayed: false,
        })
    }
}

/// Process-local store for tests and development.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    items.skip(offset).take(limit).collect()
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Balances
    // =========================================================================

    async fn create_balance(&self, balance: &TokenBalance) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.balances.contains_key(&balance.user_id) {
            return Err(StoreError::AlreadyExists {
                entity: "balance",
                id: balance.user_id.to_string(),
            });
        }
        inner.balances.insert(balance.user_id, balance.clone());
        Ok(())
    }

    async fn get_balance(&self, user_id: &UserId) -> Result<Option<TokenBalance>> {
        Ok(self.inner.read().await.balances.get(user_id).cloned())
    }

    async fn list_balances(&self, limit: usize, offset: usize) -> Result<Vec<TokenBalance>> {
        let inner = self.inner.read().await;
        let mut all: Vec<&TokenBalance> = inner.balances.values().collect();
        all.sort_by_key(|b| b.user_id);
        Ok(page(all.into_iter().cloned(), limit, offset))
    }

    async fn set_plan(&self, user_id: &UserId, plan: Plan) -> Result<TokenBalance> {
        let mut inner = self.inner.write().await;
        let balance = inner
            .balances
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "balance",
                id: user_id.to_string(),
            })?;
        balance.plan = plan;
        balance.updated_at = Utc::now();
        Ok(balance.clone())
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    async fn apply_ledger(&self, request: &LedgerRequest) -> Result<LedgerOutcome> {
        self.inner.write().await.apply(request)
    }

    async fn get_entry_by_key(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries_by_key
            .get(idempotency_key)
            .map(|&idx| inner.entries[idx].clone()))
    }

    async fn list_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.read().await;
        let newest_first = inner
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == *user_id)
            .cloned();
        Ok(page(newest_first, limit, offset))
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    async fn put_session(&self, session: &Session) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.sessions_by_token.contains_key(&session.token_hash) {
            return Err(StoreError::AlreadyExists {
                entity: "session",
                id: session.id.to_string(),
            });
        }
        inner
            .sessions_by_token
            .insert(session.token_hash.clone(), session.id);
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions_by_token
            .get(token_hash)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn update_csrf_hash(&self, session_id: &SessionId, csrf_hash: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })?;
        session.csrf_hash = csrf_hash.to_string();
        Ok(())
    }

    async fn revoke_session(&self, session_id: &SessionId, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })?;
        session.revoked_at.get_or_insert(at);
        Ok(())
    }

    async fn revoke_user_sessions(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut revoked = 0;
        for session in inner.sessions.values_mut() {
            if session.user_id == *user_id && session.revoked_at.is_none() {
                session.revoked_at = Some(at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let dead: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| !s.is_active(now))
            .cloned()
            .collect();
        for session in &dead {
            inner.sessions.remove(&session.id);
            inner.sessions_by_token.remove(&session.token_hash);
        }
        Ok(dead.len() as u64)
    }

    // =========================================================================
    // Activities
    // =========================================================================

    async fn insert_activity(&self, activity: &Activity) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if let Some(external_id) = &activity.external_id {
            let key = (activity.user_id, external_id.clone());
            if !inner.activity_external_ids.insert(key) {
                return Ok(false);
            }
        }
        inner.activities.push(activity.clone());
        Ok(true)
    }

    async fn list_activities(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Activity>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Activity> = inner
            .activities
            .iter()
            .filter(|a| a.user_id == *user_id && a.recorded_at >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.recorded_at);
        Ok(rows)
    }

    // =========================================================================
    // Bonus rules and awards
    // =========================================================================

    async fn put_bonus_rule(&self, rule: &BonusRule) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => inner.rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn list_bonus_rules(&self) -> Result<Vec<BonusRule>> {
        Ok(self.inner.read().await.rules.clone())
    }

    async fn set_bonus_rule_active(
        &self,
        rule_id: &BonusRuleId,
        active: bool,
    ) -> Result<BonusRule> {
        let mut inner = self.inner.write().await;
        let rule = inner
            .rules
            .iter_mut()
            .find(|r| r.id == *rule_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "bonus rule",
                id: rule_id.to_string(),
            })?;
        rule.active = active;
        Ok(rule.clone())
    }

    async fn record_award(&self, award: &BonusAward) -> Result<AwardOutcome> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.awards.iter().find(|a| {
            a.user_id == award.user_id
                && a.rule_id == award.rule_id
                && a.period_start == award.period_start
        }) {
            let existing = existing.clone();
            let entry = inner
                .entries_by_key
                .get(&existing.award_key())
                .map(|&idx| inner.entries[idx].clone());
            return Ok(AwardOutcome {
                award: existing,
                entry,
                replayed: true,
            });
        }

        let entry = match award_credit(award) {
            Some(request) => Some(inner.apply(&request)?.entry),
            None => None,
        };
        inner.awards.push(award.clone());

        Ok(AwardOutcome {
            award: award.clone(),
            entry,
            replayed: false,
        })
    }

    async fn list_awards(&self, user_id: &UserId) -> Result<Vec<BonusAward>> {
        let inner = self.inner.read().await;
        Ok(inner
            .awards
            .iter()
            .rev()
            .filter(|a| a.user_id == *user_id)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Recipe cache
    // =========================================================================

    async fn get_cached_recipe(&self, cache_key: &str) -> Result<Option<RecipeDetails>> {
        Ok(self.inner.read().await.recipes.get(cache_key).cloned())
    }

    async fn put_cached_recipe(&self, cache_key: &str, details: &RecipeDetails) -> Result<()> {
        self.inner
            .write()
            .await
            .recipes
            .insert(cache_key.to_string(), details.clone());
        Ok(())
    }
}
