//! PostgreSQL storage implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use fittrack_core::{
    Activity, ActivityId, AwardId, BonusAward, BonusRule, BonusRuleId, EntryId, LedgerEntry,
    LedgerError, LedgerOutcome, LedgerRequest, Plan, RecipeDetails, Session, SessionId,
    TokenBalance, UserId,
};

use crate::error::{is_unique_violation, Result, StoreError};
use crate::{award_credit, replay, AwardOutcome, Store};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct BalanceRow {
    user_id: Uuid,
    plan: String,
    balance: i64,
    lifetime_consumed: i64,
    lifetime_granted: i64,
    last_reset_period: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BalanceRow> for TokenBalance {
    type Error = StoreError;

    fn try_from(row: BalanceRow) -> Result<Self> {
        Ok(Self {
            user_id: UserId::from_uuid(row.user_id),
            plan: row.plan.parse()?,
            balance: row.balance,
            lifetime_consumed: row.lifetime_consumed,
            lifetime_granted: row.lifetime_granted,
            last_reset_period: row.last_reset_period,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: String,
    user_id: Uuid,
    idempotency_key: String,
    kind: String,
    delta: i64,
    balance_after: i64,
    description: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse::<EntryId>().map_err(LedgerError::from)?,
            user_id: UserId::from_uuid(row.user_id),
            idempotency_key: row.idempotency_key,
            kind: row.kind.parse()?,
            delta: row.delta,
            balance_after: row.balance_after,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    csrf_hash: String,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: SessionId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            token_hash: row.token_hash,
            csrf_hash: row.csrf_hash,
            user_agent: row.user_agent,
            created_at: row.created_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    value: f64,
    source: String,
    external_id: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for Activity {
    type Error = StoreError;

    fn try_from(row: ActivityRow) -> Result<Self> {
        Ok(Self {
            id: ActivityId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            kind: row.kind.parse()?,
            value: row.value,
            source: row.source,
            external_id: row.external_id,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    period: String,
    metric: serde_json::Value,
    threshold: f64,
    reward_tokens: i64,
    reward_xp: i64,
    active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for BonusRule {
    type Error = StoreError;

    fn try_from(row: RuleRow) -> Result<Self> {
        Ok(Self {
            id: BonusRuleId::from_uuid(row.id),
            name: row.name,
            period: row.period.parse()?,
            metric: serde_json::from_value(row.metric)?,
            threshold: row.threshold,
            reward_tokens: row.reward_tokens,
            reward_xp: row.reward_xp,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AwardRow {
    id: String,
    user_id: Uuid,
    rule_id: Uuid,
    rule_name: String,
    period_start: NaiveDate,
    reward_tokens: i64,
    reward_xp: i64,
    awarded_at: DateTime<Utc>,
}

impl TryFrom<AwardRow> for BonusAward {
    type Error = StoreError;

    fn try_from(row: AwardRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse::<AwardId>().map_err(LedgerError::from)?,
            user_id: UserId::from_uuid(row.user_id),
            rule_id: BonusRuleId::from_uuid(row.rule_id),
            rule_name: row.rule_name,
            period_start: row.period_start,
            reward_tokens: row.reward_tokens,
            reward_xp: row.reward_xp,
            awarded_at: row.awarded_at,
        })
    }
}

const ENTRY_COLUMNS: &str = "id, user_id, idempotency_key, kind, delta, balance_after, \
                             description, metadata, created_at";

const AWARD_COLUMNS: &str = "id, user_id, rule_id, rule_name, period_start, reward_tokens, \
                             reward_xp, awarded_at";

// ============================================================================
// Ledger helpers (run inside a transaction)
// ============================================================================

async fn fetch_entry(conn: &mut PgConnection, key: &str) -> Result<Option<LedgerEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1");
    sqlx::query_as::<_, EntryRow>(&sql)
        .bind(key)
        .fetch_optional(conn)
        .await?
        .map(LedgerEntry::try_from)
        .transpose()
}

/// Lock the balance row, apply the request and append the entry.
///
/// Returns `None` when the entry insert lost a race on the idempotency key;
/// the caller must roll back and replay.
async fn apply_locked(
    conn: &mut PgConnection,
    request: &LedgerRequest,
) -> Result<Option<LedgerOutcome>> {
    let row = sqlx::query_as::<_, BalanceRow>(
        "SELECT user_id, plan, balance, lifetime_consumed, lifetime_granted, last_reset_period, \
                created_at, updated_at \
         FROM token_balances WHERE user_id = $1 FOR UPDATE",
    )
    .bind(request.user_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| not_found("balance", request.user_id))?;

    // Checked under the row lock so same-user replays serialize here.
    if let Some(existing) = fetch_entry(conn, &request.idempotency_key).await? {
        return replay(existing, request).map(Some);
    }

    let mut balance = TokenBalance::try_from(row)?;
    let entry = balance.apply(request, Utc::now())?;

    sqlx::query(
        "UPDATE token_balances \
         SET balance = $2, lifetime_consumed = $3, lifetime_granted = $4, \
             last_reset_period = $5, updated_at = $6 \
         WHERE user_id = $1",
    )
    .bind(balance.user_id.as_uuid())
    .bind(balance.balance)
    .bind(balance.lifetime_consumed)
    .bind(balance.lifetime_granted)
    .bind(&balance.last_reset_period)
    .bind(balance.updated_at)
    .execute(&mut *conn)
    .await?;

    let inserted = sqlx::query(
        "INSERT INTO ledger_entries \
         (id, user_id, idempotency_key, kind, delta, balance_after, description, metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(entry.id.to_string())
    .bind(entry.user_id.as_uuid())
    .bind(&entry.idempotency_key)
    .bind(entry.kind.as_str())
    .bind(entry.delta)
    .bind(entry.balance_after)
    .bind(&entry.description)
    .bind(&entry.metadata)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => Ok(Some(LedgerOutcome {
            entry,
            replayed: false,
        })),
        Err(e) if is_unique_violation(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Balances
    // =========================================================================

    async fn create_balance(&self, balance: &TokenBalance) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO token_balances \
             (user_id, plan, balance, lifetime_consumed, lifetime_granted, last_reset_period, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(balance.user_id.as_uuid())
        .bind(balance.plan.as_str())
        .bind(balance.balance)
        .bind(balance.lifetime_consumed)
        .bind(balance.lifetime_granted)
        .bind(&balance.last_reset_period)
        .bind(balance.created_at)
        .bind(balance.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists {
                entity: "balance",
                id: balance.user_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_balance(&self, user_id: &UserId) -> Result<Option<TokenBalance>> {
        sqlx::query_as::<_, BalanceRow>(
            "SELECT user_id, plan, balance, lifetime_consumed, lifetime_granted, \
                    last_reset_period, created_at, updated_at \
             FROM token_balances WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(TokenBalance::try_from)
        .transpose()
    }

    async fn list_balances(&self, limit: usize, offset: usize) -> Result<Vec<TokenBalance>> {
        sqlx::query_as::<_, BalanceRow>(
            "SELECT user_id, plan, balance, lifetime_consumed, lifetime_granted, \
                    last_reset_period, created_at, updated_at \
             FROM token_balances ORDER BY user_id LIMIT $1 OFFSET $2",
        )
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TokenBalance::try_from)
        .collect()
    }

    async fn set_plan(&self, user_id: &UserId, plan: Plan) -> Result<TokenBalance> {
        sqlx::query_as::<_, BalanceRow>(
            "UPDATE token_balances SET plan = $2, updated_at = $3 WHERE user_id = $1 \
             RETURNING user_id, plan, balance, lifetime_consumed, lifetime_granted, \
                       last_reset_period, created_at, updated_at",
        )
        .bind(user_id.as_uuid())
        .bind(plan.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found("balance", user_id))?
        .try_into()
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    async fn apply_ledger(&self, request: &LedgerRequest) -> Result<LedgerOutcome> {
        let mut tx = self.pool.begin().await?;
        if let Some(outcome) = apply_locked(&mut tx, request).await? {
            tx.commit().await?;
            return Ok(outcome);
        }
        tx.rollback().await?;

        debug!(idempotency_key = %request.idempotency_key, "Ledger insert raced, replaying");
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_entry(&mut conn, &request.idempotency_key)
            .await?
            .ok_or_else(|| not_found("ledger entry", &request.idempotency_key))?;
        replay(existing, request)
    }

    async fn get_entry_by_key(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entry(&mut conn, idempotency_key).await
    }

    async fn list_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, EntryRow>(&sql)
            .bind(user_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    async fn put_session(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO sessions \
             (id, user_id, token_hash, csrf_hash, user_agent, created_at, expires_at, revoked_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_uuid())
        .bind(&session.token_hash)
        .bind(&session.csrf_hash)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists {
                entity: "session",
                id: session.id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, user_id, token_hash, csrf_hash, user_agent, created_at, expires_at, \
                    revoked_at \
             FROM sessions WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    async fn update_csrf_hash(&self, session_id: &SessionId, csrf_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET csrf_hash = $2 WHERE id = $1")
            .bind(session_id.as_uuid())
            .bind(csrf_hash)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found("session", session_id));
        }
        Ok(())
    }

    async fn revoke_session(&self, session_id: &SessionId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = COALESCE(revoked_at, $2) WHERE id = $1",
        )
        .bind(session_id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(not_found("session", session_id));
        }
        Ok(())
    }

    async fn revoke_user_sessions(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM sessions WHERE expires_at <= $1 OR revoked_at IS NOT NULL")
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Activities
    // =========================================================================

    async fn insert_activity(&self, activity: &Activity) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO activities (id, user_id, kind, value, source, external_id, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, external_id) DO NOTHING",
        )
        .bind(activity.id.as_uuid())
        .bind(activity.user_id.as_uuid())
        .bind(activity.kind.as_str())
        .bind(activity.value)
        .bind(&activity.source)
        .bind(&activity.external_id)
        .bind(activity.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_activities(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Activity>> {
        sqlx::query_as::<_, ActivityRow>(
            "SELECT id, user_id, kind, value, source, external_id, recorded_at \
             FROM activities WHERE user_id = $1 AND recorded_at >= $2 \
             ORDER BY recorded_at",
        )
        .bind(user_id.as_uuid())
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Activity::try_from)
        .collect()
    }

    // =========================================================================
    // Bonus rules and awards
    // =========================================================================

    async fn put_bonus_rule(&self, rule: &BonusRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO bonus_rules \
             (id, name, period, metric, threshold, reward_tokens, reward_xp, active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, period = EXCLUDED.period, metric = EXCLUDED.metric, \
               threshold = EXCLUDED.threshold, reward_tokens = EXCLUDED.reward_tokens, \
               reward_xp = EXCLUDED.reward_xp, active = EXCLUDED.active",
        )
        .bind(rule.id.as_uuid())
        .bind(&rule.name)
        .bind(rule.period.as_str())
        .bind(serde_json::to_value(&rule.metric)?)
        .bind(rule.threshold)
        .bind(rule.reward_tokens)
        .bind(rule.reward_xp)
        .bind(rule.active)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_bonus_rules(&self) -> Result<Vec<BonusRule>> {
        sqlx::query_as::<_, RuleRow>(
            "SELECT id, name, period, metric, threshold, reward_tokens, reward_xp, active, \
                    created_at \
             FROM bonus_rules ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(BonusRule::try_from)
        .collect()
    }

    async fn set_bonus_rule_active(
        &self,
        rule_id: &BonusRuleId,
        active: bool,
    ) -> Result<BonusRule> {
        sqlx::query_as::<_, RuleRow>(
            "UPDATE bonus_rules SET active = $2 WHERE id = $1 \
             RETURNING id, name, period, metric, threshold, reward_tokens, reward_xp, active, \
                       created_at",
        )
        .bind(rule_id.as_uuid())
        .bind(active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found("bonus rule", rule_id))?
        .try_into()
    }

    async fn record_award(&self, award: &BonusAward) -> Result<AwardOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO bonus_awards \
             (id, user_id, rule_id, rule_name, period_start, reward_tokens, reward_xp, awarded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id, rule_id, period_start) DO NOTHING",
        )
        .bind(award.id.to_string())
        .bind(award.user_id.as_uuid())
        .bind(award.rule_id.as_uuid())
        .bind(&award.rule_name)
        .bind(award.period_start)
        .bind(award.reward_tokens)
        .bind(award.reward_xp)
        .bind(award.awarded_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let sql = format!(
                "SELECT {AWARD_COLUMNS} FROM bonus_awards \
                 WHERE user_id = $1 AND rule_id = $2 AND period_start = $3"
            );
            let existing: BonusAward = sqlx::query_as::<_, AwardRow>(&sql)
                .bind(award.user_id.as_uuid())
                .bind(award.rule_id.as_uuid())
                .bind(award.period_start)
                .fetch_one(&mut *tx)
                .await?
                .try_into()?;
            let entry = fetch_entry(&mut tx, &existing.award_key()).await?;
            tx.rollback().await?;
            return Ok(AwardOutcome {
                award: existing,
                entry,
                replayed: true,
            });
        }

        let entry = match award_credit(award) {
            Some(request) => {
                let outcome = apply_locked(&mut tx, &request)
                    .await?
                    .ok_or_else(|| StoreError::IdempotencyConflict {
                        key: request.idempotency_key.clone(),
                    })?;
                Some(outcome.entry)
            }
            None => None,
        };
        tx.commit().await?;

        Ok(AwardOutcome {
            award: award.clone(),
            entry,
            replayed: false,
        })
    }

    async fn list_awards(&self, user_id: &UserId) -> Result<Vec<BonusAward>> {
        let sql = format!(
            "SELECT {AWARD_COLUMNS} FROM bonus_awards WHERE user_id = $1 \
             ORDER BY awarded_at DESC, id DESC"
        );
        sqlx::query_as::<_, AwardRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(BonusAward::try_from)
            .collect()
    }

    // =========================================================================
    // Recipe cache
    // =========================================================================

    async fn get_cached_recipe(&self, cache_key: &str) -> Result<Option<RecipeDetails>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT details FROM recipe_cache WHERE cache_key = $1")
                .bind(cache_key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(details,)| serde_json::from_value(details).map_err(StoreError::from))
            .transpose()
    }

    async fn put_cached_recipe(&self, cache_key: &str, details: &RecipeDetails) -> Result<()> {
        sqlx::query(
            "INSERT INTO recipe_cache (cache_key, details, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (cache_key) DO UPDATE SET details = EXCLUDED.details, \
                                                   created_at = EXCLUDED.created_at",
        )
        .bind(cache_key)
        .bind(serde_json::to_value(details)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// Run with a scratch database:
// DATABASE_URL=postgres://... cargo test -p fittrack-store -- --ignored
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fittrack_core::{ActivityKind, BonusMetric, BonusPeriod, EntryKind, Feature};

    async fn test_store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::connect(&url, 10).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    /// A fresh user with `tokens` granted. Keys are prefixed with the user id
    /// because the database outlives a single run.
    async fn funded_user(store: &PgStore, tokens: i64) -> UserId {
        let user = UserId::generate();
        store
            .create_balance(&TokenBalance::new(user, Plan::Free, Utc::now()))
            .await
            .unwrap();
        if tokens > 0 {
            store
                .apply_ledger(&LedgerRequest::grant(format!("{user}:seed"), user, tokens, "seed"))
                .await
                .unwrap();
        }
        user
    }

    fn consume(user: UserId, key: &str, amount: i64) -> LedgerRequest {
        LedgerRequest::consume(format!("{user}:{key}"), user, &Feature::Transcription, amount)
    }

    async fn balance_of(store: &PgStore, user: &UserId) -> i64 {
        store.get_balance(user).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn replayed_key_debits_once() {
        let store = test_store().await;
        let user = funded_user(&store, 10).await;
        let req = consume(user, "req-1", 3);

        let first = store.apply_ledger(&req).await.unwrap();
        let second = store.apply_ledger(&req).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.entry.id, second.entry.id);
        assert_eq!(second.balance_after(), 7);
        assert_eq!(balance_of(&store, &user).await, 7);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn overdraw_changes_nothing() {
        let store = test_store().await;
        let user = funded_user(&store, 1).await;
        let req = consume(user, "too-much", 2);

        let err = store.apply_ledger(&req).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::InsufficientTokens {
                balance: 1,
                required: 2
            }
        ));
        assert_eq!(balance_of(&store, &user).await, 1);
        assert!(store
            .get_entry_by_key(&req.idempotency_key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL"]
    async fn concurrent_debits_never_overdraw() {
        let store = test_store().await;
        let user = funded_user(&store, 5).await;

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.apply_ledger(&consume(user, &format!("c{i}"), 1)).await
                })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(StoreError::InsufficientTokens { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(succeeded, 5);
        assert_eq!(balance_of(&store, &user).await, 0);
        // Seed grant plus five debits.
        assert_eq!(store.list_entries(&user, 100, 0).await.unwrap().len(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL"]
    async fn concurrent_requests_with_one_key_apply_once() {
        let store = test_store().await;
        let user = funded_user(&store, 10).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.apply_ledger(&consume(user, "same", 1)).await })
            })
            .collect();

        let mut fresh = 0;
        for handle in handles {
            if !handle.await.unwrap().unwrap().replayed {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1);
        assert_eq!(balance_of(&store, &user).await, 9);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn key_reuse_by_other_user_conflicts() {
        let store = test_store().await;
        let user = funded_user(&store, 5).await;
        let other = funded_user(&store, 5).await;
        let req = consume(user, "shared", 1);
        store.apply_ledger(&req).await.unwrap();

        let err = store
            .apply_ledger(&LedgerRequest::consume(
                req.idempotency_key.clone(),
                other,
                &Feature::Transcription,
                1,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::IdempotencyConflict { .. }));
        assert_eq!(balance_of(&store, &other).await, 5);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn monthly_reset_sets_allowance_and_period() {
        let store = test_store().await;
        let user = funded_user(&store, 7).await;

        let outcome = store
            .apply_ledger(&LedgerRequest::monthly_reset(user, 20, "2099-03"))
            .await
            .unwrap();

        assert_eq!(outcome.entry.kind, EntryKind::MonthlyReset);
        assert_eq!(outcome.entry.delta, 13);
        let balance = store.get_balance(&user).await.unwrap().unwrap();
        assert_eq!(balance.balance, 20);
        assert_eq!(balance.last_reset_period.as_deref(), Some("2099-03"));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn entries_are_listed_newest_first() {
        let store = test_store().await;
        let user = funded_user(&store, 10).await;
        for i in 0..3 {
            store.apply_ledger(&consume(user, &format!("n{i}"), 1)).await.unwrap();
        }

        let entries = store.list_entries(&user, 2, 0).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].idempotency_key, format!("{user}:n2"));
        assert_eq!(entries[0].balance_after, 7);
        let rest = store.list_entries(&user, 10, 2).await.unwrap();
        assert_eq!(rest.last().unwrap().kind, EntryKind::Grant);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn award_is_recorded_and_credited_once() {
        let store = test_store().await;
        let user = funded_user(&store, 0).await;
        let rule = BonusRule {
            id: BonusRuleId::generate(),
            name: "Three workouts".into(),
            period: BonusPeriod::Weekly,
            metric: BonusMetric::ActivityCount {
                kind: ActivityKind::Workout,
            },
            threshold: 3.0,
            reward_tokens: 4,
            reward_xp: 30,
            active: true,
            created_at: Utc::now(),
        };
        store.put_bonus_rule(&rule).await.unwrap();
        let award = BonusAward {
            id: AwardId::generate(),
            user_id: user,
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            period_start: Utc::now().date_naive(),
            reward_tokens: 4,
            reward_xp: 30,
            awarded_at: Utc::now(),
        };

        let first = store.record_award(&award).await.unwrap();
        let mut again = award.clone();
        again.id = AwardId::generate();
        let second = store.record_award(&again).await.unwrap();

        assert!(!first.replayed);
        assert_eq!(first.entry.as_ref().unwrap().balance_after, 4);
        assert!(second.replayed);
        assert_eq!(second.award.id, award.id);
        let entry_id = |o: &AwardOutcome| o.entry.as_ref().map(|e| e.id.to_string());
        assert_eq!(entry_id(&second), entry_id(&first));
        assert_eq!(balance_of(&store, &user).await, 4);
        assert_eq!(store.list_awards(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn award_without_balance_is_rolled_back() {
        let store = test_store().await;
        let user = UserId::generate();
        let rule = BonusRule {
            id: BonusRuleId::generate(),
            name: "Daily".into(),
            period: BonusPeriod::Daily,
            metric: BonusMetric::ActiveDays,
            threshold: 1.0,
            reward_tokens: 2,
            reward_xp: 0,
            active: true,
            created_at: Utc::now(),
        };
        store.put_bonus_rule(&rule).await.unwrap();
        let award = BonusAward {
            id: AwardId::generate(),
            user_id: user,
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            period_start: Utc::now().date_naive(),
            reward_tokens: 2,
            reward_xp: 0,
            awarded_at: Utc::now(),
        };

        let err = store.record_award(&award).await.unwrap_err();

        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.list_awards(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn imported_activities_are_deduplicated() {
        let store = test_store().await;
        let user = UserId::generate();
        let now = Utc::now();
        let a = Activity::imported(user, ActivityKind::Workout, 40.0, "garmin", "w1", now);
        let b = Activity::imported(user, ActivityKind::Workout, 40.0, "garmin", "w1", now);

        assert!(store.insert_activity(&a).await.unwrap());
        assert!(!store.insert_activity(&b).await.unwrap());
        assert!(store
            .insert_activity(&Activity::manual(user, ActivityKind::Meal, 300.0, now))
            .await
            .unwrap());

        let rows = store
            .list_activities(&user, now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn sessions_are_revoked_per_user() {
        let store = test_store().await;
        let user = UserId::generate();
        let now = Utc::now();
        let make = || {
            let id = SessionId::generate();
            Session {
                id,
                user_id: user,
                token_hash: format!("hash-{id}"),
                csrf_hash: "c".into(),
                user_agent: Some("test".into()),
                created_at: now,
                expires_at: now + Duration::hours(1),
                revoked_at: None,
            }
        };
        let (a, b) = (make(), make());
        store.put_session(&a).await.unwrap();
        store.put_session(&b).await.unwrap();
        store.revoke_session(&a.id, now).await.unwrap();

        assert_eq!(store.revoke_user_sessions(&user, now).await.unwrap(), 1);
        let stored = store
            .get_session_by_token_hash(&b.token_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_active(now));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn recipe_cache_round_trips() {
        let store = test_store().await;
        let key = format!("recipe:test:{}", Uuid::new_v4());
        let details: RecipeDetails =
            serde_json::from_str(r#"{"title":"Oats","servings":1,"steps":["Soak"]}"#).unwrap();

        assert!(store.get_cached_recipe(&key).await.unwrap().is_none());
        store.put_cached_recipe(&key, &details).await.unwrap();

        assert_eq!(store.get_cached_recipe(&key).await.unwrap(), Some(details));
    }
}
