//! XP, levels, activity statistics and bonus rules.
//!
//! Everything here is a pure function of activity rows and past awards; the
//! service layer loads the rows and persists new awards.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityKind};
use crate::error::LedgerError;
use crate::{AwardId, BonusRuleId, UserId};

/// XP step between levels: level `n` starts at `LEVEL_XP_STEP * n * (n - 1) / 2`.
pub const LEVEL_XP_STEP: i64 = 100;

/// Most tokens a single bonus award may credit.
pub const MAX_REWARD_TOKENS: i64 = 10_000;

/// Most XP a single bonus award may grant.
pub const MAX_REWARD_XP: i64 = 100_000;

/// Upper bound of the statistics window.
pub const MAX_STATS_WINDOW_DAYS: u32 = 366;

// ============================================================================
// XP and levels
// ============================================================================

/// XP earned by a single activity.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn xp_for_activity(activity: &Activity) -> i64 {
    let value = activity.value.max(0.0);
    match activity.kind {
        ActivityKind::Workout => (10.0 + value / 2.0).min(100.0) as i64,
        ActivityKind::Meal => 10,
        ActivityKind::Fast => (5.0 * value).min(80.0) as i64,
        ActivityKind::Water => 2,
        ActivityKind::WeighIn => 5,
    }
}

/// Total XP from activities plus the XP of bonus awards, saturating at `i64::MAX`.
#[must_use]
pub fn total_xp(activities: &[Activity], awards: &[BonusAward]) -> i64 {
    let from_activities = activities
        .iter()
        .map(xp_for_activity)
        .fold(0i64, i64::saturating_add);
    awards
        .iter()
        .map(|a| a.reward_xp)
        .fold(from_activities, i64::saturating_add)
}

/// Level position derived from total XP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelProgress {
    /// Current level, starting at 1.
    pub level: u32,
    /// Total XP.
    pub total_xp: i64,
    /// XP at which the current level started.
    pub level_floor_xp: i64,
    /// XP needed to reach the next level.
    pub next_level_xp: i64,
    /// Share of the current level span achieved, 0-100 with one decimal.
    pub progress_percent: f64,
}

/// Level floor in `i128`, which cannot overflow for any `u32` level.
fn level_floor(level: u32) -> i128 {
    let n = i128::from(level.max(1));
    i128::from(LEVEL_XP_STEP) * n * (n - 1) / 2
}

fn clamp_xp(xp: i128) -> i64 {
    i64::try_from(xp).unwrap_or(i64::MAX)
}

/// XP required to reach `level`, saturating at `i64::MAX`.
#[must_use]
pub fn xp_for_level(level: u32) -> i64 {
    clamp_xp(level_floor(level))
}

/// Compute the level for a total XP amount.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn level_for_xp(total_xp: i64) -> LevelProgress {
    let xp = total_xp.max(0);
    let target = i128::from(xp);

    // Closed form of STEP * n * (n - 1) / 2 <= xp, corrected for float error.
    let estimate = (1.0 + (1.0 + 8.0 * xp as f64 / LEVEL_XP_STEP as f64).sqrt()) / 2.0;
    let mut level = (estimate.floor() as u32).max(1);
    while level > 1 && level_floor(level) > target {
        level -= 1;
    }
    while level < u32::MAX && level_floor(level + 1) <= target {
        level += 1;
    }

    let floor = level_floor(level);
    let next = level_floor(level.saturating_add(1));
    let progress = (target - floor) as f64 / (next - floor).max(1) as f64 * 100.0;

    LevelProgress {
        level,
        total_xp: xp,
        level_floor_xp: clamp_xp(floor),
        next_level_xp: clamp_xp(next),
        progress_percent: round1(progress),
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Aggregate for one activity kind inside the statistics window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindStats {
    /// Activity kind.
    pub kind: ActivityKind,
    /// Number of rows.
    pub count: usize,
    /// Sum of values.
    pub total: f64,
    /// Mean value, one decimal; 0 when there are no rows.
    pub average: f64,
    /// Unit of `total` and `average`.
    pub unit: &'static str,
}

/// Derived statistics shown by the dashboard widgets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityStats {
    /// Days covered, ending today.
    pub window_days: u32,
    /// Days in the window with at least one activity.
    pub active_days: u32,
    /// `active_days / window_days * 100`, one decimal.
    pub active_day_percent: f64,
    /// Consecutive active days ending today (or yesterday if today is empty).
    pub current_streak: u32,
    /// Per-kind aggregates, every kind listed.
    pub kinds: Vec<KindStats>,
}

/// Compute statistics over the last `window_days` days (today included).
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn activity_stats(activities: &[Activity], now: DateTime<Utc>, window_days: u32) -> ActivityStats {
    let window_days = window_days.clamp(1, MAX_STATS_WINDOW_DAYS);
    let today = now.date_naive();
    let first_day = today - Duration::days(i64::from(window_days) - 1);

    let in_window: Vec<&Activity> = activities
        .iter()
        .filter(|a| {
            let day = a.recorded_at.date_naive();
            day >= first_day && day <= today
        })
        .collect();

    let mut per_kind: BTreeMap<ActivityKind, (usize, f64)> = BTreeMap::new();
    for a in &in_window {
        let slot = per_kind.entry(a.kind).or_insert((0, 0.0));
        slot.0 += 1;
        slot.1 += a.value;
    }

    let kinds = ActivityKind::ALL
        .into_iter()
        .map(|kind| {
            let (count, total) = per_kind.get(&kind).copied().unwrap_or((0, 0.0));
            let average = if count == 0 { 0.0 } else { total / count as f64 };
            KindStats {
                kind,
                count,
                total: round1(total),
                average: round1(average),
                unit: kind.unit(),
            }
        })
        .collect();

    let window_active: HashSet<NaiveDate> =
        in_window.iter().map(|a| a.recorded_at.date_naive()).collect();
    let active_days = window_active.len() as u32;

    let all_active: HashSet<NaiveDate> =
        activities.iter().map(|a| a.recorded_at.date_naive()).collect();

    ActivityStats {
        window_days,
        active_days,
        active_day_percent: round1(f64::from(active_days) / f64::from(window_days) * 100.0),
        current_streak: current_streak(&all_active, today),
        kinds,
    }
}

fn current_streak(active: &HashSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut day = if active.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };
    let mut streak = 0;
    while active.contains(&day) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============================================================================
// Bonus rules and awards
// ============================================================================

/// How often a bonus rule can pay out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusPeriod {
    /// Once per UTC day.
    Daily,
    /// Once per ISO week (Monday start).
    Weekly,
    /// Once per calendar month.
    Monthly,
}

impl BonusPeriod {
    /// Stable text form used in storage and JSON.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// First day of the period containing `now`.
    #[must_use]
    pub fn start_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = now.date_naive();
        match self {
            Self::Daily => today,
            Self::Weekly => today - Duration::days(i64::from(today.weekday().num_days_from_monday())),
            Self::Monthly => today.with_day(1).unwrap_or(today),
        }
    }

    /// Half-open `[start, end)` window of the period containing `now`.
    #[must_use]
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_date(now);
        let end = match self {
            Self::Daily => start + Duration::days(1),
            Self::Weekly => start + Duration::days(7),
            Self::Monthly => start.checked_add_months(Months::new(1)).unwrap_or(NaiveDate::MAX),
        };
        (midnight(start), midnight(end))
    }
}

impl fmt::Display for BonusPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BonusPeriod {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(LedgerError::UnknownVariant {
                kind: "bonus period",
                value: other.to_string(),
            }),
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// What a bonus rule measures over its period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BonusMetric {
    /// Number of activities of a kind.
    ActivityCount {
        /// Counted kind.
        kind: ActivityKind,
    },
    /// Sum of values of a kind (minutes, hours, ml...).
    TotalValue {
        /// Summed kind.
        kind: ActivityKind,
    },
    /// Distinct days with any activity.
    ActiveDays,
}

/// A rule that pays tokens and XP once a threshold is reached in a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusRule {
    /// Rule identifier.
    pub id: BonusRuleId,
    /// Display name.
    pub name: String,
    /// Payout period.
    pub period: BonusPeriod,
    /// Measured quantity.
    pub metric: BonusMetric,
    /// Value the metric must reach.
    pub threshold: f64,
    /// Tokens credited on award.
    pub reward_tokens: i64,
    /// XP added on award.
    pub reward_xp: i64,
    /// Inactive rules are never evaluated.
    pub active: bool,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
}

impl BonusRule {
    /// Validate the numeric fields of a rule.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] when the threshold is not a
    /// positive finite number or a reward is negative or both rewards are zero.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(LedgerError::InvalidAmount(
                "threshold must be a positive number".into(),
            ));
        }
        if self.reward_tokens < 0 || self.reward_xp < 0 {
            return Err(LedgerError::InvalidAmount(
                "rewards must not be negative".into(),
            ));
        }
        if self.reward_tokens > MAX_REWARD_TOKENS || self.reward_xp > MAX_REWARD_XP {
            return Err(LedgerError::InvalidAmount(format!(
                "rewards are capped at {MAX_REWARD_TOKENS} tokens and {MAX_REWARD_XP} xp"
            )));
        }
        if self.reward_tokens == 0 && self.reward_xp == 0 {
            return Err(LedgerError::InvalidAmount(
                "rule must reward tokens or xp".into(),
            ));
        }
        Ok(())
    }

    /// Measure the rule's metric for `user_id` over the period containing `now`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn measure(&self, user_id: UserId, activities: &[Activity], now: DateTime<Utc>) -> f64 {
        let (start, end) = self.period.window(now);
        let rows = activities
            .iter()
            .filter(|a| a.user_id == user_id && a.recorded_at >= start && a.recorded_at < end);

        match &self.metric {
            BonusMetric::ActivityCount { kind } => rows.filter(|a| a.kind == *kind).count() as f64,
            BonusMetric::TotalValue { kind } => {
                rows.filter(|a| a.kind == *kind).map(|a| a.value).sum()
            }
            BonusMetric::ActiveDays => rows
                .map(|a| a.recorded_at.date_naive())
                .collect::<HashSet<_>>()
                .len() as f64,
        }
    }
}

/// Immutable record of a paid-out bonus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusAward {
    /// Award identifier.
    pub id: AwardId,
    /// Recipient.
    pub user_id: UserId,
    /// Rule that paid out.
    pub rule_id: BonusRuleId,
    /// Rule name at award time.
    pub rule_name: String,
    /// First day of the period this award covers.
    pub period_start: NaiveDate,
    /// Tokens credited.
    pub reward_tokens: i64,
    /// XP added.
    pub reward_xp: i64,
    /// When the award was recorded.
    pub awarded_at: DateTime<Utc>,
}

impl BonusAward {
    /// Ledger idempotency key; one award per user, rule and period.
    #[must_use]
    pub fn award_key(&self) -> String {
        award_key(self.user_id, self.rule_id, self.period_start)
    }
}

/// Idempotency key shared by an award and its ledger credit.
#[must_use]
pub fn award_key(user_id: UserId, rule_id: BonusRuleId, period_start: NaiveDate) -> String {
    format!("bonus:{rule_id}:{user_id}:{period_start}")
}

/// Awards that `user_id` has earned at `now` and not yet received.
#[must_use]
pub fn due_awards(
    user_id: UserId,
    rules: &[BonusRule],
    activities: &[Activity],
    existing: &[BonusAward],
    now: DateTime<Utc>,
) -> Vec<BonusAward> {
    let already: HashSet<(BonusRuleId, NaiveDate)> = existing
        .iter()
        .filter(|a| a.user_id == user_id)
        .map(|a| (a.rule_id, a.period_start))
        .collect();

    rules
        .iter()
        .filter(|rule| rule.active)
        .filter_map(|rule| {
            let period_start = rule.period.start_date(now);
            if already.contains(&(rule.id, period_start)) {
                return None;
            }
            if rule.measure(user_id, activities, now) < rule.threshold {
                return None;
            }
            Some(BonusAward {
                id: AwardId::generate(),
                user_id,
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                period_start,
                reward_tokens: rule.reward_tokens,
                reward_xp: rule.reward_xp,
                awarded_at: now,
            })
        })
        .collect()
}
