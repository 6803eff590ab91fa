//! Logged activities: workouts, meals, fasts, water and weigh-ins.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::{ActivityId, UserId};

/// Source tag for activities entered by the user.
pub const MANUAL_SOURCE: &str = "manual";

/// What kind of activity a row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Training session; value is minutes.
    Workout,
    /// Logged meal; value is kcal.
    Meal,
    /// Completed fast; value is hours.
    Fast,
    /// Water intake; value is millilitres.
    Water,
    /// Body weight; value is kilograms.
    WeighIn,
}

impl ActivityKind {
    /// All kinds, in display order.
    pub const ALL: [Self; 5] = [
        Self::Workout,
        Self::Meal,
        Self::Fast,
        Self::Water,
        Self::WeighIn,
    ];

    /// Stable text form used in storage and JSON.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workout => "workout",
            Self::Meal => "meal",
            Self::Fast => "fast",
            Self::Water => "water",
            Self::WeighIn => "weigh_in",
        }
    }

    /// Unit of [`Activity::value`] for this kind.
    #[must_use]
    pub const fn unit(&self) -> &'static str {
        match self {
            Self::Workout => "minutes",
            Self::Meal => "kcal",
            Self::Fast => "hours",
            Self::Water => "ml",
            Self::WeighIn => "kg",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LedgerError::UnknownVariant {
                kind: "activity kind",
                value: s.to_string(),
            })
    }
}

/// One logged activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Row identifier.
    pub id: ActivityId,
    /// Owner.
    pub user_id: UserId,
    /// Kind of activity.
    pub kind: ActivityKind,
    /// Measured value in [`ActivityKind::unit`].
    pub value: f64,
    /// `manual` or the wearable provider that produced the row.
    pub source: String,
    /// Provider identifier, unique per user; used to skip re-imports.
    pub external_id: Option<String>,
    /// When the activity happened.
    pub recorded_at: DateTime<Utc>,
}

impl Activity {
    /// A manually logged activity.
    #[must_use]
    pub fn manual(
        user_id: UserId,
        kind: ActivityKind,
        value: f64,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActivityId::generate(),
            user_id,
            kind,
            value,
            source: MANUAL_SOURCE.to_string(),
            external_id: None,
            recorded_at,
        }
    }

    /// An activity imported from a wearable provider.
    #[must_use]
    pub fn imported(
        user_id: UserId,
        kind: ActivityKind,
        value: f64,
        provider: &str,
        external_id: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActivityId::generate(),
            user_id,
            kind,
            value,
            source: provider.to_string(),
            external_id: Some(external_id.into()),
            recorded_at,
        }
    }
}
