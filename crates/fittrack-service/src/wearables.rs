//! Wearable provider client and workout mapping.
//!
//! Providers expose `GET {base}/v1/workouts?since=<rfc3339>` authorized with
//! the user's provider access token. The same workout shape arrives through
//! signed webhooks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use fittrack_core::{Activity, ActivityKind, UserId};

/// Longest workout accepted from a provider, in minutes.
const MAX_WORKOUT_MINUTES: f64 = 24.0 * 60.0;

/// Error type for wearable provider operations.
#[derive(Debug, thiserror::Error)]
pub enum WearableError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider rejected the request.
    #[error("provider error: {status}")]
    Api {
        /// HTTP status code.
        status: u16,
    },
}

/// One workout as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WearableWorkout {
    /// Provider-side identifier, unique per user.
    pub id: String,
    /// Provider activity type ("run", "ride"...), informational.
    #[serde(default, rename = "type")]
    pub workout_type: Option<String>,
    /// Duration in minutes.
    pub duration_minutes: f64,
    /// Start time.
    pub started_at: DateTime<Utc>,
}

/// Response of the provider workouts endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutsResponse {
    /// Workouts since the requested instant.
    #[serde(default)]
    pub workouts: Vec<WearableWorkout>,
}

impl WearableWorkout {
    /// Map to an activity row, or `None` for implausible durations.
    #[must_use]
    pub fn to_activity(&self, user_id: UserId, provider: &str) -> Option<Activity> {
        if !self.duration_minutes.is_finite()
            || self.duration_minutes <= 0.0
            || self.duration_minutes > MAX_WORKOUT_MINUTES
        {
            return None;
        }
        Some(Activity::imported(
            user_id,
            ActivityKind::Workout,
            self.duration_minutes,
            provider,
            format!("{provider}:{}", self.id),
            self.started_at,
        ))
    }
}

/// Wearable provider API client.
#[derive(Debug, Clone)]
pub struct WearableClient {
    client: Client,
    base_url: String,
}

impl WearableClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WearableError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch workouts recorded since `since` (everything when `None`).
    pub async fn fetch_workouts(
        &self,
        access_token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WearableWorkout>, WearableError> {
        let url = format!("{}/v1/workouts", self.base_url);

        let mut request = self.client.get(&url).bearer_auth(access_token);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WearableError::Api {
                status: status.as_u16(),
            });
        }

        let body: WorkoutsResponse = response.json().await?;
        tracing::debug!(count = body.workouts.len(), "Fetched wearable workouts");
        Ok(body.workouts)
    }
}
