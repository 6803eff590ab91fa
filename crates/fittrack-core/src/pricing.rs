//! Token pricing: what each metered feature costs and what each plan grants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Default monthly allowance for the free plan.
pub const DEFAULT_FREE_MONTHLY_TOKENS: i64 = 20;

/// Default monthly allowance for the premium plan.
pub const DEFAULT_PREMIUM_MONTHLY_TOKENS: i64 = 200;

/// Default cost of one audio transcription.
pub const DEFAULT_TRANSCRIPTION_COST: i64 = 1;

/// Default cost of one recipe detail generation.
pub const DEFAULT_RECIPE_DETAILS_COST: i64 = 2;

/// Subscription plan attached to a token balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Free tier.
    Free,
    /// Paid tier with a larger monthly allowance.
    Premium,
}

impl Plan {
    /// Stable text form used in storage and JSON.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            other => Err(LedgerError::UnknownVariant {
                kind: "plan",
                value: other.to_string(),
            }),
        }
    }
}

/// A metered feature that consumes tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Speech-to-text of a meal or workout voice note.
    Transcription,
    /// AI generated recipe ingredients, steps and nutrition.
    RecipeDetails,
    /// Any other feature reported by a service caller.
    Custom(String),
}

impl Feature {
    /// Name used in ledger descriptions and metadata.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Transcription => "transcription",
            Self::RecipeDetails => "recipe_details",
            Self::Custom(name) => name,
        }
    }
}

/// Token prices and plan allowances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPricing {
    /// Tokens per transcription.
    pub transcription_cost: i64,
    /// Tokens per recipe detail generation.
    pub recipe_details_cost: i64,
    /// Monthly allowance of the free plan.
    pub free_monthly_tokens: i64,
    /// Monthly allowance of the premium plan.
    pub premium_monthly_tokens: i64,
}

impl Default for TokenPricing {
    fn default() -> Self {
        Self {
            transcription_cost: DEFAULT_TRANSCRIPTION_COST,
            recipe_details_cost: DEFAULT_RECIPE_DETAILS_COST,
            free_monthly_tokens: DEFAULT_FREE_MONTHLY_TOKENS,
            premium_monthly_tokens: DEFAULT_PREMIUM_MONTHLY_TOKENS,
        }
    }
}

impl TokenPricing {
    /// Cost of a built-in feature. Custom features are priced by their caller.
    #[must_use]
    pub fn cost_of(&self, feature: &Feature) -> Option<i64> {
        match feature {
            Feature::Transcription => Some(self.transcription_cost),
            Feature::RecipeDetails => Some(self.recipe_details_cost),
            Feature::Custom(_) => None,
        }
    }

    /// Monthly allowance granted to a plan.
    #[must_use]
    pub const fn monthly_allowance(&self, plan: Plan) -> i64 {
        match plan {
            Plan::Free => self.free_monthly_tokens,
            Plan::Premium => self.premium_monthly_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allowances() {
        let pricing = TokenPricing::default();
        assert_eq!(pricing.monthly_allowance(Plan::Free), 20);
        assert_eq!(pricing.monthly_allowance(Plan::Premium), 200);
    }

    #[test]
    fn custom_features_have_no_built_in_cost() {
        let pricing = TokenPricing::default();
        assert_eq!(pricing.cost_of(&Feature::Transcription), Some(1));
        assert_eq!(pricing.cost_of(&Feature::RecipeDetails), Some(2));
        assert_eq!(pricing.cost_of(&Feature::Custom("meal_scan".into())), None);
    }

    #[test]
    fn plan_text_form() {
        assert_eq!("premium".parse::<Plan>().unwrap(), Plan::Premium);
        assert_eq!(Plan::Free.to_string(), "free");
        assert!("gold".parse::<Plan>().is_err());
    }
}
