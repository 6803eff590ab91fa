//! Core types for fittrack.
//!
//! - **Identifiers**: `UserId`, `SessionId`, `EntryId`, `AwardId`, ...
//! - **Balances and ledger**: `TokenBalance`, `LedgerRequest`, `LedgerEntry`
//! - **Pricing**: `TokenPricing`, `Plan`, `Feature`
//! - **Sessions**: `Session`
//! - **Gamification**: `Activity`, `BonusRule`, `BonusAward`, XP and levels
//! - **Recipes**: `RecipeDetails`
//!
//! # Tokens
//!
//! A token is an integer usage unit. AI features debit a fixed number of
//! tokens per call; each plan is reset to its monthly allowance at the start
//! of every month. Balances never go below zero.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod activity;
pub mod balance;
pub mod error;
pub mod gamification;
pub mod ids;
pub mod ledger;
pub mod pricing;
pub mod recipe;
pub mod session;

pub use activity::{Activity, ActivityKind, MANUAL_SOURCE};
pub use balance::TokenBalance;
pub use error::{LedgerError, Result};
pub use gamification::{
    activity_stats, award_key, due_awards, level_for_xp, total_xp, xp_for_activity, ActivityStats,
    BonusAward, BonusMetric, BonusPeriod, BonusRule, KindStats, LevelProgress,
};
pub use ids::{ActivityId, AwardId, BonusRuleId, EntryId, IdError, SessionId, UserId};
pub use ledger::{
    parse_period, period_key, EntryKind, LedgerEntry, LedgerOutcome, LedgerRequest, Mutation,
};
pub use pricing::{Feature, Plan, TokenPricing};
pub use recipe::{recipe_cache_key, Ingredient, Nutrition, RecipeDetails};
pub use session::Session;
