//! fittrack HTTP API service.
//!
//! This crate provides the HTTP API for fittrack, including:
//!
//! - Token balances, the ledger and the monthly reset
//! - Metered AI endpoints (transcription, recipe details)
//! - Activities, XP, levels and bonus awards
//! - Wearable sync and signed provider webhooks
//!
//! # Authentication
//!
//! 1. **JWT bearer tokens** - issued by the managed auth backend
//! 2. **Sessions** - exchanged for a JWT; non-safe requests also need the
//!    CSRF token
//! 3. **Service and admin API keys** - for cron jobs, services and operators

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Extractor-only handlers stay async for routing

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod openai;
pub mod routes;
pub mod state;
pub mod wearables;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use openai::{OpenAiClient, OpenAiError};
pub use routes::create_router;
pub use state::AppState;
pub use wearables::{WearableClient, WearableError};
