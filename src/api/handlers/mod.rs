//! REST endpoint handlers organized by resource.

pub mod intents;
pub mod ops;
pub mod system;
pub mod webhook;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().merge(intents::routes())
}
