//! Mutating Admission Webhook for SkyWorking agent injection
//!
//! The webhook receives Pod CREATE reviews from the API server, hands the pod
//! to the [`PatchEngine`] and answers with a JSONPatch. It never fails a
//! request with a transport error: engine failures become admission denials.

pub mod pod;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::injector::PatchEngine;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Patch engine shared by every request
    pub engine: Arc<PatchEngine>,
}

impl WebhookState {
    /// Create a new webhook state around the given engine
    pub fn new(engine: Arc<PatchEngine>) -> Self {
        Self { engine }
    }
}

/// Create the webhook router with all endpoints
///
/// - POST /mutate - Mutate Pods with the SkyWalking agent
/// - GET /healthz - Liveness check
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
