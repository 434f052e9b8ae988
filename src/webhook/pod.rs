//! Pod Mutation Webhook
//!
//! Handles AdmissionReview requests for Pod resources, injecting the
//! SkyWalking agent according to the pod's annotations.

use std::sync::Arc;

use axum::{extract::State, Json};
use kube::core::{
    admission::{
        AdmissionRequest, AdmissionResponse, AdmissionReview, ConvertAdmissionReviewError,
    },
    DynamicObject,
};
use tracing::{debug, error, info};

use crate::injector::PatchEngine;

use super::WebhookState;

/// Handle mutating admission review for Pods
///
/// This handler:
/// 1. Decodes the admission review from the raw JSON body
/// 2. Runs the patch engine on the embedded pod
/// 3. Returns an allowing response, with a JSONPatch when there is one
/// 4. Denies the pod when decoding or the engine fails, so no silent empty
///    patch is applied
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req = match parse_review(body) {
        Ok(req) => req,
        Err(response) => return Json(response.into_review()),
    };

    let response = mutate_pod(&state.engine, &req);
    Json(response.into_review())
}

/// Decode an AdmissionReview body into its request
///
/// Decoding happens here rather than in the extractor so that a pod the
/// webhook cannot read still gets an AdmissionReview back, carrying the
/// request uid when one can be recovered.
pub fn parse_review(
    body: serde_json::Value,
) -> Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    let uid = body
        .pointer("/request/uid")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let invalid = |reason: String| {
        let mut response = AdmissionResponse::invalid(reason);
        if let Some(uid) = &uid {
            response.uid = uid.clone();
        }
        response
    };

    let review: AdmissionReview<DynamicObject> = serde_json::from_value(body).map_err(|e| {
        error!(uid = ?uid, error = %e, "Failed to decode admission review");
        invalid(format!("could not deserialize admission review: {e}"))
    })?;

    review.try_into().map_err(|e: ConvertAdmissionReviewError| {
        error!(uid = ?uid, error = %e, "Failed to parse admission request");
        invalid(e.to_string())
    })
}

/// Process a single pod mutation request
pub fn mutate_pod(
    engine: &PatchEngine,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = request.uid.clone();
    let pod_name = request
        .object
        .as_ref()
        .and_then(|o| o.metadata.name.clone())
        .or_else(|| (!request.name.is_empty()).then(|| request.name.clone()));

    let patch_ops = match engine.compute_patches(request) {
        Ok(ops) => ops,
        Err(e) => {
            error!(
                uid = %uid,
                pod = ?pod_name,
                namespace = ?request.namespace,
                error = %e,
                "Failed to compute pod patch, denying"
            );
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    if patch_ops.is_empty() {
        debug!(uid = %uid, pod = ?pod_name, "Nothing to inject, allowing unchanged");
        return AdmissionResponse::from(request);
    }

    info!(
        uid = %uid,
        pod = ?pod_name,
        namespace = ?request.namespace,
        patch_ops = patch_ops.len(),
        "Applying SkyWorking patch to pod"
    );

    match AdmissionResponse::from(request).with_patch(json_patch::Patch(patch_ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}
