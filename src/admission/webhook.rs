//! HTTPS admission webhook for `JobGroup` writes.
//!
//! `POST /mutate` answers with a JSON patch that applies the defaults,
//! `POST /validate` runs [`admit`](super::admit) against the persisted object,
//! and `GET /healthz` is for the kubelet.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, Operation as AdmissionOperation,
};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{AllowList, Decision, Operation, admit, apply_defaults};
use crate::config::WebhookConfig;
use crate::crd::JobGroup;
use crate::error::{SpannedErr, SpannedExt};
use crate::scheduler::Shutdown;

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("failed to load TLS certificate or key: {0}")]
    Tls(#[source] std::io::Error),

    #[error("webhook server stopped: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct WebhookState {
    pub allow_list: AllowList,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/validate", post(validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

pub async fn serve(
    config: WebhookConfig,
    state: WebhookState,
    shutdown: Shutdown,
) -> Result<(), SpannedErr<WebhookError>> {
    let tls = RustlsConfig::from_pem_file(&config.tls_cert, &config.tls_key)
        .await
        .map_err(WebhookError::Tls)
        .with_span_trace()?;

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.wait().await;
        shutdown_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
    });

    info!(addr = %config.listen, "Starting admission webhook.");

    axum_server::bind_rustls(config.listen, tls)
        .handle(handle)
        .serve(router(Arc::new(state)).into_make_service())
        .instrument(info_span!("admission_webhook", addr = %config.listen))
        .await
        .map_err(WebhookError::Serve)
        .with_span_trace()
}

async fn mutate_handler(
    Json(review): Json<AdmissionReview<JobGroup>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<JobGroup> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(mutate(&request).into_review())
}

async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<JobGroup>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<JobGroup> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate(&state.allow_list, &request).into_review())
}

fn mutate(request: &AdmissionRequest<JobGroup>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    let Some(group) = &request.object else {
        return response;
    };

    let mut defaulted = group.clone();
    apply_defaults(&mut defaulted);

    let (before, after) = match (serde_json::to_value(group), serde_json::to_value(&defaulted)) {
        (Ok(before), Ok(after)) => (before, after),
        (Err(e), _) | (_, Err(e)) => {
            error!(uid = %request.uid, error = %e, "Failed to serialize group");
            return response.deny(format!("serialization error: {e}"));
        }
    };
    let patch = json_patch::diff(&before, &after);
    debug!(uid = %request.uid, ops = patch.0.len(), "Defaulting group");

    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %request.uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

fn validate(allow: &AllowList, request: &AdmissionRequest<JobGroup>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    let op = match request.operation {
        AdmissionOperation::Create => Operation::Create,
        AdmissionOperation::Update => Operation::Update,
        _ => return response,
    };
    let Some(candidate) = &request.object else {
        return response.deny("request carries no object");
    };

    match admit(request.old_object.as_ref(), candidate, op, allow) {
        Decision::Accept(_) => response,
        Decision::Reject(rejection) => {
            warn!(
                uid = %request.uid,
                group = ?candidate.metadata.name,
                reason = %rejection.reason,
                "Denied {op:?}"
            );
            response.deny(rejection.to_string())
        }
    }
}
