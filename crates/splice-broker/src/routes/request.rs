//! Request intake: accept, validate, persist, publish.

use axum::extract::{Request as HttpRequest, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration, Utc};
use splice_models::{ClientRequest, Request, Response, StatusCode};

use crate::config::BrokerConfig;
use crate::reqid;
use crate::state::AppState;
use crate::validators::{self, Validator};

/// Request bodies larger than this are junk, not join requests.
const MAX_BODY_BYTES: usize = 1 << 20;

/// Age after which stuck requests are swept to Failed.
fn orphan_age() -> Duration {
    Duration::hours(24)
}

/// `POST /request` — user-interactive joins.
pub async fn attended(
    State(state): State<AppState>,
    request: HttpRequest,
) -> Json<Response> {
    let chain = validators::attended();
    Json(process_request(&state, request, &chain).await)
}

/// `POST /request-unattended` — headless joins with GCE attestation.
pub async fn unattended(
    State(state): State<AppState>,
    request: HttpRequest,
) -> Json<Response> {
    let chain = validators::unattended(&state);
    Json(process_request(&state, request, &chain).await)
}

async fn process_request(
    state: &AppState,
    request: HttpRequest,
    chain: &[Validator],
) -> Response {
    let (parts, body) = request.into_parts();

    let mut req = match unmarshal_request(body).await {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    if let Err(reason) = verify_fingerprint(&state.config, &req.client_id, &parts.headers) {
        return Response::failure(StatusCode::InvalidCertError, reason);
    }

    if let Err(rejection) = validators::run_chain(chain, &mut req).await {
        return Response::failure(rejection.code, rejection.reason);
    }

    // New requests require a cryptographically secure RequestID of
    // sufficient length.
    req.request_id = match reqid::generate(reqid::REQ_ID_LEN) {
        Ok(id) => id,
        Err(e) => {
            return Response::failure(
                StatusCode::ReqProcessingError,
                format!("requestID generation returned {e}"),
            )
        }
    };
    req.accept_time = Utc::now();
    req.status = splice_models::Status::Accepted;

    if let Err(e) = state.store.save_new(&req).await {
        return Response::failure(e.status_code(), e.to_string());
    }

    // Failure to clean up orphans is reported but does not stop processing.
    match state.store.sweep_orphans(orphan_age()).await {
        Ok(swept) if !swept.is_empty() => {
            tracing::info!(count = swept.len(), "cleaned up orphaned requests");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "orphan cleanup failed"),
    }

    if let Err(e) = state.queue.publish(&req.request_id).await {
        // The record stays persisted; the orphan path will pick it up.
        return Response::failure(StatusCode::PubsubFailure, e.to_string());
    }

    tracing::info!(request_id = %req.request_id, hostname = %req.hostname, "accepted join request");
    Response {
        request_id: req.request_id,
        status: splice_models::Status::Accepted.to_string(),
        error_code: StatusCode::Success,
        hostname: String::new(),
        response_data: Vec::new(),
        response_key: Vec::new(),
        cipher_nonce: Vec::new(),
    }
}

/// Reads and decodes the inbound body into a [`Request`] for processing.
async fn unmarshal_request(body: axum::body::Body) -> Result<Request, Response> {
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| {
            Response::failure(
                StatusCode::RequestUnreadable,
                "unable to read HTTP request body",
            )
        })?;
    if bytes.is_empty() {
        return Err(Response::failure(
            StatusCode::JsonEmpty,
            "empty HTTP JSON request body",
        ));
    }
    let client: ClientRequest = serde_json::from_slice(&bytes).map_err(|_| {
        Response::failure(
            StatusCode::JsonUnmarshalError,
            "unable to unmarshal JSON request",
        )
    })?;
    Ok(Request::from_client(client, Utc::now()))
}

/// Checks the client-supplied fingerprint against the header injected by the
/// TLS terminator. Returns the failure reason on any discrepancy.
pub(crate) fn verify_fingerprint(
    config: &BrokerConfig,
    fingerprint: &str,
    headers: &HeaderMap,
) -> Result<(), String> {
    if !config.verify_cert {
        tracing::debug!("cert fingerprint verification disabled, skipping");
        return Ok(());
    }
    if config.verify_cert_header.is_empty() {
        return Err("VERIFY_CERT_HEADER must not be empty".to_string());
    }
    let header = headers
        .get(&config.verify_cert_header)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if header.is_empty() {
        return Err(format!(
            "cert verification is enabled, but no {} header was present",
            config.verify_cert_header
        ));
    }
    if fingerprint.is_empty() {
        return Err("cert verification is enabled, a fingerprint is required".to_string());
    }
    if fingerprint != header {
        tracing::warn!(
            header = %config.verify_cert_header,
            "cert fingerprint mismatch, aborting"
        );
        return Err(format!(
            "fingerprint ({fingerprint}) did not match header {:?}",
            config.verify_cert_header
        ));
    }
    Ok(())
}
