//! Result retrieval: replay protection, orphan release, and the one-shot
//! return of the sealed join blob.

use axum::extract::{Request as HttpRequest, State};
use axum::Json;
use chrono::{Duration, Utc};
use splice_models::{Request, Response, Status, StatusCode, StatusQuery};
use splice_store::StoreError;

use crate::routes::verify_fingerprint;
use crate::state::AppState;

/// Claimed or accepted requests older than this are released back to the
/// queue when a client polls for them.
const RELEASE_AGE_SECS: i64 = 300;

/// `POST /result` and `POST /result-unattended`.
pub async fn result(State(state): State<AppState>, request: HttpRequest) -> Json<Response> {
    let resp = process_result(&state, request).await;
    if resp.error_code != StatusCode::Success {
        tracing::warn!(
            code = resp.error_code.as_i32(),
            status = %resp.status,
            request_id = %resp.request_id,
            "result query failed"
        );
    }
    Json(resp)
}

async fn process_result(state: &AppState, request: HttpRequest) -> Response {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, 1 << 20).await {
        Ok(b) => b,
        Err(_) => {
            return Response::failure(
                StatusCode::RequestUnreadable,
                "unable to read HTTP request body",
            )
        }
    };
    if bytes.is_empty() {
        return Response::failure(StatusCode::JsonEmpty, "empty HTTP JSON result query body");
    }
    let query: StatusQuery = match serde_json::from_slice(&bytes) {
        Ok(q) => q,
        Err(_) => {
            return Response::failure(
                StatusCode::JsonUnmarshalError,
                "unable to unmarshal JSON request",
            )
        }
    };

    if query.request_id.is_empty() || query.client_id.is_empty() {
        return Response::failure(
            StatusCode::ReqProcessingError,
            "invalid result query: RequestID and ClientID are required",
        );
    }

    let req = match state.store.find(&query.request_id).await {
        Ok(req) => req,
        Err(e @ StoreError::NotFound(_)) => {
            return Response::failure(
                e.status_code(),
                format!("result not found: {:?}", query.request_id),
            )
        }
        Err(e) => return Response::failure(e.status_code(), e.to_string()),
    };

    // The caller must present the fingerprint of the certificate the request
    // was accepted under. A mismatch may also be eventual-consistency lag,
    // which is why clients treat this code as retryable.
    if let Err(reason) = verify_fingerprint(&state.config, &req.client_id, &parts.headers) {
        return Response::failure(StatusCode::InvalidCertError, reason);
    }

    if req.status == Status::Returned {
        return Response::failure(
            StatusCode::RequestResultReplay,
            format!(
                "the result for request {:?} has already been returned",
                req.request_id
            ),
        );
    }

    // Populated early so completed requests can be sanitized in the store
    // while the response still carries the sealed triple.
    let response = Response {
        request_id: req.request_id.clone(),
        status: req.status.to_string(),
        error_code: StatusCode::Success,
        hostname: req.hostname.clone(),
        response_data: req.response_data.clone(),
        response_key: req.response_key.clone(),
        cipher_nonce: req.cipher_nonce.clone(),
    };

    if req.status != Status::Completed {
        let now = Utc::now();
        // Release requests that were claimed but never completed.
        if let Some(claim_time) = req.claim_time {
            if now - claim_time > Duration::seconds(RELEASE_AGE_SECS) {
                tracing::info!(
                    request_id = %req.request_id,
                    claimed_by = %req.claim_by,
                    "releasing request claimed but not completed"
                );
                return release_request(state, &req).await;
            }
        }
        // Release requests that were never claimed by a joiner.
        if req.claim_by.is_empty() && now - req.accept_time > Duration::seconds(RELEASE_AGE_SECS)
        {
            tracing::info!(
                request_id = %req.request_id,
                "republishing request accepted but never claimed"
            );
            return release_request(state, &req).await;
        }
        return response;
    }

    // Ready to return: wipe the sealed triple from the stored record before
    // handing it to the client. If the commit fails the client retries and
    // replay protection stays inert.
    if let Err(e) = state.store.mark_returned(&req.request_id).await {
        return Response::failure(e.status_code(), e.to_string());
    }

    tracing::info!(request_id = %req.request_id, hostname = %req.hostname, "returned join result");
    response
}

/// Resets a stuck request so another joiner may claim it, then republishes
/// its RequestID.
async fn release_request(state: &AppState, req: &Request) -> Response {
    if let Err(e) = state.store.release(&req.request_id).await {
        return Response::failure(e.status_code(), e.to_string());
    }
    if let Err(e) = state.queue.publish(&req.request_id).await {
        return Response::failure(StatusCode::PubsubFailure, e.to_string());
    }
    tracing::info!(request_id = %req.request_id, "released orphaned request");
    Response::failure(
        StatusCode::Success,
        format!("released orphaned request: {:?}", req.request_id),
    )
}
