use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::wire::{ClientRequest, GceMetadata};

/// Lifecycle status of a join request.
///
/// The legal transitions form a DAG: `Accepted → Processing` on claim,
/// `Processing → Completed | Failed` on joiner result, `Processing → Accepted`
/// on broker release, `Completed → Returned` on result retrieval, and
/// `Accepted | Processing | Completed → Failed` via the orphan sweep.
/// `Failed` and `Returned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Accepted,
    Processing,
    Completed,
    Failed,
    Returned,
}

impl Status {
    /// Returns true if a transition from `self` to `next` is one of the DAG
    /// edges. Re-saving a record in the same status counts as legal (the
    /// release path rewrites an unclaimed Accepted record in place).
    pub fn may_transition(self, next: Status) -> bool {
        if self == next {
            return matches!(self, Status::Accepted | Status::Processing);
        }
        match self {
            Status::Accepted => matches!(next, Status::Processing | Status::Failed),
            Status::Processing => {
                matches!(next, Status::Completed | Status::Failed | Status::Accepted)
            }
            Status::Completed => matches!(next, Status::Returned | Status::Failed),
            Status::Failed | Status::Returned => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Failed | Status::Returned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Accepted => "Accepted",
            Status::Processing => "Processing",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
            Status::Returned => "Returned",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Accepted" => Status::Accepted,
            "Processing" => Status::Processing,
            "Completed" => Status::Completed,
            "Failed" => Status::Failed,
            "Returned" => Status::Returned,
            other => return Err(format!("unknown request status {other:?}")),
        })
    }
}

/// A persisted join request, one per join attempt.
///
/// Created by the broker on acceptance and mutated only inside store
/// transactions thereafter. Never destroyed; `Failed` and `Returned` records
/// are retained for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Opaque URL-safe base64 identifier, assigned on acceptance.
    pub request_id: String,
    /// Certificate fingerprint (or machine UUID fallback) of the caller.
    pub client_id: String,
    /// DER-encoded client certificate; source of the result encryption key.
    pub client_cert: Vec<u8>,
    /// Proposed NetBIOS name; empty when a generator is selected.
    pub hostname: String,
    pub accept_time: DateTime<Utc>,
    /// Instance name of the joiner holding this request; empty iff unclaimed.
    pub claim_by: String,
    pub claim_time: Option<DateTime<Utc>>,
    pub status: Status,
    pub completion_time: Option<DateTime<Utc>>,
    /// Sealed result payload, or the failure reason for Failed requests.
    pub response_data: Vec<u8>,
    pub gce_metadata: GceMetadata,
    /// RSA-OAEP wrapped AES key of the sealed result.
    pub response_key: Vec<u8>,
    /// AES-GCM nonce of the sealed result.
    pub cipher_nonce: Vec<u8>,
    /// Whether AD account reuse may be attempted for this join.
    pub attempt_reuse: bool,
    pub generator_id: String,
    pub generator_data: Vec<u8>,
}

impl Request {
    /// Builds a new unaccepted request from the client-supplied fields.
    pub fn from_client(client: ClientRequest, accept_time: DateTime<Utc>) -> Self {
        Request {
            request_id: String::new(),
            client_id: client.client_id,
            client_cert: client.client_cert,
            hostname: client.hostname,
            accept_time,
            claim_by: String::new(),
            claim_time: None,
            status: Status::Accepted,
            completion_time: None,
            response_data: Vec::new(),
            gce_metadata: client.gce_metadata,
            response_key: Vec::new(),
            cipher_nonce: Vec::new(),
            attempt_reuse: false,
            generator_id: client.generator_id,
            generator_data: client.generator_data,
        }
    }

    /// Checks the entity invariants that must hold after every successful
    /// store commit.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.request_id.is_empty() {
            return Err(InvariantViolation::MissingRequestId);
        }
        if !self.claim_by.is_empty() {
            if self.status == Status::Accepted {
                return Err(InvariantViolation::ClaimedButAccepted);
            }
            if self.claim_time.is_none() {
                return Err(InvariantViolation::ClaimedWithoutClaimTime);
            }
        }
        if self.status == Status::Processing && self.claim_by.is_empty() {
            return Err(InvariantViolation::ProcessingWithoutClaim);
        }
        if self.status == Status::Returned
            && !(self.response_data.is_empty()
                && self.response_key.is_empty()
                && self.cipher_nonce.is_empty())
        {
            return Err(InvariantViolation::ReturnedWithPayload);
        }
        if self.status == Status::Completed && self.response_data.is_empty() {
            return Err(InvariantViolation::CompletedWithoutPayload);
        }
        Ok(())
    }
}

/// A request snapshot that violates the persisted-entity invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("request has no RequestID")]
    MissingRequestId,
    #[error("request is claimed but still Accepted")]
    ClaimedButAccepted,
    #[error("request is claimed but has no claim time")]
    ClaimedWithoutClaimTime,
    #[error("request is Processing but unclaimed")]
    ProcessingWithoutClaim,
    #[error("Returned request still carries response data")]
    ReturnedWithPayload,
    #[error("Completed request has no response data")]
    CompletedWithoutPayload,
}
