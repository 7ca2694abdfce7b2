//! Transactional persistence for join requests.
//!
//! The store exposes whole operations rather than raw transaction handles:
//! every mutation (`save_new`, `claim`, `release`, `complete`,
//! `mark_returned`, `sweep_orphans`) runs one transaction internally, checks
//! the state-machine preconditions inside it, validates the entity
//! invariants before committing, and rolls back on every early exit.
//!
//! Consistency contract: reads and writes on a single RequestID are
//! linearized by its row; nothing may be assumed about visibility across
//! different RequestIDs.

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use splice_models::{InvariantViolation, Request, Status, StatusCode};

/// Outcome of a processed join, written back by the joiner in one commit.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub success: bool,
    /// Sealed ciphertext on success, the failure reason on error.
    pub response_data: Vec<u8>,
    pub response_key: Vec<u8>,
    pub cipher_nonce: Vec<u8>,
    /// The resolved hostname, which may have been generated server-side.
    pub hostname: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store client: {0}")]
    ClientCreate(String),
    #[error("transaction open: {0}")]
    TxCreate(String),
    #[error("write: {0}")]
    Write(String),
    #[error("lookup: {0}")]
    Lookup(String),
    #[error("request {0:?} not found")]
    NotFound(String),
    #[error("update refused: {0}")]
    Update(String),
    #[error("request {0} already claimed by {1:?} with status {2}")]
    AlreadyClaimed(String, String, Status),
    #[error("transaction commit: {0}")]
    TxCommit(String),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl StoreError {
    /// The wire status code reported to clients for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::ClientCreate(_) => StatusCode::DatastoreClientCreateError,
            StoreError::TxCreate(_) => StatusCode::DatastoreTxCreateError,
            StoreError::Write(_) | StoreError::Invariant(_) => StatusCode::DatastoreWriteError,
            StoreError::Lookup(_) => StatusCode::DatastoreLookupError,
            StoreError::NotFound(_) => StatusCode::DatastoreLookupNotFound,
            StoreError::Update(_) | StoreError::AlreadyClaimed(_, _, _) => {
                StatusCode::DatastoreUpdateError
            }
            StoreError::TxCommit(_) => StatusCode::DatastoreTxCommitError,
        }
    }
}

/// The request persistence seam shared by broker and joiner.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persists a freshly accepted request. The RequestID must be unique.
    async fn save_new(&self, req: &Request) -> Result<(), StoreError>;

    /// Looks up a request by its RequestID.
    async fn find(&self, request_id: &str) -> Result<Request, StoreError>;

    /// Returns all requests in `status` whose acceptance is older than
    /// `older_than`. The age filter is applied in memory over the status
    /// scan.
    async fn find_orphans(
        &self,
        older_than: Duration,
        status: Status,
    ) -> Result<Vec<Request>, StoreError>;

    /// Claims an Accepted, unclaimed request for `instance`, moving it to
    /// Processing. A concurrent winner leaves the loser with
    /// [`StoreError::AlreadyClaimed`].
    async fn claim(
        &self,
        request_id: &str,
        instance: &str,
        now: DateTime<Utc>,
    ) -> Result<Request, StoreError>;

    /// Releases a stuck request back to Accepted, clearing the claim so
    /// another joiner may take it.
    async fn release(&self, request_id: &str) -> Result<Request, StoreError>;

    /// Writes the join outcome: Completed with the sealed triple on success,
    /// Failed with the reason payload otherwise.
    async fn complete(
        &self,
        request_id: &str,
        outcome: &JoinOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Transitions a Completed request to Returned, wiping the sealed triple
    /// from the stored record.
    async fn mark_returned(&self, request_id: &str) -> Result<(), StoreError>;

    /// Marks requests stuck in Accepted, Processing or Completed for longer
    /// than `older_than` as Failed. Returns the swept RequestIDs.
    async fn sweep_orphans(&self, older_than: Duration) -> Result<Vec<String>, StoreError>;

    /// Liveness probe for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Statuses inspected by the orphan sweep.
pub(crate) const SWEEP_STATUSES: [Status; 3] =
    [Status::Accepted, Status::Processing, Status::Completed];

/// Applies a claim to a request snapshot, enforcing the claim precondition.
/// Shared between store implementations so both enforce identical rules.
pub(crate) fn apply_claim(
    req: &mut Request,
    instance: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if req.status != Status::Accepted || !req.claim_by.is_empty() {
        return Err(StoreError::AlreadyClaimed(
            req.request_id.clone(),
            req.claim_by.clone(),
            req.status,
        ));
    }
    req.claim_by = instance.to_string();
    req.claim_time = Some(now);
    req.status = Status::Processing;
    Ok(())
}

/// Applies a release, clearing claim state. Only non-terminal requests may
/// be released.
pub(crate) fn apply_release(req: &mut Request) -> Result<(), StoreError> {
    if !req.status.may_transition(Status::Accepted) {
        return Err(StoreError::Update(format!(
            "cannot release request in status {}",
            req.status
        )));
    }
    req.status = Status::Accepted;
    req.claim_by = String::new();
    req.claim_time = None;
    Ok(())
}

/// Applies a join outcome to a claimed request.
pub(crate) fn apply_outcome(
    req: &mut Request,
    outcome: &JoinOutcome,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let next = if outcome.success {
        Status::Completed
    } else {
        Status::Failed
    };
    if !req.status.may_transition(next) {
        return Err(StoreError::Update(format!(
            "cannot record a {next} result for a request in status {}",
            req.status
        )));
    }
    req.response_data = outcome.response_data.clone();
    if outcome.success {
        req.response_key = outcome.response_key.clone();
        req.cipher_nonce = outcome.cipher_nonce.clone();
    }
    if !outcome.hostname.is_empty() {
        req.hostname = outcome.hostname.clone();
    }
    req.status = next;
    req.completion_time = Some(now);
    Ok(())
}

/// Applies the Returned transition, sanitizing the sealed triple.
pub(crate) fn apply_returned(req: &mut Request) -> Result<(), StoreError> {
    if req.status != Status::Completed {
        return Err(StoreError::Update(format!(
            "cannot return a request in status {}",
            req.status
        )));
    }
    req.response_data = Vec::new();
    req.response_key = Vec::new();
    req.cipher_nonce = Vec::new();
    req.status = Status::Returned;
    Ok(())
}
