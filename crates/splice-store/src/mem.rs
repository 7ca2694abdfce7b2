//! In-memory store used by tests and single-node development brokers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use splice_models::{Request, Status};
use tokio::sync::Mutex;

use crate::{
    apply_claim, apply_outcome, apply_release, apply_returned, JoinOutcome, RequestStore,
    StoreError, SWEEP_STATUSES,
};

/// A `RequestStore` backed by a mutex-guarded map. Every operation holds the
/// lock for its full duration, which gives the same linearization per
/// RequestID as the production store's row transactions.
#[derive(Default)]
pub struct MemStore {
    requests: Mutex<HashMap<String, Request>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct snapshot access for assertions in tests.
    pub async fn snapshot(&self, request_id: &str) -> Option<Request> {
        self.requests.lock().await.get(request_id).cloned()
    }
}

#[async_trait]
impl RequestStore for MemStore {
    async fn save_new(&self, req: &Request) -> Result<(), StoreError> {
        req.check_invariants()?;
        let mut requests = self.requests.lock().await;
        if requests.contains_key(&req.request_id) {
            return Err(StoreError::Write(format!(
                "request {:?} already exists",
                req.request_id
            )));
        }
        requests.insert(req.request_id.clone(), req.clone());
        Ok(())
    }

    async fn find(&self, request_id: &str) -> Result<Request, StoreError> {
        if request_id.is_empty() {
            return Err(StoreError::Lookup("missing requestID".to_string()));
        }
        self.requests
            .lock()
            .await
            .get(request_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))
    }

    async fn find_orphans(
        &self,
        older_than: Duration,
        status: Status,
    ) -> Result<Vec<Request>, StoreError> {
        if older_than <= Duration::zero() {
            return Err(StoreError::Lookup(format!(
                "olderThan: got {older_than}, want > 0"
            )));
        }
        let cutoff = Utc::now() - older_than;
        Ok(self
            .requests
            .lock()
            .await
            .values()
            .filter(|r| r.status == status && r.accept_time < cutoff)
            .cloned()
            .collect())
    }

    async fn claim(
        &self,
        request_id: &str,
        instance: &str,
        now: DateTime<Utc>,
    ) -> Result<Request, StoreError> {
        let mut requests = self.requests.lock().await;
        let req = requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        apply_claim(req, instance, now)?;
        req.check_invariants()?;
        Ok(req.clone())
    }

    async fn release(&self, request_id: &str) -> Result<Request, StoreError> {
        let mut requests = self.requests.lock().await;
        let req = requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        apply_release(req)?;
        req.check_invariants()?;
        Ok(req.clone())
    }

    async fn complete(
        &self,
        request_id: &str,
        outcome: &JoinOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut requests = self.requests.lock().await;
        let req = requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        apply_outcome(req, outcome, now)?;
        req.check_invariants()?;
        Ok(())
    }

    async fn mark_returned(&self, request_id: &str) -> Result<(), StoreError> {
        let mut requests = self.requests.lock().await;
        let req = requests
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        apply_returned(req)?;
        req.check_invariants()?;
        Ok(())
    }

    async fn sweep_orphans(&self, older_than: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = Utc::now() - older_than;
        let mut swept = Vec::new();
        let mut requests = self.requests.lock().await;
        for req in requests.values_mut() {
            if SWEEP_STATUSES.contains(&req.status) && req.accept_time < cutoff {
                req.status = Status::Failed;
                swept.push(req.request_id.clone());
            }
        }
        Ok(swept)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_models::wire::GceMetadata;

    fn accepted(request_id: &str, age: Duration) -> Request {
        Request {
            request_id: request_id.to_string(),
            client_id: "client".to_string(),
            client_cert: Vec::new(),
            hostname: "HOST-01".to_string(),
            accept_time: Utc::now() - age,
            claim_by: String::new(),
            claim_time: None,
            status: Status::Accepted,
            completion_time: None,
            response_data: Vec::new(),
            gce_metadata: GceMetadata::default(),
            response_key: Vec::new(),
            cipher_nonce: Vec::new(),
            attempt_reuse: false,
            generator_id: String::new(),
            generator_data: Vec::new(),
        }
    }

    fn success_outcome() -> JoinOutcome {
        JoinOutcome {
            success: true,
            response_data: vec![1, 2, 3],
            response_key: vec![4],
            cipher_nonce: vec![5],
            hostname: "HOST-01".to_string(),
        }
    }

    #[tokio::test]
    async fn save_rejects_duplicate_request_ids() {
        let store = MemStore::new();
        let req = accepted("dup", Duration::zero());
        store.save_new(&req).await.expect("first save");
        assert!(matches!(
            store.save_new(&req).await,
            Err(StoreError::Write(_))
        ));
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = MemStore::new();
        store
            .save_new(&accepted("r1", Duration::zero()))
            .await
            .expect("save");

        let claimed = store
            .claim("r1", "joiner-a", Utc::now())
            .await
            .expect("first claim");
        assert_eq!(claimed.status, Status::Processing);
        assert_eq!(claimed.claim_by, "joiner-a");
        assert!(claimed.claim_time.is_some());

        let err = store
            .claim("r1", "joiner-b", Utc::now())
            .await
            .expect_err("second claim must lose");
        assert!(matches!(err, StoreError::AlreadyClaimed(_, by, _) if by == "joiner-a"));
    }

    #[tokio::test]
    async fn complete_then_return_sanitizes_record() {
        let store = MemStore::new();
        store
            .save_new(&accepted("r1", Duration::zero()))
            .await
            .expect("save");
        store
            .claim("r1", "joiner-a", Utc::now())
            .await
            .expect("claim");
        store
            .complete("r1", &success_outcome(), Utc::now())
            .await
            .expect("complete");

        let completed = store.find("r1").await.expect("find");
        assert_eq!(completed.status, Status::Completed);
        assert_eq!(completed.response_data, vec![1, 2, 3]);

        store.mark_returned("r1").await.expect("return");
        let returned = store.find("r1").await.expect("find");
        assert_eq!(returned.status, Status::Returned);
        assert!(returned.response_data.is_empty());
        assert!(returned.response_key.is_empty());
        assert!(returned.cipher_nonce.is_empty());

        // Terminal: a second return attempt is refused.
        assert!(matches!(
            store.mark_returned("r1").await,
            Err(StoreError::Update(_))
        ));
    }

    #[tokio::test]
    async fn failed_outcome_keeps_reason_only() {
        let store = MemStore::new();
        store
            .save_new(&accepted("r1", Duration::zero()))
            .await
            .expect("save");
        store
            .claim("r1", "joiner-a", Utc::now())
            .await
            .expect("claim");
        let outcome = JoinOutcome {
            success: false,
            response_data: b"provisioning refused".to_vec(),
            response_key: Vec::new(),
            cipher_nonce: Vec::new(),
            hostname: String::new(),
        };
        store
            .complete("r1", &outcome, Utc::now())
            .await
            .expect("complete");

        let failed = store.find("r1").await.expect("find");
        assert_eq!(failed.status, Status::Failed);
        assert_eq!(failed.response_data, b"provisioning refused");
        assert!(failed.response_key.is_empty());
    }

    #[tokio::test]
    async fn release_clears_claim() {
        let store = MemStore::new();
        store
            .save_new(&accepted("r1", Duration::zero()))
            .await
            .expect("save");
        store
            .claim("r1", "joiner-a", Utc::now())
            .await
            .expect("claim");

        let released = store.release("r1").await.expect("release");
        assert_eq!(released.status, Status::Accepted);
        assert!(released.claim_by.is_empty());
        assert!(released.claim_time.is_none());

        // And it can be claimed again by another joiner.
        let reclaimed = store
            .claim("r1", "joiner-b", Utc::now())
            .await
            .expect("reclaim");
        assert_eq!(reclaimed.claim_by, "joiner-b");
    }

    #[tokio::test]
    async fn orphan_scan_filters_by_age_and_status() {
        let store = MemStore::new();
        store
            .save_new(&accepted("old", Duration::hours(25)))
            .await
            .expect("save");
        store
            .save_new(&accepted("new", Duration::minutes(1)))
            .await
            .expect("save");

        let orphans = store
            .find_orphans(Duration::hours(24), Status::Accepted)
            .await
            .expect("scan");
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].request_id, "old");

        let none = store
            .find_orphans(Duration::hours(24), Status::Processing)
            .await
            .expect("scan");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn sweep_marks_stale_requests_failed() {
        let store = MemStore::new();
        store
            .save_new(&accepted("stale", Duration::hours(25)))
            .await
            .expect("save");
        store
            .save_new(&accepted("fresh", Duration::minutes(5)))
            .await
            .expect("save");

        let swept = store
            .sweep_orphans(Duration::hours(24))
            .await
            .expect("sweep");
        assert_eq!(swept, vec!["stale".to_string()]);
        assert_eq!(
            store.find("stale").await.expect("find").status,
            Status::Failed
        );
        assert_eq!(
            store.find("fresh").await.expect("find").status,
            Status::Accepted
        );
    }
}
