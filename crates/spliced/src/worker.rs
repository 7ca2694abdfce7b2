//! The joiner worker loop: pull one, claim, provision, seal, commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use splice_certs::VerifyConfig;
use splice_generators::{PrefixConfig, Registry};
use splice_models::Request;
use splice_queue::JoinQueue;
use splice_store::{JoinOutcome, RequestStore};
use zeroize::Zeroize;

use crate::config::JoinerConfig;
use crate::error::{JoinerError, Result};
use crate::events::{
    Recorder, EVT_CLAIM_FAILURE, EVT_ENCRYPTION_FAILURE, EVT_JOIN_ATTEMPT, EVT_JOIN_FAILURE,
    EVT_PUBKEY_FAILURE, EVT_RETURN_FAILURE, EVT_STATUS, EVT_SUBSCRIPTION_FAILURE,
    EVT_VERIFICATION_FAILURE,
};
use crate::metrics::Metrics;
use crate::provision::Provisioner;

/// Delay before retrying a failed subscription pull.
const PULL_RETRY_DELAY: Duration = Duration::from_secs(60);

/// A single cooperative joiner worker. One request is in flight at a time;
/// exclusivity across instances comes from the store's claim transaction.
pub struct Worker {
    config: JoinerConfig,
    verify: VerifyConfig,
    store: Arc<dyn RequestStore>,
    queue: Arc<dyn JoinQueue>,
    provisioner: Arc<dyn Provisioner>,
    recorder: Arc<dyn Recorder>,
    metrics: Arc<Metrics>,
    generators: Registry,
}

impl Worker {
    pub fn new(
        config: JoinerConfig,
        store: Arc<dyn RequestStore>,
        queue: Arc<dyn JoinQueue>,
        provisioner: Arc<dyn Provisioner>,
        recorder: Arc<dyn Recorder>,
    ) -> Result<Self> {
        let verify = VerifyConfig {
            ca_url: config.ca_url.clone(),
            ca_path: config.ca_path.clone(),
            ca_org: config.ca_org.clone(),
            roots_path: config.roots_path.clone(),
            enabled: config.verify_certs,
        };
        let prefix = config.generators.prefix.as_ref().map(|p| PrefixConfig {
            prefix: p.prefix.clone(),
            length: p.length,
        });
        let generators =
            Registry::from_config(prefix).map_err(|e| JoinerError::Generators(e.to_string()))?;

        Ok(Worker {
            config,
            verify,
            store,
            queue,
            provisioner,
            recorder,
            metrics: Arc::new(Metrics::new()),
            generators,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Runs the worker loop until the process exits. Pull failures are
    /// durable conditions (queue outage, credentials); the loop backs off
    /// and retries rather than giving up.
    pub async fn run(&self) {
        loop {
            self.recorder.info(EVT_STATUS, "Awaiting join requests...");
            self.metrics.set_waiting(1);
            let req_id = match self.queue.pull_one().await {
                Ok(id) => id,
                Err(e) => {
                    self.metrics.set_waiting(0);
                    self.metrics.increment("failure-205");
                    self.recorder
                        .error(EVT_SUBSCRIPTION_FAILURE, &e.to_string());
                    tokio::time::sleep(PULL_RETRY_DELAY).await;
                    continue;
                }
            };
            self.metrics.set_waiting(0);
            self.recorder.info(
                EVT_STATUS,
                &format!("pulled message for processing: {req_id}"),
            );
            self.handle_message(&req_id).await;
        }
    }

    /// Processes one pulled RequestID end to end.
    pub async fn handle_message(&self, req_id: &str) {
        let req = match self
            .store
            .claim(req_id, &self.config.instance, Utc::now())
            .await
        {
            Ok(req) => req,
            Err(e) => {
                // Most commonly a race lost to another joiner; the winner
                // owns the request from here.
                self.metrics.increment("failure-206");
                self.recorder.error(EVT_CLAIM_FAILURE, &e.to_string());
                return;
            }
        };

        if !req.gce_metadata.instance_id.is_empty() {
            self.recorder.info(
                EVT_STATUS,
                &format!(
                    "processing unattended request from {}",
                    req.gce_metadata.unique_id()
                ),
            );
        }

        let mut outcome = self.process_request(&req).await;
        if outcome.success {
            self.metrics.increment("join-success");
        } else {
            self.metrics.increment("join-fail");
        }

        if let Err(e) = self.store.complete(req_id, &outcome, Utc::now()).await {
            self.metrics.increment("failure-208");
            self.recorder.error(EVT_RETURN_FAILURE, &e.to_string());
        }
        outcome.response_data.zeroize();
        outcome.response_key.zeroize();
        outcome.cipher_nonce.zeroize();
    }

    /// Performs the join for a claimed request. Errors are non-fatal: they
    /// are recorded and returned inside the outcome so the client sees the
    /// reason on its next poll.
    pub async fn process_request(&self, req: &Request) -> JoinOutcome {
        let mut outcome = JoinOutcome {
            success: false,
            response_data: Vec::new(),
            response_key: Vec::new(),
            cipher_nonce: Vec::new(),
            hostname: req.hostname.clone(),
        };

        let cert_hostname = if req.hostname.is_empty() {
            String::new()
        } else {
            format!("{}.{}", req.hostname, self.config.domain)
        };
        if let Err(e) =
            splice_certs::verify_cert(&req.client_cert, &cert_hostname, &self.verify).await
        {
            self.metrics.increment("failure-211");
            self.recorder.warning(
                EVT_VERIFICATION_FAILURE,
                &format!("client verification failed: {e}"),
            );
            outcome.response_data = e.to_string().into_bytes();
            return outcome;
        }

        let hostname = if !req.hostname.is_empty() {
            req.hostname.clone()
        } else {
            match self
                .generators
                .generate(&req.generator_id, &req.generator_data)
            {
                Ok(name) => name,
                Err(e) => {
                    self.metrics.increment("failure-207");
                    self.recorder
                        .warning(EVT_JOIN_FAILURE, &format!("hostname generation failed: {e}"));
                    outcome.response_data = e.to_string().into_bytes();
                    return outcome;
                }
            }
        };
        outcome.hostname = hostname.clone();

        let reuse = self.permit_reuse(req);
        self.recorder.info(
            EVT_JOIN_ATTEMPT,
            &format!(
                "attempting to join host {hostname} to domain {} (reuse: {reuse})",
                self.config.domain
            ),
        );
        self.metrics.increment("join-attempt");
        let mut blob = match self
            .provisioner
            .bin_data(&hostname, &self.config.domain, reuse)
        {
            Ok(blob) => blob,
            Err(e) => {
                self.metrics.increment("failure-207");
                self.recorder
                    .warning(EVT_JOIN_FAILURE, &format!("failed to join host: {e}"));
                outcome.response_data = e.to_string().into_bytes();
                return outcome;
            }
        };

        if self.config.encrypt_blob {
            let spki = match splice_certs::public_key(&req.client_cert) {
                Ok(spki) => spki,
                Err(e) => {
                    self.metrics.increment("failure-212");
                    self.recorder.warning(
                        EVT_PUBKEY_FAILURE,
                        &format!("unable to obtain certificate public key: {e}"),
                    );
                    blob.zeroize();
                    outcome.response_data = e.to_string().into_bytes();
                    return outcome;
                }
            };
            let envelope = match splice_crypto::seal(&blob, &spki) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.metrics.increment("failure-210");
                    self.recorder
                        .warning(EVT_ENCRYPTION_FAILURE, &format!("seal failed: {e}"));
                    blob.zeroize();
                    outcome.response_data = e.to_string().into_bytes();
                    return outcome;
                }
            };
            blob.zeroize();
            outcome.response_data = envelope.response_data;
            outcome.response_key = envelope.response_key;
            outcome.cipher_nonce = envelope.cipher_nonce;
        } else {
            outcome.response_data = blob;
        }

        outcome.success = true;
        outcome
    }

    /// Reuse requires both the local configuration and the request to allow
    /// it.
    fn permit_reuse(&self, req: &Request) -> bool {
        if !self.config.permit_reuse {
            return false;
        }
        req.attempt_reuse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeneratorSection, PrefixSection};
    use crate::events::LogRecorder;
    use crate::provision::ProvisionError;
    use splice_models::{ClientRequest, Status};
    use splice_store::MemStore;
    use std::io::Write as _;
    use time::{Duration as TimeDuration, OffsetDateTime};

    struct FakeProvisioner {
        blob: std::result::Result<Vec<u8>, String>,
    }

    impl Provisioner for FakeProvisioner {
        fn bin_data(
            &self,
            _hostname: &str,
            _domain: &str,
            _permit_reuse: bool,
        ) -> std::result::Result<Vec<u8>, ProvisionError> {
            self.blob.clone().map_err(ProvisionError::Join)
        }
    }

    fn test_config() -> JoinerConfig {
        JoinerConfig {
            domain: "corp.example.com".to_string(),
            instance: "joiner-test".to_string(),
            database_url: String::new(),
            nats_url: String::new(),
            topic: "requests".to_string(),
            encrypt_blob: true,
            verify_certs: false,
            ca_url: String::new(),
            ca_path: String::new(),
            ca_org: String::new(),
            roots_path: String::new(),
            permit_reuse: false,
            metrics_addr: None,
            generators: GeneratorSection {
                prefix: Some(PrefixSection {
                    prefix: "SPL-".to_string(),
                    length: 12,
                }),
            },
        }
    }

    fn worker(config: JoinerConfig, store: Arc<MemStore>, blob: std::result::Result<Vec<u8>, String>) -> Worker {
        Worker::new(
            config,
            store,
            Arc::new(splice_queue::MemQueue::new()),
            Arc::new(FakeProvisioner { blob }),
            Arc::new(LogRecorder),
        )
        .expect("worker")
    }

    fn client_cert() -> splice_certs::GeneratedCert {
        let now = OffsetDateTime::now_utc();
        splice_certs::generate("SPLICE1234-W", now - TimeDuration::days(1), now + TimeDuration::days(365))
            .expect("client cert")
    }

    async fn seed(store: &MemStore, request_id: &str, cert_der: Vec<u8>) {
        let mut req = Request::from_client(
            ClientRequest {
                hostname: "SPLICE1234-W".to_string(),
                client_id: "1".to_string(),
                client_cert: cert_der,
                ..Default::default()
            },
            Utc::now(),
        );
        req.request_id = request_id.to_string();
        store.save_new(&req).await.expect("seed");
    }

    #[tokio::test]
    async fn happy_path_seals_result_for_client() {
        let store = Arc::new(MemStore::new());
        let cert = client_cert();
        seed(&store, "r1", cert.cert_der.clone()).await;

        let worker = worker(test_config(), store.clone(), Ok(b"bind-ready blob".to_vec()));
        worker.handle_message("r1").await;

        let stored = store.snapshot("r1").await.expect("stored");
        assert_eq!(stored.status, Status::Completed);
        assert_eq!(stored.claim_by, "joiner-test");
        assert!(stored.claim_time.is_some());
        assert!(stored.completion_time.is_some());
        assert!(!stored.response_key.is_empty());
        assert_eq!(stored.cipher_nonce.len(), 12);

        // Only the requesting client can open the result.
        let envelope = splice_crypto::Envelope {
            response_key: stored.response_key.clone(),
            response_data: stored.response_data.clone(),
            cipher_nonce: stored.cipher_nonce.clone(),
        };
        let plaintext = splice_crypto::unseal(&envelope, &cert.key).expect("unseal");
        assert_eq!(plaintext, b"bind-ready blob");

        assert_eq!(worker.metrics().get("join-attempt"), 1);
        assert_eq!(worker.metrics().get("join-success"), 1);
        assert_eq!(worker.metrics().get("join-fail"), 0);
    }

    #[tokio::test]
    async fn unencrypted_deployment_returns_raw_blob() {
        let store = Arc::new(MemStore::new());
        seed(&store, "r1", Vec::new()).await;

        let mut config = test_config();
        config.encrypt_blob = false;
        let worker = worker(config, store.clone(), Ok(b"raw blob".to_vec()));
        worker.handle_message("r1").await;

        let stored = store.snapshot("r1").await.expect("stored");
        assert_eq!(stored.status, Status::Completed);
        assert_eq!(stored.response_data, b"raw blob");
        assert!(stored.response_key.is_empty());
        assert!(stored.cipher_nonce.is_empty());
    }

    #[tokio::test]
    async fn lost_claim_race_leaves_request_alone() {
        let store = Arc::new(MemStore::new());
        seed(&store, "r1", Vec::new()).await;
        store
            .claim("r1", "joiner-other", Utc::now())
            .await
            .expect("winner claims");

        let worker = worker(test_config(), store.clone(), Ok(b"blob".to_vec()));
        worker.handle_message("r1").await;

        let stored = store.snapshot("r1").await.expect("stored");
        assert_eq!(stored.claim_by, "joiner-other");
        assert_eq!(stored.status, Status::Processing);
        assert_eq!(worker.metrics().get("failure-206"), 1);
        assert_eq!(worker.metrics().get("join-attempt"), 0);
    }

    #[tokio::test]
    async fn provisioning_failure_reports_reason() {
        let store = Arc::new(MemStore::new());
        seed(&store, "r1", Vec::new()).await;

        let worker = worker(
            test_config(),
            store.clone(),
            Err("account already exists".to_string()),
        );
        worker.handle_message("r1").await;

        let stored = store.snapshot("r1").await.expect("stored");
        assert_eq!(stored.status, Status::Failed);
        let reason = String::from_utf8_lossy(&stored.response_data).to_string();
        assert!(reason.contains("account already exists"));
        assert_eq!(worker.metrics().get("join-fail"), 1);
        assert_eq!(worker.metrics().get("failure-207"), 1);
    }

    #[tokio::test]
    async fn missing_public_key_fails_encrypted_join() {
        let store = Arc::new(MemStore::new());
        // No client certificate, but encryption is required.
        seed(&store, "r1", Vec::new()).await;

        let worker = worker(test_config(), store.clone(), Ok(b"blob".to_vec()));
        worker.handle_message("r1").await;

        let stored = store.snapshot("r1").await.expect("stored");
        assert_eq!(stored.status, Status::Failed);
        assert_eq!(worker.metrics().get("failure-212"), 1);
    }

    #[tokio::test]
    async fn generator_request_gets_generated_name() {
        let store = Arc::new(MemStore::new());
        let cert = client_cert();
        let mut req = Request::from_client(
            ClientRequest {
                hostname: String::new(),
                client_id: "1".to_string(),
                client_cert: cert.cert_der.clone(),
                generator_id: "prefix".to_string(),
                ..Default::default()
            },
            Utc::now(),
        );
        req.request_id = "r1".to_string();
        store.save_new(&req).await.expect("seed");

        let worker = worker(test_config(), store.clone(), Ok(b"blob".to_vec()));
        worker.handle_message("r1").await;

        let stored = store.snapshot("r1").await.expect("stored");
        assert_eq!(stored.status, Status::Completed);
        assert!(stored.hostname.starts_with("SPL-"));
        assert_eq!(stored.hostname.len(), 12);
    }

    #[tokio::test]
    async fn unknown_generator_fails_the_join() {
        let store = Arc::new(MemStore::new());
        let mut req = Request::from_client(
            ClientRequest {
                hostname: String::new(),
                client_id: "1".to_string(),
                generator_id: "mystery".to_string(),
                ..Default::default()
            },
            Utc::now(),
        );
        req.request_id = "r1".to_string();
        store.save_new(&req).await.expect("seed");

        let worker = worker(test_config(), store.clone(), Ok(b"blob".to_vec()));
        worker.handle_message("r1").await;

        let stored = store.snapshot("r1").await.expect("stored");
        assert_eq!(stored.status, Status::Failed);
        assert!(String::from_utf8_lossy(&stored.response_data).contains("mystery"));
    }

    #[tokio::test]
    async fn certificate_verification_gate_fails_untrusted_clients() {
        let store = Arc::new(MemStore::new());
        let cert = client_cert();
        seed(&store, "r1", cert.cert_der.clone()).await;

        // The roots bundle trusts a different authority entirely.
        let other = client_cert();
        let mut roots = tempfile::NamedTempFile::new().expect("roots file");
        roots
            .write_all(pem_encode(&other.cert_der).as_bytes())
            .expect("write roots");

        let mut config = test_config();
        config.verify_certs = true;
        config.roots_path = roots.path().to_string_lossy().to_string();
        let worker = worker(config, store.clone(), Ok(b"blob".to_vec()));
        worker.handle_message("r1").await;

        let stored = store.snapshot("r1").await.expect("stored");
        assert_eq!(stored.status, Status::Failed);
        assert_eq!(worker.metrics().get("failure-211"), 1);
        assert_eq!(worker.metrics().get("join-attempt"), 0);
    }

    #[tokio::test]
    async fn reuse_requires_both_gates() {
        let store = Arc::new(MemStore::new());
        let mut config = test_config();
        config.permit_reuse = true;
        let worker = worker(config, store.clone(), Ok(b"blob".to_vec()));

        let mut req = Request::from_client(ClientRequest::default(), Utc::now());
        req.attempt_reuse = true;
        assert!(worker.permit_reuse(&req));
        req.attempt_reuse = false;
        assert!(!worker.permit_reuse(&req));

        let strict = self::worker(test_config(), store, Ok(Vec::new()));
        req.attempt_reuse = true;
        assert!(!strict.permit_reuse(&req));
    }

    fn pem_encode(der: &[u8]) -> String {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        let b64 = STANDARD.encode(der);
        let lines: Vec<&str> = b64
            .as_bytes()
            .chunks(64)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            lines.join("\n")
        )
    }
}
