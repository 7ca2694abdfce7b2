//! GCE VM identity attestation for unattended requests.
//!
//! The identity document is a JWT signed by Google's rotating public
//! certificates. Verification checks the token shape (RS256, single
//! signature, kid present), the signing certificate (digital-signature key
//! usage, RSA key, validity window), the signature itself, and finally the
//! claims: issuer, exact audience, issue-time freshness, and membership of
//! the attested project in the configured allowlist.
//! https://cloud.google.com/compute/docs/instances/verifying-instance-identity

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use splice_models::{Request, StatusCode};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::validators::Rejection;

const EXPECTED_ISSUER: &str = "https://accounts.google.com";
const SIGNING_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v1/certs";
const CLAIM_MAX_AGE_SECS: i64 = 5 * 60;
const CERTS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Secondary allowlist check, e.g. walking a project's ancestors. Invoked
/// only when the attested project is not directly on the allowlist.
pub type ExpandedCheck =
    Arc<dyn Fn(&str, &HashSet<String>) -> Result<(), String> + Send + Sync>;

/// Verifies GCE VM identity tokens against a project allowlist.
pub struct GceChecker {
    allowlist: HashSet<String>,
    expanded_check: Option<ExpandedCheck>,
    certs_url: String,
    audience: String,
    http: Client,
    cache: DashMap<String, CachedCerts>,
}

#[derive(Clone)]
struct CachedCerts {
    fetched_at: Instant,
    expires_at: Instant,
    certs: Arc<HashMap<String, String>>,
}

impl GceChecker {
    pub fn new(allowlist: HashSet<String>, audience: String) -> Self {
        Self::with_certs_url(allowlist, audience, SIGNING_CERTS_URL.to_string())
    }

    /// Constructor with an explicit signing-cert endpoint, used by tests.
    pub fn with_certs_url(
        allowlist: HashSet<String>,
        audience: String,
        certs_url: String,
    ) -> Self {
        GceChecker {
            allowlist,
            expanded_check: None,
            certs_url,
            audience,
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            cache: DashMap::new(),
        }
    }

    pub fn with_expanded_check(mut self, check: ExpandedCheck) -> Self {
        self.expanded_check = Some(check);
        self
    }

    /// Checks the identity document attached to `req`. Every failure maps to
    /// [`StatusCode::InvalidGceMeta`].
    pub async fn check(&self, req: &Request) -> Result<(), Rejection> {
        let claims = self
            .verify_identity(&req.gce_metadata.identity)
            .await
            .map_err(|reason| Rejection {
                code: StatusCode::InvalidGceMeta,
                reason,
            })?;

        let project = claims
            .pointer("/google/compute_engine/project_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Rejection {
                code: StatusCode::InvalidGceMeta,
                reason: "identity claims carry no compute_engine project_id".to_string(),
            })?;
        let key = format!("projects/{project}");

        if self.allowlist.contains(&key) {
            tracing::info!(project = %project, "request originates from an allowlisted project");
            return Ok(());
        }
        if let Some(expanded) = &self.expanded_check {
            if expanded(&key, &self.allowlist).is_ok() {
                tracing::info!(project = %project, "request originates from an allowlisted ancestor");
                return Ok(());
            }
        }
        Err(Rejection {
            code: StatusCode::InvalidGceMeta,
            reason: format!("requesting project ({key}) is not on the allowlist"),
        })
    }

    /// Verifies the token signature and claims, returning the raw claims.
    async fn verify_identity(&self, identity: &[u8]) -> Result<serde_json::Value, String> {
        let token = std::str::from_utf8(identity)
            .map_err(|_| "identity document is not valid UTF-8".to_string())?;
        if !looks_like_jwt(token) {
            return Err("identity document is not a compact JWT".to_string());
        }

        let header = decode_header(token).map_err(|e| format!("invalid JWT header: {e}"))?;
        if header.alg != Algorithm::RS256 {
            return Err(format!(
                "VMIdentity signature algorithm: got {:?}, want RS256",
                header.alg
            ));
        }
        let kid = match header.kid.as_deref() {
            Some(kid) if !kid.is_empty() => kid.to_string(),
            _ => return Err("KeyID not present in VMIdentity token".to_string()),
        };

        let certs = self.signing_certs().await?;
        let signer_pem = certs
            .get(&kid)
            .ok_or_else(|| format!("signing cert for {kid} is not available"))?;
        let decoding_key = decoding_key_from_signer(signer_pem, &kid)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        let token_data = decode::<serde_json::Value>(token, &decoding_key, &validation)
            .map_err(|e| format!("signature verification failed: {e}"))?;
        let claims = token_data.claims;

        let issuer = claims.get("iss").and_then(|v| v.as_str()).unwrap_or("");
        if issuer != EXPECTED_ISSUER {
            return Err(format!("issuer got: {issuer}, want: {EXPECTED_ISSUER}"));
        }

        let audiences = match claims.get("aud") {
            Some(serde_json::Value::String(aud)) => vec![aud.clone()],
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        if audiences.len() != 1 {
            return Err(format!("got {} audience(s), want: 1", audiences.len()));
        }
        if audiences[0] != self.audience {
            return Err(format!(
                "audience got: {}, want: {}",
                audiences[0], self.audience
            ));
        }

        let issued_at = claims
            .get("iat")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| "identity claims carry no iat".to_string())?;
        let age = chrono::Utc::now().timestamp() - issued_at;
        if age > CLAIM_MAX_AGE_SECS {
            return Err(format!("identity claim is too old ({age}s)"));
        }
        if -age > CLAIM_MAX_AGE_SECS {
            return Err(format!(
                "identity claim is too far in the future ({}s)",
                -age
            ));
        }

        Ok(claims)
    }

    /// Fetches Google's signing certificates, a JSON map of kid to PEM
    /// certificate. Responses are cached per process; on refresh failure the
    /// stale cache is used as long as one exists.
    async fn signing_certs(&self) -> Result<Arc<HashMap<String, String>>, String> {
        let key = self.certs_url.clone();
        if let Some(entry) = self.cache.get(&key) {
            if Instant::now() <= entry.expires_at {
                return Ok(entry.certs.clone());
            }
        }

        match self.fetch_certs().await {
            Ok(certs) => {
                let certs = Arc::new(certs);
                let now = Instant::now();
                self.cache.insert(
                    key,
                    CachedCerts {
                        fetched_at: now,
                        expires_at: now + CERTS_CACHE_TTL,
                        certs: certs.clone(),
                    },
                );
                Ok(certs)
            }
            Err(err) => {
                if let Some(entry) = self.cache.get(&key) {
                    tracing::warn!(
                        certs_url = %self.certs_url,
                        error = %err,
                        fetched_at_ms_ago = entry.fetched_at.elapsed().as_millis(),
                        "signing cert refresh failed; using cached certs"
                    );
                    return Ok(entry.certs.clone());
                }
                Err(err)
            }
        }
    }

    async fn fetch_certs(&self) -> Result<HashMap<String, String>, String> {
        let resp = self
            .http
            .get(&self.certs_url)
            .send()
            .await
            .map_err(|e| format!("HTTP request for {:?}: {e}", self.certs_url))?;
        if !resp.status().is_success() {
            return Err(format!(
                "GET {} returned {}",
                self.certs_url,
                resp.status()
            ));
        }
        resp.json::<HashMap<String, String>>()
            .await
            .map_err(|e| format!("signing cert response is not a kid map: {e}"))
    }
}

/// Builds a JWT decoding key from a signer certificate, enforcing the
/// certificate-level checks: digital-signature-only key usage, an RSA
/// public key, and a current validity window.
fn decoding_key_from_signer(pem: &str, kid: &str) -> Result<DecodingKey, String> {
    let (_, parsed) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| format!("signing cert for {kid} is not PEM: {e}"))?;
    let cert = parsed
        .parse_x509()
        .map_err(|e| format!("signing cert for {kid} is not X.509: {e}"))?;

    match cert.key_usage() {
        Ok(Some(ku)) if ku.value.flags == 1 && ku.value.digital_signature() => {}
        Ok(Some(ku)) => {
            return Err(format!(
                "invalid signing cert KeyUsage for key ID {kid}: {:?}",
                ku.value
            ))
        }
        _ => return Err(format!("signing cert for {kid} lacks a KeyUsage extension")),
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let validity = cert.validity();
    if now < validity.not_before.timestamp() || now > validity.not_after.timestamp() {
        return Err(format!("signing cert for key ID {kid} has expired"));
    }

    let PublicKey::RSA(rsa) = cert
        .public_key()
        .parsed()
        .map_err(|e| format!("signing cert public key for {kid}: {e}"))?
    else {
        return Err(format!(
            "signing cert for key ID {kid} does not contain an RSA public key"
        ));
    };

    let n = URL_SAFE_NO_PAD.encode(strip_leading_zeros(rsa.modulus));
    let e = URL_SAFE_NO_PAD.encode(strip_leading_zeros(rsa.exponent));
    DecodingKey::from_rsa_components(&n, &e)
        .map_err(|e| format!("signing cert for {kid} has an unusable RSA key: {e}"))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn looks_like_jwt(token: &str) -> bool {
    let mut parts = token.split('.');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(_), Some(_), Some(_), None)
    )
}
