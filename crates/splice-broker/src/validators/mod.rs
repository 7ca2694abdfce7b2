//! Request validation.
//!
//! Each inbound request runs through an ordered chain of validators that
//! short-circuits on the first failure. The attended chain performs only the
//! basic checks; the unattended chain adds GCE identity attestation, the
//! reuse policy, and generator sanitization. Validators may mutate the
//! request to sanitize it.

pub mod gce;

use std::sync::Arc;

use splice_models::{Request, StatusCode};

use crate::state::AppState;
use gce::GceChecker;

/// Maximum NetBIOS hostname length accepted in a request.
const MAX_HOSTNAME_LEN: usize = 15;

/// A validation failure: the wire code and a human-readable reason.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub code: StatusCode,
    pub reason: String,
}

impl Rejection {
    fn new(code: StatusCode, reason: impl Into<String>) -> Self {
        Rejection {
            code,
            reason: reason.into(),
        }
    }
}

/// One validation step. Kept as a closed set of variants rather than an
/// open trait; the chain composition in [`run_chain`] is the extension
/// point.
pub enum Validator {
    /// Required-field and hostname shape checks.
    Basic,
    /// GCE VM identity attestation against the project allowlist.
    Gce(Arc<GceChecker>),
    /// Environment-controlled account reuse policy.
    Reuse { rejoin_allowed: bool },
    /// Sanity checks applying to any generator selection.
    GenericGenerator { allowed: Vec<String> },
    /// Sanitization specific to the `prefix` generator.
    PrefixGenerator,
}

impl Validator {
    pub async fn check(&self, req: &mut Request) -> Result<(), Rejection> {
        match self {
            Validator::Basic => check_basic(req),
            Validator::Gce(checker) => checker.check(req).await,
            Validator::Reuse { rejoin_allowed } => {
                // Reuse is denied unless the environment explicitly allows
                // rejoin; the joiner applies its own local gate on top.
                req.attempt_reuse = *rejoin_allowed;
                if req.attempt_reuse {
                    tracing::info!(request_id = %req.request_id, "rejoin allowed; AttemptReuse enabled");
                }
                Ok(())
            }
            Validator::GenericGenerator { allowed } => check_generic_generator(req, allowed),
            Validator::PrefixGenerator => check_prefix_generator(req),
        }
    }
}

/// Runs `req` through all validators in order, stopping at the first
/// failure.
pub async fn run_chain(chain: &[Validator], req: &mut Request) -> Result<(), Rejection> {
    for validator in chain {
        validator.check(req).await?;
    }
    Ok(())
}

/// The validator chain for interactive requests.
pub fn attended() -> Vec<Validator> {
    vec![Validator::Basic]
}

/// The validator chain for unattended requests.
pub fn unattended(state: &AppState) -> Vec<Validator> {
    vec![
        Validator::Basic,
        Validator::Gce(state.gce.clone()),
        Validator::Reuse {
            rejoin_allowed: state.config.rejoin_allowed,
        },
        Validator::GenericGenerator {
            allowed: state.generator_names.clone(),
        },
        Validator::PrefixGenerator,
    ]
}

fn check_basic(req: &Request) -> Result<(), Rejection> {
    if req.hostname.is_empty() && req.generator_id.is_empty() {
        return Err(Rejection::new(
            StatusCode::RequestHostBlank,
            "hostname is blank",
        ));
    }
    if req.hostname.len() > MAX_HOSTNAME_LEN {
        return Err(Rejection::new(
            StatusCode::RequestHostLength,
            format!(
                "hostname {} too long (got: {}, want: <={MAX_HOSTNAME_LEN})",
                req.hostname,
                req.hostname.len()
            ),
        ));
    }
    if req.client_id.is_empty() {
        return Err(Rejection::new(
            StatusCode::RequestClientIdBlank,
            "clientID is blank",
        ));
    }
    Ok(())
}

fn check_generic_generator(req: &Request, allowed: &[String]) -> Result<(), Rejection> {
    if req.generator_id.is_empty() {
        return Ok(());
    }
    // Generator users shouldn't be providing a hostname.
    if !req.hostname.is_empty() {
        tracing::warn!(
            request_id = %req.request_id,
            "request provided both a Hostname and GeneratorID"
        );
        return Err(Rejection::new(
            StatusCode::RequestGeneratorError,
            "a request may name a hostname or a generator, not both",
        ));
    }
    if allowed.iter().any(|g| g == &req.generator_id) {
        return Ok(());
    }
    Err(Rejection::new(
        StatusCode::RequestGeneratorError,
        format!("unknown generator {:?}", req.generator_id),
    ))
}

fn check_prefix_generator(req: &mut Request) -> Result<(), Rejection> {
    if req.generator_id != "prefix" {
        return Ok(());
    }
    // The prefix generator is prone to name collisions. Force reuse off so
    // in-use names aren't hijacked inadvertently.
    if req.attempt_reuse {
        tracing::warn!(
            request_id = %req.request_id,
            "request was attempting reuse with the prefix generator; disabling"
        );
        req.attempt_reuse = false;
    }
    // The prefix generator takes no input data.
    if !req.generator_data.is_empty() {
        tracing::warn!(
            request_id = %req.request_id,
            "request was passing unexpected input to the prefix generator; removing"
        );
        req.generator_data = Vec::new();
    }
    Ok(())
}
