//! Event reporting for the joiner.
//!
//! The daemon reports every notable condition through a [`Recorder`] with a
//! stable event code. Codes are part of the operational surface (dashboards
//! and alerting key off them) and match the per-code failure counters in
//! [`crate::metrics`].

/// General daemon status messages.
pub const EVT_STATUS: u32 = 200;
/// Configuration loaded or changed.
pub const EVT_CONFIG: u32 = 201;
/// Failure creating a queue or store client at startup.
pub const EVT_STARTUP_FAILURE: u32 = 204;
/// Failure pulling from the subscription.
pub const EVT_SUBSCRIPTION_FAILURE: u32 = 205;
/// Failure claiming a request.
pub const EVT_CLAIM_FAILURE: u32 = 206;
/// The host-join primitive failed.
pub const EVT_JOIN_FAILURE: u32 = 207;
/// Failure committing a result back to the store.
pub const EVT_RETURN_FAILURE: u32 = 208;
/// A join attempt is in progress.
pub const EVT_JOIN_ATTEMPT: u32 = 209;
/// Failure sealing the result blob.
pub const EVT_ENCRYPTION_FAILURE: u32 = 210;
/// Client certificate verification failed.
pub const EVT_VERIFICATION_FAILURE: u32 = 211;
/// The client certificate carried no usable public key.
pub const EVT_PUBKEY_FAILURE: u32 = 212;

/// Sink for daemon events. The production recorder logs via `tracing`; tests
/// install a collecting recorder.
pub trait Recorder: Send + Sync {
    fn info(&self, event: u32, message: &str);
    fn warning(&self, event: u32, message: &str);
    fn error(&self, event: u32, message: &str);
}

/// Recorder that forwards events to the tracing subscriber.
pub struct LogRecorder;

impl Recorder for LogRecorder {
    fn info(&self, event: u32, message: &str) {
        tracing::info!(event, "{message}");
    }

    fn warning(&self, event: u32, message: &str) {
        tracing::warn!(event, "{message}");
    }

    fn error(&self, event: u32, message: &str) {
        tracing::error!(event, "{message}");
    }
}
