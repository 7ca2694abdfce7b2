//! SpliceD, the domain-resident joiner daemon.
//!
//! A single cooperative worker pulls one join request at a time from the
//! queue, claims the record in the store, produces a provisioning blob via
//! the host-join primitive, seals it for the requesting client's
//! certificate, and commits the result. Strict serialization per instance is
//! load-bearing: the host-join primitive is not meaningfully reentrant on a
//! single machine.

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod provision;
pub mod worker;

pub use config::JoinerConfig;
pub use error::{JoinerError, Result};
pub use worker::Worker;
