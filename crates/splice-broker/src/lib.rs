//! The Splice request broker: the public HTTP API that accepts domain join
//! requests, persists them, hands them to joiners over the queue, and later
//! returns sealed join results to clients.

pub mod config;
pub mod reqid;
pub mod routes;
pub mod state;
pub mod validators;

pub use config::{BrokerConfig, ConfigError};
pub use routes::router;
pub use state::AppState;
