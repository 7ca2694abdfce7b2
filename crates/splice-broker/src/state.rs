use std::sync::Arc;

use splice_queue::JoinQueue;
use splice_store::RequestStore;

use crate::config::BrokerConfig;
use crate::validators::gce::GceChecker;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: BrokerConfig,
    pub store: Arc<dyn RequestStore>,
    pub queue: Arc<dyn JoinQueue>,
    pub gce: Arc<GceChecker>,
    /// Generator names accepted in request validation.
    pub generator_names: Vec<String>,
}
