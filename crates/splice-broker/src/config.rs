use std::collections::HashSet;
use std::net::SocketAddr;

/// Resource types permitted in the project allowlist.
const ALLOWED_RESOURCE_TYPES: [&str; 1] = ["projects"];

/// Broker configuration, loaded once from environment variables at startup
/// and passed by value into handlers.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub nats_url: String,
    /// Queue subject join requests are published on.
    pub pubsub_topic: String,
    /// Whether the client certificate fingerprint header is enforced.
    pub verify_cert: bool,
    /// Header the TLS terminator injects the client fingerprint into.
    pub verify_cert_header: String,
    /// Whether unattended requests may negotiate AD account reuse.
    pub rejoin_allowed: bool,
    /// Sanitized `projects/<id>` entries permitted on the unattended path.
    pub project_allowlist: HashSet<String>,
    /// Public hostname of this deployment; forms the expected JWT audience.
    pub app_host: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVar(String),
    #[error("invalid listen address: {0}")]
    InvalidAddr(#[from] std::net::AddrParseError),
    #[error("invalid allowlist entry: {0}")]
    InvalidAllowlistEntry(String),
    #[error("invalid resource type {0:?}, only types {1:?} are supported in the allowlist")]
    DisallowedResourceType(String, Vec<String>),
}

impl BrokerConfig {
    /// Loads configuration from environment variables. Malformed allowlist
    /// entries are a startup error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()?;
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".into()))?;
        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let pubsub_topic = std::env::var("PUBSUB_TOPIC")
            .map_err(|_| ConfigError::MissingVar("PUBSUB_TOPIC".into()))?;
        let app_host =
            std::env::var("APP_HOST").map_err(|_| ConfigError::MissingVar("APP_HOST".into()))?;

        // Fingerprint verification is on unless explicitly disabled.
        let verify_cert = std::env::var("VERIFY_CERT").as_deref() != Ok("false");
        let verify_cert_header = std::env::var("VERIFY_CERT_HEADER").unwrap_or_default();
        let rejoin_allowed = std::env::var("REJOIN_ALLOWED").as_deref() == Ok("true");

        let allowlist_raw = std::env::var("PROJECT_ALLOWLIST")
            .map_err(|_| ConfigError::MissingVar("PROJECT_ALLOWLIST".into()))?;
        let project_allowlist = parse_allowlist(&allowlist_raw)?;

        Ok(BrokerConfig {
            listen_addr,
            database_url,
            nats_url,
            pubsub_topic,
            verify_cert,
            verify_cert_header,
            rejoin_allowed,
            project_allowlist,
            app_host,
        })
    }

    /// The audience value required of unattended identity tokens.
    pub fn expected_audience(&self) -> String {
        format!("https://{}/request-unattended", self.app_host)
    }
}

/// Parses a comma-separated `<type>/<id>` allowlist, rejecting malformed
/// entries and resource types other than `projects`.
pub fn parse_allowlist(raw: &str) -> Result<HashSet<String>, ConfigError> {
    let mut allowlist = HashSet::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        let Some((resource_type, _id)) = entry.split_once('/') else {
            return Err(ConfigError::InvalidAllowlistEntry(entry.to_string()));
        };
        if !ALLOWED_RESOURCE_TYPES.contains(&resource_type) {
            return Err(ConfigError::DisallowedResourceType(
                resource_type.to_string(),
                ALLOWED_RESOURCE_TYPES.iter().map(|s| s.to_string()).collect(),
            ));
        }
        allowlist.insert(entry.to_string());
    }
    Ok(allowlist)
}
