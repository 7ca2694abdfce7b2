//! TOML configuration for the joiner daemon.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{JoinerError, Result};

/// Top-level configuration for a joiner instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinerConfig {
    /// The fully qualified Active Directory domain (e.g. corp.example.com).
    pub domain: String,
    /// A unique name for this host or instance; recorded as `ClaimBy`.
    pub instance: String,
    /// Connection string for the request store.
    pub database_url: String,
    /// Queue server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,
    /// Queue subject this daemon subscribes to.
    pub topic: String,
    /// Require result blob encryption.
    #[serde(default = "default_true")]
    pub encrypt_blob: bool,
    /// Require client certificates to pass verification checks.
    #[serde(default)]
    pub verify_certs: bool,
    /// Base URL for issuer certificate lookup during verification.
    #[serde(default)]
    pub ca_url: String,
    /// Fixed path under `ca_url` for the issuer certificate.
    #[serde(default)]
    pub ca_path: String,
    /// Expected issuing organization of the certificate chain.
    #[serde(default)]
    pub ca_org: String,
    /// PEM bundle of verification roots.
    #[serde(default)]
    pub roots_path: String,
    /// Permit attempts to reuse existing domain accounts.
    #[serde(default)]
    pub permit_reuse: bool,
    /// Optional address to expose Prometheus metrics and health on.
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
    /// Hostname generator configuration.
    #[serde(default)]
    pub generators: GeneratorSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorSection {
    #[serde(default)]
    pub prefix: Option<PrefixSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefixSection {
    pub prefix: String,
    pub length: usize,
}

fn default_true() -> bool {
    true
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

impl JoinerConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| JoinerError::Config(format!("reading {}: {e}", path.display())))?;
        let config: JoinerConfig =
            toml::from_str(&raw).map_err(|e| JoinerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(JoinerError::Config("domain must not be empty".to_string()));
        }
        if self.instance.is_empty() {
            return Err(JoinerError::Config(
                "instance must not be empty".to_string(),
            ));
        }
        if self.verify_certs && self.ca_url.is_empty() && self.roots_path.is_empty() {
            return Err(JoinerError::Config(
                "ca_url or roots_path is required when verify_certs=true".to_string(),
            ));
        }
        if !self.verify_certs
            && (!self.ca_url.is_empty() || !self.ca_path.is_empty() || !self.ca_org.is_empty())
        {
            return Err(JoinerError::Config(
                "ca_url, ca_path and ca_org are not used when verify_certs=false".to_string(),
            ));
        }
        Ok(())
    }
}
