//! JSON wire types exchanged between clients, the broker and the joiner.
//!
//! Field names and byte-field encoding (standard base64 strings) are pinned
//! for compatibility with existing clients; do not rely on rename_all rules.

use serde::{Deserialize, Serialize};

use crate::StatusCode;

/// Base64 string encoding for byte fields, matching how the original
/// protocol marshals `[]byte` values.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        match value {
            None => Ok(Vec::new()),
            Some(s) if s.is_empty() => Ok(Vec::new()),
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
        }
    }
}

/// GCE instance metadata accompanying unattended requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GceMetadata {
    #[serde(rename = "InstanceID", default, with = "base64_bytes")]
    pub instance_id: Vec<u8>,
    #[serde(rename = "ProjectID", default, with = "base64_bytes")]
    pub project_id: Vec<u8>,
    #[serde(rename = "Zone", default, with = "base64_bytes")]
    pub zone: Vec<u8>,
    /// Audience the identity token was minted for.
    #[serde(rename = "Audience", default)]
    pub audience: String,
    /// Signed VM identity JWT.
    #[serde(rename = "Identity", default, with = "base64_bytes")]
    pub identity: Vec<u8>,
}

impl GceMetadata {
    /// The short zone name: the metadata server reports zones as
    /// `projects/<num>/zones/us-west1-a`, of which only the final component
    /// is useful.
    pub fn short_zone(&self) -> String {
        let zone = String::from_utf8_lossy(&self.zone);
        zone.rsplit('/').next().unwrap_or_default().to_string()
    }

    /// `<short-zone>/<project>/<instance>`, unique across GCE.
    pub fn unique_id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.short_zone(),
            String::from_utf8_lossy(&self.project_id),
            String::from_utf8_lossy(&self.instance_id),
        )
    }
}

/// The allowable data a client may submit when requesting a join.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(rename = "Hostname", default)]
    pub hostname: String,
    #[serde(rename = "ClientID", default)]
    pub client_id: String,
    #[serde(rename = "ClientCert", default, with = "base64_bytes")]
    pub client_cert: Vec<u8>,
    #[serde(rename = "GCEMetadata", default)]
    pub gce_metadata: GceMetadata,
    #[serde(rename = "GeneratorID", default)]
    pub generator_id: String,
    #[serde(rename = "GeneratorData", default, with = "base64_bytes")]
    pub generator_data: Vec<u8>,
}

/// A client query for the status of an accepted request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusQuery {
    #[serde(rename = "RequestID", default)]
    pub request_id: String,
    #[serde(rename = "ClientID", default)]
    pub client_id: String,
    #[serde(rename = "GCEMetadata", default)]
    pub gce_metadata: GceMetadata,
}

/// The broker's response to both request submission and result polling.
///
/// `status` carries either a lifecycle status name or a human-readable
/// failure description; `error_code` is the authoritative machine-readable
/// outcome. The sealed triple is present only when a Completed result is
/// being returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "RequestID", default)]
    pub request_id: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "ErrorCode")]
    pub error_code: StatusCode,
    #[serde(rename = "Hostname", default)]
    pub hostname: String,
    #[serde(rename = "ResponseData", default, with = "base64_bytes")]
    pub response_data: Vec<u8>,
    #[serde(rename = "ResponseKey", default, with = "base64_bytes")]
    pub response_key: Vec<u8>,
    #[serde(rename = "CipherNonce", default, with = "base64_bytes")]
    pub cipher_nonce: Vec<u8>,
}

impl Response {
    /// A failure response carrying only a code and its description.
    pub fn failure(code: StatusCode, status: impl Into<String>) -> Self {
        Response {
            request_id: String::new(),
            status: status.into(),
            error_code: code,
            hostname: String::new(),
            response_data: Vec::new(),
            response_key: Vec::new(),
            cipher_nonce: Vec::new(),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Response::failure(StatusCode::Success, "")
    }
}
