//! The host-join provisioning primitive.
//!
//! Provisioning creates (or reuses) the AD computer account and emits an
//! opaque bind-ready blob the client later applies offline. The primitive
//! itself is platform privilege territory, so it sits behind a trait; the
//! daemon composes against the contract only.

use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("offline domain join failed: {0}")]
    Join(String),
    #[error("provisioning produced no blob")]
    EmptyBlob,
}

/// Produces a bind-ready provisioning blob for `hostname` in `domain`.
/// `permit_reuse` allows reuse of an existing computer account.
pub trait Provisioner: Send + Sync {
    fn bin_data(
        &self,
        hostname: &str,
        domain: &str,
        permit_reuse: bool,
    ) -> Result<Vec<u8>, ProvisionError>;
}

/// Provisioner that shells out to the platform `djoin` tool, which performs
/// the computer-account creation and writes the provisioning blob to a file.
pub struct DjoinProvisioner;

impl Provisioner for DjoinProvisioner {
    fn bin_data(
        &self,
        hostname: &str,
        domain: &str,
        permit_reuse: bool,
    ) -> Result<Vec<u8>, ProvisionError> {
        let dir = tempfile::tempdir().map_err(|e| ProvisionError::Join(e.to_string()))?;
        let blob_path = dir.path().join("provision.blob");

        let mut cmd = Command::new("djoin");
        cmd.arg("/provision")
            .arg("/domain")
            .arg(domain)
            .arg("/machine")
            .arg(hostname)
            .arg("/savefile")
            .arg(&blob_path);
        if permit_reuse {
            cmd.arg("/reuse");
        }

        let output = cmd
            .output()
            .map_err(|e| ProvisionError::Join(format!("djoin did not run: {e}")))?;
        if !output.status.success() {
            return Err(ProvisionError::Join(format!(
                "djoin exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let blob =
            std::fs::read(&blob_path).map_err(|e| ProvisionError::Join(e.to_string()))?;
        if blob.is_empty() {
            return Err(ProvisionError::EmptyBlob);
        }
        Ok(blob)
    }
}
