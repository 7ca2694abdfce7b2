//! Self-signed host certificate generation.

use rand::rngs::OsRng;
use rcgen::{CertificateParams, DnType, KeyPair, PKCS_RSA_SHA256};
use regex::Regex;
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls_pki_types::PrivatePkcs8KeyDer;
use time::OffsetDateTime;

use crate::CertError;

/// A freshly generated self-signed host certificate and its RSA key.
pub struct GeneratedCert {
    /// DER-encoded certificate.
    pub cert_der: Vec<u8>,
    /// The private key; its public half is embedded in the certificate.
    pub key: RsaPrivateKey,
}

/// Generates a self-signed RSA certificate for a proposed computer name.
///
/// The name must satisfy MS naming conventions for AD computer objects:
/// non-empty, at most 15 characters, no leading dot, none of `\/:*?"<>|`.
/// https://support.microsoft.com/en-us/help/909264
pub fn generate(
    cn: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<GeneratedCert, CertError> {
    let invalid = Regex::new(r#"^$|^\.|[\\/:*?"<>|]|.{15,}$"#)
        .map_err(|e| CertError::Generation(e.to_string()))?;
    if invalid.is_match(cn) {
        return Err(CertError::InvalidName(cn.to_string()));
    }

    let key = RsaPrivateKey::new(&mut OsRng, 2048)
        .map_err(|e| CertError::KeyGeneration(e.to_string()))?;
    let pkcs8 = key
        .to_pkcs8_der()
        .map_err(|e| CertError::KeyGeneration(e.to_string()))?;
    let key_der = PrivatePkcs8KeyDer::from(pkcs8.as_bytes().to_vec());
    let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(&key_der, &PKCS_RSA_SHA256)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    let mut params =
        CertificateParams::new(Vec::new()).map_err(|e| CertError::Generation(e.to_string()))?;
    params.distinguished_name.push(DnType::CommonName, cn);
    params
        .distinguished_name
        .push(DnType::OrganizationalUnitName, "SelfSigned");
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(GeneratedCert {
        cert_der: cert.der().to_vec(),
        key,
    })
}
