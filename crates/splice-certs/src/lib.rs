//! Certificate support for the join pipeline: fingerprints, client identity
//! derivation, RSA public key extraction, chain verification and self-signed
//! host certificate generation.

mod generate;
mod verify;

pub use generate::{generate, GeneratedCert};
pub use verify::{verify_cert, VerifyConfig};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("invalid certificate: {0}")]
    Parse(String),
    #[error("certificate does not contain an RSA public key")]
    NotRsa,
    #[error("proposed name {0:?} violates AD naming conventions")]
    InvalidName(String),
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("certificate generation failed: {0}")]
    Generation(String),
    #[error("no certificate was provided for {0}")]
    MissingCert(String),
    #[error("hostname {0} does not match certificate names {1:?}")]
    HostnameMismatch(String, Vec<String>),
    #[error("issuer fetch for {0} failed: {1}")]
    IssuerFetch(String, String),
    #[error("error reading roots bundle {0}: {1}")]
    RootsBundle(String, String),
    #[error("no certificates found in bundle {0}")]
    EmptyBundle(String),
    #[error("certificate chain validation failed: {0}")]
    ChainValidation(String),
    #[error("expected issuer {0:?} not found in {1} certificate issuers {2:?}")]
    IssuerOrg(String, &'static str, Vec<String>),
}

/// SHA-256 fingerprint of a DER-encoded certificate.
pub fn fingerprint(cert_der: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().into()
}

/// The client identifier string: the base64 certificate fingerprint with
/// trailing padding stripped.
pub fn client_id(cert_der: &[u8]) -> String {
    let fp = fingerprint(cert_der);
    STANDARD.encode(fp).trim_end_matches('=').to_string()
}

/// Extracts the RSA public key of a DER certificate as a DER-encoded
/// SubjectPublicKeyInfo, rejecting certificates with non-RSA keys.
pub fn public_key(cert_der: &[u8]) -> Result<Vec<u8>, CertError> {
    let (_, cert) =
        parse_x509_certificate(cert_der).map_err(|e| CertError::Parse(e.to_string()))?;
    let spki = cert.public_key();
    match spki.parsed() {
        Ok(PublicKey::RSA(_)) => Ok(spki.raw.to_vec()),
        Ok(_) => Err(CertError::NotRsa),
        Err(e) => Err(CertError::Parse(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_strips_padding() {
        // sha256("test cert bytes") ends in padding when base64 encoded.
        let id = client_id(b"test cert bytes");
        assert!(!id.ends_with('='));
        assert!(!id.is_empty());
        // Identical input yields identical identity.
        assert_eq!(id, client_id(b"test cert bytes"));
        assert_ne!(id, client_id(b"other cert bytes"));
    }

    #[test]
    fn fingerprint_is_sha256() {
        let fp = fingerprint(b"abc");
        assert_eq!(
            hex::encode(fp),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn public_key_extracts_rsa_spki() {
        let host = generate(
            "HOST-01",
            ::time::macros::datetime!(2024-01-01 0:00 UTC),
            ::time::macros::datetime!(2034-01-01 0:00 UTC),
        )
        .expect("generate");
        let spki = public_key(&host.cert_der).expect("public key");
        // A DER SPKI starts with a SEQUENCE tag and is parseable by the
        // envelope layer.
        assert_eq!(spki[0], 0x30);
        use rsa::pkcs8::DecodePublicKey;
        assert!(rsa::RsaPublicKey::from_public_key_der(&spki).is_ok());
    }

    #[test]
    fn public_key_rejects_non_rsa() {
        let key = rcgen::KeyPair::generate().expect("ecdsa key");
        let params = rcgen::CertificateParams::new(Vec::new()).expect("params");
        let cert = params.self_signed(&key).expect("self signed");
        assert!(matches!(
            public_key(cert.der()),
            Err(CertError::NotRsa)
        ));
    }

    #[test]
    fn public_key_rejects_garbage() {
        assert!(matches!(public_key(b"junk"), Err(CertError::Parse(_))));
    }
}
