//! Client certificate chain verification.
//!
//! Mirrors the joiner-side verification contract: optionally fetch the
//! intermediate and root certificates from a CA endpoint keyed by the
//! authority key identifier, merge a local PEM roots bundle, then require a
//! signature-valid chain and (optionally) an expected issuing organization.

use x509_parser::oid_registry::OID_X509_EXT_AUTHORITY_KEY_IDENTIFIER;
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::CertError;

/// Verification inputs, normally sourced from the joiner configuration.
#[derive(Debug, Clone, Default)]
pub struct VerifyConfig {
    /// Base URL for issuer certificate lookup. Empty disables fetching.
    pub ca_url: String,
    /// Fixed path under `ca_url`; when empty the path is derived from the
    /// certificate's issuer organization and authority key identifier.
    pub ca_path: String,
    /// Expected issuing organization for intermediate and root, if any.
    pub ca_org: String,
    /// Path to a PEM bundle of additional trust anchors. Empty disables.
    pub roots_path: String,
    /// Master switch; when false every certificate is accepted.
    pub enabled: bool,
}

/// Verifies a raw DER client certificate against `config`, checking
/// `hostname` against the certificate names when non-empty.
pub async fn verify_cert(
    raw: &[u8],
    hostname: &str,
    config: &VerifyConfig,
) -> Result<(), CertError> {
    if !config.enabled {
        return Ok(());
    }
    if raw.is_empty() {
        return Err(CertError::MissingCert(hostname.to_string()));
    }

    let (_, cert) = parse_x509_certificate(raw).map_err(|e| CertError::Parse(e.to_string()))?;

    if !hostname.is_empty() {
        check_hostname(&cert, hostname)?;
    }

    let mut intermediates: Vec<Vec<u8>> = Vec::new();
    let mut roots: Vec<Vec<u8>> = Vec::new();

    if !config.ca_url.is_empty() {
        let intermediate = fetch_issuer(&cert, &config.ca_url, &config.ca_path).await?;
        let (_, parsed_intermediate) = parse_x509_certificate(&intermediate)
            .map_err(|e| CertError::Parse(e.to_string()))?;
        let root = fetch_issuer(&parsed_intermediate, &config.ca_url, &config.ca_path).await?;
        intermediates.push(intermediate.clone());
        roots.push(root);
    }

    if !config.roots_path.is_empty() {
        let pem = std::fs::read(&config.roots_path)
            .map_err(|e| CertError::RootsBundle(config.roots_path.clone(), e.to_string()))?;
        let mut found = false;
        for entry in Pem::iter_from_buffer(&pem) {
            let entry =
                entry.map_err(|e| CertError::RootsBundle(config.roots_path.clone(), e.to_string()))?;
            if entry.label == "CERTIFICATE" {
                intermediates.push(entry.contents.clone());
                roots.push(entry.contents);
                found = true;
            }
        }
        if !found {
            return Err(CertError::EmptyBundle(config.roots_path.clone()));
        }
    }

    let chain = build_chain(raw, &intermediates, &roots)?;

    if !config.ca_org.is_empty() {
        require_issuer_org(&chain.intermediate_der, "intermediate", &config.ca_org)?;
        require_issuer_org(&chain.root_der, "root", &config.ca_org)?;
    }

    Ok(())
}

struct Chain {
    /// DER of the certificate that signed the leaf. For a self-signed leaf
    /// this is the leaf itself.
    intermediate_der: Vec<u8>,
    root_der: Vec<u8>,
}

/// Finds a signature-valid path leaf → intermediate → root through the
/// candidate pools. A self-signed leaf that appears verbatim in the roots
/// pool is a one-element chain.
fn build_chain(
    leaf_der: &[u8],
    intermediates: &[Vec<u8>],
    roots: &[Vec<u8>],
) -> Result<Chain, CertError> {
    let (_, leaf) =
        parse_x509_certificate(leaf_der).map_err(|e| CertError::Parse(e.to_string()))?;
    if !leaf.validity().is_valid() {
        return Err(CertError::ChainValidation(
            "leaf certificate is outside its validity window".to_string(),
        ));
    }

    // Self-signed leaf anchored directly in the roots pool.
    if leaf.subject().to_string() == leaf.issuer().to_string()
        && leaf.verify_signature(None).is_ok()
        && roots.iter().any(|r| r == leaf_der)
    {
        return Ok(Chain {
            intermediate_der: leaf_der.to_vec(),
            root_der: leaf_der.to_vec(),
        });
    }

    for intermediate_der in intermediates {
        let Ok((_, intermediate)) = parse_x509_certificate(intermediate_der) else {
            continue;
        };
        if intermediate.subject().to_string() != leaf.issuer().to_string()
            || leaf.verify_signature(Some(intermediate.public_key())).is_err()
            || !intermediate.validity().is_valid()
        {
            continue;
        }

        // The signer itself may be a trust anchor.
        if roots.iter().any(|r| r == intermediate_der) {
            return Ok(Chain {
                intermediate_der: intermediate_der.clone(),
                root_der: intermediate_der.clone(),
            });
        }

        for root_der in roots {
            let Ok((_, root)) = parse_x509_certificate(root_der) else {
                continue;
            };
            if root.subject().to_string() == intermediate.issuer().to_string()
                && intermediate.verify_signature(Some(root.public_key())).is_ok()
                && root.validity().is_valid()
            {
                return Ok(Chain {
                    intermediate_der: intermediate_der.clone(),
                    root_der: root_der.clone(),
                });
            }
        }
    }

    Err(CertError::ChainValidation(
        "no valid chain to a configured root".to_string(),
    ))
}

fn require_issuer_org(cert_der: &[u8], kind: &'static str, org: &str) -> Result<(), CertError> {
    let (_, cert) =
        parse_x509_certificate(cert_der).map_err(|e| CertError::Parse(e.to_string()))?;
    let orgs: Vec<String> = cert
        .issuer()
        .iter_organization()
        .filter_map(|a| a.as_str().ok())
        .map(str::to_string)
        .collect();
    if orgs.iter().any(|o| o == org) {
        Ok(())
    } else {
        Err(CertError::IssuerOrg(org.to_string(), kind, orgs))
    }
}

fn check_hostname(cert: &X509Certificate<'_>, hostname: &str) -> Result<(), CertError> {
    let mut names: Vec<String> = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                names.push((*dns).to_string());
            }
        }
    }
    if names.is_empty() {
        if let Some(cn) = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|a| a.as_str().ok())
        {
            names.push(cn.to_string());
        }
    }

    if names.iter().any(|n| n.eq_ignore_ascii_case(hostname)) {
        Ok(())
    } else {
        Err(CertError::HostnameMismatch(hostname.to_string(), names))
    }
}

/// Fetches the issuer certificate (DER) for `cert` from the CA endpoint.
/// With an explicit `path` the URL is `base + path`; otherwise it is derived
/// as `base + <issuer-org> + "/" + hex(<authority-key-id>) + ".cert"`.
async fn fetch_issuer(
    cert: &X509Certificate<'_>,
    base: &str,
    path: &str,
) -> Result<Vec<u8>, CertError> {
    let url = issuer_url(cert, base, path)?;
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| CertError::IssuerFetch(url.clone(), e.to_string()))?;
    if !resp.status().is_success() {
        return Err(CertError::IssuerFetch(
            url,
            format!("response status {}", resp.status()),
        ));
    }
    let raw = resp
        .bytes()
        .await
        .map_err(|e| CertError::IssuerFetch(url, e.to_string()))?;
    Ok(raw.to_vec())
}

fn issuer_url(cert: &X509Certificate<'_>, base: &str, path: &str) -> Result<String, CertError> {
    if !path.is_empty() {
        return Ok(format!("{base}{path}"));
    }

    let aki = cert
        .get_extension_unique(&OID_X509_EXT_AUTHORITY_KEY_IDENTIFIER)
        .ok()
        .flatten()
        .and_then(|ext| match ext.parsed_extension() {
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                aki.key_identifier.as_ref().map(|k| hex::encode(k.0))
            }
            _ => None,
        })
        .unwrap_or_default();

    let org = cert
        .issuer()
        .iter_organization()
        .filter_map(|a| a.as_str().ok())
        .last()
        .ok_or_else(|| {
            CertError::ChainValidation("certificate issuer lacks organization".to_string())
        })?;

    Ok(format!("{base}{org}/{aki}.cert"))
}
