//! Self-signed certificate generation: 2048-bit RSA key, x.509 valid for
//! `days`, CN=primary domain, SAN=all domains (type DNS).
//!
//! `rcgen` cannot generate RSA keypairs directly (ring only generates
//! ECDSA/Ed25519 keys), so the RSA key is generated with the `rsa` crate and
//! fed into `rcgen` as PKCS#8 DER.

use crate::error::{ProxyCtlError, Result};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;

pub fn generate(domains: &[String], primary: &str, days: i64) -> Result<(String, String)> {
    let mut rng = rand::thread_rng();
    let rsa_key = RsaPrivateKey::new(&mut rng, 2048)
        .map_err(|e| ProxyCtlError::Validation(format!("rsa key generation failed: {}", e)))?;

    let pkcs8_der = rsa_key
        .to_pkcs8_der()
        .map_err(|e| ProxyCtlError::Validation(format!("pkcs8 encoding failed: {}", e)))?;

    let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(
        &rcgen::PrivateKeyDer::Pkcs8(pkcs8_der.as_bytes().to_vec().into()),
        &rcgen::PKCS_RSA_SHA256,
    )
    .map_err(|e| ProxyCtlError::Validation(format!("rcgen keypair import failed: {}", e)))?;

    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| ProxyCtlError::Validation(format!("certificate params failed: {}", e)))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, primary);
    params.distinguished_name = dn;
    params.subject_alt_names = domains
        .iter()
        .map(|d| SanType::DnsName(d.clone().try_into().unwrap_or_else(|_| {
            rcgen::Ia5String::try_from(primary.to_string()).expect("primary is ascii")
        })))
        .collect();

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(days);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| ProxyCtlError::Validation(format!("self-signed generation failed: {}", e)))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_pem_pair_for_single_domain() {
        let domains = vec!["example.com".to_string()];
        let (cert_pem, key_pem) = generate(&domains, "example.com", 365).unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn generates_pem_pair_for_multi_domain() {
        let domains = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        let (cert_pem, _) = generate(&domains, "a.example.com", 90).unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
    }
}
