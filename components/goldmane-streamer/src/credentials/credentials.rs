//! Mutual TLS material for the Goldmane connection.
//!
//! Credentials are read from disk once at startup and validated before any
//! network activity:
//! - the client certificate must parse as X.509,
//! - the private key must parse and match the certificate's public key,
//! - the CA bundle must contain at least one parseable certificate.
//!
//! The client configuration only enables TLS 1.2 and 1.3, so it never goes
//! below [`MIN_TLS_VERSION`].

// Local crates
use crate::credentials::verifier::PinnedRootVerifier;

// External crates
use pem::Pem;
use rustls::crypto::ring::{default_provider, sign::any_supported_type};
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use rustls::version::{TLS12, TLS13};
use rustls::{ClientConfig, ProtocolVersion};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;
use x509_parser::parse_x509_certificate;
use zeroize::Zeroizing;

/// Lowest protocol version the client will negotiate.
pub const MIN_TLS_VERSION: ProtocolVersion = ProtocolVersion::TLSv1_2;

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const H2_ALPN: &[u8] = b"h2";

/// Credential loading error handling
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read CA bundle {path}: {source}")]
    ReadCa {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read client certificate {path}: {source}")]
    ReadCert {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read client key {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid client certificate {path}: {reason}")]
    InvalidCert { path: PathBuf, reason: String },
    #[error("invalid client key {path}: {reason}")]
    InvalidKey { path: PathBuf, reason: String },
    #[error("client certificate {cert} does not match private key {key}")]
    KeyMismatch { cert: PathBuf, key: PathBuf },
    #[error("bad CA bundle {path}: {reason}")]
    BadCa { path: PathBuf, reason: String },
    #[error("failed to build TLS client configuration: {0}")]
    TlsConfig(#[source] rustls::Error),
}

/// Validated client identity and trust roots, ready for the TLS connector.
pub struct Credentials {
    tls: Arc<ClientConfig>,
    ca_count: usize,
    subject: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("subject", &self.subject)
            .field("ca_count", &self.ca_count)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Load and validate the CA bundle and client key pair.
    ///
    /// The CA bundle and the client certificate may be the same file; a
    /// server presenting exactly one of the trusted certificates is accepted.
    #[instrument(
        name = "credentials::load",
        target = "credentials::credentials",
        level = "debug",
        skip_all,
        fields(ca = %ca_path.display(), cert = %cert_path.display(), key = %key_path.display())
    )]
    pub async fn load(
        ca_path: &Path,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<Self, CredentialError> {
        let ca_bytes = tokio::fs::read(ca_path)
            .await
            .map_err(|source| CredentialError::ReadCa {
                path: ca_path.to_path_buf(),
                source,
            })?;

        let cert_pem = tokio::fs::read(cert_path)
            .await
            .map_err(|source| CredentialError::ReadCert {
                path: cert_path.to_path_buf(),
                source,
            })?;
        let key_pem = Zeroizing::new(tokio::fs::read(key_path).await.map_err(|source| {
            CredentialError::ReadKey {
                path: key_path.to_path_buf(),
                source,
            }
        })?);

        let invalid_cert = |reason| CredentialError::InvalidCert {
            path: cert_path.to_path_buf(),
            reason,
        };
        let invalid_key = |reason| CredentialError::InvalidKey {
            path: key_path.to_path_buf(),
            reason,
        };

        let chain = certificate_chain(&cert_pem).map_err(invalid_cert)?;
        let (subject, cert_spki) = leaf_identity(&chain[0]).map_err(invalid_cert)?;
        let key = private_key(&key_pem).map_err(invalid_key)?;
        let key_spki = public_key(&key).map_err(invalid_key)?;
        if cert_spki != key_spki {
            return Err(CredentialError::KeyMismatch {
                cert: cert_path.to_path_buf(),
                key: key_path.to_path_buf(),
            });
        }

        let bad_ca = |reason| CredentialError::BadCa {
            path: ca_path.to_path_buf(),
            reason,
        };
        let roots = trusted_roots(&ca_bytes);
        if roots.is_empty() {
            return Err(bad_ca("no parseable certificate".to_string()));
        }
        let ca_count = roots.len();
        let roots = roots
            .into_iter()
            .map(|block| CertificateDer::from(block.into_contents()))
            .collect();

        let provider = Arc::new(default_provider());
        let verifier = PinnedRootVerifier::new(roots, provider.clone()).map_err(bad_ca)?;

        let mut tls = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&TLS13, &TLS12])
            .map_err(CredentialError::TlsConfig)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(chain, key)
            .map_err(CredentialError::TlsConfig)?;
        tls.alpn_protocols = vec![H2_ALPN.to_vec()];

        tracing::debug!(
            subject = %subject,
            trusted_roots = ca_count,
            min_tls_version = ?MIN_TLS_VERSION,
            "Loaded mutual TLS credentials"
        );

        Ok(Self {
            tls: Arc::new(tls),
            ca_count,
            subject,
        })
    }

    /// Subject of the client certificate, for diagnostics.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Number of trusted root certificates.
    #[must_use]
    pub fn trusted_roots(&self) -> usize {
        self.ca_count
    }

    /// Client TLS configuration presenting the client identity and trusting
    /// only the loaded CA set.
    #[must_use]
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.tls)
    }
}

/// Collect the certificate blocks of a PEM chain, leaf first.
fn certificate_chain(cert_pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    let chain: Vec<_> = pem::parse_many(cert_pem)
        .map_err(|e| format!("failed to parse PEM: {e}"))?
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();

    if chain.is_empty() {
        return Err("no CERTIFICATE block found".to_string());
    }
    Ok(chain)
}

/// Subject and DER-encoded SubjectPublicKeyInfo of the leaf certificate.
fn leaf_identity(leaf: &CertificateDer<'_>) -> Result<(String, Vec<u8>), String> {
    let (_, cert) = parse_x509_certificate(leaf.as_ref())
        .map_err(|e| format!("failed to parse X.509 certificate: {e}"))?;

    Ok((cert.subject().to_string(), cert.public_key().raw.to_vec()))
}

/// First private key block of a PEM file.
fn private_key(key_pem: &[u8]) -> Result<PrivateKeyDer<'static>, String> {
    let blocks = pem::parse_many(key_pem).map_err(|e| format!("failed to parse PEM: {e}"))?;

    blocks
        .into_iter()
        .find_map(|block| {
            let tag = block.tag().to_string();
            let der = block.into_contents();
            match tag.as_str() {
                "PRIVATE KEY" => Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der))),
                "RSA PRIVATE KEY" => Some(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(der))),
                "EC PRIVATE KEY" => Some(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der))),
                _ => None,
            }
        })
        .ok_or_else(|| "no private key block found".to_string())
}

/// DER-encoded SubjectPublicKeyInfo derived from a private key.
fn public_key(key: &PrivateKeyDer<'_>) -> Result<Vec<u8>, String> {
    let signing_key =
        any_supported_type(key).map_err(|e| format!("unsupported private key: {e}"))?;
    let spki = signing_key
        .public_key()
        .ok_or_else(|| "unable to derive public key".to_string())?;

    Ok(spki.as_ref().to_vec())
}

/// Collect the CA bundle's parseable certificates; other blocks are ignored.
fn trusted_roots(ca_pem: &[u8]) -> Vec<Pem> {
    let Ok(blocks) = pem::parse_many(ca_pem) else {
        return Vec::new();
    };

    blocks
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .filter(|block| parse_x509_certificate(block.contents()).is_ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::test_support::TestPki;
    use rcgen::KeyPair;

    #[tokio::test]
    async fn valid_files_load() {
        let pki = TestPki::new();

        let creds = pki.load().await.expect("credentials should load");
        assert_eq!(creds.trusted_roots(), 1);
        assert!(!creds.subject().is_empty());

        assert_eq!(creds.client_config().alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[tokio::test]
    async fn debug_output_hides_key_material() {
        let pki = TestPki::new();
        let creds = pki.load().await.unwrap();

        let rendered = format!("{creds:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn missing_ca_is_a_read_error() {
        let pki = TestPki::new();
        std::fs::remove_file(&pki.ca).unwrap();

        let err = pki.load().await.unwrap_err();
        assert!(matches!(err, CredentialError::ReadCa { .. }));
    }

    #[tokio::test]
    async fn missing_cert_is_a_read_error() {
        let pki = TestPki::new();
        std::fs::remove_file(&pki.cert).unwrap();

        let err = pki.load().await.unwrap_err();
        assert!(matches!(err, CredentialError::ReadCert { .. }));
    }

    #[tokio::test]
    async fn missing_key_is_a_read_error() {
        let pki = TestPki::new();
        std::fs::remove_file(&pki.key).unwrap();

        let err = pki.load().await.unwrap_err();
        assert!(matches!(err, CredentialError::ReadKey { .. }));
    }

    #[tokio::test]
    async fn corrupt_certificate_is_rejected() {
        let pki = TestPki::new();
        std::fs::write(
            &pki.cert,
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n",
        )
        .unwrap();

        let err = pki.load().await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidCert { .. }));
    }

    #[tokio::test]
    async fn garbage_key_is_rejected() {
        let pki = TestPki::new();
        std::fs::write(&pki.key, "not a key").unwrap();

        let err = pki.load().await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn key_from_another_pair_is_a_mismatch() {
        let pki = TestPki::new();
        let other = KeyPair::generate().unwrap();
        std::fs::write(&pki.key, other.serialize_pem()).unwrap();

        let err = pki.load().await.unwrap_err();
        assert!(matches!(err, CredentialError::KeyMismatch { .. }));
    }

    #[tokio::test]
    async fn bundle_without_certificates_is_bad_ca() {
        let pki = TestPki::new();
        std::fs::write(&pki.ca, "this is not PEM").unwrap();

        let err = pki.load().await.unwrap_err();
        assert!(matches!(err, CredentialError::BadCa { .. }));
        assert!(err.to_string().contains("ca.crt"));
    }

    #[tokio::test]
    async fn unparseable_ca_blocks_are_skipped() {
        let pki = TestPki::new();
        let mut bundle = std::fs::read_to_string(&pki.ca).unwrap();
        bundle.push_str("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n");
        std::fs::write(&pki.ca, bundle).unwrap();

        let creds = pki.load().await.expect("one valid root is enough");
        assert_eq!(creds.trusted_roots(), 1);
    }

    #[tokio::test]
    async fn ca_bundle_may_be_the_client_certificate() {
        let pki = TestPki::new();

        let creds = Credentials::load(&pki.cert, &pki.cert, &pki.key)
            .await
            .expect("a leaf is accepted as its own trust root");
        assert_eq!(creds.trusted_roots(), 1);
    }

    #[test]
    fn negotiable_versions_respect_the_floor() {
        for version in rustls::ALL_VERSIONS {
            assert!(matches!(
                version.version,
                ProtocolVersion::TLSv1_2 | ProtocolVersion::TLSv1_3
            ));
        }
        assert_eq!(MIN_TLS_VERSION, ProtocolVersion::TLSv1_2);
    }
}
