//! Throwaway PKI written to a temp directory for credential and TLS tests.

use crate::credentials::credentials::{CredentialError, Credentials};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, DnValue, IsCa, KeyPair,
};
use std::path::PathBuf;
use tempfile::TempDir;

/// Names the client certificate is valid for, so it can also serve as the
/// server identity in loopback tests.
const CLIENT_NAMES: [&str; 3] = ["goldmane-streamer", "localhost", "127.0.0.1"];

/// A CA plus a client key pair it signed, written as PEM files.
pub(crate) struct TestPki {
    _dir: TempDir,
    ca_cert: Certificate,
    ca_key: KeyPair,
    pub(crate) ca: PathBuf,
    pub(crate) cert: PathBuf,
    pub(crate) key: PathBuf,
}

impl TestPki {
    pub(crate) fn new() -> Self {
        let ca_key = KeyPair::generate().expect("CA key generation should succeed");
        let mut ca_params =
            CertificateParams::new(Vec::<String>::new()).expect("CA params should build");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(
            DnType::CommonName,
            DnValue::Utf8String("Test Goldmane CA".to_string()),
        );
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .expect("CA self-signing should succeed");

        let dir = tempfile::tempdir().expect("tempdir should be created");
        let ca = dir.path().join("ca.crt");
        let cert = dir.path().join("tls.crt");
        let key = dir.path().join("tls.key");

        let pki = Self {
            _dir: dir,
            ca_cert,
            ca_key,
            ca,
            cert,
            key,
        };

        let (client_cert, client_key) = pki.issue(&CLIENT_NAMES);
        std::fs::write(&pki.ca, pki.ca_pem()).expect("CA write should succeed");
        std::fs::write(&pki.cert, client_cert).expect("cert write should succeed");
        std::fs::write(&pki.key, client_key).expect("key write should succeed");
        pki
    }

    /// PEM of the CA certificate.
    pub(crate) fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    /// Issue a fresh leaf for `names`, returning certificate and key PEM.
    pub(crate) fn issue(&self, names: &[&str]) -> (String, String) {
        let key = KeyPair::generate().expect("leaf key generation should succeed");
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let cert = CertificateParams::new(names)
            .expect("leaf params should build")
            .signed_by(&key, &self.ca_cert, &self.ca_key)
            .expect("leaf signing should succeed");
        (cert.pem(), key.serialize_pem())
    }

    pub(crate) async fn load(&self) -> Result<Credentials, CredentialError> {
        Credentials::load(&self.ca, &self.cert, &self.key).await
    }
}
