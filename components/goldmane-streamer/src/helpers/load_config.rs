// Local crates
use crate::dispatch::dispatch::EncodeErrorPolicy;

// External crates
use config::{Config, ConfigError, Environment, Map};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::instrument;

/// Address of the in-cluster Goldmane service.
pub const DEFAULT_SERVER_ADDR: &str = "goldmane.calico-system.svc:7443";
/// CA bundle mounted from the Goldmane key pair secret.
pub const DEFAULT_CA_PATH: &str = "/etc/goldmane/certs/tls.crt";
/// Client certificate mounted from the Goldmane key pair secret.
pub const DEFAULT_CERT_PATH: &str = "/etc/goldmane/certs/tls.crt";
/// Client private key mounted from the Goldmane key pair secret.
pub const DEFAULT_KEY_PATH: &str = "/etc/goldmane/certs/tls.key";
/// Log path value meaning "write to standard output".
pub const STDOUT_SENTINEL: &str = "-";

/// Variables read from the environment. Names are matched exactly; other
/// spellings such as `log` or `Goldmane_Addr` are ignored.
const ENV_VARS: [&str; 6] = [
    "GOLDMANE_ADDR",
    "GOLDMANE_CA",
    "GOLDMANE_CERT",
    "GOLDMANE_KEY",
    "LOG",
    "GOLDMANE_ENCODE_ERRORS",
];

// Keys as seen by `config`, which lowercases environment names.
const ENV_SERVER_ADDR: &str = "goldmane_addr";
const ENV_CA_PATH: &str = "goldmane_ca";
const ENV_CERT_PATH: &str = "goldmane_cert";
const ENV_KEY_PATH: &str = "goldmane_key";
const ENV_LOG_PATH: &str = "log";
const ENV_ENCODE_ERRORS: &str = "goldmane_encode_errors";

/// Streamer settings, resolved once at startup from the process environment.
///
/// Every setting falls back to its default when the variable is unset or
/// empty. Values are not validated here; a bad path or address surfaces in
/// the component that consumes it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// `GOLDMANE_ADDR`
    #[serde(rename = "goldmane_addr")]
    pub server_addr: String,
    /// `GOLDMANE_CA`
    #[serde(rename = "goldmane_ca")]
    pub ca_path: PathBuf,
    /// `GOLDMANE_CERT`
    #[serde(rename = "goldmane_cert")]
    pub cert_path: PathBuf,
    /// `GOLDMANE_KEY`
    #[serde(rename = "goldmane_key")]
    pub key_path: PathBuf,
    /// `LOG`, either [`STDOUT_SENTINEL`] or a file to append to.
    #[serde(rename = "log")]
    pub log_path: String,
    /// `GOLDMANE_ENCODE_ERRORS`, `skip` or `fail`.
    #[serde(rename = "goldmane_encode_errors")]
    pub encode_errors: EncodeErrorPolicy,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// Variables whose name or value is not valid unicode are skipped.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    /// Load settings from an explicit set of environment variables.
    #[instrument(
        name = "settings_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn from_env_map<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _): &(String, String)| ENV_VARS.contains(&k.as_str()))
            .collect();

        tracing::trace!(variables = vars.len(), "Resolving streamer settings");

        let settings: Settings = Config::builder()
            .set_default(ENV_SERVER_ADDR, DEFAULT_SERVER_ADDR)?
            .set_default(ENV_CA_PATH, DEFAULT_CA_PATH)?
            .set_default(ENV_CERT_PATH, DEFAULT_CERT_PATH)?
            .set_default(ENV_KEY_PATH, DEFAULT_KEY_PATH)?
            .set_default(ENV_LOG_PATH, STDOUT_SENTINEL)?
            .set_default(ENV_ENCODE_ERRORS, "skip")?
            .add_source(Environment::default().ignore_empty(true).source(Some(vars)))
            .build()?
            .try_deserialize()?;

        tracing::trace!(settings = ?settings, "Streamer settings resolved");
        Ok(settings)
    }
}
