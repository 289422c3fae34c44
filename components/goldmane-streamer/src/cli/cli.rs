use crate::helpers::load_config::Settings;
use crate::runtime::runtime::{StreamerError, run_streamer, validate_streamer};
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "goldmane-streamer",
    long_about = "goldmane-streamer subscribes to the Calico Goldmane flow stream over mutual TLS \
and writes every flow as one JSON line to stdout or an append-only file.",
    about = "Stream Goldmane flows as JSON lines",
    version,
    term_width = 100,
    after_help = "\
ENVIRONMENT:
    GOLDMANE_ADDR           server address (default goldmane.calico-system.svc:7443)
    GOLDMANE_CA             CA bundle PEM (default /etc/goldmane/certs/tls.crt)
    GOLDMANE_CERT           client certificate PEM (default /etc/goldmane/certs/tls.crt)
    GOLDMANE_KEY            client private key PEM (default /etc/goldmane/certs/tls.key)
    LOG                     output file, or - for stdout (default -)
    GOLDMANE_ENCODE_ERRORS  skip or fail (default skip)

EXAMPLES:
    goldmane-streamer
    LOG=/var/log/goldmane/flows.log goldmane-streamer run
    goldmane-streamer validate"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Stream flows until the connection fails (default)
    Run,

    /// Check settings and TLS credentials without connecting
    Validate,

    /// Display version information
    Version,
}

/// Entry function for CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_streamer_command().await?,
        Commands::Validate => validate_command().await?,
        Commands::Version => show_version(),
    }

    Ok(())
}

//
// ------------------------ Command Implementations ------------------------------
//

/// Stream until the first fatal error and report it with its stage.
async fn run_streamer_command() -> Result<()> {
    let outcome = match Settings::from_env() {
        Ok(settings) => run_streamer(&settings).await,
        Err(e) => Err(StreamerError::from(e)),
    };

    let Err(err) = outcome;
    tracing::error!(stage = err.stage(), error = %err, "goldmane-streamer stopped");
    Err(err.into())
}

/// Validate settings and credentials
async fn validate_command() -> Result<()> {
    let settings = Settings::from_env().map_err(StreamerError::from)?;
    println!("Settings:\n{:#?}", settings);

    let credentials = validate_streamer(&settings).await?;
    println!(
        "Credentials valid: subject={:?} trusted_roots={}",
        credentials.subject(),
        credentials.trusted_roots()
    );
    Ok(())
}

/// Show version information
fn show_version() {
    println!("goldmane-streamer {}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["goldmane-streamer"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["goldmane-streamer", "validate"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Validate));

        let cli = Cli::try_parse_from(["goldmane-streamer", "run"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Run));
    }
}
