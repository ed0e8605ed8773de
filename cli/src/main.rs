//! lsprobe - drive a language server through a hover/completion/definition
//! probe and report what it supports.
//!
//! ```text
//! main() -> Cli::parse() -> ProbeConfig::load() -> apply flags -> probe::run()
//!                                                                   |
//!                                                                   v
//!                                                   Report (PASS/FAIL per feature)
//! ```
//!
//! Probe output goes to stdout; logs go to stderr or `--log-file`.

mod config;
mod probe;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lsprobe_lsp::ServerConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{ProbeConfig, TextPosition};
use crate::probe::ProbePlan;

#[derive(Debug, Parser)]
#[command(
    name = "lsprobe",
    about = "Probe a language server's hover, completion and definition support",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file. Default: ./lsprobe.toml if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. "debug", "lsprobe_lsp=trace").
    #[arg(long)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Workspace root sent to the server.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Document to open and probe.
    #[arg(long)]
    file: Option<PathBuf>,

    /// languageId for didOpen. Default: guessed from the file extension.
    #[arg(long)]
    language_id: Option<String>,

    /// Hover position, one-based.
    #[arg(long, value_name = "LINE:COL")]
    hover: Option<TextPosition>,

    /// Completion position, one-based.
    #[arg(long, value_name = "LINE:COL")]
    completion: Option<TextPosition>,

    /// Go-to-definition position, one-based.
    #[arg(long, value_name = "LINE:COL")]
    definition: Option<TextPosition>,

    /// File with known errors; diagnostics must be published for it.
    #[arg(long)]
    diagnostics_file: Option<PathBuf>,

    /// Milliseconds to wait after `initialized` before opening the document.
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Per-request deadline in milliseconds; 0 waits forever.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Verbosity passed to the server with its log-level flag.
    #[arg(long)]
    server_log_level: Option<String>,

    /// Server command and arguments, e.g. `-- kotlin-analyzer --stdio`.
    #[arg(last = true, value_name = "SERVER")]
    server: Vec<String>,
}

fn init_tracing(level: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .context("invalid log filter")?;

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();
        tracing::info!(path = %path.display(), "Logging initialized");
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    Ok(())
}

/// Merge the config file with command line flags; flags win.
fn resolve(cli: Cli, file_config: Option<ProbeConfig>) -> Result<(ServerConfig, ProbeConfig)> {
    let mut config = file_config.unwrap_or_default();

    let mut server = match (cli.server.split_first(), config.server.take()) {
        (Some((command, args)), configured) => {
            let mut server = ServerConfig::new(command.clone()).with_args(args.iter().cloned());
            if let Some(configured) = configured {
                server.log_level = configured.log_level;
                server.log_level_flag = configured.log_level_flag;
                server.env = configured.env;
            }
            server
        }
        (None, Some(configured)) => configured,
        (None, None) => bail!("no server to probe; pass `-- <command> [args]` or set [server] command"),
    };
    if let Some(level) = cli.server_log_level {
        server.log_level = Some(level);
    }

    if let Some(timeout) = cli.timeout_ms {
        config.client.request_timeout_ms = timeout;
    }

    let probe = &mut config.probe;
    probe.root = cli.root.or(probe.root.take());
    probe.file = cli.file.or(probe.file.take());
    probe.language_id = cli.language_id.or(probe.language_id.take());
    probe.hover = cli.hover.or(probe.hover);
    probe.completion = cli.completion.or(probe.completion);
    probe.definition = cli.definition.or(probe.definition);
    probe.diagnostics_file = cli.diagnostics_file.or(probe.diagnostics_file.take());
    if let Some(settle) = cli.settle_ms {
        probe.settle_ms = settle;
    }

    Ok((server, config))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_file.as_deref())?;

    let file_config = match ProbeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(path = %err.path().display(), "unusable config file");
            return Err(err.into());
        }
    };
    let (server, config) = resolve(cli, file_config)?;
    let plan = ProbePlan::from_settings(config.probe)?;
    tracing::debug!(?server, ?plan, "resolved probe");

    let report = probe::run(&server, &config.client, &plan).await?;
    if report.failed() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("lsprobe").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_server_command_after_double_dash() {
        let cli = parse(&["--file", "A.kt", "--", "kotlin-analyzer", "--stdio"]);
        let (server, config) = resolve(cli, None).unwrap();
        assert_eq!(server.command, "kotlin-analyzer");
        assert_eq!(server.args, vec!["--stdio"]);
        assert_eq!(config.probe.file, Some(PathBuf::from("A.kt")));
    }

    #[test]
    fn test_missing_server_is_an_error() {
        let cli = parse(&["--file", "A.kt"]);
        let err = resolve(cli, None).unwrap_err();
        assert!(err.to_string().contains("no server"));
    }

    #[test]
    fn test_flags_override_file_config() {
        let file_config: ProbeConfig = toml::from_str(
            r#"
            [server]
            command = "kotlin-analyzer"
            log_level = "info"

            [client]
            request_timeout_ms = 1000

            [probe]
            file = "Config.kt"
            hover = "1:1"
            completion = "2:2"
            diagnostics_file = "Broken.kt"
            "#,
        )
        .unwrap();
        let cli = parse(&[
            "--hover",
            "23:7",
            "--timeout-ms",
            "0",
            "--server-log-level",
            "debug",
        ]);

        let (server, config) = resolve(cli, Some(file_config)).unwrap();
        assert_eq!(server.command, "kotlin-analyzer");
        assert_eq!(server.command_args(), vec!["--log-level", "debug"]);
        assert_eq!(config.client.request_timeout(), None);
        assert_eq!(config.probe.file, Some(PathBuf::from("Config.kt")));
        assert_eq!(config.probe.hover.unwrap().to_string(), "23:7");
        assert_eq!(config.probe.completion.unwrap().to_string(), "2:2");
        assert_eq!(config.probe.diagnostics_file, Some(PathBuf::from("Broken.kt")));
    }

    #[test]
    fn test_diagnostics_file_flag_wins() {
        let file_config: ProbeConfig =
            toml::from_str("[probe]\nfile = \"A.kt\"\ndiagnostics_file = \"Old.kt\"\n").unwrap();
        let cli = parse(&["--diagnostics-file", "Errors.kt", "--", "pyright-langserver", "--stdio"]);
        let (_, config) = resolve(cli, Some(file_config)).unwrap();
        assert_eq!(config.probe.diagnostics_file, Some(PathBuf::from("Errors.kt")));
    }

    #[test]
    fn test_cli_server_keeps_configured_env() {
        let file_config: ProbeConfig =
            toml::from_str("[server]\ncommand = \"old\"\n[server.env]\nJAVA_HOME = \"/opt/jdk\"\n")
                .unwrap();
        let cli = parse(&["--", "new-server"]);
        let (server, _) = resolve(cli, Some(file_config)).unwrap();
        assert_eq!(server.command, "new-server");
        assert_eq!(server.env["JAVA_HOME"], "/opt/jdk");
    }

    #[test]
    fn test_invalid_position_flag_rejected() {
        let result = Cli::try_parse_from(["lsprobe", "--hover", "0:3"]);
        assert!(result.is_err());
    }
}
