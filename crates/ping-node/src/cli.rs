use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use xr_domain::config::{Config, ConfigSeverity};

/// xr-ping: a reference XRPC node and client.
#[derive(Debug, Parser)]
#[command(name = "xr-ping", version, about)]
pub struct Cli {
    /// Path to the config file (defaults to $XR_CONFIG, then xrpc.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve io.example.ping and io.example.count (default).
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Call io.example.ping and print the output.
    Ping {
        /// Server base URL (overrides client.base_url).
        #[arg(long)]
        url: Option<String>,
        message: String,
    },
    /// Subscribe to io.example.count and print each frame.
    Count {
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value_t = 0)]
        start: i64,
        /// Stream forever when omitted.
        #[arg(long)]
        end: Option<i64>,
    },
    /// Parse the config file and report any issues.
    CheckConfig,
}

/// Loads the config from `path`, `$XR_CONFIG`, or `xrpc.toml`.  A missing
/// default file means defaults; a missing explicit file is an error.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let explicit = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("XR_CONFIG").map(PathBuf::from));
    let config_path = explicit.clone().unwrap_or_else(|| PathBuf::from("xrpc.toml"));

    if !config_path.exists() {
        if explicit.is_some() {
            anyhow::bail!("config file {} not found", config_path.display());
        }
        return Ok((Config::default(), config_path));
    }

    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config = toml::from_str(&raw)
        .with_context(|| format!("parsing {}", config_path.display()))?;
    Ok((config, config_path))
}

/// Prints every issue; returns false when any is an error.
pub fn report_config(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    for issue in &issues {
        eprintln!("{}: {issue}", path.display());
    }
    let ok = issues.iter().all(|i| i.severity != ConfigSeverity::Error);
    if ok && issues.is_empty() {
        eprintln!("{}: ok", path.display());
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn loads_toml_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9100\n\n[validation]\nmode = \"truncate\"\n\n[client]\nbase_url = \"http://localhost:9100\""
        )
        .unwrap();
        let (config, _) = load_config(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9100);
        assert!(config.validation.truncate());
        assert_eq!(config.client.base_url, "http://localhost:9100");
        assert!(report_config(&config, file.path()));
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["xr-ping", "count", "--start", "3", "--end", "5"]);
        assert!(matches!(
            cli.command,
            Some(Command::Count { start: 3, end: Some(5), url: None })
        ));
        let cli = Cli::parse_from(["xr-ping", "--config", "x.toml", "ping", "hi"]);
        assert_eq!(cli.config.as_deref(), Some(Path::new("x.toml")));
    }
}
