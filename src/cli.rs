use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "agentport",
    version,
    about = "Drive AI coding agent sessions in git worktrees from any browser"
)]
pub struct Cli {
    /// Config file location (default: ~/.config/agentport/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured server port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Override the configured bind address
    #[arg(long, global = true)]
    pub host: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server in the foreground (the default)
    Serve,
    /// Install as a background service that survives reboots
    Install,
    /// Stop and remove the background service
    Uninstall,
    /// Show whether the background service is installed and running
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_subcommand() {
        let cli = Cli::parse_from(["agentport"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn overrides_parse_with_subcommand() {
        let cli = Cli::parse_from([
            "agentport", "serve", "--port", "8080", "--host", "127.0.0.1",
        ]);
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn install_accepts_config_override() {
        let cli = Cli::parse_from(["agentport", "install", "--config", "/tmp/c.json"]);
        assert!(matches!(cli.command, Some(Command::Install)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
    }
}
