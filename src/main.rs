use agentport::cli::{Cli, Command};
use agentport::config::{default_config_path, Config};
use agentport::server::{self, auth, AppState};
use agentport::service;
use anyhow::{bail, Result};
use clap::Parser;
use std::io::Write;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command.take().unwrap_or(Command::Serve) {
        Command::Serve => serve(cli, config_path).await,
        Command::Install => {
            let config = Config::load_or_init(&config_path)?;
            let host = cli.host.unwrap_or(config.host);
            let port = cli.port.unwrap_or(config.port);
            service::install(&config_path, &host, port)
        }
        Command::Uninstall => service::uninstall(),
        Command::Status => {
            let status = service::status()?;
            if !status.installed {
                println!("Service is not installed.");
            } else if status.running {
                println!("Service is installed and running.");
            } else {
                println!("Service is installed but not running.");
            }
            Ok(())
        }
    }
}

async fn serve(cli: Cli, config_path: std::path::PathBuf) -> Result<()> {
    let mut config = Config::load_or_init(&config_path)?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }

    if config.pin_hash.is_none() {
        let pin = prompt("Set up a PIN for agentport: ")?;
        if pin.is_empty() {
            bail!("A PIN is required to start the server");
        }
        config.pin_hash = Some(auth::hash_pin(&pin)?);
        config.save(&config_path)?;
        println!("PIN set successfully.");
    }

    if which::which(&config.agent_command).is_err() {
        log::warn!(
            "agent command '{}' not found in PATH, sessions will fail to spawn",
            config.agent_command
        );
    }

    let state = AppState::new(config, config_path);
    server::serve(state).await
}

fn prompt(question: &str) -> Result<String> {
    print!("{question}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}
