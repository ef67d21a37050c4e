use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const SERVICE_LABEL: &str = "com.agentport";
pub const SERVICE_NAME: &str = "agentport";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
}

pub fn current_platform() -> Result<Platform> {
    match std::env::consts::OS {
        "macos" => Ok(Platform::MacOs),
        "linux" => Ok(Platform::Linux),
        other => Err(anyhow!(
            "Unsupported platform: {other}. Only macOS and Linux are supported."
        )),
    }
}

#[derive(Debug, Clone)]
pub struct ServicePaths {
    pub service_path: PathBuf,
    pub log_dir: Option<PathBuf>,
}

pub fn service_paths(platform: Platform) -> Result<ServicePaths> {
    let home = dirs::home_dir().context("Cannot determine home directory")?;
    Ok(match platform {
        Platform::MacOs => ServicePaths {
            service_path: home
                .join("Library/LaunchAgents")
                .join(format!("{SERVICE_LABEL}.plist")),
            log_dir: Some(home.join(".config").join(SERVICE_NAME).join("logs")),
        },
        Platform::Linux => ServicePaths {
            service_path: home
                .join(".config/systemd/user")
                .join(format!("{SERVICE_NAME}.service")),
            log_dir: None,
        },
    })
}

#[derive(Debug, Clone)]
pub struct ServiceFileOpts {
    pub binary: PathBuf,
    pub config_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub log_dir: Option<PathBuf>,
}

/// Render the launchd plist or systemd user unit that keeps the server
/// running across logins. The current PATH is baked in so the agent CLI and
/// git resolve the same way they do in the installing shell.
pub fn generate_service_file(platform: Platform, opts: &ServiceFileOpts) -> String {
    let path_env = std::env::var("PATH").unwrap_or_default();
    match platform {
        Platform::MacOs => {
            let log_dir = opts.log_dir.clone().unwrap_or_default();
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{SERVICE_LABEL}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{binary}</string>
    <string>serve</string>
    <string>--config</string>
    <string>{config}</string>
    <string>--port</string>
    <string>{port}</string>
    <string>--host</string>
    <string>{host}</string>
  </array>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <true/>
  <key>StandardOutPath</key>
  <string>{stdout}</string>
  <key>StandardErrorPath</key>
  <string>{stderr}</string>
  <key>EnvironmentVariables</key>
  <dict>
    <key>PATH</key>
    <string>{path_env}</string>
  </dict>
</dict>
</plist>
"#,
                binary = opts.binary.display(),
                config = opts.config_path.display(),
                port = opts.port,
                host = opts.host,
                stdout = log_dir.join("stdout.log").display(),
                stderr = log_dir.join("stderr.log").display(),
            )
        }
        Platform::Linux => format!(
            r#"[Unit]
Description=Agentport remote agent session server
After=network.target

[Service]
Type=simple
ExecStart={binary} serve --config {config} --port {port} --host {host}
Restart=on-failure
RestartSec=5
Environment=PATH={path_env}

[Install]
WantedBy=default.target
"#,
            binary = opts.binary.display(),
            config = opts.config_path.display(),
            port = opts.port,
            host = opts.host,
        ),
    }
}

pub fn is_installed() -> bool {
    current_platform()
        .and_then(service_paths)
        .map(|paths| paths.service_path.exists())
        .unwrap_or(false)
}

pub fn install(config_path: &Path, host: &str, port: u16) -> Result<()> {
    let platform = current_platform()?;
    let paths = service_paths(platform)?;
    if paths.service_path.exists() {
        bail!("Service is already installed. Run `agentport uninstall` first.");
    }

    let binary = std::env::current_exe().context("Cannot locate the agentport binary")?;
    let content = generate_service_file(
        platform,
        &ServiceFileOpts {
            binary,
            config_path: config_path.to_path_buf(),
            host: host.to_string(),
            port,
            log_dir: paths.log_dir.clone(),
        },
    );

    if let Some(parent) = paths.service_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(log_dir) = &paths.log_dir {
        std::fs::create_dir_all(log_dir)?;
    }
    std::fs::write(&paths.service_path, content)
        .with_context(|| format!("Failed to write {}", paths.service_path.display()))?;

    match platform {
        Platform::MacOs => {
            run("launchctl", &["load", "-w", &paths.service_path.to_string_lossy()])?;
        }
        Platform::Linux => {
            run("systemctl", &["--user", "daemon-reload"])?;
            run("systemctl", &["--user", "enable", "--now", SERVICE_NAME])?;
        }
    }

    println!("Service installed and started.");
    match &paths.log_dir {
        Some(dir) => println!("Logs: {}", dir.display()),
        None => println!("Logs: journalctl --user -u {SERVICE_NAME} -f"),
    }
    Ok(())
}

pub fn uninstall() -> Result<()> {
    let platform = current_platform()?;
    let paths = service_paths(platform)?;
    if !paths.service_path.exists() {
        bail!("Service is not installed.");
    }

    // Unload failures are fine, the service may already be stopped.
    match platform {
        Platform::MacOs => {
            let _ = run("launchctl", &["unload", &paths.service_path.to_string_lossy()]);
        }
        Platform::Linux => {
            let _ = run("systemctl", &["--user", "disable", "--now", SERVICE_NAME]);
        }
    }

    std::fs::remove_file(&paths.service_path)
        .with_context(|| format!("Failed to remove {}", paths.service_path.display()))?;
    println!("Service uninstalled.");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    pub installed: bool,
    pub running: bool,
}

pub fn status() -> Result<ServiceStatus> {
    let platform = current_platform()?;
    let paths = service_paths(platform)?;
    if !paths.service_path.exists() {
        return Ok(ServiceStatus {
            installed: false,
            running: false,
        });
    }
    Ok(ServiceStatus {
        installed: true,
        running: check_running(platform),
    })
}

fn check_running(platform: Platform) -> bool {
    match platform {
        Platform::MacOs => match Command::new("launchctl")
            .args(["list", SERVICE_LABEL])
            .output()
        {
            Ok(output) if output.status.success() => {
                !String::from_utf8_lossy(&output.stdout).contains("\"LastExitStatus\" = -1")
            }
            _ => false,
        },
        Platform::Linux => Command::new("systemctl")
            .args(["--user", "is-active", SERVICE_NAME])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false),
    }
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run {program}"))?;
    if !status.success() {
        bail!("{program} {} exited with {status}", args.join(" "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ServiceFileOpts {
        ServiceFileOpts {
            binary: PathBuf::from("/usr/local/bin/agentport"),
            config_path: PathBuf::from("/home/u/.config/agentport/config.json"),
            host: "0.0.0.0".into(),
            port: 3456,
            log_dir: Some(PathBuf::from("/home/u/.config/agentport/logs")),
        }
    }

    #[test]
    fn plist_carries_program_arguments_and_keepalive() {
        let plist = generate_service_file(Platform::MacOs, &opts());
        assert!(plist.contains("<string>com.agentport</string>"));
        assert!(plist.contains("<string>/usr/local/bin/agentport</string>"));
        assert!(plist.contains("<string>serve</string>"));
        assert!(plist.contains("<string>3456</string>"));
        assert!(plist.contains("<key>KeepAlive</key>"));
        assert!(plist.contains("stdout.log"));
    }

    #[test]
    fn systemd_unit_restarts_on_failure() {
        let unit = generate_service_file(Platform::Linux, &opts());
        assert!(unit.contains("ExecStart=/usr/local/bin/agentport serve"));
        assert!(unit.contains("--port 3456"));
        assert!(unit.contains("Restart=on-failure"));
        assert!(unit.contains("WantedBy=default.target"));
    }

    #[test]
    fn linux_paths_use_systemd_user_dir() {
        let paths = service_paths(Platform::Linux).unwrap();
        assert!(paths
            .service_path
            .ends_with(".config/systemd/user/agentport.service"));
        assert!(paths.log_dir.is_none());
    }
}
