//! `fleet daemon` — background daemon lifecycle and systemd management.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use fleet_daemon::paths::{socket_path, stderr_log_path, stdout_log_path};
use fleet_daemon::{
    install_systemd, request_event, request_reload, request_status, request_stop, start_blocking,
    uninstall_systemd, DaemonError,
};

use super::event::print_json;
use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run daemon in foreground (watcher + socket server).
    Start,
    /// Request graceful daemon shutdown over Unix socket.
    Stop,
    /// Query daemon runtime status over Unix socket.
    Status,
    /// Ask the daemon to re-read registry and settings.
    Reload,
    /// Deliver one push event to the running daemon.
    Send(DaemonSendArgs),
    /// Install and start the systemd user unit.
    Install,
    /// Stop and remove the systemd user unit.
    Uninstall,
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct DaemonSendArgs {
    /// Repository full name, `owner/repo`.
    pub repository: String,

    /// Pushed git ref.
    #[arg(value_name = "REF")]
    pub git_ref: String,

    /// Wait for the pipeline to finish and print its report.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only stderr log file.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Reload => {
            let data = request_reload(&home).context("daemon reload failed")?;
            print_json(&data)?;
        }
        DaemonCommand::Send(args) => {
            let data = request_event(&home, &args.repository, &args.git_ref, args.wait)
                .with_context(|| format!("event {} {} failed", args.repository, args.git_ref))?;
            print_json(&data)?;
        }
        DaemonCommand::Install => {
            let binary = std::env::current_exe().context("cannot locate the fleet binary")?;
            let path = install_systemd(&home, &binary).context("failed to install systemd unit")?;
            println!("installed systemd unit: {}", path.display());
        }
        DaemonCommand::Uninstall => {
            uninstall_systemd(&home).context("failed to uninstall systemd unit")?;
            println!("uninstalled systemd unit");
        }
        DaemonCommand::Logs(args) => {
            if args.stderr_only {
                print_tail(&stderr_log_path(&home), args.lines)
                    .context("failed to read daemon stderr log")?;
            } else {
                print_tail(&stdout_log_path(&home), args.lines)
                    .context("failed to read daemon stdout log")?;
                print_tail(&stderr_log_path(&home), args.lines)
                    .context("failed to read daemon stderr log")?;
            }
        }
    }

    Ok(())
}

fn print_tail(path: &std::path::Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if lines == 0 {
            continue;
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
