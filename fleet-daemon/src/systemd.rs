use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{io_err, DaemonError};
use crate::paths::{
    logs_dir, socket_path, stderr_log_path, stdout_log_path, systemd_user_dir, unit_path,
    DAEMON_UNIT,
};

/// Generate a systemd user unit running `fleet daemon start`.
pub fn generate_unit(binary_path: &Path, home: &Path) -> String {
    let binary = binary_path.display();
    let stdout = stdout_log_path(home);
    let stderr = stderr_log_path(home);

    format!(
        "[Unit]
Description=fleet sync-and-rebuild daemon
After=network-online.target

[Service]
Type=simple
ExecStart={binary} daemon start
Restart=on-failure
RestartSec=5
Environment=HOME={home}
StandardOutput=append:{stdout}
StandardError=append:{stderr}

[Install]
WantedBy=default.target
",
        binary = binary,
        home = home.display(),
        stdout = stdout.display(),
        stderr = stderr.display(),
    )
}

/// Write the unit file and enable it for the current user.
pub fn install(home: &Path, binary_path: &Path) -> Result<PathBuf, DaemonError> {
    ensure_linux()?;

    for dir in [systemd_user_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }

    let unit = unit_path(home);
    fs::write(&unit, generate_unit(binary_path, home)).map_err(|e| io_err(&unit, e))?;

    run_systemctl(&["daemon-reload"], false)?;
    run_systemctl(&["enable", "--now", DAEMON_UNIT], false)?;
    run_systemctl(&["restart", DAEMON_UNIT], false)?;

    Ok(unit)
}

/// Stop and disable the unit, then remove it.
pub fn uninstall(home: &Path) -> Result<(), DaemonError> {
    ensure_linux()?;

    let unit = unit_path(home);
    if unit.exists() {
        let _ = run_systemctl(&["disable", "--now", DAEMON_UNIT], true);
        fs::remove_file(&unit).map_err(|e| io_err(&unit, e))?;
        let _ = run_systemctl(&["daemon-reload"], true);
    }

    let socket = socket_path(home);
    if socket.exists() {
        let _ = fs::remove_file(socket);
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn ensure_linux() -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn ensure_linux() -> Result<(), DaemonError> {
    Err(DaemonError::Systemd(
        "systemd management is only supported on Linux".to_string(),
    ))
}

fn run_systemctl(args: &[&str], ignore_failure: bool) -> Result<(), DaemonError> {
    let output = Command::new("systemctl")
        .arg("--user")
        .args(args)
        .output()
        .map_err(|e| io_err("systemctl", e))?;

    if output.status.success() || ignore_failure {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Err(DaemonError::Systemd(format!(
        "systemctl --user {} failed (status {}): {} {}",
        args.join(" "),
        output.status,
        stdout,
        stderr
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn directives(unit: &str) -> HashMap<&str, &str> {
        unit.lines()
            .filter_map(|line| line.split_once('='))
            .collect()
    }

    #[test]
    fn unit_runs_daemon_start_with_appended_logs() {
        let unit = generate_unit(Path::new("/usr/local/bin/fleet"), Path::new("/home/ops"));
        let fields = directives(&unit);

        assert_eq!(fields["ExecStart"], "/usr/local/bin/fleet daemon start");
        assert_eq!(fields["Environment"], "HOME=/home/ops");
        assert_eq!(
            fields["StandardOutput"],
            "append:/home/ops/.fleet/logs/daemon.log"
        );
        assert_eq!(
            fields["StandardError"],
            "append:/home/ops/.fleet/logs/daemon-err.log"
        );
        assert_eq!(fields["WantedBy"], "default.target");
    }

    #[test]
    fn unit_lives_in_user_systemd_dir() {
        assert_eq!(
            unit_path(Path::new("/home/ops")),
            PathBuf::from("/home/ops/.config/systemd/user/fleet-daemon.service")
        );
    }
}
