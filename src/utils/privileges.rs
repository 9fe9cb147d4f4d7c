use nix::unistd::{getuid, geteuid};
use crate::utils::errors::{AppError, Result};

pub fn check_privileges() -> PrivilegeStatus {
    let uid = getuid();
    let euid = geteuid();

    if uid.is_root() || euid.is_root() {
        return PrivilegeStatus::Root;
    }

    // SUDO_UID is set when running under sudo
    if std::env::var("SUDO_UID").is_ok() {
        return PrivilegeStatus::Sudo;
    }

    PrivilegeStatus::User
}

/// Fails with `AppError::Permission` unless the effective user is root.
/// `sudo -u <someone>` sets `SUDO_UID` too, so that alone is not enough.
pub fn require_root(job: &str) -> Result<PrivilegeStatus> {
    root_gate(job, geteuid().is_root(), check_privileges())
}

fn root_gate(job: &str, effective_root: bool, status: PrivilegeStatus) -> Result<PrivilegeStatus> {
    if !effective_root {
        return Err(AppError::Permission(format!(
            "{} needs root privileges (re-run with sudo, or pass --dry-run)",
            job
        )));
    }
    log::debug!("Running {} with privilege status {:?}", job, status);
    Ok(status)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrivilegeStatus {
    Root,
    Sudo,
    User,
}
