use std::path::Path;
use std::process::{Command, Output};

use crate::utils::errors::{AppError, ServiceError, Result};

pub struct Fail2banClient {
    program: String,
    prefix_args: Vec<String>,
}

impl Fail2banClient {
    pub fn new() -> Self {
        Self::with_command("fail2ban-client", &[])
    }

    /// Run `program prefix_args... <fail2ban args>` instead of `fail2ban-client`.
    pub fn with_command(program: &str, prefix_args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            prefix_args: prefix_args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.program)
            .args(&self.prefix_args)
            .args(args)
            .output()
            .map_err(|e| AppError::Service(ServiceError::CommunicationError(
                format!("Failed to run fail2ban-client {}: {}", args.join(" "), e)
            )))
    }

    fn run_checked(&self, args: &[&str], what: &str) -> Result<String> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            Err(AppError::Service(ServiceError::OperationFailed(
                format!("{} failed: {}", what, error_msg.trim())
            )))
        }
    }

    pub fn ping(&self) -> Result<bool> {
        let output = self.run(&["ping"])?;
        let response = String::from_utf8_lossy(&output.stdout);
        Ok(response.contains("pong"))
    }

    pub fn get_jails(&self) -> Result<Vec<String>> {
        let stdout = self.run_checked(&["status"], "Listing jails")?;
        Ok(parse_jail_list(&stdout))
    }

    pub fn get_ignore_ips(&self, jail_name: &str) -> Result<Vec<String>> {
        let stdout = self.run_checked(
            &["get", jail_name, "ignoreip"],
            &format!("Reading ignore list of {}", jail_name),
        )?;
        let ips = parse_ignore_list(&stdout);
        log::debug!("Jail {} currently ignores {} addresses", jail_name, ips.len());
        Ok(ips)
    }

    pub fn add_ignore_ip(&self, jail_name: &str, ip: &str) -> Result<()> {
        self.run_checked(
            &["set", jail_name, "addignoreip", ip],
            &format!("Whitelisting {} in {}", ip, jail_name),
        )?;
        Ok(())
    }

    /// Reload fail2ban configuration to apply changes
    pub fn reload(&self) -> Result<()> {
        self.run_checked(&["reload"], "Config reload")?;
        Ok(())
    }
}

impl Default for Fail2banClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the "Jail list:" line of `fail2ban-client status`.
fn parse_jail_list(stdout: &str) -> Vec<String> {
    for line in stdout.lines() {
        if let Some(list) = line.split("Jail list:").nth(1) {
            return list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    Vec::new()
}

/// Parse `fail2ban-client get <jail> ignoreip`:
///
/// ```text
/// These IP addresses/networks are ignored:
/// |- 127.0.0.0/8
/// `- ::1
/// ```
fn parse_ignore_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            trimmed
                .strip_prefix("|-")
                .or_else(|| trimmed.strip_prefix("`-"))
                .map(|ip| ip.trim().to_string())
        })
        .filter(|ip| !ip.is_empty())
        .collect()
}

/// Write `ignoreip` for `[jail_name]` into a jail.d override file, creating
/// the file or section if needed and leaving everything else untouched.
pub fn persist_ignore_ips(path: &Path, jail_name: &str, ips: &[String]) -> Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(AppError::FileSystem(e)),
    };

    let updated = update_ignoreip_in_config(&content, jail_name, ips);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, updated).map_err(|e| AppError::Service(ServiceError::OperationFailed(
        format!("Failed to write whitelist configuration {}: {}", path.display(), e)
    )))?;

    log::info!("Persisted {} ignore entries for {} to {}", ips.len(), jail_name, path.display());
    Ok(())
}

fn update_ignoreip_in_config(content: &str, jail_name: &str, ips: &[String]) -> String {
    let header = format!("[{}]", jail_name);
    let ignoreip_line = if ips.is_empty() {
        "ignoreip = 127.0.0.1/8 ::1".to_string()
    } else {
        format!("ignoreip = 127.0.0.1/8 ::1 {}", ips.join(" "))
    };

    let mut updated_lines = Vec::new();
    let mut in_target = false;
    let mut found_section = false;
    let mut ignoreip_updated = false;

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            // Leaving the target section without an ignoreip line
            if in_target && !ignoreip_updated {
                insert_after_header(&mut updated_lines, &header, &ignoreip_line);
                ignoreip_updated = true;
            }
            in_target = trimmed == header;
            found_section |= in_target;
            updated_lines.push(line.to_string());
            continue;
        }

        if in_target && (trimmed.starts_with("ignoreip") || trimmed.starts_with("#ignoreip")) {
            if !ignoreip_updated {
                updated_lines.push(ignoreip_line.clone());
                ignoreip_updated = true;
            }
        } else {
            updated_lines.push(line.to_string());
        }
    }

    if !found_section {
        if updated_lines.last().map(|l| !l.trim().is_empty()).unwrap_or(false) {
            updated_lines.push(String::new());
        }
        updated_lines.push(header);
        updated_lines.push(ignoreip_line);
    } else if !ignoreip_updated {
        insert_after_header(&mut updated_lines, &header, &ignoreip_line);
    }

    let mut out = updated_lines.join("\n");
    out.push('\n');
    out
}

fn insert_after_header(lines: &mut Vec<String>, header: &str, entry: &str) {
    if let Some(i) = lines.iter().position(|l| l.trim() == header) {
        lines.insert(i + 1, entry.to_string());
    }
}
