use std::process::Command;
use crate::utils::errors::{AppError, ServiceError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    Failed,
    Unknown,
}

pub struct SystemService {
    service_name: String,
    program: String,
    prefix_args: Vec<String>,
}

impl SystemService {
    pub fn new(service_name: &str) -> Self {
        Self::with_command(service_name, "systemctl", &[])
    }

    /// Run `program prefix_args... <systemctl args>` instead of `systemctl`.
    pub fn with_command(service_name: &str, program: &str, prefix_args: &[&str]) -> Self {
        Self {
            service_name: service_name.to_string(),
            program: program.to_string(),
            prefix_args: prefix_args.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.service_name
    }

    pub fn get_status(&self) -> Result<ServiceStatus> {
        let output = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(["is-active", &self.service_name])
            .output()
            .map_err(|e| AppError::Service(ServiceError::CommunicationError(
                format!("Failed to check service status: {}", e)
            )))?;

        let binding = String::from_utf8_lossy(&output.stdout);
        let status_str = binding.trim();

        match status_str {
            "active" | "reloading" => Ok(ServiceStatus::Running),
            "inactive" => Ok(ServiceStatus::Stopped),
            "failed" => Ok(ServiceStatus::Failed),
            _ => Ok(ServiceStatus::Unknown),
        }
    }

    pub fn reload(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(["reload", &self.service_name])
            .output()
            .map_err(|e| {
                AppError::Service(ServiceError::OperationFailed(
                    format!("Failed to reload service: {}", e)
                ))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            Err(AppError::Service(ServiceError::OperationFailed(
                format!("Reload of {} failed: {}", self.service_name, error_msg.trim())
            )))
        }
    }

    /// Reload the unit only when it is running. Returns whether a reload happened.
    pub fn reload_if_active(&self) -> Result<bool> {
        match self.get_status()? {
            ServiceStatus::Running => {
                self.reload()?;
                log::info!("Reloaded {}", self.service_name);
                Ok(true)
            }
            status => {
                log::warn!("Not reloading {}: service is {:?}", self.service_name, status);
                Ok(false)
            }
        }
    }
}
