use std::io::{Read, Write};
use std::time::Duration;

use crate::config::HttpConfig;
use crate::utils::errors::{AppError, Result};

/// Blocking HTTP access used by every job.
pub trait HttpFetch {
    /// GET `url` and return the body as text.
    fn get_text(&self, url: &str) -> Result<String>;

    /// GET `url` and stream the body into `dest`, returning the byte count.
    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64>;
}

pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { agent }
    }

    fn call(&self, url: &str) -> Result<ureq::Response> {
        log::debug!("GET {}", url);
        match self.agent.get(url).call() {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(status, response)) => {
                log::debug!("{} answered {} {}", url, status, response.status_text());
                Err(AppError::Http {
                    url: url.to_string(),
                    status,
                })
            }
            Err(e) => Err(AppError::Network(format!("{}: {}", url, e))),
        }
    }
}

impl HttpFetch for UreqFetcher {
    fn get_text(&self, url: &str) -> Result<String> {
        let response = self.call(url)?;
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|e| AppError::Network(format!("Failed to read response from {}: {}", url, e)))?;
        Ok(body)
    }

    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        let response = self.call(url)?;
        let mut reader = response.into_reader();
        let written = std::io::copy(&mut reader, dest)
            .map_err(|e| AppError::Network(format!("Failed to download {}: {}", url, e)))?;
        log::debug!("Downloaded {} bytes from {}", written, url);
        Ok(written)
    }
}
