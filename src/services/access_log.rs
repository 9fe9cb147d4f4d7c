use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use regex::Regex;
use serde::Serialize;

use crate::utils::errors::{AppError, Result};

// vhost:port ip pid [dd/Mon/yyyy:HH:MM:SS +zone] "METHOD path HTTP/x" status size duration "referrer" "agent"
const ACCESS_LINE_PATTERN: &str = concat!(
    r#"^([a-zA-Z0-9\-_.]+):(\d+)\s([\d.]+)\s(\d+)\s"#,
    r#"\[(\d+)/([A-Za-z]{3})/(\d{4}):(\d{2}):(\d{2}):(\d{2})\s[+\-]?\d+\]\s"#,
    r#""(GET|POST|PUT|HEAD|DELETE|OPTIONS|PATCH)\s(\S+)\sHTTP/([\d.]+)"\s"#,
    r#"(\d+)\s(\d+)\s(\d+)\s"([^"]+)"\s"([^"]+)""#,
);

pub const CSV_HEADER: [&str; 18] = [
    "server_name",
    "port",
    "ip",
    "apache process",
    "day",
    "month",
    "year",
    "hour",
    "minute",
    "second",
    "request",
    "path",
    "protocol",
    "status",
    "size",
    "response (seconds)",
    "referrer",
    "user agent",
];

/// One parsed access log line. Fields are kept exactly as logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogEntry {
    pub server_name: String,
    pub port: String,
    pub ip: String,
    pub process: String,
    pub day: String,
    pub month: String,
    pub year: String,
    pub hour: String,
    pub minute: String,
    pub second: String,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: String,
    pub size: String,
    pub response_secs: String,
    pub referrer: String,
    pub user_agent: String,
}

pub struct AccessLogParser {
    pattern: Regex,
}

impl AccessLogParser {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(ACCESS_LINE_PATTERN)
            .map_err(|e| AppError::Internal(format!("Invalid access log pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    pub fn parse_line(&self, line: &str) -> Option<AccessLogEntry> {
        let caps = self.pattern.captures(line)?;
        let field = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();

        Some(AccessLogEntry {
            server_name: field(1),
            port: field(2),
            ip: field(3),
            process: field(4),
            day: field(5),
            month: field(6),
            year: field(7),
            hour: field(8),
            minute: field(9),
            second: field(10),
            method: field(11),
            path: field(12),
            protocol: field(13),
            status: field(14),
            size: field(15),
            response_secs: field(16),
            referrer: field(17),
            user_agent: field(18),
        })
    }

    /// Write the header plus one row per matching line, returning the row count.
    pub fn export<R: BufRead, W: Write>(&self, mut reader: R, writer: W) -> Result<usize> {
        let mut csv_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::CRLF)
            .from_writer(writer);
        csv_writer.write_record(CSV_HEADER)?;

        let mut count = 0;
        let mut buf = Vec::new();
        let mut line_no = 0usize;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;

            let line = String::from_utf8_lossy(&buf);
            match self.parse_line(line.trim_end_matches(['\r', '\n'])) {
                Some(entry) => {
                    csv_writer.serialize(&entry)?;
                    count += 1;
                }
                None => log::debug!("Skipping unmatched line {}", line_no),
            }
        }

        csv_writer.flush()?;
        Ok(count)
    }
}

/// `<input>.csv` next to the input file.
pub fn default_output_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".csv");
    PathBuf::from(name)
}

/// Export `input` (plain or gzip) to CSV at `output`, or `<input>.csv`.
pub fn export_file(input: &Path, output: Option<&Path>) -> Result<usize> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input));

    let file = File::open(input).map_err(|e| {
        AppError::FileSystem(std::io::Error::new(
            e.kind(),
            format!("Failed to open log {}: {}", input.display(), e),
        ))
    })?;

    let is_gzip = input.extension().map(|ext| ext == "gz").unwrap_or(false);
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let out = File::create(&output)?;
    let parser = AccessLogParser::new()?;
    let count = parser.export(BufReader::new(reader), out)?;

    log::info!("Exported {} access log rows from {} to {}", count, input.display(), output.display());
    Ok(count)
}
