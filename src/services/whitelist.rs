use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::config::{SourceFormat, WhitelistConfig, WhitelistSource};
use crate::services::fail2ban_client::{self, Fail2banClient};
use crate::services::http::HttpFetch;
use crate::utils::errors::{AppError, Result};

#[derive(Debug, Deserialize)]
struct AwsIpRanges {
    #[serde(default)]
    prefixes: Vec<AwsPrefix>,
    #[serde(default)]
    ipv6_prefixes: Vec<AwsIpv6Prefix>,
}

#[derive(Debug, Deserialize)]
struct AwsPrefix {
    ip_prefix: String,
    service: String,
}

#[derive(Debug, Deserialize)]
struct AwsIpv6Prefix {
    ipv6_prefix: String,
    service: String,
}

/// Addresses listed by a source document, before validation.
pub fn parse_source(source: &WhitelistSource, body: &str) -> Result<Vec<String>> {
    match source.format {
        SourceFormat::Plain => serde_json::from_str::<Vec<String>>(body)
            .map_err(|e| AppError::Parse(format!("{}: expected a JSON list of addresses: {}", source.name, e))),
        SourceFormat::Aws => {
            let ranges: AwsIpRanges = serde_json::from_str(body)
                .map_err(|e| AppError::Parse(format!("{}: invalid ip-ranges document: {}", source.name, e)))?;
            let wanted = |service: &str| source.services.iter().any(|s| s == service);

            let mut ips: Vec<String> = ranges
                .prefixes
                .into_iter()
                .filter(|p| wanted(&p.service))
                .map(|p| p.ip_prefix)
                .collect();
            if source.include_ipv6 {
                ips.extend(
                    ranges
                        .ipv6_prefixes
                        .into_iter()
                        .filter(|p| wanted(&p.service))
                        .map(|p| p.ipv6_prefix),
                );
            }
            Ok(ips)
        }
        SourceFormat::Text => Ok(body
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
    }
}

/// An IP address or CIDR network (`192.0.2.1`, `192.0.2.0/24`, `2001:db8::/32`).
pub fn is_valid_prefix(entry: &str) -> bool {
    let (addr, len) = match entry.split_once('/') {
        Some((addr, len)) => (addr, Some(len)),
        None => (entry, None),
    };
    let addr: IpAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(_) => return false,
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    match len {
        None => true,
        Some(len) => len.parse::<u8>().map(|len| len <= max).unwrap_or(false),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceReport {
    pub name: String,
    pub jail: String,
    pub listed: usize,
    pub added: usize,
    pub already_present: usize,
    pub invalid: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl fmt::Display for SourceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "❌ {} → {}: {}", self.name, self.jail, error);
        }
        write!(
            f,
            "✅ {} → {}: {} listed, {} added, {} already whitelisted, {} invalid, {} failed",
            self.name, self.jail, self.listed, self.added, self.already_present, self.invalid, self.failed
        )
    }
}

pub struct WhitelistSync<'a> {
    http: &'a dyn HttpFetch,
    client: &'a Fail2banClient,
    config: &'a WhitelistConfig,
    dry_run: bool,
}

impl<'a> WhitelistSync<'a> {
    pub fn new(
        http: &'a dyn HttpFetch,
        client: &'a Fail2banClient,
        config: &'a WhitelistConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            http,
            client,
            config,
            dry_run,
        }
    }

    /// Sync every configured source (or only those named in `only`), then reload fail2ban.
    pub fn run(&self, only: &[String]) -> Result<Vec<SourceReport>> {
        let selected: Vec<&WhitelistSource> = self
            .config
            .sources
            .iter()
            .filter(|s| only.is_empty() || only.iter().any(|name| name == &s.name))
            .collect();

        if selected.is_empty() {
            return Err(AppError::Parse(format!(
                "No whitelist source matches {:?}",
                only
            )));
        }

        let mut reports = Vec::new();
        let mut jail_lists: BTreeMap<String, JailList> = BTreeMap::new();

        for source in selected {
            let report = self.sync_source(source, jail_lists.entry(source.jail.clone()).or_default());
            log::info!("{}", report);
            reports.push(report);
        }

        if self.dry_run {
            return Ok(reports);
        }

        if let Some(dir) = &self.config.persist_dir {
            for (jail, list) in &jail_lists {
                if list.incomplete {
                    log::warn!("Not persisting whitelist for {}: its list is incomplete this run", jail);
                    continue;
                }
                if let Err(e) = fail2ban_client::persist_ignore_ips(&persist_path(dir, jail), jail, &list.ips) {
                    log::error!("Failed to persist whitelist for {}: {}", jail, e);
                }
            }
        }

        if self.config.reload {
            log::info!("Reloading fail2ban");
            self.client.reload()?;
        }

        Ok(reports)
    }

    fn sync_source(&self, source: &WhitelistSource, jail_list: &mut JailList) -> SourceReport {
        let mut report = SourceReport {
            name: source.name.clone(),
            jail: source.jail.clone(),
            ..SourceReport::default()
        };

        let entries = match self
            .http
            .get_text(&source.url)
            .and_then(|body| parse_source(source, &body))
        {
            Ok(entries) => entries,
            Err(e) => {
                report.error = Some(e.to_string());
                jail_list.incomplete = true;
                return report;
            }
        };

        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        for entry in entries {
            if !is_valid_prefix(&entry) {
                log::warn!("Ignoring invalid address {:?} from {}", entry, source.name);
                report.invalid += 1;
                continue;
            }
            if seen.insert(entry.clone()) {
                valid.push(entry);
            }
        }
        report.listed = valid.len();

        let existing = match self.client.get_ignore_ips(&source.jail) {
            Ok(ips) => ips,
            Err(e) => {
                log::warn!("Could not read ignore list of {}: {}", source.jail, e);
                jail_list.incomplete = true;
                Vec::new()
            }
        };
        jail_list.merge(existing.iter().filter(|ip| !is_loopback(ip)).cloned());
        let existing: HashSet<String> = existing.into_iter().collect();

        for ip in &valid {
            if existing.contains(ip) {
                report.already_present += 1;
                continue;
            }
            if self.dry_run {
                log::info!("Would whitelist {} in {}", ip, source.jail);
                report.added += 1;
                continue;
            }
            match self.client.add_ignore_ip(&source.jail, ip) {
                Ok(()) => {
                    log::debug!("Whitelisted {} in {}", ip, source.jail);
                    report.added += 1;
                }
                Err(e) => {
                    log::error!("Error whitelisting {}: {}", ip, e);
                    report.failed += 1;
                }
            }
        }

        jail_list.merge(valid);

        report
    }
}

/// A jail's ignore list as it should be persisted after this run.
#[derive(Debug, Default)]
struct JailList {
    ips: Vec<String>,
    /// A source or the jail read failed, so `ips` may be missing entries.
    incomplete: bool,
}

impl JailList {
    fn merge(&mut self, ips: impl IntoIterator<Item = String>) {
        for ip in ips {
            if !self.ips.contains(&ip) {
                self.ips.push(ip);
            }
        }
    }
}

/// Loopback entries are written by `persist_ignore_ips` itself.
fn is_loopback(entry: &str) -> bool {
    let addr = entry.split_once('/').map_or(entry, |(addr, _)| addr);
    addr.parse::<IpAddr>().map(|addr| addr.is_loopback()).unwrap_or(false)
}

/// Where `persist_dir` puts the override for `jail`.
pub fn persist_path(dir: &Path, jail: &str) -> std::path::PathBuf {
    dir.join(format!("{}.local", jail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::http::testing::StaticFetcher;

    const AWS_DOC: &str = r#"{
        "syncToken": "1712345678",
        "prefixes": [
            {"ip_prefix": "3.172.0.0/18", "region": "GLOBAL", "service": "CLOUDFRONT_ORIGIN_FACING", "network_border_group": "GLOBAL"},
            {"ip_prefix": "13.32.0.0/15", "region": "GLOBAL", "service": "CLOUDFRONT", "network_border_group": "GLOBAL"},
            {"ip_prefix": "15.158.0.0/16", "region": "GLOBAL", "service": "CLOUDFRONT_ORIGIN_FACING", "network_border_group": "GLOBAL"}
        ],
        "ipv6_prefixes": [
            {"ipv6_prefix": "2600:9000:ddd::/48", "region": "GLOBAL", "service": "CLOUDFRONT_ORIGIN_FACING", "network_border_group": "GLOBAL"}
        ]
    }"#;

    fn source(name: &str, url: &str, jail: &str, format: SourceFormat) -> WhitelistSource {
        WhitelistSource {
            name: name.to_string(),
            url: url.to_string(),
            jail: jail.to_string(),
            format,
            services: vec!["CLOUDFRONT_ORIGIN_FACING".to_string()],
            include_ipv6: false,
        }
    }

    /// Stub fail2ban-client that logs calls, ignores 192.0.2.1 already and
    /// refuses to add 198.51.100.66.
    fn stub_client(dir: &Path) -> (Fail2banClient, std::path::PathBuf) {
        stub_client_ignoring(dir, &["127.0.0.0/8", "192.0.2.1"])
    }

    fn stub_client_ignoring(dir: &Path, ignored: &[&str]) -> (Fail2banClient, std::path::PathBuf) {
        let log = dir.join("calls.log");
        let script = dir.join("fail2ban-client.sh");
        let mut listing = String::from("These IP addresses/networks are ignored:\\n");
        for (i, ip) in ignored.iter().enumerate() {
            let branch = if i + 1 == ignored.len() { "`-" } else { "|-" };
            listing.push_str(&format!("{} {}\\n", branch, ip));
        }
        std::fs::write(
            &script,
            format!(
                r#"echo "$@" >> {log}
case "$1" in
  get) printf '{listing}' ;;
  set) [ "$4" = 198.51.100.66 ] && {{ echo 'refused' >&2; exit 1; }} ;;
esac
exit 0
"#,
                log = log.display(),
                listing = listing
            ),
        )
        .unwrap();
        let client = Fail2banClient::with_command("sh", &[script.to_str().unwrap()]);
        (client, log)
    }

    #[test]
    fn test_parse_aws_keeps_wanted_services() {
        let mut src = source("cloudfront", "u", "cloudfront", SourceFormat::Aws);
        assert_eq!(parse_source(&src, AWS_DOC).unwrap(), vec!["3.172.0.0/18", "15.158.0.0/16"]);

        src.include_ipv6 = true;
        assert_eq!(parse_source(&src, AWS_DOC).unwrap().last().unwrap(), "2600:9000:ddd::/48");
    }

    #[test]
    fn test_parse_plain_and_text() {
        let plain = source("jetpack", "u", "wpxmlrpc", SourceFormat::Plain);
        assert_eq!(
            parse_source(&plain, r#"["192.0.80.0/20", "192.0.96.0/20"]"#).unwrap(),
            vec!["192.0.80.0/20", "192.0.96.0/20"]
        );
        assert!(parse_source(&plain, r#"{"prefixes": []}"#).is_err());

        let text = source("cloudflare", "u", "apache-auth", SourceFormat::Text);
        assert_eq!(
            parse_source(&text, "# cloudflare\n173.245.48.0/20\n\n103.21.244.0/22  # sydney\n").unwrap(),
            vec!["173.245.48.0/20", "103.21.244.0/22"]
        );
    }

    #[test]
    fn test_is_valid_prefix() {
        assert!(is_valid_prefix("192.0.2.1"));
        assert!(is_valid_prefix("192.0.2.0/24"));
        assert!(is_valid_prefix("2001:db8::/32"));
        assert!(!is_valid_prefix("192.0.2.0/33"));
        assert!(!is_valid_prefix("2001:db8::/129"));
        assert!(!is_valid_prefix("example.com"));
        assert!(!is_valid_prefix("192.0.2.0/"));
        assert!(!is_valid_prefix("; rm -rf /"));
    }

    #[test]
    fn test_run_adds_missing_entries_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let (client, log) = stub_client(dir.path());
        let http = StaticFetcher::new()
            .with_body(
                "https://jetpack.com/ips-v4.json",
                r#"["192.0.2.1", "192.0.80.0/20", "192.0.80.0/20", "not-an-ip", "198.51.100.66"]"#,
            )
            .with_status("https://ip-ranges.amazonaws.com/ip-ranges.json", 500);
        let config = WhitelistConfig {
            sources: vec![
                source("jetpack", "https://jetpack.com/ips-v4.json", "wpxmlrpc", SourceFormat::Plain),
                source("cloudfront", "https://ip-ranges.amazonaws.com/ip-ranges.json", "cloudfront", SourceFormat::Aws),
            ],
            reload: true,
            persist_dir: None,
        };

        let reports = WhitelistSync::new(&http, &client, &config, false).run(&[]).unwrap();

        assert_eq!(
            reports[0],
            SourceReport {
                name: "jetpack".to_string(),
                jail: "wpxmlrpc".to_string(),
                listed: 3,
                added: 1,
                already_present: 1,
                invalid: 1,
                failed: 1,
                error: None,
            }
        );
        assert!(reports[1].error.as_deref().unwrap().contains("500"));

        let calls = std::fs::read_to_string(log).unwrap();
        assert_eq!(
            calls,
            "get wpxmlrpc ignoreip\n\
             set wpxmlrpc addignoreip 192.0.80.0/20\n\
             set wpxmlrpc addignoreip 198.51.100.66\n\
             reload\n"
        );
    }

    #[test]
    fn test_run_filters_sources_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (client, log) = stub_client(dir.path());
        let persist = dir.path().join("jail.d");
        let http = StaticFetcher::new().with_body("https://aws.example/ip-ranges.json", AWS_DOC);
        let config = WhitelistConfig {
            sources: vec![
                source("jetpack", "https://jetpack.com/ips-v4.json", "wpxmlrpc", SourceFormat::Plain),
                source("cloudfront", "https://aws.example/ip-ranges.json", "cloudfront", SourceFormat::Aws),
            ],
            reload: false,
            persist_dir: Some(persist.clone()),
        };

        let reports = WhitelistSync::new(&http, &client, &config, false)
            .run(&["cloudfront".to_string()])
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].added, 2);

        let persisted = std::fs::read_to_string(persist_path(&persist, "cloudfront")).unwrap();
        assert_eq!(
            persisted,
            "[cloudfront]\nignoreip = 127.0.0.1/8 ::1 192.0.2.1 3.172.0.0/18 15.158.0.0/16\n"
        );
        assert!(!std::fs::read_to_string(log).unwrap().contains("reload"));
    }

    #[test]
    fn test_failed_source_keeps_persisted_jail_list() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _log) = stub_client_ignoring(dir.path(), &["127.0.0.0/8", "203.0.113.5"]);
        let persist = dir.path().join("jail.d");
        std::fs::create_dir(&persist).unwrap();
        let wpxmlrpc_file = persist_path(&persist, "wpxmlrpc");
        std::fs::write(&wpxmlrpc_file, "[wpxmlrpc]\nignoreip = 127.0.0.1/8 ::1 203.0.113.5\n").unwrap();

        let http = StaticFetcher::new()
            .with_body("https://a.example/ips.json", r#"["192.0.80.0/20"]"#)
            .with_status("https://b.example/ips.json", 503)
            .with_body("https://c.example/ips.json", r#"["3.172.0.0/18"]"#);
        let config = WhitelistConfig {
            sources: vec![
                source("a", "https://a.example/ips.json", "wpxmlrpc", SourceFormat::Plain),
                source("b", "https://b.example/ips.json", "wpxmlrpc", SourceFormat::Plain),
                source("c", "https://c.example/ips.json", "cloudfront", SourceFormat::Plain),
            ],
            reload: false,
            persist_dir: Some(persist.clone()),
        };

        let reports = WhitelistSync::new(&http, &client, &config, false).run(&[]).unwrap();
        assert_eq!(reports[0].added, 1);
        assert!(reports[1].error.as_deref().unwrap().contains("503"));

        // b failed, so the wpxmlrpc override is left as it was
        assert_eq!(
            std::fs::read_to_string(&wpxmlrpc_file).unwrap(),
            "[wpxmlrpc]\nignoreip = 127.0.0.1/8 ::1 203.0.113.5\n"
        );
        // entries already ignored by the jail survive the rewrite
        assert_eq!(
            std::fs::read_to_string(persist_path(&persist, "cloudfront")).unwrap(),
            "[cloudfront]\nignoreip = 127.0.0.1/8 ::1 203.0.113.5 3.172.0.0/18\n"
        );
    }

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback("127.0.0.0/8"));
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("::1"));
        assert!(!is_loopback("192.0.2.1"));
        assert!(!is_loopback("not-an-ip"));
    }

    #[test]
    fn test_dry_run_only_reads() {
        let dir = tempfile::tempdir().unwrap();
        let (client, log) = stub_client(dir.path());
        let http = StaticFetcher::new().with_body("https://jetpack.com/ips-v4.json", r#"["192.0.96.0/20"]"#);
        let config = WhitelistConfig {
            sources: vec![source("jetpack", "https://jetpack.com/ips-v4.json", "wpxmlrpc", SourceFormat::Plain)],
            reload: true,
            persist_dir: None,
        };

        let reports = WhitelistSync::new(&http, &client, &config, true).run(&[]).unwrap();
        assert_eq!(reports[0].added, 1);
        assert_eq!(std::fs::read_to_string(log).unwrap(), "get wpxmlrpc ignoreip\n");
    }

    #[test]
    fn test_unknown_source_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _log) = stub_client(dir.path());
        let http = StaticFetcher::new();
        let config = WhitelistConfig::default();
        assert!(WhitelistSync::new(&http, &client, &config, false)
            .run(&["cloudflare".to_string()])
            .is_err());
    }
}
