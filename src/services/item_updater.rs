use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use serde::Deserialize;

use crate::config::ItemsConfig;
use crate::services::archive;
use crate::services::http::HttpFetch;
use crate::utils::errors::{AppError, Result};
use crate::utils::version::WpVersion;

const README_FILES: [&str; 2] = ["readme.txt", "README.txt"];
const UNKNOWN_VERSION: &str = "unknown";
const TRUNK: &str = "trunk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ItemKind {
    Plugin,
    Theme,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Plugin => write!(f, "plugin"),
            ItemKind::Theme => write!(f, "theme"),
        }
    }
}

/// Latest release information from the wordpress.org directory.
#[derive(Debug, Clone, Deserialize)]
pub struct LatestRelease {
    pub version: String,
    #[serde(default)]
    pub download_link: String,
}

/// Where a kind of item lives and how its latest release is looked up.
pub trait ItemSource {
    fn kind(&self) -> ItemKind;

    fn directory(&self) -> &Path;

    fn excluded(&self) -> &[String];

    /// `Ok(None)` when the directory does not know the item.
    fn fetch_latest(&self, http: &dyn HttpFetch, slug: &str) -> Result<Option<LatestRelease>>;

    /// Installed version of the item at `path`, if it has one.
    fn installed_version(&self, path: &Path) -> Option<String> {
        let readme = readme_path(path)?;
        Some(read_header(&readme, "Stable tag:").unwrap_or_else(|| UNKNOWN_VERSION.to_string()))
    }
}

pub struct PluginSource {
    directory: PathBuf,
    excluded: Vec<String>,
    info_url: String,
}

impl PluginSource {
    pub fn new(config: &ItemsConfig) -> Self {
        Self {
            directory: config.plugin_dir.clone(),
            excluded: config.excluded_plugins.clone(),
            info_url: config.plugin_info_url.clone(),
        }
    }
}

impl ItemSource for PluginSource {
    fn kind(&self) -> ItemKind {
        ItemKind::Plugin
    }

    fn directory(&self) -> &Path {
        &self.directory
    }

    fn excluded(&self) -> &[String] {
        &self.excluded
    }

    fn fetch_latest(&self, http: &dyn HttpFetch, slug: &str) -> Result<Option<LatestRelease>> {
        fetch_directory_info(http, &self.info_url.replace("{slug}", slug), slug)
    }
}

pub struct ThemeSource {
    directory: PathBuf,
    excluded: Vec<String>,
    info_url: String,
}

impl ThemeSource {
    pub fn new(config: &ItemsConfig) -> Self {
        Self {
            directory: config.theme_dir.clone(),
            excluded: config.excluded_themes.clone(),
            info_url: config.theme_info_url.clone(),
        }
    }
}

impl ItemSource for ThemeSource {
    fn kind(&self) -> ItemKind {
        ItemKind::Theme
    }

    fn directory(&self) -> &Path {
        &self.directory
    }

    fn excluded(&self) -> &[String] {
        &self.excluded
    }

    fn fetch_latest(&self, http: &dyn HttpFetch, slug: &str) -> Result<Option<LatestRelease>> {
        fetch_directory_info(http, &self.info_url.replace("{slug}", slug), slug)
    }

    // Themes without a readme still carry a Version header in style.css
    fn installed_version(&self, path: &Path) -> Option<String> {
        if let Some(readme) = readme_path(path) {
            return Some(read_header(&readme, "Stable tag:").unwrap_or_else(|| UNKNOWN_VERSION.to_string()));
        }
        let style = path.join("style.css");
        if style.is_file() {
            return Some(read_header(&style, "Version:").unwrap_or_else(|| UNKNOWN_VERSION.to_string()));
        }
        None
    }
}

fn fetch_directory_info(http: &dyn HttpFetch, url: &str, slug: &str) -> Result<Option<LatestRelease>> {
    let body = match http.get_text(url) {
        Ok(body) => body,
        Err(AppError::Http { status, .. }) => {
            log::warn!("API request failed for {}: HTTP {}", slug, status);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    // Unknown slugs come back as `{"error": "..."}` or `null`
    let value: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| AppError::Parse(format!("Invalid API response for {}: {}", slug, e)))?;
    if let Some(error) = value.get("error") {
        log::warn!("API has no entry for {}: {}", slug, error);
        return Ok(None);
    }
    if value.get("version").is_none() {
        log::warn!("API response for {} has no version", slug);
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| AppError::Parse(format!("Invalid API response for {}: {}", slug, e)))
}

fn readme_path(item_path: &Path) -> Option<PathBuf> {
    if !item_path.is_dir() {
        return None;
    }
    README_FILES
        .iter()
        .map(|name| item_path.join(name))
        .find(|path| path.is_file())
}

/// Value after the first `header` line (`Stable tag: 1.2.3` → `1.2.3`).
fn read_header(path: &Path, header: &str) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let content = String::from_utf8_lossy(&bytes);
    content
        .lines()
        .find(|line| line.contains(header))
        .and_then(|line| line.split(':').nth(1))
        .map(|value| value.trim().to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Excluded,
    Unavailable,
    UpToDate { current: String },
    Updated { from: String, to: String },
    WouldUpdate { from: String, to: String },
    InvalidVersion { current: String, latest: String },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub kind: ItemKind,
    pub slug: String,
    pub outcome: ItemOutcome,
}

impl fmt::Display for ItemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            ItemOutcome::Excluded => write!(f, "⏭ {} {}: excluded", self.kind, self.slug),
            ItemOutcome::Unavailable => write!(f, "⚠️  {} {}: not found in the directory", self.kind, self.slug),
            ItemOutcome::UpToDate { current } => write!(f, "⛔ {} {} is up to date ({})", self.kind, self.slug, current),
            ItemOutcome::Updated { from, to } => write!(f, "✅ {} {}: {} → {}", self.kind, self.slug, from, to),
            ItemOutcome::WouldUpdate { from, to } => write!(f, "⬆ {} {}: {} → {} (dry run)", self.kind, self.slug, from, to),
            ItemOutcome::InvalidVersion { current, latest } => {
                write!(f, "⚠️  {} {}: cannot compare {} with {}", self.kind, self.slug, current, latest)
            }
            ItemOutcome::Failed(reason) => write!(f, "❌ {} {}: {}", self.kind, self.slug, reason),
        }
    }
}

pub struct ItemUpdater<'a> {
    http: &'a dyn HttpFetch,
    lookup_delay: Duration,
    download_delay: Duration,
    dry_run: bool,
}

impl<'a> ItemUpdater<'a> {
    pub fn new(http: &'a dyn HttpFetch, config: &ItemsConfig, dry_run: bool) -> Self {
        Self {
            http,
            lookup_delay: Duration::from_millis(config.lookup_delay_ms),
            download_delay: Duration::from_millis(config.download_delay_ms),
            dry_run,
        }
    }

    /// Installed items of `source`, sorted by slug. Git checkouts are skipped.
    pub fn installed_versions(&self, source: &dyn ItemSource) -> Result<BTreeMap<String, String>> {
        let mut items = BTreeMap::new();
        let directory = source.directory();

        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let path = entry.path();
            let slug = entry.file_name().to_string_lossy().into_owned();

            if path.join(".git").exists() {
                log::debug!("Skipping git checkout {}", path.display());
                continue;
            }

            if let Some(version) = source.installed_version(&path) {
                items.insert(slug, version);
            }
        }

        log::info!("Found {} installed {}s in {}", items.len(), source.kind(), directory.display());
        Ok(items)
    }

    pub fn update(&self, source: &dyn ItemSource) -> Result<Vec<ItemReport>> {
        let installed = self.installed_versions(source)?;
        let mut reports = Vec::with_capacity(installed.len());

        for (slug, current) in installed {
            let outcome = self.update_item(source, &slug, &current);
            let report = ItemReport {
                kind: source.kind(),
                slug,
                outcome,
            };
            log::info!("{}", report);
            reports.push(report);
        }

        Ok(reports)
    }

    pub fn update_item(&self, source: &dyn ItemSource, slug: &str, current: &str) -> ItemOutcome {
        if source.excluded().iter().any(|excluded| excluded == slug) {
            return ItemOutcome::Excluded;
        }

        let latest = match source.fetch_latest(self.http, slug) {
            Ok(Some(latest)) => latest,
            Ok(None) => return ItemOutcome::Unavailable,
            Err(e) => return ItemOutcome::Failed(e.to_string()),
        };
        sleep(self.lookup_delay);

        log::debug!("{} {}: installed {}, latest {}", source.kind(), slug, current, latest.version);
        let newer = match is_update(current, &latest.version) {
            Ok(newer) => newer,
            Err(_) => {
                return ItemOutcome::InvalidVersion {
                    current: current.to_string(),
                    latest: latest.version,
                }
            }
        };

        if !newer || latest.download_link.is_empty() {
            return ItemOutcome::UpToDate {
                current: current.to_string(),
            };
        }

        if self.dry_run {
            return ItemOutcome::WouldUpdate {
                from: current.to_string(),
                to: latest.version,
            };
        }

        log::info!("⬆ Updating {}: {} → {}", slug, current, latest.version);
        sleep(self.download_delay);
        match self.download_and_extract(&latest.download_link, source.directory()) {
            Ok(()) => ItemOutcome::Updated {
                from: current.to_string(),
                to: latest.version,
            },
            Err(e) => ItemOutcome::Failed(format!("download of {} failed: {}", latest.download_link, e)),
        }
    }

    fn download_and_extract(&self, url: &str, extract_to: &Path) -> Result<()> {
        let mut temp = tempfile::Builder::new()
            .prefix("wp-ops-")
            .suffix(".zip")
            .tempfile()?;
        self.http.download(url, temp.as_file_mut())?;
        archive::extract_zip(temp.path(), extract_to)
    }
}

/// Whether `latest` should replace `current`. `trunk` on either side always updates.
fn is_update(current: &str, latest: &str) -> Result<bool> {
    if current == TRUNK || latest == TRUNK {
        return Ok(true);
    }
    let current: WpVersion = current.parse()?;
    let latest: WpVersion = latest.parse()?;
    Ok(latest > current)
}
