use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::CoreConfig;
use crate::services::archive;
use crate::services::http::HttpFetch;
use crate::services::system_service::SystemService;
use crate::utils::errors::{AppError, Result};
use crate::utils::version::WpVersion;

const VERSION_FILE: &str = "wp-includes/version.php";
const INSTALL_PREFIX: &str = "wp";
const TARBALL_ROOT: &str = "wordpress";

#[derive(Debug, Clone, PartialEq)]
pub enum CoreOutcome {
    UnknownVersion,
    UpToDate { version: String },
    SkippedMajor { current: String, release: String, existing: PathBuf },
    WouldUpgrade { from: String, to: String, target: PathBuf },
    Upgraded { from: String, to: String, target: PathBuf, backup: PathBuf },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CoreReport {
    pub install: PathBuf,
    pub outcome: CoreOutcome,
}

impl fmt::Display for CoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let install = self.install.display();
        match &self.outcome {
            CoreOutcome::UnknownVersion => write!(f, "⚠️  {}: failed to extract WP version", install),
            CoreOutcome::UpToDate { version } => write!(f, "⛔ {}: {} is the latest release of its branch", install, version),
            CoreOutcome::SkippedMajor { current, release, existing } => write!(
                f,
                "⏭ {}: {} → {} is a major update already available at {}",
                install, current, release, existing.display()
            ),
            CoreOutcome::WouldUpgrade { from, to, target } => {
                write!(f, "⬆ {}: {} → {} into {} (dry run)", install, from, to, target.display())
            }
            CoreOutcome::Upgraded { from, to, target, backup } => write!(
                f,
                "✅ {}: {} → {} into {} (backup {})",
                install, from, to, target.display(), backup.display()
            ),
            CoreOutcome::Failed(reason) => write!(f, "❌ {}: {}", install, reason),
        }
    }
}

/// Release picked for an install.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreRelease {
    pub version: WpVersion,
    pub minor: bool,
}

pub struct CoreUpgrader<'a> {
    http: &'a dyn HttpFetch,
    config: &'a CoreConfig,
    version_pattern: Regex,
    dry_run: bool,
}

impl<'a> CoreUpgrader<'a> {
    pub fn new(http: &'a dyn HttpFetch, config: &'a CoreConfig, dry_run: bool) -> Result<Self> {
        let version_pattern = Regex::new(r#"\$wp_version\s*=\s*'([\d.]+[^']*)'"#)
            .map_err(|e| AppError::Internal(format!("Invalid version pattern: {}", e)))?;
        Ok(Self {
            http,
            config,
            version_pattern,
            dry_run,
        })
    }

    /// Directories in `core_dir` whose name starts with `wp`.
    pub fn find_installs(&self) -> Result<Vec<PathBuf>> {
        let mut installs = Vec::new();
        for entry in fs::read_dir(&self.config.core_dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(INSTALL_PREFIX) && path.is_dir() {
                installs.push(path);
            }
        }
        installs.sort();
        Ok(installs)
    }

    pub fn current_version(&self, install: &Path) -> Option<WpVersion> {
        let content = fs::read_to_string(install.join(VERSION_FILE)).ok()?;
        let caps = self.version_pattern.captures(&content)?;
        caps.get(1)?.as_str().parse().ok()
    }

    /// Published releases from the stable-check index, oldest first.
    pub fn fetch_releases(&self) -> Result<Vec<WpVersion>> {
        let body = self.http.get_text(&self.config.release_index_url)?;
        let index: BTreeMap<String, String> = serde_json::from_str(&body)
            .map_err(|e| AppError::Parse(format!("Invalid release index: {}", e)))?;

        let mut releases: Vec<WpVersion> = index
            .keys()
            .filter_map(|v| v.parse().ok())
            .collect();
        releases.sort();
        log::debug!("Release index lists {} versions", releases.len());
        Ok(releases)
    }

    /// Newest release of the current branch, or with `allow_major` the newest overall.
    pub fn select_release(&self, current: &WpVersion, releases: &[WpVersion]) -> Option<CoreRelease> {
        let newer = releases.iter().filter(|r| *r > current && !r.is_prerelease());

        if let Some(minor) = newer.clone().filter(|r| r.same_branch(current)).max() {
            return Some(CoreRelease { version: minor.clone(), minor: true });
        }

        if self.config.allow_major {
            return newer.max().map(|r| CoreRelease { version: r.clone(), minor: false });
        }
        None
    }

    /// Upgrade every install under `core_dir`, reloading PHP-FPM once if anything changed.
    pub fn upgrade_all(&self, system: Option<&SystemService>) -> Result<Vec<CoreReport>> {
        let installs = self.find_installs()?;
        log::info!("Found {} core installs in {}", installs.len(), self.config.core_dir.display());
        self.upgrade_installs(&installs, system)
    }

    pub fn upgrade_installs(&self, installs: &[PathBuf], system: Option<&SystemService>) -> Result<Vec<CoreReport>> {
        let releases = self.fetch_releases()?;
        let mut reports = Vec::new();

        for install in installs {
            log::info!("Checking for updating core {} ...", install.display());
            let outcome = match self.upgrade_install(install, &releases) {
                Ok(outcome) => outcome,
                Err(e) => CoreOutcome::Failed(e.to_string()),
            };
            let report = CoreReport { install: install.clone(), outcome };
            log::info!("{}", report);
            reports.push(report);
        }

        let upgraded = reports
            .iter()
            .any(|r| matches!(r.outcome, CoreOutcome::Upgraded { .. }));
        if upgraded {
            if let Some(service) = system {
                if let Err(e) = service.reload_if_active() {
                    log::error!("Failed to reload {}: {}", service.name(), e);
                }
            }
        }

        Ok(reports)
    }

    pub fn upgrade_install(&self, install: &Path, releases: &[WpVersion]) -> Result<CoreOutcome> {
        let current = match self.current_version(install) {
            Some(version) => version,
            None => return Ok(CoreOutcome::UnknownVersion),
        };
        log::info!("Current WP version: {}", current);

        let release = match self.select_release(&current, releases) {
            Some(release) => release,
            None => return Ok(CoreOutcome::UpToDate { version: current.to_string() }),
        };

        let core_dir = &self.config.core_dir;
        let target = core_dir.join(format!("{}{}", INSTALL_PREFIX, release.version.branch()));

        if !release.minor && target.exists() {
            return Ok(CoreOutcome::SkippedMajor {
                current: current.to_string(),
                release: release.version.to_string(),
                existing: target,
            });
        }
        if release.minor && target.exists() && !same_path(&target, install) {
            return Err(AppError::Internal(format!(
                "{} already exists and is not the install being upgraded",
                target.display()
            )));
        }

        if self.dry_run {
            return Ok(CoreOutcome::WouldUpgrade {
                from: current.to_string(),
                to: release.version.to_string(),
                target,
            });
        }

        let backup = self.install_release(install, &release, &target)?;
        Ok(CoreOutcome::Upgraded {
            from: current.to_string(),
            to: release.version.to_string(),
            target,
            backup,
        })
    }

    fn install_release(&self, install: &Path, release: &CoreRelease, target: &Path) -> Result<PathBuf> {
        let config = self.config;
        // Staging lives in core_dir so the final rename stays on one filesystem
        let staging = tempfile::Builder::new()
            .prefix(".wp-ops-upgrade-")
            .tempdir_in(&config.core_dir)?;

        let url = config.download_url.replace("{version}", &release.version.to_string());
        let tarball = staging.path().join("release.tar.gz");
        log::info!("Downloading release {} ...", url);
        {
            let mut file = fs::File::create(&tarball)?;
            self.http.download(&url, &mut file)?;
        }

        log::info!("Extracting ...");
        archive::extract_tar_gz(&tarball, staging.path())?;
        archive::remove_path(&tarball)?;
        let fresh = staging.path().join(TARBALL_ROOT);
        if !fresh.is_dir() {
            return Err(AppError::Archive(format!("{} has no {}/ directory", url, TARBALL_ROOT)));
        }

        for name in &config.preserve_files {
            log::info!("Copying {} ...", name);
            let from = install.join(name);
            fs::copy(&from, fresh.join(name)).map_err(|e| {
                AppError::FileSystem(std::io::Error::new(
                    e.kind(),
                    format!("Failed to copy {}: {}", from.display(), e),
                ))
            })?;
        }

        log::info!("Chown ...");
        archive::chown_recursive(&fresh, config.owner.as_deref(), config.group.as_deref())?;

        log::info!("Linking wp-content to {} ...", config.content_link);
        let content = fresh.join("wp-content");
        archive::remove_path(&content)?;
        std::os::unix::fs::symlink(&config.content_link, &content)?;

        let backup = self.backup_path(install)?;
        log::info!("Backup tar {} ...", backup.display());
        archive::create_tar_gz(install, &backup)?;

        // Major upgrades live next to the old branch
        if release.minor {
            log::info!("Remove dir {} ...", install.display());
            fs::remove_dir_all(install)?;
        }

        log::info!("Moving new release to {} ...", target.display());
        fs::rename(&fresh, target)?;

        Ok(backup)
    }

    fn backup_path(&self, install: &Path) -> Result<PathBuf> {
        let name = install
            .file_name()
            .ok_or_else(|| AppError::Internal(format!("Invalid install path {}", install.display())))?
            .to_string_lossy();
        let dir = self
            .config
            .backup_dir
            .clone()
            .unwrap_or_else(|| self.config.core_dir.clone());
        fs::create_dir_all(&dir)?;
        let date = chrono::Local::now().format("%Y-%m-%d");
        Ok(dir.join(format!("{}-{}.tar.gz", name, date)))
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::http::testing::StaticFetcher;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    const INDEX_URL: &str = "https://api.wordpress.org/core/stable-check/1.0/";

    fn test_config(core_dir: &Path) -> CoreConfig {
        CoreConfig {
            core_dir: core_dir.to_path_buf(),
            owner: None,
            group: None,
            php_fpm_service: None,
            ..CoreConfig::default()
        }
    }

    fn release_index() -> &'static str {
        r#"{"6.3.4":"insecure","6.4.3":"outdated","6.4.5":"outdated","6.5.5":"outdated","6.6.2":"latest"}"#
    }

    fn make_install(core_dir: &Path, name: &str, version: &str) -> PathBuf {
        let install = core_dir.join(name);
        fs::create_dir_all(install.join("wp-includes")).unwrap();
        fs::write(
            install.join(VERSION_FILE),
            format!("<?php\n$wp_version = '{}';\n$wp_db_version = 57155;\n", version),
        )
        .unwrap();
        fs::write(install.join(".htaccess"), "RewriteEngine On\n").unwrap();
        fs::write(install.join("wp-config.php"), "<?php define('DB_NAME', 'site');\n").unwrap();
        fs::write(install.join("robots.txt"), "User-agent: *\n").unwrap();
        std::os::unix::fs::symlink("../../wp-content/", install.join("wp-content")).unwrap();
        install
    }

    fn release_tarball(version: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut add = |path: &str, body: &str| {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).unwrap();
        };
        add("wordpress/index.php", "<?php\n");
        add("wordpress/wp-includes/version.php", &format!("<?php\n$wp_version = '{}';\n", version));
        add("wordpress/wp-content/index.php", "<?php\n");
        add("wordpress/wp-config-sample.php", "<?php\n");
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn v(s: &str) -> WpVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_select_release_prefers_branch() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let http = StaticFetcher::new();
        let upgrader = CoreUpgrader::new(&http, &config, false).unwrap();
        let releases = vec![v("6.4.3"), v("6.4.5"), v("6.5.5"), v("6.6.2"), v("6.7-RC1")];

        assert_eq!(
            upgrader.select_release(&v("6.4.3"), &releases),
            Some(CoreRelease { version: v("6.4.5"), minor: true })
        );
        assert_eq!(upgrader.select_release(&v("6.6.2"), &releases), None);
        assert_eq!(upgrader.select_release(&v("6.5.5"), &releases), None);
    }

    #[test]
    fn test_select_release_allows_major_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.allow_major = true;
        let http = StaticFetcher::new();
        let upgrader = CoreUpgrader::new(&http, &config, false).unwrap();
        let releases = vec![v("6.4.5"), v("6.5.5"), v("6.6.2")];

        assert_eq!(
            upgrader.select_release(&v("6.4.5"), &releases),
            Some(CoreRelease { version: v("6.6.2"), minor: false })
        );
    }

    #[test]
    fn test_current_version_and_install_discovery() {
        let dir = tempfile::tempdir().unwrap();
        make_install(dir.path(), "wp6.4", "6.4.3");
        fs::create_dir_all(dir.path().join("backups")).unwrap();
        fs::write(dir.path().join("wp-notes.txt"), "").unwrap();

        let config = test_config(dir.path());
        let http = StaticFetcher::new();
        let upgrader = CoreUpgrader::new(&http, &config, false).unwrap();

        let installs = upgrader.find_installs().unwrap();
        assert_eq!(installs, vec![dir.path().join("wp6.4")]);
        assert_eq!(upgrader.current_version(&installs[0]), Some(v("6.4.3")));
        assert_eq!(upgrader.current_version(&dir.path().join("backups")), None);
    }

    #[test]
    fn test_minor_upgrade_replaces_install() {
        let dir = tempfile::tempdir().unwrap();
        let install = make_install(dir.path(), "wp6.4", "6.4.3");
        let config = test_config(dir.path());
        let http = StaticFetcher::new()
            .with_body(INDEX_URL, release_index())
            .with_body("https://wordpress.org/wordpress-6.4.5.tar.gz", release_tarball("6.4.5"));
        let upgrader = CoreUpgrader::new(&http, &config, false).unwrap();

        let reports = upgrader.upgrade_all(None).unwrap();
        assert_eq!(reports.len(), 1);
        let backup = match &reports[0].outcome {
            CoreOutcome::Upgraded { from, to, target, backup } => {
                assert_eq!(from, "6.4.3");
                assert_eq!(to, "6.4.5");
                assert_eq!(target, &install);
                backup.clone()
            }
            other => panic!("expected upgrade, got {:?}", other),
        };

        assert_eq!(upgrader.current_version(&install), Some(v("6.4.5")));
        assert_eq!(
            fs::read_to_string(install.join("wp-config.php")).unwrap(),
            "<?php define('DB_NAME', 'site');\n"
        );
        assert!(install.join(".htaccess").is_file());
        assert!(install.join("robots.txt").is_file());
        assert_eq!(fs::read_link(install.join("wp-content")).unwrap(), Path::new("../../wp-content/"));
        assert!(backup.is_file());
        assert!(backup.starts_with(dir.path()));

        // Only the backup and the upgraded install remain
        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0], "wp6.4");
        assert!(left[1].starts_with("wp6.4-") && left[1].ends_with(".tar.gz"));
    }

    #[test]
    fn test_major_upgrade_skipped_when_branch_exists() {
        let dir = tempfile::tempdir().unwrap();
        let install = make_install(dir.path(), "wp6.5", "6.5.5");
        make_install(dir.path(), "wp6.6", "6.6.2");
        let mut config = test_config(dir.path());
        config.allow_major = true;
        let http = StaticFetcher::new().with_body(INDEX_URL, release_index());
        let upgrader = CoreUpgrader::new(&http, &config, false).unwrap();

        let releases = upgrader.fetch_releases().unwrap();
        assert_eq!(
            upgrader.upgrade_install(&install, &releases).unwrap(),
            CoreOutcome::SkippedMajor {
                current: "6.5.5".to_string(),
                release: "6.6.2".to_string(),
                existing: dir.path().join("wp6.6"),
            }
        );
    }

    #[test]
    fn test_missing_preserved_file_fails_and_keeps_install() {
        let dir = tempfile::tempdir().unwrap();
        let install = make_install(dir.path(), "wp6.4", "6.4.3");
        fs::remove_file(install.join("robots.txt")).unwrap();
        let config = test_config(dir.path());
        let http = StaticFetcher::new()
            .with_body(INDEX_URL, release_index())
            .with_body("https://wordpress.org/wordpress-6.4.5.tar.gz", release_tarball("6.4.5"));
        let upgrader = CoreUpgrader::new(&http, &config, false).unwrap();

        let reports = upgrader.upgrade_all(None).unwrap();
        match &reports[0].outcome {
            CoreOutcome::Failed(reason) => assert!(reason.contains("robots.txt")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(upgrader.current_version(&install), Some(v("6.4.3")));
        // staging directory was cleaned up
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_dry_run_and_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        make_install(dir.path(), "wp6.4", "6.4.3");
        fs::create_dir_all(dir.path().join("wp-broken")).unwrap();
        let config = test_config(dir.path());
        let http = StaticFetcher::new().with_body(INDEX_URL, release_index());
        let upgrader = CoreUpgrader::new(&http, &config, true).unwrap();

        let reports = upgrader.upgrade_all(None).unwrap();
        let outcomes: Vec<&CoreOutcome> = reports.iter().map(|r| &r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                &CoreOutcome::UnknownVersion,
                &CoreOutcome::WouldUpgrade {
                    from: "6.4.3".to_string(),
                    to: "6.4.5".to_string(),
                    target: dir.path().join("wp6.4"),
                },
            ]
        );
        assert!(!http.requests.borrow().iter().any(|url| url.ends_with(".tar.gz")));
    }
}
