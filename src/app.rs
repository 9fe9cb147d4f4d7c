use std::path::{Path, PathBuf};

use clap::Subcommand;

use crate::config::AppConfig;
use crate::services::access_log;
use crate::services::core_upgrader::{CoreOutcome, CoreUpgrader};
use crate::services::fail2ban_client::Fail2banClient;
use crate::services::http::UreqFetcher;
use crate::services::item_updater::{ItemKind, ItemOutcome, ItemSource, ItemUpdater, PluginSource, ThemeSource};
use crate::services::system_service::SystemService;
use crate::services::whitelist::WhitelistSync;
use crate::utils::errors::Result;
use crate::utils::privileges;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export an Apache access log to CSV and print the row count
    AccessLog {
        /// Access log to read (plain or .gz)
        file: PathBuf,
        /// CSV output path (default: <file>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Update plugins and themes from wordpress.org
    UpdateItems {
        /// Only update one kind of item
        #[arg(short, long, value_enum)]
        kind: Option<ItemKind>,
    },
    /// Upgrade WordPress core installs to the latest release of their branch
    UpgradeCore {
        /// Upgrade a single install instead of every wp* directory in core_dir
        install: Option<PathBuf>,
    },
    /// Refresh fail2ban whitelists from published IP ranges
    Whitelist {
        /// Only sync the named source(s)
        #[arg(short, long = "source")]
        sources: Vec<String>,
    },
}

/// Counts of what a job did, used for the exit status.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct JobSummary {
    pub changed: usize,
    pub failed: usize,
}

pub struct App {
    config: AppConfig,
    dry_run: bool,
}

impl App {
    pub fn new(config_path: Option<&Path>, dry_run: bool) -> Result<Self> {
        let config = AppConfig::load(config_path)?;
        Ok(Self { config, dry_run })
    }

    pub fn with_config(config: AppConfig, dry_run: bool) -> Self {
        Self { config, dry_run }
    }

    pub fn run(&self, command: &Command) -> Result<JobSummary> {
        match command {
            Command::AccessLog { file, output } => self.export_access_log(file, output.as_deref()),
            Command::UpdateItems { kind } => self.update_items(*kind),
            Command::UpgradeCore { install } => {
                if !self.dry_run {
                    privileges::require_root("upgrade-core")?;
                }
                self.upgrade_core(install.as_deref())
            }
            Command::Whitelist { sources } => {
                if !self.dry_run {
                    privileges::require_root("whitelist")?;
                }
                self.sync_whitelist(sources)
            }
        }
    }

    fn export_access_log(&self, file: &Path, output: Option<&Path>) -> Result<JobSummary> {
        let count = access_log::export_file(file, output)?;
        println!("{}", count);
        Ok(JobSummary { changed: count, failed: 0 })
    }

    fn update_items(&self, kind: Option<ItemKind>) -> Result<JobSummary> {
        let http = UreqFetcher::new(&self.config.http);
        let updater = ItemUpdater::new(&http, &self.config.items, self.dry_run);

        let plugins = PluginSource::new(&self.config.items);
        let themes = ThemeSource::new(&self.config.items);
        let sources: Vec<&dyn ItemSource> = match kind {
            Some(ItemKind::Plugin) => vec![&plugins],
            Some(ItemKind::Theme) => vec![&themes],
            None => vec![&plugins, &themes],
        };

        let mut summary = JobSummary::default();
        for source in sources {
            println!("🔄 Updating {}s...", source.kind());
            for report in updater.update(source)? {
                println!("{}", report);
                match report.outcome {
                    ItemOutcome::Updated { .. } | ItemOutcome::WouldUpdate { .. } => summary.changed += 1,
                    ItemOutcome::Failed(_) => summary.failed += 1,
                    _ => {}
                }
            }
        }
        Ok(summary)
    }

    fn upgrade_core(&self, install: Option<&Path>) -> Result<JobSummary> {
        let http = UreqFetcher::new(&self.config.http);
        let upgrader = CoreUpgrader::new(&http, &self.config.core, self.dry_run)?;
        let service = match (&self.config.core.php_fpm_service, self.dry_run) {
            (Some(name), false) => Some(SystemService::new(name)),
            _ => None,
        };

        let reports = match install {
            Some(path) => upgrader.upgrade_installs(&[path.to_path_buf()], service.as_ref())?,
            None => upgrader.upgrade_all(service.as_ref())?,
        };

        let mut summary = JobSummary::default();
        for report in &reports {
            println!("{}", report);
            println!("-----------------------------------");
            match report.outcome {
                CoreOutcome::Upgraded { .. } | CoreOutcome::WouldUpgrade { .. } => summary.changed += 1,
                CoreOutcome::Failed(_) => summary.failed += 1,
                _ => {}
            }
        }
        Ok(summary)
    }

    fn sync_whitelist(&self, sources: &[String]) -> Result<JobSummary> {
        let http = UreqFetcher::new(&self.config.http);
        let client = Fail2banClient::new();
        let sync = WhitelistSync::new(&http, &client, &self.config.whitelist, self.dry_run);

        let mut summary = JobSummary::default();
        for report in sync.run(sources)? {
            println!("{}", report);
            summary.changed += report.added;
            summary.failed += report.failed + usize::from(report.error.is_some());
        }
        Ok(summary)
    }
}
