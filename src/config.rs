use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::utils::errors::{ConfigError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wp-ops/config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub items: ItemsConfig,
    pub core: CoreConfig,
    pub whitelist: WhitelistConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Mozilla/5.0 (compatible; wp-ops/{})", env!("CARGO_PKG_VERSION")),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ItemsConfig {
    pub plugin_dir: PathBuf,
    pub theme_dir: PathBuf,
    pub excluded_plugins: Vec<String>,
    pub excluded_themes: Vec<String>,
    pub plugin_info_url: String,
    pub theme_info_url: String,
    /// Pause after each directory lookup.
    pub lookup_delay_ms: u64,
    /// Pause before each download.
    pub download_delay_ms: u64,
}

impl Default for ItemsConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("/home/lamp/wordpress/plugins"),
            theme_dir: PathBuf::from("/home/lamp/wordpress/themes"),
            excluded_plugins: Vec::new(),
            excluded_themes: Vec::new(),
            plugin_info_url: "https://api.wordpress.org/plugins/info/1.0/{slug}.json".to_string(),
            theme_info_url: "https://api.wordpress.org/themes/info/1.2/?action=theme_information&request[slug]={slug}".to_string(),
            lookup_delay_ms: 4000,
            download_delay_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub core_dir: PathBuf,
    pub release_index_url: String,
    pub download_url: String,
    pub preserve_files: Vec<String>,
    pub content_link: String,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub allow_major: bool,
    pub php_fpm_service: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            core_dir: PathBuf::from("/home/lamp/wordpress/core"),
            release_index_url: "https://api.wordpress.org/core/stable-check/1.0/".to_string(),
            download_url: "https://wordpress.org/wordpress-{version}.tar.gz".to_string(),
            preserve_files: vec![
                ".htaccess".to_string(),
                "wp-config.php".to_string(),
                "robots.txt".to_string(),
            ],
            content_link: "../../wp-content/".to_string(),
            owner: Some("root".to_string()),
            group: Some("root".to_string()),
            backup_dir: None,
            allow_major: false,
            php_fpm_service: Some("php8.3-fpm".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// JSON array of address strings.
    Plain,
    /// AWS ip-ranges.json document.
    Aws,
    /// One address per line, `#` comments.
    Text,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhitelistSource {
    pub name: String,
    pub url: String,
    pub jail: String,
    pub format: SourceFormat,
    /// AWS service names to keep; ignored by other formats.
    #[serde(default = "default_aws_services")]
    pub services: Vec<String>,
    #[serde(default)]
    pub include_ipv6: bool,
}

fn default_aws_services() -> Vec<String> {
    vec!["CLOUDFRONT_ORIGIN_FACING".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhitelistConfig {
    pub sources: Vec<WhitelistSource>,
    pub reload: bool,
    pub persist_dir: Option<PathBuf>,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                WhitelistSource {
                    name: "jetpack".to_string(),
                    url: "https://jetpack.com/ips-v4.json".to_string(),
                    jail: "wpxmlrpc".to_string(),
                    format: SourceFormat::Plain,
                    services: default_aws_services(),
                    include_ipv6: false,
                },
                WhitelistSource {
                    name: "cloudfront".to_string(),
                    url: "https://ip-ranges.amazonaws.com/ip-ranges.json".to_string(),
                    jail: "cloudfront".to_string(),
                    format: SourceFormat::Aws,
                    services: default_aws_services(),
                    include_ipv6: false,
                },
            ],
            reload: true,
            persist_dir: None,
        }
    }
}

impl AppConfig {
    /// Load from an explicit path, else the system path if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let system = Path::new(DEFAULT_CONFIG_PATH);
                if system.exists() {
                    Self::from_file(system)?
                } else {
                    log::debug!("No config file at {}, using defaults", DEFAULT_CONFIG_PATH);
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidFile(format!("{}: {}", path.display(), e))
        })?;
        log::info!("Loaded configuration from {} ({} bytes)", path.display(), content.len());
        Self::from_toml(&content)
            .map_err(|e| ConfigError::InvalidFile(format!("{}: {}", path.display(), e)).into())
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        require_placeholder("items.plugin_info_url", &self.items.plugin_info_url, "{slug}")?;
        require_placeholder("items.theme_info_url", &self.items.theme_info_url, "{slug}")?;
        require_placeholder("core.download_url", &self.core.download_url, "{version}")?;
        require_non_empty("core.release_index_url", &self.core.release_index_url)?;

        for source in &self.whitelist.sources {
            require_non_empty("whitelist.sources.name", &source.name)?;
            require_non_empty(&format!("whitelist.sources[{}].url", source.name), &source.url)?;
            require_non_empty(&format!("whitelist.sources[{}].jail", source.name), &source.jail)?;
        }

        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
        .into());
    }
    Ok(())
}

fn require_placeholder(field: &str, value: &str, placeholder: &str) -> Result<()> {
    require_non_empty(field, value)?;
    if !value.contains(placeholder) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: format!("{} (missing {})", value, placeholder),
        }
        .into());
    }
    Ok(())
}
