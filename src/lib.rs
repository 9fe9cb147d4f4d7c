//! Batch jobs for running a shared WordPress host.
//!
//! - [`services::access_log`]: Apache access log → CSV
//! - [`services::item_updater`]: plugin/theme updates from wordpress.org
//! - [`services::core_upgrader`]: WordPress core minor upgrades
//! - [`services::whitelist`]: fail2ban whitelists from published IP ranges

pub mod app;
pub mod config;
pub mod services;
pub mod utils;
