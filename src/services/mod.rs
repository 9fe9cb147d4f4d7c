pub mod access_log;
pub mod archive;
pub mod core_upgrader;
pub mod fail2ban_client;
pub mod http;
pub mod item_updater;
pub mod system_service;
pub mod whitelist;
