use wp_ops::config::AppConfig;
use wp_ops::services::fail2ban_client::Fail2banClient;
use wp_ops::services::http::{HttpFetch, UreqFetcher};
use wp_ops::services::whitelist::{is_valid_prefix, parse_source};

fn main() {
    env_logger::init();

    println!("Testing wp-ops whitelist sources against the live fail2ban...");

    let config = AppConfig::default();
    let http = UreqFetcher::new(&config.http);
    let client = Fail2banClient::new();

    match client.ping() {
        Ok(true) => println!("✓ fail2ban server answers ping"),
        Ok(false) => println!("⚠ fail2ban-client ran but did not answer pong"),
        Err(e) => {
            println!("✗ Failed to reach fail2ban: {}", e);
            return;
        }
    }

    let jails = match client.get_jails() {
        Ok(jails) => {
            println!("✓ Found jails: {:?}", jails);
            jails
        }
        Err(e) => {
            println!("✗ Failed to get jails: {}", e);
            return;
        }
    };

    // Read-only: fetch each source and compare with the jail's ignore list
    for source in &config.whitelist.sources {
        println!("\nSource '{}' → jail '{}'", source.name, source.jail);

        if !jails.contains(&source.jail) {
            println!("⚠ Jail {} is not running", source.jail);
        }

        let entries = match http.get_text(&source.url).and_then(|body| parse_source(source, &body)) {
            Ok(entries) => entries,
            Err(e) => {
                println!("✗ Failed to load {}: {}", source.url, e);
                continue;
            }
        };
        let invalid = entries.iter().filter(|e| !is_valid_prefix(e)).count();
        println!("✓ {} entries listed ({} invalid)", entries.len(), invalid);

        match client.get_ignore_ips(&source.jail) {
            Ok(ignored) => {
                let missing = entries.iter().filter(|e| !ignored.contains(e)).count();
                println!("✓ {} currently ignored, {} still to whitelist", ignored.len(), missing);
            }
            Err(e) => println!("✗ Failed to read ignore list: {}", e),
        }
    }

    println!("\nWhitelist test complete!");
}
