use std::path::Path;
use std::time::Duration;

use txcoord_coordinator::CoordinatorConfig;

use crate::error::Result;

pub(crate) fn run(path: &Path) -> Result<()> {
    let config = CoordinatorConfig::load(path)?;

    println!("Configuration OK: {}", path.display());
    print_config(&config);

    Ok(())
}

fn millis(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

fn print_config(config: &CoordinatorConfig) {
    println!("  default timeout: {}", millis(config.default_timeout()));
    println!("  default max retries: {}", config.default_max_retries());
    println!("  shutdown timeout: {}", millis(config.shutdown_timeout()));
    println!("  event capacity: {}", config.event_capacity());
    println!();

    if config.participants().is_empty() {
        println!("No participants declared.");
        return;
    }

    println!("Participants:");
    for entry in config.participants() {
        let timeout = entry
            .config
            .timeout
            .map_or_else(|| "default".to_string(), millis);
        let retries = entry
            .config
            .max_retries
            .map_or_else(|| "default".to_string(), |r| r.to_string());
        println!(
            "  {} -> {} (timeout {timeout}, retries {retries})",
            entry.id, entry.config.endpoint
        );
    }
}
