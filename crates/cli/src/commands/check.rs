//! `deepsearch check`: validate configuration.

use std::path::Path;

use deepsearch_config::{AppConfig, StoreBackend};

pub fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("DeepSearch configuration check");
    println!("==============================\n");

    if config_path.exists() {
        println!("  Config file:    {}", config_path.display());
    } else {
        println!("  Config file:    none at {} (using defaults)", config_path.display());
    }

    let config = match AppConfig::load_from(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("  Invalid: {e}");
            return Err(e.into());
        }
    };

    let mut issues = 0;
    println!("  Gateway:        {}:{} ({:?})", config.gateway.host, config.gateway.port, config.gateway.stream_format);
    println!("  Model:          {} via {}", config.agent.model, config.provider.api_url);
    println!("  Max steps:      {}", config.agent.max_steps);
    println!("  Daily limit:    {}", config.quota.daily_limit);
    match config.store.backend {
        StoreBackend::Sqlite => println!("  Store:          sqlite at {}", config.store.path),
        StoreBackend::Memory => println!("  Store:          in-memory (quota resets on restart)"),
    }
    println!(
        "  Users:          {} ({} admin)",
        config.users.len(),
        config.users.iter().filter(|u| u.is_admin).count()
    );
    println!("  Sessions:       {}", config.sessions.len());

    if config.provider.api_key.is_none() {
        println!("  Missing model API key: set DEEPSEARCH_API_KEY or provider.api_key");
        issues += 1;
    }
    if config.search.api_key.is_none() {
        println!("  Missing search API key: set SERPER_API_KEY or search.api_key");
        issues += 1;
    }
    for session in &config.sessions {
        if !config.users.iter().any(|u| u.id == session.user_id) {
            println!("  Session for '{}' has no matching [[users]] entry", session.user_id);
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
        Ok(())
    } else {
        Err(format!("{issues} issue(s) found").into())
    }
}
