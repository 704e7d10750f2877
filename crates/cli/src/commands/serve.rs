//! `deepsearch serve`: start the HTTP gateway.

use std::path::Path;

use deepsearch_config::AppConfig;

pub async fn run(config_path: &Path, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        AppConfig::load_from(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("DeepSearch gateway");
    println!("   Listening:   http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:       {}", config.agent.model);
    println!("   Daily limit: {} request(s) per user", config.quota.daily_limit);

    deepsearch_gateway::start(config).await?;

    Ok(())
}
