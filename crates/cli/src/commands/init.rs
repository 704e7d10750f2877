//! `deepsearch init`: write a default config file.

use std::path::Path;

use deepsearch_config::AppConfig;

pub fn run(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !force {
        println!("Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.");
        return Ok(());
    }

    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(config_path, AppConfig::default_toml())?;

    println!("Created {}", config_path.display());
    println!("\nNext steps:");
    println!("   1. Set DEEPSEARCH_API_KEY and SERPER_API_KEY (or edit the file)");
    println!("   2. Add [[users]] and [[sessions]] entries");
    println!("   3. Run: deepsearch serve");
    Ok(())
}
