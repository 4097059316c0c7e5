//! `ironloop onboard` — First-time setup.

use ironloop_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Ironloop — First-Time Setup");
    println!("===========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    } else {
        println!("Config directory exists: {}", config_dir.display());
    }

    if !config_path.exists() {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("Created default config: {}", config_path.display());
    } else {
        println!("Config file exists: {}", config_path.display());
    }

    println!();
    println!("Next steps:");
    println!("  1. Set an API key:  export OPENROUTER_API_KEY=sk-or-v1-...");
    println!("  2. Try a run:       ironloop run \"list the files here\"");

    Ok(())
}
