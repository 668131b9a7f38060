use crate::cli::ConfigAction;
use mirrorfs::config::{get_config_path, load_config, save_config, Config, ProfileConfig};
use mirrorfs::error::Result;

pub fn handle_config_command(action: Option<ConfigAction>) -> Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            let config_path = get_config_path()?;
            println!("Config location: {}", config_path.display());
        }
        None | Some(ConfigAction::Show) => {
            let config_path = get_config_path()?;
            let config = load_config()?;
            println!("Config file: {}", config_path.display());
            if !config_path.exists() {
                println!("  (not created yet, showing defaults)");
            }
            println!();
            println!("Current configuration:");
            println!("  Notifier:");
            println!("    delay_ms: {}", config.notifier.get_delay_ms());
            println!("  Profiles:");
            if config.profiles.is_empty() {
                println!("    (none)");
            }
            for profile in &config.profiles {
                println!("    {}:", profile.name);
                println!(
                    "      root: {}",
                    profile.root.as_deref().unwrap_or("(not set)")
                );
                if let Some(encoding) = &profile.encoding {
                    println!("      encoding: {}", encoding);
                }
                if let Some(timeout) = profile.response_timeout_secs {
                    println!("      response_timeout_secs: {}", timeout);
                }
            }
        }
        Some(ConfigAction::Init) => {
            let config_path = get_config_path()?;
            if config_path.exists() {
                println!("Config already exists at {}", config_path.display());
                return Ok(());
            }

            let config = Config {
                profiles: vec![ProfileConfig {
                    name: "local".to_string(),
                    root: Some("~/mirrorfs/local".to_string()),
                    encoding: None,
                    response_timeout_secs: None,
                }],
                ..Default::default()
            };
            save_config(&config, &config_path)?;
            println!("Created default config at {}", config_path.display());
        }
    }
    Ok(())
}
