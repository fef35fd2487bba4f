use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use crate::persistence::SnapshotStore;
use crate::utils::NumberFormatOptions;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub runtime: RuntimeConfig,
    pub formatting: FormattingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DataConfig {
    /// Root holding one directory per character
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chats_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
    /// Only count messages sent under the character's own name
    pub strict_character_match: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    pub save_debounce_secs: u64,
    pub log_filter: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FormattingConfig {
    pub number_comma: bool,
    pub number_human: bool,
    pub locale: String,
    pub decimal_places: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            save_debounce_secs: 5,
            log_filter: "warn".to_string(),
        }
    }
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            number_comma: true,
            number_human: false,
            locale: "en".to_string(),
            decimal_places: 2,
        }
    }
}

impl FormattingConfig {
    pub fn number_options(&self) -> NumberFormatOptions {
        NumberFormatOptions {
            use_comma: self.number_comma,
            use_human: self.number_human,
            locale: self.locale.clone(),
            decimal_places: self.decimal_places,
        }
    }
}

thread_local! {
    static TEST_CONFIG_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

#[cfg(test)]
pub fn set_test_config_path(path: PathBuf) {
    TEST_CONFIG_PATH.with(|p| *p.borrow_mut() = Some(path));
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        #[cfg(test)]
        {
            if let Some(path) = TEST_CONFIG_PATH.with(|p| p.borrow().clone()) {
                return Ok(path);
            }
        }

        Ok(dirs::home_dir()
            .context("Could not find home directory")?
            .join(".chatstats.toml"))
    }

    pub fn load() -> Result<Option<Config>> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Some(config))
    }

    pub fn save(&self, silent: bool) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content).context("Failed to write config file")?;

        if !silent {
            println!("✅ Configuration saved to: {}", config_path.display());
        }

        Ok(())
    }

    /// Chat directory, defaulting to `~/.chatstats/chats`.
    pub fn chats_dir(&self) -> Result<PathBuf> {
        match &self.data.chats_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::home_dir()
                .context("Could not find home directory")?
                .join(".chatstats")
                .join("chats")),
        }
    }

    pub fn snapshot_path(&self) -> Result<PathBuf> {
        match &self.data.snapshot_path {
            Some(path) => Ok(path.clone()),
            None => SnapshotStore::default_path(),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .context("Invalid boolean value. Use 'true' or 'false'")
}

// CLI helper functions
pub fn create_default_config(overwrite: bool) -> Result<()> {
    let config = Config::default();
    if !std::fs::exists(Config::config_path()?)? || overwrite {
        config.save(true)?;

        println!("📝 Created default configuration file.");
        println!("📍 Point it at your chat directory:");
        println!("   chatstats config set chats-dir ...");
        println!("or");
        println!("   {}", Config::config_path()?.display());
    } else {
        println!("Configuration already exists.  Pass `--overwrite` to overwrite.");
    }

    Ok(())
}

pub fn show_config() -> Result<()> {
    match Config::load()? {
        Some(config) => {
            let unset = |path: &Option<PathBuf>| {
                path.as_ref()
                    .map_or_else(|| "Default".to_string(), |p| p.display().to_string())
            };
            println!("🔧 Current configuration:");
            println!("   Chats Dir: {}", unset(&config.data.chats_dir));
            println!("   Snapshot Path: {}", unset(&config.data.snapshot_path));
            println!(
                "   Strict Character Match: {}",
                config.data.strict_character_match
            );
            println!(
                "   Save Debounce: {}s",
                config.runtime.save_debounce_secs
            );
            println!("   Log Filter: {}", config.runtime.log_filter);
            println!("   Number Comma: {}", config.formatting.number_comma);
            println!("   Number Human: {}", config.formatting.number_human);
            println!("   Locale: {}", config.formatting.locale);
            println!("   Decimal Places: {}", config.formatting.decimal_places);
        }
        None => {
            println!("❌ No configuration file found.");
            println!("   Run 'chatstats config init' to create one.");
        }
    }
    Ok(())
}

pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?.unwrap_or_default();

    match key {
        "chats-dir" => config.data.chats_dir = Some(PathBuf::from(value)),
        "snapshot-path" => config.data.snapshot_path = Some(PathBuf::from(value)),
        "strict-character-match" => config.data.strict_character_match = parse_bool(value)?,
        "save-debounce-secs" => {
            config.runtime.save_debounce_secs =
                value.parse::<u64>().context("Invalid number value")?;
        }
        "log-filter" => config.runtime.log_filter = value.to_string(),
        "number-comma" => config.formatting.number_comma = parse_bool(value)?,
        "number-human" => config.formatting.number_human = parse_bool(value)?,
        "locale" => {
            config.formatting.locale = value.to_string();
        }
        "decimal-places" => {
            let places = value.parse::<usize>().context("Invalid number value")?;
            config.formatting.decimal_places = places;
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }

    config.save(false)?;
    Ok(())
}
