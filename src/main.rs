use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use persistence::SnapshotStore;
use source::DirectoryChatSource;
use stats::{CharacterStats, ChatStats, StatsCollection};
use utils::{NumberFormatOptions, format_date_for_display, format_duration_ms, format_number};

mod config;
mod error;
mod persistence;
mod source;
mod stats;
mod types;
mod utils;
mod watcher;

/// Environment variable holding a tracing filter, e.g. `chatstats=debug`
const LOG_ENV: &str = "CHATSTATS_LOG";

#[derive(Parser)]
#[command(name = "chatstats")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output stats as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Pretty-print JSON instead of a single line
    #[arg(long, global = true)]
    pretty: bool,

    /// Directory holding one sub-directory of chats per character
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Stats snapshot file
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Use human-readable number formatting (k, m, b, t)
    #[arg(short = 'H', long, global = true)]
    number_human: bool,

    /// Locale for number formatting (en, de, fr, es, it, ja, ko, zh)
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Number of decimal places for human-readable formatting
    #[arg(long, global = true)]
    decimal_places: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show statistics across every character (default)
    Global,
    /// Show statistics for one character
    Character {
        /// Character key (directory name)
        key: String,
    },
    /// Show statistics for one chat
    Chat {
        /// Character key (directory name)
        key: String,
        /// Chat name (file name without extension)
        chat: String,
    },
    /// Show global statistics and every character
    All,
    /// Rebuild statistics from the chat files
    Recreate {
        /// Only rebuild this character
        #[arg(long)]
        character: Option<String>,
    },
    /// Keep statistics current while chat files change
    Watch,
    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    subcommand: ConfigSubcommands,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Create default configuration file
    Init {
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Show current configuration
    Show,
    /// Set configuration value
    Set {
        /// Configuration key (chats-dir, snapshot-path, strict-character-match, save-debounce-secs, log-filter, number-comma, number-human, locale, decimal-places)
        key: String,
        /// Configuration value
        value: String,
    },
}

/// Everything a command needs, resolved from CLI flags over the config file.
struct Settings {
    source: DirectoryChatSource,
    store: SnapshotStore,
    format: NumberFormatOptions,
    save_debounce: Duration,
    json: Option<JsonStyle>,
}

#[derive(Clone, Copy)]
enum JsonStyle {
    Compact,
    Pretty,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load config file to get defaults
    let config = config::Config::load().unwrap_or(None).unwrap_or_default();

    init_logging(&config.runtime.log_filter);

    let command = match cli.command.unwrap_or(Commands::Global) {
        Commands::Config(config_args) => {
            handle_config_subcommand(config_args);
            return;
        }
        command => command,
    };

    let settings = match resolve_settings(
        &config,
        cli.data_dir,
        cli.snapshot,
        number_options(&config, cli.number_human, cli.locale, cli.decimal_places),
        match (cli.json, cli.pretty) {
            (_, true) => Some(JsonStyle::Pretty),
            (true, false) => Some(JsonStyle::Compact),
            (false, false) => None,
        },
    ) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Config error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run_command(command, settings).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config formatting with the CLI flags applied on top.
fn number_options(
    config: &config::Config,
    number_human: bool,
    locale: Option<String>,
    decimal_places: Option<usize>,
) -> NumberFormatOptions {
    let mut options = config.formatting.number_options();
    options.use_human |= number_human;
    if let Some(locale) = locale {
        options.locale = locale;
    }
    if let Some(places) = decimal_places {
        options.decimal_places = places;
    }
    options
}

fn resolve_settings(
    config: &config::Config,
    data_dir: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    format: NumberFormatOptions,
    json: Option<JsonStyle>,
) -> Result<Settings> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => config.chats_dir()?,
    };
    let snapshot = match snapshot {
        Some(path) => path,
        None => config.snapshot_path()?,
    };

    Ok(Settings {
        source: DirectoryChatSource::new(data_dir)
            .with_character_name_matching(config.data.strict_character_match),
        store: SnapshotStore::new(snapshot),
        format,
        save_debounce: Duration::from_secs(config.runtime.save_debounce_secs),
        json,
    })
}

async fn run_command(command: Commands, settings: Settings) -> Result<()> {
    match command {
        Commands::Global => {
            let stats = load_stats(&settings)?;
            output_character(&settings, stats.global(), stats.characters.len())
        }
        Commands::Character { key } => {
            let stats = load_stats(&settings)?;
            let character = stats
                .character(&key)
                .with_context(|| format!("No statistics for character '{key}'"))?;
            output_character(&settings, character, 1)
        }
        Commands::Chat { key, chat } => {
            let stats = load_stats(&settings)?;
            let chat_stats = stats
                .chat(&key, &chat)
                .with_context(|| format!("No statistics for chat '{chat}' of '{key}'"))?;
            output_chat(&settings, chat_stats)
        }
        Commands::All => {
            let stats = load_stats(&settings)?;
            output_all(&settings, stats.all())
        }
        Commands::Recreate { character } => run_recreate(&settings, character.as_deref()),
        Commands::Watch => run_watch(settings).await,
        Commands::Config(config_args) => {
            handle_config_subcommand(config_args);
            Ok(())
        }
    }
}

/// Snapshot when usable, full rebuild otherwise.
fn load_stats(settings: &Settings) -> Result<StatsCollection> {
    if let Some(stats) = settings
        .store
        .load()
        .context("Failed to load stats snapshot")?
    {
        return Ok(stats);
    }

    info!(
        data_dir = %settings.source.root().display(),
        snapshot = %settings.store.path().display(),
        "no usable snapshot, rebuilding"
    );
    let mut stats = StatsCollection::new();
    stats
        .recreate_stats(&settings.source)
        .context("Failed to rebuild stats")?;
    save_stats(settings, &stats);
    Ok(stats)
}

/// In-memory stats stay authoritative when the snapshot cannot be written.
fn save_stats(settings: &Settings, stats: &StatsCollection) {
    if let Err(e) = settings.store.save(stats) {
        error!("Failed to save stats snapshot: {e}");
    }
}

fn run_recreate(settings: &Settings, character: Option<&str>) -> Result<()> {
    let Some(key) = character else {
        let mut stats = StatsCollection::new();
        stats
            .recreate_stats(&settings.source)
            .context("Failed to rebuild stats")?;
        save_stats(settings, &stats);
        return output_character(settings, stats.global(), stats.characters.len());
    };

    let mut stats = load_stats(settings)?;
    let rebuilt = stats
        .recreate_character_stats(&settings.source, key)
        .with_context(|| format!("Failed to rebuild character '{key}'"))?
        .cloned();
    save_stats(settings, &stats);

    match rebuilt {
        Some(character) => output_character(settings, &character, 1),
        None => {
            if settings.json.is_none() {
                println!("No chats found for character '{key}'.");
            }
            Ok(())
        }
    }
}

async fn run_watch(settings: Settings) -> Result<()> {
    let file_watcher = watcher::FileWatcher::new(&settings.source)
        .context("Error setting up file watcher")?;
    let mut manager = watcher::StatsManager::load_or_rebuild(
        settings.source.clone(),
        settings.store.clone(),
        settings.save_debounce,
    )?;

    if settings.json.is_none() {
        println!(
            "👀 Watching {} (Ctrl-C to stop)",
            settings.source.root().display()
        );
    }

    manager
        .run(&file_watcher, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = manager.stats();
    let stats = stats.read();
    output_character(&settings, stats.global(), stats.characters.len())
}

// --- Output ---

fn print_json<T: Serialize>(value: &T, style: JsonStyle) -> Result<()> {
    let json = match style {
        JsonStyle::Pretty => simd_json::to_string_pretty(value)?,
        JsonStyle::Compact => simd_json::to_string(value)?,
    };
    println!("{json}");
    Ok(())
}

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {label:<18}{value}");
}

fn output_character(settings: &Settings, stats: &CharacterStats, characters: usize) -> Result<()> {
    if let Some(style) = settings.json {
        return print_json(stats, style);
    }
    print_character(stats, characters, &settings.format);
    Ok(())
}

fn output_chat(settings: &Settings, chat: &ChatStats) -> Result<()> {
    if let Some(style) = settings.json {
        return print_json(chat, style);
    }
    print_chat(chat, &settings.format);
    Ok(())
}

fn output_all(settings: &Settings, stats: &StatsCollection) -> Result<()> {
    if let Some(style) = settings.json {
        return print_json(stats, style);
    }
    print_character(stats.global(), stats.characters.len(), &settings.format);
    for character in stats.characters.values() {
        println!();
        print_character(character, 1, &settings.format);
    }
    Ok(())
}

fn count(total: f64, options: &NumberFormatOptions) -> String {
    format_number(total.max(0.0).round() as u64, options)
}

fn print_character(stats: &CharacterStats, characters: usize, options: &NumberFormatOptions) {
    let per_chat = &stats.per_chat;
    let per_message = &stats.per_message;

    println!("📊 {}", stats.name);
    if characters > 1 {
        row("Characters", format_number(characters as u64, options));
    }
    row("Chats", format_number(stats.chats, options));
    row(
        "Messages",
        format!(
            "{} (user {}, character {}, system {})",
            count(per_chat.messages.total, options),
            count(per_chat.user_messages.total, options),
            count(per_chat.char_messages.total, options),
            count(per_chat.system_messages.total, options),
        ),
    );
    row(
        "Words",
        format!(
            "{} (user {}, character {})",
            count(per_message.words.total, options),
            count(per_message.user_words.total, options),
            count(per_message.char_words.total, options),
        ),
    );
    row(
        "Generation",
        format!(
            "{} over {} replies, {} tokens",
            format_duration_ms(per_message.gen_time.total),
            format_number(per_message.gen_time.count, options),
            count(per_message.gen_token_count.total, options),
        ),
    );
    row("Swipes", count(per_message.swipes.total, options));
    row(
        "Avg response",
        format_duration_ms(per_message.user_response_time.avg),
    );
    row("Chatting time", format_duration_ms(per_chat.chatting_time.total));
    row("Chat size", format!("{} bytes", format_number(stats.chat_size, options)));
    row("First chat", format_date_for_display(stats.first_create_date));
    row("Last active", format_date_for_display(stats.last_interaction_date));
    print_models(&stats.model_usage, options);
}

fn print_chat(chat: &ChatStats, options: &NumberFormatOptions) {
    let per_message = &chat.per_message;

    println!("💬 {} / {}", chat.character, chat.chat_name);
    row(
        "Messages",
        format!(
            "{} (user {}, character {}, system {})",
            format_number(chat.messages, options),
            format_number(chat.user_messages, options),
            format_number(chat.char_messages, options),
            format_number(chat.system_messages, options),
        ),
    );
    row(
        "Words",
        format!(
            "{} (user {}, character {})",
            count(per_message.words.total, options),
            count(per_message.user_words.total, options),
            count(per_message.char_words.total, options),
        ),
    );
    row(
        "Generation",
        format!(
            "{} over {} replies, {} tokens",
            format_duration_ms(per_message.gen_time.total),
            format_number(per_message.gen_time.count, options),
            count(per_message.gen_token_count.total, options),
        ),
    );
    row("Swipes", count(per_message.swipes.total, options));
    row(
        "Avg response",
        format_duration_ms(per_message.user_response_time.avg),
    );
    row(
        "Chatting time",
        chat.chatting_time
            .map_or_else(|| "-".to_string(), format_duration_ms),
    );
    row("Chat size", format!("{} bytes", format_number(chat.chat_size, options)));
    row("Created", format_date_for_display(chat.create_date));
    row("Last active", format_date_for_display(chat.last_interaction_date));
    print_models(&chat.model_usage, options);
}

fn print_models(models: &stats::ModelUsageMap, options: &NumberFormatOptions) {
    if models.is_empty() {
        return;
    }
    println!("  Models");
    for (model, usage) in models.iter() {
        println!(
            "    {model:<16}{} replies, {} tokens",
            format_number(usage.count, options),
            format_number(usage.tokens, options)
        );
    }
}

fn handle_config_subcommand(config_args: ConfigArgs) {
    match config_args.subcommand {
        ConfigSubcommands::Init { overwrite } => {
            if let Err(e) = config::create_default_config(overwrite) {
                eprintln!("Error creating config: {e}");
                std::process::exit(1);
            }
        }
        ConfigSubcommands::Show => {
            if let Err(e) = config::show_config() {
                eprintln!("Error showing config: {e}");
                std::process::exit(1);
            }
        }
        ConfigSubcommands::Set { key, value } => {
            if let Err(e) = config::set_config_value(&key, &value) {
                eprintln!("Error setting config: {e}");
                std::process::exit(1);
            }
        }
    }
}
