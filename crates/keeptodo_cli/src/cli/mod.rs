use clap::{Parser, Subcommand};
use keeptodo_core::config::ConfigOverrides;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to run; starts an interactive session when omitted
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Keep todos in memory only for this run
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new todo
    ///
    /// Example: keeptodo add "Buy milk" --priority high
    Add {
        text: Option<String>,
        #[arg(long, short = 'p', value_name = "LEVEL")]
        priority: Option<String>,
    },
    /// Flip a todo between active and completed
    ///
    /// Example: keeptodo toggle 0196f6c2
    Toggle { id: String },
    /// Replace a todo's text
    ///
    /// Example: keeptodo edit 0196f6c2 "Buy oat milk"
    Edit { id: String, new_text: String },
    /// Delete a todo
    ///
    /// Example: keeptodo delete 0196f6c2
    Delete { id: String },
    /// Set a todo's priority (low, medium, high)
    ///
    /// Example: keeptodo priority 0196f6c2 high
    Priority { id: String, level: String },
    /// Remove every completed todo
    ClearCompleted,
    /// Complete every todo, or reopen them all when all are already complete
    ToggleAll,
    /// List todos
    ///
    /// Example: keeptodo list --filter active
    List {
        /// all, active, completed or urgent
        #[arg(long, short = 'f', default_value = "all")]
        filter: String,
    },
    /// Show todo counts
    Stats,
    /// Show what is stored under the storage key
    StorageStats,
    /// Write a todos-backup-<date>.json file
    ///
    /// Example: keeptodo export ~/backups
    Export { dir: Option<PathBuf> },
    /// Load todos from a backup file
    ///
    /// Example: keeptodo import todos-backup-2025-12-20.json --merge
    Import {
        file: PathBuf,
        /// Keep existing todos and add only unseen ids
        #[arg(long)]
        merge: bool,
    },
    /// Rewrite legacy bare-array data in the current format
    Migrate,
    /// Delete all todos and the storage key
    ClearStorage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    StorageKey,
    DataDir,
    Source,
    QuotaBytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let canonical_field =
        canonicalize_flag_name(key_raw).ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match canonical_field.as_str() {
        "storage_key" | "key" => ConfigOverrideTarget::StorageKey,
        "data_dir" => ConfigOverrideTarget::DataDir,
        "source" => ConfigOverrideTarget::Source,
        "quota_bytes" | "quota" => ConfigOverrideTarget::QuotaBytes,
        other => return Err(format!("unknown config field '{other}'")),
    };

    Ok(ParsedConfigOverride { target, value })
}

/// Fold every `--config-override` into one set of overrides; later values win.
pub fn collect_config_overrides(raw: &[String]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();

    for entry in raw {
        let parsed = parse_config_override(entry)?;
        match parsed.target {
            ConfigOverrideTarget::StorageKey => overrides.storage_key = Some(parsed.value),
            ConfigOverrideTarget::DataDir => {
                overrides.data_dir = Some(PathBuf::from(parsed.value));
            }
            ConfigOverrideTarget::Source => overrides.source = Some(parsed.value),
            ConfigOverrideTarget::QuotaBytes => {
                let quota = parsed
                    .value
                    .parse::<usize>()
                    .map_err(|_| format!("quota_bytes must be a byte count, got '{}'", parsed.value))?;
                overrides.quota_bytes = Some(quota);
            }
        }
    }

    Ok(overrides)
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
