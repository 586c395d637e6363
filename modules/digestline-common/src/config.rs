use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

/// Secrets and deployment values loaded from environment variables.
/// Tunables (thresholds, caps, catalog) live in the TOML [`FileConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // AI providers
    pub anthropic_api_key: Option<String>,
    pub voyage_api_key: Option<String>,

    // Trigger surface
    pub run_trigger_secret: Option<String>,
    pub web_host: String,
    pub web_port: u16,

    pub config_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let web_port = env::var("WEB_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: "WEB_PORT",
                message: e.to_string(),
            })?;

        let config = Self {
            database_url: required_env("DATABASE_URL")?,
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            voyage_api_key: optional_env("VOYAGE_API_KEY"),
            run_trigger_secret: optional_env("RUN_TRIGGER_SECRET"),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port,
            config_path: env::var("DIGESTLINE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("digestline.toml")),
        };

        config.log_redacted();
        Ok(config)
    }

    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview(&self.anthropic_api_key));
        tracing::info!("  VOYAGE_API_KEY: {}", preview(&self.voyage_api_key));
        tracing::info!("  RUN_TRIGGER_SECRET: {}", preview(&self.run_trigger_secret));
        tracing::info!("  DIGESTLINE_CONFIG: {}", self.config_path.display());
    }
}

/// First five characters of a secret plus its length, safe for any UTF-8.
fn preview(val: &Option<String>) -> String {
    match val {
        Some(v) if !v.is_empty() => {
            let shown: String = v.chars().take(5).collect();
            format!("{shown}...({} chars)", v.chars().count())
        }
        _ => "<not set>".to_string(),
    }
}

fn required_env(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnv(key))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// --- TOML file config ---

/// Tunables loaded from disk. Every section has defaults, so an empty file
/// (or no file at all) yields a working configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub selection: SelectionConfig,
    pub guard: GuardConfig,
    pub locks: LockConfig,
    pub budget: BudgetConfig,
    pub models: ModelsConfig,
    pub priority: PriorityConfig,
    pub catalog: Vec<CategorySpec>,
    pub exclusion: ExclusionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub target_items: usize,
    pub max_items: usize,
    pub per_category_cap: usize,
    pub similarity_threshold: f64,
    /// Stricter threshold for categories with exactly two items.
    pub pair_threshold: f64,
    pub min_cluster_size: usize,
    /// When false, items without embeddings are clustered as-is.
    pub embed_items: bool,
    /// Writer confidence at or above which committed content is published.
    pub publish_confidence: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            target_items: 10,
            max_items: 15,
            per_category_cap: 2,
            similarity_threshold: 0.75,
            pair_threshold: 0.85,
            min_cluster_size: 2,
            embed_items: true,
            publish_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub rate_window_hours: i64,
    pub max_per_window: usize,
    pub lexical_threshold: f64,
    /// How many recent same-category records to compare against.
    pub recent_limit: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rate_window_hours: 24,
            max_per_window: 3,
            lexical_threshold: 0.7,
            recent_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub window_days: i64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { window_days: 2 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_duration_secs: u64,
    pub per_item_estimate_secs: u64,
    pub safety_buffer_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 270,
            per_item_estimate_secs: 25,
            safety_buffer_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub writer: String,
    pub embedding: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            writer: "claude-haiku-4-5-20251001".to_string(),
            embedding: "voyage-3-large".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub categories: Vec<String>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            categories: ["BYD", "Tesla", "Toyota", "Honda", "MG"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// A canonical category name with the alias strings that select it.
#[derive(Debug, Clone, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CategorySpec {
    pub fn new(name: &str, aliases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Built-in catalog used when the file config has no `[[catalog]]` entries.
pub fn default_catalog() -> Vec<CategorySpec> {
    vec![
        CategorySpec::new("BYD", &["Build Your Dreams", "比亚迪", "Atto 3"]),
        CategorySpec::new("Tesla", &["Model 3", "Model Y", "Cybertruck", "特斯拉"]),
        CategorySpec::new("Toyota", &["Lexus", "丰田", "Corolla", "Hilux"]),
        CategorySpec::new("Honda", &["本田", "Civic", "Accord"]),
        CategorySpec::new("MG", &["SAIC", "上汽", "MG4"]),
        CategorySpec::new("Hyundai", &["Ioniq", "Kia"]),
        CategorySpec::new("Nissan", &["Navara", "日产"]),
        CategorySpec::new("GWM", &["Great Wall", "Haval", "长城"]),
        CategorySpec::new("Mercedes-Benz", &["Mercedes", "Benz", "奔驰"]),
        CategorySpec::new("BMW", &["宝马"]),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// Vocabulary of the excluded domain.
    pub keywords: Vec<String>,
    /// Distinct keyword hits needed before an item is excluded.
    pub min_hits: usize,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            keywords: [
                "motorcycle",
                "motorbike",
                "scooter",
                "moped",
                "superbike",
                "Ducati",
                "Kawasaki",
                "Yamaha",
                "Harley-Davidson",
                "摩托车",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_hits: 2,
        }
    }
}

impl FileConfig {
    /// The catalog to group by, falling back to the built-in one.
    pub fn catalog(&self) -> Vec<CategorySpec> {
        if self.catalog.is_empty() {
            default_catalog()
        } else {
            self.catalog.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |key: &'static str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    message: format!("{v} is outside [0, 1]"),
                })
            }
        };
        unit("selection.similarity_threshold", self.selection.similarity_threshold)?;
        unit("selection.pair_threshold", self.selection.pair_threshold)?;
        unit("selection.publish_confidence", self.selection.publish_confidence)?;
        unit("guard.lexical_threshold", self.guard.lexical_threshold)?;

        if self.selection.max_items < self.selection.target_items {
            return Err(ConfigError::Invalid {
                key: "selection.max_items",
                message: format!(
                    "max_items ({}) must be >= target_items ({})",
                    self.selection.max_items, self.selection.target_items
                ),
            });
        }
        if self.selection.min_cluster_size == 0 {
            return Err(ConfigError::Invalid {
                key: "selection.min_cluster_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.locks.window_days < 0 || self.guard.rate_window_hours < 0 {
            return Err(ConfigError::Invalid {
                key: "locks.window_days",
                message: "windows must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Load and validate a TOML config file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file found, using defaults");
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
