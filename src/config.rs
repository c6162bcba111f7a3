use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    /// Usuario autorizado para los comandos de administración del bot
    pub owner_id: Option<u64>,
    /// Prefijos para guilds sin configuración propia
    pub default_prefixes: Vec<String>,

    // Audio
    pub default_volume: u16,
    pub max_queue_size: usize,

    // Estadísticas
    #[serde(with = "duration_secs")]
    pub stats_flush_interval: Duration,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("cannot create {}", config.data_dir.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            owner_id: var("OWNER_ID")
                .map(|id| id.trim().parse::<u64>())
                .transpose()
                .context("OWNER_ID must be a user id")?,
            default_prefixes: var("DEFAULT_PREFIXES")
                .map(|prefixes| {
                    prefixes
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.default_prefixes),
            default_volume: var("DEFAULT_VOLUME")
                .map(|v| v.trim().parse::<u16>())
                .transpose()
                .context("DEFAULT_VOLUME must be a number")?
                .unwrap_or(defaults.default_volume),
            max_queue_size: var("MAX_QUEUE_SIZE")
                .map(|v| v.trim().parse::<usize>())
                .transpose()
                .context("MAX_QUEUE_SIZE must be a number")?
                .unwrap_or(defaults.max_queue_size),
            stats_flush_interval: var("STATS_FLUSH_INTERVAL")
                .map(|v| v.trim().parse::<u64>().map(Duration::from_secs))
                .transpose()
                .context("STATS_FLUSH_INTERVAL must be a number of seconds")?
                .unwrap_or(defaults.stats_flush_interval),
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 1000
    /// - Queue size and flush interval must be greater than 0
    /// - At least one default prefix
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 1000 {
            anyhow::bail!("Default volume must be between 0 and 1000, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.stats_flush_interval.is_zero() {
            anyhow::bail!("Stats flush interval must be greater than 0");
        }

        if self.default_prefixes.is_empty() {
            anyhow::bail!("At least one default prefix is required");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Prefixes: {}\n  \
            Audio: {}% vol, {} max queue\n  \
            Stats: flush every {}\n  \
            Data: {} (owner: {})",
            self.default_prefixes.join(" "),
            self.default_volume,
            self.max_queue_size,
            humantime::format_duration(self.stats_flush_interval),
            self.data_dir.display(),
            self.owner_id.map_or("none".to_string(), |id| id.to_string()),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            owner_id: None,
            default_prefixes: vec!["pb".to_string()],

            // Audio defaults
            default_volume: 40,
            max_queue_size: 100,

            stats_flush_interval: Duration::from_secs(300),

            data_dir: "/app/data".into(),
        }
    }
}

/// Serializes the interval as whole seconds, like the environment variable.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_fill_missing_values() {
        let config = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "token")])).unwrap();

        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.default_volume, 40);
        assert_eq!(config.stats_flush_interval, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "token"),
            ("DEFAULT_PREFIXES", "!, ?? ,"),
            ("MAX_QUEUE_SIZE", "25"),
            ("OWNER_ID", "42"),
        ]))
        .unwrap();

        assert_eq!(config.default_prefixes, vec!["!", "??"]);
        assert_eq!(config.max_queue_size, 25);
        assert_eq!(config.owner_id, Some(42));
    }

    #[test]
    fn token_is_required_and_volume_bounded() {
        assert!(Config::from_lookup(lookup(&[])).is_err());

        let loud = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "t"), ("DEFAULT_VOLUME", "1500")])).unwrap();
        assert!(loud.validate().is_err());
    }
}
