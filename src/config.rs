use crate::search::{build_registry, EntityDefinition, SchemaRegistry, SearchConfig, SearchResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "ENTITY_SEARCH_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Search engine configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Declared entity types
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "entity-search.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load with an explicit override file; a missing file is not an error
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(config_path).required(false))
            // Override with environment variables (prefix: ENTITY_SEARCH__)
            .add_source(
                config::Environment::with_prefix("ENTITY_SEARCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Registry of every declared entity type
    pub fn registry(&self) -> SearchResult<Arc<SchemaRegistry>> {
        build_registry(&self.entities)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{AnalyzerKind, MultiFieldMode};
    use std::io::Write;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::load_from("does-not-exist.toml").unwrap();
        assert_eq!(config.search.max_results, 1000);
        assert_eq!(config.search.multi_field_mode, MultiFieldMode::Or);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.entities.is_empty());
        config.search.validate().unwrap();
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[search]
analyzer = "english_stem"
multi_field_mode = "AND"
max_results = 50

[[entities]]
name = "Article"

[[entities.fields]]
name = "Headline"
store = true
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.search.analyzer, AnalyzerKind::EnglishStem);
        assert_eq!(config.search.multi_field_mode, MultiFieldMode::And);
        assert_eq!(config.search.max_results, 50);
        assert_eq!(config.search.writer_heap_size, 50_000_000);

        let registry = config.registry().unwrap();
        assert!(registry.get("Article").is_some());
    }
}
