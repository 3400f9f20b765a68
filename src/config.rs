use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON pattern document (labels, exclusions, early detection, validation).
    #[serde(default = "default_patterns_path")]
    pub patterns_path: String,
    /// JSON company document (known names, aliases, domain sets).
    #[serde(default = "default_companies_path")]
    pub companies_path: String,
    /// SQLite file for thread aggregates; in-memory store when unset.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Confidence recorded for rule-based labels.
    #[serde(default = "default_rule_confidence")]
    pub rule_confidence: f64,
    /// Predictions below this are ignored, for labels and companies alike.
    #[serde(default = "default_min_prediction_confidence")]
    pub min_prediction_confidence: f64,
}

fn default_patterns_path() -> String {
    "/etc/jobmail/patterns.json".to_string()
}

fn default_companies_path() -> String {
    "/etc/jobmail/companies.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rule_confidence() -> f64 {
    0.95
}

fn default_min_prediction_confidence() -> f64 {
    0.5
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        ClassificationConfig {
            rule_confidence: default_rule_confidence(),
            min_prediction_confidence: default_min_prediction_confidence(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            patterns_path: default_patterns_path(),
            companies_path: default_companies_path(),
            database_path: Some("/var/lib/jobmail/aggregates.db".to_string()),
            logging: LoggingConfig::default(),
            classification: ClassificationConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("patterns_path: ./patterns.json\n").unwrap();
        assert_eq!(config.patterns_path, "./patterns.json");
        assert_eq!(config.companies_path, "/etc/jobmail/companies.json");
        assert_eq!(config.database_path, None);
        assert_eq!(config.classification.rule_confidence, 0.95);
        assert_eq!(config.classification.min_prediction_confidence, 0.5);
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
        config.logging.level = "chatty".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("jobmail-{}-config.yaml", std::process::id()));
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.classification.min_prediction_confidence = 0.7;
        config.to_file(path).unwrap();
        assert_eq!(Config::from_file(path).unwrap(), config);

        std::fs::remove_file(path).ok();
    }
}
