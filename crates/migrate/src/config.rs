//! Migration engine configuration
//!
//! Configuration is read from the process environment and validated before
//! any connection is opened. The CLI layers its flags on top of
//! [`MigratorConfig::from_env`].

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::migrations::TargetType;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Environment enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::invalid_value(
                "environment",
                s,
                "development, testing, or production",
            )),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_str = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        };
        write!(f, "{}", env_str)
    }
}

/// Configuration for the migration engine
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    pub environment: Environment,
    /// Root directory; migrations live in `<dir>/sql` and `<dir>/nosql`
    pub migrations_dir: PathBuf,
    /// Relational connection URL (`postgres://…` or `sqlite:…`)
    pub database_url: Option<String>,
    /// Document store URL (`memory://` or `file:///dir`)
    pub document_url: String,
    /// Document store database name
    pub document_database: String,
    /// Table tracking relational migrations
    pub migrations_table: String,
    /// Collection tracking document migrations
    pub migrations_collection: String,
    pub log_level: String,
}

impl MigratorConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self {
            environment: Environment::Development,
            migrations_dir: PathBuf::from("migrations"),
            database_url: None,
            document_url: "memory://".to_string(),
            document_database: "taskflow".to_string(),
            migrations_table: "migration_records".to_string(),
            migrations_collection: "migration_records".to_string(),
            log_level: "info".to_string(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::new().apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables without validating the result
    ///
    /// Callers that layer further overrides on top validate once at the end.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        let mut config = self;

        if let Ok(env_str) = env::var("ENVIRONMENT") {
            config.environment = env_str.parse()?;
        }

        if let Ok(dir) = env::var("MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }

        config.database_url = env::var("DATABASE_URL").ok();

        if let Ok(url) = env::var("DOCUMENT_STORE_URL") {
            config.document_url = url;
        }

        if let Ok(database) = env::var("DOCUMENT_DATABASE") {
            config.document_database = database;
        }

        if let Ok(table) = env::var("MIGRATIONS_TABLE") {
            config.migrations_table = table;
        }

        if let Ok(collection) = env::var("MIGRATIONS_COLLECTION") {
            config.migrations_collection = collection;
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.log_level = log_level;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::invalid_value(
                "log_level",
                &self.log_level,
                format!("one of: {}", valid_levels.join(", ")),
            ));
        }

        if !is_identifier(&self.migrations_table) {
            return Err(ConfigError::invalid_value(
                "migrations_table",
                &self.migrations_table,
                "letters, digits and underscores, not starting with a digit",
            ));
        }

        if !is_identifier(&self.migrations_collection) {
            return Err(ConfigError::invalid_value(
                "migrations_collection",
                &self.migrations_collection,
                "letters, digits and underscores, not starting with a digit",
            ));
        }

        if self.document_database.trim().is_empty() {
            return Err(ConfigError::missing_required(
                "document_database",
                "DOCUMENT_DATABASE must not be empty",
            ));
        }

        if let Some(url) = &self.database_url {
            let supported = ["postgres://", "postgresql://", "sqlite:"];
            if !supported.iter().any(|scheme| url.starts_with(scheme)) {
                return Err(ConfigError::invalid_value(
                    "database_url",
                    url,
                    "a postgres:// or sqlite: URL",
                ));
            }
        }

        if self.environment == Environment::Production && self.database_url.is_none() {
            return Err(ConfigError::missing_required(
                "database_url",
                "DATABASE_URL environment variable is required in production",
            ));
        }

        Ok(())
    }

    /// Directory holding the migration files of one target type
    pub fn target_dir(&self, target_type: TargetType) -> PathBuf {
        self.migrations_dir.join(target_type.dir_name())
    }

    /// Root migrations directory
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain SQL/collection identifier check for names interpolated into SQL
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "ENVIRONMENT",
            "MIGRATIONS_DIR",
            "DATABASE_URL",
            "DOCUMENT_STORE_URL",
            "DOCUMENT_DATABASE",
            "MIGRATIONS_TABLE",
            "MIGRATIONS_COLLECTION",
            "LOG_LEVEL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MigratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_dir(TargetType::Sql), PathBuf::from("migrations/sql"));
        assert_eq!(config.target_dir(TargetType::NoSql), PathBuf::from("migrations/nosql"));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("MIGRATIONS_DIR", "/srv/migrations");
        env::set_var("DATABASE_URL", "postgres://localhost/taskflow");
        env::set_var("DOCUMENT_DATABASE", "projects");
        env::set_var("LOG_LEVEL", "debug");

        let config = MigratorConfig::from_env().unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("/srv/migrations"));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/taskflow"));
        assert_eq!(config.document_database, "projects");
        assert_eq!(config.log_level, "debug");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_production_requires_database_url() {
        clear_env();
        env::set_var("ENVIRONMENT", "production");

        let result = MigratorConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::MissingRequired { ref field, .. }) if field == "database_url"
        ));
        clear_env();
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let mut config = MigratorConfig::new();
        config.migrations_table = "records; DROP TABLE users".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_database_scheme() {
        let mut config = MigratorConfig::new();
        config.database_url = Some("mysql://localhost/app".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("migration_records"));
        assert!(is_identifier("_private"));
        assert!(!is_identifier("1records"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
