mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use taskflow_migrate::{MigrationError, MigratorConfig, TargetType};

use commands::migrate;
use logging::LoggingConfig;

#[derive(Parser)]
#[command(name = "taskflow-migrate")]
#[command(about = "Versioned migrations for the taskflow relational and document stores")]
struct Cli {
    /// Root directory holding `sql/` and `nosql/` migrations
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Relational database URL (postgres:// or sqlite:)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Document store URL (memory:// or file:///dir)
    #[arg(long, global = true)]
    document_url: Option<String>,

    /// Document store database name
    #[arg(long, global = true)]
    document_database: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: MigrateCommands,
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Create a new migration file
    Create {
        /// Version (`V3` or `3`)
        version: String,

        /// Migration name
        name: String,

        #[arg(long, short, default_value = "sql")]
        target: TargetType,

        /// Read the migration body from a file instead of the default template
        #[arg(long)]
        from_file: Option<PathBuf>,
    },

    /// Execute one migration
    Run {
        version: String,

        #[arg(long, short, default_value = "sql")]
        target: TargetType,
    },

    /// Execute every pending migration in version order
    Up {
        #[arg(long, short, default_value = "sql")]
        target: TargetType,
    },

    /// Run the rollback section of a migration
    Rollback {
        version: String,

        #[arg(long, short, default_value = "sql")]
        target: TargetType,
    },

    /// List migration files with their tracked state
    Status {
        #[arg(long, short, default_value = "sql")]
        target: TargetType,
    },

    /// Show tracker records, most recent first
    History {
        #[arg(long, short, default_value = "sql")]
        target: TargetType,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the latest completed version
    Current {
        #[arg(long, short, default_value = "sql")]
        target: TargetType,
    },

    /// Delete a migration file that has never been executed
    Delete {
        version: String,

        #[arg(long, short, default_value = "sql")]
        target: TargetType,
    },
}

impl Cli {
    /// Environment configuration with command-line overrides applied
    fn config(&self) -> anyhow::Result<MigratorConfig> {
        let mut config = MigratorConfig::new().apply_env()?;

        if let Some(dir) = &self.migrations_dir {
            config.migrations_dir = dir.clone();
        }
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(url) = &self.document_url {
            config.document_url = url.clone();
        }
        if let Some(database) = &self.document_database {
            config.document_database = database.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<MigrationError>() {
                Some(migration_err) => eprintln!("error[{}]: {}", migration_err.code(), err),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config()?;

    let logging = LoggingConfig::new(&config.log_level).json(cli.json_logs);
    if let Err(e) = logging::init_logging(logging) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    let migrator = migrate::connect(&config).await?;

    match cli.command {
        MigrateCommands::Create {
            version,
            name,
            target,
            from_file,
        } => {
            migrate::create(&migrator, &version, &name, target, from_file.as_deref()).await?;
        }
        MigrateCommands::Run { version, target } => {
            migrate::run(&migrator, &version, target).await?;
        }
        MigrateCommands::Up { target } => {
            migrate::up(&migrator, target).await?;
        }
        MigrateCommands::Rollback { version, target } => {
            migrate::rollback(&migrator, &version, target).await?;
        }
        MigrateCommands::Status { target } => {
            migrate::status(&migrator, target).await?;
        }
        MigrateCommands::History { target, json } => {
            migrate::history(&migrator, target, json).await?;
        }
        MigrateCommands::Current { target } => {
            migrate::current(&migrator, target).await?;
        }
        MigrateCommands::Delete { version, target } => {
            migrate::delete(&migrator, &version, target).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "taskflow-migrate",
            "run",
            "V3",
            "--target",
            "nosql",
            "--migrations-dir",
            "/srv/migrations",
            "--json-logs",
        ])
        .unwrap();

        assert!(cli.json_logs);
        assert_eq!(cli.migrations_dir, Some(PathBuf::from("/srv/migrations")));
        match cli.command {
            MigrateCommands::Run { version, target } => {
                assert_eq!(version, "V3");
                assert_eq!(target, TargetType::NoSql);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_target_defaults_to_sql() {
        let cli = Cli::try_parse_from(["taskflow-migrate", "status"]).unwrap();
        assert!(matches!(
            cli.command,
            MigrateCommands::Status {
                target: TargetType::Sql
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_target() {
        assert!(Cli::try_parse_from(["taskflow-migrate", "up", "--target", "graph"]).is_err());
    }

    #[test]
    #[serial]
    fn test_flags_override_environment() {
        std::env::set_var("DOCUMENT_DATABASE", "from_env");
        std::env::set_var("LOG_LEVEL", "warn");

        let cli = Cli::try_parse_from([
            "taskflow-migrate",
            "current",
            "--document-database",
            "from_flag",
            "--database-url",
            "sqlite://app.db",
        ])
        .unwrap();
        let config = cli.config().unwrap();

        assert_eq!(config.document_database, "from_flag");
        assert_eq!(config.database_url.as_deref(), Some("sqlite://app.db"));
        assert_eq!(config.log_level, "warn");

        std::env::remove_var("DOCUMENT_DATABASE");
        std::env::remove_var("LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_invalid_log_level_flag_is_rejected() {
        let cli =
            Cli::try_parse_from(["taskflow-migrate", "status", "--log-level", "loud"]).unwrap();
        assert!(cli.config().is_err());
    }
}
