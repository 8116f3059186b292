use std::path::Path;

use taskflow_migrate::{
    CreateMigration, Migration, MigrationStatus, Migrator, MigratorConfig, TargetType,
};

/// Build the migrator for the configured data stores
pub async fn connect(config: &MigratorConfig) -> anyhow::Result<Migrator> {
    Ok(Migrator::from_config(config).await?)
}

/// Starter content for a new migration file
fn template(name: &str, target: TargetType) -> String {
    let comment = match target {
        TargetType::Sql => "--",
        TargetType::NoSql => "//",
    };
    format!(
        "{} Migration: {}\n\n\n{}\n",
        comment,
        name,
        target.rollback_sentinel()
    )
}

pub async fn create(
    migrator: &Migrator,
    version: &str,
    name: &str,
    target: TargetType,
    from_file: Option<&Path>,
) -> anyhow::Result<()> {
    let content = match from_file {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => template(name, target),
    };

    let migration = migrator
        .create_migration(CreateMigration {
            version: version.to_string(),
            name: name.to_string(),
            target_type: target,
            content,
        })
        .await?;

    println!(
        "Created migration: {}",
        migrator
            .target_dir(target)
            .join(&migration.filename)
            .display()
    );
    Ok(())
}

pub async fn run(migrator: &Migrator, version: &str, target: TargetType) -> anyhow::Result<()> {
    let migration = migrator.execute_migration(version, target).await?;
    println!(
        "Executed {} {} ({} ms)",
        migration.version,
        migration.name,
        migration.execution_time_ms.unwrap_or_default()
    );
    Ok(())
}

pub async fn up(migrator: &Migrator, target: TargetType) -> anyhow::Result<()> {
    let executed = migrator.migrate_pending(target).await?;

    if executed.is_empty() {
        println!("No pending {} migrations", target);
        return Ok(());
    }

    for migration in &executed {
        println!(
            "  ✅ {} {} ({} ms)",
            migration.version,
            migration.name,
            migration.execution_time_ms.unwrap_or_default()
        );
    }
    println!("Executed {} {} migration(s)", executed.len(), target);
    Ok(())
}

pub async fn rollback(
    migrator: &Migrator,
    version: &str,
    target: TargetType,
) -> anyhow::Result<()> {
    let migration = migrator.rollback_migration(version, target).await?;
    println!("Rolled back {} {}", migration.version, migration.name);
    Ok(())
}

pub async fn status(migrator: &Migrator, target: TargetType) -> anyhow::Result<()> {
    let migrations = migrator.list_migrations(target).await?;

    println!("Migration Status ({})", target);
    println!("================");

    if migrations.is_empty() {
        println!(
            "No migrations found in {}",
            migrator.target_dir(target).display()
        );
        return Ok(());
    }

    for migration in &migrations {
        println!("{}", status_line(migration));
    }

    let pending = migrations
        .iter()
        .filter(|m| m.status == MigrationStatus::Pending)
        .count();
    println!("\n{} migration(s), {} pending", migrations.len(), pending);
    Ok(())
}

fn status_marker(status: MigrationStatus) -> &'static str {
    match status {
        MigrationStatus::Pending => "⏳",
        MigrationStatus::Completed => "✅",
        MigrationStatus::Failed => "❌",
        MigrationStatus::RolledBack => "↩️",
    }
}

fn status_line(migration: &Migration) -> String {
    let mut line = format!(
        "  {} {:<6} {:<32} {}",
        status_marker(migration.status),
        migration.version,
        migration.name,
        migration.status
    );
    if let Some(executed_at) = migration.executed_at {
        line.push_str(&format!(
            "  {}",
            executed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(error) = &migration.error {
        line.push_str(&format!("\n      {}", error));
    }
    line
}

pub async fn history(migrator: &Migrator, target: TargetType, json: bool) -> anyhow::Result<()> {
    let records = migrator.history(target).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {} migrations have been recorded", target);
        return Ok(());
    }

    for record in &records {
        println!(
            "  {} {:<6} {:<32} {:<12} {:>6} ms",
            record.executed_at.format("%Y-%m-%d %H:%M:%S"),
            record.version,
            record.name,
            record.status.as_str(),
            record.execution_time_ms
        );
        if let Some(error) = &record.error {
            println!("      {}", error);
        }
    }
    Ok(())
}

pub async fn current(migrator: &Migrator, target: TargetType) -> anyhow::Result<()> {
    match migrator.current_version(target).await? {
        Some(version) => println!("{}", version),
        None => println!("No completed {} migrations", target),
    }
    Ok(())
}

pub async fn delete(migrator: &Migrator, version: &str, target: TargetType) -> anyhow::Result<()> {
    migrator.delete_migration(version, target).await?;
    println!("Deleted {} migration {}", target, version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn migrator(dir: &TempDir) -> Migrator {
        let store = std::sync::Arc::new(taskflow_migrate::MemoryDocumentStore::new());
        Migrator::new(dir.path())
            .unwrap()
            .with_document_store(store, "taskflow", "migration_records")
    }

    #[test]
    fn test_template_carries_rollback_sentinel() {
        assert_eq!(
            template("init", TargetType::Sql),
            "-- Migration: init\n\n\n-- ROLLBACK\n"
        );
        assert!(template("users", TargetType::NoSql).ends_with("// ROLLBACK\n"));
    }

    #[tokio::test]
    async fn test_create_from_template_then_delete() {
        let dir = TempDir::new().unwrap();
        let migrator = migrator(&dir);

        create(&migrator, "4", "add users", TargetType::NoSql, None)
            .await
            .unwrap();
        let path = dir.path().join("nosql/V4__add_users.js");
        assert!(path.exists());

        delete(&migrator, "V4", TargetType::NoSql).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_up_reports_migration_errors() {
        let dir = TempDir::new().unwrap();
        let migrator = migrator(&dir);

        let body = dir.path().join("body.js");
        tokio::fs::write(&body, "db.dropDatabase()").await.unwrap();
        create(&migrator, "1", "wipe", TargetType::NoSql, Some(&body))
            .await
            .unwrap();

        let err = up(&migrator, TargetType::NoSql).await.unwrap_err();
        let migration_err = err
            .downcast_ref::<taskflow_migrate::MigrationError>()
            .unwrap();
        assert_eq!(migration_err.code(), "PARSE_VALIDATION_FAILED");
    }

    #[test]
    fn test_status_line_shows_failure() {
        let mut migration = Migration {
            version: "V2".to_string(),
            name: "seed".to_string(),
            target_type: TargetType::Sql,
            body: "INSERT INTO t VALUES (1);".to_string(),
            rollback_body: None,
            status: MigrationStatus::Failed,
            executed_at: None,
            execution_time_ms: None,
            error: Some("boom".to_string()),
            filename: "V2__seed.sql".to_string(),
        };
        let line = status_line(&migration);
        assert!(line.contains("V2"));
        assert!(line.contains("failed"));
        assert!(line.ends_with("boom"));

        migration.error = None;
        migration.status = MigrationStatus::Pending;
        assert!(status_line(&migration).contains("⏳"));
    }
}
