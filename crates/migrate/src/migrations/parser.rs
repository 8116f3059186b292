//! Migration file parsing and static validation
//!
//! A migration file is named `V<n>__<name>.<ext>`. Its content is split at
//! the first rollback sentinel line into the forward body and the optional
//! rollback body. Validation collects every violated rule instead of stopping
//! at the first one.

use regex::Regex;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::warn;

use super::definitions::{Migration, MigrationStatus, TargetType};
use super::validation::{ValidationReport, ValidationRule};
use crate::document::DocumentScript;
use crate::error::{MigrationError, MigrationResult};
use crate::sql;

/// Parses and statically validates migration files of one target type
pub trait MigrationParser: Send + Sync {
    fn target_type(&self) -> TargetType;

    /// Extract version, name, body and rollback body
    fn parse(&self, filename: &str, content: &str) -> MigrationResult<Migration>;

    /// Check a parsed migration against every rule of this target type
    fn validate(&self, migration: &Migration) -> ValidationReport;

    /// Parse, then fail with every validation error at once
    fn parse_and_validate(&self, filename: &str, content: &str) -> MigrationResult<Migration> {
        let migration = self.parse(filename, content)?;
        let report = self.validate(&migration);

        for warning in &report.warnings {
            warn!("Migration {}: {}", migration.version, warning);
        }

        report
            .into_result()
            .map_err(|errors| MigrationError::ParseValidationFailed {
                version: migration.version.clone(),
                errors,
            })?;
        Ok(migration)
    }
}

/// Build the parser for a target type
pub fn parser_for(target_type: TargetType) -> MigrationResult<Box<dyn MigrationParser>> {
    Ok(match target_type {
        TargetType::Sql => Box::new(SqlMigrationParser::new()?),
        TargetType::NoSql => Box::new(DocumentMigrationParser::new()?),
    })
}

/// Filename and sentinel handling shared by both parsers
#[derive(Debug, Clone)]
struct MigrationFileFormat {
    target_type: TargetType,
    filename_regex: Regex,
    version_regex: Regex,
    sentinel_regex: Regex,
}

impl MigrationFileFormat {
    fn new(target_type: TargetType) -> MigrationResult<Self> {
        let sentinel = match target_type {
            TargetType::Sql => r"(?m)^[ \t]*--[ \t]*ROLLBACK[ \t]*\r?$",
            TargetType::NoSql => r"(?m)^[ \t]*//[ \t]*ROLLBACK[ \t]*\r?$",
        };

        Ok(Self {
            target_type,
            filename_regex: Regex::new(r"V(\d+)__")?,
            version_regex: Regex::new(r"^V(0|[1-9]\d*)$")?,
            sentinel_regex: Regex::new(sentinel)?,
        })
    }

    fn parse(&self, filename: &str, content: &str) -> MigrationResult<Migration> {
        // directories are not part of the name
        let basename = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename);

        let captures = self.filename_regex.captures(basename).ok_or_else(|| {
            MigrationError::InvalidFilenameFormat {
                filename: filename.to_string(),
            }
        })?;
        let prefix_end = captures.get(0).map(|m| m.end()).unwrap_or_default();
        let digits = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

        let remainder = &basename[prefix_end..];
        let name = remainder
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(remainder);

        let (body, rollback_body) = match self.sentinel_regex.find(content) {
            Some(sentinel) => {
                let rollback = content[sentinel.end()..].trim();
                (
                    content[..sentinel.start()].trim().to_string(),
                    (!rollback.is_empty()).then(|| rollback.to_string()),
                )
            }
            None => (content.trim().to_string(), None),
        };

        Ok(Migration {
            version: format!("V{}", digits),
            name: name.to_string(),
            target_type: self.target_type,
            body,
            rollback_body,
            status: MigrationStatus::Pending,
            executed_at: None,
            execution_time_ms: None,
            error: None,
            filename: basename.to_string(),
        })
    }

    /// Rules shared by every target type
    fn validate_common(&self, migration: &Migration, report: &mut ValidationReport) {
        if !self.version_regex.is_match(&migration.version) {
            report.error(
                ValidationRule::InvalidVersion,
                format!(
                    "version '{}' does not match the V<n> format without leading zeros",
                    migration.version
                ),
            );
        }
        if migration.name.trim().is_empty() {
            report.error(ValidationRule::EmptyName, "migration name is empty");
        }
        if migration.body.trim().is_empty() {
            report.error(ValidationRule::EmptyBody, "migration body is empty");
        }
    }
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Parser for relational (`.sql`) migrations
#[derive(Debug, Clone)]
pub struct SqlMigrationParser {
    format: MigrationFileFormat,
    operation_regex: Regex,
    drop_table_regex: Regex,
    drop_database_regex: Regex,
    truncate_regex: Regex,
}

impl SqlMigrationParser {
    pub fn new() -> MigrationResult<Self> {
        Ok(Self {
            format: MigrationFileFormat::new(TargetType::Sql)?,
            operation_regex: Regex::new(r"(?i)\b(CREATE|ALTER|DROP|INSERT|UPDATE|DELETE)\b")?,
            drop_table_regex: Regex::new(r"(?i)\bDROP\s+TABLE\b(\s+IF\s+EXISTS\b)?")?,
            drop_database_regex: Regex::new(r"(?i)\bDROP\s+DATABASE\b")?,
            truncate_regex: Regex::new(r"(?i)\bTRUNCATE\b")?,
        })
    }
}

impl MigrationParser for SqlMigrationParser {
    fn target_type(&self) -> TargetType {
        TargetType::Sql
    }

    fn parse(&self, filename: &str, content: &str) -> MigrationResult<Migration> {
        self.format.parse(filename, content)
    }

    fn validate(&self, migration: &Migration) -> ValidationReport {
        let mut report = ValidationReport::new();
        self.format.validate_common(migration, &mut report);

        if migration.body.trim().is_empty() {
            return report;
        }

        // keywords inside literals and comments do not count
        let scanned = sql::scan(&migration.body);
        let code = scanned.code.as_str();

        for problem in &scanned.problems {
            report.error(ValidationRule::SyntaxError, problem.clone());
        }

        if !self.operation_regex.is_match(code) {
            report.error(
                ValidationRule::MissingOperation,
                "body contains no CREATE, ALTER, DROP, INSERT, UPDATE or DELETE operation",
            );
        }

        for captures in self.drop_table_regex.captures_iter(code) {
            if captures.get(1).is_some() {
                continue;
            }
            if let Some(found) = captures.get(0) {
                report.error(
                    ValidationRule::DangerousOperation,
                    format!(
                        "line {}: DROP TABLE without IF EXISTS",
                        line_of(code, found.start())
                    ),
                );
            }
        }

        for found in self.drop_database_regex.find_iter(code) {
            report.error(
                ValidationRule::DangerousOperation,
                format!("line {}: DROP DATABASE", line_of(code, found.start())),
            );
        }

        for found in self.truncate_regex.find_iter(code) {
            report.error(
                ValidationRule::DangerousOperation,
                format!("line {}: TRUNCATE", line_of(code, found.start())),
            );
        }

        if scanned.problems.is_empty() {
            let dialect = PostgreSqlDialect {};
            for statement in &scanned.statements {
                if let Err(e) = Parser::parse_sql(&dialect, &statement.text) {
                    report.warning(format!(
                        "statement at line {} was not recognized by the SQL parser: {}",
                        statement.line, e
                    ));
                }
            }
        }

        report
    }
}

/// Parser for document-store (`.js`) migrations
#[derive(Debug, Clone)]
pub struct DocumentMigrationParser {
    format: MigrationFileFormat,
}

impl DocumentMigrationParser {
    pub fn new() -> MigrationResult<Self> {
        Ok(Self {
            format: MigrationFileFormat::new(TargetType::NoSql)?,
        })
    }
}

impl MigrationParser for DocumentMigrationParser {
    fn target_type(&self) -> TargetType {
        TargetType::NoSql
    }

    fn parse(&self, filename: &str, content: &str) -> MigrationResult<Migration> {
        self.format.parse(filename, content)
    }

    fn validate(&self, migration: &Migration) -> ValidationReport {
        let mut report = ValidationReport::new();
        self.format.validate_common(migration, &mut report);

        if migration.body.trim().is_empty() {
            return report;
        }

        match DocumentScript::parse(&migration.body) {
            Ok(script) => {
                if script.is_empty() {
                    report.error(
                        ValidationRule::MissingOperation,
                        "body contains no document operation",
                    );
                }
                for (line, reason) in script.dangerous_operations() {
                    report.error(
                        ValidationRule::DangerousOperation,
                        format!("line {}: {}", line, reason),
                    );
                }
            }
            Err(errors) => {
                for error in errors {
                    report.error(ValidationRule::SyntaxError, error.to_string());
                }
            }
        }

        if let Some(rollback) = &migration.rollback_body {
            if let Err(errors) = DocumentScript::parse(rollback) {
                for error in errors {
                    report.warning(format!("rollback section {}", error));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_parser() -> SqlMigrationParser {
        SqlMigrationParser::new().unwrap()
    }

    fn document_parser() -> DocumentMigrationParser {
        DocumentMigrationParser::new().unwrap()
    }

    #[test]
    fn test_parse_filename() {
        let migration = sql_parser()
            .parse("V12__add_users_table.sql", "CREATE TABLE users (id INT);")
            .unwrap();
        assert_eq!(migration.version, "V12");
        assert_eq!(migration.name, "add_users_table");
        assert_eq!(migration.target_type, TargetType::Sql);
        assert_eq!(migration.status, MigrationStatus::Pending);
        assert_eq!(migration.filename, "V12__add_users_table.sql");

        let migration = sql_parser()
            .parse("migrations/sql/V3__seed.data.sql", "INSERT INTO t VALUES (1);")
            .unwrap();
        assert_eq!(migration.version, "V3");
        assert_eq!(migration.name, "seed.data");
    }

    #[test]
    fn test_parse_rejects_bad_filename() {
        for filename in ["add_users.sql", "V__x.sql", "v1__x.sql", "V1_x.sql"] {
            let err = sql_parser().parse(filename, "SELECT 1").unwrap_err();
            assert!(
                matches!(err, MigrationError::InvalidFilenameFormat { .. }),
                "{} should be rejected",
                filename
            );
        }
    }

    #[test]
    fn test_rollback_sentinel_splits_content() {
        let content = "\nCREATE TABLE foo (id INT);\n\n-- ROLLBACK\nDROP TABLE IF EXISTS foo;\n";
        let migration = sql_parser().parse("V1__init.sql", content).unwrap();

        assert_eq!(migration.body, "CREATE TABLE foo (id INT);");
        assert_eq!(
            migration.rollback_body.as_deref(),
            Some("DROP TABLE IF EXISTS foo;")
        );
        assert_eq!(
            format!(
                "{}\n\n-- ROLLBACK\n{}",
                migration.body,
                migration.rollback_body.as_deref().unwrap()
            ),
            content.trim()
        );
    }

    #[test]
    fn test_without_sentinel_body_is_whole_content() {
        let content = "  CREATE TABLE foo (id INT);\n-- ROLLBACK notes\n";
        let migration = sql_parser().parse("V1__init.sql", content).unwrap();
        assert_eq!(migration.body, content.trim());
        assert!(migration.rollback_body.is_none());

        // sentinel with nothing after it
        let migration = sql_parser()
            .parse("V1__init.sql", "CREATE TABLE foo (id INT);\n-- ROLLBACK\n")
            .unwrap();
        assert!(migration.rollback_body.is_none());
    }

    #[test]
    fn test_document_sentinel() {
        let content = "db.createCollection(\"users\")\n// ROLLBACK\ndb.users.drop()";
        let migration = document_parser().parse("V2__users.js", content).unwrap();
        assert_eq!(migration.body, "db.createCollection(\"users\")");
        assert_eq!(migration.rollback_body.as_deref(), Some("db.users.drop()"));
        assert_eq!(migration.target_type, TargetType::NoSql);

        // the relational sentinel means nothing in a document migration
        let migration = document_parser()
            .parse("V2__users.js", "db.users.drop()\n-- ROLLBACK\n")
            .unwrap();
        assert!(migration.rollback_body.is_none());
    }

    #[test]
    fn test_sql_validation_collects_every_error() {
        let parser = sql_parser();
        let mut migration = parser.parse("V1__x.sql", "SELECT 1;").unwrap();
        migration.version = "1".to_string();
        migration.name = " ".to_string();

        let report = parser.validate(&migration);
        let rules: Vec<ValidationRule> = report.errors.iter().map(|e| e.rule).collect();
        assert_eq!(
            rules,
            vec![
                ValidationRule::InvalidVersion,
                ValidationRule::EmptyName,
                ValidationRule::MissingOperation
            ]
        );
    }

    #[test]
    fn test_sql_dangerous_operations() {
        let parser = sql_parser();
        let body = "DROP TABLE users;\nDROP TABLE IF EXISTS sessions;\nTRUNCATE audit;\nDROP DATABASE app;";
        let migration = parser.parse("V5__cleanup.sql", body).unwrap();
        let report = parser.validate(&migration);

        let dangerous: Vec<&str> = report
            .errors
            .iter()
            .filter(|e| e.rule == ValidationRule::DangerousOperation)
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(
            dangerous,
            vec![
                "line 1: DROP TABLE without IF EXISTS",
                "line 4: DROP DATABASE",
                "line 3: TRUNCATE"
            ]
        );
    }

    #[test]
    fn test_dollar_quoted_bodies_are_checked() {
        let parser = sql_parser();
        let body = "CREATE TABLE t (id INT);\nDO $$ BEGIN TRUNCATE audit; DROP TABLE users; END $$;";
        let migration = parser.parse("V6__purge.sql", body).unwrap();
        let report = parser.validate(&migration);

        let dangerous: Vec<&str> = report
            .errors
            .iter()
            .filter(|e| e.rule == ValidationRule::DangerousOperation)
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(
            dangerous,
            vec!["line 2: DROP TABLE without IF EXISTS", "line 2: TRUNCATE"]
        );
        assert!(!report.is_valid());
    }

    #[test]
    fn test_leading_zero_version_is_invalid() {
        let parser = sql_parser();
        let migration = parser
            .parse("V01__init.sql", "CREATE TABLE t (id INT);")
            .unwrap();
        assert_eq!(migration.version, "V01");

        let report = parser.validate(&migration);
        assert!(report
            .errors
            .iter()
            .any(|e| e.rule == ValidationRule::InvalidVersion));
    }

    #[test]
    fn test_keywords_in_literals_are_ignored() {
        let parser = sql_parser();
        let migration = parser
            .parse(
                "V6__notes.sql",
                "-- DROP TABLE users;\nINSERT INTO notes (body) VALUES ('please TRUNCATE nothing');",
            )
            .unwrap();
        assert!(parser.validate(&migration).is_valid());

        let migration = parser
            .parse("V7__select.sql", "SELECT 'CREATE TABLE x' AS text;")
            .unwrap();
        let report = parser.validate(&migration);
        assert!(report
            .errors
            .iter()
            .any(|e| e.rule == ValidationRule::MissingOperation));
    }

    #[test]
    fn test_drop_users_scenario() {
        let err = sql_parser()
            .parse_and_validate("V2__drop_users.sql", "DROP TABLE users;")
            .unwrap_err();
        match err {
            MigrationError::ParseValidationFailed { version, errors } => {
                assert_eq!(version, "V2");
                assert!(errors.has_rule(ValidationRule::DangerousOperation));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_literal_is_syntax_error() {
        let parser = sql_parser();
        let migration = parser
            .parse("V8__broken.sql", "INSERT INTO t VALUES ('oops);")
            .unwrap();
        let report = parser.validate(&migration);
        assert!(report
            .errors
            .iter()
            .any(|e| e.rule == ValidationRule::SyntaxError));
    }

    #[test]
    fn test_unparseable_statement_is_only_a_warning() {
        let parser = sql_parser();
        let migration = parser
            .parse("V9__odd.sql", "CREATE TABLE t (id INT) WITH SOMETHING STRANGE;")
            .unwrap();
        let report = parser.validate(&migration);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_document_validation() {
        let parser = document_parser();

        let migration = parser
            .parse(
                "V3__users.js",
                "db.createCollection(\"users\")\ndb.users.createIndex({\"email\": 1}, {\"unique\": true})",
            )
            .unwrap();
        assert!(parser.validate(&migration).is_valid());

        let migration = parser
            .parse("V4__wipe.js", "db.users.deleteMany({})\ndb.dropDatabase()")
            .unwrap();
        let report = parser.validate(&migration);
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|e| e.rule == ValidationRule::DangerousOperation));

        let migration = parser
            .parse("V5__broken.js", "db.users.insertOne({\"a\": })")
            .unwrap();
        let report = parser.validate(&migration);
        assert_eq!(report.errors[0].rule, ValidationRule::SyntaxError);
        assert!(report.errors[0].message.starts_with("line 1:"));

        let migration = parser.parse("V6__comments.js", "// nothing yet").unwrap();
        let report = parser.validate(&migration);
        assert_eq!(report.errors[0].rule, ValidationRule::MissingOperation);
    }

    #[test]
    fn test_parser_for_target() {
        assert_eq!(
            parser_for(TargetType::Sql).unwrap().target_type(),
            TargetType::Sql
        );
        assert_eq!(
            parser_for(TargetType::NoSql).unwrap().target_type(),
            TargetType::NoSql
        );
    }
}
