//! Document migration scripts
//!
//! A script is a sequence of shell-style calls on `db`, separated by `;` or
//! newlines. Arguments are JSON values:
//!
//! ```text
//! // create the users collection
//! db.createCollection("users");
//! db.users.createIndex({"email": 1}, {"unique": true});
//! db.users.insertMany([{"email": "a@example.com"}, {"email": "b@example.com"}])
//! db.getCollection("audit-log").deleteMany({"level": "debug"})
//! ```
//!
//! Only the operations listed in [`DocumentOperation`] are accepted; anything
//! else is a syntax error, so no migration body is ever evaluated as code.

use serde_json::Value;
use tracing::debug;

use super::{Document, DocumentDatabase, DocumentStoreError, IndexOptions, Scope};

/// A whitelisted document operation
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOperation {
    CreateCollection {
        collection: String,
    },
    DropCollection {
        collection: String,
    },
    RenameCollection {
        collection: String,
        to: String,
    },
    CreateIndex {
        collection: String,
        keys: Document,
        options: IndexOptions,
    },
    DropIndex {
        collection: String,
        name: String,
    },
    Insert {
        collection: String,
        documents: Vec<Document>,
    },
    Update {
        collection: String,
        filter: Document,
        update: Document,
        scope: Scope,
        upsert: bool,
    },
    Delete {
        collection: String,
        filter: Document,
        scope: Scope,
    },
    DropDatabase,
}

impl DocumentOperation {
    /// Why the operation is destructive, if it is
    pub fn danger(&self) -> Option<String> {
        match self {
            DocumentOperation::DropDatabase => {
                Some("db.dropDatabase() removes every collection".to_string())
            }
            DocumentOperation::Delete {
                collection,
                filter,
                scope: Scope::Many,
            } if matches_everything(filter) => Some(format!(
                "deleting from '{}' without a selective filter removes every document",
                collection
            )),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            DocumentOperation::CreateCollection { collection } => {
                format!("createCollection({})", collection)
            }
            DocumentOperation::DropCollection { collection } => format!("{}.drop()", collection),
            DocumentOperation::RenameCollection { collection, to } => {
                format!("{}.renameCollection({})", collection, to)
            }
            DocumentOperation::CreateIndex { collection, .. } => {
                format!("{}.createIndex()", collection)
            }
            DocumentOperation::DropIndex { collection, name } => {
                format!("{}.dropIndex({})", collection, name)
            }
            DocumentOperation::Insert { collection, .. } => format!("{}.insert()", collection),
            DocumentOperation::Update { collection, .. } => format!("{}.update()", collection),
            DocumentOperation::Delete { collection, .. } => format!("{}.delete()", collection),
            DocumentOperation::DropDatabase => "dropDatabase()".to_string(),
        }
    }
}

/// Whether a filter selects every document of a collection
///
/// Covers `{}`, `$and` lists of such filters and `_id` existence checks.
fn matches_everything(filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition.as_array().is_some_and(|clauses| {
            clauses
                .iter()
                .all(|clause| clause.as_object().is_some_and(matches_everything))
        }),
        "_id" => condition.as_object().is_some_and(|operators| {
            !operators.is_empty()
                && operators
                    .iter()
                    .all(|(op, arg)| op == "$exists" && arg.as_bool() == Some(true))
        }),
        _ => false,
    })
}

/// One parsed statement with its starting line (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStatement {
    pub operation: DocumentOperation,
    pub line: usize,
}

/// A statement that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSyntaxError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ScriptSyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Outcome of a fully applied script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub affected: u64,
}

/// A script that stopped part way through
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFailure {
    /// Operations that completed before the failure
    pub applied: usize,
    /// 1-based position of the failing operation
    pub failed_at: usize,
    pub total: usize,
    pub line: usize,
    pub error: DocumentStoreError,
}

/// A parsed document migration body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentScript {
    statements: Vec<ScriptStatement>,
}

impl DocumentScript {
    /// Parse a script, collecting every syntax error
    pub fn parse(source: &str) -> Result<Self, Vec<ScriptSyntaxError>> {
        let mut statements = Vec::new();
        let mut errors = Vec::new();

        let (chunks, problem) = split_script(source);
        for chunk in chunks {
            match parse_statement(&chunk.text) {
                Ok(operation) => statements.push(ScriptStatement {
                    operation,
                    line: chunk.line,
                }),
                Err(message) => errors.push(ScriptSyntaxError {
                    line: chunk.line,
                    message,
                }),
            }
        }
        errors.extend(problem);

        if errors.is_empty() {
            Ok(Self { statements })
        } else {
            Err(errors)
        }
    }

    pub fn statements(&self) -> &[ScriptStatement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Destructive operations with their line numbers
    pub fn dangerous_operations(&self) -> Vec<(usize, String)> {
        self.statements
            .iter()
            .filter_map(|s| s.operation.danger().map(|reason| (s.line, reason)))
            .collect()
    }

    /// Apply every statement in order, stopping at the first failure
    pub async fn apply(&self, db: &dyn DocumentDatabase) -> Result<ApplyReport, ScriptFailure> {
        let total = self.statements.len();
        let mut report = ApplyReport::default();

        for (index, statement) in self.statements.iter().enumerate() {
            debug!(
                "Applying document operation {}/{}: {}",
                index + 1,
                total,
                statement.operation.describe()
            );

            match apply_operation(db, &statement.operation).await {
                Ok(affected) => {
                    report.applied += 1;
                    report.affected += affected;
                }
                Err(error) => {
                    return Err(ScriptFailure {
                        applied: index,
                        failed_at: index + 1,
                        total,
                        line: statement.line,
                        error,
                    })
                }
            }
        }

        Ok(report)
    }
}

async fn apply_operation(
    db: &dyn DocumentDatabase,
    operation: &DocumentOperation,
) -> Result<u64, DocumentStoreError> {
    match operation {
        DocumentOperation::CreateCollection { collection } => {
            db.create_collection(collection).await.map(|_| 0)
        }
        DocumentOperation::DropCollection { collection } => {
            db.drop_collection(collection).await.map(|_| 0)
        }
        DocumentOperation::RenameCollection { collection, to } => {
            db.rename_collection(collection, to).await.map(|_| 0)
        }
        DocumentOperation::CreateIndex {
            collection,
            keys,
            options,
        } => db.create_index(collection, keys, options).await.map(|_| 0),
        DocumentOperation::DropIndex { collection, name } => {
            db.drop_index(collection, name).await.map(|_| 0)
        }
        DocumentOperation::Insert {
            collection,
            documents,
        } => db.insert(collection, documents.clone()).await,
        DocumentOperation::Update {
            collection,
            filter,
            update,
            scope,
            upsert,
        } => db
            .update(collection, filter, update, *scope, *upsert)
            .await
            .map(|outcome| outcome.modified + u64::from(outcome.upserted)),
        DocumentOperation::Delete {
            collection,
            filter,
            scope,
        } => db.delete(collection, filter, *scope).await,
        DocumentOperation::DropDatabase => db.drop_database().await.map(|_| 0),
    }
}

struct Chunk {
    text: String,
    line: usize,
}

#[derive(Default)]
struct ChunkBuilder {
    chunks: Vec<Chunk>,
    current: String,
    line: usize,
}

impl ChunkBuilder {
    fn push(&mut self, c: char, line: usize) {
        if self.current.trim().is_empty() && !c.is_whitespace() {
            self.current.clear();
            self.line = line;
        }
        self.current.push(c);
    }

    fn ends_call(&self) -> bool {
        self.current.trim_end().ends_with(')')
    }

    fn flush(&mut self) {
        let text = self.current.trim();
        if !text.is_empty() {
            self.chunks.push(Chunk {
                text: text.to_string(),
                line: self.line,
            });
        }
        self.current.clear();
    }
}

/// Split a script into statement texts with comments removed
///
/// Statements end at `;` or at a line break that closes a call, unless the
/// next line continues the chain with `.`.
fn split_script(source: &str) -> (Vec<Chunk>, Option<ScriptSyntaxError>) {
    let chars: Vec<char> = source.chars().collect();
    let mut builder = ChunkBuilder::default();
    let mut line = 1;
    let mut depth: i64 = 0;
    let mut i = 0;

    let problem = |line: usize, message: &str| ScriptSyntaxError {
        line,
        message: message.to_string(),
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let opened_at = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => {
                            builder.flush();
                            return (
                                builder.chunks,
                                Some(problem(opened_at, "unterminated block comment")),
                            );
                        }
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some(ch) => {
                            if *ch == '\n' {
                                line += 1;
                            }
                            i += 1;
                        }
                    }
                }
                builder.push(' ', line);
                continue;
            }
            '"' | '\'' => {
                let opened_at = line;
                builder.push(c, line);
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            builder.flush();
                            return (
                                builder.chunks,
                                Some(problem(opened_at, "unterminated string literal")),
                            );
                        }
                        Some('\\') => {
                            builder.push('\\', line);
                            if let Some(escaped) = chars.get(i + 1) {
                                builder.push(*escaped, line);
                            }
                            i += 2;
                        }
                        Some(ch) => {
                            if *ch == '\n' {
                                line += 1;
                            }
                            builder.push(*ch, line);
                            i += 1;
                            if *ch == c {
                                break;
                            }
                        }
                    }
                }
                continue;
            }
            '(' | '[' | '{' => {
                depth += 1;
                builder.push(c, line);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    builder.flush();
                    return (builder.chunks, Some(problem(line, "unbalanced closing bracket")));
                }
                builder.push(c, line);
            }
            ';' if depth == 0 => builder.flush(),
            '\n' => {
                if depth == 0 && builder.ends_call() && !continues_chain(&chars[i + 1..]) {
                    builder.flush();
                } else {
                    builder.push(c, line);
                }
                line += 1;
            }
            _ => builder.push(c, line),
        }
        i += 1;
    }

    let unclosed = (depth > 0).then(|| problem(builder.line, "unclosed bracket at end of script"));
    builder.flush();
    (builder.chunks, unclosed)
}

fn continues_chain(rest: &[char]) -> bool {
    rest.iter().find(|c| !c.is_whitespace()) == Some(&'.')
}

fn parse_statement(text: &str) -> Result<DocumentOperation, String> {
    let rest = text.strip_prefix("db.").ok_or_else(|| {
        format!(
            "expected a statement starting with 'db.', found '{}'",
            preview(text)
        )
    })?;
    let (head, rest) = identifier(rest)?;

    match head {
        "createCollection" => {
            let (args, rest) = call(rest, head)?;
            finish(rest)?;
            arity(&args, 1, 1, head)?;
            Ok(DocumentOperation::CreateCollection {
                collection: string_arg(&args, 0, head)?,
            })
        }
        "dropDatabase" => {
            let (args, rest) = call(rest, head)?;
            finish(rest)?;
            arity(&args, 0, 0, head)?;
            Ok(DocumentOperation::DropDatabase)
        }
        "getCollection" => {
            let (args, rest) = call(rest, head)?;
            arity(&args, 1, 1, head)?;
            let collection = string_arg(&args, 0, head)?;
            collection_method(collection, member(rest)?)
        }
        collection => collection_method(collection.to_string(), member(rest)?),
    }
}

fn collection_method(collection: String, rest: &str) -> Result<DocumentOperation, String> {
    let (method, rest) = identifier(rest)?;
    let (args, rest) = call(rest, method)?;
    finish(rest)?;

    match method {
        "drop" => {
            arity(&args, 0, 0, method)?;
            Ok(DocumentOperation::DropCollection { collection })
        }
        "renameCollection" => {
            arity(&args, 1, 1, method)?;
            Ok(DocumentOperation::RenameCollection {
                collection,
                to: string_arg(&args, 0, method)?,
            })
        }
        "createIndex" => {
            arity(&args, 1, 2, method)?;
            let options = match args.get(1) {
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|e| format!("invalid options for {}: {}", method, e))?,
                None => IndexOptions::default(),
            };
            Ok(DocumentOperation::CreateIndex {
                collection,
                keys: object_arg(&args, 0, method)?,
                options,
            })
        }
        "dropIndex" => {
            arity(&args, 1, 1, method)?;
            Ok(DocumentOperation::DropIndex {
                collection,
                name: string_arg(&args, 0, method)?,
            })
        }
        "insertOne" => {
            arity(&args, 1, 1, method)?;
            Ok(DocumentOperation::Insert {
                collection,
                documents: vec![object_arg(&args, 0, method)?],
            })
        }
        "insertMany" => {
            arity(&args, 1, 1, method)?;
            let documents = args[0]
                .as_array()
                .ok_or_else(|| format!("{} expects an array of documents", method))?
                .iter()
                .map(|value| {
                    value
                        .as_object()
                        .cloned()
                        .ok_or_else(|| format!("{} expects an array of documents", method))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DocumentOperation::Insert {
                collection,
                documents,
            })
        }
        "updateOne" | "updateMany" => {
            arity(&args, 2, 3, method)?;
            let upsert = match args.get(2) {
                Some(options) => options
                    .get("upsert")
                    .map(|v| v.as_bool().ok_or_else(|| "upsert must be a boolean".to_string()))
                    .transpose()?
                    .unwrap_or(false),
                None => false,
            };
            let update = object_arg(&args, 1, method)?;
            super::query::validate_update(&update).map_err(|e| e.to_string())?;
            Ok(DocumentOperation::Update {
                collection,
                filter: object_arg(&args, 0, method)?,
                update,
                scope: if method == "updateOne" {
                    Scope::One
                } else {
                    Scope::Many
                },
                upsert,
            })
        }
        "deleteOne" => {
            arity(&args, 1, 1, method)?;
            Ok(DocumentOperation::Delete {
                collection,
                filter: object_arg(&args, 0, method)?,
                scope: Scope::One,
            })
        }
        "deleteMany" | "remove" => {
            arity(&args, 0, 1, method)?;
            let filter = match args.first() {
                Some(_) => object_arg(&args, 0, method)?,
                None => Document::new(),
            };
            Ok(DocumentOperation::Delete {
                collection,
                filter,
                scope: Scope::Many,
            })
        }
        other => Err(format!("unsupported operation '{}'", other)),
    }
}

fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() > 40 {
        format!("{}...", first_line.chars().take(40).collect::<String>())
    } else {
        first_line.to_string()
    }
}

fn identifier(text: &str) -> Result<(&str, &str), String> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$'))
        .map(|(index, _)| index)
        .unwrap_or(text.len());

    if end == 0 {
        return Err(format!("expected a name, found '{}'", preview(text)));
    }
    Ok(text.split_at(end))
}

fn member(text: &str) -> Result<&str, String> {
    text.trim_start()
        .strip_prefix('.')
        .ok_or_else(|| format!("expected '.', found '{}'", preview(text.trim_start())))
}

fn finish(rest: &str) -> Result<(), String> {
    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(format!("unexpected input '{}'", preview(rest.trim())))
    }
}

/// Parse a parenthesised JSON argument list; returns the arguments and the remainder
fn call<'a>(text: &'a str, method: &str) -> Result<(Vec<Value>, &'a str), String> {
    let text = text.trim_start();
    if !text.starts_with('(') {
        return Err(format!("expected '(' after {}", method));
    }

    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut close = None;

    for (index, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if c != ')' {
                        return Err(format!("mismatched brackets in {} arguments", method));
                    }
                    close = Some(index);
                    break;
                }
            }
            _ => {}
        }
    }

    let close = close.ok_or_else(|| format!("missing ')' after {} arguments", method))?;
    let inner = &text[1..close];
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str::<Vec<Value>>(&format!("[{}]", inner))
            .map_err(|e| format!("invalid JSON arguments to {}: {}", method, e))?
    };

    Ok((args, &text[close + 1..]))
}

fn arity(args: &[Value], min: usize, max: usize, method: &str) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(format!(
            "{} expects {} argument(s), got {}",
            method,
            expected,
            args.len()
        ));
    }
    Ok(())
}

fn string_arg(args: &[Value], index: usize, method: &str) -> Result<String, String> {
    match args.get(index) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(format!(
            "{} expects a non-empty string as argument {}",
            method,
            index + 1
        )),
    }
}

fn object_arg(args: &[Value], index: usize, method: &str) -> Result<Document, String> {
    match args.get(index) {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(format!(
            "{} expects an object as argument {}",
            method,
            index + 1
        )),
    }
}
