//! SQL statement scanner
//!
//! Splits a raw migration body into individually executable statements. A
//! statement boundary is a `;` seen at parenthesis depth 0 and outside any
//! quoted region or comment. Recognized regions:
//!
//! - `'...'` string literals, with `''` as an escaped quote
//! - `"..."` quoted identifiers, with `""` as an escaped quote
//! - `$$...$$` and `$tag$...$tag$` dollar-quoted bodies
//! - `-- ...` line comments and nested `/* ... */` block comments
//!
//! Inside `CREATE TRIGGER` statements, `;` between `BEGIN` and the matching
//! `END` does not end the statement, so SQLite trigger bodies stay whole.
//!
//! The same pass produces a code-only view of the body which keyword checks
//! run against. String literals, quoted identifiers and comments are blanked
//! in that view. Dollar-quoted bodies are executable code and stay verbatim.

/// A single statement extracted from a migration body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    /// Statement text without the terminating semicolon, trimmed
    pub text: String,
    /// 1-based line the statement starts on
    pub line: usize,
}

/// Full result of scanning a body
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub statements: Vec<SqlStatement>,
    /// Body with string literal contents collapsed and comments replaced by
    /// spaces; dollar-quoted bodies are kept
    pub code: String,
    /// Structural problems (unterminated regions, unbalanced parentheses)
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    Normal,
    SingleQuoted { line: usize },
    DoubleQuoted { line: usize },
    DollarQuoted { tag: String, line: usize },
    LineComment,
    BlockComment { depth: usize, line: usize },
}

/// Split a body into executable statements
pub fn split_statements(sql: &str) -> Vec<SqlStatement> {
    scan(sql).statements
}

/// Scan a body, producing statements, the code-only view and any problems
pub fn scan(sql: &str) -> ScanOutput {
    StatementScanner::new(sql).run()
}

struct StatementScanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    state: ScanState,
    paren_depth: usize,
    current: String,
    current_has_code: bool,
    current_start_line: usize,
    /// Offset into `output.code` where the current statement begins
    statement_code_start: usize,
    output: ScanOutput,
}

impl StatementScanner {
    fn new(sql: &str) -> Self {
        Self {
            chars: sql.chars().collect(),
            pos: 0,
            line: 1,
            state: ScanState::Normal,
            paren_depth: 0,
            current: String::new(),
            current_has_code: false,
            current_start_line: 1,
            statement_code_start: 0,
            output: ScanOutput::default(),
        }
    }

    fn run(mut self) -> ScanOutput {
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            let next = self.chars.get(self.pos + 1).copied();

            match self.state.clone() {
                ScanState::Normal => self.scan_normal(c, next),
                ScanState::SingleQuoted { .. } => self.scan_quoted(c, next, '\''),
                ScanState::DoubleQuoted { .. } => self.scan_quoted(c, next, '"'),
                ScanState::DollarQuoted { tag, .. } => self.scan_dollar(c, &tag),
                ScanState::LineComment => {
                    if c == '\n' {
                        self.state = ScanState::Normal;
                        self.output.code.push('\n');
                    }
                    self.take(c);
                }
                ScanState::BlockComment { depth, line } => {
                    if c == '*' && next == Some('/') {
                        self.take_n(2);
                        self.state = if depth > 1 {
                            ScanState::BlockComment {
                                depth: depth - 1,
                                line,
                            }
                        } else {
                            ScanState::Normal
                        };
                        self.output.code.push(' ');
                    } else if c == '/' && next == Some('*') {
                        self.take_n(2);
                        self.state = ScanState::BlockComment {
                            depth: depth + 1,
                            line,
                        };
                    } else {
                        if c == '\n' {
                            self.output.code.push('\n');
                        }
                        self.take(c);
                    }
                }
            }
        }

        self.finish()
    }

    fn scan_normal(&mut self, c: char, next: Option<char>) {
        match c {
            '\'' => {
                self.state = ScanState::SingleQuoted { line: self.line };
                self.mark_code();
                self.output.code.push('\'');
                self.take(c);
            }
            '"' => {
                self.state = ScanState::DoubleQuoted { line: self.line };
                self.mark_code();
                self.output.code.push('"');
                self.take(c);
            }
            '-' if next == Some('-') => {
                self.state = ScanState::LineComment;
                self.output.code.push(' ');
                self.take_n(2);
            }
            '/' if next == Some('*') => {
                self.state = ScanState::BlockComment {
                    depth: 1,
                    line: self.line,
                };
                self.output.code.push(' ');
                self.take_n(2);
            }
            '$' => match self.dollar_tag_at(self.pos) {
                Some(tag) => {
                    self.mark_code();
                    self.output.code.push_str(&tag);
                    let len = tag.chars().count();
                    self.state = ScanState::DollarQuoted {
                        tag,
                        line: self.line,
                    };
                    self.take_n(len);
                }
                None => {
                    self.mark_code();
                    self.output.code.push(c);
                    self.take(c);
                }
            },
            '(' => {
                self.paren_depth += 1;
                self.mark_code();
                self.output.code.push(c);
                self.take(c);
            }
            ')' => {
                if self.paren_depth == 0 {
                    self.output
                        .problems
                        .push(format!("Unbalanced ')' on line {}", self.line));
                } else {
                    self.paren_depth -= 1;
                }
                self.mark_code();
                self.output.code.push(c);
                self.take(c);
            }
            ';' if self.paren_depth == 0 => {
                let open_block = open_trigger_block(&self.output.code[self.statement_code_start..]);
                self.output.code.push(c);
                if open_block {
                    self.take(c);
                } else {
                    self.pos += 1;
                    self.end_statement();
                }
            }
            _ => {
                if !c.is_whitespace() {
                    self.mark_code();
                }
                self.output.code.push(c);
                self.take(c);
            }
        }
    }

    fn scan_quoted(&mut self, c: char, next: Option<char>, quote: char) {
        if c == quote {
            if next == Some(quote) {
                self.take_n(2);
            } else {
                self.output.code.push(quote);
                self.state = ScanState::Normal;
                self.take(c);
            }
        } else {
            if c == '\n' {
                self.output.code.push('\n');
            }
            self.take(c);
        }
    }

    fn scan_dollar(&mut self, c: char, tag: &str) {
        if c == '$' && self.starts_with_at(self.pos, tag) {
            self.output.code.push_str(tag);
            self.state = ScanState::Normal;
            self.take_n(tag.chars().count());
        } else {
            self.output.code.push(c);
            self.take(c);
        }
    }

    /// `$$` or `$ident$` starting at `pos`; `$1` style parameters are not tags
    fn dollar_tag_at(&self, pos: usize) -> Option<String> {
        let mut tag = String::from('$');
        let mut i = pos + 1;
        while let Some(&c) = self.chars.get(i) {
            if c == '$' {
                tag.push('$');
                return Some(tag);
            }
            let valid = if i == pos + 1 {
                c.is_alphabetic() || c == '_'
            } else {
                c.is_alphanumeric() || c == '_'
            };
            if !valid {
                return None;
            }
            tag.push(c);
            i += 1;
        }
        None
    }

    fn starts_with_at(&self, pos: usize, needle: &str) -> bool {
        needle
            .chars()
            .enumerate()
            .all(|(offset, expected)| self.chars.get(pos + offset) == Some(&expected))
    }

    fn mark_code(&mut self) {
        if !self.current_has_code {
            self.current_has_code = true;
            self.current_start_line = self.line;
        }
    }

    fn take(&mut self, c: char) {
        self.current.push(c);
        if c == '\n' {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn take_n(&mut self, n: usize) {
        for _ in 0..n {
            if let Some(&c) = self.chars.get(self.pos) {
                self.take(c);
            }
        }
    }

    fn end_statement(&mut self) {
        let text = std::mem::take(&mut self.current);
        if self.current_has_code {
            self.output.statements.push(SqlStatement {
                text: text.trim().to_string(),
                line: self.current_start_line,
            });
        }
        self.current_has_code = false;
        self.statement_code_start = self.output.code.len();
    }

    fn finish(mut self) -> ScanOutput {
        match &self.state {
            ScanState::SingleQuoted { line } => self
                .output
                .problems
                .push(format!("Unterminated string literal starting on line {}", line)),
            ScanState::DoubleQuoted { line } => self
                .output
                .problems
                .push(format!("Unterminated quoted identifier starting on line {}", line)),
            ScanState::DollarQuoted { tag, line } => self.output.problems.push(format!(
                "Unterminated dollar-quoted body {} starting on line {}",
                tag, line
            )),
            ScanState::BlockComment { line, .. } => self
                .output
                .problems
                .push(format!("Unterminated block comment starting on line {}", line)),
            ScanState::Normal | ScanState::LineComment => {}
        }

        if self.paren_depth > 0 {
            self.output
                .problems
                .push(format!("{} unclosed '(' at end of body", self.paren_depth));
        }

        self.end_statement();
        self.output
    }
}

/// Whether `code` is a `CREATE TRIGGER` statement with an unclosed `BEGIN`
fn open_trigger_block(code: &str) -> bool {
    let words: Vec<String> = code
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_uppercase)
        .collect();

    let trigger_at = match words.get(1).map(String::as_str) {
        Some("TEMP") | Some("TEMPORARY") => 2,
        _ => 1,
    };
    if words.first().map(String::as_str) != Some("CREATE")
        || words.get(trigger_at).map(String::as_str) != Some("TRIGGER")
    {
        return false;
    }

    let mut depth = 0usize;
    for word in &words[trigger_at + 1..] {
        match word.as_str() {
            "BEGIN" | "CASE" => depth += 1,
            "END" => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(sql: &str) -> Vec<String> {
        split_statements(sql).into_iter().map(|s| s.text).collect()
    }

    #[test]
    fn test_splits_simple_statements() {
        let statements = texts("CREATE TABLE a (id INT);\nINSERT INTO a VALUES (1);\n");
        assert_eq!(
            statements,
            vec!["CREATE TABLE a (id INT)", "INSERT INTO a VALUES (1)"]
        );
    }

    #[test]
    fn test_semicolon_inside_string_is_not_a_boundary() {
        let statements = texts("INSERT INTO t VALUES ('a;b');");
        assert_eq!(statements, vec!["INSERT INTO t VALUES ('a;b')"]);
    }

    #[test]
    fn test_escaped_quotes_stay_inside_string() {
        let statements = texts("INSERT INTO t VALUES ('it''s; fine'); SELECT 1;");
        assert_eq!(
            statements,
            vec!["INSERT INTO t VALUES ('it''s; fine')", "SELECT 1"]
        );
    }

    #[test]
    fn test_double_quoted_identifier() {
        let statements = texts(r#"CREATE TABLE "odd;name" (id INT); SELECT 1;"#);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], r#"CREATE TABLE "odd;name" (id INT)"#);
    }

    #[test]
    fn test_dollar_quoted_function_body() {
        let sql = "CREATE FUNCTION touch() RETURNS trigger AS $$\n\
                   BEGIN\n  NEW.updated_at = now();\n  RETURN NEW;\nEND;\n\
                   $$ LANGUAGE plpgsql;";
        let statements = texts(sql);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].ends_with("LANGUAGE plpgsql"));
    }

    #[test]
    fn test_tagged_dollar_quote_with_nested_plain_dollars() {
        let sql = "DO $body$ BEGIN PERFORM '$$;'; END $body$; SELECT 2;";
        assert_eq!(
            texts(sql),
            vec!["DO $body$ BEGIN PERFORM '$$;'; END $body$", "SELECT 2"]
        );
    }

    #[test]
    fn test_positional_parameters_are_not_dollar_quotes() {
        let sql = "PREPARE q AS SELECT $1; SELECT 3;";
        assert_eq!(texts(sql), vec!["PREPARE q AS SELECT $1", "SELECT 3"]);
    }

    #[test]
    fn test_semicolon_inside_parentheses_is_not_a_boundary() {
        let sql = "SELECT coalesce((SELECT max(id) FROM a), 0); SELECT 1;";
        assert_eq!(texts(sql).len(), 2);

        let nested = "CALL p((1; 2)); SELECT 1;";
        assert_eq!(texts(nested), vec!["CALL p((1; 2))", "SELECT 1"]);
    }

    #[test]
    fn test_comments_are_not_boundaries_and_comment_only_fragments_are_dropped() {
        let sql = "-- leading; comment\nCREATE TABLE a (id INT); /* block; */\n-- trailing;";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].line, 2);
        assert!(statements[0].text.contains("CREATE TABLE a"));
    }

    #[test]
    fn test_nested_block_comments() {
        let sql = "/* outer /* inner; */ still comment; */ SELECT 1;";
        assert_eq!(texts(sql), vec!["/* outer /* inner; */ still comment; */ SELECT 1"]);
    }

    #[test]
    fn test_final_statement_without_semicolon() {
        assert_eq!(texts("SELECT 1;\nSELECT 2"), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_blank_input() {
        assert!(split_statements("   \n ;; \n").is_empty());
    }

    #[test]
    fn test_statement_lines() {
        let statements = split_statements("SELECT 1;\n\n\nSELECT 2;");
        assert_eq!(statements[0].line, 1);
        assert_eq!(statements[1].line, 4);
    }

    #[test]
    fn test_code_view_hides_literals_and_comments() {
        let output = scan("INSERT INTO t VALUES ('DROP TABLE x'); -- TRUNCATE y\nSELECT 1;");
        assert!(!output.code.contains("DROP TABLE x"));
        assert!(!output.code.contains("TRUNCATE"));
        assert!(output.code.contains("INSERT INTO t VALUES"));
    }

    #[test]
    fn test_code_view_keeps_dollar_quoted_bodies() {
        let output = scan("DO $$ BEGIN TRUNCATE audit; END $$; SELECT 'TRUNCATE';");
        assert!(output.code.contains("$$ BEGIN TRUNCATE audit; END $$"));
        assert_eq!(output.code.matches("TRUNCATE").count(), 1);
    }

    #[test]
    fn test_trigger_body_stays_one_statement() {
        let sql = "CREATE TRIGGER accounts_audit AFTER INSERT ON accounts\n\
                   BEGIN\n  INSERT INTO audit VALUES (NEW.id, 'begin; end');\n  \
                   UPDATE accounts SET seen = CASE WHEN NEW.id > 0 THEN 1 ELSE 0 END;\n\
                   END;\nSELECT 1;";
        let statements = texts(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TRIGGER accounts_audit"));
        assert!(statements[0].ends_with("END"));
        assert_eq!(statements[1], "SELECT 1");
    }

    #[test]
    fn test_begin_outside_trigger_still_splits() {
        assert_eq!(
            texts("BEGIN; CREATE TEMP TRIGGER t AFTER DELETE ON a BEGIN DELETE FROM b; END; COMMIT;"),
            vec![
                "BEGIN",
                "CREATE TEMP TRIGGER t AFTER DELETE ON a BEGIN DELETE FROM b; END",
                "COMMIT"
            ]
        );
    }

    #[test]
    fn test_reports_structural_problems() {
        assert!(!scan("SELECT 'open;").problems.is_empty());
        assert!(!scan("SELECT $$ never closed").problems.is_empty());
        assert!(!scan("SELECT (1;").problems.is_empty());
        assert!(!scan("SELECT 1);").problems.is_empty());
        assert!(!scan("/* open").problems.is_empty());
        assert!(scan("SELECT 1;").problems.is_empty());
    }
}
