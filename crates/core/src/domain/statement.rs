use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of a SQL statement, ordered from least to most sensitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Schema,
    Other,
}

impl StatementKind {
    /// Classifies every statement in `sql` and returns the most sensitive kind found.
    pub fn classify(sql: &str) -> Self {
        split_statements(sql)
            .iter()
            .map(|statement| classify_single(statement))
            .max()
            .unwrap_or(Self::Other)
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Select)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Schema => "schema",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn classify_single(statement: &str) -> StatementKind {
    let tokens = statement
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '='))
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_uppercase)
        .collect::<Vec<_>>();

    let Some(first) = tokens.first() else {
        return StatementKind::Other;
    };

    match first.as_str() {
        "SELECT" | "VALUES" | "EXPLAIN" => StatementKind::Select,
        "WITH" => {
            // A CTE may front a DML statement.
            if tokens.iter().any(|token| token == "DELETE") {
                StatementKind::Delete
            } else if tokens.iter().any(|token| token == "UPDATE" || token == "REPLACE") {
                StatementKind::Update
            } else if tokens.iter().any(|token| token == "INSERT") {
                StatementKind::Insert
            } else {
                StatementKind::Select
            }
        }
        "INSERT" => {
            if tokens.get(1).map(String::as_str) == Some("OR")
                && tokens.get(2).map(String::as_str) == Some("REPLACE")
            {
                StatementKind::Update
            } else {
                StatementKind::Insert
            }
        }
        "UPDATE" | "REPLACE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "CREATE" | "ALTER" | "DROP" => StatementKind::Schema,
        "PRAGMA" if pragma_is_read_only(statement) => StatementKind::Select,
        _ => StatementKind::Other,
    }
}

/// Pragmas that take a table or index argument and only report on it.
const INTROSPECTION_PRAGMAS: &[&str] = &[
    "TABLE_INFO",
    "TABLE_XINFO",
    "TABLE_LIST",
    "INDEX_LIST",
    "INDEX_INFO",
    "INDEX_XINFO",
    "FOREIGN_KEY_LIST",
    "FOREIGN_KEY_CHECK",
    "INTEGRITY_CHECK",
    "QUICK_CHECK",
];

/// Pragmas that act on the database even without an argument.
const ACTION_PRAGMAS: &[&str] =
    &["OPTIMIZE", "SHRINK_MEMORY", "INCREMENTAL_VACUUM", "WAL_CHECKPOINT"];

/// `PRAGMA name(value)` sets a value just like `PRAGMA name = value`, so only a bare
/// query or an introspection pragma counts as a read.
fn pragma_is_read_only(statement: &str) -> bool {
    if statement.contains('=') {
        return false;
    }
    let verb_end = statement.to_ascii_uppercase().find("PRAGMA").map_or(0, |start| start + 6);
    let body = statement[verb_end..].trim_start();
    let name_end = body.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'));
    let (qualified, rest) = body.split_at(name_end.unwrap_or(body.len()));
    let name = qualified.rsplit('.').next().unwrap_or(qualified).to_ascii_uppercase();
    let has_argument = !rest.trim().is_empty();

    if INTROSPECTION_PRAGMAS.contains(&name.as_str()) {
        return true;
    }
    !has_argument && !ACTION_PRAGMAS.contains(&name.as_str())
}

/// Splits `sql` into trimmed, non-empty statements with comments removed.
///
/// Quoted spans (`'..'`, `"..."`, backticks, `[..]`) are kept verbatim, so a `;` or
/// `--` inside a literal neither ends a statement nor starts a comment.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' | '[' => {
                let close = if ch == '[' { ']' } else { ch };
                current.push(ch);
                while let Some(next) = chars.next() {
                    current.push(next);
                    if next == close {
                        // SQL escapes a quote by doubling it.
                        if close != ']' && chars.peek() == Some(&close) {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
                current.push(' ');
            }
            ';' => push_statement(&mut statements, &mut current),
            other => current.push(other),
        }
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::{split_statements, StatementKind};

    #[test]
    fn classifies_plain_statements() {
        assert_eq!(StatementKind::classify("SELECT * FROM customers"), StatementKind::Select);
        assert_eq!(
            StatementKind::classify("insert into leads (name, email) values ('a', 'b')"),
            StatementKind::Insert
        );
        assert_eq!(
            StatementKind::classify("UPDATE invoices SET status = 'paid' WHERE id = 2"),
            StatementKind::Update
        );
        assert_eq!(StatementKind::classify("DELETE FROM payments"), StatementKind::Delete);
        assert_eq!(StatementKind::classify("DROP TABLE customers"), StatementKind::Schema);
        assert_eq!(StatementKind::classify("VACUUM"), StatementKind::Other);
        assert_eq!(StatementKind::classify("   "), StatementKind::Other);
    }

    #[test]
    fn leading_comments_do_not_hide_the_verb() {
        let sql = "-- cleanup\n/* staged */ DELETE FROM leads WHERE status = 'lost'";
        assert_eq!(StatementKind::classify(sql), StatementKind::Delete);
    }

    #[test]
    fn stacked_statements_report_the_most_sensitive_kind() {
        let sql = "SELECT 1; DROP TABLE orders;";
        assert_eq!(StatementKind::classify(sql), StatementKind::Schema);
        assert!(!StatementKind::classify(sql).is_read_only());
    }

    #[test]
    fn ctes_fronting_dml_are_not_read_only() {
        let read = "WITH recent AS (SELECT * FROM orders) SELECT COUNT(*) FROM recent";
        assert_eq!(StatementKind::classify(read), StatementKind::Select);

        let write = "WITH stale AS (SELECT id FROM leads) DELETE FROM leads WHERE id IN stale";
        assert_eq!(StatementKind::classify(write), StatementKind::Delete);
    }

    #[test]
    fn pragma_reads_are_select_but_assignments_are_not() {
        assert_eq!(StatementKind::classify("PRAGMA table_info(products)"), StatementKind::Select);
        assert_eq!(StatementKind::classify("PRAGMA foreign_keys = OFF"), StatementKind::Other);
        assert_eq!(StatementKind::classify("PRAGMA foreign_keys"), StatementKind::Select);
        assert_eq!(StatementKind::classify("PRAGMA main.index_list(orders)"), StatementKind::Select);
        assert_eq!(
            StatementKind::classify("INSERT OR REPLACE INTO stock VALUES (1, 'main', 5, 2)"),
            StatementKind::Update
        );
    }

    #[test]
    fn pragma_call_syntax_is_treated_as_an_assignment() {
        assert_eq!(StatementKind::classify("PRAGMA foreign_keys(OFF)"), StatementKind::Other);
        assert_eq!(StatementKind::classify("pragma journal_mode (DELETE)"), StatementKind::Other);
        assert_eq!(StatementKind::classify("PRAGMA wal_checkpoint"), StatementKind::Other);
        assert_eq!(StatementKind::classify("PRAGMA optimize"), StatementKind::Other);
    }

    #[test]
    fn comment_markers_inside_literals_do_not_swallow_statements() {
        let sql = "SELECT '--'; DELETE FROM leads";
        assert_eq!(split_statements(sql), vec!["SELECT '--'", "DELETE FROM leads"]);
        assert_eq!(StatementKind::classify(sql), StatementKind::Delete);

        let sql = "SELECT '/*' AS a; DROP TABLE orders; SELECT '*/'";
        assert_eq!(split_statements(sql).len(), 3);
        assert_eq!(StatementKind::classify(sql), StatementKind::Schema);
    }

    #[test]
    fn semicolons_inside_literals_stay_in_one_statement() {
        let sql = "SELECT 'a;b', \"x;y\", [c;d] FROM leads WHERE note = 'it''s; fine'; -- trailing";
        assert_eq!(split_statements(sql).len(), 1);
        assert_eq!(StatementKind::classify(sql), StatementKind::Select);
    }
}
