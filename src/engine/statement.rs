//! Lightweight SQL classification on top of `sqlparser`.
//!
//! Statements the parser does not understand are classified by their
//! leading keyword; the server remains the authority on validity.

use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

const ROW_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "TABLE", "SHOW", "EXPLAIN", "FETCH"];
const QUERY_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "TABLE"];

fn parse(sql: &str) -> Option<Vec<Statement>> {
    Parser::parse_sql(&PostgreSqlDialect {}, sql.trim()).ok()
}

/// Removes trailing semicolons and whitespace.
pub fn strip_trailing_semicolons(sql: &str) -> &str {
    sql.trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// True when the text is exactly one query statement (`SELECT`, `WITH`,
/// `VALUES`, `TABLE`). Cursors can only be declared over these.
///
/// Text the parser rejects is judged by its leading keyword and left to the
/// server's `DECLARE` to refuse.
pub fn is_single_query(sql: &str) -> bool {
    match parse(sql) {
        Some(statements) => {
            statements.len() == 1 && matches!(statements[0], Statement::Query(_))
        }
        None => leading_keyword(sql)
            .map(|keyword| QUERY_KEYWORDS.contains(&keyword.as_str()))
            .unwrap_or(false),
    }
}

/// Number of statements in the text, if it parses.
pub fn statement_count(sql: &str) -> Option<usize> {
    parse(sql).map(|statements| statements.len())
}

/// True when the last statement of the text produces a result set.
pub fn returns_rows(sql: &str) -> bool {
    match parse(sql).and_then(|mut statements| statements.pop()) {
        Some(statement) => statement_returns_rows(&statement),
        None => leading_keyword(sql)
            .map(|keyword| ROW_KEYWORDS.contains(&keyword.as_str()))
            .unwrap_or(false),
    }
}

fn statement_returns_rows(statement: &Statement) -> bool {
    match statement {
        Statement::Query(_)
        | Statement::Explain { .. }
        | Statement::ExplainTable { .. }
        | Statement::ShowVariable { .. }
        | Statement::Fetch { .. } => true,
        Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. } => {
            statement.to_string().to_ascii_uppercase().contains(" RETURNING ")
        }
        _ => false,
    }
}

fn leading_keyword(sql: &str) -> Option<String> {
    let trimmed = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    trimmed
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .filter(|word| !word.is_empty())
        .map(|word| word.to_ascii_uppercase())
}
