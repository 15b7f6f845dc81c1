// Named Parameter Compilation
// Rewrites `:name` placeholders into each driver's native positional syntax

use crate::db::traits::{DatabaseError, DatabaseType, Params, Result, SqlValue};

/// Native positional placeholder syntax of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?1`, `?2`, ... (SQLite)
    NumberedQuestion,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
    /// `?` in order of appearance (MySQL)
    Question,
    /// `@P1`, `@P2`, ... (SQL Server)
    AtP,
}

impl PlaceholderStyle {
    pub fn for_database(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::Sqlite => PlaceholderStyle::NumberedQuestion,
            DatabaseType::Postgresql => PlaceholderStyle::Dollar,
            DatabaseType::Mysql => PlaceholderStyle::Question,
            DatabaseType::Mssql => PlaceholderStyle::AtP,
        }
    }

    /// Numbered styles can refer to the same value twice
    fn is_numbered(self) -> bool {
        !matches!(self, PlaceholderStyle::Question)
    }

    fn render(self, index: usize, out: &mut String) {
        match self {
            PlaceholderStyle::NumberedQuestion => {
                out.push('?');
                out.push_str(&index.to_string());
            }
            PlaceholderStyle::Dollar => {
                out.push('$');
                out.push_str(&index.to_string());
            }
            PlaceholderStyle::Question => out.push('?'),
            PlaceholderStyle::AtP => {
                out.push_str("@P");
                out.push_str(&index.to_string());
            }
        }
    }
}

/// A statement ready for a driver: native SQL plus values in bind order
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub values: Vec<SqlValue>,
    /// Parameter name for each entry of `values`
    pub names: Vec<String>,
}

/// Compile `template` for a driver.
///
/// Placeholders inside string literals, quoted identifiers and comments are
/// left alone, as is the PostgreSQL `::type` cast. That covers PostgreSQL
/// `E'...'` and `$tag$...$tag$` strings and MySQL `#` comments. Every
/// placeholder must have a value in `params`; extra entries in `params` are
/// ignored.
pub fn compile(template: &str, params: &Params, style: PlaceholderStyle) -> Result<CompiledQuery> {
    let bytes = template.as_bytes();
    let len = bytes.len();
    let backslash_escapes = style == PlaceholderStyle::Question;
    let dollar_quotes = style == PlaceholderStyle::Dollar;

    let mut sql = String::with_capacity(len + 8);
    let mut values = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut last = 0;
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'\'' if dollar_quotes && is_escape_string_prefix(bytes, i) => {
                i = skip_quoted(bytes, i, b'\'', true)
            }
            b'\'' | b'"' => i = skip_quoted(bytes, i, bytes[i], backslash_escapes),
            b'`' => i = skip_quoted(bytes, i, b'`', false),
            b'$' if dollar_quotes => i = skip_dollar_quoted(bytes, i).unwrap_or(i + 1),
            b'#' if style == PlaceholderStyle::Question => i = skip_line(bytes, i),
            b'[' if style == PlaceholderStyle::AtP => i = skip_quoted(bytes, i, b']', false),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = template[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .unwrap_or(len);
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if is_placeholder_start(bytes, i) => {
                let start = i + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|&b| !is_ident_char(b))
                    .map(|p| start + p)
                    .unwrap_or(len);
                let name = &template[start..end];
                let value = params.get(name).ok_or_else(|| {
                    DatabaseError::query_message(format!(
                        "A value is required for bind parameter '{}'",
                        name
                    ))
                })?;

                sql.push_str(&template[last..i]);
                let existing = if style.is_numbered() {
                    names.iter().position(|n| n == name)
                } else {
                    None
                };
                let index = match existing {
                    Some(pos) => pos + 1,
                    None => {
                        names.push(name.to_string());
                        values.push(value.clone());
                        names.len()
                    }
                };
                style.render(index, &mut sql);

                last = end;
                i = end;
            }
            _ => i += 1,
        }
    }
    sql.push_str(&template[last..]);

    Ok(CompiledQuery { sql, values, names })
}

/// Whether a statement is expected to produce a result set.
///
/// Used by drivers that must pick between a row-returning and a
/// rows-affected call before running the statement. Procedure calls count
/// as row-returning, as do DML statements with `RETURNING` or `OUTPUT`.
pub fn returns_rows(sql: &str) -> bool {
    let keyword: String = strip_leading_noise(sql)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();

    match keyword.as_str() {
        "select" | "with" | "show" | "describe" | "desc" | "explain" | "values" | "table" | "pragma"
        | "exec" | "execute" | "call" => true,
        "insert" | "update" | "delete" | "merge" | "replace" => code_words(sql)
            .any(|word| word.eq_ignore_ascii_case("returning") || word.eq_ignore_ascii_case("output")),
        _ => false,
    }
}

/// Log a statement about to run. Bound values are never logged.
pub(crate) fn trace_statement(echo: bool, connection_id: &str, sql: &str) {
    if echo {
        tracing::info!(connection_id, sql, "Executing statement");
    } else {
        tracing::debug!(connection_id, sql, "Executing statement");
    }
}

fn strip_leading_noise(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(comment) = trimmed.strip_prefix("--") {
            rest = comment.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(comment) = trimmed.strip_prefix("/*") {
            rest = comment.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return trimmed;
        }
    }
}

/// Bare words of a statement, skipping literals, quoted identifiers and comments
fn code_words(sql: &str) -> impl Iterator<Item = &str> {
    let bytes = sql.as_bytes();
    let mut i = 0;
    std::iter::from_fn(move || {
        while i < bytes.len() {
            match bytes[i] {
                b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i, bytes[i], false),
                b'[' => i = skip_quoted(bytes, i, b']', false),
                b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line(bytes, i),
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = sql[i + 2..].find("*/").map(|p| i + 2 + p + 2).unwrap_or(bytes.len());
                }
                b if is_ident_char(b) => {
                    let start = i;
                    while i < bytes.len() && is_ident_char(bytes[i]) {
                        i += 1;
                    }
                    return Some(&sql[start..i]);
                }
                _ => i += 1,
            }
        }
        None
    })
}

/// Index just past the end of the line starting at `start`
fn skip_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| start + p + 1)
        .unwrap_or(bytes.len())
}

/// `E'...'` / `e'...'` where the `E` is not the tail of a longer word
fn is_escape_string_prefix(bytes: &[u8], quote: usize) -> bool {
    quote > 0
        && matches!(bytes[quote - 1], b'E' | b'e')
        && (quote < 2 || !is_ident_char(bytes[quote - 2]))
}

/// Skip a `$$...$$` or `$tag$...$tag$` body. `None` when `start` does not open one.
fn skip_dollar_quoted(bytes: &[u8], start: usize) -> Option<usize> {
    if start > 0 && is_ident_char(bytes[start - 1]) {
        return None;
    }
    let tag_end = bytes[start + 1..]
        .iter()
        .position(|&b| !is_ident_char(b))
        .map(|p| start + 1 + p)?;
    let tag_is_valid = bytes[tag_end] == b'$'
        && bytes
            .get(start + 1)
            .map(|&b| b == b'$' || b.is_ascii_alphabetic() || b == b'_')
            .unwrap_or(false);
    if !tag_is_valid {
        return None;
    }

    let tag = &bytes[start..=tag_end];
    let body = tag_end + 1;
    let end = bytes[body..]
        .windows(tag.len())
        .position(|w| w == tag)
        .map(|p| body + p + tag.len())
        .unwrap_or(bytes.len());
    Some(end)
}

fn skip_quoted(bytes: &[u8], start: usize, close: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == close {
            // doubled quote is an escaped quote
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn is_placeholder_start(bytes: &[u8], colon: usize) -> bool {
    let preceded_by_word = colon > 0 && is_ident_char(bytes[colon - 1]);
    let followed_by_name = bytes
        .get(colon + 1)
        .map(|&b| b.is_ascii_alphabetic() || b == b'_')
        .unwrap_or(false);
    !preceded_by_word && followed_by_name
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
