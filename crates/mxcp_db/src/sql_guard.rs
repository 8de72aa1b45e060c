//! Read-only statement guard.
//!
//! Enforced when the active profile is read-only: one statement, opening
//! with a query verb, with no write verb anywhere in it. The check runs
//! as a single pass over the statement text; string literals, quoted
//! identifiers, and comments are consumed by the scanner and never
//! surface as words, so quoted text cannot trip the verb check.

use crate::error::{DbError, Result};

/// What a bare word means to the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    /// May open a read-only statement.
    Query,
    /// Mutates data, schema, or engine state; never allowed.
    Write,
    /// Anything else (identifiers, functions, other keywords).
    Other,
}

fn classify(word: &str) -> Verb {
    const QUERY_VERBS: &[&str] = &["select", "with", "explain", "describe", "show"];
    const WRITE_VERBS: &[&str] = &[
        "insert", "update", "delete", "merge", "drop", "create", "alter", "truncate", "copy",
        "attach", "detach", "install", "load", "import", "export",
    ];

    if QUERY_VERBS.iter().any(|v| word.eq_ignore_ascii_case(v)) {
        Verb::Query
    } else if WRITE_VERBS.iter().any(|v| word.eq_ignore_ascii_case(v)) {
        Verb::Write
    } else {
        Verb::Other
    }
}

/// The guard only cares about bare words and statement separators.
#[derive(Debug, PartialEq, Eq)]
enum SqlToken<'a> {
    Word(&'a str),
    Separator,
}

/// Single-pass scanner producing [`SqlToken`]s. Quoted regions and
/// comments are skipped whole as they are encountered, so there is no
/// intermediate sanitized copy of the statement.
struct SqlScanner<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> SqlScanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    /// Consume until `stop` returns true on a character (inclusive).
    fn skip_until(&mut self, mut stop: impl FnMut(char, Option<char>) -> bool) {
        while let Some((_, c)) = self.chars.next() {
            let next = self.chars.peek().map(|&(_, n)| n);
            if stop(c, next) {
                return;
            }
        }
    }

    fn skip_single_quoted(&mut self) {
        // A doubled quote stays inside the literal.
        loop {
            self.skip_until(|c, _| c == '\'');
            match self.chars.peek() {
                Some(&(_, '\'')) => {
                    self.chars.next();
                }
                _ => return,
            }
        }
    }

    fn is_word_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }
}

impl<'a> Iterator for SqlScanner<'a> {
    type Item = SqlToken<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&(offset, c)) = self.chars.peek() {
            match c {
                ';' => {
                    self.chars.next();
                    return Some(SqlToken::Separator);
                }
                '\'' => {
                    self.chars.next();
                    self.skip_single_quoted();
                }
                '"' => {
                    self.chars.next();
                    self.skip_until(|c, _| c == '"');
                }
                '-' => {
                    self.chars.next();
                    if self.chars.peek().map(|&(_, n)| n) == Some('-') {
                        self.skip_until(|c, _| c == '\n');
                    }
                }
                '/' => {
                    self.chars.next();
                    if self.chars.peek().map(|&(_, n)| n) == Some('*') {
                        self.chars.next();
                        self.skip_until(|c, next| c == '*' && next == Some('/'));
                        self.chars.next();
                    }
                }
                c if Self::is_word_char(c) => {
                    let mut end = self.src.len();
                    while let Some(&(i, c)) = self.chars.peek() {
                        if Self::is_word_char(c) {
                            self.chars.next();
                        } else {
                            end = i;
                            break;
                        }
                    }
                    return Some(SqlToken::Word(&self.src[offset..end]));
                }
                _ => {
                    self.chars.next();
                }
            }
        }
        None
    }
}

/// Validate that `sql` is a single read-only statement.
pub fn validate_read_only(sql: &str) -> Result<()> {
    let mut tokens = SqlScanner::new(sql);

    let opener = loop {
        match tokens.next() {
            Some(SqlToken::Word(word)) => break word,
            Some(SqlToken::Separator) | None => {
                return Err(DbError::ReadOnly("empty statement".to_string()));
            }
        }
    };
    if classify(opener) != Verb::Query {
        return Err(DbError::ReadOnly(format!(
            "'{}' cannot open a read-only statement; use SELECT, WITH, EXPLAIN, DESCRIBE, or SHOW",
            opener
        )));
    }

    let mut terminated = false;
    for token in tokens {
        match token {
            _ if terminated => {
                return Err(DbError::ReadOnly(
                    "only a single statement is allowed".to_string(),
                ));
            }
            SqlToken::Separator => terminated = true,
            SqlToken::Word(word) => {
                if classify(word) == Verb::Write {
                    return Err(DbError::ReadOnly(format!(
                        "write keyword {} is not allowed",
                        word.to_ascii_uppercase()
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Bound the result size of a read-only query by wrapping it as a
/// subquery. Statements that do not produce arbitrary row counts
/// (EXPLAIN, DESCRIBE, SHOW) pass through unchanged.
pub fn apply_row_limit(sql: &str, limit: usize) -> String {
    let body = {
        let trimmed = sql.trim();
        trimmed
            .strip_suffix(';')
            .map(str::trim_end)
            .unwrap_or(trimmed)
    };

    let opens_query = SqlScanner::new(body)
        .find_map(|token| match token {
            SqlToken::Word(word) => Some(word),
            SqlToken::Separator => None,
        })
        .map(|word| word.eq_ignore_ascii_case("select") || word.eq_ignore_ascii_case("with"))
        .unwrap_or(false);

    if opens_query {
        format!("SELECT * FROM ({}) AS q LIMIT {}", body, limit)
    } else {
        body.to_string()
    }
}
