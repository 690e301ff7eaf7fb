//! Placeholder and call-escape recognition.
//!
//! This is deliberately not a SQL parser. It only finds `?` and `:name`
//! placeholders outside of literals and comments, and recognises the
//! `{call NAME(...)}` escape used for callable statements.

use crate::{ConduitError, ParameterId, Result};
use serde::{Deserialize, Serialize};

/// What kind of result a statement produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// DML or DDL returning an update count
    Update,
    /// A statement returning rows
    Query,
    /// A stored function or procedure invocation
    Callable,
}

impl StatementKind {
    /// Infer the kind from the leading keyword.
    ///
    /// A `WITH` prefix is classified by the statement following its common
    /// table expressions, and DML with a top-level `RETURNING` clause is a
    /// query.
    pub fn detect(sql: &str) -> Self {
        let trimmed = sql.trim_start();
        if trimmed.starts_with('{') {
            return StatementKind::Callable;
        }
        match leading_keyword(trimmed).as_str() {
            "SELECT" | "VALUES" | "PRAGMA" | "EXPLAIN" | "SHOW" => StatementKind::Query,
            "WITH" => Self::after_common_table_expressions(trimmed),
            "CALL" => StatementKind::Callable,
            "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => Self::dml(&top_level_words(trimmed)),
            _ => StatementKind::Update,
        }
    }

    fn after_common_table_expressions(sql: &str) -> Self {
        let words = top_level_words(sql);
        let body = words.iter().skip(1).find(|w| {
            matches!(
                w.as_str(),
                "SELECT" | "VALUES" | "INSERT" | "UPDATE" | "DELETE" | "REPLACE"
            )
        });
        match body.map(String::as_str) {
            Some("INSERT" | "UPDATE" | "DELETE" | "REPLACE") => Self::dml(&words),
            _ => StatementKind::Query,
        }
    }

    fn dml(words: &[String]) -> Self {
        if words.iter().any(|w| w == "RETURNING") {
            StatementKind::Query
        } else {
            StatementKind::Update
        }
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.trim_start_matches('(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Upper-cased words outside of parentheses, literals and comments
fn top_level_words(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut words = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => i = skip_quoted(&chars, i, c),
            '-' if chars.get(i + 1) == Some(&'-') => {
                i = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
            }
            '/' if chars.get(i + 1) == Some(&'*') => i = find_block_comment_end(&chars, i + 2),
            '(' => {
                depth += 1;
                i += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if depth == 0 {
                    words.push(chars[start..i].iter().collect::<String>().to_ascii_uppercase());
                }
            }
            _ => i += 1,
        }
    }
    words
}

/// Whether executing the statement reports a meaningful row count.
///
/// DDL and transaction control report 0 regardless of what the engine
/// says about the previous DML statement.
pub fn reports_row_count(sql: &str) -> bool {
    !matches!(
        leading_keyword(sql.trim_start()).as_str(),
        "CREATE"
            | "DROP"
            | "ALTER"
            | "BEGIN"
            | "COMMIT"
            | "END"
            | "ROLLBACK"
            | "SAVEPOINT"
            | "RELEASE"
            | "PRAGMA"
            | "VACUUM"
            | "ANALYZE"
            | "ATTACH"
            | "DETACH"
    )
}

/// One placeholder occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Positional,
    Named(String),
}

/// SQL with named placeholders rewritten to positional ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    /// SQL text handed to the engine (only `?` placeholders)
    pub sql: String,
    /// Placeholders in order of appearance; index + 1 is the bind position
    pub placeholders: Vec<Placeholder>,
}

impl ParsedSql {
    pub fn parameter_count(&self) -> usize {
        self.placeholders.len()
    }

    pub fn uses_named(&self) -> bool {
        self.placeholders
            .iter()
            .any(|p| matches!(p, Placeholder::Named(_)))
    }

    /// Bind positions (1-based) of every occurrence of a named placeholder
    pub fn positions_of(&self, name: &str) -> Vec<usize> {
        self.placeholders
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| match p {
                Placeholder::Named(n) if n == name => Some(idx + 1),
                _ => None,
            })
            .collect()
    }

    /// Distinct placeholder names in order of first appearance
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for p in &self.placeholders {
            if let Placeholder::Named(n) = p {
                if !names.contains(&n.as_str()) {
                    names.push(n);
                }
            }
        }
        names
    }
}

/// Find placeholders and rewrite `:name` into `?`.
pub fn parse_placeholders(sql: &str) -> Result<ParsedSql> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut placeholders = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let end = skip_quoted(&chars, i, c);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_block_comment_end(&chars, i + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            '?' => {
                placeholders.push(Placeholder::Positional);
                out.push('?');
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars
                .get(i + 1)
                .is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                placeholders.push(Placeholder::Named(chars[start..end].iter().collect()));
                out.push('?');
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    let parsed = ParsedSql {
        sql: out,
        placeholders,
    };
    if parsed.uses_named()
        && parsed
            .placeholders
            .iter()
            .any(|p| matches!(p, Placeholder::Positional))
    {
        return Err(ConduitError::binding(
            ParameterId::Position(0),
            "positional '?' and named ':name' placeholders cannot be mixed",
        ));
    }
    Ok(parsed)
}

fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            // doubled quote is an escaped quote
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn find_block_comment_end(chars: &[char], from: usize) -> usize {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

/// A parsed `{call NAME(args)}` or `{? = call NAME(args)}` escape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEscape {
    /// Routine name as written
    pub routine: String,
    /// Whether the escape starts with `? =` (function return placeholder)
    pub has_return: bool,
    /// Raw argument expressions split on top-level commas
    pub arguments: Vec<String>,
}

impl CallEscape {
    /// Parse the escape. Fails when the text is not a call escape.
    pub fn parse(sql: &str) -> Result<Self> {
        let not_a_call = || {
            ConduitError::execution(
                "42000",
                format!("not a callable statement escape: {}", sql.trim()),
            )
        };
        let body = sql
            .trim()
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(not_a_call)?
            .trim();

        let (has_return, body) = match body.strip_prefix('?') {
            Some(rest) => {
                let rest = rest.trim_start().strip_prefix('=').ok_or_else(not_a_call)?;
                (true, rest.trim_start())
            }
            None => (false, body),
        };

        let body = match body.get(..4) {
            Some(keyword) if keyword.eq_ignore_ascii_case("call") => body[4..].trim(),
            _ => return Err(not_a_call()),
        };

        let (routine, arguments) = match body.find('(') {
            Some(open) => {
                let args = body[open + 1..]
                    .trim_end()
                    .strip_suffix(')')
                    .ok_or_else(not_a_call)?;
                (body[..open].trim(), split_arguments(args))
            }
            None => (body, Vec::new()),
        };

        if routine.is_empty()
            || !routine
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(not_a_call());
        }

        Ok(Self {
            routine: routine.to_string(),
            has_return,
            arguments,
        })
    }

    /// Number of bind positions, including the return placeholder
    pub fn placeholder_count(&self) -> usize {
        let args = self.arguments.iter().filter(|a| a.as_str() == "?").count();
        args + usize::from(self.has_return)
    }
}

fn split_arguments(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    let mut in_quote = false;
    for c in args.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quote && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}
