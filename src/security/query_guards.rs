//! Query Guards
//!
//! Permission hook run on every raw statement before an engine is chosen.

use crate::error::{BridgeError, Result};
use std::collections::HashSet;

/// Decides whether a statement may run at all
pub trait PermissionCheck: Send + Sync {
    fn check(&self, statement: &str) -> Result<()>;
}

impl<F> PermissionCheck for F
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    fn check(&self, statement: &str) -> Result<()> {
        self(statement)
    }
}

/// Permits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn check(&self, _statement: &str) -> Result<()> {
        Ok(())
    }
}

/// Permits single statements that start with a read-only keyword
#[derive(Debug, Clone)]
pub struct ReadOnlyGuard {
    allowed_keywords: HashSet<String>,
}

impl Default for ReadOnlyGuard {
    fn default() -> Self {
        Self::with_keywords([
            "SELECT", "WITH", "DESCRIBE", "DESC", "SHOW", "EXPLAIN", "SUMMARIZE", "VALUES",
        ])
    }
}

impl ReadOnlyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_uppercase())
                .collect(),
        }
    }
}

impl PermissionCheck for ReadOnlyGuard {
    fn check(&self, statement: &str) -> Result<()> {
        let body = strip_leading_comments(statement);
        let keyword: String = body
            .chars()
            .skip_while(|c| *c == '(')
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();

        if !self.allowed_keywords.contains(&keyword) {
            return Err(BridgeError::PermissionDenied(format!(
                "Only read-only statements are allowed, got '{}'",
                if keyword.is_empty() { "<empty>" } else { keyword.as_str() }
            )));
        }

        if has_multiple_statements(body) {
            return Err(BridgeError::PermissionDenied(
                "Multiple statements are not allowed".to_string(),
            ));
        }

        Ok(())
    }
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("").trim_start();
        } else {
            return rest;
        }
    }
}

/// True when a `;` outside quotes and comments is followed by more than
/// whitespace or comments.
fn has_multiple_statements(sql: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut idx = 0;
    while let Some(c) = sql[idx..].chars().next() {
        let tail = &sql[idx..];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None if tail.starts_with("--") || tail.starts_with("/*") => {
                idx = sql.len() - strip_leading_comments(tail).len();
                continue;
            }
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ';' => {
                if !strip_leading_comments(&tail[1..]).is_empty() {
                    return true;
                }
            }
            None => {}
        }
        idx += c.len_utf8();
    }
    false
}
