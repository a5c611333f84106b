//! SQL statement logging through `tracing`.

use std::borrow::Cow;

/// Longest statement text, in bytes, written to a log event.
pub(crate) const LOGGED_SQL_BYTES: usize = 200;

/// Clip a statement for logging, marking the cut with `...`. The cut never
/// splits a character.
pub(crate) fn clip_sql(sql: &str) -> Cow<'_, str> {
    if sql.len() <= LOGGED_SQL_BYTES {
        return Cow::Borrowed(sql);
    }
    let cut = sql
        .char_indices()
        .map(|(at, _)| at)
        .take_while(|&at| at <= LOGGED_SQL_BYTES)
        .last()
        .unwrap_or(0);
    Cow::Owned(format!("{}...", &sql[..cut]))
}

/// Emit a debug event for a statement about to run.
pub(crate) fn statement(tag: Option<&str>, sql: &str, param_count: usize) {
    let tag = tag.unwrap_or("-");
    tracing::debug!(
        target: "muckraker.sql",
        tag,
        param_count,
        sql = %clip_sql(sql),
        "executing statement"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_statements_are_clipped_between_characters() {
        let sql = format!("SELECT '{}'", "é".repeat(200));
        let out = clip_sql(&sql);
        assert!(out.ends_with("..."));
        assert!(out.len() <= LOGGED_SQL_BYTES + 3);
        assert!(out.len() > LOGGED_SQL_BYTES - 2);
    }

    #[test]
    fn short_statements_are_borrowed() {
        assert!(matches!(clip_sql("SELECT 1"), Cow::Borrowed("SELECT 1")));
    }
}
