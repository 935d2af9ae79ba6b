//! Dialect capability surface consumed by the formatter and by the
//! dialect-gated rewrite passes.

/// Reserved words that must be quoted when used as identifiers.
pub const RESERVED_WORDS: &[&str] = &[
    "order", "group", "user", "table", "select", "from", "where", "join", "left", "right", "inner",
    "outer", "on", "and", "or", "not", "null", "true", "false", "limit", "offset", "as", "in",
    "is", "like", "between", "having", "union", "all", "distinct", "case", "when", "then", "else",
    "end", "create", "alter", "drop", "insert", "update", "delete", "index", "key", "primary",
    "foreign", "references", "default", "constraint", "check",
];

/// Quote `name` with `open`/`close` delimiters when it needs quoting.
pub fn quote_if_needed(name: &str, open: char, close: char) -> String {
    let lower = name.to_lowercase();
    let needs_quoting = RESERVED_WORDS.contains(&lower.as_str())
        || name.chars().any(|c| !c.is_alphanumeric() && c != '_')
        || name.chars().next().map(|c| c.is_numeric()).unwrap_or(false);
    if needs_quoting {
        let escaped = name.replace(close, &format!("{close}{close}"));
        format!("{open}{escaped}{close}")
    } else {
        name.to_string()
    }
}

/// How a dialect pages a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingStyle {
    /// Native limit/offset clause.
    LimitOffset,
    /// No offset clause; skip is rewritten into a row-number range filter
    /// and take renders as `TOP`.
    RowNumber,
}

/// How a dialect spells a correlated join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStyle {
    /// `CROSS JOIN LATERAL` / `LEFT OUTER JOIN LATERAL ... ON 1 = 1`.
    Lateral,
    /// `CROSS APPLY` / `OUTER APPLY`.
    Apply,
}

/// Dialect-specific SQL generation and capability flags.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote a table or column identifier.
    fn quote_identifier(&self, name: &str) -> String {
        quote_if_needed(name, '"', '"')
    }

    /// The parameter placeholder for a 1-based ordinal (e.g. `$1`, `?`, `@p1`).
    fn placeholder(&self, ordinal: usize) -> String;

    /// Whether placeholders are purely positional (`?`): every occurrence of
    /// a parameter needs its own slot in the parameter list.
    fn positional_parameters(&self) -> bool {
        false
    }

    fn paging_style(&self) -> PagingStyle {
        PagingStyle::LimitOffset
    }

    /// Render a trailing paging clause from already-formatted expressions.
    /// Only consulted for [`PagingStyle::LimitOffset`].
    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ");
            sql.push_str(limit);
        }
        if let Some(offset) = offset {
            sql.push_str(" OFFSET ");
            sql.push_str(offset);
        }
        sql
    }

    /// The correlated-join spelling, or `None` when the dialect has none.
    fn apply_style(&self) -> Option<ApplyStyle> {
        Some(ApplyStyle::Lateral)
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn supports_distinct_in_aggregate(&self) -> bool {
        true
    }

    /// Whether several statements may share one round trip.
    fn supports_multiple_commands(&self) -> bool {
        false
    }

    /// Whether a subquery may appear in column position of a select list.
    /// When false the scalar-subquery rewrite runs.
    fn supports_scalar_subquery_in_select(&self) -> bool {
        true
    }

    /// Expression reading back the key generated by the last insert.
    fn generated_id_expression(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_word_is_quoted() {
        assert_eq!(quote_if_needed("order", '"', '"'), "\"order\"");
        assert_eq!(quote_if_needed("total", '"', '"'), "total");
    }

    #[test]
    fn test_embedded_delimiter_is_doubled() {
        assert_eq!(quote_if_needed("we\"ird", '"', '"'), "\"we\"\"ird\"");
    }
}
