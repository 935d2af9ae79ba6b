//! SQLite dialect.

use super::dialect::{ApplyStyle, Dialect};

pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _ordinal: usize) -> String {
        "?".to_string()
    }

    fn positional_parameters(&self) -> bool {
        true
    }

    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {}", offset),
            (None, None) => String::new(),
        }
    }

    // No lateral joins; the decorrelation rewrites must have removed every
    // apply join or compilation fails.
    fn apply_style(&self) -> Option<ApplyStyle> {
        None
    }

    fn generated_id_expression(&self) -> &'static str {
        "last_insert_rowid()"
    }
}
