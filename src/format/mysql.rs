//! MySQL dialect.

use super::dialect::{quote_if_needed, Dialect};

pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_if_needed(name, '`', '`')
    }

    fn placeholder(&self, _ordinal: usize) -> String {
        "?".to_string()
    }

    fn positional_parameters(&self) -> bool {
        true
    }

    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        // MySQL has no standalone OFFSET; an offset without a limit needs
        // the documented huge-limit idiom.
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (None, Some(offset)) => format!(" LIMIT 18446744073709551615 OFFSET {}", offset),
            (None, None) => String::new(),
        }
    }

    fn generated_id_expression(&self) -> &'static str {
        "LAST_INSERT_ID()"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_capabilities() {
        assert_eq!(MySql.placeholder(3), "?");
        assert!(MySql.positional_parameters());
        assert_eq!(MySql.quote_identifier("order"), "`order`");
        assert_eq!(
            MySql.limit_offset(None, Some("3")),
            " LIMIT 18446744073709551615 OFFSET 3"
        );
    }
}
