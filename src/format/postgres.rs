//! PostgreSQL dialect.

use super::dialect::Dialect;

pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("${}", ordinal)
    }

    fn supports_multiple_commands(&self) -> bool {
        true
    }

    fn generated_id_expression(&self) -> &'static str {
        "lastval()"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PagingStyle;

    #[test]
    fn test_postgres_capabilities() {
        assert_eq!(Postgres.placeholder(3), "$3");
        assert_eq!(Postgres.paging_style(), PagingStyle::LimitOffset);
        assert!(!Postgres.positional_parameters());
        assert_eq!(Postgres.quote_identifier("order"), "\"order\"");
    }
}
