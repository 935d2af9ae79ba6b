//! SQL Server dialect.

use super::dialect::{quote_if_needed, ApplyStyle, Dialect, PagingStyle};

pub struct SqlServer;

impl Dialect for SqlServer {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_if_needed(name, '[', ']')
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("@p{}", ordinal)
    }

    fn paging_style(&self) -> PagingStyle {
        PagingStyle::RowNumber
    }

    fn apply_style(&self) -> Option<ApplyStyle> {
        Some(ApplyStyle::Apply)
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn supports_multiple_commands(&self) -> bool {
        true
    }

    fn supports_scalar_subquery_in_select(&self) -> bool {
        false
    }

    fn generated_id_expression(&self) -> &'static str {
        "SCOPE_IDENTITY()"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlserver_capabilities() {
        assert_eq!(SqlServer.placeholder(2), "@p2");
        assert_eq!(SqlServer.paging_style(), PagingStyle::RowNumber);
        assert_eq!(SqlServer.apply_style(), Some(ApplyStyle::Apply));
        assert_eq!(SqlServer.quote_identifier("order"), "[order]");
    }
}
