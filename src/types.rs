//! SQL-facing type tags carried on columns, parameters and mapped members.

use serde::{Deserialize, Serialize};

/// The closed set of column/parameter types the compiler reasons about.
///
/// These are logical types, not vendor types: each dialect decides how a
/// logical type is rendered or bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    Uuid,
    DateTime,
    Bytes,
    /// Type not yet determined (e.g. a computed expression over mixed inputs).
    Unknown,
}

impl SqlType {
    /// Whether values of this type participate in arithmetic.
    pub fn is_numeric(&self) -> bool {
        matches!(self, SqlType::Int | SqlType::Float | SqlType::Decimal)
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SqlType::Bool => "bool",
            SqlType::Int => "int",
            SqlType::Float => "float",
            SqlType::Decimal => "decimal",
            SqlType::Text => "text",
            SqlType::Uuid => "uuid",
            SqlType::DateTime => "datetime",
            SqlType::Bytes => "bytes",
            SqlType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}
