//! Table aliases: opaque identity tokens for table/subquery occurrences.

use serde::{Deserialize, Serialize};

/// Identifies one occurrence of a table or subquery in a from-clause.
///
/// Aliases are compared by token identity, never by a printable name. Two
/// occurrences of the same table always carry different aliases; the
/// formatter assigns printable names (`t0`, `t1`, ...) last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableAlias(u32);

impl TableAlias {
    /// Raw token, used only for diagnostics and deterministic ordering.
    pub fn token(&self) -> u32 {
        self.0
    }
}

/// Allocates aliases for one compilation. Aliases must be unique within one
/// compiled tree only, so every compilation owns its own generator.
#[derive(Debug, Default, Clone)]
pub struct AliasGenerator {
    next: u32,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start allocation after every alias already present in a tree, so that
    /// duplicated subtrees never collide with existing ones.
    pub fn starting_after(max_seen: Option<TableAlias>) -> Self {
        Self {
            next: max_seen.map(|a| a.0 + 1).unwrap_or(0),
        }
    }

    pub fn fresh(&mut self) -> TableAlias {
        let alias = TableAlias(self.next);
        self.next += 1;
        alias
    }
}
