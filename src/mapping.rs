//! The entity-mapping contract the binder consumes.
//!
//! The core never embeds mapping policy: everything it knows about an entity
//! (table, columns, keys, relationships, CRUD flags) comes through
//! [`EntityMapping`]. [`MappingRegistry`] is the reference implementation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{RelqError, RelqResult};
use crate::types::SqlType;

/// One scalar member of a mapped entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDef {
    pub name: String,
    pub column: String,
    pub ty: SqlType,
    pub primary_key: bool,
    /// Server-generated (identity/sequence); excluded from inserts, read
    /// back via the dialect's generated-id expression.
    pub generated: bool,
    /// Computed by the database; read-only everywhere.
    pub computed: bool,
    pub updatable: bool,
}

impl MemberDef {
    pub fn new(name: impl Into<String>, column: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            ty,
            primary_key: false,
            generated: false,
            computed: false,
            updatable: true,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.updatable = false;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self.updatable = false;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self.updatable = false;
        self
    }

    pub fn insertable(&self) -> bool {
        !self.generated && !self.computed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// At most one related row.
    Single,
    /// Zero or more related rows.
    Collection,
}

/// A relationship member, associated via member key pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub name: String,
    pub target: String,
    pub kind: RelationshipKind,
    /// Pairs of (this entity's member, target entity's member).
    pub key_pairs: Vec<(String, String)>,
    /// Deferred members compile to lazy thunks instead of eager loads.
    pub deferred: bool,
}

/// A mapped entity: logical type to table/columns/keys/relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub members: Vec<MemberDef>,
    pub relationships: Vec<RelationshipDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            members: vec![],
            relationships: vec![],
        }
    }

    pub fn member(mut self, member: MemberDef) -> Self {
        self.members.push(member);
        self
    }

    pub fn relationship(mut self, rel: RelationshipDef) -> Self {
        self.relationships.push(rel);
        self
    }

    pub fn find_member(&self, name: &str) -> Option<&MemberDef> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn find_relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn primary_key_members(&self) -> Vec<&MemberDef> {
        self.members.iter().filter(|m| m.primary_key).collect()
    }
}

/// Resolves entity names to mapping metadata.
pub trait EntityMapping: Send + Sync {
    fn entity(&self, name: &str) -> RelqResult<&EntityDef>;
}

/// In-memory mapping registry.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MappingRegistry {
    entities: HashMap<String, EntityDef>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, entity: EntityDef) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }
}

impl EntityMapping for MappingRegistry {
    fn entity(&self, name: &str) -> RelqResult<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| RelqError::UnknownEntity(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = MappingRegistry::new().register(
            EntityDef::new("Customer", "customers")
                .member(MemberDef::new("id", "id", SqlType::Int).primary_key()),
        );
        assert!(registry.entity("Customer").is_ok());
        assert!(matches!(
            registry.entity("Order"),
            Err(RelqError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_generated_member_not_insertable() {
        let member = MemberDef::new("id", "id", SqlType::Int).primary_key().generated();
        assert!(!member.insertable());
        assert!(!member.updatable);
    }
}
