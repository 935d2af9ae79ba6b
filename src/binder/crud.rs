//! Command binding: CRUD requests against the mapping contract.
//!
//! Instance values never appear in the bound tree; every member value binds
//! as an external named parameter (named after the member), so one compiled
//! command serves every instance of the entity.

use super::Binder;
use crate::ast::command::{
    BatchCommand, Command, ColumnAssignment, DeclarationCommand, DeleteCommand, IfCommand,
    InsertCommand, UpdateCommand,
};
use crate::ast::expr::{ColumnRef, Expr, NamedValue};
use crate::ast::projector::Projector;
use crate::ast::query::{ColumnDecl, Select, Source, TableSource};
use crate::error::{RelqError, RelqResult};
use crate::mapping::EntityDef;
use crate::query::{BatchKind, CommandRequest};

/// Name of the variable holding a read-back generated key.
pub const GENERATED_KEY: &str = "generated_id";

/// Function placeholder the formatter renders as the dialect's
/// generated-id expression.
pub const GENERATED_ID_FUNC: &str = "__generated_id";

impl Binder<'_> {
    pub fn bind_command(mut self, request: &CommandRequest) -> RelqResult<Command> {
        match request {
            CommandRequest::Insert {
                entity,
                return_generated,
            } => {
                let def = self.mapping().entity(entity)?.clone();
                let insert = self.bind_insert(&def)?;
                if !*return_generated {
                    return Ok(insert);
                }
                let generated = def
                    .members
                    .iter()
                    .find(|m| m.generated)
                    .ok_or_else(|| RelqError::bind("entity has no generated member"))?;
                let alias = self.aliases_mut().fresh();
                let mut source = Select::new(alias);
                source.columns.push(ColumnDecl::new(
                    GENERATED_KEY,
                    Expr::Function {
                        name: GENERATED_ID_FUNC.to_string(),
                        args: vec![],
                    },
                ));
                Ok(Command::Block(vec![
                    insert,
                    Command::Declare(DeclarationCommand {
                        variables: vec![(GENERATED_KEY.to_string(), generated.ty)],
                        source,
                    }),
                ]))
            }
            CommandRequest::Update { entity } => {
                let def = self.mapping().entity(entity)?.clone();
                self.bind_update(&def)
            }
            CommandRequest::Delete { entity } => {
                let def = self.mapping().entity(entity)?.clone();
                let alias = self.aliases_mut().fresh();
                Ok(Command::Delete(DeleteCommand {
                    table: TableSource {
                        alias,
                        name: def.table.clone(),
                    },
                    where_clause: primary_key_filter(&def, alias)?,
                }))
            }
            CommandRequest::DeleteWhere { entity, predicate } => {
                let def = self.mapping().entity(entity)?.clone();
                let alias = self.aliases_mut().fresh();
                // No select wrapping here: a delete sees only its table, so
                // the entity binds directly over the table alias.
                let members = def
                    .members
                    .iter()
                    .map(|m| {
                        (
                            m.name.clone(),
                            Projector::Expr(Expr::Column(ColumnRef::new(
                                alias,
                                m.column.clone(),
                                m.ty,
                            ))),
                        )
                    })
                    .collect();
                let row = Projector::Entity {
                    entity: def.name.clone(),
                    members,
                };
                let pred =
                    self.scoped(predicate.params[0], row, |b| b.bind_scalar(&predicate.body))?;
                Ok(Command::Delete(DeleteCommand {
                    table: TableSource {
                        alias,
                        name: def.table.clone(),
                    },
                    where_clause: pred,
                }))
            }
            CommandRequest::Upsert { entity } => {
                let def = self.mapping().entity(entity)?.clone();
                let probe_alias = self.aliases_mut().fresh();
                let select_alias = self.aliases_mut().fresh();
                let mut probe = Select::new(select_alias);
                probe.from = Some(Source::Table(TableSource {
                    alias: probe_alias,
                    name: def.table.clone(),
                }));
                probe.where_clause = Some(primary_key_filter(&def, probe_alias)?);
                probe
                    .columns
                    .push(ColumnDecl::new("result", Expr::value(1i64)));
                let update = self.bind_update(&def)?;
                let insert = self.bind_insert(&def)?;
                Ok(Command::If(Box::new(IfCommand {
                    check: Expr::Exists(Box::new(probe)),
                    then_command: update,
                    else_command: Some(insert),
                })))
            }
            CommandRequest::Batch {
                entity,
                kind,
                batch_size,
                stream,
            } => {
                let template = match kind {
                    BatchKind::Insert => CommandRequest::insert(entity.clone()),
                    BatchKind::Update => CommandRequest::update(entity.clone()),
                    BatchKind::Delete => CommandRequest::delete(entity.clone()),
                    BatchKind::Upsert => CommandRequest::upsert(entity.clone()),
                };
                let template = self.bind_command(&template)?;
                Ok(Command::Batch(BatchCommand {
                    template: Box::new(template),
                    batch_size: *batch_size,
                    stream: *stream,
                }))
            }
        }
    }

    fn bind_insert(&mut self, def: &EntityDef) -> RelqResult<Command> {
        let assignments: Vec<ColumnAssignment> = def
            .members
            .iter()
            .filter(|m| m.insertable())
            .map(|m| ColumnAssignment {
                column: m.column.clone(),
                ty: m.ty,
                value: member_param(&m.name, m.ty),
            })
            .collect();
        if assignments.is_empty() {
            return Err(RelqError::bind("entity has no insertable members"));
        }
        let alias = self.aliases_mut().fresh();
        Ok(Command::Insert(InsertCommand {
            table: TableSource {
                alias,
                name: def.table.clone(),
            },
            assignments,
        }))
    }

    fn bind_update(&mut self, def: &EntityDef) -> RelqResult<Command> {
        let assignments: Vec<ColumnAssignment> = def
            .members
            .iter()
            .filter(|m| m.updatable)
            .map(|m| ColumnAssignment {
                column: m.column.clone(),
                ty: m.ty,
                value: member_param(&m.name, m.ty),
            })
            .collect();
        if assignments.is_empty() {
            return Err(RelqError::bind("entity has no updatable members"));
        }
        let alias = self.aliases_mut().fresh();
        Ok(Command::Update(UpdateCommand {
            table: TableSource {
                alias,
                name: def.table.clone(),
            },
            where_clause: primary_key_filter(def, alias)?,
            assignments,
        }))
    }
}

fn member_param(name: &str, ty: crate::types::SqlType) -> Expr {
    Expr::Named(NamedValue {
        name: name.to_string(),
        ty,
        value: None,
    })
}

/// `pk1 = :pk1 AND pk2 = :pk2 ...` over the entity's declared key.
fn primary_key_filter(
    def: &EntityDef,
    alias: crate::ast::TableAlias,
) -> RelqResult<Expr> {
    let keys = def.primary_key_members();
    Expr::conjoin(keys.iter().map(|m| {
        Expr::eq(
            Expr::Column(ColumnRef::new(alias, m.column.clone(), m.ty)),
            member_param(&m.name, m.ty),
        )
    }))
    .ok_or_else(|| RelqError::bind("entity declares no primary key"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingRegistry, MemberDef};
    use crate::types::SqlType;

    fn mapping() -> MappingRegistry {
        MappingRegistry::new().register(
            EntityDef::new("Customer", "customers")
                .member(MemberDef::new("id", "id", SqlType::Int).primary_key().generated())
                .member(MemberDef::new("name", "name", SqlType::Text)),
        )
    }

    #[test]
    fn test_insert_excludes_generated_members() {
        let mapping = mapping();
        let command = Binder::new(&mapping)
            .bind_command(&CommandRequest::insert("Customer"))
            .unwrap();
        match command {
            Command::Insert(insert) => {
                assert_eq!(insert.assignments.len(), 1);
                assert_eq!(insert.assignments[0].column, "name");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_insert_returning_key_appends_declaration() {
        let mapping = mapping();
        let command = Binder::new(&mapping)
            .bind_command(&CommandRequest::insert_returning_key("Customer"))
            .unwrap();
        match command {
            Command::Block(commands) => {
                assert_eq!(commands.len(), 2);
                assert!(matches!(commands[0], Command::Insert(_)));
                assert!(matches!(commands[1], Command::Declare(_)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_upsert_is_exists_guarded() {
        let mapping = mapping();
        let command = Binder::new(&mapping)
            .bind_command(&CommandRequest::upsert("Customer"))
            .unwrap();
        match command {
            Command::If(if_cmd) => {
                assert!(matches!(if_cmd.check, Expr::Exists(_)));
                assert!(matches!(if_cmd.then_command, Command::Update(_)));
                assert!(matches!(if_cmd.else_command, Some(Command::Insert(_))));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
