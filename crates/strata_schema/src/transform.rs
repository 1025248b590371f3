//! Schema transformation engine.
//!
//! [`transform`] combines a base schema with an extension delta to produce
//! the next stage's schema. The resulting schema has the stage-local
//! `is_new` flag set on every table and column the extension introduced,
//! and cleared on everything carried over from the base.
//!
//! The transform is all-or-nothing: any conflict fails the whole call with
//! the offending table and column named, the caller's inputs are never
//! mutated, and no partial result escapes.

use crate::extension::{ExtensionSchema, ExtensionTable};
use crate::model::{Column, Schema, Table};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use strata_protocol::ColumnType;
use thiserror::Error;
use tracing::{debug, info};

/// Conflicts detected while applying an extension.
///
/// All variants are deterministic caller-input errors: retrying the same
/// call yields the same failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaConflictError {
    /// The extension re-declares an existing column with a different
    /// definition and the override flag is not set.
    #[error("Redefining column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    /// The same column name arrived with two different types, either
    /// through a 'like' merge or a literal/inherited clash.
    #[error("Redefining column '{column}' of table '{table}' from {existing} to {requested}")]
    TypeConflict {
        table: String,
        column: String,
        existing: ColumnType,
        requested: ColumnType,
    },

    /// A 'like' reference points at a table that exists neither in the
    /// destination schema nor in the extension's own table set.
    #[error("Table '{table}' is specified to be like missing table '{like_table}'")]
    MissingLikeTable { table: String, like_table: String },

    /// 'like' references among the extension's own tables form a cycle.
    #[error("Circular 'like' references among tables: {}", tables.join(", "))]
    LikeCycle { tables: Vec<String> },
}

/// Combine a base schema with an extension delta into a new schema.
///
/// The result is built from deep copies of both inputs, so neither is ever
/// mutated, even on failure. Tables and columns introduced by the extension
/// carry `is_new == true`; everything copied from the base carries `false`
/// and loses its owner tag (ownership is stage-local and must be
/// re-declared by each stage's extension).
///
/// `allow_override` permits the extension to redefine an existing column in
/// place; without it a redefinition with a differing type is a conflict,
/// and a re-declaration with the identical type is a silent no-op.
pub fn transform(
    base: &Schema,
    extension: &ExtensionSchema,
    allow_override: bool,
) -> Result<Schema, SchemaConflictError> {
    let mut result = base.clone();

    // Nothing carried over from the previous stage counts as new, and the
    // previous stage's ownership does not propagate.
    for table in result.tables.values_mut() {
        table.owner = None;
        table.set_new_flags(false);
    }

    // Private copy of the extension: 'like' resolution fills in inherited
    // columns as it goes, and the caller's delta must stay untouched.
    let mut updates = extension.clone();
    updates.assign_table_names();
    for table in updates.tables.values_mut() {
        for column in &mut table.columns {
            column.is_new = true;
        }
    }

    let order = resolution_order(&updates)?;

    let mut tables_added = 0usize;
    let mut columns_added = 0usize;

    for name in &order {
        resolve_like(name, &mut updates, &result)?;
        let resolved = match updates.tables.get(name) {
            Some(table) => table.clone(),
            None => continue,
        };

        if result.tables.contains_key(name) {
            let added = merge_into_existing(&mut result, name, resolved, allow_override)?;
            columns_added += added;
            debug!(table = %name, columns = added, "extended existing table");
        } else {
            tables_added += 1;
            columns_added += resolved.columns.len();
            debug!(table = %name, columns = resolved.columns.len(), "added new table");
            result.tables.insert(name.clone(), materialize(resolved));
        }
    }

    info!(
        version = %result.version,
        tables_added,
        columns_added,
        "applied schema extension"
    );

    Ok(result)
}

/// Turn a fully resolved extension table into an entity-model table.
fn materialize(resolved: ExtensionTable) -> Table {
    Table {
        name: resolved.name,
        columns: resolved.columns,
        like_table: resolved.like_table,
        owner: resolved.owner,
        temporary: resolved.temporary,
        expiration_stage: resolved.expiration_stage,
        is_new: true,
    }
}

/// Merge a resolved extension table's columns into the same-named table
/// already present in the destination schema. Returns the number of
/// columns appended.
fn merge_into_existing(
    result: &mut Schema,
    name: &str,
    resolved: ExtensionTable,
    allow_override: bool,
) -> Result<usize, SchemaConflictError> {
    let existing = match result.tables.get_mut(name) {
        Some(table) => table,
        None => return Ok(0),
    };

    let mut added = 0usize;
    for column in resolved.columns {
        let current_type = existing.column(&column.name).map(|c| c.column_type);
        match current_type {
            None => {
                existing.columns.push(column);
                added += 1;
            }
            Some(_) if allow_override => {
                // Corrective redefinition of a previously shipped column;
                // position is preserved.
                if let Some(slot) = existing.columns.iter_mut().find(|c| c.name == column.name) {
                    *slot = column;
                }
            }
            Some(current) if current == column.column_type => {
                // Identical re-declaration, commonly the result of a 'like'
                // chain re-listing inherited columns: keep the existing
                // definition untouched.
            }
            Some(_) => {
                return Err(SchemaConflictError::DuplicateColumn {
                    table: name.to_string(),
                    column: column.name,
                });
            }
        }
    }

    if let Some(owner) = resolved.owner {
        existing.owner = Some(owner);
    }
    if resolved.temporary {
        existing.temporary = true;
        existing.expiration_stage = resolved.expiration_stage;
    }

    Ok(added)
}

/// Resolve a table's 'like' reference by copying the referenced table's
/// columns into the extension table's inherited prefix.
///
/// Columns are walked in reverse and prepended, skipping names already
/// present, so the final order is: 1) the like target's columns as of the
/// previous stage, 2) the columns this extension adds to the like target,
/// 3) the extending table's own literal columns. A skipped duplicate must
/// agree in type with the column already recorded under that name.
fn resolve_like(
    name: &str,
    updates: &mut ExtensionSchema,
    result: &Schema,
) -> Result<(), SchemaConflictError> {
    let like_name = match updates.tables.get(name).and_then(|t| t.like_table.clone()) {
        Some(like_name) => like_name,
        None => return Ok(()),
    };

    if !updates.tables.contains_key(&like_name) && result.table(&like_name).is_none() {
        return Err(SchemaConflictError::MissingLikeTable {
            table: name.to_string(),
            like_table: like_name,
        });
    }

    let mut columns = updates
        .tables
        .get(name)
        .map(|t| t.columns.clone())
        .unwrap_or_default();
    let mut seen: HashMap<String, ColumnType> = columns
        .iter()
        .map(|c| (c.name.clone(), c.column_type))
        .collect();

    // Extension-local columns of the like target first; the target's
    // previous-stage columns then land in front of them.
    if let Some(target) = updates.tables.get(&like_name) {
        let target_columns = target.columns.clone();
        prepend_unseen(name, &mut columns, &target_columns, &mut seen)?;
    }
    if let Some(target) = result.table(&like_name) {
        prepend_unseen(name, &mut columns, &target.columns, &mut seen)?;
    }

    if let Some(table) = updates.tables.get_mut(name) {
        table.columns = columns;
    }
    Ok(())
}

/// Prepend `source`'s columns (walked in reverse) that have not been seen
/// yet, recording every name and failing if a name recurs with a
/// different type. Copied columns keep their stage-local flags.
fn prepend_unseen(
    table_name: &str,
    columns: &mut Vec<Column>,
    source: &[Column],
    seen: &mut HashMap<String, ColumnType>,
) -> Result<(), SchemaConflictError> {
    for column in source.iter().rev() {
        match seen.get(&column.name) {
            Some(existing) if *existing != column.column_type => {
                return Err(SchemaConflictError::TypeConflict {
                    table: table_name.to_string(),
                    column: column.name.clone(),
                    existing: *existing,
                    requested: column.column_type,
                });
            }
            Some(_) => {}
            None => columns.insert(0, column.clone()),
        }
        seen.insert(column.name.clone(), column.column_type);
    }
    Ok(())
}

/// Order the extension's tables so that every table appears after its
/// 'like' target whenever that target is itself part of the extension.
/// Ties resolve lexicographically, so the order never depends on container
/// iteration; a cycle among the references is a conflict.
fn resolution_order(updates: &ExtensionSchema) -> Result<Vec<String>, SchemaConflictError> {
    let names: BTreeSet<&str> = updates.tables.keys().map(String::as_str).collect();

    let mut blocked: BTreeSet<&str> = BTreeSet::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut ready: BTreeSet<&str> = BTreeSet::new();

    for (name, table) in &updates.tables {
        match table.like_table.as_deref().filter(|l| names.contains(l)) {
            Some(target) => {
                blocked.insert(name);
                dependents.entry(target).or_default().push(name);
            }
            None => {
                ready.insert(name);
            }
        }
    }

    let mut order = Vec::with_capacity(updates.tables.len());
    while let Some(name) = ready.iter().next().copied() {
        ready.remove(name);
        order.push(name.to_string());
        if let Some(children) = dependents.remove(name) {
            for child in children {
                blocked.remove(child);
                ready.insert(child);
            }
        }
    }

    if !blocked.is_empty() {
        return Err(SchemaConflictError::LikeCycle {
            tables: blocked.iter().map(|s| s.to_string()).collect(),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, Table};
    use strata_protocol::TableOwner;

    fn base_schema() -> Schema {
        let mut schema = Schema::new("1.0.0");
        schema
            .add_table(
                "requests",
                Table::with_columns(
                    "requests",
                    vec![
                        Column::new("id", ColumnType::BigInt),
                        Column::new("url", ColumnType::Text),
                    ],
                ),
            )
            .unwrap();
        schema
    }

    #[test]
    fn untouched_tables_are_not_new_and_lose_ownership() {
        let mut base = base_schema();
        base.tables.get_mut("requests").unwrap().owner = Some(TableOwner::new("loader"));
        base.set_new_flags(true);

        let result = transform(&base, &ExtensionSchema::new("empty"), false).unwrap();

        let table = result.table("requests").unwrap();
        assert!(!table.is_new);
        assert!(table.columns.iter().all(|c| !c.is_new));
        assert!(table.owner.is_none());

        // The caller's base is untouched.
        assert!(base.table("requests").unwrap().owner.is_some());
    }

    #[test]
    fn appended_columns_are_new() {
        let extension = ExtensionSchema::new("stage-1").with_table(
            "requests",
            ExtensionTable::with_columns(vec![Column::new("duration_ms", ColumnType::Int)]),
        );

        let result = transform(&base_schema(), &extension, false).unwrap();
        let table = result.table("requests").unwrap();

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "url", "duration_ms"]);
        assert!(!table.is_new);
        assert!(!table.column("id").unwrap().is_new);
        assert!(table.column("duration_ms").unwrap().is_new);
    }

    #[test]
    fn new_tables_are_new() {
        let extension = ExtensionSchema::new("stage-1").with_table(
            "sessions",
            ExtensionTable::with_columns(vec![Column::new("session_id", ColumnType::Guid)]),
        );

        let result = transform(&base_schema(), &extension, false).unwrap();
        let table = result.table("sessions").unwrap();
        assert!(table.is_new);
        assert!(table.column("session_id").unwrap().is_new);
    }

    #[test]
    fn like_inherits_base_columns_in_order() {
        let extension = ExtensionSchema::new("stage-1").with_table(
            "extended_requests",
            ExtensionTable::like("requests")
                .with_column(Column::new("duration_ms", ColumnType::Int)),
        );

        let result = transform(&base_schema(), &extension, false).unwrap();
        let table = result.table("extended_requests").unwrap();

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "url", "duration_ms"]);
        assert_eq!(table.like_table.as_deref(), Some("requests"));

        // Inherited columns are carried forward, not introduced; only the
        // literal addition is new.
        assert!(!table.column("id").unwrap().is_new);
        assert!(!table.column("url").unwrap().is_new);
        assert!(table.column("duration_ms").unwrap().is_new);
    }

    #[test]
    fn like_orders_base_then_extension_then_literal() {
        // 'requests' gains 'status' in this same extension, and
        // 'extended_requests' inherits it: base columns first, then the
        // extension's additions to the target, then the literal column.
        let extension = ExtensionSchema::new("stage-1")
            .with_table(
                "requests",
                ExtensionTable::with_columns(vec![Column::new("status", ColumnType::Int)]),
            )
            .with_table(
                "extended_requests",
                ExtensionTable::like("requests")
                    .with_column(Column::new("duration_ms", ColumnType::Int)),
            );

        let result = transform(&base_schema(), &extension, false).unwrap();
        let table = result.table("extended_requests").unwrap();

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "url", "status", "duration_ms"]);
        assert!(table.column("status").unwrap().is_new);
        assert!(!table.column("id").unwrap().is_new);
    }

    #[test]
    fn like_resolution_is_order_independent() {
        // The child sorts before its target lexicographically; the
        // dependency ordering must still resolve the target first.
        let extension = ExtensionSchema::new("stage-1")
            .with_table(
                "z_parent",
                ExtensionTable::with_columns(vec![Column::new("base_col", ColumnType::Int)]),
            )
            .with_table(
                "a_child",
                ExtensionTable::like("z_parent")
                    .with_column(Column::new("extra", ColumnType::Text)),
            );

        let result = transform(&base_schema(), &extension, false).unwrap();
        let child = result.table("a_child").unwrap();
        let names: Vec<&str> = child.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["base_col", "extra"]);
    }

    #[test]
    fn like_chain_resolves_transitively() {
        let extension = ExtensionSchema::new("stage-1")
            .with_table(
                "level_one",
                ExtensionTable::like("requests")
                    .with_column(Column::new("first_extra", ColumnType::Int)),
            )
            .with_table(
                "level_two",
                ExtensionTable::like("level_one")
                    .with_column(Column::new("second_extra", ColumnType::Int)),
            );

        let result = transform(&base_schema(), &extension, false).unwrap();
        let table = result.table("level_two").unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "url", "first_extra", "second_extra"]);
    }

    #[test]
    fn dangling_like_is_a_conflict() {
        let extension = ExtensionSchema::new("stage-1")
            .with_table("haunted", ExtensionTable::like("ghost"));

        let err = transform(&base_schema(), &extension, false).unwrap_err();
        assert_eq!(
            err,
            SchemaConflictError::MissingLikeTable {
                table: "haunted".to_string(),
                like_table: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn like_cycle_is_a_conflict() {
        let extension = ExtensionSchema::new("stage-1")
            .with_table("alpha", ExtensionTable::like("beta"))
            .with_table("beta", ExtensionTable::like("alpha"));

        let err = transform(&base_schema(), &extension, false).unwrap_err();
        assert_eq!(
            err,
            SchemaConflictError::LikeCycle {
                tables: vec!["alpha".to_string(), "beta".to_string()],
            }
        );
    }

    #[test]
    fn self_like_is_a_conflict() {
        let extension = ExtensionSchema::new("stage-1")
            .with_table("narcissus", ExtensionTable::like("narcissus"));

        let err = transform(&base_schema(), &extension, false).unwrap_err();
        assert!(matches!(err, SchemaConflictError::LikeCycle { .. }));
    }

    #[test]
    fn redefinition_without_override_is_a_conflict() {
        let extension = ExtensionSchema::new("stage-1").with_table(
            "requests",
            ExtensionTable::with_columns(vec![Column::new("id", ColumnType::Text)]),
        );

        let err = transform(&base_schema(), &extension, false).unwrap_err();
        assert_eq!(
            err,
            SchemaConflictError::DuplicateColumn {
                table: "requests".to_string(),
                column: "id".to_string(),
            }
        );
    }

    #[test]
    fn redefinition_with_override_replaces_in_place() {
        let extension = ExtensionSchema::new("stage-1").with_table(
            "requests",
            ExtensionTable::with_columns(vec![Column::new("id", ColumnType::Text)]),
        );

        let result = transform(&base_schema(), &extension, true).unwrap();
        let table = result.table("requests").unwrap();

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "url"]);
        assert_eq!(table.column("id").unwrap().column_type, ColumnType::Text);
        assert!(table.column("id").unwrap().is_new);
        assert!(!table.column("url").unwrap().is_new);
    }

    #[test]
    fn identical_redeclaration_is_a_no_op() {
        // Re-listing existing columns unchanged is permitted without the
        // override flag; only the genuinely new column is appended.
        let extension = ExtensionSchema::new("stage-1").with_table(
            "requests",
            ExtensionTable::with_columns(vec![
                Column::new("id", ColumnType::BigInt),
                Column::new("url", ColumnType::Text),
                Column::new("duration_ms", ColumnType::Int),
            ]),
        );

        let result = transform(&base_schema(), &extension, false).unwrap();
        let table = result.table("requests").unwrap();

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "url", "duration_ms"]);
        assert!(!table.column("id").unwrap().is_new);
        assert!(!table.column("url").unwrap().is_new);
        assert!(table.column("duration_ms").unwrap().is_new);
    }

    #[test]
    fn literal_inherited_type_clash_is_a_conflict() {
        let extension = ExtensionSchema::new("stage-1").with_table(
            "extended_requests",
            ExtensionTable::like("requests")
                .with_column(Column::new("url", ColumnType::Int)),
        );

        let err = transform(&base_schema(), &extension, false).unwrap_err();
        assert_eq!(
            err,
            SchemaConflictError::TypeConflict {
                table: "extended_requests".to_string(),
                column: "url".to_string(),
                existing: ColumnType::Int,
                requested: ColumnType::Text,
            }
        );
    }

    #[test]
    fn owner_and_transience_come_from_the_extension() {
        let extension = ExtensionSchema::new("stage-1")
            .with_table(
                "requests",
                ExtensionTable::with_columns(vec![Column::new("status", ColumnType::Int)])
                    .with_owner(TableOwner::new("enricher"))
                    .temporary_until(2),
            )
            .with_table(
                "scratch",
                ExtensionTable::with_columns(vec![Column::new("blob", ColumnType::Text)])
                    .temporary_until(1),
            );

        let result = transform(&base_schema(), &extension, false).unwrap();

        let requests = result.table("requests").unwrap();
        assert_eq!(requests.owner.as_ref().unwrap().as_str(), "enricher");
        assert!(requests.temporary);
        assert_eq!(requests.expiration_stage, Some(2));

        let scratch = result.table("scratch").unwrap();
        assert!(scratch.owner.is_none());
        assert!(scratch.temporary);
        assert_eq!(scratch.expiration_stage, Some(1));
    }

    #[test]
    fn transform_is_deterministic() {
        let extension = ExtensionSchema::new("stage-1")
            .with_table(
                "requests",
                ExtensionTable::with_columns(vec![Column::new("status", ColumnType::Int)]),
            )
            .with_table(
                "extended_requests",
                ExtensionTable::like("requests")
                    .with_column(Column::new("duration_ms", ColumnType::Int)),
            );

        let first = transform(&base_schema(), &extension, false).unwrap();
        let second = transform(&base_schema(), &extension, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.content_hash(), second.content_hash());
    }

    #[test]
    fn failed_transform_leaves_inputs_untouched() {
        let base = base_schema();
        let extension = ExtensionSchema::new("stage-1").with_table(
            "extended_requests",
            ExtensionTable::like("ghost")
                .with_column(Column::new("duration_ms", ColumnType::Int)),
        );
        let extension_before = extension.clone();
        let base_before = base.clone();

        assert!(transform(&base, &extension, false).is_err());
        assert_eq!(extension, extension_before);
        assert_eq!(base, base_before);
    }

    #[test]
    fn version_is_carried_from_the_base() {
        let result = transform(&base_schema(), &ExtensionSchema::new("delta"), false).unwrap();
        assert_eq!(result.version, "1.0.0");
    }
}
