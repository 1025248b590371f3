//! Schema entity model.
//!
//! A [`Schema`] maps table names to [`Table`] definitions; a table holds an
//! ordered sequence of [`Column`]s. Column order is semantically meaningful:
//! it is the positional order used for serialization and DDL emission.
//!
//! All three types are plain owned value trees. `Clone` therefore IS the
//! deep copy: a cloned schema shares nothing with its original, and
//! mutating one can never be observed through the other.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use strata_protocol::{naming, ColumnType, TableOwner};
use thiserror::Error;

/// Lookup and uniqueness errors on the entity model.
///
/// These are caller errors, not data conflicts; see
/// [`SchemaConflictError`](crate::transform::SchemaConflictError) for the
/// errors the transform engine reports.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table '{0}' already exists in the schema")]
    DuplicateTable(String),

    #[error("Column '{column}' already exists in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    #[error("No column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },
}

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name (unique within its table)
    pub name: String,

    /// Optional human-readable description. For `Enum` columns the legal
    /// values are listed here in single quotes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The column's canonical type
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Length bound for bounded text types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,

    /// Stage-local flag: true if this column was introduced by the
    /// extension applied to produce the current stage. Never serialized.
    #[serde(skip)]
    pub is_new: bool,
}

impl Column {
    /// Create a new column of the given type.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            description: None,
            column_type,
            length: None,
            is_new: false,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the length bound.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Independent copy with the stage-local flag chosen by the copier.
    pub fn copied(&self, is_new: bool) -> Self {
        let mut copy = self.clone();
        copy.is_new = is_new;
        copy
    }

    /// Field name used for this column in generated bindings.
    pub fn binding_name(&self) -> String {
        naming::binding_identifier(&self.name)
    }

    fn hash_into(&self, hasher: &mut DefaultHasher) {
        self.name.hash(hasher);
        self.column_type.as_str().hash(hasher);
        self.length.hash(hasher);
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.length {
            Some(len) => write!(f, "{} {}({})", self.name, self.column_type, len),
            None => write!(f, "{} {}", self.name, self.column_type),
        }
    }
}

/// A table definition: an ordered column list plus stage bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name. The schema's map key is authoritative, so the name is
    /// never read from the wire; it is assigned when a schema is ingested.
    #[serde(skip)]
    pub name: String,

    /// Columns in serialization/DDL order
    #[serde(default)]
    pub columns: Vec<Column>,

    /// Optional reference to a table whose columns this table inherits
    #[serde(
        default,
        rename = "like",
        alias = "likeTable",
        alias = "like_table",
        skip_serializing_if = "Option::is_none"
    )]
    pub like_table: Option<String>,

    /// Which process writes this table during the current stage. Cleared at
    /// the start of every transform; only the stage's own extension can
    /// re-establish it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<TableOwner>,

    /// Whether the table's data may be discarded after a stage
    #[serde(default)]
    pub temporary: bool,

    /// The stage after which a temporary table's data may be discarded
    #[serde(
        default,
        alias = "expirationStage",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_stage: Option<u32>,

    /// Stage-local flag, analogous to [`Column::is_new`]. Never serialized.
    #[serde(skip)]
    pub is_new: bool,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            like_table: None,
            owner: None,
            temporary: false,
            expiration_stage: None,
            is_new: false,
        }
    }

    /// Create a table with the given columns.
    pub fn with_columns(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let mut table = Self::new(name);
        table.columns = columns;
        table
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column. Fails if a column of the same name exists.
    pub fn add_column(&mut self, column: Column) -> Result<(), SchemaError> {
        if self.column(&column.name).is_some() {
            return Err(SchemaError::DuplicateColumn {
                table: self.name.clone(),
                column: column.name,
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Replace the column of the same name in place, preserving its
    /// position in the column order.
    pub fn update_column(&mut self, column: Column) -> Result<(), SchemaError> {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(slot) => {
                *slot = column;
                Ok(())
            }
            None => Err(SchemaError::UnknownColumn {
                table: self.name.clone(),
                column: column.name,
            }),
        }
    }

    /// Identifier used for this table in generated bindings.
    pub fn binding_name(&self) -> String {
        naming::safe_identifier(&self.name)
    }

    /// Bulk-set the stage-local flags on this table and all its columns.
    pub fn set_new_flags(&mut self, flag: bool) {
        self.is_new = flag;
        for column in &mut self.columns {
            column.is_new = flag;
        }
    }

    fn hash_into(&self, hasher: &mut DefaultHasher) {
        self.name.hash(hasher);
        self.like_table.hash(hasher);
        self.owner.as_ref().map(TableOwner::as_str).hash(hasher);
        self.temporary.hash(hasher);
        self.expiration_stage.hash(hasher);
        for column in &self.columns {
            column.hash_into(hasher);
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.name)?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", column)?;
        }
        write!(f, ")")
    }
}

/// A versioned schema: the complete table set for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Opaque provenance tag (e.g. the upstream dump version). Carried
    /// through transforms unchanged and never interpreted.
    #[serde(default)]
    pub version: String,

    /// Tables by name. A `BTreeMap` keeps iteration deterministic.
    #[serde(default)]
    pub tables: BTreeMap<String, Table>,
}

impl Schema {
    /// Create an empty schema with the given version tag.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Parse a schema from its JSON form, assigning each table's name from
    /// its map key (the key is authoritative).
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let mut schema: Schema = serde_json::from_str(json)?;
        schema.assign_table_names();
        Ok(schema)
    }

    /// Copy each map key into its table's `name` field.
    pub fn assign_table_names(&mut self) {
        for (name, table) in &mut self.tables {
            table.name = name.clone();
        }
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Insert a table under the given name. The name parameter wins over
    /// any name already set on the table value. Fails if the name is taken.
    pub fn add_table(&mut self, name: impl Into<String>, mut table: Table) -> Result<(), SchemaError> {
        let name = name.into();
        if self.tables.contains_key(&name) {
            return Err(SchemaError::DuplicateTable(name));
        }
        table.name = name.clone();
        self.tables.insert(name, table);
        Ok(())
    }

    /// Bulk-set the stage-local flags on every table and column.
    pub fn set_new_flags(&mut self, flag: bool) {
        for table in self.tables.values_mut() {
            table.set_new_flags(flag);
        }
    }

    /// Structural fingerprint for quick schema comparison.
    ///
    /// Covers table/column structure in order; excludes the provenance
    /// version and the stage-local flags.
    pub fn content_hash(&self) -> String {
        let mut hasher = DefaultHasher::new();
        for table in self.tables.values() {
            table.hash_into(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}
