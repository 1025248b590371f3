//! Extension schema model: the declarative delta applied at each stage.
//!
//! An extension shares the column/table vocabulary of the entity model but
//! every table-level field is optional. A table may be declared with
//! nothing but a `like` reference, in which case its whole column set is
//! inherited. The map key is authoritative for a table's name; any name
//! embedded in the value is ignored.
//!
//! The engine never mutates a caller's extension: the transform works on a
//! private deep copy.

use crate::model::Column;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_protocol::TableOwner;

/// A partial table definition inside an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionTable {
    /// Assigned from the extension's map key on ingestion; never read from
    /// the wire.
    #[serde(skip)]
    pub name: String,

    /// Columns to add (or redefine, with the override flag). May be empty
    /// when the table relies solely on `like` inheritance.
    #[serde(default)]
    pub columns: Vec<Column>,

    /// Inherit the column set of another table.
    #[serde(
        default,
        rename = "like",
        alias = "likeTable",
        alias = "like_table",
        skip_serializing_if = "Option::is_none"
    )]
    pub like_table: Option<String>,

    /// Declare the process that writes this table during the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<TableOwner>,

    /// Declare the table's data discardable after `expiration_stage`.
    #[serde(default)]
    pub temporary: bool,

    #[serde(
        default,
        alias = "expirationStage",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_stage: Option<u32>,
}

impl ExtensionTable {
    /// A table defined solely by inheritance.
    pub fn like(table: impl Into<String>) -> Self {
        Self {
            like_table: Some(table.into()),
            ..Self::default()
        }
    }

    /// A table defined by a literal column list.
    pub fn with_columns(columns: Vec<Column>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Append a literal column.
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Declare ownership for the stage.
    pub fn with_owner(mut self, owner: TableOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Declare the table temporary, expiring after the given stage.
    pub fn temporary_until(mut self, stage: u32) -> Self {
        self.temporary = true;
        self.expiration_stage = Some(stage);
        self
    }
}

/// The full delta for one stage transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSchema {
    /// Opaque provenance tag for the delta itself.
    #[serde(default)]
    pub version: String,

    /// Tables to add or extend, by name.
    #[serde(default)]
    pub tables: BTreeMap<String, ExtensionTable>,
}

impl ExtensionSchema {
    /// Create an empty extension with the given version tag.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Parse an extension from its JSON form, assigning each table's name
    /// from its map key.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let mut extension: ExtensionSchema = serde_json::from_str(json)?;
        extension.assign_table_names();
        Ok(extension)
    }

    /// Copy each map key into its table's `name` field.
    pub fn assign_table_names(&mut self) {
        for (name, table) in &mut self.tables {
            table.name = name.clone();
        }
    }

    /// Add a table under the given name (the name wins over any name set on
    /// the value). Re-adding a name replaces the earlier entry.
    pub fn with_table(mut self, name: impl Into<String>, mut table: ExtensionTable) -> Self {
        let name = name.into();
        table.name = name.clone();
        self.tables.insert(name, table);
        self
    }
}
