//! Canonical column types and ownership tags.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Canonical warehouse column type - the SINGLE SOURCE OF TRUTH for types.
///
/// Schema dumps from different sources spell these inconsistently
/// ("integer" vs "int", "double precision" vs "double"). Deserialization
/// accepts the legacy spellings; serialization always emits the canonical
/// lowercase name, so any schema that round-trips through this crate comes
/// out normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 64-bit signed integer
    BigInt,
    /// 32-bit signed integer
    Int,
    /// Double-precision floating point
    Double,
    /// Boolean (true/false)
    Boolean,
    /// Unbounded UTF-8 text
    Text,
    /// Bounded text; the only type that carries a length
    VarChar,
    /// Date (no time component)
    Date,
    /// Date and time without timezone
    DateTime,
    /// Timestamp without timezone
    Timestamp,
    /// Enumerated string; the legal values live in the column description
    Enum,
    /// Opaque identifier (GUID/UUID), stored as text
    Guid,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "bigint",
            ColumnType::Int => "int",
            ColumnType::Double => "double",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::VarChar => "varchar",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Enum => "enum",
            ColumnType::Guid => "guid",
        }
    }

    /// Whether a length bound is meaningful for this type.
    pub fn requires_length(&self) -> bool {
        matches!(self, ColumnType::VarChar)
    }

    /// Whether values of this type carry a time-of-day component.
    pub fn is_time_like(&self) -> bool {
        matches!(self, ColumnType::DateTime | ColumnType::Timestamp)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bigint" | "big_int" => Ok(ColumnType::BigInt),
            "int" | "integer" => Ok(ColumnType::Int),
            "double" | "double precision" | "double_precision" | "float" => Ok(ColumnType::Double),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "text" => Ok(ColumnType::Text),
            "varchar" | "character varying" => Ok(ColumnType::VarChar),
            "date" => Ok(ColumnType::Date),
            "datetime" => Ok(ColumnType::DateTime),
            "timestamp" => Ok(ColumnType::Timestamp),
            "enum" => Ok(ColumnType::Enum),
            "guid" | "uuid" => Ok(ColumnType::Guid),
            _ => Err(format!("Invalid column type: '{}'", s)),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Tag naming the stage/process responsible for writing a table.
///
/// Opaque to the engine: it is cleared when a schema crosses into a new
/// stage and re-established only when the stage's extension declares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableOwner(String);

impl TableOwner {
    pub fn new(tag: impl Into<String>) -> Self {
        TableOwner(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableOwner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("Table owner tag must not be empty".to_string());
        }
        Ok(TableOwner(trimmed.to_string()))
    }
}

impl Serialize for TableOwner {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TableOwner {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
