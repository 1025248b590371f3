//! Shared vocabulary for the Strata pipeline crates.
//!
//! Every crate that talks about warehouse schemas uses the types defined
//! here: the canonical [`ColumnType`] enum and the [`TableOwner`] tag.
//! Keeping them in one leaf crate means the schema engine and the
//! downstream generators can never disagree about what a "timestamp" is.
//!
//! # Modules
//!
//! - [`types`]: canonical column types and the table-owner tag
//! - [`naming`]: canonicalization of table/column names into binding-safe
//!   identifiers

pub mod naming;
pub mod types;

pub use types::{ColumnType, TableOwner};
