//! Per-stage schema sequence and packaging metadata.
//!
//! A pipeline materializes one schema per stage. Stage 0 arrives verbatim
//! from an external source; every later stage is computed from its
//! predecessor plus that stage's extension delta, strictly in increasing
//! order. Downstream generators read the finished [`PipelineSpec`] as an
//! indexed, read-only lookup.

use crate::extension::ExtensionSchema;
use crate::model::Schema;
use crate::transform::{transform, SchemaConflictError};
use thiserror::Error;
use tracing::info;

/// Errors raised by stage bookkeeping.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage {index} out of range for a {stage_count}-stage pipeline")]
    OutOfRange { index: usize, stage_count: usize },

    #[error("Schema for stage {index} has not been computed yet")]
    NotComputed { index: usize },

    #[error("Schema for stage {index} is already set")]
    AlreadyComputed { index: usize },

    #[error("Stage 0 is sourced externally and cannot be produced from an extension")]
    ExternalBaseStage,

    #[error("Expected {expected} stage metadata entries for {deltas} extension deltas, got {got}")]
    MetadataMismatch {
        expected: usize,
        deltas: usize,
        got: usize,
    },

    #[error(transparent)]
    Conflict(#[from] SchemaConflictError),
}

/// Naming and packaging metadata for one stage, consumed by the binding
/// and loader generators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMetadata {
    /// Class-name prefix for generated bindings (e.g. "Stage1")
    pub prefix: String,

    /// Package/module path the stage's bindings are generated into
    pub binding_package: String,

    /// Directory URI holding the stage's data
    pub data_directory: String,
}

impl StageMetadata {
    pub fn new(
        prefix: impl Into<String>,
        binding_package: impl Into<String>,
        data_directory: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            binding_package: binding_package.into(),
            data_directory: data_directory.into(),
        }
    }
}

#[derive(Debug)]
struct Stage {
    metadata: StageMetadata,
    schema: Option<Schema>,
}

/// The ordered sequence of (metadata, schema) pairs for a pipeline run.
#[derive(Debug)]
pub struct PipelineSpec {
    stages: Vec<Stage>,
}

impl PipelineSpec {
    /// Create a spec with one entry per stage; no schemas are set yet.
    pub fn new(metadata: Vec<StageMetadata>) -> Self {
        let stages = metadata
            .into_iter()
            .map(|metadata| Stage {
                metadata,
                schema: None,
            })
            .collect();
        Self { stages }
    }

    /// Build a complete spec by folding the base schema through one
    /// extension delta per later stage. Requires exactly one metadata
    /// entry per stage (deltas plus the external base stage).
    pub fn evolve(
        metadata: Vec<StageMetadata>,
        base: Schema,
        deltas: &[ExtensionSchema],
        allow_override: bool,
    ) -> Result<Self, StageError> {
        if metadata.len() != deltas.len() + 1 {
            return Err(StageError::MetadataMismatch {
                expected: deltas.len() + 1,
                deltas: deltas.len(),
                got: metadata.len(),
            });
        }

        let mut spec = Self::new(metadata);
        spec.set_base_schema(base)?;
        for (offset, delta) in deltas.iter().enumerate() {
            spec.apply_extension(offset + 1, delta, allow_override)?;
        }
        Ok(spec)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Install the externally sourced stage-0 schema.
    pub fn set_base_schema(&mut self, schema: Schema) -> Result<(), StageError> {
        let stage = self.slot_mut(0)?;
        if stage.schema.is_some() {
            return Err(StageError::AlreadyComputed { index: 0 });
        }
        stage.schema = Some(schema);
        Ok(())
    }

    /// Compute stage `index` from its predecessor's schema and the given
    /// extension delta. Stages must be computed in strictly increasing
    /// order; the predecessor's schema must already be present.
    pub fn apply_extension(
        &mut self,
        index: usize,
        extension: &ExtensionSchema,
        allow_override: bool,
    ) -> Result<(), StageError> {
        if index == 0 {
            return Err(StageError::ExternalBaseStage);
        }
        // Validate the target slot before borrowing the predecessor.
        if self.slot(index)?.schema.is_some() {
            return Err(StageError::AlreadyComputed { index });
        }
        let previous = self
            .slot(index - 1)?
            .schema
            .as_ref()
            .ok_or(StageError::NotComputed { index: index - 1 })?;

        let next = transform(previous, extension, allow_override)?;
        info!(
            stage = index,
            version = %next.version,
            tables = next.tables.len(),
            "computed stage schema"
        );

        if let Some(stage) = self.stages.get_mut(index) {
            stage.schema = Some(next);
        }
        Ok(())
    }

    /// The schema materialized for a stage.
    pub fn schema(&self, index: usize) -> Result<&Schema, StageError> {
        self.slot(index)?
            .schema
            .as_ref()
            .ok_or(StageError::NotComputed { index })
    }

    /// The naming/packaging metadata for a stage.
    pub fn metadata(&self, index: usize) -> Result<&StageMetadata, StageError> {
        Ok(&self.slot(index)?.metadata)
    }

    fn slot(&self, index: usize) -> Result<&Stage, StageError> {
        self.stages.get(index).ok_or(StageError::OutOfRange {
            index,
            stage_count: self.stages.len(),
        })
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Stage, StageError> {
        let stage_count = self.stages.len();
        self.stages.get_mut(index).ok_or(StageError::OutOfRange {
            index,
            stage_count,
        })
    }
}
