//! Error and warning taxonomy.
//!
//! Fatal problems are [`KlarfError`] values and abort the call that raised
//! them. Content-level anomalies are [`Warning`] values accumulated on the
//! resulting document or wafer map.

use std::io;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KlarfError>;

#[derive(Debug, Error)]
pub enum KlarfError {
    #[error("line {line}: malformed statement: {reason}")]
    MalformedStatement { line: usize, reason: String },

    #[error("line {line}: duplicate section {section}")]
    DuplicateSection { section: String, line: usize },

    #[error("incomplete geometry: {field} is missing")]
    IncompleteGeometry { field: &'static str },

    #[error(
        "die pitch conflict in source {source_index}: expected {expected:?}, found {found:?} (tolerance {tolerance})"
    )]
    GeometryConflict {
        source_index: usize,
        expected: (f64, f64),
        found: (f64, f64),
        tolerance: f64,
    },

    #[error("merge requires at least one wafer map")]
    EmptyMerge,

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Fieldless discriminant of [`Warning`], handy for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum WarningKind {
    RowCountMismatch,
    UnknownSection,
    SchemaCountMismatch,
    FieldCountMismatch,
    PartialRow,
    MissingSchema,
    TypeCoercion,
    DieOutsideTestPlan,
    UnknownClass,
    SampleSizeConflict,
}

#[derive(Clone, Debug, PartialEq, Error, Serialize)]
pub enum Warning {
    #[error("line {line}: {section} declares {declared} rows but {actual} are present")]
    RowCountMismatch {
        section: String,
        line: usize,
        declared: usize,
        actual: usize,
    },

    #[error("line {line}: unknown section {section} kept as raw tokens")]
    UnknownSection { section: String, line: usize },

    #[error("line {line}: {section} declares {declared} fields but names {actual}")]
    SchemaCountMismatch {
        section: String,
        line: usize,
        declared: usize,
        actual: usize,
    },

    #[error("line {line}: {section} expects {expected} fields, found {actual}")]
    FieldCountMismatch {
        section: String,
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("line {line}: {section} has a partial row of {actual} of {expected} values")]
    PartialRow {
        section: String,
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("line {line}: {section} has no preceding {schema}; kept as raw tokens")]
    MissingSchema {
        section: String,
        schema: String,
        line: usize,
    },

    #[error("line {line}: {field} value {token:?} is not a valid {expected}")]
    TypeCoercion {
        field: String,
        token: String,
        expected: &'static str,
        line: usize,
    },

    #[error("defect {defect_id} at die ({x}, {y}) is outside the sample test plan")]
    DieOutsideTestPlan { defect_id: String, x: i64, y: i64 },

    #[error("defect {defect_id} uses class {class} missing from ClassLookup")]
    UnknownClass { defect_id: String, class: i64 },

    #[error("source {source_index} sample size {found} differs from {expected}")]
    SampleSizeConflict {
        source_index: usize,
        expected: f64,
        found: f64,
    },
}

impl Warning {
    pub fn kind(&self) -> WarningKind {
        match self {
            Warning::RowCountMismatch { .. } => WarningKind::RowCountMismatch,
            Warning::UnknownSection { .. } => WarningKind::UnknownSection,
            Warning::SchemaCountMismatch { .. } => WarningKind::SchemaCountMismatch,
            Warning::FieldCountMismatch { .. } => WarningKind::FieldCountMismatch,
            Warning::PartialRow { .. } => WarningKind::PartialRow,
            Warning::MissingSchema { .. } => WarningKind::MissingSchema,
            Warning::TypeCoercion { .. } => WarningKind::TypeCoercion,
            Warning::DieOutsideTestPlan { .. } => WarningKind::DieOutsideTestPlan,
            Warning::UnknownClass { .. } => WarningKind::UnknownClass,
            Warning::SampleSizeConflict { .. } => WarningKind::SampleSizeConflict,
        }
    }

    /// Source line the warning points at, when it has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            Warning::RowCountMismatch { line, .. }
            | Warning::UnknownSection { line, .. }
            | Warning::SchemaCountMismatch { line, .. }
            | Warning::FieldCountMismatch { line, .. }
            | Warning::PartialRow { line, .. }
            | Warning::MissingSchema { line, .. }
            | Warning::TypeCoercion { line, .. } => Some(*line),
            _ => None,
        }
    }
}
