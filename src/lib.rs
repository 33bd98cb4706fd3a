//! klarf-rs: KLARF defect file parser, wafer-map model and multi-pass merge,
//! with optional Python bindings.
//!
//! Text flows `reader` (statements) → `section` (typed sections) →
//! `parser` (document) → `wafer` (wafer map) → `merge` (unified map);
//! `writer` turns documents and maps back into KLARF text.

pub mod error;
pub mod merge;
pub mod parser;
pub mod reader;
pub mod section;
pub mod types;
pub mod wafer;
pub mod writer;

#[cfg(feature = "python")]
mod python;

pub use error::{KlarfError, Result, Warning, WarningKind};
pub use merge::{merge, AffineTransform, MergeOptions};
pub use parser::{parse_document, parse_klarf, read_klarf};
pub use types::{DefectRecord, DefectTable, DieIndex, Document, Point, Section, Value};
pub use wafer::{Orientation, Region, WaferMap};
pub use writer::{write_document, write_klarf};
