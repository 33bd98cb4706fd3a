//! KLARF document builder and parse entry points.

use std::collections::HashSet;
use std::io::Read;

use flate2::read::GzDecoder;
use log::{debug, warn};

use crate::error::{KlarfError, Result, Warning};
use crate::reader::StatementReader;
use crate::section::{self, ParsedSection};
use crate::types::*;
use crate::wafer::WaferMap;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Accumulates classified sections into a [`Document`].
struct DocumentBuilder {
    doc: Document,
}

impl DocumentBuilder {
    fn new() -> Self {
        Self {
            doc: Document::new(),
        }
    }

    fn warn(&mut self, warning: Warning) {
        warn!("{warning}");
        self.doc.warnings.push(warning);
    }

    fn push(&mut self, parsed: ParsedSection) -> Result<()> {
        let ParsedSection {
            name,
            section,
            line,
            warnings,
        } = parsed;
        for w in warnings {
            self.warn(w);
        }
        match section {
            Section::List(_) if self.doc.get(&name).is_some_and(Section::is_list) => {
                Err(KlarfError::DuplicateSection {
                    section: name,
                    line,
                })
            }
            Section::Raw(_) => {
                self.doc.append(name, section);
                Ok(())
            }
            _ => {
                if self.doc.insert(name.as_str(), section).is_some() {
                    debug!("line {line}: {name} overwritten");
                }
                Ok(())
            }
        }
    }

    /// Cross-section checks. Producers diverge here, so these only warn.
    fn check_references(&mut self) {
        let Some(defects) = self.doc.list(SEC_DEFECT_LIST) else {
            return;
        };
        let mut found = Vec::new();

        let plan_bounds = self.doc.list(SEC_TEST_PLAN).and_then(|plan| {
            let dies: Vec<(i64, i64)> = (0..plan.rows.len())
                .filter_map(|i| {
                    Some((
                        plan.get(i, FIELD_XINDEX)?.as_i64()?,
                        plan.get(i, FIELD_YINDEX)?.as_i64()?,
                    ))
                })
                .collect();
            let min_x = dies.iter().map(|d| d.0).min()?;
            let max_x = dies.iter().map(|d| d.0).max()?;
            let min_y = dies.iter().map(|d| d.1).min()?;
            let max_y = dies.iter().map(|d| d.1).max()?;
            Some((min_x..=max_x, min_y..=max_y))
        });
        let classes: Option<HashSet<i64>> = self.doc.list(SEC_CLASS_LOOKUP).map(|lookup| {
            (0..lookup.rows.len())
                .filter_map(|i| lookup.get(i, FIELD_CLASS)?.as_i64())
                .collect()
        });

        for i in 0..defects.rows.len() {
            let defect_id = defects
                .get(i, FIELD_DEFECT_ID)
                .map_or_else(|| i.to_string(), Value::to_string);
            if let (Some((xs, ys)), Some(x), Some(y)) = (
                &plan_bounds,
                defects.get(i, FIELD_XINDEX).and_then(Value::as_i64),
                defects.get(i, FIELD_YINDEX).and_then(Value::as_i64),
            ) {
                if !xs.contains(&x) || !ys.contains(&y) {
                    found.push(Warning::DieOutsideTestPlan {
                        defect_id: defect_id.clone(),
                        x,
                        y,
                    });
                }
            }
            if let (Some(classes), Some(class)) = (
                &classes,
                defects.get(i, FIELD_CLASS).and_then(Value::as_i64),
            ) {
                if !classes.contains(&class) {
                    found.push(Warning::UnknownClass { defect_id, class });
                }
            }
        }
        for w in found {
            self.warn(w);
        }
    }

    fn finish(mut self) -> Document {
        self.check_references();
        self.doc
    }
}

/// Parse KLARF text into a [`Document`].
///
/// Malformed statements and duplicate list sections abort the parse; every
/// other anomaly lands in `Document::warnings`.
pub fn parse_document(text: &str) -> Result<Document> {
    let mut builder = DocumentBuilder::new();
    for stmt in StatementReader::new(text) {
        let stmt = stmt?;
        let parsed = section::parse_statement(&stmt, &builder.doc);
        builder.push(parsed)?;
    }
    let doc = builder.finish();
    debug!(
        "parsed {} sections with {} warnings",
        doc.len(),
        doc.warnings.len()
    );
    Ok(doc)
}

/// Parse KLARF text into a [`WaferMap`].
pub fn parse_klarf(text: &str) -> Result<WaferMap> {
    Ok(WaferMap::from_document(parse_document(text)?))
}

/// Read a whole KLARF stream (plain or gzip-compressed) and parse it.
pub fn read_klarf<R: Read>(mut reader: R) -> Result<WaferMap> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut inflated)?;
        raw = inflated;
    }
    let text = std::str::from_utf8(&raw).map_err(|e| {
        let valid = e.valid_up_to();
        KlarfError::MalformedStatement {
            line: raw[..valid].iter().filter(|&&b| b == b'\n').count() + 1,
            reason: format!("invalid UTF-8 at byte {valid}"),
        }
    })?;
    parse_klarf(text)
}
