//! Merge engine: overlay several inspection passes of one wafer.

use std::collections::HashSet;

use log::{debug, info};

use crate::error::{KlarfError, Result, Warning};
use crate::types::*;
use crate::wafer::WaferMap;

/// `x' = a*x + b*y + c`, `y' = d*x + e*y + f`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 0.0,
            e: 1.0,
            f: 0.0,
        }
    }

    pub const fn translation(dx: f64, dy: f64) -> Self {
        Self {
            c: dx,
            f: dy,
            ..Self::identity()
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point {
            x: self.a * p.x + self.b * p.y + self.c,
            y: self.d * p.x + self.e * p.y + self.f,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Knobs for [`merge`].
#[derive(Clone, Debug, PartialEq)]
pub struct MergeOptions {
    /// Largest per-axis die pitch difference still considered the same grid.
    pub tolerance: f64,
    /// Per-source transforms by input position; missing entries are identity.
    pub transforms: Vec<AffineTransform>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            transforms: Vec::new(),
        }
    }
}

impl MergeOptions {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_transforms(mut self, transforms: Vec<AffineTransform>) -> Self {
        self.transforms = transforms;
        self
    }

    fn transform(&self, source: usize) -> AffineTransform {
        self.transforms.get(source).copied().unwrap_or_default()
    }
}

/// Die pitch must agree within tolerance; sample size differences only warn.
/// The pitch check is skipped when no input carries a `DiePitch`.
fn check_geometry(maps: &[&WaferMap], options: &MergeOptions) -> Result<Vec<Warning>> {
    let first = maps[0];
    let expected = if maps.iter().any(|m| m.die_pitch().is_ok()) {
        Some(first.die_pitch()?)
    } else {
        None
    };
    let expected_size = first.wafer_diameter().ok();
    let mut warnings = Vec::new();

    for (i, map) in maps.iter().enumerate().skip(1) {
        if let Some(expected) = expected {
            let found = map.die_pitch()?;
            if (found.x - expected.x).abs() > options.tolerance
                || (found.y - expected.y).abs() > options.tolerance
            {
                return Err(KlarfError::GeometryConflict {
                    source_index: i,
                    expected: (expected.x, expected.y),
                    found: (found.x, found.y),
                    tolerance: options.tolerance,
                });
            }
        }
        if let (Some(expected), Ok(found)) = (expected_size, map.wafer_diameter()) {
            if (found - expected).abs() > options.tolerance {
                warnings.push(Warning::SampleSizeConflict {
                    source_index: i,
                    expected,
                    found,
                });
            }
        }
    }
    Ok(warnings)
}

/// First-seen field order, later sources append their new fields. Names
/// differing only in case are one field, spelled as first seen.
fn union_schema(maps: &[&WaferMap]) -> Vec<String> {
    let mut schema: Vec<String> = Vec::new();
    for map in maps {
        for field in map.schema() {
            if !schema.iter().any(|f| f.eq_ignore_ascii_case(field)) {
                schema.push(field.clone());
            }
        }
    }
    schema
}

/// Combine wafer maps of one wafer into a new unified map.
///
/// Records are concatenated in input order, re-keyed as `<source>:<id>`,
/// tagged with their source name and padded with `Value::Null` for fields
/// their source lacks. Header sections come from the first map. Warnings of
/// every input are carried over in input order, followed by those raised by
/// the merge itself. Inputs are not modified.
pub fn merge(maps: &[&WaferMap], options: &MergeOptions) -> Result<WaferMap> {
    if maps.is_empty() {
        return Err(KlarfError::EmptyMerge);
    }
    let merge_warnings = check_geometry(maps, options)?;
    let mut warnings: Vec<Warning> = maps
        .iter()
        .flat_map(|m| m.warnings().iter().cloned())
        .collect();
    warnings.extend(merge_warnings);
    let schema = union_schema(maps);

    let total = maps.iter().map(|m| m.defects().len()).sum();
    let mut defects = Vec::with_capacity(total);
    let mut test_plan = Vec::new();
    let mut seen_dies = HashSet::new();

    for (ordinal, map) in maps.iter().enumerate() {
        let transform = options.transform(ordinal);
        let source = map
            .source()
            .map_or_else(|| format!("source{ordinal}"), str::to_string);
        debug!(
            "merging {} defects from {source} (identity transform: {})",
            map.defects().len(),
            transform.is_identity()
        );

        for defect in map.defects() {
            let mut record = defect.clone();
            record.id = format!("{ordinal}:{}", defect.id);
            if let Some(key) = record.attribute_key(FIELD_DEFECT_ID).map(str::to_string) {
                record.attributes.insert(key, Value::Text(record.id.clone()));
            }
            for field in &schema {
                if record.attribute_key(field).is_none() {
                    record.attributes.insert(field.clone(), Value::Null);
                }
            }
            record.position = record.position.map(|p| transform.apply(p));
            if record.source.is_none() {
                record.source = Some(source.clone());
            }
            defects.push(record);
        }

        for die in map.test_plan() {
            if seen_dies.insert(*die) {
                test_plan.push(*die);
            }
        }
    }

    info!(
        "merged {} wafer maps into {} defects over {} fields",
        maps.len(),
        defects.len(),
        schema.len()
    );
    let document = maps[0].document().clone();
    Ok(WaferMap::from_parts(document, schema, defects, test_plan, warnings))
}
