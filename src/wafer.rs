//! Wafer map model: one parsed document plus typed defect records, the
//! sample test plan and derived geometry.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::error::{KlarfError, Result, Warning};
use crate::types::*;

/// KLARF date/time form, e.g. `03-15-21 14:22:10`.
pub const TIMESTAMP_FORMAT: &str = "%m-%d-%y %H:%M:%S";

/// `SampleSize` diameters are in millimetres, coordinates in micrometres.
const MM_TO_UM: f64 = 1000.0;

/// Geometry read from the header records. Fields are independent: a file
/// may carry a die pitch and no sample size.
#[derive(Clone, Debug, Default, PartialEq)]
struct Geometry {
    die_pitch: Option<Point>,
    die_origin: Option<Point>,
    center: Option<Point>,
    diameter: Option<f64>,
}

fn record_point(doc: &Document, name: &str) -> Option<Point> {
    Some(Point {
        x: doc.record_field(name, "X")?.as_f64()?,
        y: doc.record_field(name, "Y")?.as_f64()?,
    })
}

impl Geometry {
    fn read(doc: &Document) -> Self {
        Self {
            die_pitch: record_point(doc, SEC_DIE_PITCH),
            die_origin: record_point(doc, SEC_DIE_ORIGIN),
            center: record_point(doc, SEC_CENTER),
            diameter: doc
                .record_field(SEC_SAMPLE_SIZE, "DIAMETER")
                .and_then(Value::as_f64)
                .map(|mm| mm * MM_TO_UM),
        }
    }

    /// Wafer-relative position: die corner plus in-die offset, shifted so
    /// the wafer centre is the origin.
    fn position(&self, die: Option<DieIndex>, rel: Option<Point>) -> Option<Point> {
        let (pitch, center, die, rel) = (self.die_pitch?, self.center?, die?, rel?);
        Some(Point {
            x: die.x as f64 * pitch.x + rel.x - center.x,
            y: die.y as f64 * pitch.y + rel.y - center.y,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Orientation {
    /// e.g. `NOTCH` or `FLAT`.
    pub mark_type: Option<String>,
    /// e.g. `DOWN`.
    pub mark_location: String,
}

/// Query region in wafer-relative coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Region {
    Rect { min: Point, max: Point },
    Circle { center: Point, radius: f64 },
}

impl Region {
    pub fn contains(&self, p: Point) -> bool {
        match *self {
            Region::Rect { min, max } => {
                p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y
            }
            Region::Circle { center, radius } => {
                let (dx, dy) = (p.x - center.x, p.y - center.y);
                dx * dx + dy * dy <= radius * radius
            }
        }
    }
}

fn defect_from_row(
    schema: &[String],
    row: &[Value],
    ordinal: usize,
    geometry: &Geometry,
) -> DefectRecord {
    let attributes: HashMap<String, Value> = schema.iter().cloned().zip(row.iter().cloned()).collect();
    let get = |name: &str| {
        schema
            .iter()
            .position(|f| f.eq_ignore_ascii_case(name))
            .and_then(|i| row.get(i))
            .filter(|v| !v.is_null())
    };

    let die = match (
        get(FIELD_XINDEX).and_then(Value::as_i64),
        get(FIELD_YINDEX).and_then(Value::as_i64),
    ) {
        (Some(x), Some(y)) => Some(DieIndex { x, y }),
        _ => None,
    };
    let rel = match (
        get(FIELD_XREL).and_then(Value::as_f64),
        get(FIELD_YREL).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Some(Point { x, y }),
        _ => None,
    };
    let id = get(FIELD_DEFECT_ID).map_or_else(|| (ordinal + 1).to_string(), Value::to_string);
    let size = get(FIELD_DSIZE).and_then(Value::as_f64);
    let area = get(FIELD_DEFECT_AREA).and_then(Value::as_f64);
    let class = get(FIELD_CLASS).and_then(Value::as_i64);

    DefectRecord {
        id,
        die,
        rel,
        position: geometry.position(die, rel),
        size,
        area,
        class,
        source: None,
        attributes,
    }
}

/// Structured, queryable view of one inspection pass.
///
/// Immutable once built; [`crate::merge::merge`] produces new maps.
#[derive(Clone, Debug)]
pub struct WaferMap {
    document: Document,
    schema: Vec<String>,
    defects: Vec<DefectRecord>,
    test_plan: Vec<DieIndex>,
    warnings: Vec<Warning>,
    source: Option<String>,
    geometry: OnceCell<Geometry>,
}

impl WaferMap {
    pub fn from_document(document: Document) -> Self {
        let geometry = Geometry::read(&document);
        let (schema, defects) = match document.list(SEC_DEFECT_LIST) {
            Some(list) => {
                let defects = list
                    .rows
                    .iter()
                    .enumerate()
                    .map(|(i, row)| defect_from_row(&list.schema, row, i, &geometry))
                    .collect();
                (list.schema.clone(), defects)
            }
            None => (
                document.schema(SEC_DEFECT_SPEC).map(<[String]>::to_vec).unwrap_or_default(),
                Vec::new(),
            ),
        };
        let test_plan = document
            .list(SEC_TEST_PLAN)
            .map(|plan| {
                (0..plan.rows.len())
                    .filter_map(|i| {
                        Some(DieIndex {
                            x: plan.get(i, FIELD_XINDEX)?.as_i64()?,
                            y: plan.get(i, FIELD_YINDEX)?.as_i64()?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let warnings = document.warnings.clone();

        Self {
            document,
            schema,
            defects,
            test_plan,
            warnings,
            source: None,
            geometry: OnceCell::with_value(geometry),
        }
    }

    pub(crate) fn from_parts(
        document: Document,
        schema: Vec<String>,
        defects: Vec<DefectRecord>,
        test_plan: Vec<DieIndex>,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            document,
            schema,
            defects,
            test_plan,
            warnings,
            source: None,
            geometry: OnceCell::new(),
        }
    }

    /// Name this map (usually its file name) and tag untagged records with it.
    pub fn with_source(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        for defect in self.defects.iter_mut().filter(|d| d.source.is_none()) {
            defect.source = Some(name.clone());
        }
        self.source = Some(name);
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Defect attribute names in column order.
    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn defects(&self) -> &[DefectRecord] {
        &self.defects
    }

    /// Dies inspected in this pass, with or without defects.
    pub fn test_plan(&self) -> &[DieIndex] {
        &self.test_plan
    }

    // ── Header scalars ──────────────────────────────────────────────

    fn text(&self, name: &str) -> Option<String> {
        self.document
            .scalar(name)
            .filter(|v| !v.is_null())
            .map(Value::to_string)
    }

    pub fn lot_id(&self) -> Option<String> {
        self.text(SEC_LOT_ID)
    }

    pub fn wafer_id(&self) -> Option<String> {
        self.text(SEC_WAFER_ID)
    }

    pub fn step_id(&self) -> Option<String> {
        self.text(SEC_STEP_ID)
    }

    pub fn device_id(&self) -> Option<String> {
        self.text(SEC_DEVICE_ID)
    }

    pub fn slot(&self) -> Option<i64> {
        self.document.scalar(SEC_SLOT).and_then(Value::as_i64)
    }

    pub fn file_version(&self) -> Option<(i64, i64)> {
        Some((
            self.document.record_field(SEC_FILE_VERSION, "MAJOR")?.as_i64()?,
            self.document.record_field(SEC_FILE_VERSION, "MINOR")?.as_i64()?,
        ))
    }

    /// `ResultTimestamp`, falling back to `FileTimestamp`.
    pub fn inspection_timestamp(&self) -> Option<NaiveDateTime> {
        [SEC_RESULT_TIMESTAMP, "FileTimestamp"].iter().find_map(|name| {
            let date = self.document.record_field(name, "DATE")?.as_str()?;
            let time = self.document.record_field(name, "TIME")?.as_str()?;
            NaiveDateTime::parse_from_str(&format!("{date} {time}"), TIMESTAMP_FORMAT).ok()
        })
    }

    pub fn class_lookup(&self) -> Vec<ClassEntry> {
        let Some(list) = self.document.list(SEC_CLASS_LOOKUP) else {
            return Vec::new();
        };
        (0..list.rows.len())
            .filter_map(|i| {
                Some(ClassEntry {
                    number: list.get(i, FIELD_CLASS)?.as_i64()?,
                    name: list.get(i, FIELD_CLASS_NAME)?.to_string(),
                })
            })
            .collect()
    }

    // ── Derived geometry ────────────────────────────────────────────

    fn geometry(&self) -> &Geometry {
        self.geometry.get_or_init(|| Geometry::read(&self.document))
    }

    pub fn die_pitch(&self) -> Result<Point> {
        self.geometry()
            .die_pitch
            .ok_or(KlarfError::IncompleteGeometry { field: SEC_DIE_PITCH })
    }

    pub fn die_origin(&self) -> Result<Point> {
        self.geometry()
            .die_origin
            .ok_or(KlarfError::IncompleteGeometry { field: SEC_DIE_ORIGIN })
    }

    pub fn center_location(&self) -> Result<Point> {
        self.geometry()
            .center
            .ok_or(KlarfError::IncompleteGeometry { field: SEC_CENTER })
    }

    /// Wafer diameter in coordinate units.
    pub fn wafer_diameter(&self) -> Result<f64> {
        self.geometry()
            .diameter
            .ok_or(KlarfError::IncompleteGeometry { field: SEC_SAMPLE_SIZE })
    }

    pub fn wafer_radius(&self) -> Result<f64> {
        Ok(self.wafer_diameter()? / 2.0)
    }

    pub fn orientation(&self) -> Result<Orientation> {
        let mark_location = self
            .text(SEC_MARK_LOCATION)
            .ok_or(KlarfError::IncompleteGeometry { field: SEC_MARK_LOCATION })?;
        Ok(Orientation {
            mark_type: self.text(SEC_MARK_TYPE),
            mark_location,
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Defects whose wafer-relative position lies in `region`, in order.
    pub fn within(&self, region: &Region) -> Result<Vec<&DefectRecord>> {
        let mut out = Vec::new();
        for defect in &self.defects {
            let position = match defect.position {
                Some(p) => p,
                None => {
                    // Report the header field that is missing, if any.
                    self.die_pitch()?;
                    self.center_location()?;
                    return Err(KlarfError::IncompleteGeometry {
                        field: "XINDEX/YINDEX/XREL/YREL",
                    });
                }
            };
            if region.contains(position) {
                out.push(defect);
            }
        }
        Ok(out)
    }

    pub fn within_rect(&self, min: Point, max: Point) -> Result<Vec<&DefectRecord>> {
        self.within(&Region::Rect { min, max })
    }

    pub fn within_circle(&self, center: Point, radius: f64) -> Result<Vec<&DefectRecord>> {
        self.within(&Region::Circle { center, radius })
    }

    pub fn filter<F>(&self, predicate: F) -> Vec<&DefectRecord>
    where
        F: Fn(&DefectRecord) -> bool,
    {
        self.defects.iter().filter(|d| predicate(d)).collect()
    }

    pub fn with_classes(&self, classes: &[i64]) -> Vec<&DefectRecord> {
        self.filter(|d| d.class.is_some_and(|c| classes.contains(&c)))
    }

    // ── Export views ────────────────────────────────────────────────

    /// Flat table: schema columns, then wafer-relative position and source.
    pub fn table(&self) -> DefectTable {
        let mut columns = self.schema.clone();
        columns.extend([COL_XACTUAL, COL_YACTUAL, COL_SOURCE].map(String::from));
        let rows = self
            .defects
            .iter()
            .map(|d| {
                let mut row: Vec<Value> = self.schema.iter().map(|f| d.attribute(f).clone()).collect();
                row.push(d.position.map_or(Value::Null, |p| Value::Float(p.x)));
                row.push(d.position.map_or(Value::Null, |p| Value::Float(p.y)));
                row.push(d.source.clone().map_or(Value::Null, Value::Text));
                row
            })
            .collect();
        DefectTable { columns, rows }
    }

    /// Document with the defect and test-plan sections rebuilt from this
    /// map's records, ready for [`crate::writer::write_document`].
    pub fn to_document(&self) -> Document {
        let mut doc = self.document.clone();
        doc.warnings.clear();
        // Sections added below must precede the terminator.
        let eof = doc.remove("EndOfFile");
        if !self.test_plan.is_empty() {
            doc.insert(
                SEC_TEST_PLAN,
                Section::List(ListSection {
                    declared_count: Some(self.test_plan.len()),
                    schema: vec![FIELD_XINDEX.to_string(), FIELD_YINDEX.to_string()],
                    rows: self
                        .test_plan
                        .iter()
                        .map(|d| vec![Value::Int(d.x), Value::Int(d.y)])
                        .collect(),
                }),
            );
        }
        if !self.schema.is_empty() || doc.contains(SEC_DEFECT_LIST) {
            let counted = doc
                .list(SEC_DEFECT_LIST)
                .is_some_and(|l| l.declared_count.is_some());
            doc.insert(SEC_DEFECT_SPEC, Section::Schema(self.schema.clone()));
            doc.insert(
                SEC_DEFECT_LIST,
                Section::List(ListSection {
                    declared_count: counted.then_some(self.defects.len()),
                    schema: self.schema.clone(),
                    rows: self
                        .defects
                        .iter()
                        .map(|d| self.schema.iter().map(|f| d.attribute(f).clone()).collect())
                        .collect(),
                }),
            );
        }
        if let Some(eof) = eof {
            doc.insert("EndOfFile", eof);
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_klarf;
    use chrono::NaiveDate;

    const KLARF: &str = "\
FileVersion 1 2;
ResultTimestamp 03-15-21 14:22:10;
LotID \"LOT42\";
SampleSize 1 200;
StepID \"ETCH\";
SampleOrientationMarkType NOTCH;
OrientationMarkLocation DOWN;
DiePitch 10000.0 10000.0;
DieOrigin 0.0 0.0;
WaferID \"W07\";
Slot 7;
SampleCenterLocation 5000.0 5000.0;
ClassLookup 2
 1 \"Particle\"
 2 \"Scratch\";
SampleTestPlan 3
 0 0
 1 0
 0 1;
DefectRecordSpec 6 DEFECTID XREL YREL XINDEX YINDEX CLASSNUMBER;
DefectList
 1 100.0 200.0 0 0 1
 2 9000.0 500.0 1 0 2
 3 5000.0 5000.0 0 1 1;
EndOfFile;
";

    #[test]
    fn test_header_accessors() {
        let map = parse_klarf(KLARF).unwrap();
        assert_eq!(map.lot_id().as_deref(), Some("LOT42"));
        assert_eq!(map.wafer_id().as_deref(), Some("W07"));
        assert_eq!(map.step_id().as_deref(), Some("ETCH"));
        assert_eq!(map.slot(), Some(7));
        assert_eq!(map.file_version(), Some((1, 2)));
        let expected = NaiveDate::from_ymd_opt(2021, 3, 15)
            .unwrap()
            .and_hms_opt(14, 22, 10)
            .unwrap();
        assert_eq!(map.inspection_timestamp(), Some(expected));
        assert_eq!(map.class_lookup()[1].name, "Scratch");
        assert!(map.warnings().is_empty());
    }

    #[test]
    fn test_geometry() {
        let map = parse_klarf(KLARF).unwrap();
        assert_eq!(map.die_pitch().unwrap(), Point { x: 10000.0, y: 10000.0 });
        assert_eq!(map.wafer_diameter().unwrap(), 200_000.0);
        assert_eq!(map.wafer_radius().unwrap(), 100_000.0);
        let o = map.orientation().unwrap();
        assert_eq!(o.mark_type.as_deref(), Some("NOTCH"));
        assert_eq!(o.mark_location, "DOWN");
    }

    #[test]
    fn test_missing_geometry_fails_only_on_access() {
        let map = parse_klarf("LotID \"A\";\nSampleTestPlan 1 0 0;").unwrap();
        assert_eq!(map.lot_id().as_deref(), Some("A"));
        assert!(matches!(
            map.die_pitch(),
            Err(KlarfError::IncompleteGeometry { field: "DiePitch" })
        ));
        assert!(map.wafer_radius().is_err());
        assert_eq!(map.test_plan(), &[DieIndex { x: 0, y: 0 }]);
    }

    #[test]
    fn test_geometry_cached_at_construction() {
        let map = parse_klarf(KLARF).unwrap();
        assert!(map.geometry.get().is_some());
        assert_eq!(map.die_pitch().unwrap(), map.geometry().die_pitch.unwrap());
    }

    #[test]
    fn test_mixed_case_fields_bind() {
        let map = parse_klarf(
            "DiePitch 1000.0 1000.0;\nSampleCenterLocation 0.0 0.0;\n\
             DefectRecordSpec 6 DefectID XRel YRel XIndex YIndex ClassNumber;\n\
             DefectList\n 7 1.0 2.0 2 3 4;",
        )
        .unwrap();
        let d = &map.defects()[0];
        assert_eq!(d.id, "7");
        assert_eq!(d.die, Some(DieIndex { x: 2, y: 3 }));
        assert_eq!(d.position, Some(Point { x: 2001.0, y: 3002.0 }));
        assert_eq!(d.class, Some(4));
        assert_eq!(d.attribute("XREL"), &Value::Float(1.0));
    }

    #[test]
    fn test_defect_records() {
        let map = parse_klarf(KLARF).unwrap();
        let d = &map.defects()[1];
        assert_eq!(d.id, "2");
        assert_eq!(d.die, Some(DieIndex { x: 1, y: 0 }));
        assert_eq!(d.class, Some(2));
        // 1 * 10000 + 9000 - 5000
        assert_eq!(d.position, Some(Point { x: 14000.0, y: -4500.0 }));
        assert_eq!(map.test_plan().len(), 3);
    }

    #[test]
    fn test_region_queries() {
        let map = parse_klarf(KLARF).unwrap();
        let hits = map
            .within_rect(Point { x: -5000.0, y: -5000.0 }, Point { x: 0.0, y: 0.0 })
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);

        let hits = map.within_circle(Point { x: 0.0, y: 10000.0 }, 1.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "3");
        assert_eq!(map.defects().len(), 3);
    }

    #[test]
    fn test_region_query_without_geometry() {
        let map = parse_klarf("DefectRecordSpec 1 DEFECTID;\nDefectList\n 1;").unwrap();
        let err = map.within_circle(Point { x: 0.0, y: 0.0 }, 5.0).unwrap_err();
        assert!(matches!(err, KlarfError::IncompleteGeometry { field: "DiePitch" }));
    }

    #[test]
    fn test_attribute_filters() {
        let map = parse_klarf(KLARF).unwrap();
        let particles: Vec<&str> = map.with_classes(&[1]).iter().map(|d| d.id.as_str()).collect();
        assert_eq!(particles, vec!["1", "3"]);
        let far = map.filter(|d| d.rel.is_some_and(|r| r.x > 1000.0));
        assert_eq!(far.len(), 2);
    }

    #[test]
    fn test_table_view() {
        let map = parse_klarf(KLARF).unwrap().with_source("a.klarf");
        let table = map.table();
        assert_eq!(table.columns.len(), 9);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.column(COL_XACTUAL).unwrap()[0], &Value::Float(-4900.0));
        assert_eq!(table.column(COL_SOURCE).unwrap()[2], &Value::Text("a.klarf".into()));
        assert_eq!(table.column("CLASSNUMBER").unwrap()[1], &Value::Int(2));
    }
}
