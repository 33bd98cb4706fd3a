//! KLARF data types and structures.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::Warning;
use crate::reader::Token;

/// Canonical section names.
pub const SEC_FILE_VERSION: &str = "FileVersion";
pub const SEC_RESULT_TIMESTAMP: &str = "ResultTimestamp";
pub const SEC_LOT_ID: &str = "LotID";
pub const SEC_WAFER_ID: &str = "WaferID";
pub const SEC_STEP_ID: &str = "StepID";
pub const SEC_DEVICE_ID: &str = "DeviceID";
pub const SEC_SLOT: &str = "Slot";
pub const SEC_SAMPLE_SIZE: &str = "SampleSize";
pub const SEC_DIE_PITCH: &str = "DiePitch";
pub const SEC_DIE_ORIGIN: &str = "DieOrigin";
pub const SEC_CENTER: &str = "SampleCenterLocation";
pub const SEC_MARK_TYPE: &str = "SampleOrientationMarkType";
pub const SEC_MARK_LOCATION: &str = "OrientationMarkLocation";
pub const SEC_CLASS_LOOKUP: &str = "ClassLookup";
pub const SEC_TEST_PLAN: &str = "SampleTestPlan";
pub const SEC_DEFECT_SPEC: &str = "DefectRecordSpec";
pub const SEC_DEFECT_LIST: &str = "DefectList";
pub const SEC_SUMMARY_SPEC: &str = "SummarySpec";
pub const SEC_SUMMARY_LIST: &str = "SummaryList";

/// Well-known defect fields.
pub const FIELD_DEFECT_ID: &str = "DEFECTID";
pub const FIELD_XREL: &str = "XREL";
pub const FIELD_YREL: &str = "YREL";
pub const FIELD_XINDEX: &str = "XINDEX";
pub const FIELD_YINDEX: &str = "YINDEX";
pub const FIELD_DEFECT_AREA: &str = "DEFECTAREA";
pub const FIELD_DSIZE: &str = "DSIZE";
pub const FIELD_CLASS: &str = "CLASSNUMBER";
pub const FIELD_CLASS_NAME: &str = "CLASSNAME";

/// Derived columns appended by the tabular view.
pub const COL_XACTUAL: &str = "_XACTUAL";
pub const COL_YACTUAL: &str = "_YACTUAL";
pub const COL_SOURCE: &str = "_KLARFNAME";

/// Bare word that stands for `Value::Null` in scalars, records and rows.
pub const NULL_TOKEN: &str = "NA";

/// A typed field value. `Null` fills attributes a record does not carry.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            // Debug keeps a trailing `.0` so floats re-parse as floats.
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Text(s) => f.write_str(s),
            Value::Null => Ok(()),
        }
    }
}

/// One named field of a fixed record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

/// A `count + schema + rows` section. Rows are positionally bound to `schema`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ListSection {
    /// Row count written in the file, when the dialect declares one.
    pub declared_count: Option<usize>,
    pub schema: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ListSection {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|f| f.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, row: usize, field: &str) -> Option<&Value> {
        let i = self.field_index(field)?;
        self.rows.get(row)?.get(i)
    }

    /// Row `i` as a field name to value mapping.
    pub fn row_map(&self, i: usize) -> Option<HashMap<&str, &Value>> {
        let row = self.rows.get(i)?;
        Some(self.schema.iter().map(String::as_str).zip(row.iter()).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Section {
    Scalar(Value),
    Record(Vec<Field>),
    /// Field-name declaration such as `DefectRecordSpec`.
    Schema(Vec<String>),
    List(ListSection),
    /// Unrecognised section, kept verbatim for re-serialization.
    #[serde(skip)]
    Raw(Vec<Token>),
}

impl Section {
    pub fn is_list(&self) -> bool {
        matches!(self, Section::List(_))
    }
}

/// Parsed KLARF document: ordered section name to value mapping plus the
/// warnings gathered while building it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    sections: Vec<(String, Section)>,
    pub warnings: Vec<Warning>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite in place. Returns the previous section.
    pub fn insert(&mut self, name: impl Into<String>, section: Section) -> Option<Section> {
        let name = name.into();
        match self.sections.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, section)),
            None => {
                self.sections.push((name, section));
                None
            }
        }
    }

    /// Add without replacing; used for opaque sections that may repeat.
    pub fn append(&mut self, name: impl Into<String>, section: Section) {
        self.sections.push((name.into(), section));
    }

    pub fn remove(&mut self, name: &str) -> Option<Section> {
        let i = self.sections.iter().position(|(n, _)| n == name)?;
        Some(self.sections.remove(i).1)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, s)| s)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &Section)> {
        self.sections.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn scalar(&self, name: &str) -> Option<&Value> {
        match self.get(name)? {
            Section::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn record(&self, name: &str) -> Option<&[Field]> {
        match self.get(name)? {
            Section::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Value of one field of a fixed record.
    pub fn record_field(&self, name: &str, field: &str) -> Option<&Value> {
        self.record(name)?
            .iter()
            .find(|f| f.name == field)
            .map(|f| &f.value)
    }

    pub fn schema(&self, name: &str) -> Option<&[String]> {
        match self.get(name)? {
            Section::Schema(names) => Some(names),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&ListSection> {
        match self.get(name)? {
            Section::List(list) => Some(list),
            _ => None,
        }
    }
}

/// Die grid coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DieIndex {
    pub x: i64,
    pub y: i64,
}

/// Wafer-relative position, in the file's coordinate units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One row of the defect list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DefectRecord {
    pub id: String,
    pub die: Option<DieIndex>,
    /// Offset inside the die (`XREL`, `YREL`).
    pub rel: Option<Point>,
    /// Wafer-relative position, present when the map geometry is complete.
    pub position: Option<Point>,
    pub size: Option<f64>,
    pub area: Option<f64>,
    pub class: Option<i64>,
    /// Provenance tag set by the merge engine or a named parse.
    pub source: Option<String>,
    /// Every field of the row, vendor extensions included.
    pub attributes: HashMap<String, Value>,
}

impl DefectRecord {
    /// Attribute by field name, ignoring ASCII case. Absent fields read as `Null`.
    pub fn attribute(&self, name: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.attributes
            .get(name)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .unwrap_or(NULL)
    }

    /// Stored spelling of the attribute `name`, if the record carries it.
    pub fn attribute_key(&self, name: &str) -> Option<&str> {
        self.attributes
            .get_key_value(name)
            .or_else(|| self.attributes.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)))
            .map(|(k, _)| k.as_str())
    }
}

/// One entry of `ClassLookup`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassEntry {
    pub number: i64,
    pub name: String,
}

/// Flat export view: one row per defect, one column per attribute.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DefectTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DefectTable {
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let i = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| &r[i]).collect())
    }
}
