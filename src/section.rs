//! Section parser: classifies one statement by its keyword and turns its
//! tokens into a typed [`Section`].

use log::debug;

use crate::error::Warning;
use crate::reader::{Statement, Token, TokenKind};
use crate::types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Text,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            FieldType::Int => "integer",
            FieldType::Float => "float",
            FieldType::Text => "string",
        }
    }
}

/// Type of a list column. Unknown names are strings.
pub fn field_type(name: &str) -> FieldType {
    const INT_FIELDS: &[&str] = &[
        "DEFECTID",
        "XINDEX",
        "YINDEX",
        "CLASSNUMBER",
        "TEST",
        "CLUSTERNUMBER",
        "ROUGHBINNUMBER",
        "FINEBINNUMBER",
        "REVIEWSAMPLE",
        "IMAGECOUNT",
        "TESTNO",
        "NDEFECT",
        "NDIE",
        "NDEFDIE",
    ];
    const FLOAT_FIELDS: &[&str] = &[
        "XREL",
        "YREL",
        "XSIZE",
        "YSIZE",
        "DEFECTAREA",
        "DSIZE",
        "DEFDENSITY",
    ];
    if INT_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(name)) {
        FieldType::Int
    } else if FLOAT_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(name)) {
        FieldType::Float
    } else {
        FieldType::Text
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListSchema {
    Fixed(&'static [&'static str]),
    /// Names come from an earlier schema section.
    From(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountRule {
    /// First token is the row count.
    Required,
    /// A count is read only when it stands alone on the keyword's line.
    Optional,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Scalar,
    Record(&'static [&'static str]),
    Schema,
    List { schema: ListSchema, count: CountRule },
}

const XY: &[&str] = &["X", "Y"];
const DATE_TIME: &[&str] = &["DATE", "TIME"];

static REGISTRY: &[(&str, SectionKind)] = &[
    (SEC_FILE_VERSION, SectionKind::Record(&["MAJOR", "MINOR"])),
    ("FileTimestamp", SectionKind::Record(DATE_TIME)),
    (SEC_RESULT_TIMESTAMP, SectionKind::Record(DATE_TIME)),
    ("InspectionStationID", SectionKind::Record(&["MAKER", "MODEL", "ID"])),
    ("SetupID", SectionKind::Record(&["NAME", "DATE", "TIME"])),
    (SEC_SAMPLE_SIZE, SectionKind::Record(&["SHAPE", "DIAMETER"])),
    ("TiffSpec", SectionKind::Record(&["VERSION", "TYPE", "EXTENSION"])),
    (SEC_DIE_PITCH, SectionKind::Record(XY)),
    (SEC_DIE_ORIGIN, SectionKind::Record(XY)),
    (SEC_CENTER, SectionKind::Record(XY)),
    ("SampleType", SectionKind::Scalar),
    ("ResultsID", SectionKind::Scalar),
    (SEC_LOT_ID, SectionKind::Scalar),
    (SEC_DEVICE_ID, SectionKind::Scalar),
    (SEC_STEP_ID, SectionKind::Scalar),
    (SEC_WAFER_ID, SectionKind::Scalar),
    (SEC_SLOT, SectionKind::Scalar),
    (SEC_MARK_TYPE, SectionKind::Scalar),
    (SEC_MARK_LOCATION, SectionKind::Scalar),
    ("InspectionTest", SectionKind::Scalar),
    ("AreaPerTest", SectionKind::Scalar),
    ("EndOfFile", SectionKind::Scalar),
    (SEC_DEFECT_SPEC, SectionKind::Schema),
    (SEC_SUMMARY_SPEC, SectionKind::Schema),
    (
        SEC_TEST_PLAN,
        SectionKind::List {
            schema: ListSchema::Fixed(&[FIELD_XINDEX, FIELD_YINDEX]),
            count: CountRule::Required,
        },
    ),
    (
        SEC_CLASS_LOOKUP,
        SectionKind::List {
            schema: ListSchema::Fixed(&[FIELD_CLASS, FIELD_CLASS_NAME]),
            count: CountRule::Required,
        },
    ),
    (
        SEC_DEFECT_LIST,
        SectionKind::List {
            schema: ListSchema::From(SEC_DEFECT_SPEC),
            count: CountRule::Optional,
        },
    ),
    (
        SEC_SUMMARY_LIST,
        SectionKind::List {
            schema: ListSchema::From(SEC_SUMMARY_SPEC),
            count: CountRule::Optional,
        },
    ),
];

/// Case-insensitive registry lookup; returns the canonical name.
pub fn lookup(keyword: &str) -> Option<(&'static str, SectionKind)> {
    REGISTRY
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(keyword))
        .map(|(name, kind)| (*name, *kind))
}

/// One classified statement.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedSection {
    pub name: String,
    pub section: Section,
    pub line: usize,
    pub warnings: Vec<Warning>,
}

/// Value of a scalar or record token, typed by its lexical form.
fn infer_value(token: &Token) -> Value {
    match token.kind {
        TokenKind::Word if token.text == NULL_TOKEN => Value::Null,
        TokenKind::Number => match token.text.parse::<i64>() {
            Ok(v) => Value::Int(v),
            Err(_) => token
                .text
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(token.text.clone())),
        },
        _ => Value::Text(token.text.clone()),
    }
}

/// Coerce a list token to its column type. Failures stay strings.
fn coerce(token: &Token, field: &str, warnings: &mut Vec<Warning>) -> Value {
    if token.kind == TokenKind::Word && token.text == NULL_TOKEN {
        return Value::Null;
    }
    let ty = field_type(field);
    let value = match ty {
        FieldType::Text => return Value::Text(token.text.clone()),
        FieldType::Int => token.text.parse::<i64>().ok().map(Value::Int).or_else(|| {
            token
                .text
                .parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && token.kind == TokenKind::Number)
                .map(|v| Value::Int(v as i64))
        }),
        FieldType::Float if token.kind == TokenKind::Number => {
            token.text.parse::<f64>().ok().map(Value::Float)
        }
        FieldType::Float => None,
    };
    value.unwrap_or_else(|| {
        warnings.push(Warning::TypeCoercion {
            field: field.to_string(),
            token: token.text.clone(),
            expected: ty.name(),
            line: token.line,
        });
        Value::Text(token.text.clone())
    })
}

fn parse_count(token: &Token) -> Option<usize> {
    if token.kind == TokenKind::Number {
        token.text.parse::<usize>().ok()
    } else {
        None
    }
}

fn parse_scalar(name: &str, line: usize, args: &[&Token], warnings: &mut Vec<Warning>) -> Section {
    match args {
        [] => Section::Scalar(Value::Null),
        [one] => Section::Scalar(infer_value(one)),
        many => {
            warnings.push(Warning::FieldCountMismatch {
                section: name.to_string(),
                line,
                expected: 1,
                actual: many.len(),
            });
            let joined: Vec<&str> = many.iter().map(|t| t.text.as_str()).collect();
            Section::Scalar(Value::Text(joined.join(" ")))
        }
    }
}

fn parse_record(
    name: &str,
    line: usize,
    names: &[&str],
    args: &[&Token],
    warnings: &mut Vec<Warning>,
) -> Section {
    if args.len() != names.len() {
        warnings.push(Warning::FieldCountMismatch {
            section: name.to_string(),
            line,
            expected: names.len(),
            actual: args.len(),
        });
    }
    let len = names.len().max(args.len());
    let fields = (0..len)
        .map(|i| Field {
            name: names
                .get(i)
                .map_or_else(|| format!("_{i}"), |n| n.to_string()),
            value: args.get(i).map_or(Value::Null, |t| infer_value(t)),
        })
        .collect();
    Section::Record(fields)
}

fn parse_schema(name: &str, line: usize, args: &[&Token], warnings: &mut Vec<Warning>) -> Section {
    let (declared, names) = match args.split_first() {
        Some((first, rest)) => match parse_count(first) {
            Some(n) => (Some(n), rest),
            None => (None, args),
        },
        None => (None, args),
    };
    let names: Vec<String> = names.iter().map(|t| t.text.clone()).collect();
    if let Some(declared) = declared {
        if declared != names.len() {
            warnings.push(Warning::SchemaCountMismatch {
                section: name.to_string(),
                line,
                declared,
                actual: names.len(),
            });
        }
    }
    Section::Schema(names)
}

/// Group list values into rows of at most `arity` tokens.
///
/// A row closes when it is full or at a line break. The next line continues
/// an unfinished row only if all of its tokens fit in the remaining slots.
fn split_rows<'t>(values: &[&'t Token], arity: usize) -> Vec<Vec<&'t Token>> {
    let mut rows = Vec::new();
    let mut current: Vec<&'t Token> = Vec::with_capacity(arity);
    let mut start = 0;
    while start < values.len() {
        let line = values[start].line;
        let end = values[start..]
            .iter()
            .position(|t| t.line != line)
            .map_or(values.len(), |n| start + n);
        let group = &values[start..end];
        if !current.is_empty() && current.len() + group.len() > arity {
            rows.push(std::mem::take(&mut current));
        }
        for token in group {
            current.push(*token);
            if current.len() == arity {
                rows.push(std::mem::take(&mut current));
            }
        }
        start = end;
    }
    if !current.is_empty() {
        rows.push(current);
    }
    rows
}

fn parse_list(
    name: &str,
    line: usize,
    schema: Vec<String>,
    count: CountRule,
    args: &[&Token],
    warnings: &mut Vec<Warning>,
) -> Section {
    let declared = match (count, args.first()) {
        (CountRule::Required, Some(first)) => parse_count(first),
        (CountRule::Optional, Some(first)) => {
            let alone = first.line == line && args.get(1).map_or(true, |next| next.line != line);
            if alone {
                parse_count(first)
            } else {
                None
            }
        }
        (_, None) => None,
    };
    let values = if declared.is_some() { &args[1..] } else { args };

    let mut rows = Vec::new();
    if schema.is_empty() {
        if !values.is_empty() {
            warnings.push(Warning::FieldCountMismatch {
                section: name.to_string(),
                line,
                expected: 0,
                actual: values.len(),
            });
        }
    } else {
        for chunk in split_rows(values, schema.len()) {
            if chunk.len() < schema.len() {
                warnings.push(Warning::PartialRow {
                    section: name.to_string(),
                    line: chunk[0].line,
                    expected: schema.len(),
                    actual: chunk.len(),
                });
            }
            let row = schema
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    chunk
                        .get(i)
                        .map_or(Value::Null, |t| coerce(t, field, warnings))
                })
                .collect();
            rows.push(row);
        }
    }

    if let Some(declared) = declared {
        if declared != rows.len() {
            warnings.push(Warning::RowCountMismatch {
                section: name.to_string(),
                line,
                declared,
                actual: rows.len(),
            });
        }
    }

    Section::List(ListSection {
        declared_count: declared,
        schema,
        rows,
    })
}

/// Parse one statement. `doc` supplies schemas declared earlier in the file.
///
/// Never fails: unknown keywords and lists without a schema come back as
/// [`Section::Raw`] with a warning.
pub fn parse_statement(stmt: &Statement, doc: &Document) -> ParsedSection {
    let line = stmt.line();
    let mut warnings = Vec::new();
    let args: Vec<&Token> = stmt.args().iter().filter(|t| !t.is_delimiter()).collect();

    let Some((name, kind)) = lookup(stmt.keyword()) else {
        let name = stmt.keyword().to_string();
        debug!("line {line}: unknown section {name}");
        warnings.push(Warning::UnknownSection {
            section: name.clone(),
            line,
        });
        return ParsedSection {
            name,
            section: Section::Raw(stmt.tokens.clone()),
            line,
            warnings,
        };
    };

    let section = match kind {
        SectionKind::Scalar => parse_scalar(name, line, &args, &mut warnings),
        SectionKind::Record(names) => parse_record(name, line, names, &args, &mut warnings),
        SectionKind::Schema => parse_schema(name, line, &args, &mut warnings),
        SectionKind::List { schema, count } => {
            let schema = match schema {
                ListSchema::Fixed(names) => Some(names.iter().map(|n| n.to_string()).collect()),
                ListSchema::From(source) => doc.schema(source).map(|names| names.to_vec()),
            };
            match schema {
                Some(schema) => parse_list(name, line, schema, count, &args, &mut warnings),
                None => {
                    let schema_name = match kind {
                        SectionKind::List {
                            schema: ListSchema::From(source),
                            ..
                        } => source,
                        _ => "",
                    };
                    warnings.push(Warning::MissingSchema {
                        section: name.to_string(),
                        schema: schema_name.to_string(),
                        line,
                    });
                    Section::Raw(stmt.tokens.clone())
                }
            }
        }
    };
    debug!("line {line}: parsed {name}");

    ParsedSection {
        name: name.to_string(),
        section,
        line,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarningKind;
    use crate::reader::statements;

    fn parse_one(text: &str, doc: &Document) -> ParsedSection {
        let stmts = statements(text).unwrap();
        parse_statement(&stmts[0], doc)
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("diepitch").map(|(n, _)| n), Some("DiePitch"));
        assert_eq!(lookup("DEFECTLIST").map(|(n, _)| n), Some("DefectList"));
        assert!(lookup("VendorThing").is_none());
    }

    #[test]
    fn test_field_types() {
        assert_eq!(field_type("xindex"), FieldType::Int);
        assert_eq!(field_type("DSIZE"), FieldType::Float);
        assert_eq!(field_type("REVIEWER"), FieldType::Text);
    }

    #[test]
    fn test_scalar_and_record() {
        let doc = Document::new();
        let p = parse_one("lotid \"LOT-1\";", &doc);
        assert_eq!(p.name, "LotID");
        assert_eq!(p.section, Section::Scalar(Value::Text("LOT-1".into())));

        let p = parse_one("DiePitch 1.0e+04 8000;", &doc);
        match p.section {
            Section::Record(fields) => {
                assert_eq!(fields[0].name, "X");
                assert_eq!(fields[0].value, Value::Float(10000.0));
                assert_eq!(fields[1].value, Value::Int(8000));
            }
            other => panic!("expected record, got {other:?}"),
        }
        assert!(p.warnings.is_empty());
    }

    #[test]
    fn test_tiff_spec_record() {
        let p = parse_one("TiffSpec 6.0 G R;", &Document::new());
        assert!(p.warnings.is_empty());
        match p.section {
            Section::Record(fields) => {
                assert_eq!(fields[0].value, Value::Float(6.0));
                assert_eq!(fields[2].value, Value::Text("R".into()));
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_record_arity_mismatch_warns() {
        let p = parse_one("DieOrigin 1.0;", &Document::new());
        assert_eq!(p.warnings.len(), 1);
        assert_eq!(p.warnings[0].kind(), WarningKind::FieldCountMismatch);
        match p.section {
            Section::Record(fields) => assert_eq!(fields[1].value, Value::Null),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_record_with_vendor_braces() {
        let p = parse_one("DiePitch {1.0, 2.0};", &Document::new());
        assert!(p.warnings.is_empty());
    }

    #[test]
    fn test_schema_count_mismatch() {
        let p = parse_one("DefectRecordSpec 3 DEFECTID XREL;", &Document::new());
        assert_eq!(p.section, Section::Schema(vec!["DEFECTID".into(), "XREL".into()]));
        assert_eq!(p.warnings[0].kind(), WarningKind::SchemaCountMismatch);
    }

    #[test]
    fn test_required_count_list() {
        let p = parse_one("SampleTestPlan 3\n 0 0\n 1 0\n -1 2;", &Document::new());
        match &p.section {
            Section::List(list) => {
                assert_eq!(list.declared_count, Some(3));
                assert_eq!(list.rows.len(), 3);
                assert_eq!(list.rows[2], vec![Value::Int(-1), Value::Int(2)]);
            }
            other => panic!("expected list, got {other:?}"),
        }
        assert!(p.warnings.is_empty());
    }

    #[test]
    fn test_short_list_keeps_present_rows() {
        let p = parse_one("SampleTestPlan 3\n 0 0\n 1 0;", &Document::new());
        match &p.section {
            Section::List(list) => assert_eq!(list.rows.len(), 2),
            other => panic!("expected list, got {other:?}"),
        }
        assert_eq!(
            p.warnings,
            vec![Warning::RowCountMismatch {
                section: "SampleTestPlan".into(),
                line: 1,
                declared: 3,
                actual: 2,
            }]
        );
    }

    #[test]
    fn test_list_schema_from_document() {
        let mut doc = Document::new();
        doc.insert(
            SEC_DEFECT_SPEC,
            Section::Schema(vec!["DEFECTID".into(), "XREL".into(), "REVIEWER".into()]),
        );
        // The first row sits on its own line, so no count is read.
        let p = parse_one("DefectList\n 1 5.5 bob\n 2 6 \"ann lee\";", &doc);
        match &p.section {
            Section::List(list) => {
                assert_eq!(list.declared_count, None);
                assert_eq!(list.get(0, "XREL"), Some(&Value::Float(5.5)));
                assert_eq!(list.get(1, "XREL"), Some(&Value::Float(6.0)));
                assert_eq!(list.get(1, "REVIEWER"), Some(&Value::Text("ann lee".into())));
            }
            other => panic!("expected list, got {other:?}"),
        }
        assert!(p.warnings.is_empty());
    }

    #[test]
    fn test_optional_count_on_keyword_line() {
        let mut doc = Document::new();
        doc.insert(SEC_DEFECT_SPEC, Section::Schema(vec!["DEFECTID".into()]));
        let p = parse_one("DefectList 2\n 7\n 8;", &doc);
        match &p.section {
            Section::List(list) => {
                assert_eq!(list.declared_count, Some(2));
                assert_eq!(list.rows.len(), 2);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_row_and_bad_number() {
        let mut doc = Document::new();
        doc.insert(SEC_DEFECT_SPEC, Section::Schema(vec!["DEFECTID".into(), "DSIZE".into()]));
        let p = parse_one("DefectList\n 1 abc\n 2;", &doc);
        let kinds: Vec<WarningKind> = p.warnings.iter().map(|w| w.kind()).collect();
        assert_eq!(kinds, vec![WarningKind::TypeCoercion, WarningKind::PartialRow]);
        match &p.section {
            Section::List(list) => {
                assert_eq!(list.rows[0][1], Value::Text("abc".into()));
                assert_eq!(list.rows[1], vec![Value::Int(2), Value::Null]);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_short_middle_row_does_not_shift_later_rows() {
        let mut doc = Document::new();
        doc.insert(
            SEC_DEFECT_SPEC,
            Section::Schema(vec!["DEFECTID".into(), "XINDEX".into(), "YINDEX".into()]),
        );
        let p = parse_one("DefectList\n 1 0 0\n 2 1\n 3 2 2;", &doc);
        match &p.section {
            Section::List(list) => {
                assert_eq!(list.rows.len(), 3);
                assert_eq!(list.rows[1], vec![Value::Int(2), Value::Int(1), Value::Null]);
                assert_eq!(list.rows[2], vec![Value::Int(3), Value::Int(2), Value::Int(2)]);
            }
            other => panic!("expected list, got {other:?}"),
        }
        assert_eq!(
            p.warnings,
            vec![Warning::PartialRow {
                section: "DefectList".into(),
                line: 3,
                expected: 3,
                actual: 2,
            }]
        );
    }

    #[test]
    fn test_wrapped_row_continues_on_next_line() {
        let mut doc = Document::new();
        doc.insert(
            SEC_DEFECT_SPEC,
            Section::Schema(vec!["DEFECTID".into(), "XINDEX".into(), "YINDEX".into()]),
        );
        let p = parse_one("DefectList\n 1 0\n 0\n 2 1 1 3 2 2;", &doc);
        match &p.section {
            Section::List(list) => {
                assert_eq!(list.rows.len(), 3);
                assert_eq!(list.rows[0], vec![Value::Int(1), Value::Int(0), Value::Int(0)]);
                assert_eq!(list.rows[2], vec![Value::Int(3), Value::Int(2), Value::Int(2)]);
            }
            other => panic!("expected list, got {other:?}"),
        }
        assert!(p.warnings.is_empty());
    }

    #[test]
    fn test_missing_schema_is_raw() {
        let p = parse_one("DefectList\n 1 2 3;", &Document::new());
        assert!(matches!(p.section, Section::Raw(_)));
        assert_eq!(p.warnings[0].kind(), WarningKind::MissingSchema);
    }

    #[test]
    fn test_unknown_section_preserved() {
        let p = parse_one("VendorBlob 1 \"x\" {2};", &Document::new());
        assert_eq!(p.name, "VendorBlob");
        match &p.section {
            Section::Raw(tokens) => assert_eq!(tokens.len(), 6),
            other => panic!("expected raw, got {other:?}"),
        }
        assert_eq!(p.warnings[0].kind(), WarningKind::UnknownSection);
    }
}
