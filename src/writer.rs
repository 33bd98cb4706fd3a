//! KLARF re-serialization.
//!
//! Output re-parses to the same sections, schemas, rows and declared counts.
//! `Value::Null` is written as the bare word [`NULL_TOKEN`] so list rows keep
//! their arity.

use crate::reader::{is_number, Token, TokenKind};
use crate::section::{lookup, CountRule, SectionKind};
use crate::types::*;
use crate::wafer::WaferMap;

/// Text that lexes back as the same bare word: enum words such as `NOTCH`,
/// dates and times.
fn is_bare_word(s: &str) -> bool {
    if s.is_empty() || s == NULL_TOKEN || is_number(s) {
        return false;
    }
    let enum_word = s.chars().all(|c| c.is_ascii_uppercase() || c == '_');
    let date_time = s.chars().all(|c| c.is_ascii_digit() || c == '-' || c == ':')
        && s.chars().any(|c| c.is_ascii_digit());
    enum_word || date_time
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str(NULL_TOKEN),
        Value::Text(s) if is_bare_word(s) => out.push_str(s),
        Value::Text(s) => {
            out.push('"');
            // No escape exists inside KLARF strings.
            out.push_str(&s.replace('"', "'"));
            out.push('"');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn push_token(out: &mut String, token: &Token) {
    if token.kind == TokenKind::Quoted {
        out.push('"');
        out.push_str(&token.text);
        out.push('"');
    } else {
        out.push_str(&token.text);
    }
}

fn write_list(out: &mut String, name: &str, list: &ListSection) {
    let required = matches!(
        lookup(name),
        Some((
            _,
            SectionKind::List {
                count: CountRule::Required,
                ..
            }
        ))
    );
    out.push_str(name);
    let count = match list.declared_count {
        Some(n) => Some(n),
        None if required => Some(list.rows.len()),
        None => None,
    };
    if let Some(n) = count {
        out.push(' ');
        out.push_str(&n.to_string());
    }
    for row in &list.rows {
        out.push_str("\n ");
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            push_value(out, value);
        }
    }
    out.push_str(";\n");
}

/// Serialize every section in document order.
pub fn write_document(doc: &Document) -> String {
    let mut out = String::new();
    for (name, section) in doc.sections() {
        match section {
            Section::Scalar(Value::Null) => {
                out.push_str(name);
                out.push_str(";\n");
            }
            Section::Scalar(value) => {
                out.push_str(name);
                out.push(' ');
                push_value(&mut out, value);
                out.push_str(";\n");
            }
            Section::Record(fields) => {
                out.push_str(name);
                for field in fields {
                    out.push(' ');
                    push_value(&mut out, &field.value);
                }
                out.push_str(";\n");
            }
            Section::Schema(names) => {
                out.push_str(name);
                out.push(' ');
                out.push_str(&names.len().to_string());
                for n in names {
                    out.push(' ');
                    out.push_str(n);
                }
                out.push_str(";\n");
            }
            Section::List(list) => write_list(&mut out, name, list),
            Section::Raw(tokens) => {
                for (i, token) in tokens.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    push_token(&mut out, token);
                }
                out.push_str(";\n");
            }
        }
    }
    out
}

/// Serialize a wafer map, merged maps included.
pub fn write_klarf(map: &WaferMap) -> String {
    write_document(&map.to_document())
}
