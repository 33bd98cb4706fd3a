//! PyO3 bindings exposing `parse_klarf_rs()` and `merge_klarf_rs()` to Python.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::merge::{self, MergeOptions};
use crate::parser;
use crate::types::{DefectTable, Value};
use crate::wafer::WaferMap;

/// (columns, rows, warnings), enough to build a pandas DataFrame.
type PyTable = (Vec<String>, Vec<Vec<PyObject>>, Vec<String>);

fn value_to_py(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    Ok(match value {
        Value::Int(v) => (*v).into_pyobject(py)?.into_any().unbind(),
        Value::Float(v) => (*v).into_pyobject(py)?.into_any().unbind(),
        Value::Text(s) => s.as_str().into_pyobject(py)?.into_any().unbind(),
        Value::Null => py.None(),
    })
}

fn to_py_table(py: Python<'_>, map: &WaferMap) -> PyResult<PyTable> {
    let DefectTable { columns, rows } = map.table();
    let rows = rows
        .iter()
        .map(|row| row.iter().map(|v| value_to_py(py, v)).collect())
        .collect::<PyResult<Vec<Vec<PyObject>>>>()?;
    let warnings = map.warnings().iter().map(|w| w.to_string()).collect();
    Ok((columns, rows, warnings))
}

fn parse_named(text: &str, name: &str) -> PyResult<WaferMap> {
    parser::parse_klarf(text)
        .map(|map| map.with_source(name))
        .map_err(|e| PyValueError::new_err(format!("{name}: {e}")))
}

/// Parse KLARF text into a flat defect table.
#[pyfunction]
#[pyo3(signature = (text, name = "klarf"))]
fn parse_klarf_rs(py: Python<'_>, text: &str, name: &str) -> PyResult<PyTable> {
    let map = parse_named(text, name)?;
    to_py_table(py, &map)
}

/// Merge `(name, text)` pairs of one wafer into a single defect table.
#[pyfunction]
#[pyo3(signature = (sources, tolerance = 0.01))]
fn merge_klarf_rs(py: Python<'_>, sources: Vec<(String, String)>, tolerance: f64) -> PyResult<PyTable> {
    let maps = sources
        .iter()
        .map(|(name, text)| parse_named(text, name))
        .collect::<PyResult<Vec<WaferMap>>>()?;
    let refs: Vec<&WaferMap> = maps.iter().collect();
    let options = MergeOptions::default().with_tolerance(tolerance);
    let merged = merge::merge(&refs, &options).map_err(|e| PyValueError::new_err(e.to_string()))?;
    to_py_table(py, &merged)
}

/// Python module: klarf_rs
#[pymodule]
fn klarf_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(parse_klarf_rs, m)?)?;
    m.add_function(wrap_pyfunction!(merge_klarf_rs, m)?)?;
    Ok(())
}
