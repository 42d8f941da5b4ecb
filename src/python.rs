//! Python bindings

use crate::core::index::normalized_difference as nd_value;
use crate::io::archive::{parse_identifier as parse_id, ArchiveConfig, ArchiveResolver};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn to_py_err(e: crate::types::CubeError) -> PyErr {
    match e {
        crate::types::CubeError::MalformedIdentifier(_) | crate::types::CubeError::InvalidParameter(_) => {
            PyValueError::new_err(e.to_string())
        }
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

/// Band URIs for each product identifier
#[pyfunction]
#[pyo3(signature = (ids, bands, base_template=None))]
fn resolve_archive(
    py: Python<'_>,
    ids: Vec<String>,
    bands: Vec<String>,
    base_template: Option<String>,
) -> PyResult<Vec<PyObject>> {
    let mut config = ArchiveConfig::default();
    if let Some(template) = base_template {
        config.base_template = template;
    }
    let locations = ArchiveResolver::new(config).resolve(&ids, &bands).map_err(to_py_err)?;

    locations
        .into_iter()
        .map(|loc| {
            let dict = PyDict::new(py);
            dict.set_item("product_id", &loc.identifier)?;
            dict.set_item("date", loc.date.to_string())?;
            for (band, uri) in &loc.bands {
                dict.set_item(band, uri)?;
            }
            Ok(dict.to_object(py))
        })
        .collect()
}

/// (sensor, path, row, "YYYY-MM-DD") of a product identifier
#[pyfunction]
fn parse_identifier(id: &str) -> PyResult<(String, u16, u16, String)> {
    let p = parse_id(id).map_err(to_py_err)?;
    Ok((p.sensor, p.tile.path, p.tile.row, p.acquired.to_string()))
}

/// Normalized difference `(b - a) / (b + a)` of two float32 arrays; NaN marks missing
#[pyfunction]
fn normalized_difference<'py>(
    py: Python<'py>,
    a: PyReadonlyArray2<'py, f32>,
    b: PyReadonlyArray2<'py, f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let a = a.as_array();
    let b = b.as_array();
    if a.dim() != b.dim() {
        return Err(PyValueError::new_err(format!(
            "shape mismatch: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    let out = ndarray::Zip::from(&a)
        .and(&b)
        .map_collect(|&x, &y| if x.is_nan() || y.is_nan() { f32::NAN } else { nd_value(x, y) });
    Ok(out.into_pyarray(py))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(resolve_archive, m)?)?;
    m.add_function(wrap_pyfunction!(parse_identifier, m)?)?;
    m.add_function(wrap_pyfunction!(normalized_difference, m)?)?;
    Ok(())
}
