//! In-process Python backend (enabled by the `python-embed` feature).
//!
//! Holds the embedded CPython interpreter for the process lifetime and runs
//! blocks inside it, mapping values to native Python objects in both
//! directions (integer↔int, list↔list, dict↔dict, struct↔dict with
//! field-name keys). Cancellation is cooperative: the flag is consulted at
//! the boundary, not inside long-running Python code.

use indexmap::IndexMap;
use pyo3::{
    prelude::*,
    types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyString},
};

use crate::{
    object::Object,
    polyglot::{BlockRequest, PolyKind, PolyglotBackend, PolyglotFailure},
};

#[derive(Debug, Default)]
pub(crate) struct EmbeddedPythonBackend;

impl EmbeddedPythonBackend {
    pub fn new() -> Self {
        Self
    }

    fn run_block(&self, request: &BlockRequest, want_result: bool) -> Result<Option<Object>, PolyglotFailure> {
        Python::with_gil(|py| {
            let globals = PyDict::new(py);
            for (name, value) in &request.captures {
                let py_value = object_to_py(py, value)
                    .map_err(|err| PolyglotFailure::new(PolyKind::Type, err.to_string()))?;
                globals
                    .set_item(name, py_value)
                    .map_err(|err| classify(py, &err))?;
            }

            if want_result {
                // Reuse the subprocess wrapping convention minus the env
                // prologue: the block body becomes a function whose return
                // value we read back directly.
                let code = format!(
                    "def __naab_block__():\n{}\n    return None\n__naab_result__ = __naab_block__()\n",
                    indent(&request.source)
                );
                let code = std::ffi::CString::new(code)
                    .map_err(|_| PolyglotFailure::validation("block source contains a null byte"))?;
                py.run(code.as_c_str(), Some(&globals), None)
                    .map_err(|err| classify(py, &err))?;
                let result = globals
                    .get_item("__naab_result__")
                    .map_err(|err| classify(py, &err))?
                    .ok_or_else(|| PolyglotFailure::runtime("block produced no result"))?;
                let object = py_to_object(&result).map_err(|err| classify(py, &err))?;
                Ok(Some(object))
            } else {
                let code = std::ffi::CString::new(request.source.clone())
                    .map_err(|_| PolyglotFailure::validation("block source contains a null byte"))?;
                py.run(code.as_c_str(), Some(&globals), None)
                    .map_err(|err| classify(py, &err))?;
                Ok(None)
            }
        })
    }
}

fn indent(source: &str) -> String {
    source
        .lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl PolyglotBackend for EmbeddedPythonBackend {
    fn initialize(&mut self) -> Result<(), PolyglotFailure> {
        // auto-initialize brings the interpreter up on first GIL acquisition.
        Python::with_gil(|_| ());
        Ok(())
    }

    fn execute(&mut self, request: &BlockRequest) -> Result<(), PolyglotFailure> {
        self.run_block(request, false).map(|_| ())
    }

    fn execute_with_result(&mut self, request: &BlockRequest) -> Result<Object, PolyglotFailure> {
        self.run_block(request, true)
            .map(|value| value.unwrap_or(Object::Null))
    }
}

/// Classifies a Python exception at the boundary.
fn classify(py: Python<'_>, err: &PyErr) -> PolyglotFailure {
    let type_name = err
        .get_type(py)
        .name()
        .map(|n| n.to_string())
        .unwrap_or_default();
    let kind = if type_name.contains("SyntaxError") || type_name.contains("IndentationError") {
        PolyKind::Syntax
    } else if type_name.contains("TypeError") {
        PolyKind::Type
    } else {
        PolyKind::Runtime
    };
    PolyglotFailure::new(kind, format!("{type_name}: {err}")).with_trace(err.to_string())
}

/// Converts an [`Object`] to its native Python representation.
fn object_to_py<'py>(py: Python<'py>, value: &Object) -> PyResult<Bound<'py, PyAny>> {
    let out = match value {
        Object::Null => py.None().into_bound(py),
        Object::Bool(b) => PyBool::new(py, *b).to_owned().into_any(),
        Object::Int(i) => i.into_pyobject(py)?.into_any(),
        Object::Float(f) => PyFloat::new(py, *f).into_any(),
        Object::Str(s) => PyString::new(py, s).into_any(),
        Object::List(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(object_to_py(py, item)?)?;
            }
            list.into_any()
        }
        Object::Dict(entries) | Object::Struct { fields: entries, .. } => {
            let dict = PyDict::new(py);
            for (key, item) in entries {
                dict.set_item(key, object_to_py(py, item)?)?;
            }
            dict.into_any()
        }
        Object::Enum { name, variant } => PyString::new(py, &format!("{name}.{variant}")).into_any(),
    };
    Ok(out)
}

/// Converts a Python object back into an [`Object`].
///
/// `bool` is checked before `int` because bool subclasses int in Python.
fn py_to_object(value: &Bound<'_, PyAny>) -> PyResult<Object> {
    if value.is_none() {
        return Ok(Object::Null);
    }
    if let Ok(b) = value.cast::<PyBool>() {
        return Ok(Object::Bool(b.is_true()));
    }
    if let Ok(i) = value.cast::<PyInt>() {
        return Ok(Object::Int(i.extract()?));
    }
    if let Ok(f) = value.cast::<PyFloat>() {
        return Ok(Object::Float(f.extract()?));
    }
    if let Ok(s) = value.cast::<PyString>() {
        return Ok(Object::Str(s.extract()?));
    }
    if let Ok(list) = value.cast::<PyList>() {
        let mut items = Vec::with_capacity(list.len());
        for item in list.iter() {
            items.push(py_to_object(&item)?);
        }
        return Ok(Object::List(items));
    }
    if let Ok(dict) = value.cast::<PyDict>() {
        let mut entries = IndexMap::with_capacity(dict.len());
        for (key, item) in dict.iter() {
            entries.insert(key.extract::<String>()?, py_to_object(&item)?);
        }
        return Ok(Object::Dict(entries));
    }
    // Anything else crosses as its string form.
    Ok(Object::Str(value.str()?.extract()?))
}
