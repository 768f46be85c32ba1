use rhai::{Array, Dynamic, EvalAltResult, Position, FLOAT, INT};

use pl_core::{ElementType, Scalar, ScriptResult};

use crate::array::TypedArray;

pub(crate) fn script_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message.into()),
        Position::NONE,
    ))
}

pub(crate) fn dynamic_to_scalar(value: &Dynamic) -> Result<Scalar, String> {
    if let Ok(value) = value.as_int() {
        return Ok(Scalar::Int(value));
    }
    if let Ok(value) = value.as_float() {
        return Ok(Scalar::Float(value));
    }
    Err(format!("Expected a number, found {}.", value.type_name()))
}

pub(crate) fn scalar_to_dynamic(value: Scalar) -> Dynamic {
    match value {
        Scalar::Int(value) => Dynamic::from_int(value as INT),
        Scalar::UInt(value) if value <= INT::MAX as u64 => Dynamic::from_int(value as INT),
        Scalar::UInt(value) => Dynamic::from_float(value as FLOAT),
        Scalar::Float(value) => Dynamic::from_float(value as FLOAT),
    }
}

pub(crate) fn array_from_dynamic_values(
    values: &Array,
    element_type: ElementType,
) -> Result<TypedArray, String> {
    let scalars = values
        .iter()
        .map(dynamic_to_scalar)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TypedArray::from_scalars(element_type, &scalars))
}

pub(crate) fn typed_array_to_rhai(array: &TypedArray) -> Result<Array, String> {
    Ok(array
        .to_scalars()?
        .into_iter()
        .map(scalar_to_dynamic)
        .collect())
}

/// Copies an entry function's return value out of the runtime.
///
/// Unit, numbers and rectangular numeric arrays keep their structure;
/// anything else is captured as its display text.
pub(crate) fn dynamic_to_script_result(value: &Dynamic) -> Result<ScriptResult, String> {
    if value.is_unit() {
        return Ok(ScriptResult::Unit);
    }
    if let Ok(scalar) = dynamic_to_scalar(value) {
        return Ok(ScriptResult::Scalar {
            value: scalar.as_f64(),
        });
    }
    if let Some(array) = value.read_lock::<TypedArray>() {
        let values = array
            .to_scalars()?
            .into_iter()
            .map(Scalar::as_f64)
            .collect::<Vec<_>>();
        return Ok(ScriptResult::Array {
            shape: vec![values.len()],
            values,
        });
    }
    if value.is_array() {
        let shape = infer_shape(value);
        let mut values = Vec::new();
        if flatten_into(value, &shape, 0, &mut values)? {
            return Ok(ScriptResult::Array { shape, values });
        }
    }
    Ok(ScriptResult::Text {
        value: value.to_string(),
    })
}

fn infer_shape(value: &Dynamic) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut current = value.clone();
    loop {
        if let Some(array) = current.clone().try_cast::<TypedArray>() {
            shape.push(array.len());
            return shape;
        }
        let Some(array) = current.try_cast::<Array>() else {
            return shape;
        };
        shape.push(array.len());
        match array.into_iter().next() {
            Some(first) => current = first,
            None => return shape,
        }
    }
}

// Returns false when the nesting is ragged or holds non-numeric leaves.
fn flatten_into(
    value: &Dynamic,
    shape: &[usize],
    depth: usize,
    out: &mut Vec<f64>,
) -> Result<bool, String> {
    if depth == shape.len() {
        return Ok(match dynamic_to_scalar(value) {
            Ok(scalar) => {
                out.push(scalar.as_f64());
                true
            }
            Err(_) => false,
        });
    }
    if let Some(array) = value.read_lock::<TypedArray>() {
        if depth + 1 != shape.len() || array.len() != shape[depth] {
            return Ok(false);
        }
        out.extend(array.to_scalars()?.into_iter().map(Scalar::as_f64));
        return Ok(true);
    }
    let Some(items) = value.read_lock::<Array>() else {
        return Ok(false);
    };
    if items.len() != shape[depth] {
        return Ok(false);
    }
    for item in items.iter() {
        if !flatten_into(item, shape, depth + 1, out)? {
            return Ok(false);
        }
    }
    Ok(true)
}
