use rhai::{Array, Dynamic, Engine, EvalAltResult, FLOAT, INT};

use pl_core::ElementType;

use crate::array::{elementwise, ArithOp, Operand, TypedArray};
use crate::helpers::rhai_bridge::{
    array_from_dynamic_values, dynamic_to_scalar, scalar_to_dynamic, script_error,
    typed_array_to_rhai,
};
use crate::mapping::ColumnMap;

type ScriptResultOf<T> = Result<T, Box<EvalAltResult>>;

/// Registers the numeric array type, its constructors and operators, and
/// the column mapping type with `engine`.
pub fn register_array_api(engine: &mut Engine) {
    register_typed_array(engine);
    register_constructors(engine);
    register_arithmetic(engine, "+", ArithOp::Add);
    register_arithmetic(engine, "-", ArithOp::Sub);
    register_arithmetic(engine, "*", ArithOp::Mul);
    register_arithmetic(engine, "/", ArithOp::Div);
    register_column_map(engine);
}

fn register_typed_array(engine: &mut Engine) {
    engine
        .register_type_with_name::<TypedArray>("TypedArray")
        .register_indexer_get(
            |array: &mut TypedArray, index: INT| -> ScriptResultOf<Dynamic> {
                let index = array.resolve_index(index).map_err(script_error)?;
                let value = array.get(index).map_err(script_error)?;
                Ok(scalar_to_dynamic(value))
            },
        )
        .register_indexer_set(
            |array: &mut TypedArray, index: INT, value: Dynamic| -> ScriptResultOf<()> {
                let index = array.resolve_index(index).map_err(script_error)?;
                let value = dynamic_to_scalar(&value).map_err(script_error)?;
                array.set(index, value).map_err(script_error)
            },
        )
        .register_get("len", |array: &mut TypedArray| array.len() as INT)
        .register_get("dtype", |array: &mut TypedArray| {
            array.element_type().name().to_string()
        })
        .register_fn("len", |array: &mut TypedArray| array.len() as INT)
        .register_fn("is_view", |array: &mut TypedArray| array.is_view())
        .register_fn("to_array", |array: &mut TypedArray| -> ScriptResultOf<Array> {
            typed_array_to_rhai(array).map_err(script_error)
        })
        .register_fn("copy", |array: &mut TypedArray| -> ScriptResultOf<TypedArray> {
            array.astype(array.element_type()).map_err(script_error)
        })
        .register_fn(
            "astype",
            |array: &mut TypedArray, name: &str| -> ScriptResultOf<TypedArray> {
                array.astype(parse_element_type(name)?).map_err(script_error)
            },
        )
        .register_fn("sum", |array: &mut TypedArray| -> ScriptResultOf<FLOAT> {
            array.sum().map_err(script_error)
        })
        .register_fn("mean", |array: &mut TypedArray| -> ScriptResultOf<FLOAT> {
            array.mean().map_err(script_error)
        })
        .register_fn("min", |array: &mut TypedArray| -> ScriptResultOf<FLOAT> {
            array.min().map_err(script_error)
        })
        .register_fn("max", |array: &mut TypedArray| -> ScriptResultOf<FLOAT> {
            array.max().map_err(script_error)
        })
        .register_fn("to_string", |array: &mut TypedArray| array.to_string())
        .register_fn("to_debug", |array: &mut TypedArray| array.to_string());
}

fn register_constructors(engine: &mut Engine) {
    engine
        .register_fn("zeros", |len: INT| -> ScriptResultOf<TypedArray> {
            TypedArray::zeroed(ElementType::Float64, array_len(len)?).map_err(script_error)
        })
        .register_fn("zeros", |len: INT, name: &str| -> ScriptResultOf<TypedArray> {
            TypedArray::zeroed(parse_element_type(name)?, array_len(len)?).map_err(script_error)
        })
        .register_fn("array", |values: Array| -> ScriptResultOf<TypedArray> {
            array_from_dynamic_values(&values, ElementType::Float64).map_err(script_error)
        })
        .register_fn("array", |values: Array, name: &str| -> ScriptResultOf<TypedArray> {
            array_from_dynamic_values(&values, parse_element_type(name)?).map_err(script_error)
        });
}

fn register_arithmetic(engine: &mut Engine, symbol: &str, op: ArithOp) {
    engine
        .register_fn(symbol, move |lhs: TypedArray, rhs: TypedArray| {
            combine(Operand::Array(&lhs), Operand::Array(&rhs), op)
        })
        .register_fn(symbol, move |lhs: TypedArray, rhs: FLOAT| {
            combine(Operand::Array(&lhs), Operand::Float(rhs), op)
        })
        .register_fn(symbol, move |lhs: TypedArray, rhs: INT| {
            combine(Operand::Array(&lhs), Operand::Int(rhs), op)
        })
        .register_fn(symbol, move |lhs: FLOAT, rhs: TypedArray| {
            combine(Operand::Float(lhs), Operand::Array(&rhs), op)
        })
        .register_fn(symbol, move |lhs: INT, rhs: TypedArray| {
            combine(Operand::Int(lhs), Operand::Array(&rhs), op)
        });
}

fn register_column_map(engine: &mut Engine) {
    engine
        .register_type_with_name::<ColumnMap>("ColumnMap")
        .register_indexer_get(|map: &mut ColumnMap, name: &str| -> ScriptResultOf<Dynamic> {
            match map.get(name).map_err(script_error)? {
                Some(array) => Ok(Dynamic::from(array)),
                None => Ok(Dynamic::UNIT),
            }
        })
        .register_indexer_set(
            |map: &mut ColumnMap, name: &str, value: Dynamic| -> ScriptResultOf<()> {
                let array = column_from_dynamic(value)?;
                map.assign(name, array).map_err(script_error)
            },
        )
        .register_fn("keys", |map: &mut ColumnMap| -> Array {
            map.keys().into_iter().map(Dynamic::from).collect()
        })
        .register_fn("contains", |map: &mut ColumnMap, name: &str| map.contains(name))
        .register_fn("len", |map: &mut ColumnMap| map.len() as INT)
        .register_fn("to_string", |map: &mut ColumnMap| {
            format!("{} mapping {:?}", map.role().as_str(), map.keys())
        });
}

fn combine(lhs: Operand<'_>, rhs: Operand<'_>, op: ArithOp) -> ScriptResultOf<TypedArray> {
    elementwise(lhs, rhs, op).map_err(script_error)
}

fn column_from_dynamic(value: Dynamic) -> ScriptResultOf<TypedArray> {
    let type_name = value.type_name();
    if let Some(array) = value.clone().try_cast::<TypedArray>() {
        return Ok(array);
    }
    if let Some(values) = value.try_cast::<Array>() {
        return array_from_dynamic_values(&values, ElementType::Float64).map_err(script_error);
    }
    Err(script_error(format!(
        "Output columns must be arrays, found {}.",
        type_name
    )))
}

fn parse_element_type(name: &str) -> ScriptResultOf<ElementType> {
    ElementType::from_name(name)
        .ok_or_else(|| script_error(format!("Unknown element type \"{}\".", name)))
}

fn array_len(len: INT) -> ScriptResultOf<usize> {
    usize::try_from(len)
        .map_err(|_| script_error(format!("Array length must not be negative, got {}.", len)))
}

#[cfg(test)]
mod api_tests {
    use super::*;
    use pl_core::Scalar;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.set_strict_variables(true);
        register_array_api(&mut engine);
        engine
    }

    #[test]
    fn constructors_and_properties_are_available() {
        let engine = engine();
        let len = engine
            .eval::<INT>(r#"let a = zeros(3, "uint8"); a.len"#)
            .expect("len");
        assert_eq!(len, 3);
        let dtype = engine
            .eval::<String>(r#"array([1, 2.5]).dtype"#)
            .expect("dtype");
        assert_eq!(dtype, "float64");
        assert!(engine.eval::<TypedArray>(r#"zeros(2, "float16")"#).is_err());
        assert!(engine.eval::<TypedArray>("zeros(-1)").is_err());
    }

    #[test]
    fn oversized_zeros_raise_instead_of_allocating() {
        let engine = engine();
        let error = engine
            .eval::<TypedArray>("zeros(2305843009213693952)")
            .expect_err("overflowing length");
        assert!(error.to_string().contains("exceeds the limit"));
        assert!(engine.eval::<TypedArray>(r#"zeros(1000000000000, "uint8")"#).is_err());
    }

    #[test]
    fn operators_promote_and_index_from_either_end() {
        let engine = engine();
        let array = engine
            .eval::<TypedArray>(r#"let a = zeros(3, "uint64") + 2; a[-1] = 9; a * 2"#)
            .expect("arith");
        assert_eq!(array.element_type(), ElementType::UInt64);
        assert_eq!(array.get(2).expect("last"), Scalar::UInt(18));

        let mean = engine
            .eval::<FLOAT>("(1.0 + array([1, 2, 3])).mean()")
            .expect("mean");
        assert_eq!(mean, 3.0);

        let mut halves = engine.eval::<TypedArray>("array([2, 4], \"int32\") / 4").expect("div");
        assert_eq!(halves.element_type(), ElementType::Float64);
        assert_eq!(halves.get(0).expect("first"), Scalar::Float(0.5));
        halves = engine.eval::<TypedArray>("let a = array([1.0]); a += 1; a").expect("+=");
        assert_eq!(halves.get(0).expect("first"), Scalar::Float(2.0));
    }

    #[test]
    fn array_errors_surface_as_script_errors() {
        let engine = engine();
        let error = engine
            .eval::<TypedArray>("array([1.0, 2.0]) + array([1.0])")
            .expect_err("length mismatch");
        assert!(error.to_string().contains("Cannot combine arrays"));
        assert!(engine.eval::<Dynamic>("zeros(2)[2]").is_err());
        assert!(engine.eval::<FLOAT>("zeros(0).max()").is_err());
    }

    #[test]
    fn conversions_copy_values() {
        let engine = engine();
        let script = r#"
            let a = array([1.7, 2.2]);
            let b = a.astype("int64");
            b[0] = 5;
            a.to_array() + b.to_array()
        "#;
        let values = engine.eval::<Array>(script).expect("convert");
        assert_eq!(values.len(), 4);
        assert_eq!(values[0].as_float().expect("float"), 1.7);
        assert_eq!(values[2].as_int().expect("int"), 5);
        assert!(!engine.eval::<bool>("zeros(1).copy().is_view()").expect("copy"));
    }
}
