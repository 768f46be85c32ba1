use std::fmt;

use serde::{Deserialize, Serialize};

/// Value returned by a script's entry function, copied out of the runtime
/// before the chunk is released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ScriptResult {
    Unit,
    Scalar { value: f64 },
    Array { shape: Vec<usize>, values: Vec<f64> },
    Text { value: String },
}

// Debugging output only; the layout is not meant to be parsed.
impl fmt::Display for ScriptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => Ok(()),
            Self::Scalar { value } => writeln!(f, "result: {:.6}", value),
            Self::Text { value } => writeln!(f, "result: {}", value),
            Self::Array { shape, values } => match shape.as_slice() {
                [_] => {
                    for (index, value) in values.iter().enumerate() {
                        writeln!(f, "element: {} value: {:.6}", index, value)?;
                    }
                    writeln!(f)
                }
                [rows, columns] => {
                    let mut cursor = values.iter();
                    for _ in 0..*rows {
                        for value in cursor.by_ref().take(*columns) {
                            write!(f, "{:.6} ", value)?;
                        }
                        writeln!(f)?;
                    }
                    Ok(())
                }
                _ => {
                    let mut cursor = values.iter();
                    for (dimension, extent) in shape.iter().enumerate() {
                        for element in 0..*extent {
                            let Some(value) = cursor.next() else {
                                return Ok(());
                            };
                            writeln!(
                                f,
                                "dimension: {} element: {} value: {:.6}",
                                dimension, element, value
                            )?;
                        }
                    }
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod result_tests {
    use super::*;

    #[test]
    fn scalar_prints_single_result_line() {
        let result = ScriptResult::Scalar { value: 2.5 };
        assert_eq!(result.to_string(), "result: 2.500000\n");
    }

    #[test]
    fn vector_prints_one_line_per_element() {
        let result = ScriptResult::Array {
            shape: vec![2],
            values: vec![1.0, 2.0],
        };
        assert_eq!(
            result.to_string(),
            "element: 0 value: 1.000000\nelement: 1 value: 2.000000\n\n"
        );
    }

    #[test]
    fn matrix_prints_rows() {
        let result = ScriptResult::Array {
            shape: vec![2, 2],
            values: vec![1.0, 2.0, 3.0, 4.0],
        };
        assert_eq!(
            result.to_string(),
            "1.000000 2.000000 \n3.000000 4.000000 \n"
        );
    }

    #[test]
    fn higher_rank_prints_dimension_lines() {
        let result = ScriptResult::Array {
            shape: vec![1, 1, 2],
            values: vec![1.0, 2.0],
        };
        assert_eq!(
            result.to_string(),
            "dimension: 0 element: 0 value: 1.000000\n\
             dimension: 1 element: 0 value: 2.000000\n"
        );
    }

    #[test]
    fn unit_prints_nothing_and_text_is_labelled() {
        assert_eq!(ScriptResult::Unit.to_string(), "");
        assert_eq!(
            ScriptResult::Text {
                value: "done".to_string()
            }
            .to_string(),
            "result: done\n"
        );
    }

    #[test]
    fn result_serializes_with_kind_tag() {
        let json = serde_json::to_string(&ScriptResult::Scalar { value: 1.0 }).expect("json");
        assert_eq!(json, r#"{"kind":"scalar","value":1.0}"#);
    }
}
