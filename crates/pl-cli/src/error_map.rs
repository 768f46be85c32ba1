use pl_api::ConfigError;
use pl_core::PlangError;
use std::fmt::Display;

fn map_error(code: &'static str, error: impl Display) -> PlangError {
    PlangError::config(code, error.to_string())
}

pub(crate) fn emit_error(error: PlangError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_KIND:{}", error.kind.as_str());
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).unwrap_or_else(|_| "\"\"".to_string())
    );
    1
}

pub(crate) fn map_cli_script_read(error: std::io::Error) -> PlangError {
    map_error("CLI_SCRIPT_READ", error)
}

pub(crate) fn map_cli_input_read(error: std::io::Error) -> PlangError {
    map_error("CLI_INPUT_READ", error)
}

pub(crate) fn map_cli_input_invalid(error: serde_json::Error) -> PlangError {
    map_error("CLI_INPUT_INVALID", error)
}

pub(crate) fn map_cli_output_write(error: std::io::Error) -> PlangError {
    map_error("CLI_OUTPUT_WRITE", error)
}

pub(crate) fn map_cli_output_encode(error: serde_json::Error) -> PlangError {
    map_error("CLI_OUTPUT_ENCODE", error)
}

pub(crate) fn map_cli_config(error: ConfigError) -> PlangError {
    match error {
        ConfigError::Io(error) => map_error("CLI_CONFIG_READ", error),
        other => map_error("CLI_CONFIG_INVALID", other),
    }
}
