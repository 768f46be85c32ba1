use std::ffi::OsString;
use std::fs;
use std::sync::Arc;

use clap::Parser;
use pl_api::{
    chunk_file_name, merge, partition_by_capacity, with_script_environment, BridgeConfig,
    ChunkOutcome, ChunkRunner, FailurePolicy, RunSummary,
};
use pl_core::{element_type_for, Interpretation, PlangError, PointBuffer};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli_args;
mod error_map;
mod point_file;

pub(crate) use cli_args::{Cli, Mode, RunArgs};
pub(crate) use error_map::{emit_error, map_cli_config, map_cli_script_read};
pub(crate) use point_file::{read_point_file, write_point_file};

const INTERPRETATIONS: [Interpretation; 5] = [
    Interpretation::SignedByte,
    Interpretation::UnsignedByte,
    Interpretation::SignedInteger,
    Interpretation::UnsignedInteger,
    Interpretation::Float,
];

const BYTE_WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// Sends library and script logs to stderr. `RUST_LOG` overrides the
/// default `warn` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return error.exit_code(),
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, PlangError> {
    match cli.command {
        Mode::Run(args) => run_script(args),
        Mode::Types => Ok(print_types()),
    }
}

fn load_config(args: &RunArgs) -> Result<BridgeConfig, PlangError> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path).map_err(map_cli_config)?,
        None => BridgeConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config = config.with_capacity(capacity);
    }
    if args.keep_going {
        config = config.with_failure_policy(FailurePolicy::Skip);
    }
    config.validate().map_err(map_cli_config)?;
    Ok(config)
}

fn run_script(args: RunArgs) -> Result<i32, PlangError> {
    let config = load_config(&args)?;
    let script = fs::read_to_string(&args.script).map_err(map_cli_script_read)?;
    let source = read_point_file(&args.input)?;
    info!(
        script = %args.script,
        points = source.point_count(),
        capacity = config.runner.capacity,
        "starting run"
    );

    let (summary, chunks) = with_script_environment(config.environment.to_options(), |env| {
        let mut chunks = partition_by_capacity(&source, config.runner.capacity)?;
        let mut runner = ChunkRunner::new(env, script, config.runner.on_failure);
        let summary = runner.run_all(&mut chunks)?;
        Ok((summary, chunks))
    })?;

    let written = match &args.output {
        Some(output) => write_outputs(output, args.split, &source, &chunks)?,
        None => Vec::new(),
    };
    emit_summary(&summary, &written);
    Ok(0)
}

fn write_outputs(
    output: &str,
    split: bool,
    source: &PointBuffer,
    chunks: &[PointBuffer],
) -> Result<Vec<String>, PlangError> {
    if split {
        let mut written = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let path = chunk_file_name(output, index + 1);
            write_point_file(&path, chunk)?;
            written.push(path);
        }
        return Ok(written);
    }
    let merged = merge(Arc::clone(source.schema()), chunks)?;
    write_point_file(output, &merged)?;
    Ok(vec![output.to_string()])
}

fn emit_summary(summary: &RunSummary, written: &[String]) {
    println!("RESULT:OK");
    println!("CHUNKS:{}", summary.outcomes.len());
    println!("COMPLETED:{}", summary.completed());
    println!("SKIPPED:{}", summary.skipped());
    println!("POINTS:{}", summary.points_processed());

    for outcome in &summary.outcomes {
        match outcome {
            ChunkOutcome::Completed {
                index,
                points,
                result,
            } => {
                println!("CHUNK:{}|OK|{}", index + 1, points);
                print!("{}", result);
            }
            ChunkOutcome::Skipped {
                index,
                points,
                error,
            } => {
                println!("CHUNK:{}|SKIPPED|{}", index + 1, points);
                println!("CHUNK_ERROR:{}", error.code);
                println!(
                    "CHUNK_ERROR_MSG_JSON:{}",
                    serde_json::to_string(&error.message).unwrap_or_else(|_| "\"\"".to_string())
                );
            }
        }
    }

    if written.is_empty() {
        println!("OUTPUT:NONE");
    }
    for path in written {
        println!("OUTPUT:{}", path);
    }
}

fn print_types() -> i32 {
    println!("RESULT:OK");
    for interpretation in INTERPRETATIONS {
        for width in BYTE_WIDTHS {
            if let Some(element_type) = element_type_for(interpretation, width) {
                let access = if element_type.supports_write_back() {
                    "output"
                } else {
                    "input-only"
                };
                println!("TYPE:{}|{}|{}|{}", interpretation, width, element_type, access);
            }
        }
    }
    0
}
