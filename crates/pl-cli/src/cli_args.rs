use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pl-cli")]
#[command(about = "Run Rhai scripts over chunks of point data")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    /// Run a script's `process` function over every chunk of a point file.
    Run(RunArgs),
    /// Print the dimension to array element mapping.
    Types,
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    #[arg(long = "script")]
    pub(crate) script: String,
    #[arg(long = "input")]
    pub(crate) input: String,
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
    #[arg(long = "capacity")]
    pub(crate) capacity: Option<usize>,
    #[arg(long = "output")]
    pub(crate) output: Option<String>,
    /// Write one file per chunk instead of a merged file.
    #[arg(long = "split", requires = "output")]
    pub(crate) split: bool,
    /// Skip chunks that fail instead of stopping the run.
    #[arg(long = "keep-going")]
    pub(crate) keep_going: bool,
}
