fn main() {
    pl_cli::init_tracing();
    std::process::exit(pl_cli::run_cli_from_args(std::env::args_os()));
}
