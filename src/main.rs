use std::process::ExitCode;
use xlsx_csv_append::cli;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    ExitCode::from(cli::run_cli(std::env::args_os()))
}
