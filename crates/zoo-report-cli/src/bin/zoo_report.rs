use std::process::ExitCode;

fn main() -> ExitCode {
    zoo_report_cli::init_tracing();
    match zoo_report_cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(zoo_report_cli::exit_code(&err))
        }
    }
}
