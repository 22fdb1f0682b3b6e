use std::process::ExitCode;

fn main() -> ExitCode {
    requestflow_cli::run()
}
