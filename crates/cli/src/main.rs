use std::process::ExitCode;

fn main() -> ExitCode {
    infrachat_cli::run()
}
