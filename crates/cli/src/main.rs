use std::process::ExitCode;

fn main() -> ExitCode {
    callquote_cli::run()
}
