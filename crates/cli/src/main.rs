use std::process::ExitCode;

fn main() -> ExitCode {
    quorum_cli::run()
}
