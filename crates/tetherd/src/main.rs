use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match tetherd::run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(io::stderr(), "tetherd: {error}");
            ExitCode::FAILURE
        }
    }
}
