//! Entrypoint for the drain daemon.
//!
//! Delegates to [`drainerd::run_server`], which loads configuration, serves
//! the default application and blocks until a termination signal has been
//! fully drained.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match drainerd::run_server() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            let _ignored = writeln!(stderr, "drainerd: {error}");
            ExitCode::FAILURE
        }
    }
}
