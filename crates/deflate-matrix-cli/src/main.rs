//! run-tests - libdeflate build and test matrix
//!
//! Takes no arguments; see the `deflate-matrix` crate for the environment
//! variables it reads.

use std::process::ExitCode;

use deflate_matrix::corpus::interrupted;
use deflate_matrix::{
    exit_status, install_interrupt_cleanup, parse_args, Driver, Logger, MatrixConfig,
    ProcessExecutor,
};

fn main() -> ExitCode {
    if let Err(err) = parse_args(std::env::args_os()) {
        return ExitCode::from(exit_status(&Err(err)));
    }

    // Signals arriving before this point leave nothing behind to clean up.
    if let Err(err) = install_interrupt_cleanup() {
        return ExitCode::from(exit_status(&Err(err)));
    }

    let config = MatrixConfig::from_env();
    let executor = ProcessExecutor::new();
    let log = Logger::stdout();
    let result = Driver::new(&config, &executor, &log).run();
    if interrupted() {
        // The watcher is exiting with the signal's code; the failure above
        // is the terminated child.
        loop {
            std::thread::park();
        }
    }
    ExitCode::from(exit_status(&result))
}
