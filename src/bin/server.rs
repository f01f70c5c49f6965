//! FastIntercom HTTP server binary.
//! Run with: cargo run --bin fastintercom-server

use std::process::ExitCode;

use fastintercom::start_fastintercom;

fn main() -> ExitCode {
    start_fastintercom::run_server()
}
