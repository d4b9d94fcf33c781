// gatelock - gateway session and stage-progression service

use std::process::exit;

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = gatelock::cli::run() {
        eprintln!("gatelock failed: {e:#}");
        exit(1);
    }
}
