use env_logger::Target;

/// Install the process-wide logger: `RUST_LOG` filters, `info` otherwise, on stderr.
pub fn init() {
    let _ = env_logger::Builder::new()
        .target(Target::Stderr)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// Logger for tests; output is captured per test and repeated calls are harmless.
pub fn init_for_tests() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
