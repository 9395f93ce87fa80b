//! Logger initialisation
//!
//! The library only uses the `log` macros; binaries call [`init_logging`]
//! once at startup. `RUST_LOG` takes precedence over the configured level.

/// Initialize env_logger with `default_level` as the fallback filter.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(default_level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();

    if result.is_ok() {
        log::debug!("Logging initialized (default level {})", default_level);
    }
}
