//! Logger setup for the translator
//!
//! Everything logs through the `log` facade, with `env_logger` as the
//! backend. Phase boundaries and statistics go out at `info`, per-function
//! work from the passes at `debug` and single rewrites at `trace`.
//!
//! ```bash
//! RUST_LOG=info kjsc input.json                           # phases and stats
//! RUST_LOG=compiler::ir::optimization=debug kjsc input.json
//! RUST_LOG=compiler::codegen=trace kjsc input.json
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize at `warn`. Later calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize at `level`, ignoring `RUST_LOG`. Later calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize from `RUST_LOG`, falling back to `warn`
pub fn init_from_env() {
    INIT.call_once(|| {
        Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Level for a repeated `-v` flag: none is `warn`, then `info`, `debug`
/// and `trace`
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Test logger: captured by the harness, quiet unless `RUST_LOG` says
/// otherwise. Safe to call from every test.
pub fn init_test() {
    let _ = Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Whether one of the `init*` functions other than [`init_test`] ran
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        log::debug!("translator logging ready");
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::Warn);
        assert_eq!(level_for_verbosity(1), LevelFilter::Info);
        assert_eq!(level_for_verbosity(2), LevelFilter::Debug);
        assert_eq!(level_for_verbosity(7), LevelFilter::Trace);
    }
}
