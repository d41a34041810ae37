//! Logger setup for the command line front-end.

use env_logger::Env;

/// Initializes `env_logger`.
///
/// `RUST_LOG` wins if set; otherwise the level follows the number of `-v`
/// flags, starting at `warn`.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}
