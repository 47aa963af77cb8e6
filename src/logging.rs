use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the stderr logger.
///
/// The level is read from `PUD_LOG` (`debug`, `info`, `warn`, ...), `info`
/// when unset. `verbose` forces `debug`. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PUD_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
