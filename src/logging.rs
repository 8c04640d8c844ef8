use tracing_subscriber::{EnvFilter, fmt};

/// Default filter when `RUST_LOG` is unset: `info`, with chatty
/// dependencies held at `warn`.
pub const DEFAULT_FILTER: &str =
    "info,rustls=warn,electrum_client=warn,lwk_wollet=warn,reqwest=warn,hyper_util=warn";

/// Install the stderr formatter. `log` records from the SDK are bridged
/// into it. Calling this twice is harmless.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
