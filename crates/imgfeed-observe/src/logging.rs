use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "IMGFEED_LOG";

/// Installs the global `fmt` subscriber, filtered by [`env_filter`] with an `info` default.
///
/// Log field contract:
/// - Every operational line carries `event = "<snake_case>"` under target `imgfeed`.
/// - Include `shard` on any shard read/write event.
/// - Include `cursor` and `batch_size` on pipeline events.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Like [`init_tracing`] with a caller-chosen default directive. A second call keeps the
/// subscriber installed by the first.
pub fn init_tracing_with_default(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(true)
        .try_init();
}

/// `IMGFEED_LOG` first, then `RUST_LOG`, then `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing_with_default("warn");
        init_tracing();
    }
}
