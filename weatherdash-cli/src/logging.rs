use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` wins over the configured level;
/// `--verbose` forces debug output for this crate and the core.
pub fn init(configured_level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("weatherdash=debug,weatherdash_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = configured_level;
            EnvFilter::new(format!("weatherdash={level},weatherdash_core={level}"))
        })
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
