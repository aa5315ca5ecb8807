use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(clap::Args, Debug, Clone, Default)]
#[group()]
pub struct LoggingArgs {
    /// Enable debug mode.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,
}

impl LoggingArgs {
    pub fn init(&self) {
        init_logging(self.json_logs, self.debug);
    }
}

fn default_filter(debug_mode: bool) -> &'static str {
    if debug_mode {
        "hub_repo=debug,chart_repository=debug,tower_http=debug,info"
    } else {
        "hub_repo=info,chart_repository=info,tower_http=warn,info"
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the built-in filter. Calling this more
/// than once is harmless; later calls are ignored.
pub fn init_logging(json: bool, debug_mode: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug_mode)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    if let Err(e) = result {
        tracing::debug!("Logging already initialised: {}", e);
    }
}
