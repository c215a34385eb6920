use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "STRAND_LOG";

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "strand=debug"
    } else {
        "strand=info"
    }
}

/// Logs go to stderr; stdout is reserved for command output that scripts parse.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .init();
}
