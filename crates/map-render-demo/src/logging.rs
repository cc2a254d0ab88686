/*!
Logging and profiling setup for the demo driver.

Two implementations share one API:

- real: compiled with `feature = "profiling"`. Adds a tracing-chrome layer
  writing `trace-*.json` to the working directory; the trace is flushed when
  the returned guard is dropped.
- stub: logging only.
*/

/// Keeps the profiling backend alive; drop at the end of `main`
pub struct LoggingGuard {
    #[cfg(feature = "profiling")]
    _chrome: tracing_chrome::FlushGuard,
}

/// Set `RUST_LOG` to `default` if the user did not choose a filter
fn default_filter(default: &str) {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            std::env::set_var("RUST_LOG", default);
        }
    }
}

#[cfg(feature = "profiling")]
mod inner {
    use super::{LoggingGuard, default_filter};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    /// Initialize logging and the chrome profiling layer.
    pub fn setup_logging_and_profiling() -> LoggingGuard {
        default_filter("debug,map_render_index=info");

        let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .include_args(true)
            .build();
        let fmt_layer = fmt::layer().with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry()
            .with(chrome_layer)
            .with(fmt_layer)
            .init();

        tracing::info!("Tracing initialized with chrome profiling layer");
        LoggingGuard { _chrome: guard }
    }
}

#[cfg(not(feature = "profiling"))]
mod inner {
    use super::{LoggingGuard, default_filter};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    /// Initialize logging with sensible defaults; profiling is a no-op here.
    pub fn setup_logging_and_profiling() -> LoggingGuard {
        default_filter("info");

        let fmt_layer = fmt::layer().with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry().with(fmt_layer).init();

        tracing::info!("Logging initialized (profiling disabled in this build)");
        LoggingGuard {}
    }
}

pub use inner::setup_logging_and_profiling;
