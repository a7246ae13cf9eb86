//! Boundary adapter for the embedding process.
//!
//! collectd expects callbacks that never unwind into it. The core keeps its
//! functions honestly fallible; this wrapper is where failures turn into
//! log lines: connection-class trouble is logged as a warning, anything
//! else as an error with full detail. Only configuration mistakes
//! propagate, leaving the plugin disabled.

use tracing::{error, warn};

use crate::config::GnocchiConfig;
use crate::sample::Sample;
use crate::sink::{FlushError, GnocchiSink, InitError};

/// The `configure`/`write`/`flush` surface registered with the host.
#[derive(Default)]
pub struct Plugin {
    sink: Option<GnocchiSink>,
}

impl Plugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the sink from the parsed configuration block. A failure here
    /// disables the plugin until the next successful `configure`.
    pub async fn configure(&mut self, config: GnocchiConfig) -> Result<(), InitError> {
        match GnocchiSink::initialize(config).await {
            Ok(sink) => {
                self.sink = Some(sink);
                Ok(())
            }
            Err(error) => {
                self.sink = None;
                Err(error)
            }
        }
    }

    /// Write callback: hands one sample to the sink, swallowing failures.
    pub async fn write(&self, sample: Sample) {
        let Some(sink) = &self.sink else {
            warn!("Dropping sample, plugin is not configured.");
            return;
        };
        if let Err(error) = sink.submit(sample).await {
            log_swallowed("write", &error);
        }
    }

    /// Flush callback: drains samples older than `max_age_secs`, restricted
    /// to `source_filter`'s plugin when given, swallowing failures.
    pub async fn flush(&self, max_age_secs: f64, source_filter: Option<&str>) {
        let Some(sink) = &self.sink else {
            warn!("Ignoring flush, plugin is not configured.");
            return;
        };
        if let Err(error) = sink.flush(max_age_secs, source_filter).await {
            log_swallowed("flush", &error);
        }
    }
}

fn log_swallowed(callback: &str, error: &FlushError) {
    if error.is_transient() {
        warn!(
            message = "Could not reach Gnocchi, measures were dropped.",
            callback,
            %error,
        );
    } else {
        error!(
            message = "Unexpected failure in callback.",
            callback,
            %error,
        );
    }
}
