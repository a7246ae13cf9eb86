//! The batching engine: buffers incoming samples and drives flushes
//! through the Gnocchi client.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::buffer::SampleBuffer;
use crate::config::{ConfigError, Connection, GnocchiConfig};
use crate::gnocchi::{
    AuthError, Authenticator, ClientError, Endpoint, GnocchiClient, KeystoneSession,
};
use crate::http::{HttpClient, HttpError};
use crate::identifier::SuffixTable;
use crate::measures::{build_payload, group_by_host};
use crate::sample::Sample;

/// Fatal initialization failures. Anything recoverable (an unreachable
/// server, a missing resource type) is deferred instead of failing here.
#[derive(Debug, Snafu)]
pub enum InitError {
    #[snafu(display("Invalid configuration: {source}"))]
    Config { source: ConfigError },
    #[snafu(display("Failed to build HTTP client: {source}"))]
    BuildHttpClient { source: HttpError },
    #[snafu(display("Failed to build authenticator: {source}"))]
    BuildAuth { source: AuthError },
}

#[derive(Debug, Snafu)]
pub enum FlushError {
    #[snafu(display("Failed to submit measures for {resource_id}: {source}"))]
    Submit {
        resource_id: String,
        source: ClientError,
    },
}

impl FlushError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Submit { source, .. } => source.is_transient(),
        }
    }
}

/// Buffers samples and ships them to Gnocchi in host-grouped batches.
pub struct GnocchiSink {
    client: GnocchiClient,
    suffixes: SuffixTable,
    buffer: Mutex<SampleBuffer>,
    batch_size: usize,
}

impl GnocchiSink {
    /// Validates the configuration, builds the authenticated client, and
    /// pre-creates the resource type best-effort.
    ///
    /// Only configuration problems are fatal. A dead or unreachable server
    /// at startup produces a warning and the resource type gets created
    /// lazily on the first rejected submission instead.
    pub async fn initialize(config: GnocchiConfig) -> Result<Self, InitError> {
        let connection = config.connection().context(ConfigSnafu)?;
        let http = HttpClient::new(Some(config.request_timeout())).context(BuildHttpClientSnafu)?;

        let (auth, endpoint) = match connection {
            Connection::Basic { endpoint, user } => (
                Authenticator::basic(&user).context(BuildAuthSnafu)?,
                Endpoint::Fixed(endpoint),
            ),
            Connection::Noauth {
                endpoint,
                user_id,
                project_id,
                roles,
            } => (
                Authenticator::noauth(&user_id, &project_id, &roles).context(BuildAuthSnafu)?,
                Endpoint::Fixed(endpoint),
            ),
            Connection::Keystone { auth_url, endpoint } => {
                let session = Arc::new(
                    KeystoneSession::new(http.clone(), &auth_url, &config)
                        .context(BuildAuthSnafu)?,
                );
                let endpoint = match endpoint {
                    Some(uri) => Endpoint::Fixed(uri),
                    None => Endpoint::Discovered(Arc::clone(&session)),
                };
                (Authenticator::Keystone(session), endpoint)
            }
        };

        let client = GnocchiClient::new(http, endpoint, auth, config.resource_type.clone());

        if let Err(error) = client.ensure_resource_type().await {
            warn!(
                message = "Could not pre-create the resource type, deferring to first submission.",
                resource_type = %client.resource_type(),
                %error,
            );
        }

        Ok(Self {
            client,
            suffixes: SuffixTable::new(&config.metric_suffixes),
            buffer: Mutex::new(SampleBuffer::new()),
            batch_size: config.batch_size,
        })
    }

    /// Number of samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Accepts one sample. Reaching the configured batch size synchronously
    /// flushes everything, with no age or plugin restriction.
    pub async fn submit(&self, sample: Sample) -> Result<(), FlushError> {
        let buffered = self.buffer.lock().unwrap().push(sample);
        if buffered >= self.batch_size {
            debug!(message = "Buffer reached batch size, flushing.", buffered);
            self.flush(0.0, None).await
        } else {
            Ok(())
        }
    }

    /// Drains every buffered sample at least `max_age_secs` old (and, when
    /// `source_filter` is set, dispatched by that plugin) and submits the
    /// drained set one host group at a time.
    ///
    /// Delivery is at-most-once: drained samples are never re-buffered, so
    /// a submission failure loses that flush attempt's data. A failing host
    /// group does not stop the remaining groups; the first error is
    /// returned once every group has been attempted.
    pub async fn flush(
        &self,
        max_age_secs: f64,
        source_filter: Option<&str>,
    ) -> Result<(), FlushError> {
        // collectd hands flush callbacks an empty identifier rather than none.
        let source_filter = source_filter.filter(|plugin| !plugin.is_empty());
        let flush_before = Utc::now().timestamp_millis() as f64 / 1000.0 - max_age_secs;
        let ready = self
            .buffer
            .lock()
            .unwrap()
            .take_ready(flush_before, source_filter);
        if ready.is_empty() {
            return Ok(());
        }
        debug!(message = "Flushing samples.", count = ready.len());

        let mut warned_fallbacks: HashSet<(String, String)> = HashSet::new();
        let mut first_error = None;
        for (host, samples) in group_by_host(ready) {
            let payload = build_payload(&host, &samples, &self.suffixes);

            for (plugin, type_name) in &payload.fallback_pairs {
                if warned_fallbacks.insert((plugin.clone(), type_name.clone())) {
                    warn!(
                        message = "No suffix entry for metric type, using positional value names.",
                        plugin = %plugin,
                        metric_type = %type_name,
                    );
                }
            }

            if payload.metrics.is_empty() {
                continue;
            }
            if let Err(error) = self
                .client
                .submit_batch(&payload.resource_id, &host, &payload.metrics)
                .await
            {
                if first_error.is_none() {
                    first_error = Some(FlushError::Submit {
                        resource_id: payload.resource_id,
                        source: error,
                    });
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
