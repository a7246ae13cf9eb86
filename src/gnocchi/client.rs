//! Gnocchi REST operations: batch measure submission and on-demand
//! provisioning of the resource type and per-host resources.

use std::sync::Arc;

use http::{Request, StatusCode, Uri};
use hyper::Body;
use serde_json::json;
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::gnocchi::auth::{AuthError, Authenticator, KeystoneSession};
use crate::http::{HttpClient, HttpError};
use crate::measures::MetricMeasures;

const BATCH_PATH: &str = "/v1/batch/resources/metrics/measures?create_metrics=true";
const RESOURCE_TYPE_PATH: &str = "/v1/resource_type";

#[derive(Debug, Snafu)]
pub enum ClientError {
    #[snafu(display("Failed to make HTTP(S) request: {source}"))]
    Request { source: HttpError },
    #[snafu(display("Failed to build HTTP request: {source}"))]
    BuildRequest { source: http::Error },
    #[snafu(display("API URL is invalid: {source}"))]
    UriParse { source: http::uri::InvalidUri },
    #[snafu(display("Failed to encode request body: {source}"))]
    Encode { source: serde_json::Error },
    #[snafu(display("Failed to read response body: {source}"))]
    ReadBody { source: hyper::Error },
    #[snafu(display("Authentication failed: {source}"))]
    Auth { source: AuthError },
    #[snafu(display("Batch rejected, resource or metrics unknown: {message}"))]
    UnknownResources { message: String },
    #[snafu(display("Resource type {name} does not exist"))]
    ResourceTypeMissing { name: String },
    #[snafu(display("{what} already exists"))]
    AlreadyExists { what: &'static str },
    #[snafu(display("Server responded with an error: {status}: {message}"))]
    Server {
        status: StatusCode,
        message: String,
    },
}

impl ClientError {
    /// True for connection-class failures; callers downgrade these to
    /// warnings.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { source } => source.is_transient(),
            Self::Auth { source } => source.is_transient(),
            _ => false,
        }
    }
}

/// Where API requests go: a configured URL, or whatever the keystone
/// catalog names for the metric service.
#[derive(Clone, Debug)]
pub enum Endpoint {
    Fixed(Uri),
    Discovered(Arc<KeystoneSession>),
}

impl Endpoint {
    async fn resolve(&self) -> Result<Uri, AuthError> {
        match self {
            Self::Fixed(uri) => Ok(uri.clone()),
            Self::Discovered(session) => session.endpoint().await,
        }
    }
}

/// Handle on one Gnocchi service: the HTTP client, the credentials, and the
/// resource type measurements are filed under.
#[derive(Clone, Debug)]
pub struct GnocchiClient {
    http: HttpClient,
    endpoint: Endpoint,
    auth: Authenticator,
    resource_type: String,
}

impl GnocchiClient {
    pub fn new(
        http: HttpClient,
        endpoint: Endpoint,
        auth: Authenticator,
        resource_type: String,
    ) -> Self {
        Self {
            http,
            endpoint,
            auth,
            resource_type,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Submits one host's measures, letting the server create missing
    /// metrics on the fly.
    pub async fn batch_measures(
        &self,
        resource_id: &str,
        metrics: &MetricMeasures,
    ) -> Result<(), ClientError> {
        let mut body = serde_json::Map::new();
        body.insert(
            resource_id.to_owned(),
            serde_json::to_value(metrics).context(EncodeSnafu)?,
        );

        let (status, message) = self
            .post_json(BATCH_PATH, &serde_json::Value::Object(body))
            .await?;
        match status {
            status if status.is_success() => {
                debug!(message = "Measures accepted.", resource_id = %resource_id);
                Ok(())
            }
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                UnknownResourcesSnafu { message }.fail()
            }
            status => ServerSnafu { status, message }.fail(),
        }
    }

    pub async fn create_resource(
        &self,
        resource_id: &str,
        host: &str,
    ) -> Result<(), ClientError> {
        let path = format!("/v1/resource/{}", self.resource_type);
        let body = json!({ "id": resource_id, "host": host });
        let (status, message) = self.post_json(&path, &body).await?;
        match status {
            status if status.is_success() => {
                debug!(message = "Resource created.", resource_id = %resource_id);
                Ok(())
            }
            StatusCode::CONFLICT => AlreadyExistsSnafu { what: "resource" }.fail(),
            StatusCode::NOT_FOUND => ResourceTypeMissingSnafu {
                name: self.resource_type.clone(),
            }
            .fail(),
            status => ServerSnafu { status, message }.fail(),
        }
    }

    pub async fn create_resource_type(&self) -> Result<(), ClientError> {
        let body = json!({
            "name": self.resource_type,
            "attributes": {
                "host": { "type": "string", "required": true },
            },
        });
        let (status, message) = self.post_json(RESOURCE_TYPE_PATH, &body).await?;
        match status {
            status if status.is_success() => {
                debug!(message = "Resource type created.", name = %self.resource_type);
                Ok(())
            }
            StatusCode::CONFLICT => AlreadyExistsSnafu {
                what: "resource type",
            }
            .fail(),
            status => ServerSnafu { status, message }.fail(),
        }
    }

    /// Creates the resource type, treating "already exists" as success.
    pub async fn ensure_resource_type(&self) -> Result<(), ClientError> {
        match self.create_resource_type().await {
            Err(ClientError::AlreadyExists { .. }) => Ok(()),
            other => other,
        }
    }

    /// Creates the resource for `host`, provisioning the resource type
    /// first when the server has never seen it. "Already exists" counts as
    /// success at every step.
    pub async fn ensure_resource(
        &self,
        resource_id: &str,
        host: &str,
    ) -> Result<(), ClientError> {
        match self.create_resource(resource_id, host).await {
            Ok(()) | Err(ClientError::AlreadyExists { .. }) => Ok(()),
            Err(ClientError::ResourceTypeMissing { .. }) => {
                debug!(
                    message = "Resource type missing, creating it.",
                    name = %self.resource_type,
                );
                self.ensure_resource_type().await?;
                match self.create_resource(resource_id, host).await {
                    Err(ClientError::AlreadyExists { .. }) => Ok(()),
                    other => other,
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Submits a batch, lazily provisioning the host's resource when the
    /// server does not know it yet, then retrying exactly once. A failure
    /// of the retry propagates.
    pub async fn submit_batch(
        &self,
        resource_id: &str,
        host: &str,
        metrics: &MetricMeasures,
    ) -> Result<(), ClientError> {
        match self.batch_measures(resource_id, metrics).await {
            Err(ClientError::UnknownResources { message }) => {
                debug!(
                    message = "Batch rejected, provisioning the resource and retrying.",
                    resource_id = %resource_id,
                    reason = %message,
                );
                self.ensure_resource(resource_id, host).await?;
                self.batch_measures(resource_id, metrics).await
            }
            other => other,
        }
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(StatusCode, String), ClientError> {
        let base = self.endpoint.resolve().await.context(AuthSnafu)?;
        let uri = api_url(&base, path)?;
        let payload = serde_json::to_vec(body).context(EncodeSnafu)?;

        let mut request = Request::post(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .context(BuildRequestSnafu)?;
        self.auth.apply(&mut request).await.context(AuthSnafu)?;

        let response = self.http.send(request).await.context(RequestSnafu)?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .context(ReadBodySnafu)?;
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }
}

fn api_url(base: &Uri, path: &str) -> Result<Uri, ClientError> {
    let mut url = base.to_string();
    while url.ends_with('/') {
        url.pop();
    }
    url.push_str(path);
    url.parse::<Uri>().context(UriParseSnafu)
}
