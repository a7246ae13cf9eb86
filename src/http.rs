//! HTTP plumbing shared by the Gnocchi API client and the keystone session.

use std::time::Duration;

use futures::future::BoxFuture;
use http::{Request, header::HeaderValue};
use hyper::{
    Body,
    client::{Client, HttpConnector},
};
use hyper_openssl::HttpsConnector;
use snafu::{ResultExt, Snafu};
use tracing::debug;

#[derive(Debug, Snafu)]
pub enum HttpError {
    #[snafu(display("Failed to build HTTPS connector: {source}"))]
    MakeHttpsConnector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to make HTTP(S) request: {source}"))]
    CallRequest { source: hyper::Error },
    #[snafu(display("Request timed out after {timeout:?}"))]
    RequestTimeout { timeout: Duration },
}

impl HttpError {
    /// Connection-level failures that can be expected to clear on their
    /// own; callers downgrade these to warnings.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MakeHttpsConnector { .. } => false,
            Self::CallRequest { source } => {
                source.is_connect()
                    || source.is_timeout()
                    || source.is_closed()
                    || source.is_incomplete_message()
            }
            Self::RequestTimeout { .. } => true,
        }
    }
}

/// A hyper client over TLS with the default headers applied and an optional
/// ceiling on each request's round trip.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>>,
    user_agent: HeaderValue,
    timeout: Option<Duration>,
}

impl HttpClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self, HttpError> {
        let https = HttpsConnector::new().context(MakeHttpsConnectorSnafu)?;
        let client = Client::builder().build(https);

        let user_agent = HeaderValue::from_static(concat!(
            "collectd-gnocchi/",
            env!("CARGO_PKG_VERSION")
        ));

        Ok(Self {
            client,
            user_agent,
            timeout,
        })
    }

    pub fn send(
        &self,
        mut request: Request<Body>,
    ) -> BoxFuture<'static, Result<http::Response<Body>, HttpError>> {
        default_request_headers(&mut request, &self.user_agent);

        debug!(
            message = "Sending HTTP request.",
            method = %request.method(),
            uri = %request.uri(),
        );

        let response = self.client.request(request);
        let timeout = self.timeout;

        Box::pin(async move {
            let result = match timeout {
                Some(timeout) => tokio::time::timeout(timeout, response)
                    .await
                    .map_err(|_| HttpError::RequestTimeout { timeout })?,
                None => response.await,
            };
            let response = result.context(CallRequestSnafu)?;
            debug!(message = "HTTP response.", status = %response.status());
            Ok(response)
        })
    }
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key("User-Agent") {
        request
            .headers_mut()
            .insert("User-Agent", user_agent.clone());
    }

    if !request.headers().contains_key("Accept") {
        request
            .headers_mut()
            .insert("Accept", HeaderValue::from_static("application/json"));
    }
}
