//! Authentication against the Gnocchi API.
//!
//! Three modes, mirroring the service's own middleware set: `basic` sends
//! the user name in an `Authorization` header (no password, the basic
//! middleware only reads the user), `noauth` sends the bare identity
//! headers the noauth middleware expects, and `keystone` drives the
//! password-method token flow with the token cached until shortly before
//! it expires.

use std::fmt;
use std::sync::{Arc, RwLock};

use base64::prelude::{BASE64_STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use http::{Request, Uri, header::HeaderValue};
use hyper::Body;
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::debug;

use crate::config::GnocchiConfig;
use crate::http::{HttpClient, HttpError};

/// Tokens this close to expiry are treated as already expired.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 200;

#[derive(Debug, Snafu)]
pub enum AuthError {
    #[snafu(display("Credential not usable in a header: {source}"))]
    InvalidCredential {
        source: http::header::InvalidHeaderValue,
    },
    #[snafu(display("auth_url is not a valid URL: {source}"))]
    BadAuthUrl { source: http::uri::InvalidUri },
    #[snafu(display("Failed to encode keystone token request: {source}"))]
    EncodeTokenRequest { source: serde_json::Error },
    #[snafu(display("Failed to build keystone token request: {source}"))]
    BuildTokenRequest { source: http::Error },
    #[snafu(display("Keystone token request failed: {source}"))]
    TokenRequest { source: HttpError },
    #[snafu(display("Keystone rejected the token request: {status}"))]
    TokenRejected { status: http::StatusCode },
    #[snafu(display("Keystone response carried no X-Subject-Token header"))]
    MissingSubjectToken,
    #[snafu(display("Failed to read keystone response body: {source}"))]
    TokenBody { source: hyper::Error },
    #[snafu(display("Failed to parse keystone response: {source}"))]
    TokenParse { source: serde_json::Error },
    #[snafu(display(
        "No {interface} endpoint for the metric service in region {region:?}"
    ))]
    NoMetricEndpoint {
        interface: String,
        region: Option<String>,
    },
}

impl AuthError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TokenRequest { source } => source.is_transient(),
            _ => false,
        }
    }
}

/// Applies the configured credentials to outgoing API requests.
#[derive(Clone, Debug)]
pub enum Authenticator {
    Basic {
        header: HeaderValue,
    },
    Noauth {
        user_id: HeaderValue,
        project_id: HeaderValue,
        roles: HeaderValue,
    },
    Keystone(Arc<KeystoneSession>),
}

impl Authenticator {
    pub fn basic(user: &str) -> Result<Self, AuthError> {
        let encoded = BASE64_STANDARD.encode(user);
        let header = HeaderValue::from_str(&format!("basic {encoded}"))
            .context(InvalidCredentialSnafu)?;
        Ok(Self::Basic { header })
    }

    pub fn noauth(user_id: &str, project_id: &str, roles: &str) -> Result<Self, AuthError> {
        Ok(Self::Noauth {
            user_id: HeaderValue::from_str(user_id).context(InvalidCredentialSnafu)?,
            project_id: HeaderValue::from_str(project_id).context(InvalidCredentialSnafu)?,
            roles: HeaderValue::from_str(roles).context(InvalidCredentialSnafu)?,
        })
    }

    /// Sets the credential headers on one outgoing request. Keystone mode
    /// may go to the network for a fresh token.
    pub async fn apply<B>(&self, request: &mut Request<B>) -> Result<(), AuthError> {
        match self {
            Self::Basic { header } => {
                request
                    .headers_mut()
                    .insert(http::header::AUTHORIZATION, header.clone());
            }
            Self::Noauth {
                user_id,
                project_id,
                roles,
            } => {
                let headers = request.headers_mut();
                headers.insert("x-user-id", user_id.clone());
                headers.insert("x-project-id", project_id.clone());
                headers.insert("x-roles", roles.clone());
            }
            Self::Keystone(session) => {
                let token = session.token().await?;
                request.headers_mut().insert(
                    "x-auth-token",
                    HeaderValue::from_str(&token).context(InvalidCredentialSnafu)?,
                );
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct TokenState {
    token: String,
    expires_at: Option<DateTime<Utc>>,
    /// Metric-service URL from the catalog, when the catalog had one.
    endpoint: Option<Uri>,
}

/// Password-method keystone session: one token cached across requests and
/// refreshed once it falls inside the expiry margin. Construction does not
/// touch the network; the first request does.
pub struct KeystoneSession {
    client: HttpClient,
    token_url: Uri,
    request_body: serde_json::Value,
    interface: String,
    region_name: Option<String>,
    state: RwLock<Option<TokenState>>,
}

impl KeystoneSession {
    pub fn new(
        client: HttpClient,
        auth_url: &str,
        config: &GnocchiConfig,
    ) -> Result<Self, AuthError> {
        let token_url = format!("{}/auth/tokens", auth_url.trim_end_matches('/'))
            .parse::<Uri>()
            .context(BadAuthUrlSnafu)?;
        Ok(Self {
            client,
            token_url,
            request_body: token_request_body(config),
            interface: config.interface.clone(),
            region_name: config.region_name.clone(),
            state: RwLock::new(None),
        })
    }

    /// A token valid for at least the expiry margin, fetched anew when the
    /// cached one is missing or stale.
    pub async fn token(&self) -> Result<String, AuthError> {
        Ok(self.refreshed().await?.token)
    }

    /// The metric-service endpoint named by the token's catalog.
    pub async fn endpoint(&self) -> Result<Uri, AuthError> {
        let state = self.refreshed().await?;
        state.endpoint.context(NoMetricEndpointSnafu {
            interface: self.interface.clone(),
            region: self.region_name.clone(),
        })
    }

    fn current(&self) -> Option<TokenState> {
        let state = self.state.read().unwrap();
        let state = state.as_ref()?;
        match state.expires_at {
            Some(expires_at)
                if Utc::now() + chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS)
                    >= expires_at =>
            {
                None
            }
            _ => Some(state.clone()),
        }
    }

    async fn refreshed(&self) -> Result<TokenState, AuthError> {
        if let Some(state) = self.current() {
            return Ok(state);
        }
        debug!(message = "Fetching keystone token.", url = %self.token_url);
        let state = self.fetch().await?;
        *self.state.write().unwrap() = Some(state.clone());
        Ok(state)
    }

    async fn fetch(&self) -> Result<TokenState, AuthError> {
        let body = serde_json::to_vec(&self.request_body).context(EncodeTokenRequestSnafu)?;
        let request = Request::post(self.token_url.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .context(BuildTokenRequestSnafu)?;

        let response = self.client.send(request).await.context(TokenRequestSnafu)?;
        let status = response.status();
        if !status.is_success() {
            return TokenRejectedSnafu { status }.fail();
        }

        let token = response
            .headers()
            .get("x-subject-token")
            .and_then(|value| value.to_str().ok())
            .context(MissingSubjectTokenSnafu)?
            .to_owned();

        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .context(TokenBodySnafu)?;
        let doc: serde_json::Value = serde_json::from_slice(&bytes).context(TokenParseSnafu)?;

        let expires_at = doc["token"]["expires_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(TokenState {
            token,
            expires_at,
            endpoint: self.endpoint_from_catalog(&doc),
        })
    }

    fn endpoint_from_catalog(&self, doc: &serde_json::Value) -> Option<Uri> {
        for service in doc["token"]["catalog"].as_array().into_iter().flatten() {
            if service["type"].as_str() != Some("metric") {
                continue;
            }
            for endpoint in service["endpoints"].as_array().into_iter().flatten() {
                if endpoint["interface"].as_str() != Some(self.interface.as_str()) {
                    continue;
                }
                if let Some(region) = &self.region_name {
                    if endpoint["region"].as_str() != Some(region.as_str()) {
                        continue;
                    }
                }
                if let Some(url) = endpoint["url"].as_str() {
                    if let Ok(uri) = url.parse::<Uri>() {
                        return Some(uri);
                    }
                }
            }
        }
        None
    }
}

impl fmt::Debug for KeystoneSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The request body holds the password; keep it out of logs.
        f.debug_struct("KeystoneSession")
            .field("token_url", &self.token_url)
            .field("interface", &self.interface)
            .field("region_name", &self.region_name)
            .finish()
    }
}

fn token_request_body(config: &GnocchiConfig) -> serde_json::Value {
    let mut user = serde_json::Map::new();
    if let Some(id) = &config.user_id {
        user.insert("id".into(), json!(id));
    }
    if let Some(name) = &config.username {
        user.insert("name".into(), json!(name));
    }
    if let Some(password) = &config.password {
        user.insert("password".into(), json!(password));
    }
    if let Some(domain) = domain_ref(&config.user_domain_id, &config.user_domain_name) {
        user.insert("domain".into(), domain);
    }

    let mut project = serde_json::Map::new();
    if let Some(id) = config.project_id.as_ref().or(config.tenant_id.as_ref()) {
        project.insert("id".into(), json!(id));
    }
    if let Some(name) = config.project_name.as_ref().or(config.tenant_name.as_ref()) {
        project.insert("name".into(), json!(name));
    }
    if let Some(domain) = domain_ref(&config.project_domain_id, &config.project_domain_name) {
        project.insert("domain".into(), domain);
    }

    let mut auth = json!({
        "identity": {
            "methods": ["password"],
            "password": { "user": user },
        },
    });
    if !project.is_empty() {
        auth["scope"] = json!({ "project": project });
    }
    json!({ "auth": auth })
}

fn domain_ref(id: &Option<String>, name: &Option<String>) -> Option<serde_json::Value> {
    match (id, name) {
        (Some(id), _) => Some(json!({ "id": id })),
        (None, Some(name)) => Some(json!({ "name": name })),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn config(extra: &str) -> GnocchiConfig {
        toml::from_str(&format!(
            r#"
            auth_mode = "keystone"
            auth_url = "http://keystone:5000/v3"
            {extra}
            "#
        ))
        .unwrap()
    }

    #[test]
    fn basic_header_encodes_the_user() {
        match Authenticator::basic("admin").unwrap() {
            Authenticator::Basic { header } => {
                assert_eq!(header.to_str().unwrap(), "basic YWRtaW4=");
            }
            other => panic!("unexpected authenticator: {other:?}"),
        }
    }

    #[tokio::test]
    async fn noauth_sets_identity_headers() {
        let auth = Authenticator::noauth("u", "p", "admin,member").unwrap();
        let mut request = Request::post("http://gnocchi:8041").body(()).unwrap();
        auth.apply(&mut request).await.unwrap();
        assert_eq!(request.headers()["x-user-id"], "u");
        assert_eq!(request.headers()["x-project-id"], "p");
        assert_eq!(request.headers()["x-roles"], "admin,member");
    }

    #[test]
    fn token_body_carries_scope_and_domains() {
        let config = config(
            r#"
            username = "collectd"
            password = "secret"
            project_name = "metrics"
            user_domain_name = "Default"
            "#,
        );
        let body = token_request_body(&config);
        assert_eq!(
            body,
            json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "name": "collectd",
                                "password": "secret",
                                "domain": { "name": "Default" },
                            },
                        },
                    },
                    "scope": { "project": { "name": "metrics" } },
                },
            })
        );
    }

    #[test]
    fn tenant_fields_fill_in_for_project_fields() {
        let config = config(
            r#"
            username = "collectd"
            password = "secret"
            tenant_name = "legacy"
            "#,
        );
        let body = token_request_body(&config);
        assert_eq!(body["auth"]["scope"]["project"]["name"], json!("legacy"));
    }

    #[test]
    fn unscoped_request_has_no_scope() {
        let config = config(
            r#"
            username = "collectd"
            password = "secret"
            "#,
        );
        let body = token_request_body(&config);
        assert!(body["auth"].get("scope").is_none());
    }

    #[test]
    fn catalog_lookup_honors_interface_and_region() {
        let client = HttpClient::new(None).unwrap();
        let config = config(r#"region_name = "r2""#);
        let session = KeystoneSession::new(client, "http://keystone:5000/v3", &config).unwrap();

        let doc = json!({
            "token": {
                "catalog": [
                    { "type": "identity", "endpoints": [] },
                    {
                        "type": "metric",
                        "endpoints": [
                            { "interface": "internal", "region": "r2", "url": "http://int:8041" },
                            { "interface": "public", "region": "r1", "url": "http://r1:8041" },
                            { "interface": "public", "region": "r2", "url": "http://r2:8041" },
                        ],
                    },
                ],
            },
        });
        let endpoint = session.endpoint_from_catalog(&doc).unwrap();
        assert_eq!(endpoint, "http://r2:8041".parse::<Uri>().unwrap());
    }

    #[test]
    fn missing_catalog_entry_resolves_to_none() {
        let client = HttpClient::new(None).unwrap();
        let config = config("");
        let session = KeystoneSession::new(client, "http://keystone:5000/v3", &config).unwrap();
        assert!(
            session
                .endpoint_from_catalog(&json!({ "token": {} }))
                .is_none()
        );
    }
}
