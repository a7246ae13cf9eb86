//! Plugin configuration.

use std::collections::HashMap;
use std::time::Duration;

use http::Uri;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

/// How requests to Gnocchi authenticate.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Keystone password authentication; requires `auth_url`.
    Keystone,
    /// Gnocchi's basic middleware: the user name travels in the
    /// `Authorization` header, no password involved.
    #[default]
    Basic,
    /// Gnocchi's noauth middleware: explicit user/project/roles headers.
    Noauth,
}

fn default_user() -> String {
    "admin".into()
}

fn default_roles() -> String {
    "admin".into()
}

fn default_interface() -> String {
    "public".into()
}

fn default_resource_type() -> String {
    "collectd".into()
}

const fn default_batch_size() -> usize {
    10
}

const fn default_request_timeout_secs() -> u64 {
    10
}

/// Everything the plugin accepts from its collectd configuration block.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GnocchiConfig {
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Gnocchi API root. Optional under keystone, where the service catalog
    /// can name it; required otherwise.
    pub endpoint: Option<String>,

    /// Keystone identity endpoint, required for `auth_mode = "keystone"`.
    pub auth_url: Option<String>,

    /// User name presented to the basic middleware.
    #[serde(default = "default_user")]
    pub user: String,

    // Keystone password-method credentials, passed through as given. The
    // tenant fields are the pre-v3 spellings of the project fields and are
    // honored when the project ones are absent.
    pub username: Option<String>,
    pub user_id: Option<String>,
    pub password: Option<String>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub tenant_id: Option<String>,
    pub tenant_name: Option<String>,
    pub user_domain_id: Option<String>,
    pub user_domain_name: Option<String>,
    pub project_domain_id: Option<String>,
    pub project_domain_name: Option<String>,

    /// Roles claimed under the noauth middleware.
    #[serde(default = "default_roles")]
    pub roles: String,

    /// Which catalog interface to read when discovering the endpoint.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Region to match when discovering the endpoint from the catalog.
    pub region_name: Option<String>,

    /// Resource type host resources are filed under.
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    /// Number of buffered samples that triggers an automatic flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Ceiling on any single API request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra metric-type suffix entries, merged over the built-in table.
    #[serde(default)]
    pub metric_suffixes: HashMap<String, Vec<String>>,
}

/// Fatal configuration problems; initialization refuses to proceed.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("auth_mode = \"keystone\" requires auth_url"))]
    MissingAuthUrl,
    #[snafu(display("auth_mode {mode:?} requires an endpoint"))]
    MissingEndpoint { mode: AuthMode },
    #[snafu(display("endpoint is not a valid URL: {source}"))]
    InvalidEndpoint { source: http::uri::InvalidUri },
}

/// Validated connection plan: where requests go and how they authenticate.
#[derive(Clone, Debug)]
pub enum Connection {
    Basic {
        endpoint: Uri,
        user: String,
    },
    Noauth {
        endpoint: Uri,
        user_id: String,
        project_id: String,
        roles: String,
    },
    Keystone {
        auth_url: String,
        endpoint: Option<Uri>,
    },
}

impl GnocchiConfig {
    /// Checks the auth-mode invariants and parses the endpoint.
    pub fn connection(&self) -> Result<Connection, ConfigError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .map(|endpoint| endpoint.parse::<Uri>().context(InvalidEndpointSnafu))
            .transpose()?;

        match self.auth_mode {
            AuthMode::Keystone => match &self.auth_url {
                Some(auth_url) => Ok(Connection::Keystone {
                    auth_url: auth_url.clone(),
                    endpoint,
                }),
                None => MissingAuthUrlSnafu.fail(),
            },
            AuthMode::Basic => match endpoint {
                Some(endpoint) => Ok(Connection::Basic {
                    endpoint,
                    user: self.user.clone(),
                }),
                None => MissingEndpointSnafu { mode: self.auth_mode }.fail(),
            },
            AuthMode::Noauth => match endpoint {
                Some(endpoint) => Ok(Connection::Noauth {
                    endpoint,
                    user_id: self.user_id.clone().unwrap_or_else(default_user),
                    project_id: self.project_id.clone().unwrap_or_else(default_user),
                    roles: self.roles.clone(),
                }),
                None => MissingEndpointSnafu { mode: self.auth_mode }.fail(),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
