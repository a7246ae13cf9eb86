//! Gnocchi API plumbing: authentication and the REST operations the sink
//! drives.

pub mod auth;
pub mod client;

pub use auth::{AuthError, Authenticator, KeystoneSession};
pub use client::{ClientError, Endpoint, GnocchiClient};
