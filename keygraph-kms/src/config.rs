//! KMS configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Runtime configuration for the KMS. The master key is passed to
/// [`crate::KmsState::new`] separately and is never part of this struct.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KmsConfig {
    pub listen_addr: SocketAddr,

    /// Endpoint serving the keys application tokens are signed with. When
    /// unset, `/encrypt` and `/decrypt` accept unauthenticated requests.
    pub jwks_url: Option<String>,

    /// How long fetched verification keys are reused.
    pub jwks_ttl_secs: u64,

    /// Minimum time between refreshes forced by tokens with an unknown key
    /// id. Tokens arriving inside the window are checked against the cached
    /// keys.
    pub jwks_min_refresh_secs: u64,

    /// Admin user for `/admin` routes.
    pub basic_auth_user: Option<String>,

    /// Base64 encoded bcrypt hash of the admin password.
    pub hashed_basic_auth_password: Option<String>,

    /// Timeout for outgoing requests.
    pub request_timeout_secs: u64,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwks_url: None,
            jwks_ttl_secs: 300,
            jwks_min_refresh_secs: 30,
            basic_auth_user: None,
            hashed_basic_auth_password: None,
            request_timeout_secs: 10,
        }
    }
}
