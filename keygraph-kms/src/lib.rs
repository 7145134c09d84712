//! Key management service for keygraph.
//!
//! The KMS is the only process holding the master key. Application servers
//! send it plaintext to seal (`POST /encrypt`) and sealed account keys to
//! open (`POST /decrypt`), authenticating with RS256 tokens verified
//! against a JWKs endpoint. Operators reach `/admin` routes with a single
//! Basic-auth credential.
//!
//! [`RemoteEncrypter`] is the matching client: it plugs into a
//! [`keygraph_accounts::KeyGraph`] in place of a local master key.

mod auth;
mod client;
mod config;
mod error;
mod jwks;
mod router;
mod state;

pub use auth::{AuthScope, RPC_HEADER, require_admin, require_token};
pub use client::RemoteEncrypter;
pub use config::KmsConfig;
pub use error::{ErrorBody, KmsError, KmsResult};
pub use jwks::{JwksCache, VerificationKey};
pub use router::router;
pub use state::KmsState;
