//! Account key graph for keygraph.
//!
//! Every account has an RSA keypair whose private half is encrypted under a
//! random key-encryption key (KEK). The KEK is never stored. Each account
//! user holds it wrapped under keys derived from their password and from
//! their email address, and for the span of a password reset, under a
//! one-time key as well. [`KeyGraph`] implements every operation that
//! creates, unwraps or re-wraps those branches, plus the migration of
//! pseudonymous end-user secrets and their events.
//!
//! # Transactions
//!
//! Each operation commits all of its changes in one store transaction or
//! none of them. Credential-derived keys are computed on tokio's blocking
//! pool between a read and the final write transaction, and the write
//! re-checks that the records it read are unchanged.

mod accounts;
mod bootstrap;
mod config;
mod encrypter;
mod error;
mod graph;
mod login;
mod reset;
mod results;
mod scatter;
mod secrets;
mod sharing;

pub use bootstrap::{BootstrapAccount, BootstrapAccountUser, BootstrapConfig};
pub use config::KeyGraphConfig;
pub use encrypter::{Encrypter, LocalEncrypter, open, seal};
pub use error::{KeyGraphError, KeyGraphResult};
pub use graph::KeyGraph;
pub use results::{
    AccountKeys, AccountResult, AccountUserInfo, EventResult, EventsResult, InviteResult,
    LoginAccount, LoginResult, SecretAssociation,
};
