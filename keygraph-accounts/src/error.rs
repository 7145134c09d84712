//! Key graph error types.

use keygraph_crypto::CryptoError;
use keygraph_store::{EntityKind, StoreError};
use thiserror::Error;

/// Result type for key graph operations.
pub type KeyGraphResult<T> = Result<T, KeyGraphError>;

/// Errors returned by [`crate::KeyGraph`] operations. Every message starts
/// with the operation that failed.
#[derive(Debug, Error)]
pub enum KeyGraphError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Wrong password, email or one-time key. Never says which.
    #[error("{0}: credentials did not match")]
    CredentialMismatch(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("unknown account user: {0}")]
    UnknownUser(String),

    #[error("unknown secret: {0}")]
    UnknownSecret(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("remote key management failed: {0}")]
    Remote(String),
}

impl KeyGraphError {
    /// True for the kinds that must look identical to an outside caller so
    /// responses do not reveal which accounts exist.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            KeyGraphError::CredentialMismatch(_)
                | KeyGraphError::UnknownUser(_)
                | KeyGraphError::UnknownAccount(_)
        )
    }

    /// Message safe to show to an unauthenticated caller.
    pub fn public_message(&self) -> String {
        if self.is_credential_failure() {
            "could not authenticate with the given credentials".to_string()
        } else {
            match self {
                KeyGraphError::Validation(msg) => msg.clone(),
                _ => "the operation could not be completed".to_string(),
            }
        }
    }

    pub(crate) fn from_crypto(op: &str, err: CryptoError) -> Self {
        match err {
            CryptoError::Mismatch => KeyGraphError::CredentialMismatch(op.to_string()),
            CryptoError::EmptyInput(what) => {
                KeyGraphError::Validation(format!("{op}: {what} must not be empty"))
            }
            CryptoError::WeakPassword { .. } => KeyGraphError::Validation(format!("{op}: {err}")),
            CryptoError::UnknownAlgorithm { .. }
            | CryptoError::KeyDerivation(_)
            | CryptoError::Encryption(_)
            | CryptoError::Rsa(_) => KeyGraphError::Configuration(format!("{op}: {err}")),
            CryptoError::Decryption
            | CryptoError::Parse(_)
            | CryptoError::Decode(_)
            | CryptoError::InvalidKeyLength { .. }
            | CryptoError::Jwk(_) => KeyGraphError::Decryption(format!("{op}: {err}")),
        }
    }

    pub(crate) fn from_store(op: &str, err: StoreError) -> Self {
        match &err {
            StoreError::NotFound {
                kind: EntityKind::Account,
                id,
            } => KeyGraphError::UnknownAccount(format!("{op}: {id}")),
            StoreError::NotFound {
                kind: EntityKind::AccountUser,
                id,
            } => KeyGraphError::UnknownUser(format!("{op}: {id}")),
            StoreError::NotFound {
                kind: EntityKind::Secret,
                id,
            } => KeyGraphError::UnknownSecret(format!("{op}: {id}")),
            _ => KeyGraphError::Transaction(format!("{op}: {err}")),
        }
    }
}

/// Attaches the failing operation to lower-layer errors.
pub(crate) trait Context<T> {
    fn context(self, op: &str) -> KeyGraphResult<T>;
}

impl<T> Context<T> for Result<T, CryptoError> {
    fn context(self, op: &str) -> KeyGraphResult<T> {
        self.map_err(|e| KeyGraphError::from_crypto(op, e))
    }
}

impl<T> Context<T> for Result<T, StoreError> {
    fn context(self, op: &str) -> KeyGraphResult<T> {
        self.map_err(|e| KeyGraphError::from_store(op, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_errors_map_to_taxonomy() {
        assert!(matches!(
            KeyGraphError::from_crypto("login", CryptoError::Mismatch),
            KeyGraphError::CredentialMismatch(_)
        ));
        assert!(matches!(
            KeyGraphError::from_crypto("login", CryptoError::Decryption),
            KeyGraphError::Decryption(_)
        ));
        assert!(matches!(
            KeyGraphError::from_crypto(
                "login",
                CryptoError::UnknownAlgorithm { purpose: "password", version: 9 }
            ),
            KeyGraphError::Configuration(_)
        ));
    }

    #[test]
    fn store_not_found_maps_by_kind() {
        let err = KeyGraphError::from_store(
            "get account",
            StoreError::not_found(EntityKind::Account, "a1"),
        );
        assert_eq!(err.to_string(), "unknown account: get account: a1");

        let err = KeyGraphError::from_store("x", StoreError::Backend("disk".into()));
        assert!(matches!(err, KeyGraphError::Transaction(_)));
    }

    #[test]
    fn credential_failures_share_public_message() {
        let mismatch = KeyGraphError::CredentialMismatch("login".into());
        let unknown = KeyGraphError::UnknownUser("login: no match".into());
        assert!(mismatch.is_credential_failure());
        assert!(unknown.is_credential_failure());
        assert_eq!(mismatch.public_message(), unknown.public_message());
        assert!(!KeyGraphError::Decryption("x".into()).is_credential_failure());
    }
}
