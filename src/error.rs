use crate::HashedIdentity;

/// Terminal outcomes of decoding. A message discarded for any of these
/// reasons must not be retried.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum DiscardMessage {
    /// The envelope could not be parsed.
    #[error("Corrupted message: {0}")]
    Corrupted(String),

    /// No recipient record is addressed to an identity owned by this device.
    #[error("Message is not addressed to us")]
    NotToMe,

    /// The sender is blacklisted.
    #[error("Sender is blacklisted")]
    Blacklist,

    /// A message with the same content hash was already seen.
    #[error("Duplicate message")]
    Duplicate,

    /// A signature, authentication tag or integrity hash did not match.
    #[error("Bad signature: {0}")]
    BadSignature(String),

    /// The application payload could not be decoded.
    #[error("Bad obj format: {0}")]
    BadObjFormat(String),
}

/// Key material that must be fetched before the same call can succeed.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum NeedsKey {
    /// The signing key for this identity and epoch is not held.
    #[error("Missing signature key for {0}")]
    Signature(HashedIdentity),

    /// The decryption key for this identity and epoch is not held.
    #[error("Missing encryption key for {0}")]
    Encryption(HashedIdentity),
}

impl NeedsKey {
    /// The identity, including its epoch, whose key is missing.
    pub fn identity(&self) -> &HashedIdentity {
        match self {
            Self::Signature(identity) | Self::Encryption(identity) => identity,
        }
    }
}

/// Errors returned by the message codec.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// The message was dropped.
    #[error(transparent)]
    Discard(#[from] DiscardMessage),

    /// The operation is blocked on missing key material.
    #[error(transparent)]
    NeedsKey(#[from] NeedsKey),

    /// An outgoing message addresses nobody.
    #[error("Message has no recipients")]
    NoRecipients,

    /// An outgoing message addresses more identities than receivers accept.
    #[error("{count} recipients exceeds the limit of {max}")]
    TooManyRecipients { count: usize, max: usize },

    /// A cryptographic primitive rejected its input while sending.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

impl Error {
    /// Whether repeating the same call may succeed once keys are available.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NeedsKey(_))
    }

    /// The discard reason, if this error is terminal.
    pub fn discard(&self) -> Option<&DiscardMessage> {
        match self {
            Self::Discard(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<hkdf::InvalidLength> for Error {
    fn from(value: hkdf::InvalidLength) -> Self {
        Self::Crypto(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Authority, Identity};

    #[test]
    fn test_only_needs_key_is_recoverable() {
        let identity = Identity::from_principal(Authority::Email, "carol@example.com").at(3);

        assert!(Error::from(NeedsKey::Signature(identity)).is_recoverable());
        assert!(!Error::from(DiscardMessage::Duplicate).is_recoverable());
        assert!(!Error::Crypto("oversized".to_string()).is_recoverable());
        assert!(!Error::NoRecipients.is_recoverable());
        assert!(!Error::TooManyRecipients { count: 3, max: 2 }.is_recoverable());
    }

    #[test]
    fn test_needs_key_names_identity_and_epoch() {
        let identity = Identity::from_principal(Authority::Phone, "+15555550100").at(42);
        let needs = NeedsKey::Encryption(identity);

        assert_eq!(needs.identity().temporal_frame(), 42);
        assert!(needs.to_string().contains("encryption"));
    }
}
