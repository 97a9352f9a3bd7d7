use crate::crypto::{self, KEY_SIZE, NONCE_SIZE};
use crate::{DeviceName, Error, HashedIdentity, Identity};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const BLIND_SIGNATURE_LABEL: &[u8] = b"Musubi-Blind-Signature";

/// Cache key for secrets we send with.
///
/// A hit requires all four parts to match; advancing either epoch makes the
/// old entry unreachable without deleting it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutgoingSecretKey {
    pub from: Identity,
    pub to: Identity,
    pub signature_epoch: u64,
    pub encryption_epoch: u64,
}

impl OutgoingSecretKey {
    pub fn new(from: &HashedIdentity, to: &HashedIdentity) -> Self {
        Self {
            from: from.identity(),
            to: to.identity(),
            signature_epoch: from.temporal_frame(),
            encryption_epoch: to.temporal_frame(),
        }
    }

    pub fn from_identity(&self) -> HashedIdentity {
        self.from.at(self.signature_epoch)
    }

    pub fn to_identity(&self) -> HashedIdentity {
        self.to.at(self.encryption_epoch)
    }
}

/// Cache key for secrets we received.
///
/// Keyed by the signature bytes observed on the wire: an entry only exists
/// once that exact signature was verified over its encrypted key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IncomingSecretKey {
    pub device: DeviceName,
    pub to: HashedIdentity,
    pub signature: Vec<u8>,
}

/// A channel secret derived for sending from one identity to another.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OutgoingChannelSecret {
    pub(crate) key: Box<[u8; KEY_SIZE]>,
    /// The key encrypted to the recipient's identity.
    pub encrypted_key: Vec<u8>,
    /// Signature over `encrypted_key ‖ device name`.
    pub signature: Vec<u8>,
    pub signature_epoch: u64,
    pub encryption_epoch: u64,
}

impl OutgoingChannelSecret {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

/// A channel secret recovered from a verified incoming record.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct IncomingChannelSecret {
    pub(crate) key: Box<[u8; KEY_SIZE]>,
    pub encrypted_key: Vec<u8>,
    #[zeroize(skip)]
    pub from: HashedIdentity,
    pub signature_epoch: u64,
    pub encryption_epoch: u64,
}

impl IncomingChannelSecret {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

/// Bytes covered by a channel secret's signature.
pub(crate) fn signed_bytes(encrypted_key: &[u8], device: &DeviceName) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(encrypted_key.len() + device.as_bytes().len());
    bytes.extend_from_slice(encrypted_key);
    bytes.extend_from_slice(device.as_bytes());
    bytes
}

fn blind_signature_key(
    protocol_info: &[u8],
    channel_key: &[u8; KEY_SIZE],
) -> Option<([u8; KEY_SIZE], [u8; NONCE_SIZE])> {
    let mut material = Zeroizing::new([0u8; KEY_SIZE + NONCE_SIZE]);
    crypto::derive(
        protocol_info,
        channel_key,
        &[BLIND_SIGNATURE_LABEL],
        material.as_mut_slice(),
    )
    .ok()?;

    let mut key = [0u8; KEY_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    key.copy_from_slice(&material[0..KEY_SIZE]);
    nonce.copy_from_slice(&material[KEY_SIZE..]);
    Some((key, nonce))
}

/// Seals a channel signature for a blind message.
///
/// The nonce is derived from the channel key, so every message sent under
/// one channel secret carries the same sealed bytes and receivers can keep
/// using them as a cache key.
pub(crate) fn seal_signature(
    protocol_info: &[u8],
    channel_key: &[u8; KEY_SIZE],
    signature: &[u8],
) -> Result<Vec<u8>, Error> {
    let (mut key, nonce) = blind_signature_key(protocol_info, channel_key)
        .ok_or_else(|| Error::Crypto("Blind signature key derivation failed".to_string()))?;
    let sealed = crypto::encrypt(&key, &nonce, signature, &[]);
    key.zeroize();
    sealed
}

/// Inverse of [`seal_signature`].
pub(crate) fn open_signature(
    protocol_info: &[u8],
    channel_key: &[u8; KEY_SIZE],
    sealed: &[u8],
) -> Option<Vec<u8>> {
    let (mut key, nonce) = blind_signature_key(protocol_info, channel_key)?;
    let signature = crypto::decrypt(&key, &nonce, sealed, &[]);
    key.zeroize();
    signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Authority;

    #[test]
    fn test_outgoing_key_splits_epochs() {
        let alice = Identity::from_principal(Authority::Email, "alice@example.com");
        let bob = Identity::from_principal(Authority::Email, "bob@example.com");

        let key = OutgoingSecretKey::new(&alice.at(3), &bob.at(8));
        assert_eq!(key.from_identity(), alice.at(3));
        assert_eq!(key.to_identity(), bob.at(8));
        assert_ne!(key, OutgoingSecretKey::new(&alice.at(4), &bob.at(8)));
        assert_ne!(key, OutgoingSecretKey::new(&alice.at(3), &bob.at(9)));
    }

    #[test]
    fn test_sealed_signature_is_deterministic() {
        let channel_key = [8u8; KEY_SIZE];
        let a = seal_signature(b"info", &channel_key, &[1u8; 64]).unwrap();
        let b = seal_signature(b"info", &channel_key, &[1u8; 64]).unwrap();

        assert_eq!(a, b);
        assert_eq!(open_signature(b"info", &channel_key, &a).unwrap(), vec![1u8; 64]);
        assert!(open_signature(b"info", &[9u8; KEY_SIZE], &a).is_none());
    }
}
