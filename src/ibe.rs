//! Identity-based key material.
//!
//! Public keys are a function of a [`HashedIdentity`] and the authority's
//! public parameters alone, so a sender can address any identity at any
//! epoch without a prior exchange. Private keys are extracted by the
//! authority per (identity, epoch) and reach the codec only through the
//! transport data provider.

use crate::crypto::{self, KEY_SIZE, NONCE_SIZE, random_bytes};
use crate::{Error, HashedIdentity};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use std::sync::Arc;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

const SIGNATURE_LABEL: &[u8] = b"Musubi-IBS-User-Key";
const ENCRYPTION_LABEL: &[u8] = b"Musubi-IBE-User-Key";
const ENVELOPE_LABEL: &[u8] = b"Musubi-IBE-Envelope";

/// Derives public keys from identities.
pub trait PublicParameters {
    /// Key verifying signatures made by `identity` during its epoch.
    fn signature_public_key(&self, identity: &HashedIdentity) -> Option<VerifyingKey>;

    /// Key that encrypts to `identity` during its epoch.
    fn encryption_public_key(&self, identity: &HashedIdentity) -> Option<PublicKey>;
}

/// Private signing key of one identity for one epoch.
#[derive(Clone)]
pub struct SignatureUserKey {
    identity: HashedIdentity,
    key: SigningKey,
}

impl SignatureUserKey {
    pub fn new(identity: HashedIdentity, key: SigningKey) -> Self {
        Self { identity, key }
    }

    pub fn identity(&self) -> &HashedIdentity {
        &self.identity
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

/// Private decryption key of one identity for one epoch.
#[derive(Clone)]
pub struct EncryptionUserKey {
    identity: HashedIdentity,
    key: StaticSecret,
}

impl EncryptionUserKey {
    pub fn new(identity: HashedIdentity, key: StaticSecret) -> Self {
        Self { identity, key }
    }

    pub fn identity(&self) -> &HashedIdentity {
        &self.identity
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.key)
    }
}

/// Authority for a single trust domain.
///
/// User keys are derived from a master seed with HKDF, so public keys for
/// any identity can be recomputed by whoever holds the parameters. Cloning
/// is cheap and shares the seed.
#[derive(Clone)]
pub struct LocalAuthority {
    seed: Arc<Zeroizing<[u8; 32]>>,
}

impl LocalAuthority {
    pub fn new() -> Self {
        Self::from_seed(random_bytes::<32>())
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            seed: Arc::new(Zeroizing::new(seed)),
        }
    }

    fn user_seed(&self, label: &[u8], identity: &HashedIdentity) -> Option<Zeroizing<[u8; 32]>> {
        let mut seed = Zeroizing::new([0u8; 32]);
        crypto::derive(
            label,
            self.seed.as_slice(),
            &[&identity.to_bytes()],
            seed.as_mut_slice(),
        )
        .ok()?;
        Some(seed)
    }

    /// Extracts the signing key of `identity` for its epoch.
    pub fn extract_signature_key(&self, identity: &HashedIdentity) -> Option<SignatureUserKey> {
        let seed = self.user_seed(SIGNATURE_LABEL, identity)?;
        Some(SignatureUserKey::new(*identity, SigningKey::from_bytes(&seed)))
    }

    /// Extracts the decryption key of `identity` for its epoch.
    pub fn extract_encryption_key(&self, identity: &HashedIdentity) -> Option<EncryptionUserKey> {
        let seed = self.user_seed(ENCRYPTION_LABEL, identity)?;
        Some(EncryptionUserKey::new(*identity, StaticSecret::from(*seed)))
    }
}

impl Default for LocalAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicParameters for LocalAuthority {
    fn signature_public_key(&self, identity: &HashedIdentity) -> Option<VerifyingKey> {
        self.extract_signature_key(identity)
            .map(|key| key.verifying_key())
    }

    fn encryption_public_key(&self, identity: &HashedIdentity) -> Option<PublicKey> {
        self.extract_encryption_key(identity)
            .map(|key| key.public_key())
    }
}

fn envelope_key(
    protocol_info: &[u8],
    shared_secret: &[u8; 32],
    ephemeral_public: &PublicKey,
    to: &HashedIdentity,
) -> Result<Zeroizing<[u8; KEY_SIZE + NONCE_SIZE]>, Error> {
    let mut material = Zeroizing::new([0u8; KEY_SIZE + NONCE_SIZE]);
    crypto::derive(
        protocol_info,
        shared_secret,
        &[ENVELOPE_LABEL, ephemeral_public.as_bytes(), &to.to_bytes()],
        material.as_mut_slice(),
    )?;
    Ok(material)
}

fn split_key(material: &[u8; KEY_SIZE + NONCE_SIZE]) -> ([u8; KEY_SIZE], [u8; NONCE_SIZE]) {
    let mut key = [0u8; KEY_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    key.copy_from_slice(&material[0..KEY_SIZE]);
    nonce.copy_from_slice(&material[KEY_SIZE..]);
    (key, nonce)
}

/// Encrypts `plaintext` so that only the holder of `to`'s decryption key
/// for that epoch can read it.
///
/// Format: [ephemeral public key (32 bytes)][ciphertext]
pub(crate) fn encrypt_to_identity(
    params: &impl PublicParameters,
    protocol_info: &[u8],
    to: &HashedIdentity,
    plaintext: &[u8],
) -> Result<Vec<u8>, Error> {
    let recipient_public = params
        .encryption_public_key(to)
        .ok_or_else(|| Error::Crypto(format!("No public parameters for {to}")))?;

    let ephemeral = StaticSecret::from(random_bytes::<32>());
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient_public);

    let material = envelope_key(protocol_info, shared.as_bytes(), &ephemeral_public, to)?;
    let (mut key, nonce) = split_key(&material);
    let ciphertext = crypto::encrypt(&key, &nonce, plaintext, &to.to_bytes());
    key.zeroize();

    let mut result = Vec::with_capacity(32 + plaintext.len() + 16);
    result.extend_from_slice(ephemeral_public.as_bytes());
    result.extend_from_slice(&ciphertext?);

    Ok(result)
}

/// Inverse of [`encrypt_to_identity`]. `None` if the envelope is malformed
/// or was not addressed to `key`'s identity and epoch.
pub(crate) fn decrypt_with_identity(
    key: &EncryptionUserKey,
    protocol_info: &[u8],
    envelope: &[u8],
) -> Option<Zeroizing<Vec<u8>>> {
    if envelope.len() < 32 {
        return None;
    }

    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&envelope[0..32]);
    let ephemeral_public = PublicKey::from(ephemeral_bytes);
    let shared = key.key.diffie_hellman(&ephemeral_public);

    let material =
        envelope_key(protocol_info, shared.as_bytes(), &ephemeral_public, &key.identity).ok()?;
    let (mut aead_key, nonce) = split_key(&material);
    let plaintext = crypto::decrypt(
        &aead_key,
        &nonce,
        &envelope[32..],
        &key.identity.to_bytes(),
    );
    aead_key.zeroize();

    plaintext.map(Zeroizing::new)
}

/// Checks `signature` over `message` against `from`'s epoch public key.
pub(crate) fn verify_from_identity(
    params: &impl PublicParameters,
    from: &HashedIdentity,
    message: &[u8],
    signature: &[u8],
) -> bool {
    let Some(verifying_key) = params.signature_public_key(from) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };

    verifying_key.verify_strict(message, &signature).is_ok()
}
