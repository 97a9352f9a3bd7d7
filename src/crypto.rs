use crate::{Error, Identity};
use aes_gcm_siv::aead::{Aead, Payload};
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// AES-GCM-SIV uses 12-byte (96-bit) nonces.
pub const NONCE_SIZE: usize = 12;

/// Size of every symmetric key in the protocol.
pub const KEY_SIZE: usize = 32;

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Identifies one message across every device that sees it.
///
/// Covers the sender's identity without its epoch, the app tag and the
/// plaintext body. Two senders posting the same bytes produce different
/// hashes; the same sender posting the same bytes under the same app tag is
/// one message.
pub fn universal_hash(from: &Identity, app: &[u8], data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([from.authority() as u8]);
    hasher.update(from.hash());
    hasher.update((app.len() as u32).to_be_bytes());
    hasher.update(app);
    hasher.update(data);
    hasher.finalize().into()
}

/// First eight bytes of the SHA-256 of `data`, for cheap pre-filtering.
pub fn short_hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(head)
}

/// HKDF-SHA256 expansion of `ikm` into `out`.
pub(crate) fn derive(salt: &[u8], ikm: &[u8], info: &[&[u8]], out: &mut [u8]) -> Result<(), Error> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    hkdf.expand_multi_info(info, out)?;
    Ok(())
}

/// Encrypts with an explicit nonce.
pub(crate) fn encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    ad: &[u8],
) -> Result<Vec<u8>, Error> {
    let key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key);
    let cipher = Aes256GcmSiv::new(key);

    let ciphertext = cipher.encrypt(
        Nonce::from_slice(nonce),
        Payload {
            msg: plaintext,
            aad: ad,
        },
    )?;

    Ok(ciphertext)
}

/// Decrypts with an explicit nonce. `None` if authentication fails.
pub(crate) fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    ad: &[u8],
) -> Option<Vec<u8>> {
    let key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key);
    let cipher = Aes256GcmSiv::new(key);

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: ad,
            },
        )
        .ok()
}

/// Encrypts under a fresh random nonce.
///
/// Format: [nonce (12 bytes)][ciphertext]
pub(crate) fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, Error> {
    let mut nonce = random_bytes::<NONCE_SIZE>();
    let mut ciphertext = encrypt(key, &nonce, plaintext, ad)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    nonce.zeroize();

    Ok(result)
}

/// Inverse of [`seal`].
pub(crate) fn open(key: &[u8; KEY_SIZE], sealed: &[u8], ad: &[u8]) -> Option<Vec<u8>> {
    if sealed.len() < NONCE_SIZE {
        return None;
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&sealed[0..NONCE_SIZE]);
    decrypt(key, &nonce, &sealed[NONCE_SIZE..], ad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Authority;

    #[test]
    fn test_seal_and_open() {
        let key = random_bytes::<KEY_SIZE>();
        let sealed = seal(&key, b"secret record", b"ad").unwrap();

        assert_eq!(open(&key, &sealed, b"ad").unwrap(), b"secret record");
        assert!(open(&key, &sealed, b"other ad").is_none());
        assert!(open(&key, &sealed[..5], b"ad").is_none());
    }

    #[test]
    fn test_seal_uses_fresh_nonces() {
        let key = random_bytes::<KEY_SIZE>();
        let a = seal(&key, b"same", b"").unwrap();
        let b = seal(&key, b"same", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let key = random_bytes::<KEY_SIZE>();
        let nonce = random_bytes::<NONCE_SIZE>();
        let mut ciphertext = encrypt(&key, &nonce, b"body", b"").unwrap();
        ciphertext[0] ^= 0x01;

        assert!(decrypt(&key, &nonce, &ciphertext, b"").is_none());
    }

    #[test]
    fn test_short_hash_is_prefix_of_sha256() {
        let hash: [u8; 32] = Sha256::digest(b"payload").into();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash[0..8]);
        assert_eq!(short_hash(b"payload"), u64::from_be_bytes(head));
    }

    #[test]
    fn test_universal_hash_binds_sender_and_app() {
        let alice = Identity::from_principal(Authority::Email, "alice@example.com");
        let carol = Identity::from_principal(Authority::Email, "carol@example.com");

        let hash = universal_hash(&alice, b"chat", b"ok");
        assert_eq!(hash, universal_hash(&alice, b"chat", b"ok"));
        assert_ne!(hash, universal_hash(&carol, b"chat", b"ok"));
        assert_ne!(hash, universal_hash(&alice, b"note", b"ok"));
        assert_ne!(
            universal_hash(&alice, b"ab", b"c"),
            universal_hash(&alice, b"a", b"bc"),
            "App tag is length-prefixed"
        );
    }
}
