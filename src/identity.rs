use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Length of the canonical [`HashedIdentity`] encoding.
pub const HASHED_IDENTITY_SIZE: usize = 1 + 32 + 8;

/// Length of a [`DeviceName`].
pub const DEVICE_NAME_SIZE: usize = 8;

const TEMPORAL_OFFSET_KEY: &[u8] = b"Musubi-Temporal-Offset";

/// The authority vouching for a principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Authority {
    /// Identities local to a single deployment.
    Local = 0,
    /// Email addresses.
    Email = 1,
    /// Phone numbers.
    Phone = 2,
    /// OpenID subjects.
    OpenId = 3,
}

impl TryFrom<u8> for Authority {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Local),
            1 => Ok(Self::Email),
            2 => Ok(Self::Phone),
            3 => Ok(Self::OpenId),
            other => Err(other),
        }
    }
}

/// A principal, identified by its authority and a one-way hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    authority: Authority,
    hash: [u8; 32],
}

impl Identity {
    /// Hashes a principal. Principals are compared case-insensitively and
    /// without surrounding whitespace.
    pub fn from_principal(authority: Authority, principal: &str) -> Self {
        let normalized = principal.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update([authority as u8]);
        hasher.update(normalized.as_bytes());

        Self {
            authority,
            hash: hasher.finalize().into(),
        }
    }

    /// Builds an identity from an already hashed principal.
    pub fn from_hash(authority: Authority, hash: [u8; 32]) -> Self {
        Self { authority, hash }
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Scopes this identity to an epoch.
    pub fn at(self, temporal_frame: u64) -> HashedIdentity {
        HashedIdentity {
            identity: self,
            temporal_frame,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        write!(f, "{:?}:{}", self.authority, engine.encode(self.hash))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

/// An identity scoped to the epoch ("temporal frame") whose keys are in use.
///
/// A principal resolves to a new `HashedIdentity` every time its epoch
/// advances. Key material is always looked up by the full value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashedIdentity {
    identity: Identity,
    temporal_frame: u64,
}

impl HashedIdentity {
    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn authority(&self) -> Authority {
        self.identity.authority
    }

    pub fn temporal_frame(&self) -> u64 {
        self.temporal_frame
    }

    /// Serializes to the 41-byte canonical form.
    ///
    /// The format is:
    /// - 1 byte: authority
    /// - 32 bytes: principal hash
    /// - 8 bytes: temporal frame (big-endian u64)
    pub fn to_bytes(&self) -> [u8; HASHED_IDENTITY_SIZE] {
        let mut bytes = [0u8; HASHED_IDENTITY_SIZE];
        bytes[0] = self.identity.authority as u8;
        bytes[1..33].copy_from_slice(&self.identity.hash);
        bytes[33..41].copy_from_slice(&self.temporal_frame.to_be_bytes());

        bytes
    }

    /// Parses the canonical form. Returns `None` for a wrong length or an
    /// unknown authority.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HASHED_IDENTITY_SIZE {
            return None;
        }

        let authority = Authority::try_from(bytes[0]).ok()?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[1..33]);
        let mut frame = [0u8; 8];
        frame.copy_from_slice(&bytes[33..41]);

        Some(Identity::from_hash(authority, hash).at(u64::from_be_bytes(frame)))
    }
}

impl fmt::Display for HashedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.temporal_frame)
    }
}

impl fmt::Debug for HashedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashedIdentity({self})")
    }
}

/// Computes the epoch an identity is in at `now`.
///
/// Each principal is offset by a stable fraction of the period so that
/// rotations are spread out instead of happening for everyone at once.
pub fn temporal_frame(identity: &Identity, now: Duration, period: Duration) -> u64 {
    let period = period.as_secs().max(1);

    let offset = match <Hmac<Sha256> as Mac>::new_from_slice(TEMPORAL_OFFSET_KEY) {
        Ok(mut mac) => {
            mac.update(&[identity.authority as u8]);
            mac.update(&identity.hash);
            let tag = mac.finalize().into_bytes();
            let mut head = [0u8; 8];
            head.copy_from_slice(&tag[0..8]);
            u64::from_be_bytes(head) % period
        }
        Err(_) => 0,
    };

    now.as_secs().saturating_add(offset) / period
}

/// Random name distinguishing the devices of one identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceName([u8; DEVICE_NAME_SIZE]);

impl DeviceName {
    pub fn random() -> Self {
        let mut bytes = [0u8; DEVICE_NAME_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DEVICE_NAME_SIZE] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; DEVICE_NAME_SIZE] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl From<[u8; DEVICE_NAME_SIZE]> for DeviceName {
    fn from(bytes: [u8; DEVICE_NAME_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        write!(f, "DeviceName({})", engine.encode(self.0))
    }
}
