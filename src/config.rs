use std::time::Duration;

/// Settings shared by the encoder and decoder.
///
/// Both ends of a conversation must agree on `protocol_info`.
#[derive(Clone, Debug)]
pub struct CodecConfig {
    /// Domain separation for every key derivation.
    pub protocol_info: Vec<u8>,
    /// Messages with more recipient records are rejected as corrupted.
    pub max_recipients: usize,
    /// Encoded messages above this size are rejected as corrupted.
    pub max_encoded_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            protocol_info: b"Musubi-Transport-v1".to_vec(),
            max_recipients: 1024,
            max_encoded_size: 16 * 1024 * 1024,
        }
    }
}

/// Settings for [`crate::InMemoryTransportData`].
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Length of an epoch when none has been pinned for an identity.
    pub temporal_frame_period: Duration,
    /// Upper bound on missing sequence numbers remembered per device.
    pub max_missing_sequences: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            temporal_frame_period: Duration::from_secs(7 * 24 * 60 * 60), // 1 week
            max_missing_sequences: 1024,
        }
    }
}
