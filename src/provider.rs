use crate::crypto::short_hash;
use crate::{
    DeviceName, EncryptionUserKey, HashedIdentity, Identity, IncomingChannelSecret,
    IncomingSecretKey, NeedsKey, OutgoingChannelSecret, OutgoingSecretKey, SignatureUserKey,
};

/// Row id of an identity record.
pub type IdentityId = u64;
/// Row id of a device record.
pub type DeviceId = u64;
/// Row id of an encoded message record.
pub type EncodedId = u64;

/// Wire bytes plus the metadata tracked for them in either direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedMessage {
    /// Set once the record has been inserted.
    pub id: Option<EncodedId>,
    pub encoded: Vec<u8>,
    /// Filled in by the decoder for inbound messages.
    pub from_identity: Option<IdentityId>,
    pub from_device: Option<DeviceId>,
    /// Universal hash of the message, see [`crate::universal_hash`].
    pub hash: Option<[u8; 32]>,
    pub short_hash: u64,
    pub outbound: bool,
    pub processed: bool,
    /// Milliseconds since the Unix epoch.
    pub processed_time: Option<u64>,
}

impl EncodedMessage {
    /// A freshly received, not yet decoded message.
    pub fn inbound(encoded: Vec<u8>) -> Self {
        let short_hash = short_hash(&encoded);
        Self {
            id: None,
            encoded,
            from_identity: None,
            from_device: None,
            hash: None,
            short_hash,
            outbound: false,
            processed: false,
            processed_time: None,
        }
    }
}

/// Everything the codec needs from persistent state.
///
/// The codec calls [`begin_transaction`](Self::begin_transaction) before
/// touching any other method and ends every call with either
/// [`commit_transaction`](Self::commit_transaction) or
/// [`rollback_transaction`](Self::rollback_transaction), so secret cache
/// writes and message metadata writes land together or not at all.
pub trait TransportDataProvider {
    /// Name of the device this provider runs on.
    fn device_name(&self) -> DeviceName;

    /// Returns the record for `identity`, creating it if needed.
    fn ensure_identity(&mut self, identity: &Identity) -> IdentityId;

    /// Returns the record for a device of `identity`, creating it if needed.
    fn ensure_device(&mut self, identity: IdentityId, name: &DeviceName) -> DeviceId;

    fn signature_key(&self, identity: &HashedIdentity) -> Result<SignatureUserKey, NeedsKey>;

    fn encryption_key(&self, identity: &HashedIdentity) -> Result<EncryptionUserKey, NeedsKey>;

    /// Current signing epoch of `identity`.
    fn signature_time(&self, identity: &Identity) -> u64;

    /// Current encryption epoch of `identity`.
    fn encryption_time(&self, identity: &Identity) -> u64;

    fn lookup_outgoing_secret(&self, key: &OutgoingSecretKey) -> Option<OutgoingChannelSecret>;

    fn insert_outgoing_secret(&mut self, key: OutgoingSecretKey, secret: OutgoingChannelSecret);

    fn lookup_incoming_secret(&self, key: &IncomingSecretKey) -> Option<IncomingChannelSecret>;

    fn insert_incoming_secret(&mut self, key: IncomingSecretKey, secret: IncomingChannelSecret);

    /// Advances and returns the outbound sequence number towards `to`.
    fn next_sequence_number(&mut self, to: &Identity) -> u64;

    /// Remembers which sequence number `encoded` used for `to`.
    fn store_sequence_number(&mut self, encoded: EncodedId, to: &Identity, sequence: u64);

    /// Records a sequence number `device` used towards our identity `to`,
    /// opening gaps for anything skipped.
    fn receive_sequence_number(&mut self, device: DeviceId, to: &Identity, sequence: u64);

    /// Whether any message with this universal hash is known.
    fn have_hash(&self, hash: &[u8; 32]) -> bool;

    /// Stores a new record and assigns its id.
    fn insert_encoded_metadata(&mut self, message: &mut EncodedMessage);

    /// Overwrites the record with `message.id`.
    fn update_encoded_metadata(&mut self, message: &EncodedMessage);

    fn is_blacklisted(&self, identity: &Identity) -> bool;

    /// Whether `identity` is owned by this device's user.
    fn is_me(&self, identity: &Identity) -> bool;

    fn begin_transaction(&mut self);

    fn commit_transaction(&mut self);

    fn rollback_transaction(&mut self);
}
