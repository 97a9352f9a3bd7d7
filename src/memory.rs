use crate::provider::{DeviceId, EncodedId, IdentityId};
use crate::{
    DeviceName, EncodedMessage, EncryptionUserKey, HashedIdentity, Identity,
    IncomingChannelSecret, IncomingSecretKey, NeedsKey, OutgoingChannelSecret, OutgoingSecretKey,
    ProviderConfig, SequenceTracker, SequenceUpdate, SignatureUserKey, TransportDataProvider,
    temporal_frame,
};
use log::{debug, trace, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

/// Inbound sequence numbers are counted per sending device and per
/// recipient identity, mirroring the sender's per-recipient counter.
type InboundKey = (DeviceId, Identity);

/// State covered by transactions.
#[derive(Default)]
struct MemoryState {
    identities: HashMap<Identity, IdentityId>,
    devices: HashMap<(IdentityId, DeviceName), DeviceId>,
    outgoing_secrets: HashMap<OutgoingSecretKey, OutgoingChannelSecret>,
    incoming_secrets: HashMap<IncomingSecretKey, IncomingChannelSecret>,
    outbound_sequences: HashMap<Identity, u64>,
    sent_sequences: HashMap<(EncodedId, Identity), u64>,
    inbound_sequences: HashMap<InboundKey, SequenceTracker>,
    encoded: BTreeMap<EncodedId, EncodedMessage>,
    hashes: HashMap<[u8; 32], EncodedId>,
    next_id: u64,
}

/// The previous value of one entry written during a transaction.
enum Undo {
    Identity(Identity),
    Device((IdentityId, DeviceName)),
    OutgoingSecret(OutgoingSecretKey, Option<OutgoingChannelSecret>),
    IncomingSecret(IncomingSecretKey, Option<IncomingChannelSecret>),
    OutboundSequence(Identity, Option<u64>),
    SentSequence((EncodedId, Identity), Option<u64>),
    InboundSequence(InboundKey, Option<SequenceTracker>),
    Encoded(EncodedId, Option<EncodedMessage>),
    Hash([u8; 32]),
    NextId(u64),
}

fn restore<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => map.insert(key, value),
        None => map.remove(&key),
    };
}

impl MemoryState {
    fn undo(&mut self, entry: Undo) {
        match entry {
            Undo::Identity(identity) => {
                self.identities.remove(&identity);
            }
            Undo::Device(key) => {
                self.devices.remove(&key);
            }
            Undo::OutgoingSecret(key, previous) => {
                restore(&mut self.outgoing_secrets, key, previous)
            }
            Undo::IncomingSecret(key, previous) => {
                restore(&mut self.incoming_secrets, key, previous)
            }
            Undo::OutboundSequence(key, previous) => {
                restore(&mut self.outbound_sequences, key, previous)
            }
            Undo::SentSequence(key, previous) => restore(&mut self.sent_sequences, key, previous),
            Undo::InboundSequence(key, previous) => {
                restore(&mut self.inbound_sequences, key, previous)
            }
            Undo::Encoded(id, previous) => match previous {
                Some(message) => {
                    self.encoded.insert(id, message);
                }
                None => {
                    self.encoded.remove(&id);
                }
            },
            Undo::Hash(hash) => {
                self.hashes.remove(&hash);
            }
            Undo::NextId(id) => self.next_id = id,
        }
    }
}

/// Transport data kept entirely in memory.
///
/// Key material, owned identities, blacklist and pinned epochs are
/// configuration and live outside transactions. Writes to caches, sequence
/// state and message metadata are journaled from `begin_transaction` on and
/// undone in reverse order by `rollback_transaction`.
pub struct InMemoryTransportData {
    device_name: DeviceName,
    config: ProviderConfig,
    owned: HashSet<Identity>,
    blacklist: HashSet<Identity>,
    signature_keys: HashMap<HashedIdentity, SignatureUserKey>,
    encryption_keys: HashMap<HashedIdentity, EncryptionUserKey>,
    signature_times: HashMap<Identity, u64>,
    encryption_times: HashMap<Identity, u64>,
    state: MemoryState,
    journal: Option<Vec<Undo>>,
}

impl InMemoryTransportData {
    /// Creates a provider for a new device.
    ///
    /// If no configuration is provided, default values are used.
    pub fn new(device_name: DeviceName, config: Option<ProviderConfig>) -> Self {
        Self {
            device_name,
            config: config.unwrap_or_default(),
            owned: HashSet::new(),
            blacklist: HashSet::new(),
            signature_keys: HashMap::new(),
            encryption_keys: HashMap::new(),
            signature_times: HashMap::new(),
            encryption_times: HashMap::new(),
            state: MemoryState::default(),
            journal: None,
        }
    }

    /// Marks `identity` as owned by this device's user.
    pub fn add_owned_identity(&mut self, identity: Identity) {
        self.owned.insert(identity);
    }

    pub fn add_signature_key(&mut self, key: SignatureUserKey) {
        self.signature_keys.insert(*key.identity(), key);
    }

    pub fn add_encryption_key(&mut self, key: EncryptionUserKey) {
        self.encryption_keys.insert(*key.identity(), key);
    }

    /// Pins the signing epoch of `identity` instead of deriving it from the clock.
    pub fn set_signature_time(&mut self, identity: Identity, epoch: u64) {
        self.signature_times.insert(identity, epoch);
    }

    /// Pins the encryption epoch of `identity` instead of deriving it from the clock.
    pub fn set_encryption_time(&mut self, identity: Identity, epoch: u64) {
        self.encryption_times.insert(identity, epoch);
    }

    pub fn add_blacklist(&mut self, identity: Identity) {
        self.blacklist.insert(identity);
    }

    pub fn remove_blacklist(&mut self, identity: &Identity) {
        self.blacklist.remove(identity);
    }

    pub fn encoded_message(&self, id: EncodedId) -> Option<&EncodedMessage> {
        self.state.encoded.get(&id)
    }

    pub fn encoded_count(&self) -> usize {
        self.state.encoded.len()
    }

    /// Sequence number a sent message used towards `to`.
    pub fn sent_sequence(&self, encoded: EncodedId, to: &Identity) -> Option<u64> {
        self.state.sent_sequences.get(&(encoded, *to)).copied()
    }

    /// Sequence numbers `device` skipped towards our identity `to` and that
    /// have not arrived yet.
    pub fn missing_sequences(&self, device: DeviceId, to: &Identity) -> Vec<u64> {
        self.state
            .inbound_sequences
            .get(&(device, *to))
            .map(|tracker| tracker.missing().collect())
            .unwrap_or_default()
    }

    pub fn outgoing_secret_count(&self) -> usize {
        self.state.outgoing_secrets.len()
    }

    pub fn incoming_secret_count(&self) -> usize {
        self.state.incoming_secrets.len()
    }

    fn current_frame(&self, pinned: &HashMap<Identity, u64>, identity: &Identity) -> u64 {
        if let Some(epoch) = pinned.get(identity) {
            return *epoch;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        temporal_frame(identity, now, self.config.temporal_frame_period)
    }

    fn record(&mut self, entry: Undo) {
        if let Some(journal) = &mut self.journal {
            journal.push(entry);
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.record(Undo::NextId(self.state.next_id));
        self.state.next_id += 1;
        self.state.next_id
    }

    fn store_encoded(&mut self, id: EncodedId, message: &EncodedMessage) {
        let previous = self.state.encoded.insert(id, message.clone());
        self.record(Undo::Encoded(id, previous));

        if let Some(hash) = message.hash {
            if !self.state.hashes.contains_key(&hash) {
                self.state.hashes.insert(hash, id);
                self.record(Undo::Hash(hash));
            }
        }
    }
}

impl TransportDataProvider for InMemoryTransportData {
    fn device_name(&self) -> DeviceName {
        self.device_name
    }

    fn ensure_identity(&mut self, identity: &Identity) -> IdentityId {
        if let Some(id) = self.state.identities.get(identity) {
            return *id;
        }

        let id = self.allocate_id();
        self.state.identities.insert(*identity, id);
        self.record(Undo::Identity(*identity));
        id
    }

    fn ensure_device(&mut self, identity: IdentityId, name: &DeviceName) -> DeviceId {
        if let Some(id) = self.state.devices.get(&(identity, *name)) {
            return *id;
        }

        let id = self.allocate_id();
        self.state.devices.insert((identity, *name), id);
        self.record(Undo::Device((identity, *name)));
        id
    }

    fn signature_key(&self, identity: &HashedIdentity) -> Result<SignatureUserKey, NeedsKey> {
        self.signature_keys
            .get(identity)
            .cloned()
            .ok_or(NeedsKey::Signature(*identity))
    }

    fn encryption_key(&self, identity: &HashedIdentity) -> Result<EncryptionUserKey, NeedsKey> {
        self.encryption_keys
            .get(identity)
            .cloned()
            .ok_or(NeedsKey::Encryption(*identity))
    }

    fn signature_time(&self, identity: &Identity) -> u64 {
        self.current_frame(&self.signature_times, identity)
    }

    fn encryption_time(&self, identity: &Identity) -> u64 {
        self.current_frame(&self.encryption_times, identity)
    }

    fn lookup_outgoing_secret(&self, key: &OutgoingSecretKey) -> Option<OutgoingChannelSecret> {
        self.state.outgoing_secrets.get(key).cloned()
    }

    fn insert_outgoing_secret(&mut self, key: OutgoingSecretKey, secret: OutgoingChannelSecret) {
        let previous = self.state.outgoing_secrets.insert(key, secret);
        self.record(Undo::OutgoingSecret(key, previous));
    }

    fn lookup_incoming_secret(&self, key: &IncomingSecretKey) -> Option<IncomingChannelSecret> {
        self.state.incoming_secrets.get(key).cloned()
    }

    fn insert_incoming_secret(&mut self, key: IncomingSecretKey, secret: IncomingChannelSecret) {
        // Identical inputs derive identical secrets, so the last write wins.
        let previous = self.state.incoming_secrets.insert(key.clone(), secret);
        self.record(Undo::IncomingSecret(key, previous));
    }

    fn next_sequence_number(&mut self, to: &Identity) -> u64 {
        let previous = self.state.outbound_sequences.get(to).copied();
        let next = previous.unwrap_or(0) + 1;
        self.state.outbound_sequences.insert(*to, next);
        self.record(Undo::OutboundSequence(*to, previous));
        next
    }

    fn store_sequence_number(&mut self, encoded: EncodedId, to: &Identity, sequence: u64) {
        let previous = self.state.sent_sequences.insert((encoded, *to), sequence);
        self.record(Undo::SentSequence((encoded, *to), previous));
    }

    fn receive_sequence_number(&mut self, device: DeviceId, to: &Identity, sequence: u64) {
        let key = (device, *to);
        let previous = self.state.inbound_sequences.get(&key).cloned();
        let mut tracker = previous
            .clone()
            .unwrap_or_else(|| SequenceTracker::new(self.config.max_missing_sequences));

        match tracker.record(sequence) {
            SequenceUpdate::Gap(skipped) => {
                debug!("Device {device} skipped {skipped} sequence numbers to {to} before {sequence}")
            }
            SequenceUpdate::Replay => {
                warn!("Device {device} reused sequence number {sequence} to {to}")
            }
            SequenceUpdate::Recovered => trace!("Device {device} filled gap {sequence} to {to}"),
            SequenceUpdate::InOrder => {}
        }

        self.state.inbound_sequences.insert(key, tracker);
        self.record(Undo::InboundSequence(key, previous));
    }

    fn have_hash(&self, hash: &[u8; 32]) -> bool {
        self.state.hashes.contains_key(hash)
    }

    fn insert_encoded_metadata(&mut self, message: &mut EncodedMessage) {
        let id = self.allocate_id();
        message.id = Some(id);
        self.store_encoded(id, message);
    }

    fn update_encoded_metadata(&mut self, message: &EncodedMessage) {
        let Some(id) = message.id else {
            warn!("Ignoring metadata update for a message that was never inserted");
            return;
        };

        self.store_encoded(id, message);
    }

    fn is_blacklisted(&self, identity: &Identity) -> bool {
        self.blacklist.contains(identity)
    }

    fn is_me(&self, identity: &Identity) -> bool {
        self.owned.contains(identity)
    }

    fn begin_transaction(&mut self) {
        self.journal = Some(Vec::new());
    }

    fn commit_transaction(&mut self) {
        self.journal = None;
    }

    fn rollback_transaction(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };

        trace!("Rolling back {} writes", journal.len());
        for entry in journal.into_iter().rev() {
            self.state.undo(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Authority, LocalAuthority};

    fn carol() -> Identity {
        Identity::from_principal(Authority::Email, "carol@example.com")
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut provider = InMemoryTransportData::new(DeviceName::random(), None);
        let id = provider.ensure_identity(&carol());
        assert_eq!(provider.ensure_identity(&carol()), id);

        let device = DeviceName::random();
        let device_id = provider.ensure_device(id, &device);
        assert_eq!(provider.ensure_device(id, &device), device_id);
        assert_ne!(provider.ensure_device(id, &DeviceName::random()), device_id);
    }

    #[test]
    fn test_missing_keys_name_the_epoch() {
        let authority = LocalAuthority::new();
        let mut provider = InMemoryTransportData::new(DeviceName::random(), None);
        provider.add_signature_key(authority.extract_signature_key(&carol().at(1)).unwrap());

        assert!(provider.signature_key(&carol().at(1)).is_ok());
        assert_eq!(
            provider.signature_key(&carol().at(2)).err(),
            Some(NeedsKey::Signature(carol().at(2)))
        );
        assert_eq!(
            provider.encryption_key(&carol().at(1)).err(),
            Some(NeedsKey::Encryption(carol().at(1)))
        );
    }

    #[test]
    fn test_pinned_epochs() {
        let mut provider = InMemoryTransportData::new(DeviceName::random(), None);
        provider.set_signature_time(carol(), 11);
        provider.set_encryption_time(carol(), 12);

        assert_eq!(provider.signature_time(&carol()), 11);
        assert_eq!(provider.encryption_time(&carol()), 12);
    }

    #[test]
    fn test_rollback_restores_state() {
        let mut provider = InMemoryTransportData::new(DeviceName::random(), None);
        assert_eq!(provider.next_sequence_number(&carol()), 1);

        provider.begin_transaction();
        assert_eq!(provider.next_sequence_number(&carol()), 2);
        let mut message = EncodedMessage::inbound(b"wire".to_vec());
        message.hash = Some([1u8; 32]);
        provider.insert_encoded_metadata(&mut message);
        assert!(provider.have_hash(&[1u8; 32]));
        provider.rollback_transaction();

        assert!(!provider.have_hash(&[1u8; 32]));
        assert_eq!(provider.next_sequence_number(&carol()), 2);

        provider.begin_transaction();
        provider.insert_encoded_metadata(&mut message);
        provider.commit_transaction();
        assert!(provider.have_hash(&[1u8; 32]));
    }

    #[test]
    fn test_hash_index_survives_processed_reset() {
        let mut provider = InMemoryTransportData::new(DeviceName::random(), None);
        let mut message = EncodedMessage::inbound(b"wire".to_vec());
        provider.insert_encoded_metadata(&mut message);
        assert!(!provider.have_hash(&[2u8; 32]));

        message.hash = Some([2u8; 32]);
        message.processed = true;
        provider.update_encoded_metadata(&message);

        message.processed = false;
        provider.update_encoded_metadata(&message);
        assert!(provider.have_hash(&[2u8; 32]));
    }

    #[test]
    fn test_rollback_restores_overwritten_rows() {
        let mut provider = InMemoryTransportData::new(DeviceName::random(), None);
        let mut message = EncodedMessage::inbound(b"wire".to_vec());
        provider.insert_encoded_metadata(&mut message);
        let id = message.id.unwrap();
        let identity = provider.ensure_identity(&carol());

        provider.begin_transaction();
        let mut processed = message.clone();
        processed.processed = true;
        processed.hash = Some([3u8; 32]);
        provider.update_encoded_metadata(&processed);
        provider.ensure_identity(&Identity::from_principal(Authority::Local, "dave"));
        provider.receive_sequence_number(identity, &carol(), 5);
        provider.rollback_transaction();

        assert_eq!(provider.encoded_message(id), Some(&message));
        assert_eq!(provider.encoded_count(), 1);
        assert!(!provider.have_hash(&[3u8; 32]));
        assert!(provider.missing_sequences(identity, &carol()).is_empty());

        // Ids handed out inside the rolled back transaction are reused.
        let mut next = EncodedMessage::inbound(b"next".to_vec());
        provider.insert_encoded_metadata(&mut next);
        assert_eq!(next.id, Some(identity + 1));
    }

    #[test]
    fn test_inbound_gaps_are_tracked_per_recipient() {
        let bob = Identity::from_principal(Authority::Email, "bob@example.com");
        let mut provider = InMemoryTransportData::new(DeviceName::random(), None);

        provider.receive_sequence_number(9, &bob, 1);
        provider.receive_sequence_number(9, &carol(), 1);
        provider.receive_sequence_number(9, &bob, 4);
        provider.receive_sequence_number(9, &carol(), 2);

        assert_eq!(provider.missing_sequences(9, &bob), vec![2, 3]);
        assert!(provider.missing_sequences(9, &carol()).is_empty());
        assert!(provider.missing_sequences(10, &bob).is_empty());
    }
}
