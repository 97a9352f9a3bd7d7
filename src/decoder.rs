use crate::codec::now_millis;
use crate::crypto::{self, KEY_SIZE, universal_hash};
use crate::identity::HASHED_IDENTITY_SIZE;
use crate::secret::{open_signature, signed_bytes};
use crate::{
    DiscardMessage, EncodedMessage, Error, HashedIdentity, IncomingChannelSecret,
    IncomingMessage, IncomingSecretKey, Message, MessageCodec, PublicParameters, Recipient,
    Secret, TransportDataProvider, ibe,
};
use log::{debug, trace};
use zeroize::Zeroizing;

impl<A: PublicParameters, P: TransportDataProvider> MessageCodec<A, P> {
    /// Decodes a received message addressed to one of our identities.
    ///
    /// The checks run in this order, each ending the attempt on failure:
    /// 1. Parse the envelope ([`DiscardMessage::Corrupted`])
    /// 2. Find the record addressed to us ([`DiscardMessage::NotToMe`])
    /// 3. Reject blacklisted senders ([`DiscardMessage::Blacklist`]) before
    ///    any public-key work; for blind messages the sender is only known
    ///    once the channel secret is recovered
    /// 4. Recover the channel secret from cache, or decrypt and verify it
    ///    ([`crate::NeedsKey::Encryption`] if our key for that epoch is missing)
    /// 5. Decrypt and check the body ([`DiscardMessage::BadSignature`])
    /// 6. Reject a message already seen from this sender
    ///    ([`DiscardMessage::Duplicate`])
    ///
    /// On success `encoded` is updated with the sender, universal hash and
    /// processed flag, and persisted. On failure nothing is written, so a
    /// `NeedsKey` result can be retried with the same input.
    pub fn decode(&mut self, encoded: &mut EncodedMessage) -> Result<IncomingMessage, Error> {
        self.in_transaction(|codec| codec.decode_message(encoded))
            .inspect_err(|err| debug!("Message not delivered: {err}"))
    }

    fn decode_message(&mut self, encoded: &mut EncodedMessage) -> Result<IncomingMessage, Error> {
        if encoded.encoded.len() > self.config.max_encoded_size {
            return Err(DiscardMessage::Corrupted(format!(
                "Message of {} bytes exceeds limit",
                encoded.encoded.len()
            ))
            .into());
        }

        let message = Message::from_bytes(&encoded.encoded)?;
        if message.recipients.len() > self.config.max_recipients {
            return Err(DiscardMessage::Corrupted(format!(
                "{} recipients exceeds limit",
                message.recipients.len()
            ))
            .into());
        }

        let record = message
            .recipients
            .iter()
            .find(|recipient| self.provider.is_me(&recipient.identity.identity()))
            .ok_or(DiscardMessage::NotToMe)?;

        if let Some(sender) = &message.sender {
            if self.provider.is_blacklisted(&sender.identity()) {
                return Err(DiscardMessage::Blacklist.into());
            }
        }

        let channel = self.incoming_channel(&message, record)?;
        let from = channel.from;
        if message.is_blind() && self.provider.is_blacklisted(&from.identity()) {
            return Err(DiscardMessage::Blacklist.into());
        }

        let secret_bytes = crypto::open(channel.key(), &record.data, &record.identity.to_bytes())
            .map(Zeroizing::new)
            .ok_or_else(|| DiscardMessage::BadSignature("Secret failed authentication".to_string()))?;
        let secret = Secret::from_bytes(&secret_bytes)?;
        if secret.iv != message.iv {
            return Err(DiscardMessage::BadSignature("Body IV mismatch".to_string()).into());
        }

        let data = crypto::decrypt(&secret.key, &secret.iv, &message.body, &message.app)
            .ok_or_else(|| DiscardMessage::BadSignature("Body failed authentication".to_string()))?;
        if universal_hash(&from.identity(), &message.app, &data) != secret.hash {
            return Err(DiscardMessage::BadSignature("Body hash mismatch".to_string()).into());
        }
        if message.hash.is_some_and(|hash| hash != secret.hash) {
            return Err(DiscardMessage::BadSignature("Header hash mismatch".to_string()).into());
        }

        if self.provider.have_hash(&secret.hash) {
            return Err(DiscardMessage::Duplicate.into());
        }

        let from_identity = self.provider.ensure_identity(&from.identity());
        let from_device = self.provider.ensure_device(from_identity, &message.device);
        self.provider.receive_sequence_number(
            from_device,
            &record.identity.identity(),
            secret.sequence,
        );

        let mut updated = encoded.clone();
        updated.from_identity = Some(from_identity);
        updated.from_device = Some(from_device);
        updated.hash = Some(secret.hash);
        updated.outbound = false;
        updated.processed = true;
        updated.processed_time = Some(now_millis());
        if updated.id.is_some() {
            self.provider.update_encoded_metadata(&updated);
        } else {
            self.provider.insert_encoded_metadata(&mut updated);
        }
        *encoded = updated;

        debug!(
            "Decoded {} bytes from {from} (sequence {})",
            data.len(),
            secret.sequence
        );

        Ok(IncomingMessage {
            from,
            from_identity,
            from_device,
            device: message.device,
            recipients: message
                .recipients
                .iter()
                .map(|recipient| recipient.identity)
                .collect(),
            app: message.app.clone(),
            data,
            hash: secret.hash,
            sequence: secret.sequence,
            blind: message.is_blind(),
        })
    }

    /// Recovers the channel secret of `record`, from cache when this exact
    /// signature was verified before.
    fn incoming_channel(
        &mut self,
        message: &Message,
        record: &Recipient,
    ) -> Result<IncomingChannelSecret, Error> {
        let cache_key = IncomingSecretKey {
            device: message.device,
            to: record.identity,
            signature: record.signature.clone(),
        };

        if let Some(secret) = self.provider.lookup_incoming_secret(&cache_key) {
            let same_sender = message.sender.is_none_or(|sender| sender == secret.from);
            if secret.encrypted_key == record.encrypted_key && same_sender {
                trace!("Incoming channel secret cache hit for {}", secret.from);
                return Ok(secret);
            }
        }

        let user_key = self.provider.encryption_key(&record.identity)?;
        let envelope = ibe::decrypt_with_identity(
            &user_key,
            &self.config.protocol_info,
            &record.encrypted_key,
        )
        .ok_or_else(|| DiscardMessage::BadSignature("Channel key failed authentication".to_string()))?;

        if envelope.len() != KEY_SIZE + HASHED_IDENTITY_SIZE {
            return Err(DiscardMessage::Corrupted("Invalid channel key envelope".to_string()).into());
        }
        let mut key = Box::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&envelope[0..KEY_SIZE]);
        let from = HashedIdentity::from_bytes(&envelope[KEY_SIZE..])
            .ok_or_else(|| DiscardMessage::Corrupted("Invalid sender in envelope".to_string()))?;

        if message.sender.is_some_and(|sender| sender != from) {
            return Err(DiscardMessage::BadSignature("Sender does not match channel key".to_string()).into());
        }

        let signature = if message.is_blind() {
            open_signature(&self.config.protocol_info, &key, &record.signature)
                .ok_or_else(|| DiscardMessage::BadSignature("Sealed signature failed authentication".to_string()))?
        } else {
            record.signature.clone()
        };

        let signed = signed_bytes(&record.encrypted_key, &message.device);
        if !ibe::verify_from_identity(&self.authority, &from, &signed, &signature) {
            return Err(DiscardMessage::BadSignature("Channel key signature is invalid".to_string()).into());
        }

        debug!("Derived incoming channel secret for {from} -> {}", record.identity);

        let secret = IncomingChannelSecret {
            key,
            encrypted_key: record.encrypted_key.clone(),
            from,
            signature_epoch: from.temporal_frame(),
            encryption_epoch: record.identity.temporal_frame(),
        };
        self.provider
            .insert_incoming_secret(cache_key, secret.clone());

        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use crate::proto::MessageProto;
    use crate::{
        Authority, DeviceName, DiscardMessage, EncodedMessage, Identity, InMemoryTransportData,
        LocalAuthority, MESSAGE_VERSION, MessageCodec, OutgoingMessage,
    };
    use prost::Message as _;

    type Codec = MessageCodec<LocalAuthority, InMemoryTransportData>;

    fn alice() -> Identity {
        Identity::from_principal(Authority::Email, "alice@example.com")
    }

    fn bob() -> Identity {
        Identity::from_principal(Authority::Email, "bob@example.com")
    }

    fn device(authority: &LocalAuthority, owner: Identity) -> Codec {
        let mut provider = InMemoryTransportData::new(DeviceName::random(), None);
        for identity in [alice(), bob()] {
            provider.set_signature_time(identity, 1);
            provider.set_encryption_time(identity, 1);
        }
        provider.add_owned_identity(owner);
        provider.add_signature_key(authority.extract_signature_key(&owner.at(1)).unwrap());
        provider.add_encryption_key(authority.extract_encryption_key(&owner.at(1)).unwrap());

        MessageCodec::new(authority.clone(), provider, None)
    }

    /// Re-encodes a valid packet after `edit` changes its protobuf body,
    /// leaving the version and flags bytes untouched.
    fn edited(bytes: &[u8], edit: impl FnOnce(&mut MessageProto)) -> Vec<u8> {
        let mut proto = MessageProto::decode(&bytes[2..]).unwrap();
        edit(&mut proto);

        let mut result = bytes[0..2].to_vec();
        result.extend_from_slice(&proto.encode_to_vec());
        result
    }

    #[test]
    fn test_structural_damage_is_corrupted() {
        let authority = LocalAuthority::new();
        let mut alice_device = device(&authority, alice());
        let mut bob_device = device(&authority, bob());

        let message = OutgoingMessage::new(alice(), vec![bob()], "chat", b"intact".to_vec());
        let sent = alice_device.encode(&message).unwrap();
        assert_eq!(sent.encoded[0], MESSAGE_VERSION);

        let damaged: Vec<(&str, Vec<u8>)> = vec![
            ("short recipient identity", edited(&sent.encoded, |proto| {
                proto.recipients[0].i.pop();
            })),
            ("unknown recipient authority", edited(&sent.encoded, |proto| {
                proto.recipients[0].i[0] = 0xee;
            })),
            ("short IV", edited(&sent.encoded, |proto| {
                proto.iv.pop();
            })),
            ("long device name", edited(&sent.encoded, |proto| {
                proto.device.push(0);
            })),
            ("short header hash", edited(&sent.encoded, |proto| {
                proto.hash = Some(vec![0u8; 16]);
            })),
            ("short sender", edited(&sent.encoded, |proto| {
                proto.sender = Some(vec![1u8; 40]);
            })),
        ];

        for (what, bytes) in damaged {
            let result = bob_device.decode(&mut EncodedMessage::inbound(bytes));
            assert!(
                matches!(
                    result.as_ref().err().and_then(|err| err.discard()),
                    Some(DiscardMessage::Corrupted(_))
                ),
                "{what} should be corrupted, got {result:?}"
            );
        }

        let mut intact = EncodedMessage::inbound(sent.encoded.clone());
        assert!(bob_device.decode(&mut intact).is_ok());
    }

    #[test]
    fn test_same_body_from_two_senders() {
        let authority = LocalAuthority::new();
        let mut alice_device = device(&authority, alice());
        let mut bob_device = device(&authority, bob());

        let from_alice = alice_device
            .encode(&OutgoingMessage::new(alice(), vec![bob()], "chat", b"ok".to_vec()))
            .unwrap();
        let from_bob = bob_device
            .encode(&OutgoingMessage::new(bob(), vec![bob()], "chat", b"ok".to_vec()))
            .unwrap();
        assert_ne!(from_alice.hash, from_bob.hash);

        let received = bob_device
            .decode(&mut EncodedMessage::inbound(from_alice.encoded))
            .unwrap();
        assert_eq!(received.data, b"ok");
        assert_eq!(Some(received.hash), from_alice.hash);
    }
}
