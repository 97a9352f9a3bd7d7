use crate::codec::now_millis;
use crate::crypto::{self, KEY_SIZE, NONCE_SIZE, random_bytes, short_hash};
use crate::identity::HASHED_IDENTITY_SIZE;
use crate::secret::{seal_signature, signed_bytes};
use crate::{
    DeviceName, EncodedMessage, Error, HashedIdentity, Identity, Message, MessageCodec,
    OutgoingChannelSecret, OutgoingMessage, OutgoingSecretKey, PublicParameters, Recipient,
    Secret, SignatureUserKey, TransportDataProvider, ibe,
};
use log::{debug, trace, warn};
use zeroize::Zeroizing;

impl<A: PublicParameters, P: TransportDataProvider> MessageCodec<A, P> {
    /// Encodes `message` into one wire packet for all of its recipients.
    ///
    /// This performs the following steps:
    /// 1. Resolves the sender's signing key and every recipient's channel
    ///    secret, deriving and caching the ones not seen before
    /// 2. Encrypts the body once under a fresh key
    /// 3. Seals a [`Secret`] per recipient under its channel secret
    /// 4. Records the outbound message and its sequence numbers
    ///
    /// Fails with [`Error::NoRecipients`] or [`Error::TooManyRecipients`]
    /// before any key work if no receiver could accept the packet.
    ///
    /// Fails with [`crate::NeedsKey::Signature`] if the sender's key for its
    /// current epoch is not held; nothing is written in that case and the
    /// identical call can be repeated once the key is available.
    pub fn encode(&mut self, message: &OutgoingMessage) -> Result<EncodedMessage, Error> {
        self.in_transaction(|codec| codec.encode_message(message))
    }

    fn encode_message(&mut self, message: &OutgoingMessage) -> Result<EncodedMessage, Error> {
        let mut recipients: Vec<Identity> = Vec::with_capacity(message.to.len());
        for to in &message.to {
            if !recipients.contains(to) {
                recipients.push(*to);
            }
        }
        if recipients.is_empty() {
            return Err(Error::NoRecipients);
        }
        if recipients.len() > self.config.max_recipients {
            warn!(
                "Refusing to encode for {} recipients, receivers accept at most {}",
                recipients.len(),
                self.config.max_recipients
            );
            return Err(Error::TooManyRecipients {
                count: recipients.len(),
                max: self.config.max_recipients,
            });
        }

        let device = self.provider.device_name();
        let from = message
            .from
            .at(self.provider.signature_time(&message.from));
        let signature_key = self.provider.signature_key(&from)?;

        let mut channels = Vec::with_capacity(recipients.len());
        for to in recipients {
            let to = to.at(self.provider.encryption_time(&to));
            let channel = self.outgoing_channel(&signature_key, &to, &device)?;
            channels.push((to, channel));
        }

        let body_key = Zeroizing::new(random_bytes::<KEY_SIZE>());
        let iv = random_bytes::<NONCE_SIZE>();
        let body = crypto::encrypt(&body_key, &iv, &message.data, &message.app)?;

        let mut records = Vec::with_capacity(channels.len());
        let mut sequences = Vec::with_capacity(channels.len());
        for (to, channel) in channels {
            let sequence = self.provider.next_sequence_number(&to.identity());
            let secret = Secret {
                key: *body_key,
                iv,
                hash: message.hash,
                sequence,
            };
            let secret_bytes = Zeroizing::new(secret.to_bytes());
            let data = crypto::seal(channel.key(), &secret_bytes, &to.to_bytes())?;

            let signature = if message.blind {
                seal_signature(&self.config.protocol_info, channel.key(), &channel.signature)?
            } else {
                channel.signature.clone()
            };

            records.push(Recipient {
                identity: to,
                encrypted_key: channel.encrypted_key.clone(),
                signature,
                data,
            });
            sequences.push((to.identity(), sequence));
        }

        let wire = Message {
            sender: (!message.blind).then_some(from),
            device,
            hash: (!message.blind).then_some(message.hash),
            app: message.app.clone(),
            iv,
            body,
            recipients: records,
        };
        let bytes = wire.to_bytes();

        let from_identity = self.provider.ensure_identity(&message.from);
        let from_device = self.provider.ensure_device(from_identity, &device);
        let mut encoded = EncodedMessage {
            id: None,
            short_hash: short_hash(&bytes),
            encoded: bytes,
            from_identity: Some(from_identity),
            from_device: Some(from_device),
            hash: Some(message.hash),
            outbound: true,
            processed: true,
            processed_time: Some(now_millis()),
        };
        self.provider.insert_encoded_metadata(&mut encoded);

        if let Some(id) = encoded.id {
            for (to, sequence) in &sequences {
                self.provider.store_sequence_number(id, to, *sequence);
            }
        }

        debug!(
            "Encoded {} bytes from {from} to {} recipients{}",
            encoded.encoded.len(),
            sequences.len(),
            if message.blind { " (blind)" } else { "" }
        );

        Ok(encoded)
    }

    /// Returns the channel secret for sending from `signature_key`'s identity
    /// to `to`, deriving it on a cache miss.
    fn outgoing_channel(
        &mut self,
        signature_key: &SignatureUserKey,
        to: &HashedIdentity,
        device: &DeviceName,
    ) -> Result<OutgoingChannelSecret, Error> {
        let from = signature_key.identity();
        let cache_key = OutgoingSecretKey::new(from, to);

        if let Some(secret) = self.provider.lookup_outgoing_secret(&cache_key) {
            trace!("Outgoing channel secret cache hit for {from} -> {to}");
            return Ok(secret);
        }

        debug!("Deriving outgoing channel secret for {from} -> {to}");

        let key = Box::new(random_bytes::<KEY_SIZE>());
        let mut envelope = Zeroizing::new(Vec::with_capacity(KEY_SIZE + HASHED_IDENTITY_SIZE));
        envelope.extend_from_slice(key.as_slice());
        envelope.extend_from_slice(&from.to_bytes());

        let encrypted_key =
            ibe::encrypt_to_identity(&self.authority, &self.config.protocol_info, to, &envelope)?;
        let signature = signature_key
            .sign(&signed_bytes(&encrypted_key, device))
            .to_bytes()
            .to_vec();

        let secret = OutgoingChannelSecret {
            key,
            encrypted_key,
            signature,
            signature_epoch: from.temporal_frame(),
            encryption_epoch: to.temporal_frame(),
        };
        self.provider
            .insert_outgoing_secret(cache_key, secret.clone());

        Ok(secret)
    }
}
