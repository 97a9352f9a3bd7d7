use crate::crypto::universal_hash;
use crate::provider::{DeviceId, IdentityId};
use crate::{
    CodecConfig, DeviceName, DiscardMessage, Error, HashedIdentity, Identity, ObjFormat,
    PublicParameters, TransportDataProvider,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// A message to be sent to one or more identities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: Identity,
    pub to: Vec<Identity>,
    /// Opaque application tag, authenticated but not encrypted.
    pub app: Vec<u8>,
    pub data: Vec<u8>,
    /// [`universal_hash`] of the sender, app tag and `data`.
    pub hash: [u8; 32],
    /// Leave the sender out of the clear header.
    pub blind: bool,
}

impl OutgoingMessage {
    pub fn new(from: Identity, to: Vec<Identity>, app: impl Into<Vec<u8>>, data: Vec<u8>) -> Self {
        let app: Vec<u8> = app.into();
        let hash = universal_hash(&from, &app, &data);
        Self {
            from,
            to,
            app,
            data,
            hash,
            blind: false,
        }
    }

    /// Wraps an application object, tagged with its app id.
    pub fn from_obj(from: Identity, to: Vec<Identity>, obj: &ObjFormat) -> Self {
        Self::new(from, to, obj.app_id.as_bytes(), obj.to_bytes())
    }

    pub fn blind(mut self) -> Self {
        self.blind = true;
        self
    }
}

/// A successfully decoded message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Sender at the epoch it signed with.
    pub from: HashedIdentity,
    pub from_identity: IdentityId,
    pub from_device: DeviceId,
    pub device: DeviceName,
    pub recipients: Vec<HashedIdentity>,
    pub app: Vec<u8>,
    pub data: Vec<u8>,
    pub hash: [u8; 32],
    pub sequence: u64,
    pub blind: bool,
}

impl IncomingMessage {
    /// Decodes the body as an application object.
    pub fn obj(&self) -> Result<ObjFormat, DiscardMessage> {
        ObjFormat::from_bytes(&self.data)
    }
}

/// Encodes outgoing and decodes incoming messages for one device.
///
/// Every call runs inside one provider transaction: either all cache,
/// sequence and metadata writes of the call are committed, or none are.
pub struct MessageCodec<A, P> {
    pub(crate) authority: A,
    pub(crate) provider: P,
    pub(crate) config: CodecConfig,
}

impl<A: PublicParameters, P: TransportDataProvider> MessageCodec<A, P> {
    /// Creates a codec.
    ///
    /// If no configuration is provided, default values are used.
    pub fn new(authority: A, provider: P, config: Option<CodecConfig>) -> Self {
        Self {
            authority,
            provider,
            config: config.unwrap_or_default(),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn into_provider(self) -> P {
        self.provider
    }

    pub(crate) fn in_transaction<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.provider.begin_transaction();
        let result = f(self);
        match result {
            Ok(_) => self.provider.commit_transaction(),
            Err(_) => self.provider.rollback_transaction(),
        }
        result
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Authority, FeedType, Obj};

    #[test]
    fn test_outgoing_message_hashes_data() {
        let alice = Identity::from_principal(Authority::Email, "alice@example.com");
        let message = OutgoingMessage::new(alice, vec![alice], "note", b"hello".to_vec());

        assert_eq!(message.hash, universal_hash(&alice, b"note", b"hello"));
        assert!(!message.blind);
        assert!(message.blind().blind);
    }

    #[test]
    fn test_outgoing_message_from_obj() {
        let alice = Identity::from_principal(Authority::Email, "alice@example.com");
        let format = ObjFormat {
            feed_type: FeedType::OneTimeUse,
            feed_capability: None,
            app_id: "musubi.poll".to_string(),
            timestamp: 42,
            obj: Obj::new("vote"),
        };

        let message = OutgoingMessage::from_obj(alice, Vec::new(), &format);
        assert_eq!(message.app, b"musubi.poll");
        assert_eq!(ObjFormat::from_bytes(&message.data), Ok(format));
    }
}
