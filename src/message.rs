use crate::crypto::{KEY_SIZE, NONCE_SIZE};
use crate::proto::{MessageProto, RecipientProto, SecretProto};
use crate::{DeviceName, DiscardMessage, HashedIdentity};
use prost::Message as _;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Current envelope version.
pub const MESSAGE_VERSION: u8 = 1;

const FLAG_BLIND: u8 = 0x01;

/// Per-recipient record of a [`Message`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    /// Who this record is for, at the epoch it was encrypted to.
    pub identity: HashedIdentity,
    /// Channel key encrypted to `identity`.
    pub encrypted_key: Vec<u8>,
    /// Signature over `encrypted_key ‖ device`; sealed under the channel key
    /// for blind messages.
    pub signature: Vec<u8>,
    /// [`Secret`] encrypted under the channel key.
    pub data: Vec<u8>,
}

/// A multi-recipient wire message: one encrypted body plus a record per
/// recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// `None` for blind messages.
    pub sender: Option<HashedIdentity>,
    pub device: DeviceName,
    /// Universal hash; omitted for blind messages.
    pub hash: Option<[u8; 32]>,
    pub app: Vec<u8>,
    pub iv: [u8; NONCE_SIZE],
    pub body: Vec<u8>,
    pub recipients: Vec<Recipient>,
}

impl Message {
    pub fn is_blind(&self) -> bool {
        self.sender.is_none()
    }

    /// Serializes the message for transmission.
    ///
    /// Format: [version (1 byte)][flags (1 byte)][protobuf body]
    pub fn to_bytes(&self) -> Vec<u8> {
        let proto = MessageProto {
            sender: self.sender.map(|sender| sender.to_bytes().to_vec()),
            device: self.device.as_bytes().to_vec(),
            hash: self.hash.map(|hash| hash.to_vec()),
            app: self.app.clone(),
            iv: self.iv.to_vec(),
            body: self.body.clone(),
            recipients: self
                .recipients
                .iter()
                .map(|recipient| RecipientProto {
                    i: recipient.identity.to_bytes().to_vec(),
                    k: recipient.encrypted_key.clone(),
                    s: recipient.signature.clone(),
                    d: recipient.data.clone(),
                })
                .collect(),
        };

        let flags = if self.is_blind() { FLAG_BLIND } else { 0 };
        let mut result = Vec::with_capacity(2 + proto.encoded_len());
        result.push(MESSAGE_VERSION);
        result.push(flags);
        result.extend_from_slice(&proto.encode_to_vec());

        result
    }

    /// Parses a message, rejecting anything structurally invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DiscardMessage> {
        let corrupted = |reason: &str| DiscardMessage::Corrupted(reason.to_string());

        if bytes.len() < 2 {
            return Err(corrupted("Message too short"));
        }
        if bytes[0] != MESSAGE_VERSION {
            return Err(DiscardMessage::Corrupted(format!(
                "Unsupported message version: {}",
                bytes[0]
            )));
        }
        let flags = bytes[1];
        if flags & !FLAG_BLIND != 0 {
            return Err(DiscardMessage::Corrupted(format!("Unknown flags: {flags:#04x}")));
        }

        let proto = MessageProto::decode(&bytes[2..])
            .map_err(|err| DiscardMessage::Corrupted(format!("Failed to decode message: {err}")))?;

        let blind = flags & FLAG_BLIND != 0;
        let sender = match (blind, proto.sender) {
            (true, None) => None,
            (false, Some(sender)) => Some(
                HashedIdentity::from_bytes(&sender).ok_or_else(|| corrupted("Invalid sender"))?,
            ),
            _ => return Err(corrupted("Sender presence does not match flags")),
        };
        if blind && proto.hash.is_some() {
            return Err(corrupted("Blind message carries a hash"));
        }

        let device = DeviceName::from_slice(&proto.device).ok_or_else(|| corrupted("Invalid device"))?;
        let hash = proto
            .hash
            .map(|hash| <[u8; 32]>::try_from(hash.as_slice()))
            .transpose()
            .map_err(|_| corrupted("Invalid hash"))?;
        let iv = <[u8; NONCE_SIZE]>::try_from(proto.iv.as_slice()).map_err(|_| corrupted("Invalid IV"))?;

        let recipients = proto
            .recipients
            .into_iter()
            .map(|recipient| {
                Ok(Recipient {
                    identity: HashedIdentity::from_bytes(&recipient.i)
                        .ok_or_else(|| corrupted("Invalid recipient identity"))?,
                    encrypted_key: recipient.k,
                    signature: recipient.s,
                    data: recipient.d,
                })
            })
            .collect::<Result<Vec<_>, DiscardMessage>>()?;

        Ok(Self {
            sender,
            device,
            hash,
            app: proto.app,
            iv,
            body: proto.body,
            recipients,
        })
    }
}

/// The per-recipient payload: everything needed to read the shared body.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    pub key: [u8; KEY_SIZE],
    pub iv: [u8; NONCE_SIZE],
    /// Universal hash of the sender, app tag and plaintext body.
    pub hash: [u8; 32],
    /// Sender's sequence number towards this recipient.
    pub sequence: u64,
}

impl Secret {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut k = Vec::with_capacity(KEY_SIZE + NONCE_SIZE);
        k.extend_from_slice(&self.key);
        k.extend_from_slice(&self.iv);

        let mut proto = SecretProto {
            k,
            h: self.hash.to_vec(),
            q: self.sequence,
        };
        let bytes = proto.encode_to_vec();
        proto.k.zeroize();

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DiscardMessage> {
        let mut proto = SecretProto::decode(bytes)
            .map_err(|err| DiscardMessage::Corrupted(format!("Failed to decode secret: {err}")))?;

        if proto.k.len() != KEY_SIZE + NONCE_SIZE || proto.h.len() != 32 {
            proto.k.zeroize();
            return Err(DiscardMessage::Corrupted("Invalid secret lengths".to_string()));
        }

        let mut secret = Self {
            key: [0u8; KEY_SIZE],
            iv: [0u8; NONCE_SIZE],
            hash: [0u8; 32],
            sequence: proto.q,
        };
        secret.key.copy_from_slice(&proto.k[0..KEY_SIZE]);
        secret.iv.copy_from_slice(&proto.k[KEY_SIZE..]);
        secret.hash.copy_from_slice(&proto.h);
        proto.k.zeroize();

        Ok(secret)
    }
}
