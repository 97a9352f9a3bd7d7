//! Identity-based, multi-recipient message encoding.
//!
//! A [`MessageCodec`] turns an [`OutgoingMessage`] into one wire packet
//! readable by every addressed identity, and turns received packets back
//! into [`IncomingMessage`]s. Keys, caches and bookkeeping are reached
//! through a [`TransportDataProvider`].

mod error;
pub use error::*;

mod identity;
pub use identity::*;

mod config;
pub use config::{CodecConfig, ProviderConfig};

mod crypto;
pub use crypto::{short_hash, universal_hash};

pub mod ibe;
pub use ibe::{EncryptionUserKey, LocalAuthority, PublicParameters, SignatureUserKey};

mod sequence;
pub use sequence::{SequenceTracker, SequenceUpdate};

mod secret;
pub use secret::{IncomingChannelSecret, IncomingSecretKey, OutgoingChannelSecret, OutgoingSecretKey};

mod provider;
pub use provider::*;

mod memory;
pub use memory::InMemoryTransportData;

mod proto;

mod message;
pub use message::{MESSAGE_VERSION, Message, Recipient, Secret};

mod obj;
pub use obj::{FeedType, OBJ_VERSION, Obj, ObjFormat};

mod codec;
pub use codec::{IncomingMessage, MessageCodec, OutgoingMessage};

mod encoder;
mod decoder;
