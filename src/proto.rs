//! Protocol Buffers layout of the message envelope.

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct RecipientProto {
    /// Recipient identity in canonical form.
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) i: Vec<u8>,
    /// Channel key encrypted to the recipient.
    #[prost(bytes = "vec", tag = "2")]
    pub(crate) k: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub(crate) s: Vec<u8>,
    /// Secret encrypted under the channel key.
    #[prost(bytes = "vec", tag = "4")]
    pub(crate) d: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct MessageProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub(crate) sender: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "2")]
    pub(crate) device: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub(crate) hash: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "4")]
    pub(crate) app: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub(crate) iv: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub(crate) body: Vec<u8>,
    #[prost(message, repeated, tag = "7")]
    pub(crate) recipients: Vec<RecipientProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct SecretProto {
    /// Body key followed by the body IV.
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) k: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub(crate) h: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub(crate) q: u64,
}
