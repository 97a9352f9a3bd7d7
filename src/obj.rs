//! Binary format of the application payload carried in a message body.
//!
//! The encoded bytes are hashed and that hash is signed, so decoding must
//! reproduce exactly what was encoded: an absent field stays absent and is
//! never confused with an empty one.

use crate::DiscardMessage;
use serde_json::Value;

/// Current obj format version.
pub const OBJ_VERSION: u8 = 1;

const HAS_CAPABILITY: u8 = 0x01;
const HAS_JSON: u8 = 0x02;
const HAS_RAW: u8 = 0x04;
const HAS_INT_KEY: u8 = 0x08;
const HAS_STRING_KEY: u8 = 0x10;
const KNOWN_FLAGS: u8 = HAS_CAPABILITY | HAS_JSON | HAS_RAW | HAS_INT_KEY | HAS_STRING_KEY;

/// How membership of the enclosing feed is managed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FeedType {
    Unknown = 0,
    /// Membership is fixed at creation.
    Fixed = 1,
    /// Members may be added by anyone holding the capability.
    Asymmetric = 2,
    OneTimeUse = 3,
}

impl TryFrom<u8> for FeedType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Fixed),
            2 => Ok(Self::Asymmetric),
            3 => Ok(Self::OneTimeUse),
            other => Err(other),
        }
    }
}

/// An application object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Obj {
    pub kind: String,
    pub json: Option<Value>,
    pub raw: Option<Vec<u8>>,
    pub int_key: Option<i32>,
    pub string_key: Option<String>,
}

impl Obj {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            json: None,
            raw: None,
            int_key: None,
            string_key: None,
        }
    }
}

/// An [`Obj`] together with the feed and app it was posted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjFormat {
    pub feed_type: FeedType,
    pub feed_capability: Option<Vec<u8>>,
    pub app_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub obj: Obj,
}

impl ObjFormat {
    /// Serializes the payload.
    ///
    /// The format is:
    /// - 1 byte: version
    /// - 1 byte: presence flags
    /// - 1 byte: feed type
    /// - [capability]: u32 length + bytes
    /// - app id: u32 length + UTF-8
    /// - 8 bytes: timestamp (big-endian i64)
    /// - type: u32 length + UTF-8
    /// - [json]: u32 length + UTF-8
    /// - [raw]: u32 length + bytes
    /// - [int key]: 4 bytes (big-endian i32)
    /// - [string key]: u32 length + UTF-8
    ///
    /// All lengths are big-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let json = self.obj.json.as_ref().map(Value::to_string);

        let mut flags = 0u8;
        for (present, flag) in [
            (self.feed_capability.is_some(), HAS_CAPABILITY),
            (json.is_some(), HAS_JSON),
            (self.obj.raw.is_some(), HAS_RAW),
            (self.obj.int_key.is_some(), HAS_INT_KEY),
            (self.obj.string_key.is_some(), HAS_STRING_KEY),
        ] {
            if present {
                flags |= flag;
            }
        }

        let mut out = Vec::with_capacity(64 + self.app_id.len() + self.obj.kind.len());
        out.push(OBJ_VERSION);
        out.push(flags);
        out.push(self.feed_type as u8);
        if let Some(capability) = &self.feed_capability {
            put_bytes(&mut out, capability);
        }
        put_bytes(&mut out, self.app_id.as_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        put_bytes(&mut out, self.obj.kind.as_bytes());
        if let Some(json) = &json {
            put_bytes(&mut out, json.as_bytes());
        }
        if let Some(raw) = &self.obj.raw {
            put_bytes(&mut out, raw);
        }
        if let Some(int_key) = self.obj.int_key {
            out.extend_from_slice(&int_key.to_be_bytes());
        }
        if let Some(string_key) = &self.obj.string_key {
            put_bytes(&mut out, string_key.as_bytes());
        }

        out
    }

    /// Parses a payload. Any malformation is [`DiscardMessage::BadObjFormat`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DiscardMessage> {
        let mut reader = Reader { remaining: bytes };

        let version = reader.u8()?;
        if version != OBJ_VERSION {
            return Err(bad(format!("Unsupported obj version: {version}")));
        }
        let flags = reader.u8()?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(bad(format!("Unknown obj flags: {flags:#04x}")));
        }
        let feed_type = FeedType::try_from(reader.u8()?)
            .map_err(|value| bad(format!("Unknown feed type: {value}")))?;

        let feed_capability = if flags & HAS_CAPABILITY != 0 {
            Some(reader.bytes()?.to_vec())
        } else {
            None
        };
        let app_id = reader.string()?;
        let timestamp = i64::from_be_bytes(reader.array()?);
        let kind = reader.string()?;
        let json = if flags & HAS_JSON != 0 {
            let text = reader.string()?;
            Some(serde_json::from_str(&text).map_err(|err| bad(format!("Invalid JSON: {err}")))?)
        } else {
            None
        };
        let raw = if flags & HAS_RAW != 0 {
            Some(reader.bytes()?.to_vec())
        } else {
            None
        };
        let int_key = if flags & HAS_INT_KEY != 0 {
            Some(i32::from_be_bytes(reader.array()?))
        } else {
            None
        };
        let string_key = if flags & HAS_STRING_KEY != 0 {
            Some(reader.string()?)
        } else {
            None
        };

        if !reader.remaining.is_empty() {
            return Err(bad(format!("{} trailing bytes", reader.remaining.len())));
        }

        Ok(Self {
            feed_type,
            feed_capability,
            app_id,
            timestamp,
            obj: Obj {
                kind,
                json,
                raw,
                int_key,
                string_key,
            },
        })
    }
}

fn bad(reason: String) -> DiscardMessage {
    DiscardMessage::BadObjFormat(reason)
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    remaining: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DiscardMessage> {
        if self.remaining.len() < len {
            return Err(bad(format!(
                "Truncated: wanted {len} bytes, {} left",
                self.remaining.len()
            )));
        }

        let (head, tail) = self.remaining.split_at(len);
        self.remaining = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DiscardMessage> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn u8(&mut self) -> Result<u8, DiscardMessage> {
        let [value] = self.array::<1>()?;
        Ok(value)
    }

    fn bytes(&mut self) -> Result<&'a [u8], DiscardMessage> {
        let len = u32::from_be_bytes(self.array()?) as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, DiscardMessage> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|err| bad(format!("Invalid UTF-8: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full() -> ObjFormat {
        ObjFormat {
            feed_type: FeedType::Asymmetric,
            feed_capability: Some(vec![0xca, 0xfe]),
            app_id: "musubi.chat".to_string(),
            timestamp: 1_700_000_000_123,
            obj: Obj {
                kind: "status".to_string(),
                json: Some(json!({"text": "hello", "n": 3, "nested": {"ok": true}})),
                raw: Some(vec![1, 2, 3]),
                int_key: Some(-7),
                string_key: Some("key".to_string()),
            },
        }
    }

    #[test]
    fn test_round_trip_all_fields() {
        let format = full();
        assert_eq!(ObjFormat::from_bytes(&format.to_bytes()).unwrap(), format);
    }

    #[test]
    fn test_round_trip_all_absent() {
        let format = ObjFormat {
            feed_type: FeedType::Unknown,
            feed_capability: None,
            app_id: String::new(),
            timestamp: 0,
            obj: Obj::new("like"),
        };
        assert_eq!(ObjFormat::from_bytes(&format.to_bytes()).unwrap(), format);
    }

    #[test]
    fn test_absent_and_empty_differ() {
        let mut absent = full();
        absent.obj.raw = None;
        absent.obj.string_key = None;
        absent.feed_capability = None;

        let mut empty = full();
        empty.obj.raw = Some(Vec::new());
        empty.obj.string_key = Some(String::new());
        empty.feed_capability = Some(Vec::new());

        assert_ne!(absent.to_bytes(), empty.to_bytes());
        assert_eq!(ObjFormat::from_bytes(&absent.to_bytes()).unwrap(), absent);
        assert_eq!(ObjFormat::from_bytes(&empty.to_bytes()).unwrap(), empty);
    }

    #[test]
    fn test_zero_int_key_is_not_absent() {
        let mut format = full();
        format.obj.int_key = Some(0);
        let decoded = ObjFormat::from_bytes(&format.to_bytes()).unwrap();
        assert_eq!(decoded.obj.int_key, Some(0));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut bytes = full().to_bytes();
        bytes[0] = 9;
        assert!(matches!(
            ObjFormat::from_bytes(&bytes),
            Err(DiscardMessage::BadObjFormat(_))
        ));
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let bytes = full().to_bytes();

        for len in 0..bytes.len() {
            assert!(
                matches!(
                    ObjFormat::from_bytes(&bytes[..len]),
                    Err(DiscardMessage::BadObjFormat(_))
                ),
                "Truncation to {len} bytes should be rejected"
            );
        }

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(ObjFormat::from_bytes(&trailing).is_err());

        let mut unknown_flags = bytes.clone();
        unknown_flags[1] |= 0x80;
        assert!(ObjFormat::from_bytes(&unknown_flags).is_err());

        let mut huge_length = bytes;
        huge_length[3..7].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(ObjFormat::from_bytes(&huge_length).is_err());
    }
}
