//! Message encoding and decoding for the PSS wire format.
//!
//! A [`Message`] is the unit exchanged between peers. Its encoding is
//! deterministic and length-prefixed; multi-byte integers are big-endian.
//!
//! ```text
//! +--------+-----------+--------+-------+----------+---------+-------------+---------+
//! | to_len | to (0-32) | fl_len | flags | expiry   | topic   | payload_len | payload |
//! | u8     |           | u8 = 1 | u8    | u32      | 4 bytes | u32         |         |
//! +--------+-----------+--------+-------+----------+---------+-------------+---------+
//! ```

use crate::error::CodecError;
use crate::{ADDRESS_LENGTH, DEFAULT_MAX_PAYLOAD, TOPIC_LENGTH};
use pss_crypto::hash::keccak256;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// 4-byte tag routing messages to handlers and scoping key bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Topic([u8; TOPIC_LENGTH]);

impl Topic {
    /// Create a topic from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TOPIC_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derive a topic from an arbitrary name: the leading 4 bytes of its
    /// keccak256 hash.
    #[must_use]
    pub fn from_name(name: impl AsRef<[u8]>) -> Self {
        let hash = keccak256(name.as_ref());
        let mut bytes = [0u8; TOPIC_LENGTH];
        bytes.copy_from_slice(&hash[..TOPIC_LENGTH]);
        Self(bytes)
    }

    /// Parse a `0x`-prefixed (or bare) 8-digit hex topic.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).ok()?;
        let arr: [u8; TOPIC_LENGTH] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Get raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TOPIC_LENGTH] {
        &self.0
    }
}

impl From<[u8; TOPIC_LENGTH]> for Topic {
    fn from(bytes: [u8; TOPIC_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Message flags (1 byte on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFlags {
    /// Payload is opaque; the sender encrypted it out of band
    pub raw: bool,
    /// Payload was sealed symmetrically rather than with ECIES
    pub symmetric: bool,
}

impl MessageFlags {
    /// Symmetric bit
    pub const SYMMETRIC: u8 = 0b01;
    /// Raw bit
    pub const RAW: u8 = 0b10;

    /// Flags for a symmetrically sealed payload.
    #[must_use]
    pub const fn symmetric() -> Self {
        Self {
            raw: false,
            symmetric: true,
        }
    }

    /// Flags for an asymmetrically sealed payload.
    #[must_use]
    pub const fn asymmetric() -> Self {
        Self {
            raw: false,
            symmetric: false,
        }
    }

    /// Flags for a raw payload.
    #[must_use]
    pub const fn raw() -> Self {
        Self {
            raw: true,
            symmetric: false,
        }
    }

    /// Encode; reserved bits are always zero.
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        let mut b = 0;
        if self.symmetric {
            b |= Self::SYMMETRIC;
        }
        if self.raw {
            b |= Self::RAW;
        }
        b
    }

    /// Decode; reserved bits are ignored.
    #[must_use]
    pub const fn from_u8(b: u8) -> Self {
        Self {
            raw: b & Self::RAW != 0,
            symmetric: b & Self::SYMMETRIC != 0,
        }
    }
}

/// 256-bit message digest used by the forward cache
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Get raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(&self.0[..8]))
    }
}

/// The wire-level unit exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Recipient hint: overlay address prefix, 0-32 bytes
    pub to: Vec<u8>,
    /// Flags
    pub flags: MessageFlags,
    /// Seconds since the epoch after which the message may be dropped
    pub expiry: u32,
    /// Topic
    pub topic: Topic,
    /// Sealed envelope, or opaque bytes for raw messages
    pub payload: Vec<u8>,
}

impl Message {
    /// Digest over `to || topic || payload`.
    ///
    /// Flags and expiry are excluded so re-stamping by forwarders does not
    /// change a message's identity.
    #[must_use]
    pub fn digest(&self) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.to);
        hasher.update(self.topic.as_bytes());
        hasher.update(&self.payload);
        Digest(*hasher.finalize().as_bytes())
    }

    /// True once `now` (seconds since the epoch) is past the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: u32) -> bool {
        self.expiry < now
    }

    /// Encode with the default payload bound.
    ///
    /// # Errors
    ///
    /// See [`MessageCodec::encode`].
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        MessageCodec::default().encode(self)
    }

    /// Decode with the default payload bound.
    ///
    /// # Errors
    ///
    /// See [`MessageCodec::decode`].
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        MessageCodec::default().decode(data)
    }
}

/// Current wall-clock time in whole seconds since the epoch, saturating.
#[must_use]
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Message serializer with a configurable payload bound
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_payload: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl MessageCodec {
    /// Fixed bytes around the variable-length fields
    pub const OVERHEAD: usize = 1 + 1 + 1 + 4 + TOPIC_LENGTH + 4;

    /// Create a codec rejecting payloads larger than `max_payload`.
    #[must_use]
    pub const fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Configured payload bound
    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Check a message against the codec's limits without encoding it.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::RecipientTooLong`] or
    /// [`CodecError::PayloadTooLarge`].
    pub fn check(&self, msg: &Message) -> Result<(), CodecError> {
        if msg.to.len() > ADDRESS_LENGTH {
            return Err(CodecError::RecipientTooLong(msg.to.len()));
        }
        if msg.payload.len() > self.max_payload {
            return Err(CodecError::PayloadTooLarge {
                size: msg.payload.len(),
                max: self.max_payload,
            });
        }
        Ok(())
    }

    /// Encode a message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::RecipientTooLong`] or
    /// [`CodecError::PayloadTooLarge`].
    pub fn encode(&self, msg: &Message) -> Result<Vec<u8>, CodecError> {
        self.check(msg)?;

        let mut buf = Vec::with_capacity(Self::OVERHEAD + msg.to.len() + msg.payload.len());
        buf.push(msg.to.len() as u8);
        buf.extend_from_slice(&msg.to);
        buf.push(1);
        buf.push(msg.flags.as_u8());
        buf.extend_from_slice(&msg.expiry.to_be_bytes());
        buf.extend_from_slice(msg.topic.as_bytes());
        buf.extend_from_slice(&(msg.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&msg.payload);
        Ok(buf)
    }

    /// Decode a message.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for truncated input, a recipient hint over
    /// 32 bytes, a flags field whose length prefix is not 1, an oversized
    /// payload, or trailing bytes.
    pub fn decode(&self, data: &[u8]) -> Result<Message, CodecError> {
        let mut r = Reader::new(data);

        let to_len = r.u8()? as usize;
        if to_len > ADDRESS_LENGTH {
            return Err(CodecError::RecipientTooLong(to_len));
        }
        let to = r.take(to_len)?.to_vec();

        let flags_len = r.u8()? as usize;
        if flags_len != 1 {
            return Err(CodecError::InvalidFlagsLength(flags_len));
        }
        let flags = MessageFlags::from_u8(r.u8()?);

        let expiry = u32::from_be_bytes(r.array::<4>()?);
        let topic = Topic::from_bytes(r.array::<TOPIC_LENGTH>()?);

        let payload_len = u32::from_be_bytes(r.array::<4>()?) as usize;
        if payload_len > self.max_payload {
            return Err(CodecError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }
        let payload = r.take(payload_len)?.to_vec();

        if r.remaining() > 0 {
            return Err(CodecError::TrailingBytes(r.remaining()));
        }

        Ok(Message {
            to,
            flags,
            expiry,
            topic,
            payload,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::TooShort {
                expected: self.pos + n,
                actual: self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
