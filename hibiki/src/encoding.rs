use crate::error::{DecodeError, EncodeError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use smallvec::SmallVec;
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::sync::Arc;

/// Serialize a value to JSON bytes.
pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, EncodeError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Parse a value from JSON bytes.
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Compress bytes with gzip at the default level.
pub fn gzip(input: &[u8]) -> Result<Bytes, EncodeError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Decompress gzip bytes.
pub fn gunzip(input: &[u8]) -> Result<Bytes, DecodeError> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

/// Encode bytes as standard, padded base64.
pub fn base64(input: &[u8]) -> Bytes {
    Bytes::from(STANDARD.encode(input))
}

/// Decode standard, padded base64.
pub fn unbase64(input: &[u8]) -> Result<Bytes, DecodeError> {
    Ok(Bytes::from(STANDARD.decode(input)?))
}

#[cfg(feature = "protobuf")]
/// Serialize a protobuf message.
pub fn protobuf<M: prost::Message>(message: &M) -> Result<Bytes, EncodeError> {
    let mut buf = Vec::with_capacity(message.encoded_len());
    message.encode(&mut buf)?;
    Ok(Bytes::from(buf))
}

#[cfg(feature = "protobuf")]
/// Parse a protobuf message.
pub fn from_protobuf<M: prost::Message + Default>(bytes: &[u8]) -> Result<M, DecodeError> {
    Ok(M::decode(bytes)?)
}

// ---------------------------------------------

/// A reversible byte transform, used as encoding middleware.
pub trait Codec: Send + Sync + 'static {
    /// Token used in the `Content-Encoding` header.
    fn name(&self) -> &'static str;

    /// Apply the transform.
    fn encode(&self, input: Bytes) -> Result<Bytes, EncodeError>;

    /// Undo the transform.
    fn decode(&self, input: Bytes) -> Result<Bytes, DecodeError>;
}

/// gzip compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gzip;

impl Codec for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn encode(&self, input: Bytes) -> Result<Bytes, EncodeError> {
        gzip(&input)
    }

    fn decode(&self, input: Bytes) -> Result<Bytes, DecodeError> {
        gunzip(&input)
    }
}

/// Standard base64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64;

impl Codec for Base64 {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, input: Bytes) -> Result<Bytes, EncodeError> {
        Ok(base64(&input))
    }

    fn decode(&self, input: Bytes) -> Result<Bytes, DecodeError> {
        unbase64(&input)
    }
}

/// An ordered chain of [Codec]s.
///
/// Codecs are applied in the order they were added and undone in reverse.
///
/// ```rust
/// # use hibiki::encoding::{Base64, Encoding, Gzip};
/// # use bytes::Bytes;
/// let encoding = Encoding::new().then(Gzip).then(Base64);
/// assert_eq!(encoding.content_encoding().as_deref(), Some("gzip, base64"));
///
/// let wire = encoding.encode(Bytes::from_static(b"hello")).unwrap();
/// assert_eq!(encoding.decode(wire).unwrap(), Bytes::from_static(b"hello"));
/// ```
#[derive(Clone, Default)]
pub struct Encoding {
    codecs: SmallVec<[Arc<dyn Codec>; 4]>,
}

impl Encoding {
    /// The identity encoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a codec to the chain.
    pub fn then<C: Codec>(mut self, codec: C) -> Self {
        self.codecs.push(Arc::new(codec));
        self
    }

    /// No codec in the chain.
    pub fn is_identity(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Apply every codec, first to last.
    pub fn encode(&self, input: Bytes) -> Result<Bytes, EncodeError> {
        self.codecs.iter().try_fold(input, |data, codec| codec.encode(data))
    }

    /// Undo every codec, last to first.
    pub fn decode(&self, input: Bytes) -> Result<Bytes, DecodeError> {
        self.codecs
            .iter()
            .rev()
            .try_fold(input, |data, codec| codec.decode(data))
    }

    /// HTTP style `Content-Encoding` value, `None` for the identity encoding.
    pub fn content_encoding(&self) -> Option<String> {
        if self.is_identity() {
            return None;
        }
        let names: Vec<&str> = self.codecs.iter().map(|codec| codec.name()).collect();
        Some(names.join(", "))
    }
}

impl Debug for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.codecs.iter().map(|codec| codec.name()))
            .finish()
    }
}
