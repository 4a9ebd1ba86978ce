//! Payload codecs and the versioned envelope.
//!
//! Cached values are stored as `[ENVELOPE_VERSION, codec tag, body...]`.
//! Encoding walks the chain in order and keeps the first codec whose output
//! decodes back into the caller's type; decoding reads the tag and goes
//! straight to that codec.

use serde::{Serialize, de::DeserializeOwned};

use crate::Error;

/// Current envelope layout version.
pub const ENVELOPE_VERSION: u8 = 1;

const HEADER_LEN: usize = 2;

/// A payload codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Compact binary encoding. Cannot decode self-describing values such
    /// as `serde_json::Value`.
    Bincode,
    /// JSON text.
    Json,
}

impl Codec {
    pub fn tag(self) -> u8 {
        match self {
            Codec::Bincode => 1,
            Codec::Json => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Codec::Bincode),
            2 => Some(Codec::Json),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::Bincode => "bincode",
            Codec::Json => "json",
        }
    }

    fn encode_body<T: Serialize>(self, value: &T) -> Result<Vec<u8>, String> {
        match self {
            Codec::Bincode => bincode::serialize(value).map_err(|e| e.to_string()),
            Codec::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
        }
    }

    fn decode_body<T: DeserializeOwned>(self, body: &[u8]) -> Result<T, String> {
        match self {
            Codec::Bincode => bincode::deserialize(body).map_err(|e| e.to_string()),
            Codec::Json => serde_json::from_slice(body).map_err(|e| e.to_string()),
        }
    }
}

/// Ordered list of codecs tried when encoding.
#[derive(Debug, Clone)]
pub struct CodecChain {
    order: Vec<Codec>,
}

impl Default for CodecChain {
    fn default() -> Self {
        Self { order: vec![Codec::Bincode, Codec::Json] }
    }
}

impl CodecChain {
    /// Encode `value` with the first codec that round-trips it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` listing every codec's failure when
    /// none of them can carry the value.
    pub fn encode<T>(&self, value: &T) -> Result<Vec<u8>, Error>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut failures = Vec::with_capacity(self.order.len());

        for (i, codec) in self.order.iter().copied().enumerate() {
            let attempt = codec
                .encode_body(value)
                .and_then(|body| codec.decode_body::<T>(&body).map(|_| body));

            match attempt {
                Ok(body) => {
                    if i > 0 {
                        tracing::debug!(codec = codec.name(), "primary codec rejected value, used fallback");
                    }
                    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
                    out.push(ENVELOPE_VERSION);
                    out.push(codec.tag());
                    out.extend_from_slice(&body);
                    return Ok(out);
                }
                Err(e) => failures.push(format!("{}: {e}", codec.name())),
            }
        }

        Err(Error::Serialization(failures.join("; ")))
    }

    /// Decode an envelope produced by [`CodecChain::encode`].
    ///
    /// Dispatches on the envelope tag; the tagged codec need not be in this
    /// chain.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, Error> {
        let codec = codec_of(bytes)?;
        codec
            .decode_body(&bytes[HEADER_LEN..])
            .map_err(|e| Error::Serialization(format!("{} decode failed: {e}", codec.name())))
    }
}

/// Read the codec recorded in an envelope header.
pub fn codec_of(bytes: &[u8]) -> Result<Codec, Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Serialization("envelope shorter than header".into()));
    }
    if bytes[0] != ENVELOPE_VERSION {
        return Err(Error::Serialization(format!("unsupported envelope version {}", bytes[0])));
    }
    Codec::from_tag(bytes[1]).ok_or_else(|| Error::Serialization(format!("unknown codec tag {}", bytes[1])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serializer};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quote {
        symbol: String,
        close: f64,
    }

    #[derive(Debug, Deserialize)]
    struct Poisoned {
        #[allow(dead_code)]
        value: u32,
    }

    impl Serialize for Poisoned {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refuses to serialize"))
        }
    }

    #[test]
    fn test_plain_struct_uses_primary_codec() {
        let chain = CodecChain::default();
        let quote = Quote { symbol: "AAPL".into(), close: 186.3 };

        let bytes = chain.encode(&quote).unwrap();
        assert_eq!(codec_of(&bytes).unwrap(), Codec::Bincode);
        assert_eq!(chain.decode::<Quote>(&bytes).unwrap(), quote);
    }

    #[test]
    fn test_self_describing_value_falls_back_to_json() {
        let chain = CodecChain::default();
        let value = json!({"close": 186.3, "volume": [1, 2, 3]});

        let bytes = chain.encode(&value).unwrap();
        assert_eq!(codec_of(&bytes).unwrap(), Codec::Json);
        assert_eq!(chain.decode::<serde_json::Value>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_all_codecs_failing_is_serialization_error() {
        let chain = CodecChain::default();
        let err = chain.encode(&Poisoned { value: 1 }).unwrap_err();
        match err {
            Error::Serialization(msg) => {
                assert!(msg.contains("bincode"));
                assert!(msg.contains("json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_dispatches_on_tag_not_chain() {
        let json_only = CodecChain { order: vec![Codec::Json] };
        let bytes = CodecChain::default().encode(&Quote { symbol: "MSFT".into(), close: 1.0 }).unwrap();
        assert_eq!(json_only.decode::<Quote>(&bytes).unwrap().symbol, "MSFT");
    }

    #[test]
    fn test_rejects_bad_envelopes() {
        let chain = CodecChain::default();
        assert!(matches!(chain.decode::<u32>(&[]), Err(Error::Serialization(_))));
        assert!(matches!(chain.decode::<u32>(&[9, 1, 0]), Err(Error::Serialization(_))));
        assert!(matches!(chain.decode::<u32>(&[ENVELOPE_VERSION, 77, 0]), Err(Error::Serialization(_))));
    }
}
