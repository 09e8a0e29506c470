//! Session payload codec
//!
//! The backing store only ever sees opaque bytes. The default codec wraps the JSON
//! form of `SessionData` in a small self-describing envelope:
//!
//! ```text
//! +------+---------+----------------------+
//! | SSDB | version | JSON document ...    |
//! +------+---------+----------------------+
//!  4 bytes  1 byte
//! ```

use crate::session::SessionData;
use crate::{Error, Result};

/// Converts session data to and from stored payloads
pub trait SessionCodec: Send + Sync {
    /// # Errors
    /// - `Error::Serialization` if the session cannot be encoded
    fn encode(&self, data: &SessionData) -> Result<Vec<u8>>;

    /// # Errors
    /// - `Error::Deserialization` if the payload is unreadable
    fn decode(&self, bytes: &[u8]) -> Result<SessionData>;
}

pub const MAGIC: &[u8; 4] = b"SSDB";
pub const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;

/// Default codec: magic + version byte + JSON body
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionedJsonCodec;

impl SessionCodec for VersionedJsonCodec {
    fn encode(&self, data: &SessionData) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        serde_json::to_writer(&mut out, data).map_err(|e| {
            Error::Serialization(format!("Failed to encode session '{}': {}", data.id, e))
        })?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<SessionData> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Deserialization(format!(
                "Payload too short: {} bytes",
                bytes.len()
            )));
        }

        let (header, body) = bytes.split_at(HEADER_LEN);
        if &header[..MAGIC.len()] != MAGIC {
            return Err(Error::Deserialization(
                "Payload does not start with the session envelope magic".to_string(),
            ));
        }

        match header[MAGIC.len()] {
            FORMAT_VERSION => serde_json::from_slice(body)
                .map_err(|e| Error::Deserialization(format!("Malformed session body: {}", e))),
            other => Err(Error::Deserialization(format!(
                "Unsupported payload version: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SessionData {
        let mut data = SessionData::new("abc", 1_700_000_000_000, 1_800_000)
            .with_context_path("/app")
            .with_vhost("0.0.0.0")
            .with_last_node("node0");
        data.set_attribute("one", &1).unwrap();
        data.set_attribute("two", &2).unwrap();
        data.set_attribute("profile", &json!({"name": "alice", "tags": ["a", "b"], "score": 1.5}))
            .unwrap();
        data
    }

    #[test]
    fn test_round_trip_preserves_attributes() {
        let codec = VersionedJsonCodec;
        let data = sample();
        let bytes = codec.encode(&data).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(bytes[4], FORMAT_VERSION);

        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(decoded.get_attribute::<i64>("one").unwrap(), Some(1));
        assert_eq!(decoded.get_attribute::<i64>("two").unwrap(), Some(2));
    }

    #[test]
    fn test_short_payload_rejected() {
        let err = VersionedJsonCodec.decode(b"SSD").unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let err = VersionedJsonCodec.decode(b"\xac\xed\x00\x05sr").unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = VersionedJsonCodec.encode(&sample()).unwrap();
        bytes[4] = 9;
        let err = VersionedJsonCodec.decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("Unsupported payload version: 9"));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let bytes = VersionedJsonCodec.encode(&sample()).unwrap();
        let err = VersionedJsonCodec.decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }
}
