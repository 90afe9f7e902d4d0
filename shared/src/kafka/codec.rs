//! Wire codec for [`MessageEnvelope`].
//!
//! The wire form is UTF-8 JSON with camelCase field names. Decoding never
//! hands back partially parsed data: anything that is not a complete, valid
//! envelope comes back as [`CodecError::Malformed`].

use super::types::MessageEnvelope;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

pub fn encode(envelope: &MessageEnvelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode(payload: &[u8]) -> Result<MessageEnvelope, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Malformed("empty payload".to_string()));
    }

    let envelope: MessageEnvelope =
        serde_json::from_slice(payload).map_err(|e| CodecError::Malformed(e.to_string()))?;

    envelope
        .validate()
        .map_err(|e| CodecError::Malformed(e.to_string()))?;

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::SenderIdentity;

    #[test]
    fn test_roundtrip_preserves_every_field() {
        let sender = SenderIdentity::new("u1", "Ann", "ann@example.com")
            .with_picture("https://example.com/ann.png");
        let envelope = MessageEnvelope::new("hello", &sender).unwrap();

        let decoded = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);

        let without_picture =
            MessageEnvelope::new("hi", &SenderIdentity::new("u2", "Bo", "bo@example.com")).unwrap();
        assert_eq!(decode(&encode(&without_picture).unwrap()).unwrap(), without_picture);
    }

    #[test]
    fn test_wire_field_names() {
        let envelope =
            MessageEnvelope::new("hello", &SenderIdentity::new("u1", "Ann", "a@x.io")).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();

        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["senderName"], "Ann");
        assert_eq!(json["content"], "hello");
        assert!(json.get("senderPicture").is_none());
        assert!(json["dedupKey"].is_string());
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(decode(b""), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(b"not json"), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(b"{\"content\":\"hi\"}"), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(&[0xff, 0xfe, 0x00]), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_structurally_valid_but_invalid_envelope_is_malformed() {
        let envelope =
            MessageEnvelope::new("hello", &SenderIdentity::new("u1", "Ann", "a@x.io")).unwrap();
        let mut json: serde_json::Value =
            serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();
        json["content"] = serde_json::Value::String(String::new());

        let err = decode(&serde_json::to_vec(&json).unwrap()).unwrap_err();
        assert_eq!(
            err,
            CodecError::Malformed("message content is empty".to_string())
        );
    }
}
