//! JSON Codec using `serde_json`

use crate::traits::CacheCodec;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON Codec using `serde_json`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).context("failed to encode value as JSON")
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).context("cached payload is not valid JSON for the requested type")
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRecord;

    #[test]
    fn test_session_record_wire_layout() {
        let record = SessionRecord {
            subject_id: "u1".to_string(),
            display_name: "A".to_string(),
            email: "a@x.com".to_string(),
            role: "user".to_string(),
            email_verified: true,
            session_token: "tok".to_string(),
            created_at: 1_700_000_000,
        };

        let bytes = JsonCodec.serialize(&record).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["id"], "u1");
        assert_eq!(value["name"], "A");
        assert_eq!(value["email"], "a@x.com");
        assert_eq!(value["role"], "user");
        assert_eq!(value["verified_email"], true);
        assert_eq!(value["session_id"], "tok");
        assert_eq!(value["created_at"], 1_700_000_000);
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let result: Result<SessionRecord> = JsonCodec.deserialize(br#"{"id":"u1","na"#);
        assert!(result.is_err());
    }
}
