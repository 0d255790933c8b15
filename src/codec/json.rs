//! JSON codec using `serde_json`.

use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Login {
        user: String,
        remember: bool,
    }

    #[test]
    fn test_struct_is_plain_json_object() {
        let login = Login {
            user: "kim".to_string(),
            remember: true,
        };
        let encoded = JsonCodec::encode(&login).unwrap();
        assert_eq!(encoded, br#"{"user":"kim","remember":true}"#);

        let decoded: Login = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, login);
    }

    #[test]
    fn test_decode_error_on_truncated_input() {
        let result: Result<Login> = JsonCodec::decode(br#"{"user":"ki"#);
        assert!(result.is_err());
    }
}
