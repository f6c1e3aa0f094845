//! Codec trait and the JSON implementation used for output batches.
//!
//! The transport boundary never touches serde directly: it hands a batch
//! of [`OutputEvent`](crate::OutputEvent)s to a [`Codec`] and writes the
//! resulting bytes, and decodes request bodies the same way.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// request task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// An empty body decodes as JSON `{}` so that endpoints whose request
    /// types are all-optional accept a bare POST.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what the browser client speaks natively, so this is the only
/// codec the server ships with.
///
/// ```rust
/// use tether_protocol::{Codec, JsonCodec, LinkStatus, OutputEvent};
///
/// let bytes = JsonCodec
///     .encode(&vec![OutputEvent::LinkStatus(LinkStatus::Good)])
///     .unwrap();
/// assert_eq!(bytes, br#"[{"link_status":"good"}]"#);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        let data = if data.iter().all(u8::is_ascii_whitespace) {
            b"{}".as_slice()
        } else {
            data
        };
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionRequest, ConnectRequest, PlayerId, ServiceRequest};

    #[test]
    fn test_decode_empty_body_as_empty_object() {
        let req: ConnectRequest = JsonCodec.decode(b"").unwrap();
        assert_eq!(req.player_id, None);
    }

    #[test]
    fn test_decode_connect_with_player() {
        let req: ConnectRequest = JsonCodec.decode(br#"{"player_id":"Ayla"}"#).unwrap();
        assert_eq!(req.player_id, Some(PlayerId::new("ayla")));
    }

    #[test]
    fn test_decode_missing_required_field_fails() {
        let result: Result<ActionRequest, _> = JsonCodec.decode(b"");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_service_request_data_optional() {
        let req: ServiceRequest = JsonCodec.decode(br#"{"service_id":"player_list"}"#).unwrap();
        assert_eq!(req.service_id, "player_list");
        assert_eq!(req.data, None);

        let req: ServiceRequest = JsonCodec
            .decode(br#"{"service_id":"editor","data":{"area":"docks"}}"#)
            .unwrap();
        assert_eq!(req.data, Some(serde_json::json!({"area": "docks"})));
    }

    #[test]
    fn test_decode_malformed_json_fails() {
        let result: Result<ConnectRequest, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
