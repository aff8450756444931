// Inbound message decoding
//
// The loader only needs a tagged envelope; how raw frames become envelopes is
// up to the decoder. `JsonDecoder` handles the JSON text envelope the log
// server speaks:
// {
//   "type": "timeslice",          // or "xviz/timeslice", "metadata", "done", ...
//   "data": { "timestamp": 12.5, "streams": { ... } }
// }
// A message without "data" is read from its top level instead.

use crate::types::{Envelope, LoaderError, LoaderResult, LogMetadata, RawMessage, Timeslice};
use serde_json::Value;
use std::sync::Arc;

/// Turns a raw frame into a tagged envelope
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, message: &RawMessage) -> LoaderResult<Envelope>;
}

#[derive(Debug, Default, Clone)]
pub struct JsonDecoder;

impl JsonDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_value(&self, mut value: Value) -> LoaderResult<Envelope> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| LoaderError::Protocol("message has no type tag".to_string()))?
            .to_string();

        let nested = value.get("data").is_some_and(Value::is_object);
        let body = if nested { value["data"].take() } else { value };

        let kind = tag.strip_prefix("xviz/").unwrap_or(&tag);
        match kind {
            "metadata" => {
                let metadata: LogMetadata = serde_json::from_value(body)
                    .map_err(|e| LoaderError::Protocol(format!("invalid metadata: {}", e)))?;
                Ok(Envelope::Metadata(Arc::new(metadata)))
            }
            "timeslice" | "state_update" => {
                let timeslice: Timeslice = serde_json::from_value(body)
                    .map_err(|e| LoaderError::Protocol(format!("invalid timeslice: {}", e)))?;
                if !timeslice.timestamp.is_finite() {
                    return Err(LoaderError::Protocol(
                        "timeslice timestamp is not finite".to_string(),
                    ));
                }
                Ok(Envelope::Timeslice(Arc::new(timeslice)))
            }
            "done" => Ok(Envelope::Done),
            _ => Ok(Envelope::Unknown { tag }),
        }
    }
}

impl MessageDecoder for JsonDecoder {
    fn decode(&self, message: &RawMessage) -> LoaderResult<Envelope> {
        let value: Value = match message {
            RawMessage::Text(text) => serde_json::from_str(text),
            RawMessage::Binary(bytes) => serde_json::from_slice(bytes),
        }
        .map_err(|e| LoaderError::Protocol(format!("invalid JSON: {}", e)))?;

        self.decode_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> LoaderResult<Envelope> {
        JsonDecoder::new().decode(&RawMessage::Text(text.to_string()))
    }

    #[test]
    fn test_decode_metadata_with_prefix() {
        let envelope = decode(
            r#"{"type": "xviz/metadata", "data": {"start_time": 0, "end_time": 100, "streams": {"/lidar": {}}}}"#,
        )
        .unwrap();
        match envelope {
            Envelope::Metadata(metadata) => {
                assert_eq!(metadata.start_time, Some(0.0));
                assert_eq!(metadata.end_time, Some(100.0));
                assert!(metadata.streams.contains_key("/lidar"));
            }
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[test]
    fn test_decode_flat_timeslice() {
        let envelope = decode(r#"{"type": "timeslice", "timestamp": 1.5, "request_id": 3}"#).unwrap();
        match envelope {
            Envelope::Timeslice(slice) => {
                assert_eq!(slice.timestamp, 1.5);
                assert_eq!(slice.request_id, Some(3));
            }
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[test]
    fn test_decode_binary_done_and_unknown() {
        let decoder = JsonDecoder::new();
        assert_eq!(
            decoder
                .decode(&RawMessage::Binary(br#"{"type":"xviz/done"}"#.to_vec()))
                .unwrap(),
            Envelope::Done
        );
        assert_eq!(
            decode(r#"{"type": "xviz/reconfigure"}"#).unwrap(),
            Envelope::Unknown {
                tag: "xviz/reconfigure".to_string()
            }
        );
    }

    #[test]
    fn test_only_xviz_prefix_is_stripped() {
        assert_eq!(
            decode(r#"{"type": "foo/metadata", "data": {}}"#).unwrap(),
            Envelope::Unknown {
                tag: "foo/metadata".to_string()
            }
        );
        assert_eq!(decode(r#"{"type": "done"}"#).unwrap(), Envelope::Done);
    }

    #[test]
    fn test_decode_failures_are_protocol_errors() {
        assert!(matches!(decode("not json"), Err(LoaderError::Protocol(_))));
        assert!(matches!(decode(r#"{"data": {}}"#), Err(LoaderError::Protocol(_))));
        assert!(matches!(
            decode(r#"{"type": "timeslice", "data": {"streams": {}}}"#),
            Err(LoaderError::Protocol(_))
        ));
    }
}
