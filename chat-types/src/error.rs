//! Error types for the Parley wire protocol.

use thiserror::Error;

/// Errors raised while decoding or encoding channel traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An inbound frame was not valid JSON or not a known event.
    #[error("malformed event frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// An outbound event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    /// A message record was structurally valid JSON but semantically broken.
    #[error("invalid message record: {0}")]
    InvalidMessage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidMessage("text message without content".into());
        assert_eq!(
            err.to_string(),
            "invalid message record: text message without content"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
