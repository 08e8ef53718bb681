use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора входящих данных. Не фатальны для endpoint: сообщение
/// логируется и отбрасывается.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame too short: {len} bytes")]
    FrameTooShort { len: usize },
    #[error("frame too long: {len} bytes")]
    FrameTooLong { len: usize },
    #[error("unexpected frame marker {found:02x?}")]
    BadMarker { found: [u8; 2] },
    #[error("unexpected frame separator {found:02x?}")]
    BadSeparator { found: [u8; 2] },
    /// Длина из префикса не совпадает с фактической.
    #[error("frame length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("topic is not valid UTF-8")]
    InvalidTopic,
    #[error("payload of '{topic}' is not valid UTF-8")]
    InvalidPayload { topic: String },
    #[error("malformed service message: {reason}")]
    MalformedMessage { reason: String },
    /// Входящий топик не совпал ни с одной подпиской.
    #[error("no channel open for topic '{topic}'")]
    UnmappedTopic { topic: String },
}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::FrameTooShort { .. }
            | Self::BadMarker { .. }
            | Self::BadSeparator { .. }
            | Self::LengthMismatch { .. } => StatusCode::InvalidFrame,
            Self::FrameTooLong { .. } => StatusCode::SizeLimit,
            Self::InvalidTopic | Self::InvalidPayload { .. } => StatusCode::InvalidUtf8,
            Self::MalformedMessage { .. } => StatusCode::DecodingError,
            Self::UnmappedTopic { .. } => StatusCode::UnmappedTopic,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::MalformedMessage { .. } => "Malformed service message".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что все кадровые ошибки попадают в диапазон 8xxx.
    #[test]
    fn test_all_protocol_range() {
        let errors = [
            ProtocolError::FrameTooShort { len: 1 },
            ProtocolError::BadMarker { found: [0, 0] },
            ProtocolError::InvalidTopic,
            ProtocolError::InvalidPayload { topic: "a".into() },
            ProtocolError::UnmappedTopic { topic: "x".into() },
        ];
        for e in errors {
            assert_eq!(e.status_code().family(), "protocol", "{e}");
        }
    }

    /// Тест проверяет, что детали разбора не уходят наружу.
    #[test]
    fn test_client_message_hides_reason() {
        let e = ProtocolError::MalformedMessage {
            reason: "expected value at line 1".into(),
        };
        assert_eq!(e.client_message(), "Malformed service message");
    }
}
