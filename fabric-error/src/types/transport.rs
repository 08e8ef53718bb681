use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспортного уровня: подключение к брокеру, публикация,
/// подписка, датаграммный канал.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Одна попытка подключения не удалась.
    #[error("connection to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },
    /// Бюджет повторных попыток исчерпан.
    #[error("connection retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("subscribe to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
    #[error("unsubscribe from '{topic}' failed: {reason}")]
    UnsubscribeFailed { topic: String, reason: String },
    /// Ошибка датаграммного (облегчённого) канала.
    #[error("datagram transport failed: {reason}")]
    DatagramFailed { reason: String },
    #[error("endpoint is not connected to the broker")]
    NotConnected,
    /// Буфер канала закрыт, читать больше нечего.
    #[error("channel buffer is closed")]
    ChannelClosed,
}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectFailed { .. } => StatusCode::ConnectionFailed,
            Self::RetriesExhausted { .. } => StatusCode::RetriesExhausted,
            Self::PublishFailed { .. } => StatusCode::PublishFailed,
            Self::SubscribeFailed { .. } | Self::UnsubscribeFailed { .. } => {
                StatusCode::SubscribeFailed
            }
            Self::DatagramFailed { .. } => StatusCode::DatagramFailed,
            Self::NotConnected => StatusCode::NotConnected,
            Self::ChannelClosed => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "transport".to_string()),
            ("status_code", self.status_code().code().to_string()),
        ];
        match self {
            Self::PublishFailed { topic, .. }
            | Self::SubscribeFailed { topic, .. }
            | Self::UnsubscribeFailed { topic, .. } => tags.push(("topic", topic.clone())),
            Self::ConnectFailed { address, .. } => tags.push(("address", address.clone())),
            Self::RetriesExhausted { attempts } => tags.push(("attempts", attempts.to_string())),
            _ => {}
        }
        tags
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotConnected => Self::NotConnected,
            _ => Self::DatagramFailed {
                reason: err.to_string(),
            },
        }
    }
}
