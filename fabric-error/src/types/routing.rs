use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки пересылки сообщения конкретному узлу. Логируются по каждому узлу
/// и не прерывают доставку остальным.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no connection to node '{node}'")]
    NoConnection { node: String },
    #[error("send to node '{node}' failed: {reason}")]
    SendFailed { node: String, reason: String },
    #[error("cannot encode service message: {reason}")]
    Encode { reason: String },
}

impl RoutingError {
    /// Узел, которому не удалось доставить сообщение.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NoConnection { node } | Self::SendFailed { node, .. } => Some(node),
            Self::Encode { .. } => None,
        }
    }
}

impl ErrorExt for RoutingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NoConnection { .. } => StatusCode::NoConnection,
            Self::SendFailed { .. } => StatusCode::ForwardFailed,
            Self::Encode { .. } => StatusCode::EncodingError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "routing".to_string()),
            ("status_code", self.status_code().code().to_string()),
        ];
        if let Some(node) = self.node() {
            tags.push(("node", node.to_string()));
        }
        tags
    }
}
