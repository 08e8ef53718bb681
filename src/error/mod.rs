use std::any::Any;

use thiserror::Error;

pub use fabric_error::{
    ErrorExt, ProtocolError, RoutingError, StateError, StatusCode, TransportError,
};

pub type FabricResult<T> = Result<T, FabricError>;

/// Общая ошибка библиотеки: одно из семейств ошибок или ошибка настройки.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for FabricError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl FabricError {
    /// Повторяемая ли ошибка (по статус-коду).
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_retryable()
    }
}

impl ErrorExt for FabricError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Transport(e) => e.status_code(),
            Self::Protocol(e) => e.status_code(),
            Self::Routing(e) => e.status_code(),
            Self::State(e) => e.status_code(),
            Self::Config(_) => StatusCode::InvalidConfig,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Transport(e) => e.metrics_tags(),
            Self::Protocol(e) => e.metrics_tags(),
            Self::Routing(e) => e.metrics_tags(),
            Self::State(e) => e.metrics_tags(),
            Self::Config(_) => vec![
                ("error_type", "config".to_string()),
                ("status_code", self.status_code().code().to_string()),
            ],
        }
    }
}
