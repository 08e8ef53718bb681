use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки неверного использования API. Возвращаются вызывающему сразу и
/// никогда не повторяются автоматически.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Синхронное чтение при зарегистрированных callback'ах.
    #[error("channel is in callback mode; synchronous read is not allowed")]
    CallbacksRegistered,
    #[error("channel has no input topic; cannot read")]
    NoInputTopic,
    #[error("no output topic; cannot publish message")]
    NoOutputTopic,
    #[error("endpoint is already connected")]
    AlreadyConnected,
    #[error("endpoint is closed")]
    EndpointClosed,
    /// Исполнитель канала остановлен, задача отклонена.
    #[error("executor is shut down; task rejected")]
    ExecutorShutdown,
    #[error("no async runtime available to run channel callbacks")]
    NoRuntime,
    #[error("unknown service '{name}'")]
    UnknownService { name: String },
}

impl ErrorExt for StateError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::CallbacksRegistered => StatusCode::ReadModeConflict,
            Self::NoInputTopic | Self::NoOutputTopic => StatusCode::MissingTopic,
            Self::AlreadyConnected => StatusCode::AlreadyConnected,
            Self::EndpointClosed => StatusCode::EndpointClosed,
            Self::ExecutorShutdown => StatusCode::Rejected,
            Self::NoRuntime => StatusCode::InvalidState,
            Self::UnknownService { .. } => StatusCode::UnknownService,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_errors_are_not_retryable() {
        for e in [
            StateError::CallbacksRegistered,
            StateError::NoInputTopic,
            StateError::NoOutputTopic,
            StateError::ExecutorShutdown,
        ] {
            assert!(e.status_code().is_state_error(), "{e}");
            assert!(!e.status_code().is_retryable(), "{e}");
        }
    }
}
