use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий интерфейс ошибок фабрики.
///
/// Статус-код определяет, повторяется ли операция и что можно сообщить
/// другому узлу в уведомлении.
pub trait ErrorExt: Error + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    fn as_any(&self) -> &dyn Any;

    /// Текст для уведомления другому узлу. Внутренние ошибки не
    /// раскрываются.
    fn client_message(&self) -> String {
        if self.status_code().is_internal() {
            return "internal fabric error".to_string();
        }
        self.to_string()
    }

    /// Поля для структурированного лога: семейство и код.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let family = self.status_code().family();
        vec![
            ("error_type", family.to_string()),
            ("status_code", self.status_code().code().to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RoutingError, StateError, TransportError};

    #[derive(Debug, thiserror::Error)]
    #[error("broker handle poisoned at 0x7f00")]
    struct Opaque;

    impl ErrorExt for Opaque {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Тест проверяет, что внутренние ошибки не попадают в уведомления.
    #[test]
    fn test_client_message_hides_internal() {
        assert_eq!(Opaque.status_code(), StatusCode::Internal);
        assert_eq!(Opaque.client_message(), "internal fabric error");

        let e = RoutingError::NoConnection {
            node: "n7".to_string(),
        };
        assert_eq!(e.client_message(), e.to_string());
    }

    /// Тест проверяет теги: семейство по диапазону и числовой код.
    #[test]
    fn test_metrics_tags() {
        let tags = StateError::CallbacksRegistered.metrics_tags();
        assert_eq!(tags[0], ("error_type", "state".to_string()));
        assert_eq!(tags[1], ("status_code", "2003".to_string()));

        let tags = TransportError::NotConnected.metrics_tags();
        assert_eq!(tags[0].1, "transport");
    }

    /// Тест проверяет downcast через `as_any`.
    #[test]
    fn test_downcast() {
        let err: Box<dyn ErrorExt> = Box::new(TransportError::NotConnected);
        assert!(err.as_any().downcast_ref::<TransportError>().is_some());
        assert!(err.as_any().downcast_ref::<StateError>().is_none());
    }
}
