use async_trait::async_trait;
use bytes::Bytes;

use super::ServiceMessage;
use crate::error::RoutingError;

/// Отправка сообщений по шине узла.
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    /// Отправляет сообщение каждому узлу из `nodes`. Ошибка по одному узлу
    /// не мешает доставке остальным; возвращается первая ошибка.
    async fn send_service_message(
        &self,
        message: &ServiceMessage,
        nodes: &[String],
    ) -> Result<(), RoutingError>;

    /// Уведомление клиенту `actor` на платформе `platform`.
    async fn send_client_notification(
        &self,
        actor: &str,
        platform: &str,
        message: &ServiceMessage,
    ) -> Result<(), RoutingError>;

    /// Публикует данные в топик домашнего брокера.
    async fn publish_local(
        &self,
        topic: &str,
        _payload: Bytes,
    ) -> Result<(), RoutingError> {
        Err(RoutingError::SendFailed {
            node: topic.to_string(),
            reason: "local publishing is not supported".to_string(),
        })
    }
}
