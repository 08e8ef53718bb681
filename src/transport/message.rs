use std::{sync::Arc, time::SystemTime};

use bytes::Bytes;

use super::MessageQos;

/// Сообщение, принятое каналом.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// Фактический топик (не шаблон подписки).
    pub topic: Arc<str>,
    pub payload: Bytes,
    /// Путь, которым сообщение пришло.
    pub qos: MessageQos,
    pub received_at: SystemTime,
}

impl ChannelMessage {
    pub fn new(
        topic: impl AsRef<str>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::with_topic(Arc::from(topic.as_ref()), payload)
    }

    /// Сообщение с уже разделяемым именем топика.
    pub fn with_topic(
        topic: Arc<str>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic,
            payload: payload.into(),
            qos: MessageQos::Reliable,
            received_at: SystemTime::now(),
        }
    }

    pub fn with_qos(
        mut self,
        qos: MessageQos,
    ) -> Self {
        self.qos = qos;
        self
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет создание сообщения из `&str` и статических байт.
    #[test]
    fn test_message_creation() {
        let msg = ChannelMessage::new("a/b", Bytes::from_static(b"hello"));
        assert_eq!(&*msg.topic, "a/b");
        assert_eq!(msg.len(), 5);
        assert_eq!(msg.qos, MessageQos::Reliable);
    }

    /// Тест проверяет пустую полезную нагрузку и пометку датаграммного пути.
    #[test]
    fn test_empty_payload_best_effort() {
        let msg = ChannelMessage::new("a", Vec::new()).with_qos(MessageQos::BestEffort);
        assert!(msg.is_empty());
        assert_eq!(msg.qos, MessageQos::BestEffort);
    }
}
