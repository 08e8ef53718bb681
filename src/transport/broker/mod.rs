//! Клиент брокера публикаций/подписок.
//!
//! Endpoint работает с брокером только через [`BrokerClient`]. Входящие
//! сообщения и потеря соединения приходят событиями [`BrokerEvent`] в канал,
//! который endpoint передаёт при каждом подключении.

pub mod loopback;
pub mod mqtt;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fabric_error::TransportError;
use tokio::sync::mpsc;

pub use loopback::{LoopbackBroker, LoopbackClient};
pub use mqtt::MqttBroker;

use super::BrokerQos;

/// Сообщение, которое брокер опубликует при обрыве соединения клиента.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: BrokerQos,
    pub retain: bool,
}

/// Параметры одного подключения.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub last_will: Option<LastWill>,
}

impl ConnectOptions {
    /// `host:port` для логов и ошибок.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Событие от брокера.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Message { topic: String, payload: Bytes },
    ConnectionLost { reason: String },
}

pub type EventSender = mpsc::UnboundedSender<BrokerEvent>;

/// Физическое соединение с брокером.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Одна попытка подключения. Повторы выполняет endpoint.
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSender,
    ) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        topic: &str,
        qos: BrokerQos,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(
        &self,
        topic: &str,
    ) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: BrokerQos,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Штатное отключение: last will не публикуется.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
