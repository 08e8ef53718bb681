use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use fabric_error::TransportError;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrokerClient, BrokerEvent, ConnectOptions, EventSender};
use crate::transport::BrokerQos;

/// Ёмкость очереди запросов `rumqttc`.
const REQUEST_CAPACITY: usize = 64;
/// Сколько ждать CONNACK.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Сколько ждать отправки DISCONNECT при штатном закрытии.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Клиент MQTT-брокера поверх `rumqttc`.
///
/// Каждое подключение создаёт новый `AsyncClient` и задачу, опрашивающую
/// его `EventLoop`. Первая ошибка цикла сообщается как потеря соединения;
/// переподключением управляет endpoint.
#[derive(Default)]
pub struct MqttBroker {
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    client: AsyncClient,
    poller: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

impl MqttBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.client.clone())
            .ok_or(TransportError::NotConnected)
    }

    fn mqtt_options(options: &ConnectOptions) -> MqttOptions {
        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(options.clean_session);
        if let Some(will) = &options.last_will {
            mqtt.set_last_will(rumqttc::LastWill::new(
                &will.topic,
                will.payload.to_vec(),
                will.qos.into(),
                will.retain,
            ));
        }
        mqtt
    }

    async fn await_connack(
        event_loop: &mut EventLoop,
        address: &str,
    ) -> Result<(), TransportError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => {
                    return Err(TransportError::ConnectFailed {
                        address: address.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    fn spawn_poller(
        mut event_loop: EventLoop,
        events: EventSender,
        closing: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let event = BrokerEvent::Message {
                            topic: publish.topic,
                            payload: publish.payload,
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        if !closing.load(Ordering::Acquire) {
                            warn!(error = %e, "mqtt event loop failed");
                            let _ = events.send(BrokerEvent::ConnectionLost {
                                reason: e.to_string(),
                            });
                        }
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSender,
    ) -> Result<(), TransportError> {
        let address = options.address();
        let (client, mut event_loop) =
            AsyncClient::new(Self::mqtt_options(options), REQUEST_CAPACITY);

        tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            Self::await_connack(&mut event_loop, &address),
        )
        .await
        .map_err(|_| TransportError::ConnectFailed {
            address: address.clone(),
            reason: "timed out waiting for CONNACK".to_string(),
        })??;

        let closing = Arc::new(AtomicBool::new(false));
        let poller = Self::spawn_poller(event_loop, events, Arc::clone(&closing));
        let previous = self.connection.lock().replace(Connection {
            client,
            poller,
            closing,
        });
        if let Some(old) = previous {
            old.closing.store(true, Ordering::Release);
            old.poller.abort();
        }

        info!(%address, client_id = %options.client_id, "connected to mqtt broker");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: BrokerQos,
    ) -> Result<(), TransportError> {
        self.client()?
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(
        &self,
        topic: &str,
    ) -> Result<(), TransportError> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::UnsubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: BrokerQos,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, qos.into(), retain, payload.to_vec())
            .await
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(connection) = self.connection.lock().take() else {
            return Ok(());
        };
        connection.closing.store(true, Ordering::Release);

        let result = connection.client.disconnect().await;
        let mut poller = connection.poller;
        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut poller)
            .await
            .is_err()
        {
            debug!("mqtt event loop did not stop in time; aborting");
            poller.abort();
        }

        result.map_err(|e| TransportError::PublishFailed {
            topic: "$disconnect".to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::broker::LastWill;

    /// Тест проверяет, что опции подключения переносятся в `MqttOptions`.
    #[test]
    fn test_mqtt_options_mapping() {
        let options = ConnectOptions {
            client_id: "fab-node".to_string(),
            host: "10.0.0.1".to_string(),
            port: 1884,
            keep_alive: Duration::from_secs(60),
            clean_session: false,
            last_will: Some(LastWill {
                topic: "$fabric/n1/status".to_string(),
                payload: Bytes::from_static(b"0"),
                qos: BrokerQos::ExactlyOnce,
                retain: false,
            }),
        };
        let mqtt = MqttBroker::mqtt_options(&options);
        assert_eq!(mqtt.client_id(), "fab-node");
        assert_eq!(mqtt.broker_address(), ("10.0.0.1".to_string(), 1884));
        assert_eq!(mqtt.keep_alive(), Duration::from_secs(60));
        assert!(!mqtt.clean_session());
        let will = mqtt.last_will().unwrap();
        assert_eq!(will.topic, "$fabric/n1/status");
    }

    /// Тест проверяет операции без подключения.
    #[tokio::test]
    async fn test_operations_require_connection() {
        let broker = MqttBroker::new();
        assert_eq!(
            broker.subscribe("a", BrokerQos::AtMostOnce).await,
            Err(TransportError::NotConnected)
        );
        assert!(broker.disconnect().await.is_ok());
    }
}
