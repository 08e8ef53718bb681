use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use fabric_error::TransportError;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{BrokerClient, BrokerEvent, ConnectOptions, EventSender, LastWill};
use crate::transport::{topic, BrokerQos};

/// Внутрипроцессный брокер.
///
/// Поддерживает:
/// - сессии по идентификатору клиента;
/// - подписки с `+` и `#`;
/// - retained-сообщения;
/// - публикацию last will при обрыве соединения;
/// - управляемую недоступность (для проверки повторов подключения).
pub struct LoopbackBroker {
    /// Идентификатор клиента → сессия
    sessions: DashMap<String, Session>,
    /// Топик → последнее retained-сообщение
    retained: DashMap<String, Bytes>,
    /// `false` — все попытки подключения отклоняются
    reachable: AtomicBool,
    /// Сколько следующих попыток подключения отклонить
    failures_remaining: AtomicUsize,
    /// Общее количество попыток подключения
    connect_attempts: AtomicUsize,
    /// Общее количество вызовов `publish`
    pub publish_count: AtomicUsize,
    /// Количество неудачных доставок (клиент уже не слушает)
    pub send_error_count: AtomicUsize,
}

struct Session {
    events: EventSender,
    subscriptions: Vec<String>,
    will: Option<LastWill>,
}

impl LoopbackBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            retained: DashMap::new(),
            reachable: AtomicBool::new(true),
            failures_remaining: AtomicUsize::new(0),
            connect_attempts: AtomicUsize::new(0),
            publish_count: AtomicUsize::new(0),
            send_error_count: AtomicUsize::new(0),
        })
    }

    /// Новый клиент этого брокера.
    pub fn client(self: &Arc<Self>) -> LoopbackClient {
        LoopbackClient {
            broker: Arc::clone(self),
            client_id: Mutex::new(None),
        }
    }

    pub fn set_reachable(
        &self,
        reachable: bool,
    ) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Отклонить следующие `count` попыток подключения.
    pub fn fail_next_connects(
        &self,
        count: usize,
    ) {
        self.failures_remaining.store(count, Ordering::Release);
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::Acquire)
    }

    pub fn is_connected(
        &self,
        client_id: &str,
    ) -> bool {
        self.sessions.contains_key(client_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Активные подписки клиента.
    pub fn subscriptions(
        &self,
        client_id: &str,
    ) -> Vec<String> {
        self.sessions
            .get(client_id)
            .map(|s| s.subscriptions.clone())
            .unwrap_or_default()
    }

    pub fn retained(
        &self,
        topic: &str,
    ) -> Option<Bytes> {
        self.retained.get(topic).map(|r| r.value().clone())
    }

    /// Обрывает соединение клиента: публикует его last will и сообщает
    /// клиенту о потере связи.
    pub fn drop_connection(
        &self,
        client_id: &str,
    ) -> bool {
        let Some((_, session)) = self.sessions.remove(client_id) else {
            return false;
        };
        if let Some(will) = session.will {
            self.route(&will.topic, will.payload, will.retain);
        }
        let _ = session.events.send(BrokerEvent::ConnectionLost {
            reason: "connection dropped by broker".to_string(),
        });
        debug!(client_id, "loopback connection dropped");
        true
    }

    /// Публикация от имени брокера (или клиента).
    pub fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        retain: bool,
    ) {
        self.route(topic, payload, retain);
    }

    fn route(
        &self,
        topic_name: &str,
        payload: Bytes,
        retain: bool,
    ) {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        if retain {
            if payload.is_empty() {
                self.retained.remove(topic_name);
            } else {
                self.retained.insert(topic_name.to_string(), payload.clone());
            }
        }

        for session in self.sessions.iter() {
            let subscribed = session
                .subscriptions
                .iter()
                .any(|pattern| topic::matches(pattern, topic_name));
            if !subscribed {
                continue;
            }
            let event = BrokerEvent::Message {
                topic: topic_name.to_string(),
                payload: payload.clone(),
            };
            if session.events.send(event).is_err() {
                self.send_error_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn try_connect(&self) -> bool {
        self.connect_attempts.fetch_add(1, Ordering::AcqRel);
        if !self.reachable.load(Ordering::Acquire) {
            return false;
        }
        self.failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
    }
}

/// Клиент [`LoopbackBroker`].
pub struct LoopbackClient {
    broker: Arc<LoopbackBroker>,
    client_id: Mutex<Option<String>>,
}

impl LoopbackClient {
    pub fn broker(&self) -> &Arc<LoopbackBroker> {
        &self.broker
    }

    fn session_id(&self) -> Result<String, TransportError> {
        self.client_id
            .lock()
            .clone()
            .filter(|id| self.broker.is_connected(id))
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl BrokerClient for LoopbackClient {
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: EventSender,
    ) -> Result<(), TransportError> {
        if !self.broker.try_connect() {
            return Err(TransportError::ConnectFailed {
                address: options.address(),
                reason: "broker unreachable".to_string(),
            });
        }

        // повторное подключение с тем же id вытесняет старую сессию
        let subscriptions = match self.broker.sessions.remove(&options.client_id) {
            Some((_, old)) if !options.clean_session => old.subscriptions,
            _ => Vec::new(),
        };
        self.broker.sessions.insert(
            options.client_id.clone(),
            Session {
                events,
                subscriptions,
                will: options.last_will.clone(),
            },
        );
        *self.client_id.lock() = Some(options.client_id.clone());
        trace!(client_id = %options.client_id, "loopback client connected");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic_name: &str,
        _qos: BrokerQos,
    ) -> Result<(), TransportError> {
        let id = self.session_id()?;
        let events = {
            let mut session = self
                .broker
                .sessions
                .get_mut(&id)
                .ok_or(TransportError::NotConnected)?;
            if !session.subscriptions.iter().any(|s| s == topic_name) {
                session.subscriptions.push(topic_name.to_string());
            }
            session.events.clone()
        };

        for retained in self.broker.retained.iter() {
            if topic::matches(topic_name, retained.key()) {
                let _ = events.send(BrokerEvent::Message {
                    topic: retained.key().clone(),
                    payload: retained.value().clone(),
                });
            }
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic_name: &str,
    ) -> Result<(), TransportError> {
        let id = self.session_id()?;
        if let Some(mut session) = self.broker.sessions.get_mut(&id) {
            session.subscriptions.retain(|s| s != topic_name);
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic_name: &str,
        payload: Bytes,
        _qos: BrokerQos,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.session_id().map_err(|_| TransportError::PublishFailed {
            topic: topic_name.to_string(),
            reason: "not connected".to_string(),
        })?;
        self.broker.route(topic_name, payload, retain);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(id) = self.client_id.lock().take() {
            self.broker.sessions.remove(&id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{sync::mpsc, time::timeout};

    use super::*;

    fn options(id: &str) -> ConnectOptions {
        ConnectOptions {
            client_id: id.to_string(),
            host: "loopback".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            last_will: None,
        }
    }

    /// Проверяет доставку по шаблону подписки.
    #[tokio::test]
    async fn test_publish_reaches_wildcard_subscriber() {
        let broker = LoopbackBroker::new();
        let client = broker.client();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.connect(&options("c1"), tx).await.unwrap();
        client.subscribe("a/+", BrokerQos::AtLeastOnce).await.unwrap();

        broker.publish("a/b", Bytes::from_static(b"x"), false);
        broker.publish("z/b", Bytes::from_static(b"y"), false);

        let ev = timeout(Duration::from_millis(50), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match ev {
            BrokerEvent::Message { topic, payload } => {
                assert_eq!(topic, "a/b");
                assert_eq!(payload, Bytes::from_static(b"x"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.publish_count.load(Ordering::Relaxed), 2);
    }

    /// Проверяет, что новая подписка получает retained-сообщение.
    #[tokio::test]
    async fn test_retained_delivered_on_subscribe() {
        let broker = LoopbackBroker::new();
        broker.publish("status/n1", Bytes::from_static(b"1"), true);

        let client = broker.client();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.connect(&options("c2"), tx).await.unwrap();
        client.subscribe("status/#", BrokerQos::AtLeastOnce).await.unwrap();

        let ev = rx.try_recv().unwrap();
        assert!(matches!(ev, BrokerEvent::Message { ref topic, .. } if topic == "status/n1"));
    }

    /// Проверяет публикацию last will и событие потери связи при обрыве.
    #[tokio::test]
    async fn test_drop_connection_publishes_will() {
        let broker = LoopbackBroker::new();
        let client = broker.client();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut opts = options("c3");
        opts.last_will = Some(LastWill {
            topic: "status/c3".to_string(),
            payload: Bytes::from_static(b"0"),
            qos: BrokerQos::AtLeastOnce,
            retain: false,
        });
        client.connect(&opts, tx).await.unwrap();

        assert!(broker.drop_connection("c3"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            BrokerEvent::ConnectionLost { .. }
        ));
        assert!(!broker.is_connected("c3"));
        assert!(client.subscribe("x", BrokerQos::AtMostOnce).await.is_err());
    }

    /// Проверяет отказ в подключении и счётчик попыток.
    #[tokio::test]
    async fn test_unreachable_and_failure_budget() {
        let broker = LoopbackBroker::new();
        let client = broker.client();

        broker.set_reachable(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(client.connect(&options("c4"), tx.clone()).await.is_err());

        broker.set_reachable(true);
        broker.fail_next_connects(1);
        assert!(client.connect(&options("c4"), tx.clone()).await.is_err());
        assert!(client.connect(&options("c4"), tx).await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
    }
}
