use std::{
    fmt,
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::{
    broker::{BrokerClient, BrokerEvent, ConnectOptions, LastWill},
    connectivity::ListenerRegistry,
    frame, topic, BrokerQos, Channel, ChannelMessage, ConnectivityEvent, ConnectivityListener,
    EndpointIdentity, MessageQos, Registration, TopicInterner,
};
use crate::error::{FabricResult, StateError, TransportError};

/// Префикс сгенерированного идентификатора клиента.
const CLIENT_ID_PREFIX: &str = "fab-";
/// Предел длины идентификатора клиента в протоколе брокера.
const MAX_CLIENT_ID_LEN: usize = 23;
/// Сколько раз предложить сообщение каналу, отказавшему в приёме.
const DELIVERY_ATTEMPTS: usize = 3;
const DELIVERY_BACKOFF: Duration = Duration::from_millis(10);
/// Наибольшая датаграмма, которую принимает приёмник.
const MAX_DATAGRAM_LEN: usize = u16::MAX as usize;

/// Параметры одного физического соединения.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    /// `None` — сгенерировать.
    pub client_id: Option<String>,
    pub broker_qos: BrokerQos,
    pub default_message_qos: MessageQos,
    pub clean_session: bool,
    pub retain: bool,
    pub keep_alive: Duration,
    /// Число повторов после первой попытки. `None` — без ограничения.
    pub connect_retries: Option<u32>,
    pub retry_interval: Duration,
    pub subscribe_retry_interval: Duration,
    /// Топик объявления о подключении и last will.
    pub connection_topic: Option<String>,
    pub connect_message: Bytes,
    pub disconnect_message: Bytes,
    pub datagram_enabled: bool,
    /// `None` — порт брокера.
    pub datagram_port: Option<u16>,
    /// Порог длины кадра для датаграммного пути.
    pub max_datagram_payload: usize,
    /// Ёмкость буфера канала, `0` — без ограничения.
    pub buffer_limit: usize,
    pub callback_workers: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            broker_qos: BrokerQos::ExactlyOnce,
            default_message_qos: MessageQos::Reliable,
            clean_session: true,
            retain: false,
            keep_alive: Duration::from_secs(60),
            connect_retries: Some(3),
            retry_interval: Duration::from_millis(1000),
            subscribe_retry_interval: Duration::from_millis(5000),
            connection_topic: None,
            connect_message: Bytes::from_static(b"1"),
            disconnect_message: Bytes::from_static(b"0"),
            datagram_enabled: false,
            datagram_port: None,
            max_datagram_payload: 500,
            buffer_limit: 0,
            callback_workers: 1,
        }
    }
}

impl EndpointConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}

/// Идентификатор клиента: префикс + uuid, не длиннее 23 символов.
pub fn generate_client_id() -> String {
    let mut id = format!("{CLIENT_ID_PREFIX}{}", Uuid::new_v4().simple());
    id.truncate(MAX_CLIENT_ID_LEN);
    id
}

/// Состояние жизненного цикла endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Created,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
    /// Повторы исчерпаны. Endpoint нужно пересоздать.
    Lost,
}

impl EndpointState {
    fn is_terminal(self) -> bool {
        matches!(self, EndpointState::Closed | EndpointState::Lost)
    }
}

/// Снимок счётчиков endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub published: u64,
    pub datagrams_sent: u64,
    pub received: u64,
    pub rejected: u64,
    pub unmatched: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    datagrams_sent: AtomicU64,
    received: AtomicU64,
    rejected: AtomicU64,
    unmatched: AtomicU64,
}

struct DatagramPath {
    socket: Arc<UdpSocket>,
    gateway: SocketAddr,
    receiver: JoinHandle<()>,
}

/// Одно физическое соединение с брокером.
///
/// Владеет каналами, политикой повторов и переподключения, объявлением о
/// подключении и датаграммным путём. Клонирование дёшево: все копии
/// разделяют одно соединение.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

pub(crate) struct EndpointInner {
    config: EndpointConfig,
    identity: EndpointIdentity,
    broker: Arc<dyn BrokerClient>,
    state: Mutex<EndpointState>,
    channels: DashMap<u64, Arc<Channel>>,
    next_channel_id: AtomicU64,
    listeners: Arc<ListenerRegistry>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    datagram: Mutex<Option<DatagramPath>>,
    counters: Counters,
    topics: TopicInterner,
}

impl Endpoint {
    pub fn new(
        config: EndpointConfig,
        broker: Arc<dyn BrokerClient>,
    ) -> Self {
        Self::build(config, broker, None, None)
    }

    /// Endpoint для соединения с соседним узлом через заданный интерфейс.
    pub fn for_neighbour(
        config: EndpointConfig,
        broker: Arc<dyn BrokerClient>,
        node: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self::build(config, broker, Some(node.into()), Some(interface.into()))
    }

    fn build(
        config: EndpointConfig,
        broker: Arc<dyn BrokerClient>,
        node: Option<String>,
        interface: Option<String>,
    ) -> Self {
        let client_id = config
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_client_id);
        let identity = EndpointIdentity {
            client_id,
            host: config.host.clone(),
            port: config.port,
            node,
            interface,
        };
        Self {
            inner: Arc::new(EndpointInner {
                config,
                identity,
                broker,
                state: Mutex::new(EndpointState::Created),
                channels: DashMap::new(),
                next_channel_id: AtomicU64::new(1),
                listeners: Arc::new(ListenerRegistry::default()),
                dispatcher: Mutex::new(None),
                datagram: Mutex::new(None),
                counters: Counters::default(),
                topics: TopicInterner::new(),
            }),
        }
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    pub fn state(&self) -> EndpointState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == EndpointState::Connected
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn stats(&self) -> EndpointStats {
        let c = &self.inner.counters;
        EndpointStats {
            published: c.published.load(Ordering::Relaxed),
            datagrams_sent: c.datagrams_sent.load(Ordering::Relaxed),
            received: c.received.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            unmatched: c.unmatched.load(Ordering::Relaxed),
        }
    }

    /// Регистрирует наблюдателя переходов. Наблюдатель снимается, когда
    /// возвращённая регистрация удаляется.
    pub fn register(
        &self,
        listener: Arc<dyn ConnectivityListener>,
    ) -> Registration {
        self.inner.listeners.register(listener)
    }

    /// Подключается к брокеру, повторяя попытки согласно настройкам.
    ///
    /// При исчерпании повторов endpoint переходит в `Lost` и возвращает
    /// [`TransportError::RetriesExhausted`].
    pub async fn connect(&self) -> FabricResult<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                EndpointState::Created => *state = EndpointState::Connecting,
                EndpointState::Closed | EndpointState::Lost => {
                    return Err(StateError::EndpointClosed.into())
                }
                _ => return Err(StateError::AlreadyConnected.into()),
            }
        }

        let result = match self.inner.establish().await {
            Ok(()) if self.inner.config.datagram_enabled => {
                let opened = self.inner.open_datagram().await;
                if opened.is_err() {
                    // сессия брокера уже поднята
                    if let Err(e) = self.inner.broker.disconnect().await {
                        warn!(endpoint = %self.inner.identity, error = %e, "broker disconnect failed");
                    }
                }
                opened
            }
            other => other,
        };

        if let Err(e) = result {
            error!(endpoint = %self.inner.identity, error = %e, "endpoint connect failed");
            *self.inner.state.lock() = EndpointState::Lost;
            self.inner.abort_tasks();
            return Err(e.into());
        }

        *self.inner.state.lock() = EndpointState::Connected;
        info!(endpoint = %self.inner.identity, client_id = %self.inner.identity.client_id, "endpoint connected");
        self.inner
            .listeners
            .notify(&self.inner.identity, ConnectivityEvent::Connected);
        Ok(())
    }

    /// Открывает канал.
    ///
    /// `input = Some("")` подписывает канал на сгенерированный приватный
    /// топик. Если endpoint ещё не подключён, подписка выполняется при
    /// подключении.
    pub async fn open_channel(
        &self,
        input: Option<&str>,
        output: Option<&str>,
    ) -> FabricResult<Arc<Channel>> {
        if self.state().is_terminal() {
            return Err(StateError::EndpointClosed.into());
        }

        let input = input.map(|t| {
            if t.is_empty() {
                topic::generated_input_topic()
            } else {
                t.to_string()
            }
        });
        let id = self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channel = Arc::new(Channel::new(
            id,
            input.clone(),
            output.map(str::to_string),
            &self.inner.config,
            Arc::downgrade(&self.inner),
        ));
        self.inner.channels.insert(id, Arc::clone(&channel));

        if let Some(input) = &input {
            if self.state() != EndpointState::Created {
                if let Err(e) = self.inner.subscribe_with_retry(input).await {
                    self.inner.channels.remove(&id);
                    return Err(e.into());
                }
            }
        }
        debug!(endpoint = %self.inner.identity, channel = id, ?input, ?output, "channel opened");
        Ok(channel)
    }

    /// Штатное закрытие: закрывает каналы, публикует сообщение об
    /// отключении и отключается от брокера. Повторный вызов ничего не делает.
    pub async fn close(&self) -> FabricResult<()> {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), EndpointState::Closed);
        if previous == EndpointState::Closed {
            return Ok(());
        }

        let channels: Vec<_> = self
            .inner
            .channels
            .iter()
            .map(|c| Arc::clone(c.value()))
            .collect();
        for channel in channels {
            if let Err(e) = channel.close().await {
                debug!(channel = channel.id(), error = %e, "channel close during endpoint close");
            }
        }
        self.inner.channels.clear();
        self.inner.topics.clear();

        if previous != EndpointState::Lost && previous != EndpointState::Created {
            if let Some(topic) = &self.inner.config.connection_topic {
                let message = self.inner.config.disconnect_message.clone();
                if let Err(e) = self
                    .inner
                    .broker
                    .publish(topic, message, self.inner.config.broker_qos, true)
                    .await
                {
                    warn!(%topic, error = %e, "failed to publish disconnect message");
                }
            }
            if let Err(e) = self.inner.broker.disconnect().await {
                warn!(endpoint = %self.inner.identity, error = %e, "broker disconnect failed");
            }
        }

        self.inner.abort_tasks();
        info!(endpoint = %self.inner.identity, "endpoint closed");
        self.inner
            .listeners
            .notify(&self.inner.identity, ConnectivityEvent::Closed);
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .field("channels", &self.channel_count())
            .finish()
    }
}

impl EndpointInner {
    fn is_alive(&self) -> bool {
        !self.state.lock().is_terminal()
    }

    fn connect_options(&self) -> ConnectOptions {
        let last_will = self.config.connection_topic.as_ref().map(|topic| LastWill {
            topic: topic.clone(),
            payload: self.config.disconnect_message.clone(),
            qos: self.config.broker_qos,
            retain: false,
        });
        ConnectOptions {
            client_id: self.identity.client_id.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            keep_alive: self.config.keep_alive,
            clean_session: self.config.clean_session,
            last_will,
        }
    }

    /// Повторяет операцию по политике подключения.
    ///
    /// Счётчик повторов растёт после каждой неудачи; при конечном бюджете
    /// попыток будет `retries + 1`.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &'static str,
        mut op: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut retries: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    retries += 1;
                    warn!(endpoint = %self.identity, attempt = retries, error = %e, "{what} attempt failed");
                    if let Some(max) = self.config.connect_retries {
                        if retries > max {
                            return Err(TransportError::RetriesExhausted { attempts: retries });
                        }
                    }
                    if *self.state.lock() == EndpointState::Closed {
                        return Err(e);
                    }
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }

    /// Подключение к брокеру, запуск диспетчера, объявление о подключении
    /// и повторная подписка всех открытых каналов.
    async fn establish(self: &Arc<Self>) -> Result<(), TransportError> {
        let options = self.connect_options();
        let (tx, rx) = mpsc::unbounded_channel();

        self.with_retry("connect", || self.broker.connect(&options, tx.clone()))
            .await?;
        drop(tx);

        let dispatcher = Self::spawn_dispatcher(self, rx);
        if let Some(old) = self.dispatcher.lock().replace(dispatcher) {
            old.abort();
        }

        if let Some(topic) = &self.config.connection_topic {
            self.broker
                .publish(
                    topic,
                    self.config.connect_message.clone(),
                    self.config.broker_qos,
                    true,
                )
                .await?;
        }

        let inputs: Vec<String> = self
            .channels
            .iter()
            .filter_map(|c| c.input_topic().map(str::to_string))
            .collect();
        for input in inputs {
            self.subscribe_with_retry(&input).await?;
        }
        Ok(())
    }

    async fn open_datagram(self: &Arc<Self>) -> Result<(), TransportError> {
        let host = self.config.host.clone();
        let port = self.config.datagram_port.unwrap_or(self.config.port);
        if port == 0 {
            return Err(TransportError::DatagramFailed {
                reason: format!("no datagram port for {host}"),
            });
        }

        let (socket, gateway) = self
            .with_retry("datagram open", || {
                let host = host.clone();
                async move {
                    let gateway = tokio::net::lookup_host((host.as_str(), port))
                        .await?
                        .next()
                        .ok_or_else(|| TransportError::DatagramFailed {
                            reason: format!("no address for {host}:{port}"),
                        })?;
                    let bind = if gateway.is_ipv4() {
                        "0.0.0.0:0"
                    } else {
                        "[::]:0"
                    };
                    let socket = UdpSocket::bind(bind).await?;
                    Ok((Arc::new(socket), gateway))
                }
            })
            .await?;

        let receiver = Self::spawn_datagram_receiver(self, Arc::clone(&socket));
        debug!(endpoint = %self.identity, %gateway, "datagram path open");
        if let Some(old) = self.datagram.lock().replace(DatagramPath {
            socket,
            gateway,
            receiver,
        }) {
            old.receiver.abort();
        }
        Ok(())
    }

    fn spawn_dispatcher(
        this: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<BrokerEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match event {
                    BrokerEvent::Message { topic, payload } => {
                        inner.deliver(&topic, payload, MessageQos::Reliable).await;
                    }
                    BrokerEvent::ConnectionLost { reason } => {
                        tokio::spawn(Self::connection_lost(inner, reason));
                    }
                }
            }
        })
    }

    fn spawn_datagram_receiver(
        this: &Arc<Self>,
        socket: Arc<UdpSocket>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "datagram receive failed");
                        break;
                    }
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match frame::decode(&buf[..len]) {
                    Ok((topic, payload)) => {
                        inner.deliver(&topic, payload, MessageQos::BestEffort).await;
                    }
                    Err(e) => warn!(%from, error = %e, "dropping malformed datagram"),
                }
            }
        })
    }

    /// Доставляет сообщение каждому каналу, чей входной шаблон совпадает
    /// с топиком.
    async fn deliver(
        &self,
        topic_name: &str,
        payload: Bytes,
        qos: MessageQos,
    ) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let targets: Vec<Arc<Channel>> = self
            .channels
            .iter()
            .filter(|c| {
                c.input_topic()
                    .is_some_and(|pattern| topic::matches(pattern, topic_name))
            })
            .map(|c| Arc::clone(c.value()))
            .collect();

        if targets.is_empty() {
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(topic = topic_name, "no channel open for topic");
            return;
        }

        let topic = self.topics.intern(topic_name);
        for channel in targets {
            let message = ChannelMessage::with_topic(Arc::clone(&topic), payload.clone()).with_qos(qos);
            let mut accepted = false;
            for attempt in 1..=DELIVERY_ATTEMPTS {
                if channel.message_arrived(message.clone()) {
                    accepted = true;
                    break;
                }
                if channel.is_closed() {
                    break;
                }
                trace!(channel = channel.id(), attempt, "channel rejected message");
                tokio::time::sleep(DELIVERY_BACKOFF).await;
            }
            if !accepted {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(channel = channel.id(), topic = topic_name, "message rejected by channel, dropped");
            }
        }
    }

    async fn connection_lost(
        self: Arc<Self>,
        reason: String,
    ) {
        {
            let mut state = self.state.lock();
            if *state != EndpointState::Connected {
                return;
            }
            *state = EndpointState::Reconnecting;
        }
        warn!(endpoint = %self.identity, %reason, "connection lost, reconnecting");
        self.listeners
            .notify(&self.identity, ConnectivityEvent::Disconnected);

        match self.establish().await {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    if *state == EndpointState::Closed {
                        return;
                    }
                    *state = EndpointState::Connected;
                }
                info!(endpoint = %self.identity, "endpoint reconnected");
                self.listeners
                    .notify(&self.identity, ConnectivityEvent::Reconnected);
            }
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    if *state == EndpointState::Closed {
                        return;
                    }
                    *state = EndpointState::Lost;
                }
                error!(endpoint = %self.identity, error = %e, "endpoint lost");
                self.abort_tasks();
                self.listeners.notify(&self.identity, ConnectivityEvent::Lost);
            }
        }
    }

    /// Подписка, повторяемая, пока endpoint жив.
    async fn subscribe_with_retry(
        &self,
        topic_name: &str,
    ) -> Result<(), TransportError> {
        loop {
            match self.broker.subscribe(topic_name, self.config.broker_qos).await {
                Ok(()) => {
                    trace!(topic = topic_name, "subscribed");
                    return Ok(());
                }
                Err(e) if !self.is_alive() => return Err(e),
                Err(e) => {
                    warn!(topic = topic_name, error = %e, "subscribe failed, retrying");
                    tokio::time::sleep(self.config.subscribe_retry_interval).await;
                }
            }
        }
    }

    pub(crate) async fn publish(
        &self,
        topic_name: &str,
        payload: Bytes,
        qos: BrokerQos,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::NotConnected);
        }
        self.broker.publish(topic_name, payload, qos, retain).await?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Отправляет кадр датаграммой. `false` — датаграммный путь не открыт.
    pub(crate) async fn send_datagram(
        &self,
        frame: Bytes,
    ) -> Result<bool, TransportError> {
        let path = self
            .datagram
            .lock()
            .as_ref()
            .map(|d| (Arc::clone(&d.socket), d.gateway));
        let Some((socket, gateway)) = path else {
            return Ok(false);
        };
        socket.send_to(&frame, gateway).await?;
        self.counters.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Отсоединяет канал. Подписка снимается, только если шаблон не нужен
    /// другим открытым каналам.
    pub(crate) async fn dispose_channel(
        &self,
        channel: &Channel,
    ) -> Result<(), TransportError> {
        self.channels.remove(&channel.id());
        let Some(input) = channel.input_topic() else {
            return Ok(());
        };
        let shared = self
            .channels
            .iter()
            .any(|c| c.input_topic() == Some(input));
        let connected = matches!(
            *self.state.lock(),
            EndpointState::Connected | EndpointState::Closed
        );
        if !shared && connected {
            self.broker.unsubscribe(input).await?;
        }
        Ok(())
    }

    fn abort_tasks(&self) {
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        if let Some(datagram) = self.datagram.lock().take() {
            datagram.receiver.abort();
        }
    }
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;
    use crate::transport::{broker::LoopbackBroker, callback_fn};

    fn loopback_endpoint(
        broker: &Arc<LoopbackBroker>,
        config: EndpointConfig,
    ) -> Endpoint {
        Endpoint::new(config, Arc::new(broker.client()))
    }

    /// Тест проверяет длину и префикс сгенерированного идентификатора.
    #[test]
    fn test_generated_client_id() {
        let id = generate_client_id();
        assert_eq!(id.len(), MAX_CLIENT_ID_LEN);
        assert!(id.starts_with(CLIENT_ID_PREFIX));
        assert_ne!(id, generate_client_id());
    }

    /// Тест проверяет доставку во все каналы с совпадающим шаблоном.
    #[tokio::test]
    async fn test_dispatch_to_every_matching_channel() {
        let broker = LoopbackBroker::new();
        let ep = loopback_endpoint(&broker, EndpointConfig::default());
        ep.connect().await.unwrap();

        let wide = ep.open_channel(Some("n1/#"), None).await.unwrap();
        let narrow = ep.open_channel(Some("n1/+/x"), None).await.unwrap();
        let other = ep.open_channel(Some("n2/#"), None).await.unwrap();

        broker.publish("n1/a/x", Bytes::from_static(b"p"), false);
        let a = timeout(Duration::from_secs(1), wide.read()).await.unwrap().unwrap();
        let b = timeout(Duration::from_secs(1), narrow.read()).await.unwrap().unwrap();
        assert_eq!(a, b);
        assert!(other.try_read().unwrap().is_none());
        assert_eq!(ep.stats().received, 1);
    }

    /// Тест проверяет, что пустой входной топик заменяется приватным.
    #[tokio::test]
    async fn test_empty_input_topic_is_generated() {
        let broker = LoopbackBroker::new();
        let ep = loopback_endpoint(&broker, EndpointConfig::default());
        ep.connect().await.unwrap();

        let ch = ep.open_channel(Some(""), None).await.unwrap();
        let input = ch.input_topic().unwrap();
        assert!(input.starts_with("topic"));
        assert_eq!(input.len(), "topic".len() + 32);
        assert_eq!(broker.subscriptions(&ep.identity().client_id), vec![input.to_string()]);
    }

    /// Тест проверяет объявление о подключении и retained-сообщение об
    /// отключении при штатном закрытии.
    #[tokio::test]
    async fn test_connect_and_disconnect_announcement() {
        let broker = LoopbackBroker::new();
        let config = EndpointConfig {
            connection_topic: Some("$fabric/n1/$status".to_string()),
            ..EndpointConfig::default()
        };
        let ep = loopback_endpoint(&broker, config);
        ep.connect().await.unwrap();
        assert_eq!(broker.retained("$fabric/n1/$status"), Some(Bytes::from_static(b"1")));

        ep.close().await.unwrap();
        assert_eq!(broker.retained("$fabric/n1/$status"), Some(Bytes::from_static(b"0")));
        assert_eq!(ep.state(), EndpointState::Closed);
        assert!(ep.close().await.is_ok());
    }

    /// Тест проверяет, что подписка снимается только с последним каналом,
    /// использующим шаблон.
    #[tokio::test]
    async fn test_shared_pattern_unsubscribe() {
        let broker = LoopbackBroker::new();
        let ep = loopback_endpoint(&broker, EndpointConfig::default());
        ep.connect().await.unwrap();
        let id = ep.identity().client_id.clone();

        let c1 = ep.open_channel(Some("a/#"), None).await.unwrap();
        let c2 = ep.open_channel(Some("a/#"), None).await.unwrap();
        assert_eq!(broker.subscriptions(&id), vec!["a/#".to_string()]);

        c1.close().await.unwrap();
        assert_eq!(broker.subscriptions(&id), vec!["a/#".to_string()]);
        c2.close().await.unwrap();
        assert!(broker.subscriptions(&id).is_empty());
        assert_eq!(ep.channel_count(), 0);
    }

    /// Тест проверяет ошибку состояния при повторном подключении.
    #[tokio::test]
    async fn test_connect_twice_fails() {
        let broker = LoopbackBroker::new();
        let ep = loopback_endpoint(&broker, EndpointConfig::default());
        ep.connect().await.unwrap();
        assert!(ep.connect().await.is_err());
    }

    /// Тест проверяет асинхронную доставку через callback канала.
    #[tokio::test]
    async fn test_callback_dispatch() {
        let broker = LoopbackBroker::new();
        let ep = loopback_endpoint(&broker, EndpointConfig::default());
        ep.connect().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ch = ep.open_channel(Some("cb/+"), None).await.unwrap();
        ch.read_with(callback_fn(move |m: ChannelMessage| {
            let tx = tx.clone();
            async move {
                tx.send(m.topic.to_string())?;
                Ok(())
            }
        }))
        .unwrap();

        broker.publish("cb/1", Bytes::from_static(b"x"), false);
        let topic = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(topic, "cb/1");
    }
}
