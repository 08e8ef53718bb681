use std::{
    collections::HashMap,
    fmt,
    sync::{atomic::Ordering, Arc},
};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::SharedChannel;
use crate::{
    error::FabricResult,
    transport::{
        ChannelCallback, ConnectivityListener, Endpoint, EndpointIdentity, EndpointState,
        Registration,
    },
};

/// Обозначение отсутствующего топика в ключе канала.
const NO_TOPIC: &str = "null";

/// Ключ разделяемого канала: `[input][output]`.
pub fn channel_key(
    input: Option<&str>,
    output: Option<&str>,
) -> String {
    format!(
        "[{}][{}]",
        input.unwrap_or(NO_TOPIC),
        output.unwrap_or(NO_TOPIC)
    )
}

/// Endpoint с таблицей разделяемых каналов.
///
/// Единственное место, где физические каналы открываются и закрываются.
/// На один ключ `(input, output)` приходится не более одного канала;
/// каждое открытие увеличивает его счётчик ссылок.
#[derive(Clone)]
pub struct SharedEndpoint {
    inner: Arc<SharedEndpointInner>,
}

pub(crate) struct SharedEndpointInner {
    endpoint: Endpoint,
    channels: Mutex<HashMap<String, SharedChannel>>,
}

impl SharedEndpoint {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            inner: Arc::new(SharedEndpointInner {
                endpoint,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn identity(&self) -> &EndpointIdentity {
        self.inner.endpoint.identity()
    }

    pub fn state(&self) -> EndpointState {
        self.inner.endpoint.state()
    }

    pub async fn connect(&self) -> FabricResult<()> {
        self.inner.endpoint.connect().await
    }

    pub fn register(
        &self,
        listener: Arc<dyn ConnectivityListener>,
    ) -> Registration {
        self.inner.endpoint.register(listener)
    }

    /// Открывает (или переиспользует) канал с входным и выходным топиком.
    ///
    /// Callback, если передан, регистрируется на канале при каждом открытии.
    pub async fn open_io_channel(
        &self,
        input: Option<&str>,
        output: Option<&str>,
        callback: Option<Arc<dyn ChannelCallback>>,
    ) -> FabricResult<SharedChannel> {
        let key = channel_key(input, output);
        let mut channels = self.inner.channels.lock().await;

        if let Some(shared) = channels.get(&key) {
            if let Some(callback) = callback {
                shared.channel().read_with(callback)?;
            }
            let refs = shared.refs().fetch_add(1, Ordering::AcqRel) + 1;
            debug!(%key, refs, "shared channel reused");
            return Ok(shared.clone());
        }

        let channel = self.inner.endpoint.open_channel(input, output).await?;
        if let Some(callback) = callback {
            if let Err(e) = channel.read_with(callback) {
                if let Err(close_err) = channel.close().await {
                    warn!(%key, error = %close_err, "failed to close channel after callback error");
                }
                return Err(e);
            }
        }
        let shared = SharedChannel::new(key.clone(), channel, Arc::downgrade(&self.inner));
        channels.insert(key.clone(), shared.clone());
        debug!(%key, "shared channel created");
        Ok(shared)
    }

    /// Канал только для записи. Без топика пишет в топик, указанный при
    /// каждой записи.
    pub async fn open_output_channel(
        &self,
        topic: Option<&str>,
    ) -> FabricResult<SharedChannel> {
        self.open_io_channel(None, topic, None).await
    }

    /// Канал только для чтения.
    pub async fn open_input_channel(
        &self,
        topic: &str,
        callback: Option<Arc<dyn ChannelCallback>>,
    ) -> FabricResult<SharedChannel> {
        self.open_io_channel(Some(topic), None, callback).await
    }

    /// Уменьшает счётчик ссылок канала; при нуле или `force` закрывает его.
    pub async fn close_channel(
        &self,
        key: &str,
        force: bool,
    ) -> FabricResult<()> {
        self.inner.close_channel(key, force).await
    }

    /// Сумма счётчиков ссылок всех каналов.
    pub async fn total_channel_refs(&self) -> usize {
        self.inner
            .channels
            .lock()
            .await
            .values()
            .map(SharedChannel::ref_count)
            .sum()
    }

    /// Счётчик ссылок канала, `0` — канала нет.
    pub async fn channel_ref_count(
        &self,
        key: &str,
    ) -> usize {
        self.inner
            .channels
            .lock()
            .await
            .get(key)
            .map_or(0, SharedChannel::ref_count)
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.channels.lock().await.len()
    }

    pub fn ip_name(&self) -> &str {
        &self.identity().host
    }

    pub fn ip_port(&self) -> u16 {
        self.identity().port
    }

    /// `host:port` брокера.
    pub fn ip_address(&self) -> String {
        format!("{}:{}", self.ip_name(), self.ip_port())
    }

    pub fn node(&self) -> Option<&str> {
        self.identity().node.as_deref()
    }

    pub fn interface(&self) -> Option<&str> {
        self.identity().interface.as_deref()
    }

    /// Принудительно закрывает все каналы и сам endpoint.
    pub async fn close(&self) -> FabricResult<()> {
        let keys: Vec<String> = self.inner.channels.lock().await.keys().cloned().collect();
        for key in keys {
            if let Err(e) = self.inner.close_channel(&key, true).await {
                warn!(%key, error = %e, "failed to close shared channel");
            }
        }
        self.inner.endpoint.close().await
    }
}

impl SharedEndpointInner {
    pub(crate) async fn close_channel(
        &self,
        key: &str,
        force: bool,
    ) -> FabricResult<()> {
        let mut channels = self.channels.lock().await;
        let Some(shared) = channels.get(key) else {
            warn!(key, "close of unknown shared channel ignored");
            return Ok(());
        };

        let remaining = shared
            .refs()
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .map_or(0, |prev| prev.saturating_sub(1));
        if remaining > 0 && !force {
            debug!(key, refs = remaining, "shared channel released");
            return Ok(());
        }

        let Some(shared) = channels.remove(key) else {
            return Ok(());
        };
        shared.refs().store(0, Ordering::Release);
        drop(channels);
        debug!(key, force, "shared channel destroyed");
        shared.channel().close().await
    }
}

impl fmt::Debug for SharedEndpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SharedEndpoint")
            .field("endpoint", &self.inner.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;
    use crate::transport::{EndpointConfig, LoopbackBroker};

    async fn connected(broker: &Arc<LoopbackBroker>) -> SharedEndpoint {
        let ep = SharedEndpoint::new(Endpoint::new(
            EndpointConfig::default(),
            Arc::new(broker.client()),
        ));
        ep.connect().await.unwrap();
        ep
    }

    /// Тест проверяет формат ключа.
    #[test]
    fn test_channel_key() {
        assert_eq!(channel_key(Some("a/#"), None), "[a/#][null]");
        assert_eq!(channel_key(None, Some("x")), "[null][x]");
    }

    /// Тест проверяет сценарий двух владельцев одного выходного канала.
    #[tokio::test]
    async fn test_two_owners_one_channel() {
        let broker = LoopbackBroker::new();
        let ep = connected(&broker).await;

        let a = ep.open_output_channel(Some("X")).await.unwrap();
        let b = ep.open_output_channel(Some("X")).await.unwrap();
        assert_eq!(a.channel().id(), b.channel().id());
        assert_eq!(ep.channel_ref_count("[null][X]").await, 2);
        assert_eq!(ep.endpoint().channel_count(), 1);

        a.close().await.unwrap();
        assert_eq!(ep.channel_ref_count("[null][X]").await, 1);
        assert!(!b.channel().is_closed());
        b.write(Bytes::from_static(b"still open")).await.unwrap();

        b.close().await.unwrap();
        assert_eq!(ep.channel_ref_count("[null][X]").await, 0);
        assert!(b.channel().is_closed());
        assert_eq!(ep.endpoint().channel_count(), 0);
    }

    /// Тест проверяет, что закрытие неизвестного ключа не является ошибкой.
    #[tokio::test]
    async fn test_close_unknown_key_is_noop() {
        let broker = LoopbackBroker::new();
        let ep = connected(&broker).await;
        assert!(ep.close_channel("[nope][null]", false).await.is_ok());
    }

    /// Тест проверяет принудительное закрытие при ненулевом счётчике.
    #[tokio::test]
    async fn test_forced_close() {
        let broker = LoopbackBroker::new();
        let ep = connected(&broker).await;
        let ch = ep.open_input_channel("in/#", None).await.unwrap();
        ep.open_input_channel("in/#", None).await.unwrap();
        ep.open_input_channel("in/#", None).await.unwrap();
        assert_eq!(ep.total_channel_refs().await, 3);

        ep.close_channel(ch.key(), true).await.unwrap();
        assert!(ch.channel().is_closed());
        assert_eq!(ep.total_channel_refs().await, 0);
        assert!(broker.subscriptions(&ep.identity().client_id).is_empty());
    }

    /// Тест проверяет адресные аксессоры.
    #[tokio::test]
    async fn test_address_accessors() {
        let broker = LoopbackBroker::new();
        let ep = SharedEndpoint::new(Endpoint::for_neighbour(
            EndpointConfig::new("10.1.1.2", 1884),
            Arc::new(broker.client()),
            "n2",
            "eth0",
        ));
        assert_eq!(ep.ip_name(), "10.1.1.2");
        assert_eq!(ep.ip_port(), 1884);
        assert_eq!(ep.ip_address(), "10.1.1.2:1884");
        assert_eq!(ep.node(), Some("n2"));
        assert_eq!(ep.interface(), Some("eth0"));
    }

    proptest! {
        /// Свойство: для любой последовательности открытий и закрытий одного
        /// ключа существует не более одного канала, а счётчик равен разности
        /// открытий и закрытий.
        #[test]
        fn prop_refcount_tracks_opens_minus_closes(ops in proptest::collection::vec(any::<bool>(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let broker = LoopbackBroker::new();
                let ep = connected(&broker).await;
                let key = channel_key(Some("p/#"), Some("q"));
                let mut expected = 0usize;
                let mut first_id = None;

                for open in ops {
                    if open {
                        let ch = ep.open_io_channel(Some("p/#"), Some("q"), None).await.unwrap();
                        if expected == 0 {
                            first_id = Some(ch.channel().id());
                        } else {
                            assert_eq!(first_id, Some(ch.channel().id()));
                        }
                        expected += 1;
                    } else {
                        ep.close_channel(&key, false).await.unwrap();
                        expected = expected.saturating_sub(1);
                    }
                    assert_eq!(ep.channel_ref_count(&key).await, expected);
                    assert_eq!(ep.endpoint().channel_count(), usize::from(expected > 0));
                }
            });
        }
    }
}
