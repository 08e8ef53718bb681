use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use bytes::Bytes;

use super::endpoint::SharedEndpointInner;
use crate::{
    error::FabricResult,
    transport::{CallbackId, Channel, ChannelCallback, ChannelMessage, MessageQos},
};

/// Канал со счётчиком ссылок. Клоны указывают на одну запись таблицы
/// [`SharedEndpoint`](super::SharedEndpoint).
#[derive(Clone)]
pub struct SharedChannel {
    inner: Arc<SharedChannelInner>,
}

struct SharedChannelInner {
    key: String,
    channel: Arc<Channel>,
    refs: AtomicUsize,
    endpoint: Weak<SharedEndpointInner>,
}

impl SharedChannel {
    pub(crate) fn new(
        key: String,
        channel: Arc<Channel>,
        endpoint: Weak<SharedEndpointInner>,
    ) -> Self {
        Self {
            inner: Arc::new(SharedChannelInner {
                key,
                channel,
                refs: AtomicUsize::new(1),
                endpoint,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.inner.channel
    }

    pub fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::Acquire)
    }

    pub(crate) fn refs(&self) -> &AtomicUsize {
        &self.inner.refs
    }

    pub fn input_topic(&self) -> Option<&str> {
        self.inner.channel.input_topic()
    }

    pub fn output_topic(&self) -> Option<&str> {
        self.inner.channel.output_topic()
    }

    pub async fn write(
        &self,
        payload: impl Into<Bytes>,
    ) -> FabricResult<()> {
        self.inner.channel.write(payload).await
    }

    pub async fn write_to(
        &self,
        topic: Option<&str>,
        payload: impl Into<Bytes>,
        qos: MessageQos,
    ) -> FabricResult<()> {
        self.inner.channel.write_to(topic, payload, qos).await
    }

    pub async fn read(&self) -> FabricResult<Bytes> {
        self.inner.channel.read().await
    }

    pub async fn read_message(&self) -> FabricResult<ChannelMessage> {
        self.inner.channel.read_message().await
    }

    pub fn try_read(&self) -> FabricResult<Option<ChannelMessage>> {
        self.inner.channel.try_read()
    }

    pub fn read_with(
        &self,
        callback: Arc<dyn ChannelCallback>,
    ) -> FabricResult<CallbackId> {
        self.inner.channel.read_with(callback)
    }

    pub fn cancel_callback(
        &self,
        id: CallbackId,
    ) -> Option<Arc<dyn ChannelCallback>> {
        self.inner.channel.cancel_callback(id)
    }

    /// Освобождает одну ссылку. Физический канал закрывается вместе с
    /// последней.
    pub async fn close(&self) -> FabricResult<()> {
        match self.inner.endpoint.upgrade() {
            Some(endpoint) => endpoint.close_channel(&self.inner.key, false).await,
            None => self.inner.channel.close().await,
        }
    }
}

impl fmt::Debug for SharedChannel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SharedChannel")
            .field("key", &self.inner.key)
            .field("refs", &self.ref_count())
            .finish()
    }
}
