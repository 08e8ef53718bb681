use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use super::{
    endpoint::EndpointInner, frame, BrokerQos, CallbackId, ChannelCallback, ChannelMessage,
    EndpointConfig, Executor, MessageQos,
};
use crate::error::{FabricResult, StateError, TransportError};

/// Логический дуплексный путь поверх endpoint.
///
/// Канал читает один входной топик (шаблон подписки) и/или пишет в один
/// выходной. Входящие сообщения либо копятся в FIFO-буфере для
/// синхронного чтения, либо передаются зарегистрированным callback'ам;
/// режимы взаимоисключающие.
pub struct Channel {
    id: u64,
    input_topic: Option<String>,
    output_topic: Option<String>,
    default_qos: MessageQos,
    broker_qos: BrokerQos,
    retain: bool,
    datagram_enabled: bool,
    max_datagram_payload: usize,
    buffer: MessageBuffer,
    callbacks: Mutex<Vec<(CallbackId, Arc<dyn ChannelCallback>)>>,
    next_callback_id: AtomicU64,
    executor: Executor,
    endpoint: Weak<EndpointInner>,
    closed: AtomicBool,
}

impl Channel {
    pub(crate) fn new(
        id: u64,
        input_topic: Option<String>,
        output_topic: Option<String>,
        config: &EndpointConfig,
        endpoint: Weak<EndpointInner>,
    ) -> Self {
        let name = input_topic
            .clone()
            .or_else(|| output_topic.clone())
            .unwrap_or_default();
        Self {
            id,
            input_topic,
            output_topic,
            default_qos: config.default_message_qos,
            broker_qos: config.broker_qos,
            retain: config.retain,
            datagram_enabled: config.datagram_enabled,
            max_datagram_payload: config.max_datagram_payload,
            buffer: MessageBuffer::new(config.buffer_limit),
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            executor: Executor::new(name, config.callback_workers),
            endpoint,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn input_topic(&self) -> Option<&str> {
        self.input_topic.as_deref()
    }

    pub fn output_topic(&self) -> Option<&str> {
        self.output_topic.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Сообщений в буфере.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Запись
    ////////////////////////////////////////////////////////////////////////////

    /// Пишет в выходной топик канала с QoS по умолчанию.
    pub async fn write(
        &self,
        payload: impl Into<Bytes>,
    ) -> FabricResult<()> {
        self.write_to(None, payload, MessageQos::Default).await
    }

    pub async fn write_with_qos(
        &self,
        payload: impl Into<Bytes>,
        qos: MessageQos,
    ) -> FabricResult<()> {
        self.write_to(None, payload, qos).await
    }

    /// Пишет в указанный топик (или в выходной топик канала).
    ///
    /// Датаграммный путь используется, только если он включён, итоговый
    /// QoS равен `BestEffort` и кадр не превышает порог; иначе публикация
    /// идёт через брокер.
    pub async fn write_to(
        &self,
        topic: Option<&str>,
        payload: impl Into<Bytes>,
        qos: MessageQos,
    ) -> FabricResult<()> {
        let topic = topic
            .or(self.output_topic.as_deref())
            .ok_or(StateError::NoOutputTopic)?;
        let endpoint = self.endpoint()?;
        let payload = payload.into();

        if !self.datagram_enabled || qos.resolve(self.default_qos) == MessageQos::Reliable {
            return Ok(endpoint
                .publish(topic, payload, self.broker_qos, self.retain)
                .await?);
        }

        let frame = frame::encode(topic, &payload)?;
        let effective = qos.effective(self.default_qos, frame.len(), self.max_datagram_payload);
        if effective == MessageQos::BestEffort && endpoint.send_datagram(frame).await? {
            trace!(topic, bytes = payload.len(), "sent datagram frame");
            return Ok(());
        }

        trace!(topic, bytes = payload.len(), ?effective, "falling back to broker publish");
        Ok(endpoint
            .publish(topic, payload, self.broker_qos, self.retain)
            .await?)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Чтение
    ////////////////////////////////////////////////////////////////////////////

    /// Блокирующее чтение полезной нагрузки следующего сообщения.
    pub async fn read(&self) -> FabricResult<Bytes> {
        Ok(self.read_message().await?.payload)
    }

    /// Блокирующее чтение следующего сообщения вместе с метаданными.
    ///
    /// Ждёт без ограничения по времени. Закрытие канала ожидающего
    /// читателя не будит.
    pub async fn read_message(&self) -> FabricResult<ChannelMessage> {
        self.check_readable()?;
        self.buffer
            .pop()
            .await
            .ok_or_else(|| TransportError::ChannelClosed.into())
    }

    /// Неблокирующее чтение.
    pub fn try_read(&self) -> FabricResult<Option<ChannelMessage>> {
        self.check_readable()?;
        Ok(self.buffer.try_pop())
    }

    /// Переводит канал в асинхронный режим: каждое входящее сообщение
    /// передаётся всем callback'ам через пул канала.
    pub fn read_with(
        &self,
        callback: Arc<dyn ChannelCallback>,
    ) -> FabricResult<CallbackId> {
        if self.input_topic.is_none() {
            return Err(StateError::NoInputTopic.into());
        }
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((id, Arc::clone(&callback)));
        callback.start();
        Ok(id)
    }

    /// Снимает callback, вызывая его `cancel`.
    pub fn cancel_callback(
        &self,
        id: CallbackId,
    ) -> Option<Arc<dyn ChannelCallback>> {
        let removed = {
            let mut callbacks = self.callbacks.lock();
            let pos = callbacks.iter().position(|(cid, _)| *cid == id)?;
            callbacks.remove(pos).1
        };
        removed.cancel();
        Some(removed)
    }

    pub fn cancel_callbacks(&self) {
        let removed: Vec<_> = self.callbacks.lock().drain(..).collect();
        for (_, callback) in removed {
            callback.cancel();
        }
    }

    fn check_readable(&self) -> Result<(), StateError> {
        if !self.callbacks.lock().is_empty() {
            return Err(StateError::CallbacksRegistered);
        }
        if self.input_topic.is_none() {
            return Err(StateError::NoInputTopic);
        }
        Ok(())
    }

    /// Приём сообщения от endpoint.
    ///
    /// `false` означает, что сообщение не принято (буфер полон или канал
    /// закрыт) и его можно предложить повторно.
    pub fn message_arrived(
        &self,
        message: ChannelMessage,
    ) -> bool {
        if self.is_closed() {
            return false;
        }

        let callbacks: Vec<_> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, c)| Arc::clone(c))
            .collect();
        if callbacks.is_empty() {
            return self.buffer.push(message);
        }

        let jobs = callbacks.into_iter().map(|callback| {
            let message = message.clone();
            let topic = Arc::clone(&message.topic);
            async move {
                if let Err(e) = callback.handle_message(message).await {
                    warn!(%topic, error = %e, "channel callback failed");
                }
            }
        });
        match self.executor.execute_all(jobs) {
            Ok(_) => true,
            Err(e) => {
                warn!(channel = self.id, error = %e, "callback dispatch rejected");
                false
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Закрытие
    ////////////////////////////////////////////////////////////////////////////

    /// Отменяет callback'и, снимает подписку и отсоединяется от endpoint.
    pub async fn close(&self) -> FabricResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel_callbacks();
        self.executor.shutdown();

        let result = match self.endpoint.upgrade() {
            Some(endpoint) => endpoint.dispose_channel(self).await,
            None => Ok(()),
        };
        debug!(channel = self.id, input = ?self.input_topic, output = ?self.output_topic, "channel closed");
        Ok(result?)
    }

    fn endpoint(&self) -> Result<Arc<EndpointInner>, StateError> {
        if self.is_closed() {
            return Err(StateError::EndpointClosed);
        }
        self.endpoint.upgrade().ok_or(StateError::EndpointClosed)
    }
}

impl fmt::Debug for Channel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("input_topic", &self.input_topic)
            .field("output_topic", &self.output_topic)
            .field("buffered", &self.buffered())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

/// FIFO-буфер канала. `limit == 0` — без ограничения.
struct MessageBuffer {
    sender: BufferSender,
    receiver: tokio::sync::Mutex<BufferReceiver>,
    len: AtomicUsize,
}

enum BufferSender {
    Bounded(mpsc::Sender<ChannelMessage>),
    Unbounded(mpsc::UnboundedSender<ChannelMessage>),
}

enum BufferReceiver {
    Bounded(mpsc::Receiver<ChannelMessage>),
    Unbounded(mpsc::UnboundedReceiver<ChannelMessage>),
}

impl MessageBuffer {
    fn new(limit: usize) -> Self {
        let (sender, receiver) = if limit == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (BufferSender::Unbounded(tx), BufferReceiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(limit);
            (BufferSender::Bounded(tx), BufferReceiver::Bounded(rx))
        };
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            len: AtomicUsize::new(0),
        }
    }

    fn push(
        &self,
        message: ChannelMessage,
    ) -> bool {
        let accepted = match &self.sender {
            BufferSender::Bounded(tx) => match tx.try_send(message) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
            },
            BufferSender::Unbounded(tx) => tx.send(message).is_ok(),
        };
        if accepted {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        accepted
    }

    async fn pop(&self) -> Option<ChannelMessage> {
        let mut receiver = self.receiver.lock().await;
        let message = match &mut *receiver {
            BufferReceiver::Bounded(rx) => rx.recv().await,
            BufferReceiver::Unbounded(rx) => rx.recv().await,
        };
        if message.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        message
    }

    fn try_pop(&self) -> Option<ChannelMessage> {
        let mut receiver = self.receiver.try_lock().ok()?;
        let message = match &mut *receiver {
            BufferReceiver::Bounded(rx) => rx.try_recv().ok(),
            BufferReceiver::Unbounded(rx) => rx.try_recv().ok(),
        };
        if message.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        message
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}
