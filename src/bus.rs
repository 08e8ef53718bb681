//! Ввод-вывод узла: домашние каналы и отправка сообщений соседям.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    config::TopicsConfig,
    error::{ErrorExt, FabricResult, RoutingError},
    neighbour::NeighbourManager,
    router::{MessageSender, ServiceMessage},
    shared::{SharedChannel, SharedEndpoint},
    transport::{ChannelCallback, MessageQos},
};

/// Каналы домашнего брокера.
#[derive(Debug)]
struct HomeChannels {
    /// Шина команд узла и локальные команды.
    commands_in: Vec<SharedChannel>,
    /// Локальные фиды и шина фидов узла.
    feeds_in: Vec<SharedChannel>,
    local_commands_out: SharedChannel,
    /// Без топика: клиентские уведомления, переизданные фиды и команды
    /// платформ.
    client_out: SharedChannel,
}

/// Шина узла.
pub struct Bus {
    home: String,
    topics: TopicsConfig,
    endpoint: SharedEndpoint,
    neighbours: Arc<NeighbourManager>,
    channels: RwLock<Option<Arc<HomeChannels>>>,
}

impl Bus {
    pub fn new(
        endpoint: SharedEndpoint,
        neighbours: Arc<NeighbourManager>,
    ) -> Self {
        Self {
            home: neighbours.home().to_string(),
            topics: neighbours.topics().clone(),
            endpoint,
            neighbours,
            channels: RwLock::new(None),
        }
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    pub fn endpoint(&self) -> &SharedEndpoint {
        &self.endpoint
    }

    pub fn neighbours(&self) -> &Arc<NeighbourManager> {
        &self.neighbours
    }

    /// Топик локальных команд узла.
    pub fn local_commands_topic(&self) -> String {
        self.topics.local_commands.format(&[&self.home])
    }

    /// Открывает домашние каналы. Команды идут в `commands`, фиды со
    /// входов `feed_inputs` в `feeds`.
    pub async fn open_home_channels(
        &self,
        commands: Arc<dyn ChannelCallback>,
        feeds: Arc<dyn ChannelCallback>,
        feed_inputs: &[String],
    ) -> FabricResult<()> {
        let home = [self.home.as_str()];
        let command_inputs = [
            self.topics.command_bus.format(&home),
            format!("{}/#", self.local_commands_topic()),
        ];

        let mut commands_in = Vec::with_capacity(command_inputs.len());
        for topic in &command_inputs {
            commands_in.push(
                self.endpoint
                    .open_input_channel(topic, Some(Arc::clone(&commands)))
                    .await?,
            );
        }
        let mut feeds_in = Vec::with_capacity(feed_inputs.len());
        for topic in feed_inputs {
            feeds_in.push(
                self.endpoint
                    .open_input_channel(topic, Some(Arc::clone(&feeds)))
                    .await?,
            );
        }
        let local_commands_out = self
            .endpoint
            .open_output_channel(Some(&self.local_commands_topic()))
            .await?;
        let client_out = self.endpoint.open_output_channel(None).await?;

        debug!(node = %self.home, commands = ?command_inputs, feeds = ?feed_inputs, "home channels open");
        *self.channels.write() = Some(Arc::new(HomeChannels {
            commands_in,
            feeds_in,
            local_commands_out,
            client_out,
        }));
        Ok(())
    }

    fn home_channels(&self) -> Option<Arc<HomeChannels>> {
        self.channels.read().clone()
    }

    async fn send_to_node(
        &self,
        node: &str,
        payload: Bytes,
    ) -> Result<(), RoutingError> {
        if node == self.home {
            let channels = self.home_channels().ok_or_else(|| RoutingError::SendFailed {
                node: node.to_string(),
                reason: "home channels are not open".to_string(),
            })?;
            return channels
                .local_commands_out
                .write(payload)
                .await
                .map_err(|e| RoutingError::SendFailed {
                    node: node.to_string(),
                    reason: e.to_string(),
                });
        }

        let connection = self
            .neighbours
            .connect_neighbour(node)
            .await
            .ok_or_else(|| RoutingError::NoConnection {
                node: node.to_string(),
            })?;
        connection
            .channels()
            .command_bus
            .write(payload)
            .await
            .map_err(|e| RoutingError::SendFailed {
                node: node.to_string(),
                reason: e.to_string(),
            })
    }

    /// Публикует фид на шине фидов соседа `node`.
    pub async fn send_feed_message(
        &self,
        node: &str,
        feed_topic: &str,
        payload: impl Into<Bytes>,
        qos: MessageQos,
    ) -> Result<(), RoutingError> {
        let connection = self
            .neighbours
            .connect_neighbour(node)
            .await
            .ok_or_else(|| RoutingError::NoConnection {
                node: node.to_string(),
            })?;
        let channels = connection.channels();
        channels
            .feed_bus
            .write_to(Some(&channels.feed_topic(feed_topic)), payload, qos)
            .await
            .map_err(|e| RoutingError::SendFailed {
                node: node.to_string(),
                reason: e.to_string(),
            })
    }

    /// Закрывает домашние каналы и соединения с соседями.
    pub async fn close(&self) -> FabricResult<()> {
        let channels = self.channels.write().take();
        if let Some(channels) = channels {
            for channel in channels
                .commands_in
                .iter()
                .chain(&channels.feeds_in)
                .chain([&channels.local_commands_out, &channels.client_out])
            {
                if let Err(e) = channel.close().await {
                    warn!(key = channel.key(), error = %e, "failed to close home channel");
                }
            }
        }
        self.neighbours.close_all().await;
        self.endpoint.close().await
    }
}

#[async_trait]
impl MessageSender for Bus {
    async fn send_service_message(
        &self,
        message: &ServiceMessage,
        nodes: &[String],
    ) -> Result<(), RoutingError> {
        let payload = message.encode()?;
        let mut first_error = None;
        for node in nodes {
            match self.send_to_node(node, payload.clone()).await {
                Ok(()) => debug!(%node, uid = %message.uid, "service message sent"),
                Err(e) => {
                    warn!(%node, uid = %message.uid, code = %e.status_code(), error = %e, "service message not sent");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn send_client_notification(
        &self,
        actor: &str,
        platform: &str,
        message: &ServiceMessage,
    ) -> Result<(), RoutingError> {
        let topic = self.topics.clients.format(&[&self.home, actor, platform]);
        let channels = self.home_channels().ok_or_else(|| RoutingError::SendFailed {
            node: self.home.clone(),
            reason: "home channels are not open".to_string(),
        })?;
        channels
            .client_out
            .write_to(Some(&topic), message.encode()?, MessageQos::Default)
            .await
            .map_err(|e| RoutingError::SendFailed {
                node: self.home.clone(),
                reason: e.to_string(),
            })
    }

    async fn publish_local(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), RoutingError> {
        let channels = self.home_channels().ok_or_else(|| RoutingError::SendFailed {
            node: self.home.clone(),
            reason: "home channels are not open".to_string(),
        })?;
        channels
            .client_out
            .write_to(Some(topic), payload, MessageQos::Default)
            .await
            .map_err(|e| RoutingError::SendFailed {
                node: self.home.clone(),
                reason: e.to_string(),
            })
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Bus").field("home", &self.home).finish()
    }
}
