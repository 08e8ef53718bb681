//! Входящие фиды домашнего брокера: обёртка и переиздание на шине фидов,
//! рассылка `$`-фидов по всей сети.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    bus::Bus,
    config::Settings,
    error::{ProtocolError, RoutingError},
    router::{
        MessageSender, NotificationEvent, Route, ServiceMessage, ACTION_PUBLISH,
        FEED_PUBLISHER_SERVICE, PROP_DELIVER_TO_FEED,
    },
    transport::{ChannelCallback, ChannelMessage},
};

/// Сообщение фида на шине: исходный топик, дескриптор фида и данные.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMessage {
    pub uid: String,
    pub topic: String,
    pub feed: String,
    #[serde(default)]
    pub replay: bool,
    pub payload: Bytes,
}

impl FeedMessage {
    pub fn wrap(
        topic: impl Into<String>,
        feed: impl Into<String>,
        payload: Bytes,
        replay: bool,
    ) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            topic: topic.into(),
            feed: feed.into(),
            replay,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Bytes, RoutingError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| RoutingError::Encode {
                reason: e.to_string(),
            })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedMessage {
            reason: e.to_string(),
        })
    }
}

/// Обработчик входящих фидов узла.
///
/// - `<onramp>/$…` рассылается по сети сервисным сообщением с действием
///   на каждом узле;
/// - `<onramp>/…` и `<replay>/…` оборачиваются в [`FeedMessage`] и
///   переиздаются в `<feed bus>/<feed>`;
/// - сообщения шины фидов передаются `downstream`, если он задан.
pub struct FeedRelay {
    home: String,
    onramp: String,
    replay: String,
    feed_bus: String,
    flood_ttl_ms: u64,
    bus: Weak<Bus>,
    downstream: Option<Arc<dyn ChannelCallback>>,
}

impl FeedRelay {
    pub fn new(
        settings: &Settings,
        bus: &Arc<Bus>,
        downstream: Option<Arc<dyn ChannelCallback>>,
    ) -> Self {
        let home = settings.node.name.clone();
        let topics = &settings.topics;
        Self {
            onramp: format!("{}/", topics.local_feeds.format(&[&home])),
            replay: format!("{}/", topics.local_replay.format(&[&home])),
            feed_bus: topics.feed_bus.format(&[&home]),
            flood_ttl_ms: settings.routing.flood_ttl_ms,
            bus: Arc::downgrade(bus),
            downstream,
            home,
        }
    }

    /// Входные топики, которые слушает обработчик.
    pub fn inputs(&self) -> [String; 3] {
        [
            format!("{}#", self.onramp),
            format!("{}#", self.replay),
            format!("{}/#", self.feed_bus),
        ]
    }

    /// Сервисное сообщение, разносящее `$`-фид по всем узлам.
    pub fn flood_message(
        &self,
        feed: &str,
        topic: &str,
        payload: &[u8],
    ) -> Result<ServiceMessage, ProtocolError> {
        let payload = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidPayload {
            topic: topic.to_string(),
        })?;
        let mut message = ServiceMessage::new(FEED_PUBLISHER_SERVICE)
            .with_action(ACTION_PUBLISH)
            .with_property(PROP_DELIVER_TO_FEED, feed)
            .with_routing(Route::flood(self.home.clone(), self.flood_ttl_ms));
        message.event = NotificationEvent::ActorRequest;
        message.action_en_route = true;
        message.payload = Some(payload.to_string());
        Ok(message)
    }

    async fn republish(
        &self,
        bus: &Bus,
        topic: &str,
        feed: &str,
        payload: Bytes,
        replay: bool,
    ) -> Result<(), RoutingError> {
        let wrapped = FeedMessage::wrap(topic, feed, payload, replay);
        let target = format!("{}/{feed}", self.feed_bus);
        trace!(from = topic, to = %target, replay, "republishing feed");
        bus.publish_local(&target, wrapped.encode()?).await
    }
}

#[async_trait]
impl ChannelCallback for FeedRelay {
    async fn handle_message(
        &self,
        message: ChannelMessage,
    ) -> anyhow::Result<()> {
        let Some(bus) = self.bus.upgrade() else {
            return Ok(());
        };
        let topic = &*message.topic;

        if let Some(feed) = topic.strip_prefix(&self.onramp) {
            if feed.starts_with('$') {
                let flood = self.flood_message(feed, topic, &message.payload)?;
                debug!(feed, uid = %flood.uid, "flooding feed");
                bus.send_service_message(&flood, &[self.home.clone()]).await?;
            } else {
                self.republish(&bus, topic, feed, message.payload, false)
                    .await?;
            }
        } else if let Some(feed) = topic.strip_prefix(&self.replay) {
            self.republish(&bus, topic, feed, message.payload, true)
                .await?;
        } else if let Some(downstream) = &self.downstream {
            downstream.handle_message(message).await?;
        } else {
            trace!(topic, "feed bus message without a receiver");
        }
        Ok(())
    }
}
