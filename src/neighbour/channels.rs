use tracing::warn;

use crate::{
    config::TopicsConfig,
    error::FabricResult,
    shared::{SharedChannel, SharedEndpoint},
};

/// Три выходных канала к соседу: команды, фиды и реестр.
#[derive(Debug, Clone)]
pub struct NeighbourChannels {
    pub command_bus: SharedChannel,
    pub feed_bus: SharedChannel,
    pub registry_bus: SharedChannel,
    /// Корень исходящих фидов: `<feed bus>/<топик фида>`.
    pub outbound_feed_bus: String,
}

impl NeighbourChannels {
    /// Открывает каналы с топиками из шаблонов для узла `node`.
    pub async fn open(
        endpoint: &SharedEndpoint,
        topics: &TopicsConfig,
        node: &str,
    ) -> FabricResult<Self> {
        let command_topic = topics.command_bus.format(&[node]);
        let outbound_feed_bus = topics.feed_bus.format(&[node]);
        let registry_topic = topics.registry_bus.format(&[node]);

        let command_bus = endpoint.open_output_channel(Some(&command_topic)).await?;
        // без топика: полный топик фида задаётся при каждой записи
        let feed_bus = endpoint.open_output_channel(None).await?;
        let registry_bus = endpoint.open_output_channel(Some(&registry_topic)).await?;

        Ok(Self {
            command_bus,
            feed_bus,
            registry_bus,
            outbound_feed_bus,
        })
    }

    /// Топик фида на шине соседа.
    pub fn feed_topic(
        &self,
        feed: &str,
    ) -> String {
        format!("{}/{feed}", self.outbound_feed_bus)
    }

    pub async fn close(&self) {
        for channel in [&self.command_bus, &self.feed_bus, &self.registry_bus] {
            if let Err(e) = channel.close().await {
                warn!(key = channel.key(), error = %e, "failed to close neighbour channel");
            }
        }
    }
}
