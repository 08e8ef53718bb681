use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::NodeDescriptor;
use crate::{
    error::{FabricResult, TransportError},
    shared::SharedEndpoint,
    transport::{BrokerClient, Endpoint, EndpointConfig, LoopbackBroker, MqttBroker},
};

/// Создаёт подключённый [`SharedEndpoint`] к брокеру соседа.
#[async_trait]
pub trait EndpointConnector: Send + Sync + 'static {
    async fn open(
        &self,
        descriptor: &NodeDescriptor,
    ) -> FabricResult<SharedEndpoint>;
}

/// Параметры endpoint соседа из шаблона: адрес из дескриптора, свой
/// идентификатор клиента.
fn neighbour_config(
    template: &EndpointConfig,
    descriptor: &NodeDescriptor,
) -> EndpointConfig {
    EndpointConfig {
        host: descriptor.address.clone(),
        port: descriptor.port,
        client_id: None,
        ..template.clone()
    }
}

async fn connect_shared(
    config: EndpointConfig,
    broker: Arc<dyn BrokerClient>,
    descriptor: &NodeDescriptor,
) -> FabricResult<SharedEndpoint> {
    let endpoint = SharedEndpoint::new(Endpoint::for_neighbour(
        config,
        broker,
        descriptor.node.clone(),
        descriptor.interface.clone(),
    ));
    endpoint.connect().await?;
    debug!(neighbour = %descriptor, "neighbour endpoint connected");
    Ok(endpoint)
}

/// Соединения через `rumqttc`.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    template: EndpointConfig,
}

impl MqttConnector {
    pub fn new(template: EndpointConfig) -> Self {
        Self { template }
    }
}

#[async_trait]
impl EndpointConnector for MqttConnector {
    async fn open(
        &self,
        descriptor: &NodeDescriptor,
    ) -> FabricResult<SharedEndpoint> {
        connect_shared(
            neighbour_config(&self.template, descriptor),
            Arc::new(MqttBroker::new()),
            descriptor,
        )
        .await
    }
}

/// Соединения с внутрипроцессными брокерами, зарегистрированными по
/// адресу `address:port`.
pub struct LoopbackConnector {
    brokers: DashMap<String, Arc<LoopbackBroker>>,
    template: EndpointConfig,
}

impl LoopbackConnector {
    pub fn new(template: EndpointConfig) -> Self {
        Self {
            brokers: DashMap::new(),
            template,
        }
    }

    pub fn add_broker(
        &self,
        address: &str,
        port: u16,
        broker: Arc<LoopbackBroker>,
    ) {
        self.brokers.insert(format!("{address}:{port}"), broker);
    }

    pub fn broker(
        &self,
        address: &str,
        port: u16,
    ) -> Option<Arc<LoopbackBroker>> {
        self.brokers
            .get(&format!("{address}:{port}"))
            .map(|b| Arc::clone(b.value()))
    }
}

#[async_trait]
impl EndpointConnector for LoopbackConnector {
    async fn open(
        &self,
        descriptor: &NodeDescriptor,
    ) -> FabricResult<SharedEndpoint> {
        let key = descriptor.socket_key();
        let broker = self
            .brokers
            .get(&key)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| TransportError::ConnectFailed {
                address: key.clone(),
                reason: "no broker at this address".to_string(),
            })?;
        connect_shared(
            neighbour_config(&self.template, descriptor),
            Arc::new(broker.client()),
            descriptor,
        )
        .await
    }
}
