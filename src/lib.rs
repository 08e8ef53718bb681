/// Node I/O facade: home channels, service and feed sends.
pub mod bus;
/// Node settings loading (defaults, file, environment).
pub mod config;
/// Error families and the crate-level `FabricError`.
pub mod error;
/// Node assembly: shared state handed to every dispatcher.
pub mod fabric;
/// Inbound feed handling: republish on the feed bus, flood `$` feeds.
pub mod feeds;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Neighbour connections: path selection, failover, loss handling.
pub mod neighbour;
/// Service message routing and notification delivery.
pub mod router;
/// Reference-counted channels over one endpoint.
pub mod shared;
/// Broker transport: endpoints, channels, topics, datagram framing.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

pub use bus::Bus;
pub use config::Settings;
pub use error::{FabricError, FabricResult};
pub use fabric::Fabric;
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Neighbour management and the registry collaborator.
pub use neighbour::{
    EndpointConnector, LoopbackConnector, MemoryRegistry, MqttConnector, NeighbourEntry,
    NeighbourManager, NeighbourRegistry, NodeDescriptor,
};
/// Routing and notifications.
pub use router::{
    MessageHandler, NotificationEvent, NotificationManager, Route, ServiceHandler, ServiceMessage,
    ServiceRegistry,
};
pub use shared::{SharedChannel, SharedEndpoint};
/// Transport layer.
pub use transport::{
    BrokerClient, BrokerQos, Channel, ChannelCallback, ChannelMessage, Endpoint, EndpointConfig,
    EndpointState, LoopbackBroker, MessageQos, MqttBroker,
};
