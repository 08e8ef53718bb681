//! Соединения с соседними узлами.

pub mod channels;
pub mod connector;
pub mod descriptor;
pub mod manager;
pub mod registry;

pub use channels::NeighbourChannels;
pub use connector::{EndpointConnector, LoopbackConnector, MqttConnector};
pub use descriptor::NodeDescriptor;
pub use manager::{NeighbourConnection, NeighbourManager};
pub use registry::{MemoryRegistry, NeighbourEntry, NeighbourRegistry};
