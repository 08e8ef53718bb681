//! Транспортный уровень: соединение с брокером, каналы, датаграммный путь.

pub mod broker;
pub mod callback;
pub mod channel;
pub mod connectivity;
pub mod endpoint;
pub mod executor;
pub mod frame;
pub mod message;
pub mod qos;
pub mod topic;

mod intern;

pub use broker::{
    BrokerClient, BrokerEvent, ConnectOptions, EventSender, LastWill, LoopbackBroker,
    LoopbackClient, MqttBroker,
};
pub use callback::{callback_fn, CallbackId, ChannelCallback, FnCallback};
pub use channel::Channel;
pub use connectivity::{ConnectivityEvent, ConnectivityListener, EndpointIdentity, Registration};
pub use endpoint::{
    generate_client_id, Endpoint, EndpointConfig, EndpointState, EndpointStats,
};
pub use executor::Executor;
pub use message::ChannelMessage;
pub use qos::{BrokerQos, MessageQos};
pub use topic::TopicTemplate;

pub(crate) use intern::TopicInterner;
