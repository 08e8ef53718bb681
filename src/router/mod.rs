//! Маршрутизация сервисных сообщений и уведомления о результате.

pub mod handler;
pub mod message;
pub mod notification;
pub mod routing;
pub mod sender;
pub mod services;

pub use handler::MessageHandler;
pub use message::{
    MessageKind, NotificationEvent, ServiceMessage, ACTION_PUBLISH, FEED_PUBLISHER_SERVICE,
    NOTIFICATION_SERVICE, PROP_DELIVER_TO_FEED, PROP_NOTIFICATION_ACTION, PROP_NOTIFICATION_EVENT,
    PROP_NOTIFYING_NODE, PROP_NOTIFYING_SERVICE,
};
pub use notification::{NotificationKey, NotificationManager, NotificationRecord};
pub use routing::{DuplicateCache, Route, RouteContext};
pub use sender::MessageSender;
pub use services::{
    ServiceContext, ServiceDispatcher, ServiceFactory, ServiceHandler, ServiceRegistry, ECHO_SERVICE,
};
