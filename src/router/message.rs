use std::collections::BTreeMap;

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Route, RouteContext};
use crate::error::{ProtocolError, RoutingError};

/// Имя сервиса, обрабатывающего уведомления.
pub const NOTIFICATION_SERVICE: &str = "notification";

pub const PROP_NOTIFICATION_EVENT: &str = "notification.event";
pub const PROP_NOTIFICATION_ACTION: &str = "notification.action";
pub const PROP_NOTIFYING_NODE: &str = "notifying.node";
pub const PROP_NOTIFYING_SERVICE: &str = "notifying.service";

/// Сервис, публикующий разосланный фид подписчикам каждого узла.
pub const FEED_PUBLISHER_SERVICE: &str = "feed-publisher";
pub const ACTION_PUBLISH: &str = "publish";
/// Фид, в который публикуется полезная нагрузка.
pub const PROP_DELIVER_TO_FEED: &str = "deliver.to.feed";

/// Код события сервисного сообщения.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
#[serde(try_from = "u8", into = "u8")]
pub enum NotificationEvent {
    Unknown = 0,
    Connected = 1,
    Disconnected = 2,
    ActorRequest = 3,
    SubscriptionLost = 4,
    HandledEnRoute = 5,
    Handled = 6,
    Timeout = 7,
    Failed = 8,
    ServiceRequest = 9,
    Subscribed = 10,
    Unsubscribed = 11,
}

impl Default for NotificationEvent {
    fn default() -> Self {
        Self::Unknown
    }
}

impl NotificationEvent {
    /// Итоговое событие: после него незакреплённые регистрации того же
    /// запроса удаляются.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Handled | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Service,
    /// Уведомление между узлами.
    Notification,
    /// Уведомление клиенту (актору).
    ClientNotification,
}

/// Сервисное сообщение шины команд. На проводе JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMessage {
    pub correlation_id: String,
    pub uid: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub event: NotificationEvent,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Дескрипторы фидов, к которым относится сообщение.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<String>,
    #[serde(default)]
    pub notification: bool,
    /// Таймаут уведомления в секундах, `None` — из настроек.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_timeout: Option<u64>,
    #[serde(default)]
    pub action_en_route: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<Route>,
    /// Отметка дубликата на текущем узле. Не передаётся.
    #[serde(skip)]
    pub duplicate: bool,
}

impl ServiceMessage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            uid: Uuid::new_v4().to_string(),
            kind: MessageKind::Service,
            service: service.into(),
            action: None,
            event: NotificationEvent::ServiceRequest,
            properties: BTreeMap::new(),
            payload: None,
            feeds: Vec::new(),
            notification: false,
            notification_timeout: None,
            action_en_route: false,
            actor: None,
            platform: None,
            routing: None,
            duplicate: false,
        }
    }

    pub fn with_action(
        mut self,
        action: impl Into<String>,
    ) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_routing(
        mut self,
        routing: Route,
    ) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn with_actor(
        mut self,
        actor: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        self.actor = Some(actor.into());
        self.platform = Some(platform.into());
        self
    }

    /// Запросить уведомления о результате.
    pub fn with_notification(
        mut self,
        timeout_secs: Option<u64>,
    ) -> Self {
        self.notification = true;
        self.notification_timeout = timeout_secs;
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_notification(&self) -> bool {
        self.kind != MessageKind::Service
    }

    pub fn property(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Заготовка уведомления клиенту о событии `event` по запросу.
    pub fn client_notification(
        event: NotificationEvent,
        request: &ServiceMessage,
    ) -> Self {
        let mut message = Self::new(NOTIFICATION_SERVICE);
        message.kind = MessageKind::ClientNotification;
        message.correlation_id = request.correlation_id.clone();
        message.event = event;
        message.action = request.action.clone();
        message.actor = request.actor.clone();
        message.platform = request.platform.clone();
        message.feeds = request.feeds.clone();
        message
    }

    /// Ответ узла на запрос: идёт обратным маршрутом к узлу-источнику.
    pub fn node_response(
        request: &ServiceMessage,
        ctx: &RouteContext,
    ) -> Self {
        let mut message = Self::new(NOTIFICATION_SERVICE);
        message.kind = MessageKind::Notification;
        message.correlation_id = request.correlation_id.clone();
        message.feeds = request.feeds.clone();
        message.routing = request
            .routing
            .as_ref()
            .and_then(|route| route.return_route(ctx));

        let end = request.routing.as_ref().map(|r| r.end_node(ctx));
        message.event = match end {
            None | Some(None) => NotificationEvent::Handled,
            Some(Some(node)) if node == ctx.home => NotificationEvent::Handled,
            Some(Some(_)) => NotificationEvent::HandledEnRoute,
        };
        message.action_en_route = false;

        message
            .properties
            .insert(PROP_NOTIFICATION_EVENT.to_string(), u8::from(message.event).to_string());
        if let Some(action) = &request.action {
            message
                .properties
                .insert(PROP_NOTIFICATION_ACTION.to_string(), action.clone());
        }
        message
            .properties
            .insert(PROP_NOTIFYING_NODE.to_string(), ctx.home.clone());
        message
            .properties
            .insert(PROP_NOTIFYING_SERVICE.to_string(), request.service.clone());
        message
    }

    /// Меняет событие уведомления вместе со свойством.
    pub fn set_event(
        &mut self,
        event: NotificationEvent,
    ) {
        self.event = event;
        if self.properties.contains_key(PROP_NOTIFICATION_EVENT) {
            self.properties
                .insert(PROP_NOTIFICATION_EVENT.to_string(), u8::from(event).to_string());
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

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(home: &str) -> RouteContext {
        RouteContext::new(home, Vec::new())
    }

    /// Тест проверяет JSON-форму и восстановление сообщения.
    #[test]
    fn test_wire_form() {
        let msg = ServiceMessage::new("echo")
            .with_action("ping")
            .with_routing(Route::static_route(["n1", "n2"]))
            .with_notification(Some(30));
        let bytes = msg.encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["service"], "echo");
        assert_eq!(json["event"], 9);
        assert_eq!(json["notificationTimeout"], 30);
        assert_eq!(json["routing"]["type"], "static");
        assert!(json.get("duplicate").is_none());

        assert_eq!(ServiceMessage::decode(&bytes).unwrap(), msg);
    }

    /// Тест проверяет ошибку разбора некорректных байт.
    #[test]
    fn test_decode_malformed() {
        let err = ServiceMessage::decode(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage { .. }));
        let err = ServiceMessage::decode(br#"{"event": 99}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage { .. }));
    }

    /// Тест проверяет событие ответа узла на конечном и промежуточном узле.
    #[test]
    fn test_node_response_event() {
        let request =
            ServiceMessage::new("echo").with_routing(Route::static_route(["n1", "n2", "n3"]));

        let at_end = ServiceMessage::node_response(&request, &ctx("n3"));
        assert_eq!(at_end.event, NotificationEvent::Handled);
        assert_eq!(at_end.correlation_id, request.correlation_id);
        assert_eq!(at_end.routing, Some(Route::static_route(["n3", "n2", "n1"])));
        assert_eq!(at_end.property(PROP_NOTIFYING_NODE), Some("n3"));
        assert_eq!(at_end.property(PROP_NOTIFYING_SERVICE), Some("echo"));

        let en_route = ServiceMessage::node_response(&request, &ctx("n2"));
        assert_eq!(en_route.event, NotificationEvent::HandledEnRoute);
        assert_eq!(en_route.property(PROP_NOTIFICATION_EVENT), Some("5"));

        let unrouted = ServiceMessage::node_response(&ServiceMessage::new("echo"), &ctx("n1"));
        assert_eq!(unrouted.event, NotificationEvent::Handled);
        assert!(unrouted.routing.is_none());
    }

    /// Тест проверяет заготовку клиентского уведомления.
    #[test]
    fn test_client_notification() {
        let request = ServiceMessage::new("echo").with_actor("alice", "web");
        let n = ServiceMessage::client_notification(NotificationEvent::Timeout, &request);
        assert_eq!(n.kind, MessageKind::ClientNotification);
        assert_eq!(n.correlation_id, request.correlation_id);
        assert_ne!(n.uid, request.uid);
        assert_eq!(n.actor.as_deref(), Some("alice"));
        assert!(n.is_notification());
    }
}
