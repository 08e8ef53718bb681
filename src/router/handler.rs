use std::{sync::Arc, time::Duration};

use tracing::{debug, trace, warn};

use super::{
    DuplicateCache, MessageSender, NotificationEvent, NotificationKey, NotificationManager,
    NotificationRecord, RouteContext, ServiceDispatcher, ServiceMessage,
};
use crate::{error::StateError, neighbour::NeighbourRegistry};

/// Обработка входящих сервисных сообщений узла: выполнить локально,
/// переслать дальше или то и другое.
pub struct MessageHandler {
    home: String,
    registry: Arc<dyn NeighbourRegistry>,
    services: ServiceDispatcher,
    notifications: Arc<NotificationManager>,
    sender: Arc<dyn MessageSender>,
    duplicates: Arc<DuplicateCache>,
    default_timeout: Duration,
}

impl MessageHandler {
    pub fn new(
        home: impl Into<String>,
        registry: Arc<dyn NeighbourRegistry>,
        services: ServiceDispatcher,
        notifications: Arc<NotificationManager>,
        sender: Arc<dyn MessageSender>,
        duplicates: Arc<DuplicateCache>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            home: home.into(),
            registry,
            services,
            notifications,
            sender,
            duplicates,
            default_timeout,
        }
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    /// Контекст маршрутизации: текущий узел и имена его доступных соседей.
    pub fn route_context(&self) -> RouteContext {
        let mut neighbours: Vec<String> = Vec::new();
        for entry in self.registry.neighbours(&self.home) {
            if entry.available && !neighbours.contains(&entry.descriptor.node) {
                neighbours.push(entry.descriptor.node);
            }
        }
        RouteContext::new(self.home.clone(), neighbours)
    }

    /// Выполнять ли сообщение на этом узле.
    ///
    /// Да, если оно не дубликат и верно хотя бы одно: выполнение по пути,
    /// этот узел конечный, маршрута нет, конечный узел не определён.
    pub fn do_action_message(
        &self,
        message: &ServiceMessage,
        ctx: &RouteContext,
    ) -> bool {
        if message.duplicate {
            return false;
        }
        let (at_end_node, no_route, end_undefined) = match &message.routing {
            Some(route) => match route.end_node(ctx) {
                Some(end) => (end == self.home, false, false),
                None => (false, false, true),
            },
            None => (false, true, false),
        };
        message.action_en_route || at_end_node || no_route || end_undefined
    }

    /// Полная обработка одного сервисного сообщения.
    pub async fn handle_service_message(
        &self,
        mut request: ServiceMessage,
    ) {
        let ctx = self.route_context();
        request.duplicate = request
            .routing
            .as_ref()
            .is_some_and(|route| route.is_duplicate(&request.uid, &self.duplicates));
        if request.duplicate {
            debug!(uid = %request.uid, "duplicate service message dropped");
            return;
        }

        let request_copy = request.clone();
        let mut node_response = None;
        let mut client_responses = Vec::new();

        if !request.is_notification() && request.notification {
            let start = request.routing.as_ref().and_then(|r| r.start_node());
            if start.map_or(true, |s| s == self.home) {
                client_responses = [
                    NotificationEvent::Handled,
                    NotificationEvent::Failed,
                    NotificationEvent::Timeout,
                    NotificationEvent::HandledEnRoute,
                ]
                .into_iter()
                .map(|event| ServiceMessage::client_notification(event, &request))
                .collect();
            }
            node_response = Some(ServiceMessage::node_response(&request, &ctx));
        }

        let forward = if self.do_action_message(&request, &ctx) {
            self.dispatch(request, node_response.as_mut(), &mut client_responses)
                .await
        } else {
            Some(request)
        };

        if !client_responses.is_empty() {
            let key = NotificationKey::new(&request_copy.correlation_id, None);
            let timeout = request_copy
                .notification_timeout
                .filter(|secs| *secs > 0)
                .map_or(self.default_timeout, Duration::from_secs);
            for message in client_responses {
                let deadline = (message.event == NotificationEvent::Timeout).then_some(timeout);
                self.notifications
                    .add(key.clone(), NotificationRecord::new(message, deadline, false));
            }
        }

        match forward {
            Some(message) => self.forward(message, &ctx).await,
            None => trace!(uid = %request_copy.uid, "no further routing for service message"),
        }

        if let Some(response) = node_response {
            self.deliver_node_response(response, &ctx).await;
        }
    }

    async fn dispatch(
        &self,
        request: ServiceMessage,
        response: Option<&mut ServiceMessage>,
        client_responses: &mut [ServiceMessage],
    ) -> Option<ServiceMessage> {
        let Some(handler) = self.services.get(&request.service) else {
            let err = StateError::UnknownService {
                name: request.service.clone(),
            };
            warn!(uid = %request.uid, error = %err, "service message not handled");
            return Some(request);
        };

        let fallback = request.clone();
        let mut response = response;
        match handler
            .handle(request, response.as_deref_mut(), client_responses)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    service = %fallback.service,
                    uid = %fallback.uid,
                    error = %e,
                    "service handler failed"
                );
                if let Some(response) = response {
                    response.set_event(NotificationEvent::Failed);
                }
                Some(fallback)
            }
        }
    }

    async fn forward(
        &self,
        mut message: ServiceMessage,
        ctx: &RouteContext,
    ) {
        let Some(route) = message.routing.clone() else {
            return;
        };
        if route.end_node(ctx).as_deref() == Some(self.home.as_str()) {
            return;
        }
        let nodes = route.next_nodes(ctx);
        if nodes.is_empty() {
            return;
        }
        trace!(uid = %message.uid, nodes = ?nodes, "forwarding service message");
        message.routing = Some(route.for_next_hop(&self.home));
        if let Err(e) = self.sender.send_service_message(&message, &nodes).await {
            debug!(uid = %message.uid, error = %e, "forwarding incomplete");
        }
    }

    /// Ответ узла: следующим узлам обратного маршрута или себе.
    async fn deliver_node_response(
        &self,
        response: ServiceMessage,
        ctx: &RouteContext,
    ) {
        let mut nodes = response
            .routing
            .as_ref()
            .map(|route| route.next_nodes(ctx))
            .unwrap_or_default();
        if nodes.is_empty() {
            nodes.push(self.home.clone());
        }
        if let Err(e) = self.sender.send_service_message(&response, &nodes).await {
            warn!(correlation = %response.correlation_id, error = %e, "node response not delivered");
        }
    }
}
