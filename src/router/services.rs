use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::{
    MessageSender, NotificationKey, NotificationManager, ServiceMessage, ACTION_PUBLISH,
    FEED_PUBLISHER_SERVICE, NOTIFICATION_SERVICE, PROP_DELIVER_TO_FEED,
};
use crate::{config::TopicsConfig, error::StateError};

/// Имя встроенного сервиса, который только логирует запросы.
pub const ECHO_SERVICE: &str = "echo";

/// Что доступно сервису при создании.
#[derive(Clone)]
pub struct ServiceContext {
    pub home: String,
    pub topics: TopicsConfig,
    pub notifications: Arc<NotificationManager>,
    pub sender: Arc<dyn MessageSender>,
}

/// Обработчик сервисных сообщений одного имени.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Обрабатывает запрос. `response` — ответ узла, если запрошены
    /// уведомления; `client_responses` — заготовки уведомлений клиенту на
    /// начальном узле. `Ok(None)` — сообщение поглощено и дальше не идёт.
    async fn handle(
        &self,
        request: ServiceMessage,
        response: Option<&mut ServiceMessage>,
        client_responses: &mut [ServiceMessage],
    ) -> anyhow::Result<Option<ServiceMessage>>;
}

pub type ServiceFactory = Arc<dyn Fn(&ServiceContext) -> Arc<dyn ServiceHandler> + Send + Sync>;

/// Фабрики сервисов по имени.
#[derive(Clone)]
pub struct ServiceRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceRegistry {
    /// Реестр без сервисов.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Реестр со встроенными сервисами.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(NOTIFICATION_SERVICE, |ctx| {
            Arc::new(NotificationService {
                notifications: Arc::clone(&ctx.notifications),
            })
        });
        registry.register(FEED_PUBLISHER_SERVICE, |ctx| {
            Arc::new(FeedPublisherService {
                offramp: ctx.topics.local_offramp.format(&[&ctx.home]),
                sender: Arc::clone(&ctx.sender),
            })
        });
        registry.register(ECHO_SERVICE, |ctx| {
            Arc::new(EchoService {
                home: ctx.home.clone(),
            })
        });
        registry
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        factory: F,
    ) where
        F: Fn(&ServiceContext) -> Arc<dyn ServiceHandler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.factories.contains_key(name)
    }

    /// Создаёт сервисы по списку имён.
    pub fn instantiate(
        &self,
        names: &[String],
        ctx: &ServiceContext,
    ) -> Result<ServiceDispatcher, StateError> {
        let mut handlers = HashMap::new();
        for name in names {
            let factory = self
                .factories
                .get(name)
                .ok_or_else(|| StateError::UnknownService { name: name.clone() })?;
            handlers.insert(name.clone(), factory(ctx));
            info!(service = %name, "service started");
        }
        Ok(ServiceDispatcher { handlers })
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ServiceRegistry")
            .field("services", &names)
            .finish()
    }
}

/// Созданные сервисы узла.
#[derive(Clone, Default)]
pub struct ServiceDispatcher {
    handlers: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl ServiceDispatcher {
    pub fn get(
        &self,
        name: &str,
    ) -> Option<&Arc<dyn ServiceHandler>> {
        self.handlers.get(name)
    }

    pub fn insert(
        &mut self,
        handler: Arc<dyn ServiceHandler>,
    ) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Доставляет пришедшие уведомления зарегистрированным получателям.
struct NotificationService {
    notifications: Arc<NotificationManager>,
}

#[async_trait]
impl ServiceHandler for NotificationService {
    fn name(&self) -> &str {
        NOTIFICATION_SERVICE
    }

    async fn handle(
        &self,
        request: ServiceMessage,
        _response: Option<&mut ServiceMessage>,
        _client_responses: &mut [ServiceMessage],
    ) -> anyhow::Result<Option<ServiceMessage>> {
        if !request.is_notification() {
            anyhow::bail!("service '{NOTIFICATION_SERVICE}' expects a notification message");
        }

        if request.feeds.is_empty() {
            let key = NotificationKey::new(&request.correlation_id, None);
            self.notifications.fire(&key, request.event).await;
        } else {
            for feed in &request.feeds {
                let key = NotificationKey::new(&request.correlation_id, Some(feed));
                self.notifications.fire(&key, request.event).await;
            }
        }
        Ok(Some(request))
    }
}

/// Публикует полезную нагрузку разосланного фида в `<offramp>/<feed>`
/// домашнего брокера. Сообщение идёт дальше по маршруту.
struct FeedPublisherService {
    offramp: String,
    sender: Arc<dyn MessageSender>,
}

#[async_trait]
impl ServiceHandler for FeedPublisherService {
    fn name(&self) -> &str {
        FEED_PUBLISHER_SERVICE
    }

    async fn handle(
        &self,
        request: ServiceMessage,
        _response: Option<&mut ServiceMessage>,
        _client_responses: &mut [ServiceMessage],
    ) -> anyhow::Result<Option<ServiceMessage>> {
        if request.action.as_deref() != Some(ACTION_PUBLISH) {
            debug!(uid = %request.uid, action = ?request.action, "feed publisher ignores action");
            return Ok(Some(request));
        }
        let Some(feed) = request.property(PROP_DELIVER_TO_FEED) else {
            anyhow::bail!("publish request without '{PROP_DELIVER_TO_FEED}'");
        };
        let topic = format!("{}/{feed}", self.offramp);
        let payload = request.payload.clone().unwrap_or_default();
        self.sender.publish_local(&topic, Bytes::from(payload)).await?;
        debug!(%topic, uid = %request.uid, "feed published");
        Ok(Some(request))
    }
}

struct EchoService {
    home: String,
}

#[async_trait]
impl ServiceHandler for EchoService {
    fn name(&self) -> &str {
        ECHO_SERVICE
    }

    async fn handle(
        &self,
        request: ServiceMessage,
        _response: Option<&mut ServiceMessage>,
        _client_responses: &mut [ServiceMessage],
    ) -> anyhow::Result<Option<ServiceMessage>> {
        debug!(
            node = %self.home,
            correlation = %request.correlation_id,
            action = request.action.as_deref().unwrap_or(""),
            "echo"
        );
        Ok(Some(request))
    }
}
