//! Узел целиком: настройки, шина, соседи, маршрутизатор и уведомления.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    bus::Bus,
    config::Settings,
    error::FabricResult,
    feeds::FeedRelay,
    neighbour::{EndpointConnector, NeighbourManager, NeighbourRegistry},
    router::{
        DuplicateCache, MessageHandler, MessageSender, NotificationManager, ServiceContext,
        ServiceMessage, ServiceRegistry,
    },
    shared::SharedEndpoint,
    transport::{BrokerClient, ChannelCallback, ChannelMessage, Endpoint},
};

/// Общее состояние узла, передаваемое обработчикам при создании.
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

struct FabricInner {
    settings: Settings,
    registry: Arc<dyn NeighbourRegistry>,
    neighbours: Arc<NeighbourManager>,
    bus: Arc<Bus>,
    notifications: Arc<NotificationManager>,
    duplicates: Arc<DuplicateCache>,
    handler: Arc<MessageHandler>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Fabric {
    /// Подключается к домашнему брокеру, создаёт сервисы из
    /// `settings.services` и открывает домашние каналы.
    pub async fn start(
        settings: Settings,
        home_broker: Arc<dyn BrokerClient>,
        registry: Arc<dyn NeighbourRegistry>,
        connector: Arc<dyn EndpointConnector>,
        services: &ServiceRegistry,
    ) -> FabricResult<Self> {
        Self::start_with_feeds(settings, home_broker, registry, connector, services, None).await
    }

    /// То же, что [`Fabric::start`], с получателем сообщений шины фидов.
    /// Фиды источников узла переиздаются и рассылаются в любом случае.
    pub async fn start_with_feeds(
        settings: Settings,
        home_broker: Arc<dyn BrokerClient>,
        registry: Arc<dyn NeighbourRegistry>,
        connector: Arc<dyn EndpointConnector>,
        services: &ServiceRegistry,
        feeds: Option<Arc<dyn ChannelCallback>>,
    ) -> FabricResult<Self> {
        settings.validate()?;
        let home = settings.node.name.clone();

        let endpoint = SharedEndpoint::new(Endpoint::new(settings.home_endpoint_config(), home_broker));
        endpoint.connect().await?;

        let neighbours = NeighbourManager::new(
            home.clone(),
            settings.node.interfaces.clone(),
            Arc::clone(&registry),
            connector,
            settings.topics.clone(),
        );
        let bus = Arc::new(Bus::new(endpoint, Arc::clone(&neighbours)));
        let sender: Arc<dyn MessageSender> = bus.clone();
        let notifications = NotificationManager::new(home.clone(), Arc::clone(&sender));

        let ctx = ServiceContext {
            home: home.clone(),
            topics: settings.topics.clone(),
            notifications: Arc::clone(&notifications),
            sender: Arc::clone(&sender),
        };
        let dispatcher = services.instantiate(&settings.services, &ctx)?;

        let duplicates = Arc::new(DuplicateCache::new());
        let handler = Arc::new(MessageHandler::new(
            home.clone(),
            Arc::clone(&registry),
            dispatcher,
            Arc::clone(&notifications),
            sender,
            Arc::clone(&duplicates),
            settings.notifications.default_timeout(),
        ));

        let commands = Arc::new(CommandListener {
            handler: Arc::downgrade(&handler),
        });
        let relay = FeedRelay::new(&settings, &bus, feeds);
        let feed_inputs = relay.inputs();
        bus.open_home_channels(commands, Arc::new(relay), &feed_inputs)
            .await?;

        let sweeper = notifications.spawn_sweeper(settings.notifications.timeout_check_interval());
        info!(node = %home, services = ?settings.services, "fabric node started");

        Ok(Self {
            inner: Arc::new(FabricInner {
                settings,
                registry,
                neighbours,
                bus,
                notifications,
                duplicates,
                handler,
                sweeper: Mutex::new(Some(sweeper)),
            }),
        })
    }

    pub fn home(&self) -> &str {
        &self.inner.settings.node.name
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &Arc<dyn NeighbourRegistry> {
        &self.inner.registry
    }

    pub fn neighbours(&self) -> &Arc<NeighbourManager> {
        &self.inner.neighbours
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.inner.bus
    }

    pub fn notifications(&self) -> &Arc<NotificationManager> {
        &self.inner.notifications
    }

    pub fn handler(&self) -> &Arc<MessageHandler> {
        &self.inner.handler
    }

    /// Отправляет сообщение от имени узла, как если бы его прислал клиент.
    pub async fn submit(
        &self,
        message: ServiceMessage,
    ) {
        self.inner.handler.handle_service_message(message).await;
    }

    /// Останавливает проверку таймаутов, закрывает каналы и соединения.
    pub async fn shutdown(&self) -> FabricResult<()> {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        self.inner.duplicates.purge_expired();
        let result = self.inner.bus.close().await;
        info!(node = %self.home(), "fabric node stopped");
        result
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Fabric").field("home", &self.home()).finish()
    }
}

/// Разбирает входящие команды и передаёт их маршрутизатору.
struct CommandListener {
    handler: Weak<MessageHandler>,
}

#[async_trait]
impl ChannelCallback for CommandListener {
    async fn handle_message(
        &self,
        message: ChannelMessage,
    ) -> anyhow::Result<()> {
        let Some(handler) = self.handler.upgrade() else {
            return Ok(());
        };
        match ServiceMessage::decode(&message.payload) {
            Ok(request) => handler.handle_service_message(request).await,
            Err(e) => warn!(topic = %message.topic, error = %e, "malformed command message dropped"),
        }
        Ok(())
    }
}
