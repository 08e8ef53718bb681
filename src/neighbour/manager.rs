use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{EndpointConnector, NeighbourChannels, NeighbourRegistry, NodeDescriptor};
use crate::{
    config::TopicsConfig,
    error::FabricResult,
    shared::SharedEndpoint,
    transport::{ConnectivityEvent, ConnectivityListener, EndpointIdentity, EndpointState, Registration},
};

/// Установленное соединение с соседом.
pub struct NeighbourConnection {
    descriptor: NodeDescriptor,
    endpoint: SharedEndpoint,
    channels: NeighbourChannels,
    _registration: Registration,
}

impl NeighbourConnection {
    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    pub fn endpoint(&self) -> &SharedEndpoint {
        &self.endpoint
    }

    pub fn channels(&self) -> &NeighbourChannels {
        &self.channels
    }

    fn is_usable(&self) -> bool {
        !matches!(
            self.endpoint.state(),
            EndpointState::Lost | EndpointState::Closed
        )
    }

    async fn close(&self) {
        self.channels.close().await;
        if let Err(e) = self.endpoint.close().await {
            warn!(neighbour = %self.descriptor, error = %e, "failed to close neighbour endpoint");
        }
    }
}

impl fmt::Debug for NeighbourConnection {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NeighbourConnection")
            .field("descriptor", &self.descriptor)
            .field("state", &self.endpoint.state())
            .finish()
    }
}

/// Соединения узла с соседями.
///
/// Для каждого соседа выбирает путь по приоритету локальных интерфейсов,
/// держит таблицу соединений по дескриптору и при потере соединения
/// помечает путь недоступным в реестре.
pub struct NeighbourManager {
    home: String,
    interfaces: Vec<String>,
    registry: Arc<dyn NeighbourRegistry>,
    connector: Arc<dyn EndpointConnector>,
    topics: TopicsConfig,
    connections: Mutex<HashMap<NodeDescriptor, Arc<NeighbourConnection>>>,
    in_flight: DashMap<NodeDescriptor, Arc<Mutex<()>>>,
    this: Weak<NeighbourManager>,
}

impl NeighbourManager {
    pub fn new(
        home: impl Into<String>,
        interfaces: Vec<String>,
        registry: Arc<dyn NeighbourRegistry>,
        connector: Arc<dyn EndpointConnector>,
        topics: TopicsConfig,
    ) -> Arc<Self> {
        let home = home.into();
        Arc::new_cyclic(|this| Self {
            home,
            interfaces,
            registry,
            connector,
            topics,
            connections: Mutex::new(HashMap::new()),
            in_flight: DashMap::new(),
            this: this.clone(),
        })
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    pub fn topics(&self) -> &TopicsConfig {
        &self.topics
    }

    pub fn registry(&self) -> &Arc<dyn NeighbourRegistry> {
        &self.registry
    }

    /// Выбирает путь к узлу `node`: первый локальный интерфейс из списка
    /// приоритетов, для которого в реестре есть доступная запись.
    pub fn create_descriptor(
        &self,
        node: &str,
    ) -> Option<NodeDescriptor> {
        self.select_descriptor(node, &HashSet::new())
    }

    fn select_descriptor(
        &self,
        node: &str,
        tried: &HashSet<NodeDescriptor>,
    ) -> Option<NodeDescriptor> {
        let entries = self.registry.available_neighbours(&self.home, node);
        self.interfaces.iter().find_map(|iface| {
            entries
                .iter()
                .find(|e| &e.local_interface == iface && !tried.contains(&e.descriptor))
                .map(|e| e.descriptor.clone())
        })
    }

    /// Соединение с узлом `node`: из таблицы или новое.
    ///
    /// Неудачный путь помечается недоступным, и выбирается следующий. Когда
    /// путей не остаётся, статические соседи снова помечаются доступными и
    /// ещё не опробованные за этот вызов пути пробуются один раз.
    ///
    /// Таблица соединений не блокируется на время подключения: параллельные
    /// вызовы ждут друг друга только для одного и того же пути.
    pub async fn connect_neighbour(
        &self,
        node: &str,
    ) -> Option<Arc<NeighbourConnection>> {
        let mut tried = HashSet::new();
        let mut statics_reset = false;
        loop {
            let Some(descriptor) = self.select_descriptor(node, &tried) else {
                self.registry.mark_static_neighbours_available(&self.home);
                if !statics_reset {
                    statics_reset = true;
                    continue;
                }
                warn!(home = %self.home, node, "no available path to neighbour");
                return None;
            };

            let gate = self.gate(&descriptor);
            let _in_flight = gate.lock().await;

            let stale = {
                let mut connections = self.connections.lock().await;
                match connections.get(&descriptor) {
                    Some(existing) if existing.is_usable() => return Some(Arc::clone(existing)),
                    Some(_) => connections.remove(&descriptor),
                    None => None,
                }
            };
            if let Some(stale) = stale {
                stale.close().await;
            }

            match self.open_connection(&descriptor).await {
                Ok(connection) => {
                    self.connections
                        .lock()
                        .await
                        .insert(descriptor, Arc::clone(&connection));
                    return Some(connection);
                }
                Err(e) => {
                    warn!(neighbour = %descriptor, error = %e, "neighbour connection failed");
                    self.registry.mark_unavailable(&self.home, &descriptor);
                    tried.insert(descriptor);
                }
            }
        }
    }

    /// Замок подключения для одного пути.
    fn gate(
        &self,
        descriptor: &NodeDescriptor,
    ) -> Arc<Mutex<()>> {
        Arc::clone(
            self.in_flight
                .entry(descriptor.clone())
                .or_default()
                .value(),
        )
    }

    async fn open_connection(
        &self,
        descriptor: &NodeDescriptor,
    ) -> FabricResult<Arc<NeighbourConnection>> {
        let endpoint = self.connector.open(descriptor).await?;
        let channels = match NeighbourChannels::open(&endpoint, &self.topics, &descriptor.node).await {
            Ok(channels) => channels,
            Err(e) => {
                if let Err(close_err) = endpoint.close().await {
                    warn!(neighbour = %descriptor, error = %close_err, "failed to close endpoint");
                }
                return Err(e);
            }
        };
        let registration = endpoint.register(Arc::new(LossListener {
            manager: self.this.clone(),
        }));

        info!(home = %self.home, neighbour = %descriptor, "neighbour connected");
        Ok(Arc::new(NeighbourConnection {
            descriptor: descriptor.clone(),
            endpoint,
            channels,
            _registration: registration,
        }))
    }

    /// Закрывает соединение по дескриптору. Повторный вызов ничего не
    /// делает. С `retry` сразу подключается к тому же узлу заново.
    pub async fn disconnect_neighbour(
        &self,
        descriptor: &NodeDescriptor,
        retry: bool,
    ) -> Option<Arc<NeighbourConnection>> {
        let removed = self.connections.lock().await.remove(descriptor);
        match removed {
            Some(connection) => {
                connection.close().await;
                info!(home = %self.home, neighbour = %descriptor, "neighbour disconnected");
            }
            None => debug!(neighbour = %descriptor, "neighbour not connected"),
        }

        if retry {
            self.connect_neighbour(&descriptor.node).await
        } else {
            None
        }
    }

    /// Закрывает все соединения с узлом `node`. Возвращает их число.
    pub async fn disconnect_neighbour_by_name(
        &self,
        node: &str,
    ) -> usize {
        let descriptors: Vec<NodeDescriptor> = self
            .connections
            .lock()
            .await
            .keys()
            .filter(|d| d.node == node)
            .cloned()
            .collect();
        for descriptor in &descriptors {
            self.disconnect_neighbour(descriptor, false).await;
        }
        descriptors.len()
    }

    /// Реакция на окончательную потерю соединения `endpoint`.
    pub async fn end_point_lost(
        &self,
        endpoint: &EndpointIdentity,
    ) {
        let descriptors = match (&endpoint.node, &endpoint.interface) {
            (Some(node), Some(iface)) => vec![NodeDescriptor::new(
                node.clone(),
                iface.clone(),
                endpoint.host.clone(),
                endpoint.port,
            )],
            _ => self
                .registry
                .descriptors_for_address(&endpoint.host, endpoint.port),
        };

        warn!(
            home = %self.home,
            endpoint = %endpoint,
            paths = descriptors.len(),
            "neighbour endpoint lost"
        );
        for descriptor in descriptors {
            self.disconnect_neighbour(&descriptor, false).await;
            self.registry.mark_unavailable(&self.home, &descriptor);
        }
    }

    pub async fn connection(
        &self,
        descriptor: &NodeDescriptor,
    ) -> Option<Arc<NeighbourConnection>> {
        self.connections.lock().await.get(descriptor).cloned()
    }

    pub async fn connected_neighbours(&self) -> Vec<NodeDescriptor> {
        self.connections.lock().await.keys().cloned().collect()
    }

    /// Закрывает все соединения.
    pub async fn close_all(&self) {
        let connections: Vec<_> = self.connections.lock().await.drain().collect();
        for (_, connection) in connections {
            connection.close().await;
        }
    }
}

impl fmt::Debug for NeighbourManager {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NeighbourManager")
            .field("home", &self.home)
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

/// Передаёт потерю соединения менеджеру.
struct LossListener {
    manager: Weak<NeighbourManager>,
}

impl ConnectivityListener for LossListener {
    fn on_event(
        &self,
        endpoint: &EndpointIdentity,
        event: ConnectivityEvent,
    ) {
        if event != ConnectivityEvent::Lost {
            return;
        }
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let identity = endpoint.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { manager.end_point_lost(&identity).await });
            }
            Err(_) => warn!(endpoint = %identity, "no runtime to handle lost neighbour endpoint"),
        }
    }
}
