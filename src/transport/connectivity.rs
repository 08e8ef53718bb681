use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::RwLock;

/// Кто именно сменил состояние: адрес брокера и, для соединений с
/// соседями, узел и локальный интерфейс.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointIdentity {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub node: Option<String>,
    pub interface: Option<String>,
}

impl fmt::Display for EndpointIdentity {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match (&self.node, &self.interface) {
            (Some(node), Some(iface)) => {
                write!(f, "{node}@{iface} ({}:{})", self.host, self.port)
            }
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Переход жизненного цикла endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Connected,
    Disconnected,
    Reconnected,
    Closed,
    /// Повторы исчерпаны, endpoint непригоден.
    Lost,
}

/// Наблюдатель за соединением. Вызывается в задаче, выполняющей переход.
pub trait ConnectivityListener: Send + Sync + 'static {
    fn on_event(
        &self,
        endpoint: &EndpointIdentity,
        event: ConnectivityEvent,
    );
}

impl<F> ConnectivityListener for F
where
    F: Fn(&EndpointIdentity, ConnectivityEvent) + Send + Sync + 'static,
{
    fn on_event(
        &self,
        endpoint: &EndpointIdentity,
        event: ConnectivityEvent,
    ) {
        self(endpoint, event)
    }
}

/// Список наблюдателей одного endpoint.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Arc<dyn ConnectivityListener>)>>,
}

impl ListenerRegistry {
    pub(crate) fn register(
        self: &Arc<Self>,
        listener: Arc<dyn ConnectivityListener>,
    ) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        Registration {
            id,
            registry: Arc::downgrade(self),
        }
    }

    pub(crate) fn notify(
        &self,
        endpoint: &EndpointIdentity,
        event: ConnectivityEvent,
    ) {
        let snapshot: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener.on_event(endpoint, event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    fn remove(
        &self,
        id: u64,
    ) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }
}

/// Регистрация наблюдателя. Наблюдатель снимается при `deregister` или drop.
#[must_use = "dropping a Registration deregisters the listener"]
pub struct Registration {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Registration {
    pub fn deregister(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn identity() -> EndpointIdentity {
        EndpointIdentity {
            client_id: "c".into(),
            host: "h".into(),
            port: 1,
            node: None,
            interface: None,
        }
    }

    /// Тест проверяет доставку событий и снятие регистрации при drop.
    #[test]
    fn test_register_notify_deregister() {
        let registry = Arc::new(ListenerRegistry::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reg = registry.register(Arc::new(
            move |_: &EndpointIdentity, e: ConnectivityEvent| sink.lock().push(e),
        ));

        registry.notify(&identity(), ConnectivityEvent::Connected);
        assert_eq!(registry.len(), 1);

        reg.deregister();
        registry.notify(&identity(), ConnectivityEvent::Lost);
        assert_eq!(registry.len(), 0);
        assert_eq!(*seen.lock(), vec![ConnectivityEvent::Connected]);
    }

    #[test]
    fn test_identity_display() {
        let mut id = identity();
        assert_eq!(id.to_string(), "h:1");
        id.node = Some("n2".into());
        id.interface = Some("eth0".into());
        assert_eq!(id.to_string(), "n2@eth0 (h:1)");
    }
}
