use parking_lot::RwLock;
use tracing::debug;

use super::NodeDescriptor;

/// Запись о соседе, известная реестру.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighbourEntry {
    /// Узел, которому виден сосед.
    pub home: String,
    /// Локальный интерфейс, через который сосед достижим.
    pub local_interface: String,
    pub descriptor: NodeDescriptor,
    /// Задан в настройках, а не найден автообнаружением.
    pub is_static: bool,
    pub available: bool,
}

impl NeighbourEntry {
    pub fn new(
        home: impl Into<String>,
        descriptor: NodeDescriptor,
        is_static: bool,
    ) -> Self {
        Self {
            home: home.into(),
            local_interface: descriptor.interface.clone(),
            descriptor,
            is_static,
            available: true,
        }
    }
}

/// Внешний реестр топологии. Все вызовы синхронные и локальные.
pub trait NeighbourRegistry: Send + Sync + 'static {
    /// Доступные записи соседа `target`, видимые с узла `home`.
    fn available_neighbours(
        &self,
        home: &str,
        target: &str,
    ) -> Vec<NeighbourEntry>;

    fn mark_unavailable(
        &self,
        home: &str,
        descriptor: &NodeDescriptor,
    );

    /// Возвращает всем статическим соседям узла `home` признак доступности.
    fn mark_static_neighbours_available(
        &self,
        home: &str,
    );

    /// Дескрипторы, ведущие на брокер `address:port`.
    fn descriptors_for_address(
        &self,
        address: &str,
        port: u16,
    ) -> Vec<NodeDescriptor>;

    /// Все записи соседей узла `home`.
    fn neighbours(
        &self,
        home: &str,
    ) -> Vec<NeighbourEntry>;
}

/// Реестр в памяти.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<Vec<NeighbourEntry>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет запись или заменяет запись с тем же `home` и дескриптором.
    pub fn insert(
        &self,
        entry: NeighbourEntry,
    ) {
        let mut entries = self.entries.write();
        match entries
            .iter_mut()
            .find(|e| e.home == entry.home && e.descriptor == entry.descriptor)
        {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn remove(
        &self,
        home: &str,
        descriptor: &NodeDescriptor,
    ) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !(e.home == home && &e.descriptor == descriptor));
        entries.len() != before
    }

    pub fn is_available(
        &self,
        home: &str,
        descriptor: &NodeDescriptor,
    ) -> Option<bool> {
        self.entries
            .read()
            .iter()
            .find(|e| e.home == home && &e.descriptor == descriptor)
            .map(|e| e.available)
    }
}

impl NeighbourRegistry for MemoryRegistry {
    fn available_neighbours(
        &self,
        home: &str,
        target: &str,
    ) -> Vec<NeighbourEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.home == home && e.descriptor.node == target && e.available)
            .cloned()
            .collect()
    }

    fn mark_unavailable(
        &self,
        home: &str,
        descriptor: &NodeDescriptor,
    ) {
        for entry in self
            .entries
            .write()
            .iter_mut()
            .filter(|e| e.home == home && &e.descriptor == descriptor)
        {
            entry.available = false;
            debug!(neighbour = %descriptor, "neighbour marked unavailable");
        }
    }

    fn mark_static_neighbours_available(
        &self,
        home: &str,
    ) {
        for entry in self
            .entries
            .write()
            .iter_mut()
            .filter(|e| e.home == home && e.is_static)
        {
            entry.available = true;
        }
    }

    fn descriptors_for_address(
        &self,
        address: &str,
        port: u16,
    ) -> Vec<NodeDescriptor> {
        let mut found: Vec<NodeDescriptor> = Vec::new();
        for entry in self.entries.read().iter() {
            let d = &entry.descriptor;
            if d.address == address && d.port == port && !found.contains(d) {
                found.push(d.clone());
            }
        }
        found
    }

    fn neighbours(
        &self,
        home: &str,
    ) -> Vec<NeighbourEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.home == home)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MemoryRegistry {
        let r = MemoryRegistry::new();
        r.insert(NeighbourEntry::new(
            "n1",
            NodeDescriptor::new("n2", "eth0", "10.0.0.2", 1883),
            true,
        ));
        r.insert(NeighbourEntry::new(
            "n1",
            NodeDescriptor::new("n2", "wlan0", "10.1.0.2", 1883),
            false,
        ));
        r.insert(NeighbourEntry::new(
            "n3",
            NodeDescriptor::new("n2", "eth0", "10.0.0.2", 1883),
            true,
        ));
        r
    }

    /// Тест проверяет выборку доступных соседей и пометку недоступности.
    #[test]
    fn test_available_and_mark() {
        let r = registry();
        assert_eq!(r.available_neighbours("n1", "n2").len(), 2);

        let eth = NodeDescriptor::new("n2", "eth0", "10.0.0.2", 1883);
        r.mark_unavailable("n1", &eth);
        let left = r.available_neighbours("n1", "n2");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].local_interface, "wlan0");
        // у другого узла запись не тронута
        assert_eq!(r.is_available("n3", &eth), Some(true));
    }

    /// Тест проверяет, что сброс касается только статических соседей.
    #[test]
    fn test_reset_static_only() {
        let r = registry();
        let eth = NodeDescriptor::new("n2", "eth0", "10.0.0.2", 1883);
        let wlan = NodeDescriptor::new("n2", "wlan0", "10.1.0.2", 1883);
        r.mark_unavailable("n1", &eth);
        r.mark_unavailable("n1", &wlan);
        assert!(r.available_neighbours("n1", "n2").is_empty());

        r.mark_static_neighbours_available("n1");
        assert_eq!(r.is_available("n1", &eth), Some(true));
        assert_eq!(r.is_available("n1", &wlan), Some(false));
    }

    /// Тест проверяет поиск дескрипторов по адресу без повторов.
    #[test]
    fn test_descriptors_for_address() {
        let r = registry();
        let found = r.descriptors_for_address("10.0.0.2", 1883);
        assert_eq!(found, vec![NodeDescriptor::new("n2", "eth0", "10.0.0.2", 1883)]);
        assert!(r.descriptors_for_address("10.9.9.9", 1883).is_empty());
        assert_eq!(r.neighbours("n1").len(), 2);
    }
}
