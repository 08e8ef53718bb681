use std::fmt;

/// Физический путь к соседу: узел, локальный интерфейс, адрес и порт его
/// брокера.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeDescriptor {
    pub node: String,
    pub interface: String,
    pub address: String,
    pub port: u16,
}

impl NodeDescriptor {
    pub fn new(
        node: impl Into<String>,
        interface: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            node: node.into(),
            interface: interface.into(),
            address: address.into(),
            port,
        }
    }

    /// Ключ адреса брокера: `address:port`.
    pub fn socket_key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}@{} ({}:{})",
            self.node, self.interface, self.address, self.port
        )
    }
}
