use std::{path::Path, time::Duration};

use bytes::Bytes;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    error::{FabricError, FabricResult},
    logging::LoggingConfig,
    transport::{frame, BrokerQos, EndpointConfig, MessageQos, TopicTemplate},
};

/// Переменная окружения с путём к файлу настроек.
pub const CONFIG_PATH_ENV: &str = "FABRIC_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub name: String,
    /// Локальные интерфейсы в порядке предпочтения.
    pub interfaces: Vec<String>,
    pub broker_host: String,
    pub broker_port: u16,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            interfaces: vec!["lo0".to_string()],
            broker_host: "localhost".to_string(),
            broker_port: 1883,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub qos: BrokerQos,
    pub default_message_qos: MessageQos,
    pub clean_session: bool,
    pub retain: bool,
    pub keep_alive_secs: u64,
    /// Отрицательное значение: повторять без ограничения.
    pub connect_retries: i64,
    pub retry_interval_ms: u64,
    pub subscribe_retry_interval_ms: u64,
    pub connection_topic: Option<String>,
    pub connect_message: String,
    pub disconnect_message: String,
    pub datagram_enabled: bool,
    pub datagram_port: Option<u16>,
    pub max_datagram_payload: usize,
    /// `0` — буфер канала без ограничения.
    pub buffer_limit: usize,
    pub callback_workers: usize,
    pub client_id: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            qos: BrokerQos::ExactlyOnce,
            default_message_qos: MessageQos::Reliable,
            clean_session: true,
            retain: false,
            keep_alive_secs: 60,
            connect_retries: 3,
            retry_interval_ms: 1000,
            subscribe_retry_interval_ms: 5000,
            connection_topic: None,
            connect_message: "1".to_string(),
            disconnect_message: "0".to_string(),
            datagram_enabled: false,
            datagram_port: None,
            max_datagram_payload: 500,
            buffer_limit: 0,
            callback_workers: 1,
            client_id: None,
        }
    }
}

/// Шаблоны корневых топиков. `{0}` — имя узла.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub command_bus: TopicTemplate,
    pub feed_bus: TopicTemplate,
    pub registry_bus: TopicTemplate,
    pub local_commands: TopicTemplate,
    /// Фиды источников, подключённых к узлу напрямую.
    pub local_feeds: TopicTemplate,
    /// Повтор ранее записанных фидов.
    pub local_replay: TopicTemplate,
    /// Доставка фидов локальным подписчикам.
    pub local_offramp: TopicTemplate,
    /// `{0}` узел, `{1}` актор, `{2}` платформа.
    pub clients: TopicTemplate,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            command_bus: "$fabric/{0}/$commands/$bus".into(),
            feed_bus: "$fabric/{0}/$feeds/$bus".into(),
            registry_bus: "$fabric/{0}/$registry/$command".into(),
            local_commands: "$fabric/{0}/$commands/$local".into(),
            local_feeds: "$fabric/{0}/$feeds/$onramp".into(),
            local_replay: "$fabric/{0}/$feeds/$replay".into(),
            local_offramp: "$fabric/{0}/$feeds/$offramp".into(),
            clients: "$fabric/{0}/$clients/{1}/{2}".into(),
        }
    }
}

impl TopicsConfig {
    fn all(&self) -> [(&'static str, &TopicTemplate); 8] {
        [
            ("command_bus", &self.command_bus),
            ("feed_bus", &self.feed_bus),
            ("registry_bus", &self.registry_bus),
            ("local_commands", &self.local_commands),
            ("local_feeds", &self.local_feeds),
            ("local_replay", &self.local_replay),
            ("local_offramp", &self.local_offramp),
            ("clients", &self.clients),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub default_timeout_secs: u64,
    pub timeout_check_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 120,
            timeout_check_secs: 60,
        }
    }
}

impl NotificationSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_check_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Время жизни UID в кэше дубликатов.
    pub flood_ttl_ms: u64,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            flood_ttl_ms: 600_000,
        }
    }
}

/// Настройки узла целиком.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node: NodeSettings,
    pub transport: TransportSettings,
    pub topics: TopicsConfig,
    pub notifications: NotificationSettings,
    pub routing: RoutingSettings,
    /// Имена сервисов, создаваемых при старте.
    pub services: Vec<String>,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, файл из
    /// `FABRIC_CONFIG`, затем переменные `FABRIC_*`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("node.name", "local")?
            .set_default("node.broker_host", "localhost")?
            .set_default("node.broker_port", 1883)?
            .set_default("transport.qos", 2)?
            .set_default("transport.connect_retries", 3)?
            .set_default("services", vec!["notification", "feed-publisher"])?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // FABRIC_NODE__NAME -> node.name
        let cfg = builder
            .add_source(
                Environment::with_prefix("FABRIC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("node.interfaces")
                    .with_list_parse_key("services"),
            )
            .build()?;

        cfg.try_deserialize()
    }

    pub fn validate(&self) -> FabricResult<()> {
        if self.node.name.trim().is_empty() {
            return Err(FabricError::Config("node.name is empty".to_string()));
        }
        if self.node.interfaces.is_empty() {
            return Err(FabricError::Config(
                "node.interfaces must list at least one interface".to_string(),
            ));
        }
        if self.transport.max_datagram_payload < frame::MAX_HEADER_LEN {
            return Err(FabricError::Config(format!(
                "transport.max_datagram_payload {} is smaller than the frame header ({})",
                self.transport.max_datagram_payload,
                frame::MAX_HEADER_LEN
            )));
        }
        if let Some((name, _)) = self
            .topics
            .all()
            .into_iter()
            .find(|(_, t)| !t.has_node_placeholder())
        {
            return Err(FabricError::Config(format!(
                "topics.{name} has no {{0}} node placeholder"
            )));
        }
        self.logging
            .validate()
            .map_err(|e| FabricError::Config(e.to_string()))
    }

    /// Параметры endpoint для брокера `host:port`.
    pub fn endpoint_config(
        &self,
        host: &str,
        port: u16,
    ) -> EndpointConfig {
        let t = &self.transport;
        EndpointConfig {
            host: host.to_string(),
            port,
            client_id: t.client_id.clone(),
            broker_qos: t.qos,
            default_message_qos: t.default_message_qos,
            clean_session: t.clean_session,
            retain: t.retain,
            keep_alive: Duration::from_secs(t.keep_alive_secs),
            connect_retries: u32::try_from(t.connect_retries).ok(),
            retry_interval: Duration::from_millis(t.retry_interval_ms),
            subscribe_retry_interval: Duration::from_millis(t.subscribe_retry_interval_ms),
            connection_topic: t.connection_topic.clone(),
            connect_message: Bytes::from(t.connect_message.clone()),
            disconnect_message: Bytes::from(t.disconnect_message.clone()),
            datagram_enabled: t.datagram_enabled,
            datagram_port: t.datagram_port,
            max_datagram_payload: t.max_datagram_payload,
            buffer_limit: t.buffer_limit,
            callback_workers: t.callback_workers.max(1),
        }
    }

    /// Параметры endpoint домашнего брокера.
    pub fn home_endpoint_config(&self) -> EndpointConfig {
        self.endpoint_config(&self.node.broker_host, self.node.broker_port)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    /// Тест проверяет значения по умолчанию без файла и окружения.
    #[test]
    #[serial]
    fn test_defaults() {
        let s = Settings::load_from(None).unwrap();
        assert_eq!(s.node.name, "local");
        assert_eq!(s.node.interfaces, vec!["lo0".to_string()]);
        assert_eq!(s.node.broker_port, 1883);
        assert_eq!(s.transport.qos, BrokerQos::ExactlyOnce);
        assert_eq!(s.transport.connect_retries, 3);
        assert_eq!(s.transport.max_datagram_payload, 500);
        assert_eq!(s.notifications.default_timeout_secs, 120);
        assert_eq!(s.routing.flood_ttl_ms, 600_000);
        assert_eq!(
            s.services,
            vec!["notification".to_string(), "feed-publisher".to_string()]
        );
        assert_eq!(
            s.topics.local_offramp.format(&["local"]),
            "$fabric/local/$feeds/$offramp"
        );
        assert!(s.validate().is_ok());
    }

    /// Тест проверяет переопределение из файла и затем из окружения.
    #[test]
    #[serial]
    fn test_file_then_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[node]\nname = \"n1\"\ninterfaces = [\"eth0\", \"wlan0\"]\n\n[transport]\nconnect_retries = -1\n"
        )
        .unwrap();

        std::env::set_var("FABRIC_NODE__BROKER_PORT", "1884");
        let s = Settings::load_from(Some(file.path()));
        std::env::remove_var("FABRIC_NODE__BROKER_PORT");
        let s = s.unwrap();

        assert_eq!(s.node.name, "n1");
        assert_eq!(s.node.interfaces, vec!["eth0".to_string(), "wlan0".to_string()]);
        assert_eq!(s.node.broker_port, 1884);
        assert_eq!(s.transport.connect_retries, -1);
        assert_eq!(s.home_endpoint_config().connect_retries, None);
    }

    /// Тест проверяет отказ валидации.
    #[test]
    fn test_validate_rejects() {
        let mut s = Settings::default();
        s.node.interfaces.clear();
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.transport.max_datagram_payload = 4;
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.topics.feed_bus = "static/feeds".into();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("feed_bus"));
    }

    /// Тест проверяет перенос транспортных настроек в `EndpointConfig`.
    #[test]
    fn test_endpoint_config() {
        let mut s = Settings::default();
        s.transport.connection_topic = Some("$fabric/n1/$connection".into());
        s.transport.callback_workers = 0;
        let cfg = s.endpoint_config("10.0.0.2", 1885);
        assert_eq!(cfg.host, "10.0.0.2");
        assert_eq!(cfg.port, 1885);
        assert_eq!(cfg.connect_retries, Some(3));
        assert_eq!(cfg.retry_interval, Duration::from_millis(1000));
        assert_eq!(cfg.connect_message, Bytes::from_static(b"1"));
        assert_eq!(cfg.callback_workers, 1);
        assert_eq!(cfg.connection_topic.as_deref(), Some("$fabric/n1/$connection"));
    }
}
