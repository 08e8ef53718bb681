//! Настройки узла: значения по умолчанию, файл и переменные окружения.

pub mod settings;

pub use settings::{
    NodeSettings, NotificationSettings, RoutingSettings, Settings, TopicsConfig,
    TransportSettings, CONFIG_PATH_ENV,
};
