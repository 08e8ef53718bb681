use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Числовой код ошибки. Старшая цифра задаёт семейство:
///
/// | диапазон | семейство                                  |
/// |----------|--------------------------------------------|
/// | `0`      | успех                                      |
/// | `1xxx`   | общие и внутренние                         |
/// | `2xxx`   | состояние: неверный порядок вызовов        |
/// | `6xxx`   | транспорт: брокер, датаграммный путь       |
/// | `7xxx`   | маршрутизация между узлами                 |
/// | `8xxx`   | протокол: кадры, конверты сообщений        |
///
/// Код передаётся в свойствах уведомлений, поэтому обратное
/// преобразование идёт через `TryFrom<u32>`.
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    Success = 0,

    Unknown = 1000,
    Internal = 1003,
    InvalidConfig = 1005,

    InvalidState = 2002,
    ReadModeConflict = 2003,
    MissingTopic = 2004,
    AlreadyConnected = 2005,
    EndpointClosed = 2006,
    Rejected = 2007,
    UnknownService = 2008,

    ConnectionClosed = 6001,
    ConnectionFailed = 6003,
    RetriesExhausted = 6004,
    PublishFailed = 6005,
    SubscribeFailed = 6006,
    DatagramFailed = 6007,
    NotConnected = 6008,

    NoConnection = 7001,
    ForwardFailed = 7002,

    InvalidFrame = 8000,
    InvalidUtf8 = 8001,
    SizeLimit = 8002,
    EncodingError = 8003,
    DecodingError = 8004,
    UnmappedTopic = 8005,
}

impl StatusCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Сбой, который транспорт повторяет сам: подключение, переподключение,
    /// подписка.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed
                | Self::ConnectionClosed
                | Self::SubscribeFailed
                | Self::NotConnected
        )
    }

    /// Детали таких ошибок не покидают узел.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Unknown | Self::Internal)
    }

    /// Неверный вызов API; сообщается сразу, без повторов.
    pub fn is_state_error(&self) -> bool {
        self.family() == "state"
    }

    /// Окончательная потеря соединения: владелец пересоздаёт endpoint.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetriesExhausted | Self::EndpointClosed)
    }

    /// Семейство по диапазону кода.
    pub fn family(&self) -> &'static str {
        match self.code() {
            0 => "success",
            2000..=2999 => "state",
            6000..=6999 => "transport",
            7000..=7999 => "routing",
            8000..=8999 => "protocol",
            _ => "general",
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{}({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?}({})", self, self.code())
        }
    }
}
