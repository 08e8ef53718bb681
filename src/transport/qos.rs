use serde::{Deserialize, Serialize};

/// Качество обслуживания на уровне сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageQos {
    /// Взять значение по умолчанию из настроек канала.
    #[default]
    Default,
    /// Доставка через брокер.
    Reliable,
    /// Допускается датаграммный путь.
    BestEffort,
    Unknown,
}

/// Уровень QoS протокола брокера (0, 1, 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BrokerQos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl MessageQos {
    /// Разрешает `Default` в значение по умолчанию канала.
    pub fn resolve(
        self,
        default: MessageQos,
    ) -> MessageQos {
        match self {
            MessageQos::Default => default,
            other => other,
        }
    }

    /// Итоговый QoS для кадра длиной `frame_len`.
    ///
    /// `BestEffort` повышается до `Reliable`, если кадр больше порога
    /// датаграммного пути.
    pub fn effective(
        self,
        default: MessageQos,
        frame_len: usize,
        max_datagram_payload: usize,
    ) -> MessageQos {
        match self.resolve(default) {
            MessageQos::BestEffort if frame_len > max_datagram_payload => MessageQos::Reliable,
            resolved => resolved,
        }
    }
}

impl BrokerQos {
    pub fn level(self) -> u8 {
        match self {
            BrokerQos::AtMostOnce => 0,
            BrokerQos::AtLeastOnce => 1,
            BrokerQos::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for BrokerQos {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(BrokerQos::AtMostOnce),
            1 => Ok(BrokerQos::AtLeastOnce),
            2 => Ok(BrokerQos::ExactlyOnce),
            other => Err(format!("invalid broker QoS level {other}, expected 0..=2")),
        }
    }
}

impl From<BrokerQos> for u8 {
    fn from(q: BrokerQos) -> Self {
        q.level()
    }
}

impl From<BrokerQos> for rumqttc::QoS {
    fn from(q: BrokerQos) -> Self {
        match q {
            BrokerQos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            BrokerQos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            BrokerQos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    /// Тест проверяет разрешение и повышение QoS.
    #[rstest]
    #[case(MessageQos::Default, MessageQos::BestEffort, 100, MessageQos::BestEffort)]
    #[case(MessageQos::Default, MessageQos::BestEffort, 600, MessageQos::Reliable)]
    #[case(MessageQos::BestEffort, MessageQos::Reliable, 600, MessageQos::Reliable)]
    #[case(MessageQos::BestEffort, MessageQos::Reliable, 500, MessageQos::BestEffort)]
    #[case(MessageQos::Reliable, MessageQos::BestEffort, 10, MessageQos::Reliable)]
    #[case(MessageQos::Default, MessageQos::Reliable, 10, MessageQos::Reliable)]
    fn test_effective_qos(
        #[case] requested: MessageQos,
        #[case] default: MessageQos,
        #[case] frame_len: usize,
        #[case] expected: MessageQos,
    ) {
        assert_eq!(requested.effective(default, frame_len, 500), expected);
    }

    #[test]
    fn test_broker_qos_levels() {
        assert_eq!(BrokerQos::try_from(2).unwrap(), BrokerQos::ExactlyOnce);
        assert!(BrokerQos::try_from(3).is_err());
        assert_eq!(u8::from(BrokerQos::AtLeastOnce), 1);
    }
}
