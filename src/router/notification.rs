use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, trace, warn};

use super::{MessageKind, MessageSender, NotificationEvent, ServiceMessage};

/// Ключ регистрации: идентификатор корреляции и необязательный фид.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationKey {
    pub correlation_id: String,
    pub feed: Option<String>,
}

impl NotificationKey {
    pub fn new(
        correlation_id: impl Into<String>,
        feed: Option<&str>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            feed: feed.map(str::to_string),
        }
    }
}

/// Уведомление, ожидающее события.
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub event: NotificationEvent,
    pub actor: Option<String>,
    pub platform: Option<String>,
    pub message: ServiceMessage,
    /// `None` — без таймаута.
    pub deadline: Option<Instant>,
    /// Не удаляется вместе с соседними регистрациями.
    pub retained: bool,
}

impl NotificationRecord {
    pub fn new(
        message: ServiceMessage,
        timeout: Option<Duration>,
        retained: bool,
    ) -> Self {
        Self {
            event: message.event,
            actor: message.actor.clone(),
            platform: message.platform.clone(),
            deadline: timeout.map(|t| Instant::now() + t),
            message,
            retained,
        }
    }
}

/// Регистрации уведомлений и их доставка по событиям и таймаутам.
pub struct NotificationManager {
    home: String,
    records: Mutex<HashMap<NotificationKey, Vec<NotificationRecord>>>,
    sender: Arc<dyn MessageSender>,
}

impl NotificationManager {
    pub fn new(
        home: impl Into<String>,
        sender: Arc<dyn MessageSender>,
    ) -> Arc<Self> {
        Arc::new(Self {
            home: home.into(),
            records: Mutex::new(HashMap::new()),
            sender,
        })
    }

    pub fn add(
        &self,
        key: NotificationKey,
        record: NotificationRecord,
    ) {
        trace!(correlation = %key.correlation_id, event = ?record.event, "notification registered");
        self.records.lock().entry(key).or_default().push(record);
    }

    /// Удаляет регистрации. С `remove_retained` удаляется весь ключ, иначе
    /// только незакреплённые записи всех ключей той же корреляции.
    pub fn remove(
        &self,
        key: &NotificationKey,
        remove_retained: bool,
    ) {
        let mut records = self.records.lock();
        if remove_retained {
            records.remove(key);
            return;
        }
        drop_unretained(&mut records, &key.correlation_id);
    }

    /// Доставляет регистрации ключа с событием `event`. Возвращает число
    /// доставленных.
    ///
    /// Выбор записей и удаление соседних регистраций при итоговом событии
    /// происходят под одной блокировкой, поэтому корреляция получает не
    /// больше одного итогового уведомления.
    pub async fn fire(
        &self,
        key: &NotificationKey,
        event: NotificationEvent,
    ) -> usize {
        let matched: Vec<NotificationRecord> = {
            let mut records = self.records.lock();
            let matched: Vec<_> = match records.get(key) {
                Some(list) => list.iter().filter(|r| r.event == event).cloned().collect(),
                None => return 0,
            };
            if event.is_final() {
                drop_unretained(&mut records, &key.correlation_id);
            }
            matched
        };

        debug!(
            correlation = %key.correlation_id,
            ?event,
            count = matched.len(),
            "firing notifications"
        );
        for record in &matched {
            self.deliver(record).await;
        }
        matched.len()
    }

    /// Доставляет просроченные регистрации и удаляет незакреплённые
    /// регистрации тех же корреляций. Закреплённая запись срабатывает по
    /// таймауту один раз.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(NotificationKey, NotificationRecord)> = {
            let mut records = self.records.lock();
            let mut expired = Vec::new();
            for (key, list) in records.iter_mut() {
                for record in list.iter_mut() {
                    if record.deadline.is_some_and(|d| d <= now) {
                        expired.push((key.clone(), record.clone()));
                        record.deadline = None;
                    }
                }
            }
            for (key, _) in &expired {
                drop_unretained(&mut records, &key.correlation_id);
            }
            expired
        };

        for (key, record) in &expired {
            debug!(correlation = %key.correlation_id, "notification timed out");
            self.deliver(record).await;
        }
        expired.len()
    }

    /// Периодическая проверка таймаутов.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.sweep().await;
            }
        })
    }

    pub fn len(&self) -> usize {
        self.records.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn deliver(
        &self,
        record: &NotificationRecord,
    ) {
        let result = match record.message.kind {
            MessageKind::ClientNotification => match (&record.actor, &record.platform) {
                (Some(actor), Some(platform)) => {
                    self.sender
                        .send_client_notification(actor, platform, &record.message)
                        .await
                }
                _ => return,
            },
            _ => {
                self.sender
                    .send_service_message(&record.message, &[self.home.clone()])
                    .await
            }
        };
        if let Err(e) = result {
            warn!(correlation = %record.message.correlation_id, error = %e, "notification delivery failed");
        }
    }
}

fn drop_unretained(
    records: &mut HashMap<NotificationKey, Vec<NotificationRecord>>,
    correlation_id: &str,
) {
    records.retain(|k, list| {
        if k.correlation_id == correlation_id {
            list.retain(|r| r.retained);
        }
        !list.is_empty()
    });
}
