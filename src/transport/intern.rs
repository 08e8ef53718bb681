use std::sync::Arc;

use dashmap::DashMap;

/// Предел пула, после которого из него вытесняются топики, на которые не
/// ссылается ни одно сообщение.
const PRUNE_THRESHOLD: usize = 1024;

/// Пул `Arc<str>` для имён топиков входящих сообщений одного endpoint:
/// один и тот же топик приходит многократно, и каждое сообщение держит
/// лишь ссылку.
#[derive(Debug, Default)]
pub(crate) struct TopicInterner {
    topics: DashMap<Box<str>, Arc<str>>,
}

impl TopicInterner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Возвращает общий `Arc<str>` для топика.
    pub(crate) fn intern(
        &self,
        topic: &str,
    ) -> Arc<str> {
        if let Some(existing) = self.topics.get(topic) {
            return Arc::clone(existing.value());
        }
        if self.topics.len() >= PRUNE_THRESHOLD {
            self.prune();
        }
        Arc::clone(
            self.topics
                .entry(Box::from(topic))
                .or_insert_with(|| Arc::from(topic))
                .value(),
        )
    }

    /// Убирает топики, которые держит только пул.
    pub(crate) fn prune(&self) {
        self.topics.retain(|_, topic| Arc::strong_count(topic) > 1);
    }

    pub(crate) fn clear(&self) {
        self.topics.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Проверяет, что повторный вызов возвращает тот же `Arc`.
    #[test]
    fn intern_returns_same_arc() {
        let pool = TopicInterner::new();
        let a1 = pool.intern("$fabric/n1/$feeds/$bus/t");
        let a2 = pool.intern(&String::from("$fabric/n1/$feeds/$bus/t"));
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(pool.len(), 1);
    }

    /// Проверяет, что пул не растёт без предела: неиспользуемые топики
    /// вытесняются, живые остаются.
    #[test]
    fn intern_prunes_unused_topics() {
        let pool = TopicInterner::new();
        let held = pool.intern("feeds/held");
        for i in 0..PRUNE_THRESHOLD * 3 {
            pool.intern(&format!("feeds/{i}"));
        }
        assert!(pool.len() <= PRUNE_THRESHOLD);
        assert!(Arc::ptr_eq(&held, &pool.intern("feeds/held")));

        pool.clear();
        assert_eq!(pool.len(), 0);
    }
}
