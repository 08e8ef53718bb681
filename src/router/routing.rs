use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Что маршрут знает об узле, на котором сейчас обрабатывается сообщение.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    pub home: String,
    /// Имена соседних узлов.
    pub neighbours: Vec<String>,
}

impl RouteContext {
    pub fn new(
        home: impl Into<String>,
        neighbours: Vec<String>,
    ) -> Self {
        Self {
            home: home.into(),
            neighbours,
        }
    }
}

/// Маршрут сервисного сообщения.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Route {
    /// Фиксированный список узлов: от первого к последнему.
    Static { nodes: Vec<String> },
    /// Рассылка всем соседям с подавлением дубликатов по UID.
    Flood {
        start: String,
        #[serde(default)]
        previous: Option<String>,
        /// Время жизни UID в кэше дубликатов, `0` — бессрочно.
        ttl_ms: u64,
        #[serde(default)]
        retained: bool,
    },
}

impl Route {
    pub fn static_route<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Static {
            nodes: nodes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn flood(
        start: impl Into<String>,
        ttl_ms: u64,
    ) -> Self {
        Self::Flood {
            start: start.into(),
            previous: None,
            ttl_ms,
            retained: false,
        }
    }

    pub fn start_node(&self) -> Option<&str> {
        match self {
            Self::Static { nodes } => nodes.first().map(String::as_str),
            Self::Flood { start, .. } => Some(start),
        }
    }

    /// Конечный узел. `None` — не определён.
    pub fn end_node(
        &self,
        ctx: &RouteContext,
    ) -> Option<String> {
        match self {
            Self::Static { nodes } => nodes.last().cloned(),
            Self::Flood { .. } => Some(
                self.next_nodes(ctx)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| ctx.home.clone()),
            ),
        }
    }

    /// Следующие узлы после текущего.
    ///
    /// Для статического маршрута узел вне списка считается стоящим перед
    /// первым узлом.
    pub fn next_nodes(
        &self,
        ctx: &RouteContext,
    ) -> Vec<String> {
        match self {
            Self::Static { nodes } => {
                let next = nodes
                    .iter()
                    .position(|n| *n == ctx.home)
                    .map_or(0, |i| i + 1);
                nodes.get(next).cloned().into_iter().collect()
            }
            Self::Flood { previous, .. } => {
                let mut next: Vec<String> = Vec::new();
                for node in &ctx.neighbours {
                    if *node == ctx.home || previous.as_ref() == Some(node) || next.contains(node) {
                        continue;
                    }
                    next.push(node.clone());
                }
                next
            }
        }
    }

    /// Маршрут обратно к начальному узлу, если путь известен.
    pub fn return_route(
        &self,
        ctx: &RouteContext,
    ) -> Option<Route> {
        match self {
            Self::Static { nodes } => Some(Self::Static {
                nodes: nodes.iter().rev().cloned().collect(),
            }),
            Self::Flood {
                start, previous, ..
            } => {
                if *start == ctx.home {
                    Some(Self::static_route([ctx.home.clone()]))
                } else if previous.as_ref() == Some(start) {
                    Some(Self::static_route([ctx.home.clone(), start.clone()]))
                } else {
                    None
                }
            }
        }
    }

    /// Маршрут для пересылки с узла `home`.
    pub fn for_next_hop(
        &self,
        home: &str,
    ) -> Route {
        match self {
            Self::Static { .. } => self.clone(),
            Self::Flood {
                start,
                ttl_ms,
                retained,
                ..
            } => Self::Flood {
                start: start.clone(),
                previous: Some(home.to_string()),
                ttl_ms: *ttl_ms,
                retained: *retained,
            },
        }
    }

    /// Проверяет UID по кэшу и запоминает его. Статический маршрут
    /// дубликатов не знает.
    pub fn is_duplicate(
        &self,
        uid: &str,
        cache: &DuplicateCache,
    ) -> bool {
        match self {
            Self::Static { .. } => false,
            Self::Flood { ttl_ms, .. } => cache.check_and_insert(uid, Duration::from_millis(*ttl_ms)),
        }
    }
}

/// UID уже обработанных сообщений со сроком хранения.
#[derive(Debug, Default)]
pub struct DuplicateCache {
    /// UID → срок хранения (`None` — бессрочно)
    entries: DashMap<String, Option<Instant>>,
}

impl DuplicateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true`, если UID уже встречался и ещё не устарел. Иначе UID
    /// запоминается на `ttl` (нулевой `ttl` — бессрочно).
    pub fn check_and_insert(
        &self,
        uid: &str,
        ttl: Duration,
    ) -> bool {
        let now = Instant::now();
        let expiry = (!ttl.is_zero()).then(|| now + ttl);
        match self.entries.entry(uid.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_some_and(|at| at <= now) {
                    entry.insert(expiry);
                    false
                } else {
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expiry);
                false
            }
        }
    }

    /// Удаляет устаревшие UID. Возвращает их число.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, expiry| expiry.map_or(true, |at| at > now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn ctx(
        home: &str,
        neighbours: &[&str],
    ) -> RouteContext {
        RouteContext::new(home, neighbours.iter().map(|s| s.to_string()).collect())
    }

    /// Тест проверяет следующий и конечный узлы статического маршрута.
    #[rstest]
    #[case("n1", vec!["n2"])]
    #[case("n2", vec!["n3"])]
    #[case("n3", vec![])]
    #[case("n9", vec!["n1"])]
    fn test_static_next_nodes(
        #[case] home: &str,
        #[case] expected: Vec<&str>,
    ) {
        let route = Route::static_route(["n1", "n2", "n3"]);
        let c = ctx(home, &[]);
        assert_eq!(route.next_nodes(&c), expected);
        assert_eq!(route.end_node(&c).as_deref(), Some("n3"));
        assert_eq!(route.start_node(), Some("n1"));
    }

    /// Тест проверяет выбор соседей для рассылки и конечный узел.
    #[test]
    fn test_flood_next_nodes() {
        let route = Route::flood("n1", 1000).for_next_hop("n1");
        let c = ctx("n2", &["n1", "n3", "n2", "n4", "n3"]);
        assert_eq!(route.next_nodes(&c), vec!["n3".to_string(), "n4".to_string()]);
        assert_eq!(route.end_node(&c).as_deref(), Some("n3"));

        let leaf = ctx("n5", &["n1"]);
        assert!(route.next_nodes(&leaf).is_empty());
        assert_eq!(route.end_node(&leaf).as_deref(), Some("n5"));
    }

    /// Тест проверяет обратные маршруты.
    #[test]
    fn test_return_routes() {
        let route = Route::static_route(["n1", "n2", "n3"]);
        assert_eq!(
            route.return_route(&ctx("n3", &[])),
            Some(Route::static_route(["n3", "n2", "n1"]))
        );

        let flood = Route::flood("n1", 0);
        assert_eq!(
            flood.return_route(&ctx("n1", &[])),
            Some(Route::static_route(["n1"]))
        );
        let one_hop = flood.for_next_hop("n1");
        assert_eq!(
            one_hop.return_route(&ctx("n2", &[])),
            Some(Route::static_route(["n2", "n1"]))
        );
        let two_hops = one_hop.for_next_hop("n2");
        assert_eq!(two_hops.return_route(&ctx("n3", &[])), None);
    }

    /// Тест проверяет подавление дубликатов и истечение срока хранения UID.
    #[tokio::test(start_paused = true)]
    async fn test_duplicate_cache_ttl() {
        let cache = DuplicateCache::new();
        let route = Route::flood("n1", 100);
        assert!(!route.is_duplicate("u1", &cache));
        assert!(route.is_duplicate("u1", &cache));
        assert!(!Route::static_route(["n1"]).is_duplicate("u1", &cache));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(!route.is_duplicate("u1", &cache));
        assert_eq!(cache.len(), 1);
    }

    /// Тест проверяет JSON-форму маршрутов.
    #[test]
    fn test_route_json() {
        let json = serde_json::to_value(Route::flood("n1", 5).for_next_hop("n1")).unwrap();
        assert_eq!(json["type"], "flood");
        assert_eq!(json["ttlMs"], 5);
        assert_eq!(json["previous"], "n1");
    }
}
