use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fabric::{
    config::Settings,
    neighbour::{LoopbackConnector, MemoryRegistry, NeighbourEntry, NodeDescriptor},
    router::{
        MessageKind, NotificationEvent, Route, ServiceHandler, ServiceMessage, ServiceRegistry,
        NOTIFICATION_SERVICE,
    },
    transport::{Channel, Endpoint, EndpointConfig, LoopbackBroker},
    Fabric,
};
use parking_lot::Mutex;

const TRACER: &str = "tracer";

type Seen = Arc<Mutex<Vec<(String, Option<String>)>>>;

/// Сервис, запоминающий узел и действие каждого запроса.
struct Tracer {
    home: String,
    seen: Seen,
}

#[async_trait]
impl ServiceHandler for Tracer {
    fn name(&self) -> &str {
        TRACER
    }

    async fn handle(
        &self,
        request: ServiceMessage,
        _response: Option<&mut ServiceMessage>,
        _client_responses: &mut [ServiceMessage],
    ) -> anyhow::Result<Option<ServiceMessage>> {
        self.seen
            .lock()
            .push((self.home.clone(), request.action.clone()));
        Ok(Some(request))
    }
}

/// Два узла со своими брокерами, видящие друг друга через общий реестр.
struct Pair {
    b1: Arc<LoopbackBroker>,
    b2: Arc<LoopbackBroker>,
    n1: Fabric,
    n2: Fabric,
    seen: Seen,
}

fn settings(name: &str) -> Settings {
    let mut settings = Settings::default();
    settings.node.name = name.to_string();
    settings.node.broker_host = format!("{name}.local");
    settings.services = vec![NOTIFICATION_SERVICE.to_string(), TRACER.to_string()];
    settings
}

fn services(seen: &Seen) -> ServiceRegistry {
    let mut registry = ServiceRegistry::with_builtins();
    let seen = Arc::clone(seen);
    registry.register(TRACER, move |ctx| {
        Arc::new(Tracer {
            home: ctx.home.clone(),
            seen: Arc::clone(&seen),
        })
    });
    registry
}

async fn pair() -> Pair {
    let b1 = LoopbackBroker::new();
    let b2 = LoopbackBroker::new();

    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(NeighbourEntry::new(
        "n1",
        NodeDescriptor::new("n2", "lo0", "n2.local", 1883),
        true,
    ));
    registry.insert(NeighbourEntry::new(
        "n2",
        NodeDescriptor::new("n1", "lo0", "n1.local", 1883),
        true,
    ));

    let connector = Arc::new(LoopbackConnector::new(EndpointConfig::default()));
    connector.add_broker("n1.local", 1883, Arc::clone(&b1));
    connector.add_broker("n2.local", 1883, Arc::clone(&b2));

    let seen: Seen = Arc::default();
    let registry_services = services(&seen);
    let n1 = Fabric::start(
        settings("n1"),
        Arc::new(b1.client()),
        registry.clone(),
        connector.clone(),
        &registry_services,
    )
    .await
    .unwrap();
    let n2 = Fabric::start(
        settings("n2"),
        Arc::new(b2.client()),
        registry,
        connector,
        &registry_services,
    )
    .await
    .unwrap();

    Pair {
        b1,
        b2,
        n1,
        n2,
        seen,
    }
}

/// Клиент брокера, слушающий топик уведомлений актора.
async fn client_inbox(
    broker: &Arc<LoopbackBroker>,
    topic: &str,
) -> (Endpoint, Arc<Channel>) {
    let client = Endpoint::new(EndpointConfig::default(), Arc::new(broker.client()));
    client.connect().await.unwrap();
    let inbox = client.open_channel(Some(topic), None).await.unwrap();
    (client, inbox)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Тест проверяет статический маршрут из двух узлов: запрос выполняется
/// только на конечном узле, а клиент на начальном узле получает итоговое
/// уведомление.
#[tokio::test]
async fn test_static_route_notifies_origin_client() {
    let pair = pair().await;
    let (_client, inbox) = client_inbox(&pair.b1, "$fabric/n1/$clients/alice/web").await;

    let request = ServiceMessage::new(TRACER)
        .with_action("ping")
        .with_routing(Route::static_route(["n1", "n2"]))
        .with_actor("alice", "web")
        .with_notification(Some(30));
    let correlation = request.correlation_id.clone();
    pair.b1
        .publish("$fabric/n1/$commands/$bus", request.encode().unwrap(), false);

    let mut events = Vec::new();
    while !events.contains(&NotificationEvent::Handled) {
        let msg = tokio::time::timeout(Duration::from_secs(5), inbox.read_message())
            .await
            .unwrap()
            .unwrap();
        let note = ServiceMessage::decode(&msg.payload).unwrap();
        assert_eq!(note.kind, MessageKind::ClientNotification);
        assert_eq!(note.correlation_id, correlation);
        assert_eq!(note.action.as_deref(), Some("ping"));
        events.push(note.event);
    }
    assert!(!events.contains(&NotificationEvent::Failed));
    assert!(!events.contains(&NotificationEvent::Timeout));

    assert_eq!(
        *pair.seen.lock(),
        vec![("n2".to_string(), Some("ping".to_string()))]
    );
    assert!(pair.n1.notifications().is_empty());
    assert_eq!(
        pair.n1.neighbours().connected_neighbours().await,
        vec![NodeDescriptor::new("n2", "lo0", "n2.local", 1883)]
    );

    pair.n1.shutdown().await.unwrap();
    pair.n2.shutdown().await.unwrap();
}

/// Тест проверяет сообщение без маршрута: оно выполняется на текущем узле,
/// а уведомление возвращается клиенту через локальные команды.
#[tokio::test]
async fn test_unrouted_message_is_actioned_locally() {
    let pair = pair().await;
    let (_client, inbox) = client_inbox(&pair.b2, "$fabric/n2/$clients/bob/cli").await;

    let request = ServiceMessage::new(TRACER)
        .with_action("local")
        .with_actor("bob", "cli")
        .with_notification(None);
    pair.n2.submit(request).await;

    assert_eq!(
        *pair.seen.lock(),
        vec![("n2".to_string(), Some("local".to_string()))]
    );
    let msg = tokio::time::timeout(Duration::from_secs(5), inbox.read_message())
        .await
        .unwrap()
        .unwrap();
    let note = ServiceMessage::decode(&msg.payload).unwrap();
    assert_eq!(note.event, NotificationEvent::Handled);
    wait_until(|| pair.n2.notifications().is_empty()).await;
    assert!(pair.n2.neighbours().connected_neighbours().await.is_empty());

    pair.n1.shutdown().await.unwrap();
    pair.n2.shutdown().await.unwrap();
}

/// Тест проверяет рассылку с выполнением по пути и подавление повторно
/// пришедшего сообщения по UID.
#[tokio::test]
async fn test_flood_actions_en_route_once_per_node() {
    let pair = pair().await;

    let mut request = ServiceMessage::new(TRACER)
        .with_action("flood")
        .with_routing(Route::flood("n1", 60_000));
    request.action_en_route = true;
    let replay = ServiceMessage {
        routing: Some(Route::flood("n1", 60_000).for_next_hop("n1")),
        ..request.clone()
    };
    pair.n1.submit(request).await;

    wait_until(|| pair.seen.lock().len() == 2).await;
    let mut nodes: Vec<String> = pair.seen.lock().iter().map(|(n, _)| n.clone()).collect();
    nodes.sort();
    assert_eq!(nodes, vec!["n1".to_string(), "n2".to_string()]);

    pair.b2
        .publish("$fabric/n2/$commands/$bus", replay.encode().unwrap(), false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pair.seen.lock().len(), 2);

    pair.n1.shutdown().await.unwrap();
    pair.n2.shutdown().await.unwrap();
}

/// Тест проверяет, что повторное отключение соседа ничего не делает.
#[tokio::test]
async fn test_disconnect_neighbour_twice() {
    let pair = pair().await;
    let manager = pair.n1.neighbours();
    let connection = manager.connect_neighbour("n2").await.unwrap();
    let descriptor = connection.descriptor().clone();
    assert_eq!(pair.b2.session_count(), 2);

    assert!(manager.disconnect_neighbour(&descriptor, false).await.is_none());
    assert!(manager.disconnect_neighbour(&descriptor, false).await.is_none());
    assert!(manager.connected_neighbours().await.is_empty());
    assert_eq!(pair.b2.session_count(), 1);

    pair.n1.shutdown().await.unwrap();
    pair.n2.shutdown().await.unwrap();
}
