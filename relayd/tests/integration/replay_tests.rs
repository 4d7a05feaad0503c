use relay_common::{ForwardingTarget, PollingConfig};
use relayd::transport::MockBehavior;
use relayd::{Agent, Coordinator, HttpCoordinator, HttpTransport, MockTransport, Session, Transport, drain};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{FakeCoordinator, LocalTarget, closed_port, init_test_logging};

const TOKEN: &str = "test-token-0123456789";
const SITE: &str = "shop.example.com";

fn captured(id: &str, method: &str, url: &str) -> Value {
    json!({
        "interception": id,
        "input": {
            "method": method,
            "url": url,
            "headers": {
                "accept": "text/plain",
                "cookie": "session=abc"
            }
        },
        "output": null
    })
}

fn session_for(port: u16) -> Arc<Session> {
    Arc::new(Session::new(ForwardingTarget {
        site: SITE.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        ..Default::default()
    }))
}

fn coordinator_client(fake: &FakeCoordinator) -> Arc<HttpCoordinator> {
    Arc::new(HttpCoordinator::new(&fake.base_url(), TOKEN, Duration::from_secs(5)).unwrap())
}

async fn run_once<C: Coordinator, T: Transport>(
    session: &Arc<Session>,
    coordinator: Arc<C>,
    transport: Arc<T>,
) {
    let mut agent = Agent::new(
        session.clone(),
        coordinator,
        transport,
        PollingConfig::default(),
        Duration::from_secs(5),
    );
    agent.run_cycle().await;
    assert!(
        drain(session, Duration::from_secs(10)).await,
        "replays did not finish"
    );
}

#[tokio::test]
async fn test_get_with_spaces_is_replied() {
    init_test_logging();
    crate::test_log!("TEST START: test_get_with_spaces_is_replied");

    let target = LocalTarget::spawn(200, "ok").await;
    let fake = FakeCoordinator::spawn().await;
    fake.enqueue(captured("it-1", "GET", "https://shop.example.com/foo?q=a b"));

    let coordinator = coordinator_client(&fake);
    coordinator.check().await.unwrap();
    let session = session_for(target.port);
    run_once(&session, coordinator, Arc::new(HttpTransport::new().unwrap())).await;

    let seen = target.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].uri, "/foo?q=a+b");
    assert_eq!(seen[0].headers["cookie"], "session=abc");
    assert!(seen[0].body.is_empty());

    let polls = fake.polls();
    assert_eq!(polls[0]["interception"]["status"], "new");
    assert_eq!(polls[0]["interception"]["webapp"], SITE);

    let uploads = fake.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "it-1");
    assert_eq!(uploads[0].1, "multipart/form-data; boundary=it-1");
    let payload = String::from_utf8_lossy(&uploads[0].2).to_string();
    assert!(payload.contains("name=\"file\"; filename=\"it-1.bin\""));
    assert!(payload.contains("\r\n\r\nok\r\n--it-1--"));

    let reports = fake.reports();
    assert_eq!(reports.len(), 1);
    let (id, report) = &reports[0];
    assert_eq!(id, "it-1");
    assert_eq!(report["result"], "replied");
    assert_eq!(report["status"], "reply");
    assert_eq!(report["output"]["status"], 200);
    assert_eq!(report["output"]["size"], 2);
    assert_eq!(report["output"]["preview"], "ok");
    assert_eq!(report["output"]["factory"], "debugger");
    assert_eq!(report["output"]["headers"]["x-target"], "local");

    assert!(
        fake.authorization_headers()
            .iter()
            .all(|h| h == &format!("Bearer {TOKEN}"))
    );
    let counters = session.accounting().snapshot();
    assert_eq!(counters.replays, 1);
    assert_eq!(counters.queue_current, 0);

    crate::test_log!("TEST PASS: test_get_with_spaces_is_replied");
}

#[tokio::test]
async fn test_post_body_is_forwarded() {
    init_test_logging();

    let target = LocalTarget::spawn(201, "created").await;
    let fake = FakeCoordinator::spawn().await;
    let mut item = captured("it-post", "post", "http://shop.example.com/cart");
    item["input"]["body"] = json!("{\"qty\":2}");
    fake.enqueue(item);

    let session = session_for(target.port);
    run_once(&session, coordinator_client(&fake), Arc::new(HttpTransport::new().unwrap())).await;

    let seen = target.seen();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].body, b"{\"qty\":2}");
    let reports = fake.reports();
    assert_eq!(reports[0].1["output"]["status"], 201);
}

#[tokio::test]
async fn test_no_listener_is_rejected_with_connection_refused() {
    init_test_logging();
    crate::test_log!("TEST START: test_no_listener_is_rejected_with_connection_refused");

    let fake = FakeCoordinator::spawn().await;
    fake.enqueue(captured("it-2", "GET", "https://shop.example.com/"));

    let session = session_for(closed_port());
    run_once(&session, coordinator_client(&fake), Arc::new(HttpTransport::new().unwrap())).await;

    assert!(fake.uploads().is_empty());
    let reports = fake.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1["result"], "rejected");
    assert_eq!(reports[0].1["status"], "reject");
    assert_eq!(reports[0].1["output"]["code"], 9100);
    assert_eq!(reports[0].1["output"]["msg"], "Connection Refused");
    assert_eq!(session.accounting().snapshot().errors, 1);

    crate::test_log!("TEST PASS: test_no_listener_is_rejected_with_connection_refused");
}

#[tokio::test]
async fn test_panicking_replays_are_reported_exactly_once() {
    init_test_logging();

    let fake = FakeCoordinator::spawn().await;
    for n in 0..4 {
        fake.enqueue(captured(&format!("p-{n}"), "GET", "http://shop.example.com/x"));
    }
    let transport = MockTransport::new();
    transport.push(MockBehavior::Panic("simulated failure".into()));
    transport.push(MockBehavior::Panic("simulated failure".into()));

    let session = session_for(8080);
    run_once(&session, coordinator_client(&fake), Arc::new(transport.clone())).await;

    let reports = fake.reports();
    assert_eq!(reports.len(), 4);
    let mut ids: Vec<_> = reports.iter().map(|(id, _)| id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    let unhandled = reports
        .iter()
        .filter(|(_, r)| r["output"]["code"] == 9999)
        .count();
    assert_eq!(unhandled, 2);

    let counters = session.accounting().snapshot();
    assert_eq!(counters.errors, 2);
    assert_eq!(counters.replays, 2);
    assert_eq!(counters.queue_max, 4);
    assert_eq!(transport.attempts().len(), 4);
}

#[tokio::test]
async fn test_unreachable_coordinator_backs_off() {
    init_test_logging();

    let url = format!("http://127.0.0.1:{}/v1", closed_port());
    let coordinator = Arc::new(HttpCoordinator::new(&url, TOKEN, Duration::from_secs(2)).unwrap());
    let session = session_for(8080);
    let mut agent = Agent::new(
        session.clone(),
        coordinator,
        Arc::new(MockTransport::new()),
        PollingConfig::default(),
        Duration::from_secs(5),
    );

    let first = agent.run_cycle().await;
    assert_eq!(first.delay, Duration::from_millis(5000));
    let second = agent.run_cycle().await;
    assert_eq!(second.delay, Duration::from_millis(10000));
    assert!(second.notice.is_none());
}

#[tokio::test]
async fn test_polled_headers_keep_captured_order() {
    init_test_logging();

    let fake = FakeCoordinator::spawn().await;
    let raw = r#"{
        "interception": "it-order",
        "input": {
            "method": "GET",
            "url": "https://shop.example.com/",
            "headers": {"z-last": "1", "accept": "*/*", "m-mid": "3", "b-early": "4"}
        },
        "output": null
    }"#;
    fake.enqueue(serde_json::from_str(raw).unwrap());

    let coordinator = coordinator_client(&fake);
    let items = coordinator.poll(SITE).await.unwrap();
    assert_eq!(items.len(), 1);
    let keys: Vec<_> = items[0].input.headers.keys().cloned().collect();
    assert_eq!(keys, vec!["z-last", "accept", "m-mid", "b-early"]);

    let request = relayd::translate(&items[0], &ForwardingTarget::default()).unwrap();
    let names: Vec<_> = request.headers.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["z-last", "accept", "m-mid", "b-early"]);
}

#[tokio::test]
async fn test_encoded_hash_reaches_target_intact() {
    init_test_logging();
    crate::test_log!("TEST START: test_encoded_hash_reaches_target_intact");

    let target = LocalTarget::spawn(200, "file").await;
    let fake = FakeCoordinator::spawn().await;
    fake.enqueue(captured(
        "it-hash",
        "GET",
        "https://shop.example.com/files/a%23b.txt?x=1",
    ));

    let session = session_for(target.port);
    run_once(&session, coordinator_client(&fake), Arc::new(HttpTransport::new().unwrap())).await;

    let seen = target.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].uri, "/files/a%23b.txt?x=1");
    assert_eq!(fake.reports()[0].1["status"], "reply");

    crate::test_log!("TEST PASS: test_encoded_hash_reaches_target_intact");
}
