//! End-to-end install passes against an in-process fake host.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use nid_bootstrap::{
    AccessStatus, BootstrapConfig, BootstrapTransport, CookieSpec, CookieStoreApi,
    CredentialStoreRef, HeadersReceived, HostCapabilities, MemoryStore, NidError, Orchestrator,
    PassOutcome, PermissionProbe, PersistentStore, Result, StatusIndicator, StoreListing,
    StoreOutcome, Token, Trigger, header_stream,
};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, LOCATION, SET_COOKIE};
use serde_json::{Value, json};
use tokio::sync::{Semaphore, broadcast, mpsc};
use url::Url;

/// Network stand-in: each dispatch waits for a gate permit, then publishes
/// an unrelated response followed by the bootstrap response.
struct GatedTransport {
    events: broadcast::Sender<HeadersReceived>,
    gate: Semaphore,
    dispatched: AtomicUsize,
}

impl GatedTransport {
    fn new(events: broadcast::Sender<HeadersReceived>, open: bool) -> Arc<Self> {
        let gate = Semaphore::new(0);
        if open {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
        Arc::new(Self {
            events,
            gate,
            dispatched: AtomicUsize::new(0),
        })
    }

    fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BootstrapTransport for GatedTransport {
    async fn dispatch(&self, url: Url) -> Result<()> {
        let n = self.dispatched.fetch_add(1, Ordering::SeqCst);
        self.gate
            .acquire()
            .await
            .map_err(|e| NidError::request_failed(e.to_string()))?
            .forget();

        let mut unrelated = HeaderMap::new();
        unrelated.append(SET_COOKIE, HeaderValue::from_static("NID=not-ours; Path=/"));
        let _ = self.events.send(HeadersReceived {
            url: Url::parse("https://www.google.com/ncr#someone-else").unwrap(),
            headers: unrelated,
        });

        let mut headers = HeaderMap::new();
        headers.append(LOCATION, HeaderValue::from_static("https://www.google.com/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("AEC=ignored; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_str(&format!("NID=minted-{n}; Domain=.google.com; Path=/")).unwrap(),
        );
        let _ = self.events.send(HeadersReceived { url, headers });
        Ok(())
    }
}

/// Cookie jars keyed by store id.
struct FakeCookieStores {
    listing: StoreListing,
    jars: Mutex<HashMap<String, HashMap<String, String>>>,
    set_calls: Mutex<Vec<(String, CookieSpec)>>,
    fail_set_for: Option<&'static str>,
    fail_listing: AtomicBool,
}

impl FakeCookieStores {
    fn new(listing: StoreListing) -> Arc<Self> {
        Arc::new(Self {
            listing,
            jars: Mutex::new(HashMap::new()),
            set_calls: Mutex::new(Vec::new()),
            fail_set_for: None,
            fail_listing: AtomicBool::new(false),
        })
    }

    fn failing_on(listing: StoreListing, store_id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            listing,
            jars: Mutex::new(HashMap::new()),
            set_calls: Mutex::new(Vec::new()),
            fail_set_for: Some(store_id),
            fail_listing: AtomicBool::new(false),
        })
    }

    fn preset(&self, store_id: &str, name: &str, value: &str) {
        self.jars
            .lock()
            .entry(store_id.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    fn value(&self, store_id: &str, name: &str) -> Option<String> {
        self.jars.lock().get(store_id)?.get(name).cloned()
    }

    fn set_calls(&self) -> Vec<(String, CookieSpec)> {
        self.set_calls.lock().clone()
    }
}

#[async_trait]
impl CookieStoreApi for FakeCookieStores {
    async fn list_stores(&self) -> Result<StoreListing> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(NidError::store_unavailable("cookies API not ready"));
        }
        Ok(self.listing.clone())
    }

    async fn get_cookie(&self, store_id: &str, _url: &str, name: &str) -> Result<Option<String>> {
        Ok(self.value(store_id, name))
    }

    async fn set_cookie(&self, store_id: &str, cookie: &CookieSpec) -> Result<()> {
        if self.fail_set_for == Some(store_id) {
            return Err(NidError::store_unavailable(format!("store {store_id} closed")));
        }
        self.set_calls
            .lock()
            .push((store_id.to_string(), cookie.clone()));
        self.preset(store_id, &cookie.name, &cookie.value);
        Ok(())
    }
}

struct Allowed;

#[async_trait]
impl PermissionProbe for Allowed {
    async fn is_allowed_in_private(&self) -> Result<bool> {
        Ok(true)
    }
}

struct NoStatus;

impl StatusIndicator for NoStatus {
    fn show(&self, _status: &AccessStatus) {}
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    transport: Arc<GatedTransport>,
    cookies: Arc<FakeCookieStores>,
    store: Arc<MemoryStore>,
}

fn items(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn harness(initial: Value, cookies: Arc<FakeCookieStores>, gate_open: bool) -> Harness {
    let (events_tx, events_rx) = header_stream();
    let transport = GatedTransport::new(events_tx, gate_open);
    let store = Arc::new(MemoryStore::with_items(items(initial)));

    let config = BootstrapConfig {
        instance_id: "it".to_string(),
        ..Default::default()
    };
    let orchestrator = Orchestrator::start(
        config,
        HostCapabilities {
            store: store.clone(),
            transport: transport.clone(),
            header_events: events_rx,
            cookies: cookies.clone(),
            permission: Arc::new(Allowed),
            status: Arc::new(NoStatus),
        },
    )
    .await
    .unwrap();

    Harness {
        orchestrator: Arc::new(orchestrator),
        transport,
        cookies,
        store,
    }
}

fn one_private_store() -> StoreListing {
    StoreListing::Flagged(vec![
        CredentialStoreRef::new("default", false),
        CredentialStoreRef::new("private", true),
    ])
}

#[tokio::test]
async fn prefetched_token_is_installed_then_refilled() {
    let cookies = FakeCookieStores::new(one_private_store());
    let h = harness(
        json!({"next_nid": "abc", "allowed_in_incognito": true}),
        cookies,
        false,
    )
    .await;

    let outcome = h
        .orchestrator
        .handle(Trigger::ContextCreated { private: true })
        .await;
    assert!(matches!(outcome, PassOutcome::Completed(ref r) if r.installed() == 1));

    let calls = h.cookies.set_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "private");
    assert_eq!(calls[0].1.value, "abc");
    assert_eq!(h.cookies.value("default", "NID"), None);

    // Slot cleared durably; the refill is parked on the closed gate.
    assert_eq!(h.store.load().await.unwrap()["next_nid"], Value::Null);
    assert_eq!(h.orchestrator.cache().refills_started(), 1);

    h.transport.open();
    h.orchestrator.shutdown().await;
    assert_eq!(h.transport.dispatched(), 1);
    assert_eq!(h.store.load().await.unwrap()["next_nid"], json!("minted-0"));
}

#[tokio::test]
async fn existing_cookie_skips_unless_forced() {
    let cookies = FakeCookieStores::new(one_private_store());
    cookies.preset("private", "NID", "already-there");
    let h = harness(json!({}), cookies, true).await;

    let outcome = h
        .orchestrator
        .handle(Trigger::ContextCreated { private: true })
        .await;
    match outcome {
        PassOutcome::Completed(report) => {
            assert_eq!(
                report.stores,
                vec![("private".to_string(), StoreOutcome::Skipped)]
            )
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.transport.dispatched(), 0);

    let outcome = h.orchestrator.handle(Trigger::Installed).await;
    assert!(matches!(outcome, PassOutcome::Completed(ref r) if r.installed() == 1));
    h.orchestrator.shutdown().await;

    // One synchronous fetch plus one refill.
    assert_eq!(h.transport.dispatched(), 2);
    assert_eq!(
        h.cookies.value("private", "NID"),
        Some("minted-0".to_string())
    );
}

#[tokio::test]
async fn concurrent_private_contexts_run_one_pass() {
    let cookies = FakeCookieStores::new(one_private_store());
    let h = harness(json!({}), cookies, false).await;

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .handle(Trigger::ContextCreated { private: true })
                .await
        })
    };

    // Wait until the first pass is blocked on its synchronous fetch.
    while h.transport.dispatched() == 0 {
        tokio::task::yield_now().await;
    }

    let second = h
        .orchestrator
        .handle(Trigger::ContextCreated { private: true })
        .await;
    assert_eq!(second, PassOutcome::Dropped);

    h.transport.open();
    let first = first.await.unwrap();
    assert!(matches!(first, PassOutcome::Completed(ref r) if r.installed() == 1));

    h.orchestrator.shutdown().await;
    assert_eq!(h.cookies.set_calls().len(), 1);
}

#[tokio::test]
async fn trigger_loop_installs_once_for_a_burst() {
    let cookies = FakeCookieStores::new(one_private_store());
    let h = harness(json!({}), cookies, false).await;

    let (tx, rx) = mpsc::channel(8);
    let runner = tokio::spawn(h.orchestrator.clone().run(rx));

    for _ in 0..3 {
        tx.send(Trigger::ContextCreated { private: true }).await.unwrap();
    }
    tx.send(Trigger::ContextCreated { private: false }).await.unwrap();

    while h.transport.dispatched() == 0 {
        tokio::task::yield_now().await;
    }
    h.transport.open();
    drop(tx);
    runner.await.unwrap();
    h.orchestrator.shutdown().await;

    // Later passes, if any got through, find the cookie and skip.
    assert_eq!(h.cookies.set_calls().len(), 1);
}

#[tokio::test]
async fn positional_stores_each_get_their_own_token() {
    let cookies = FakeCookieStores::new(StoreListing::Positional(vec![
        "0".to_string(),
        "1".to_string(),
        "2".to_string(),
    ]));
    let h = harness(json!({"next_nid": "abc"}), cookies, true).await;

    let outcome = h.orchestrator.handle(Trigger::Installed).await;
    assert!(matches!(outcome, PassOutcome::Completed(ref r) if r.installed() == 2));
    h.orchestrator.shutdown().await;

    let calls = h.cookies.set_calls();
    let stores: Vec<_> = calls.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(stores, vec!["1", "2"]);
    assert_eq!(calls[0].1.value, "abc");
    assert_ne!(calls[0].1.value, calls[1].1.value);
    assert_eq!(h.cookies.value("0", "NID"), None);
}

#[tokio::test]
async fn failing_store_does_not_stop_the_pass() {
    let cookies = FakeCookieStores::failing_on(
        StoreListing::Flagged(vec![
            CredentialStoreRef::new("private-a", true),
            CredentialStoreRef::new("private-b", true),
        ]),
        "private-a",
    );
    let h = harness(json!({}), cookies, true).await;

    let outcome = h.orchestrator.handle(Trigger::Installed).await;
    h.orchestrator.shutdown().await;

    let report = match outcome {
        PassOutcome::Completed(report) => report,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert!(matches!(report.stores[0], (ref id, StoreOutcome::Failed(_)) if id == "private-a"));
    assert_eq!(
        report.stores[1],
        ("private-b".to_string(), StoreOutcome::Installed)
    );
    assert!(h.cookies.value("private-b", "NID").is_some());
}

#[tokio::test]
async fn listing_failure_ends_pass_without_fetching() {
    let cookies = FakeCookieStores::new(one_private_store());
    cookies.fail_listing.store(true, Ordering::SeqCst);
    let h = harness(json!({}), cookies, true).await;

    let outcome = h.orchestrator.handle(Trigger::Installed).await;
    assert!(matches!(outcome, PassOutcome::Failed(_)));
    assert_eq!(h.transport.dispatched(), 0);

    // The guard was released; the next trigger is the retry.
    h.cookies.fail_listing.store(false, Ordering::SeqCst);
    let outcome = h.orchestrator.handle(Trigger::Installed).await;
    assert!(matches!(outcome, PassOutcome::Completed(_)));
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn prefetched_token_survives_restart() {
    let cookies = FakeCookieStores::new(one_private_store());
    let h = harness(json!({}), cookies, true).await;

    h.orchestrator.handle(Trigger::Installed).await;
    h.orchestrator.shutdown().await;

    let persisted = h.store.load().await.unwrap();
    let state = nid_bootstrap::State::from_items(&persisted);
    assert_eq!(state.next_token, Some(Token::new("minted-1")));
}
