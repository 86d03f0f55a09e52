#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keyscope::browser::SessionEvent;
use keyscope::config::BrowserConfig;
use keyscope::store::{MemoryStore, StoreOp};
use keyscope::BrowserSession;
use tokio::sync::mpsc;

pub fn config(page_size: usize, scan_batch_size: usize) -> BrowserConfig {
    BrowserConfig {
        page_size,
        scan_batch_size,
        ..BrowserConfig::default()
    }
}

pub fn setup_store(keys: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for key in keys {
        store.set_string(*key, "v");
    }
    store
}

pub fn setup_session(keys: &[&str], config: &BrowserConfig) -> (Arc<MemoryStore>, BrowserSession) {
    let store = setup_store(keys);
    let session = BrowserSession::open(store.clone(), config);
    (store, session)
}

/// Polls `check` until it holds or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

pub async fn wait_for_calls(store: &MemoryStore, op: StoreOp, count: usize) {
    assert!(
        wait_until(|| store.calls(op) >= count).await,
        "expected {} calls of {:?}, saw {}",
        count,
        op,
        store.calls(op)
    );
}

pub async fn with_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

/// Next event matching `pred`, skipping the others.
pub async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    with_timeout(async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
}

pub fn keys(snapshot: &keyscope::PageSnapshot) -> Vec<String> {
    snapshot.items.iter().map(|record| record.key.clone()).collect()
}

/// Page-level timings for a scan pass: keys/sec plus per-page latency.
pub struct PageBenchmark {
    name: String,
    start: Instant,
    keys: usize,
    page_times: Vec<Duration>,
}

impl PageBenchmark {
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
            keys: 0,
            page_times: Vec::new(),
        }
    }

    pub fn record_page(&mut self, elapsed: Duration, keys: usize) {
        self.page_times.push(elapsed);
        self.keys += keys;
    }

    pub fn stop(mut self) -> usize {
        let total = self.start.elapsed();
        let secs = total.as_secs_f64().max(f64::EPSILON);
        let pages = self.page_times.len();

        self.page_times.sort();
        let p50 = self.page_times.get(pages / 2).copied().unwrap_or_default();
        let slowest = self.page_times.last().copied().unwrap_or_default();

        println!("\n{}", self.name);
        println!("   Listed:      {} keys in {} pages ({:.2?})", self.keys, pages, total);
        println!("   Rate:        {:.0} keys/sec | {:.1} pages/sec", self.keys as f64 / secs, pages as f64 / secs);
        println!("   Page time:   p50: {:.2?} | slowest: {:.2?}", p50, slowest);
        self.keys
    }
}
