use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use keyscope::browser::KeyType;
use keyscope::store::MemoryValue;
use keyscope::{Config, MemoryStore, SessionRegistry};

// ========================================
// MAIN ENTRY POINT
// ========================================

/// Browses a seeded in-memory keyspace and prints every page as JSON.
///
/// Usage: `keyscope [PATTERN] [TYPE]`
#[tokio::main]
async fn main() -> keyscope::Result<()> {
    let config = Config::global();

    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    info!("keyscope v{} starting", keyscope::VERSION);

    let mut args = std::env::args().skip(1);
    let pattern = args.next().unwrap_or_default();
    let type_filter = args.next().as_deref().and_then(KeyType::classify);

    let store = Arc::new(MemoryStore::new());
    seed(&store);

    let registry = SessionRegistry::new(config.browser.clone());
    let session = registry.open(store.clone(), 0).await?;

    let mut snapshot = session.search(&pattern, type_filter).await?;
    print_page(&snapshot);
    while !snapshot.exhausted {
        snapshot = session.next_page().await?;
        print_page(&snapshot);
    }

    info!("{} keys listed", snapshot.items.len());
    registry.close(&session.id()).await;
    Ok(())
}

fn print_page(snapshot: &keyscope::PageSnapshot) {
    match serde_json::to_string_pretty(snapshot) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("[keyscope] cannot render page: {}", e),
    }
}

fn seed(store: &MemoryStore) {
    for i in 0..120 {
        store.set_string(format!("user:{}", i), format!("{{\"id\":{}}}", i));
    }
    for i in 0..30 {
        let fields = HashMap::from([("uid".to_string(), Bytes::from(i.to_string()))]);
        store.insert(format!("session:{}", i), MemoryValue::Hash(fields));
    }
    store.insert(
        "queue:jobs",
        MemoryValue::List(VecDeque::from([Bytes::from("job-1"), Bytes::from("job-2")])),
    );
    store.insert("tags", MemoryValue::Set(HashSet::from([Bytes::from("a"), Bytes::from("b")])));
    store.insert("leaderboard", MemoryValue::ZSet(vec![(Bytes::from("ann"), 42.0)]));
    store.insert_with_ttl("cache:hot", MemoryValue::string("1"), Duration::from_secs(300));
}
