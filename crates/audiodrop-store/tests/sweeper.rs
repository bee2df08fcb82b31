//! Sweeper behaviour under a paused clock.

use std::time::Duration;

use audiodrop_core::config::store::StoreConfig;
use audiodrop_store::{EphemeralStore, spawn_sweeper};
use tokio::sync::watch;

#[tokio::test(start_paused = true)]
async fn sweeper_removes_expired_keys_and_stops_on_shutdown() {
    let store = EphemeralStore::shared(&StoreConfig::default());
    store.set("short", "v", Some(Duration::from_secs(5)));
    store.set("keep", "v", None);

    let (tx, rx) = watch::channel(false);
    let handle = spawn_sweeper(store.clone(), Duration::from_secs(10), rx);

    tokio::time::sleep(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;

    // Removed by the sweep rather than by a read.
    assert_eq!(store.len(), 1);
    assert_eq!(store.stats().expired, 1);

    tx.send(true).unwrap();
    handle.await.unwrap();
}
