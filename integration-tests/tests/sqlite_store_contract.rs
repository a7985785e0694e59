//! Runs the shared [`eval_mocks::contracts::test_store_contract`] suite
//! against the real SQLite-backed store, the same contract the in-memory
//! `MockStore` is held to in `mocks/tests/integration_tests.rs`. Keeping both
//! implementations honest against one contract is what lets the rest of the
//! test suite use `MockStore` as a stand-in without drifting from what
//! production actually does.

use eval_mocks::contracts::test_store_contract;
use eval_store::SqliteStore;

async fn fresh_store() -> SqliteStore {
    let timestamp = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    let thread_id = std::thread::current().id();
    let db_name = format!(":memory:test_{timestamp}_{thread_id:?}");
    let store = SqliteStore::new(&db_name).await.unwrap();
    store.migrate().await.unwrap();
    store
}

#[tokio::test]
async fn sqlite_store_satisfies_the_store_contract() {
    let store = fresh_store().await;
    test_store_contract(&store).await;
}
