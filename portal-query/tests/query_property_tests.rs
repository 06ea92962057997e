//! Behavioral tests for the query cache: caching, de-duplication, key
//! isolation, invalidation, network mode and stale-while-revalidate.

use std::sync::Arc;
use std::time::Duration;

use portal_query::{
    FetchError, FetchResult, FetchStatus, QueryClient, QueryEvent, QueryFilter, QueryKey, QueryStatus,
    QueryStore, Resolution, StoreConfig, SwrView,
};
use portal_test_utils::assertions::{assert_resolved, assert_status_error, assert_suspended};
use portal_test_utils::generators::arb_params;
use portal_test_utils::ScriptedFetcher;
use proptest::prelude::*;
use tokio::sync::{broadcast, watch};

const RUNS: &str = "catalogs-{catalog}-runs";

type Selection = Option<String>;
type Runs = Vec<String>;

fn runs_client(
    store: QueryStore,
    fetcher: &Arc<ScriptedFetcher<Runs>>,
) -> (
    watch::Sender<Selection>,
    portal_query::QueryHandle<Selection, Selection, Runs>,
    portal_query::StatusHandle<Selection, Selection, Runs>,
) {
    let (tx, rx) = watch::channel(None);
    let client = QueryClient::new(store, rx);
    let fetcher = Arc::clone(fetcher);
    let (data, status) = client.create_query(
        RUNS,
        |selection: &Selection| selection.clone(),
        move |catalog: Selection| fetcher.fetch(catalog.unwrap_or_default()),
    );
    (tx, data, status)
}

fn runs_key(catalog: &str) -> QueryKey {
    QueryKey::new(RUNS, &Some(catalog)).unwrap()
}

fn runs(catalog: &str) -> Runs {
    vec![format!("{catalog}-run-1"), format!("{catalog}-run-2")]
}

async fn wait_until_idle(events: &mut broadcast::Receiver<QueryEvent>, key: &QueryKey) -> QueryEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if &event.key == key && event.fetch_status == FetchStatus::Idle {
                return event;
            }
        }
    })
    .await
    .expect("query never settled")
}

#[tokio::test]
async fn test_first_read_suspends_then_serves_cache() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    let (tx, data, status) = runs_client(QueryStore::default(), &fetcher);
    tx.send_replace(Some("infra".to_string()));

    assert_suspended(&data.try_read());
    assert_eq!(status.fetch_status(), FetchStatus::Fetching);

    let value = data.read().await.unwrap();
    assert_eq!(*value, runs("infra"));
    assert_eq!(status.fetch_status(), FetchStatus::Idle);

    for _ in 0..3 {
        let again = assert_resolved(data.try_read());
        assert!(Arc::ptr_eq(&value, &again));
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_keys_are_isolated() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    fetcher.respond("data", Ok(runs("data")));
    fetcher.gate("infra");
    let store = QueryStore::default();
    let (tx, data, status) = runs_client(store.clone(), &fetcher);

    tx.send_replace(Some("infra".to_string()));
    assert_suspended(&data.try_read());

    tx.send_replace(Some("data".to_string()));
    assert_eq!(*data.read().await.unwrap(), runs("data"));
    assert_eq!(status.snapshot().status, QueryStatus::Success);

    let infra = store.status(&runs_key("infra"));
    assert_eq!(infra.status, QueryStatus::Pending);
    assert_eq!(infra.fetch_status, FetchStatus::Fetching);

    let mut events = store.subscribe();
    fetcher.release("infra");
    wait_until_idle(&mut events, &runs_key("infra")).await;
    let state = store.get_state::<Runs>(&runs_key("data")).unwrap().unwrap();
    assert_eq!(state.generation(), 1);
    assert_eq!(fetcher.calls_for("data"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_share_one_fetch() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    fetcher.gate("infra");
    let (tx, data, _status) = runs_client(QueryStore::default(), &fetcher);
    tx.send_replace(Some("infra".to_string()));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let data = data.clone();
            tokio::spawn(async move { data.read().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    fetcher.release("infra");

    for reader in futures_util::future::join_all(readers).await {
        assert_eq!(*reader.unwrap().unwrap(), runs("infra"));
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_selection_change_before_resolution() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    fetcher.respond("data", Ok(runs("data")));
    fetcher.gate("infra");
    fetcher.gate("data");
    let store = QueryStore::default();
    let (tx, data, status) = runs_client(store.clone(), &fetcher);
    let view = SwrView::new(data.clone());
    let mut events = store.subscribe();

    tx.send_replace(Some("infra".to_string()));
    assert_suspended(&view.try_read());
    tx.send_replace(Some("data".to_string()));
    assert_suspended(&view.try_read());
    assert_eq!(status.fetch_status(), FetchStatus::Fetching);

    fetcher.release("infra");
    wait_until_idle(&mut events, &runs_key("infra")).await;
    // The abandoned key still settled; the current key is still in flight.
    assert_eq!(status.fetch_status(), FetchStatus::Fetching);
    assert_eq!(store.status(&runs_key("infra")).status, QueryStatus::Success);

    fetcher.release("data");
    assert_eq!(*view.read().await.unwrap(), runs("data"));
    assert_eq!(status.fetch_status(), FetchStatus::Idle);

    tx.send_replace(Some("infra".to_string()));
    assert_eq!(*assert_resolved(view.try_read()), runs("infra"));
    assert_eq!(fetcher.calls_for("infra"), 1);
}

#[tokio::test]
async fn test_swr_keeps_previous_value_while_next_key_loads() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    fetcher.respond("data", Ok(runs("data")));
    let (tx, data, _status) = runs_client(QueryStore::default(), &fetcher);
    let view = SwrView::new(data);

    tx.send_replace(Some("infra".to_string()));
    assert_eq!(*view.read().await.unwrap(), runs("infra"));

    fetcher.gate("data");
    tx.send_replace(Some("data".to_string()));
    assert_eq!(*assert_resolved(view.try_read()), runs("infra"));
    assert!(view.is_revalidating());

    fetcher.release("data");
    assert_eq!(*view.handle().read().await.unwrap(), runs("data"));
    assert_eq!(*assert_resolved(view.try_read()), runs("data"));
    assert!(!view.is_revalidating());
}

#[tokio::test]
async fn test_invalidate_by_name_forces_refetch() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    fetcher.respond("data", Ok(runs("data")));
    let store = QueryStore::default();
    let (tx, data, _status) = runs_client(store.clone(), &fetcher);

    for catalog in ["infra", "data"] {
        tx.send_replace(Some(catalog.to_string()));
        data.read().await.unwrap();
    }
    assert_eq!(fetcher.calls(), 2);

    assert_eq!(store.invalidate(&QueryFilter::name(RUNS)), 2);
    assert_eq!(store.invalidate(&QueryFilter::name("catalogs")), 0);
    assert!(data.try_read().is_suspended());
    data.read().await.unwrap();
    assert_eq!(fetcher.calls_for("data"), 2);
    assert_eq!(fetcher.calls_for("infra"), 1);

    let state = store.get_state::<Runs>(&runs_key("infra")).unwrap().unwrap();
    assert!(state.is_invalidated());
    assert_eq!(state.last_success().map(|v| v.len()), Some(2));
}

#[tokio::test]
async fn test_invalidate_by_params_filter() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    fetcher.respond("data", Ok(runs("data")));
    let store = QueryStore::default();
    let (tx, data, _status) = runs_client(store.clone(), &fetcher);

    for catalog in ["infra", "data"] {
        tx.send_replace(Some(catalog.to_string()));
        data.read().await.unwrap();
    }

    let filter = QueryFilter::name(RUNS).with_params(&"infra").unwrap();
    assert_eq!(store.invalidate(&filter), 1);
    assert!(store
        .get_state::<Runs>(&runs_key("infra"))
        .unwrap()
        .unwrap()
        .is_invalidated());
    assert!(!store
        .get_state::<Runs>(&runs_key("data"))
        .unwrap()
        .unwrap()
        .is_invalidated());
}

#[tokio::test]
async fn test_invalidate_during_fetch_refetches_after() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    fetcher.gate("infra");
    let store = QueryStore::default();
    let (tx, data, _status) = runs_client(store.clone(), &fetcher);
    tx.send_replace(Some("infra".to_string()));
    let mut events = store.subscribe();

    assert_suspended(&data.try_read());
    assert_eq!(store.invalidate(&QueryFilter::all()), 1);
    fetcher.release("infra");
    wait_until_idle(&mut events, &runs_key("infra")).await;

    assert_suspended(&data.try_read());
    data.read().await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_error_is_returned_until_invalidated() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    let store = QueryStore::default();
    let (tx, data, status) = runs_client(store.clone(), &fetcher);
    tx.send_replace(Some("infra".to_string()));
    data.read().await.unwrap();

    fetcher.respond("infra", Err(FetchError::status(500, "backend down")));
    data.invalidate();
    let err = data.read().await.unwrap_err();
    assert_eq!(err, FetchError::status(500, "backend down"));
    assert_status_error(&data.try_read(), 500);
    assert_eq!(status.snapshot().status, QueryStatus::Error);
    assert_eq!(fetcher.calls(), 2);

    let view = SwrView::new(data.clone());
    assert!(matches!(view.try_read(), Resolution::Rejected(_)));
    assert_eq!(data.last_success().map(|v| v.len()), Some(2));

    fetcher.respond("infra", Ok(vec!["recovered".to_string()]));
    data.invalidate();
    assert_eq!(*data.read().await.unwrap(), vec!["recovered".to_string()]);
}

#[tokio::test]
async fn test_fetcher_panicking_synchronously_settles_as_error() {
    let (_tx, rx) = watch::channel(Some("infra".to_string()));
    let client = QueryClient::new(QueryStore::default(), rx);
    let (data, status) = client.create_query(
        RUNS,
        |selection: &Selection| selection.clone(),
        |_: Selection| -> futures_util::future::Ready<FetchResult<Runs>> {
            panic!("fetcher failed before returning")
        },
    );

    let err = tokio::time::timeout(Duration::from_secs(5), data.read())
        .await
        .expect("read never settled")
        .unwrap_err();
    assert!(matches!(err, FetchError::Panicked { ref name, .. } if name == RUNS));
    assert_eq!(status.fetch_status(), FetchStatus::Idle);
    assert_eq!(status.snapshot().status, QueryStatus::Error);
}

#[tokio::test]
async fn test_offline_fetch_is_paused() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    let store = QueryStore::new(StoreConfig::new().with_online(false));
    let (tx, data, status) = runs_client(store.clone(), &fetcher);
    tx.send_replace(Some("infra".to_string()));

    assert_suspended(&data.try_read());
    assert_eq!(status.fetch_status(), FetchStatus::Paused);
    tokio::task::yield_now().await;
    assert_eq!(fetcher.calls(), 0);

    store.set_online(true);
    assert_eq!(*data.read().await.unwrap(), runs("infra"));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_events_follow_fetch_lifecycle() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("infra", Ok(runs("infra")));
    let store = QueryStore::default();
    let (tx, data, _status) = runs_client(store.clone(), &fetcher);
    tx.send_replace(Some("infra".to_string()));
    let mut events = store.subscribe();

    data.read().await.unwrap();
    let started = events.recv().await.unwrap();
    assert_eq!(started.key, runs_key("infra"));
    assert_eq!(started.status, QueryStatus::Pending);
    assert_eq!(started.fetch_status, FetchStatus::Fetching);
    assert_eq!(started.generation, 1);

    let settled = events.recv().await.unwrap();
    assert_eq!(settled.status, QueryStatus::Success);
    assert_eq!(settled.fetch_status, FetchStatus::Idle);
    assert_eq!(settled.generation, 1);
}

proptest! {
    #[test]
    fn prop_key_equality_matches_param_equality(a in arb_params(), b in arb_params()) {
        let ka = QueryKey::from_value("q", a.clone());
        let kb = QueryKey::from_value("q", b.clone());
        prop_assert_eq!(ka == kb, a == b);
        prop_assert_eq!(ka.clone(), QueryKey::from_value("q", a.clone()));
        prop_assert_ne!(ka, QueryKey::from_value("other", a));
    }

    #[test]
    fn prop_completing_one_key_leaves_others_untouched(
        names in prop::collection::btree_set("[a-z]{1,6}", 2..5)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let fetcher = ScriptedFetcher::new();
            for name in &names {
                fetcher.respond(name, Ok(runs(name)));
                fetcher.gate(name);
            }
            let store = QueryStore::default();
            let (tx, data, _status) = runs_client(store.clone(), &fetcher);
            for name in &names {
                tx.send_replace(Some(name.clone()));
                assert!(data.try_read().is_suspended());
            }

            let first = names.iter().next().unwrap();
            let mut events = store.subscribe();
            fetcher.release(first);
            wait_until_idle(&mut events, &runs_key(first)).await;

            for name in names.iter().skip(1) {
                let snapshot = store.status(&runs_key(name));
                assert_eq!(snapshot.status, QueryStatus::Pending);
                assert_eq!(snapshot.fetch_status, FetchStatus::Fetching);
            }
            assert_eq!(store.status(&runs_key(first)).status, QueryStatus::Success);
        });
    }
}
