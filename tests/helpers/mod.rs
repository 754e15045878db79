//! Test harness: an in-process stub of the upstream courts-rental API plus
//! a fully wired fabric over the in-memory KV backend.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use courtside::availability::AvailabilityPlanner;
use courtside::cache::TieredCache;
use courtside::config::Config;
use courtside::events::Invalidator;
use courtside::kv::KvStore;
use courtside::upstream::CourtsApi;

/// One recorded upstream call.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub at: Instant,
}

#[derive(Default)]
struct StubInner {
    clubs: HashMap<String, Value>,
    courts: HashMap<i64, Value>,
    slots: HashMap<(i64, i64, String), Value>,
    /// Remaining forced 500s on `/clubs`.
    fail_clubs: u32,
    calls: Vec<Call>,
}

/// Scripted upstream served from an ephemeral local port.
#[derive(Clone, Default)]
pub struct StubUpstream {
    inner: Arc<Mutex<StubInner>>,
}

impl StubUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clubs(&self, place_id: &str, clubs: Value) {
        self.inner
            .lock()
            .unwrap()
            .clubs
            .insert(place_id.to_owned(), clubs);
    }

    pub fn set_courts(&self, club_id: i64, courts: Value) {
        self.inner.lock().unwrap().courts.insert(club_id, courts);
    }

    pub fn set_slots(&self, club_id: i64, court_id: i64, date: &str, slots: Value) {
        self.inner
            .lock()
            .unwrap()
            .slots
            .insert((club_id, court_id, date.to_owned()), slots);
    }

    /// Make the next `times` calls to `/clubs` fail with a 500.
    pub fn fail_clubs(&self, times: u32) {
        self.inner.lock().unwrap().fail_clubs = times;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, path: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.path == path)
            .count()
    }

    /// Bind to an ephemeral port and serve; returns the base URL.
    pub async fn serve(&self) -> String {
        let router = Router::new()
            .route("/clubs", get(clubs))
            .route("/clubs/{club_id}/courts", get(courts))
            .route("/clubs/{club_id}/courts/{court_id}/slots", get(slots))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}

async fn clubs(
    State(stub): State<StubUpstream>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut inner = stub.inner.lock().unwrap();
    inner.calls.push(Call {
        path: "/clubs".to_owned(),
        at: Instant::now(),
    });
    if inner.fail_clubs > 0 {
        inner.fail_clubs -= 1;
        return (StatusCode::INTERNAL_SERVER_ERROR, "stub outage").into_response();
    }
    let place_id = params.get("placeId").cloned().unwrap_or_default();
    Json(inner.clubs.get(&place_id).cloned().unwrap_or_else(|| json!([]))).into_response()
}

async fn courts(State(stub): State<StubUpstream>, Path(club_id): Path<i64>) -> Json<Value> {
    let mut inner = stub.inner.lock().unwrap();
    inner.calls.push(Call {
        path: format!("/clubs/{club_id}/courts"),
        at: Instant::now(),
    });
    Json(inner.courts.get(&club_id).cloned().unwrap_or_else(|| json!([])))
}

async fn slots(
    State(stub): State<StubUpstream>,
    Path((club_id, court_id)): Path<(i64, i64)>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut inner = stub.inner.lock().unwrap();
    inner.calls.push(Call {
        path: format!("/clubs/{club_id}/courts/{court_id}/slots"),
        at: Instant::now(),
    });
    let date = params.get("date").cloned().unwrap_or_default();
    Json(
        inner
            .slots
            .get(&(club_id, court_id, date))
            .cloned()
            .unwrap_or_else(|| json!([])),
    )
}

/// The wired caching fabric under test.
pub struct TestFabric {
    pub stub: StubUpstream,
    pub kv: Arc<KvStore>,
    pub cache: TieredCache,
    pub api: CourtsApi,
    pub planner: AvailabilityPlanner,
}

impl TestFabric {
    pub fn invalidator(&self, place_ids: Vec<String>) -> Invalidator {
        Invalidator::new(self.cache.clone(), place_ids, 0)
    }
}

/// Fabric over the in-memory KV backend with default configuration.
pub async fn fabric() -> TestFabric {
    fabric_with(|_| {}).await
}

/// Fabric over the in-memory KV backend with adjusted configuration.
pub async fn fabric_with(configure: impl FnOnce(&mut Config)) -> TestFabric {
    let stub = StubUpstream::new();
    let base_url = stub.serve().await;

    let mut config = Config::default();
    config.upstream_base_url = base_url;
    configure(&mut config);

    let kv = Arc::new(KvStore::in_memory());
    build(stub, kv, config)
}

/// Fabric whose KV store points at a dead Redis endpoint, for outage tests.
pub async fn fabric_with_dead_kv() -> TestFabric {
    let stub = StubUpstream::new();
    let base_url = stub.serve().await;

    let mut config = Config::default();
    config.upstream_base_url = base_url;
    // Port 1 refuses connections immediately on loopback.
    config.kv_host = "127.0.0.1".to_owned();
    config.kv_port = 1;

    let kv = Arc::new(KvStore::connect(&config).await);
    build(stub, kv, config)
}

fn build(stub: StubUpstream, kv: Arc<KvStore>, config: Config) -> TestFabric {
    let cache = TieredCache::new(kv.clone());
    let api = CourtsApi::new(&config, cache.clone());
    let planner = AvailabilityPlanner::new(api.clone(), config.fan_out_courts, config.fan_out_slots);
    TestFabric {
        stub,
        kv,
        cache,
        api,
        planner,
    }
}

/// The S1-style upstream script: two clubs, three courts, one slot.
pub fn script_standard_place(stub: &StubUpstream, place_id: &str, date: &str) {
    stub.set_clubs(place_id, json!([{"id": 1}, {"id": 2}]));
    stub.set_courts(1, json!([{"id": 10}]));
    stub.set_courts(2, json!([{"id": 20}, {"id": 21}]));
    stub.set_slots(
        1,
        10,
        date,
        json!([{
            "datetime": format!("{date}T10:00:00Z"),
            "start": "10:00",
            "end": "11:00",
            "duration": 60,
            "price": 500,
            "_priority": 1
        }]),
    );
}
