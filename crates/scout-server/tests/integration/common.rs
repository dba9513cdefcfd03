use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::net::TcpListener;

use scout_client::ProviderConfig;
use scout_core::EngineConfig;
use scout_db::Database;
use scout_server::routes;
use scout_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

/// Creators the fake gateway holds for every search term.
pub const CREATORS_PER_TERM: usize = 30;

/// Monthly enrichment limit for every owner in these tests.
pub const ENRICHMENT_LIMIT: i64 = 2;

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    /// Profile lookups that reached the fake gateway.
    pub profile_fetches: Arc<AtomicUsize>,
    _container: ContainerAsync<GenericImage>,
}

/// Spin up PostgreSQL and a fake provider gateway, and wire the app to both.
pub async fn setup_test_app() -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "scout_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/scout_test");
    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    let profile_fetches = Arc::new(AtomicUsize::new(0));
    let gateway = spawn_gateway(profile_fetches.clone()).await;

    let mut engine = EngineConfig {
        default_enrichment_limit: ENRICHMENT_LIMIT,
        ..EngineConfig::default()
    };
    engine.orchestrator.continuation_delay = Duration::ZERO;

    let provider = ProviderConfig::new(gateway, "gateway-key").with_timeout(Duration::from_secs(5));
    let state = AppState::new(db.clone(), &provider, &engine, TEST_API_KEY)
        .expect("Failed to build app state");

    TestApp {
        router: routes::router(Arc::new(state)),
        db,
        profile_fetches,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}

/// Serve the TikTok search and profile endpoints on an ephemeral port.
async fn spawn_gateway(profile_fetches: Arc<AtomicUsize>) -> String {
    let app = Router::new()
        .route("/v1/tiktok/search/users", get(search_users))
        .route("/v1/tiktok/profile", get(profile))
        .with_state(profile_fetches);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind gateway");
    let addr = listener.local_addr().expect("Failed to read gateway address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Gateway stopped");
    });

    format!("http://{addr}")
}

async fn search_users(Query(params): Query<HashMap<String, String>>) -> axum::Json<serde_json::Value> {
    let query = params.get("query").cloned().unwrap_or_default();
    let offset: usize = params.get("cursor").and_then(|c| c.parse().ok()).unwrap_or(0);
    let count: usize = params.get("count").and_then(|c| c.parse().ok()).unwrap_or(20);

    let end = CREATORS_PER_TERM.min(offset + count);
    let users: Vec<_> = (offset..end)
        .map(|i| {
            serde_json::json!({
                "id": format!("{query}-{i}"),
                "unique_id": format!("{query}_{i}"),
                "follower_count": 1000 + i,
            })
        })
        .collect();

    axum::Json(serde_json::json!({
        "users": users,
        "cursor": end,
        "has_more": end < CREATORS_PER_TERM,
    }))
}

async fn profile(
    State(fetches): State<Arc<AtomicUsize>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::Json<serde_json::Value> {
    fetches.fetch_add(1, Ordering::SeqCst);
    match params.get("handle").map(String::as_str) {
        Some("ghost") | None => axum::Json(serde_json::Value::Null),
        Some(handle) => axum::Json(serde_json::json!({
            "handle": handle,
            "follower_count": 4200,
        })),
    }
}
