use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use common_identity::{IdentifyLock, Resolver, SessionWindow};
use common_queue::Enqueue;
use common_store::AppStore;
use common_types::Clock;

use crate::endpoints;
use crate::prometheus::setup_metrics_recorder;

#[derive(Clone)]
pub struct State {
    pub app: Arc<dyn AppStore>,
    pub queue: Arc<dyn Enqueue>,
    pub resolver: Arc<Resolver>,
    pub window: Arc<SessionWindow>,
    pub lock: Arc<IdentifyLock>,
    pub clock: Arc<dyn Clock>,
    pub update_user_delay: Duration,
    pub merge_delay: Duration,
    pub cookie_max_age: Duration,
}

async fn index() -> &'static str {
    "ingest"
}

pub fn router(state: State, metrics: bool) -> Router {
    // Permissive CORS: events come from arbitrary third-party origins.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(index))
        .route("/track", post(endpoints::track))
        .route("/identify", post(endpoints::identify))
        .route("/profile", post(endpoints::profile))
        .route("/leave", post(endpoints::leave))
        .route("/reset", post(endpoints::reset))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    // Installing a global recorder when the router is built inside tests
    // does not work well, so it stays behind the flag.
    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
