use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use common_identity::{IdentifyLock, Resolver, SaltCache, SessionWindow};
use common_kv::RedisClient;
use common_queue::{Enqueue, PgQueue};
use common_store::{AppStore, PgAppStore};
use common_types::SystemClock;

use crate::config::Config;
use crate::router::{self, State};

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let kv: Arc<dyn common_kv::Client> = Arc::new(
        RedisClient::new(config.redis_url.clone())
            .await
            .expect("failed to connect to the keyed store"),
    );
    let app: Arc<dyn AppStore> = Arc::new(
        PgAppStore::new(&config.database_url)
            .await
            .expect("failed to connect to the app store"),
    );
    let queue: Arc<dyn Enqueue> = Arc::new(
        PgQueue::new(&config.queue_table, &config.database_url)
            .await
            .expect("failed to connect to the job queue"),
    );

    let salts = Arc::new(SaltCache::new(
        app.clone(),
        Duration::from_secs(config.salt_cache_secs),
    ));
    let window = Arc::new(SessionWindow::new(
        kv.clone(),
        Duration::from_secs(config.session_window_secs),
    ));
    let resolver = Arc::new(Resolver::new(app.clone(), salts, window.clone()));
    let lock = Arc::new(IdentifyLock::new(
        kv,
        Duration::from_secs(config.identify_lock_secs),
    ));

    let state = State {
        app,
        queue,
        resolver,
        window,
        lock,
        clock: Arc::new(SystemClock),
        update_user_delay: Duration::from_secs(config.update_user_delay_secs),
        merge_delay: Duration::from_secs(config.merge_delay_secs),
        cookie_max_age: Duration::from_secs(config.cookie_max_age_secs),
    };

    let router = router::router(state, config.export_prometheus);

    info!("listening on {}", config.address);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .expect("server failed");
}
