use tracing_subscriber::EnvFilter;

use classroom_live::{api, store, Config, RoomCoordinator};

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(config.logging.json);

    let store = match store::from_config(&config.store) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize classroom store");
            std::process::exit(1);
        }
    };

    let coordinator = RoomCoordinator::new(store, config.room.page_size);
    let routes = api::routes(coordinator, config.server.events_token.clone());

    let addr = config.bind_address();
    let (bound, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    });

    tracing::info!(
        addr = %bound,
        store = ?config.store.backend,
        page_size = config.room.page_size,
        "Classroom live server listening"
    );
    server.await;
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
