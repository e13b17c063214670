use actix_web::{middleware, web, App, HttpServer};
use notification_relay::services::{
    pg_store, MemoryNotificationStore, NotificationStore, PgNotificationStore,
};
use notification_relay::{handlers, metrics, relay, Config, Relay};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn NotificationStore>> {
    match &config.database {
        Some(db) => {
            let pool = pg_store::init_pool(db).await?;
            let store = PgNotificationStore::new(pool);
            store.migrate().await?;
            tracing::info!("Database migrations applied");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running in offline mode with an in-memory store");
            Ok(Arc::new(MemoryNotificationStore::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info,lapin=warn,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        env = %config.app.env,
        broker = %config.broker.redacted_url(),
        "Starting notification relay"
    );

    let store = build_store(&config).await?;
    let relay = Relay::start(&config, relay::connector_for(&config.broker.url), store);

    let state = relay.state.clone();
    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .configure(handlers::configure)
    })
    .bind(&addr)?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let mut server_task = actix_web::rt::spawn(server);

    let stopped_on_its_own = tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => tracing::info!("HTTP server stopped"),
                Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
                Err(e) => tracing::error!("HTTP server task failed: {}", e),
            }
            true
        }
        _ = shutdown_signal() => false,
    };

    if !stopped_on_its_own {
        tracing::info!("Shutdown signal received, shutting down gracefully");
        server_handle.stop(true).await;
        let _ = server_task.await;
    }

    relay.shutdown().await;

    Ok(())
}
