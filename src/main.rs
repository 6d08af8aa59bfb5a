use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Checkout session slots: redis is durable, process memory is volatile
    let durable = api::session::RedisSlot::new(&cfg.redis_url, cfg.session_ttl())
        .context("invalid redis url")?;
    let sessions = Arc::new(api::session::CheckoutSessionStore::new(
        Arc::new(durable),
        Arc::new(api::session::MemorySlot::new()),
        cfg.session_namespace.clone(),
    ));

    // Init events
    let (event_sender, event_rx) = api::events::channel(cfg.event_channel_capacity);
    tokio::spawn(api::events::process_events(event_rx));

    let gateway = api::gateway::HttpPaymentGateway::new(
        cfg.gateway_base_url.clone(),
        cfg.gateway_secret_key.clone(),
        cfg.gateway_timeout(),
    )
    .context("failed to build payment gateway client")?;
    if cfg.gateway_secret_key.is_none() {
        warn!("Payment gateway secret not configured; gateway calls will fail");
    }

    let payments = api::services::PaymentService::new(
        Arc::new(gateway),
        sessions.clone(),
        cfg.callback_url(),
        cfg.currency.clone(),
        Some(event_sender.clone()),
    );
    let orders = api::services::OrderService::new(db_arc.clone(), cfg.currency.clone());

    let tokens = cfg.jwt_secret.as_deref().map(api::auth::TokenKeys::new);
    if tokens.is_none() {
        info!("No JWT secret configured; every buyer is treated as a guest");
    }

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid listen address")?;

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: Arc::new(cfg),
        sessions,
        payments,
        orders,
        tokens,
        event_sender: Some(event_sender),
    };
    let app = api::app_router(app_state);

    // Bind and serve
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
