use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use tourapp_server::clock::{Clock, SystemClock};
use tourapp_server::config::{Config, GatewayKind, StoreBackend};
use tourapp_server::gateway::{MercadoPagoGateway, MockGateway, PaymentGateway};
use tourapp_server::identity::{IdentityProvider, InMemoryDirectory, PgCustomerDirectory};
use tourapp_server::notifications::{spawn_dispatcher, LogNotifier, NotificationQueue};
use tourapp_server::payments::spawn_expiry_sweeper;
use tourapp_server::routes::create_routes;
use tourapp_server::state::AppState;
use tourapp_server::store::{PgStore, Stores};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tourapp_server=debug")),
        )
        .init();

    let config = Config::from_env();

    let (stores, identity): (Stores, Arc<dyn IdentityProvider>) = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(&config.database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Successfully connected to database");

            sqlx::migrate!()
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            tracing::info!("Migrations run successfully");

            (
                Stores::from_backend(Arc::new(PgStore::new(pool.clone()))),
                Arc::new(PgCustomerDirectory::new(pool)),
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; state is lost on restart");
            (
                Stores::in_memory(),
                Arc::new(InMemoryDirectory::admitting_unknown()),
            )
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match config.gateway_kind {
        GatewayKind::MercadoPago => {
            if config.mercadopago_access_token.is_empty() {
                tracing::warn!("MERCADOPAGO_ACCESS_TOKEN is empty; gateway calls will be refused");
            }
            Arc::new(
                MercadoPagoGateway::new(
                    &config.mercadopago_base_url,
                    &config.mercadopago_access_token,
                    config.gateway_timeout,
                )
                .expect("Failed to build payment gateway client"),
            )
        }
        GatewayKind::Mock => {
            tracing::warn!("Using mock payment gateway");
            Arc::new(MockGateway::new())
        }
    };

    let (notifications, notification_rx) =
        NotificationQueue::channel(config.notification_queue_capacity);
    spawn_dispatcher(notification_rx, Arc::new(LogNotifier));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState::assemble(
        stores,
        gateway,
        identity,
        notifications,
        clock,
        config.payment_settings(),
    );

    spawn_expiry_sweeper(state.payments.clone(), config.expiry_sweep_interval);

    let app: Router = create_routes(state, &config.cors_allowed_origins);

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .expect("BIND_ADDR must be a socket address");
    tracing::info!("Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
