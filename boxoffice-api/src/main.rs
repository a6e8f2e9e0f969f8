use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use boxoffice_api::{app, sweeper, AppState};
use boxoffice_core::{
    NotificationDispatcher, OrderRepository, PaymentGateway, ReservationRepository, StockLedger,
    TicketType,
};
use boxoffice_gateway::NowPaymentsClient;
use boxoffice_notify::SmtpDispatcher;
use boxoffice_order::{ReconciliationEngine, ReservationManager};
use boxoffice_store::{
    DbClient, PgOrderRepository, PgReservationRepository, PgStockLedger,
};
use chrono::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = boxoffice_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Boxoffice API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let stock: Arc<dyn StockLedger> = Arc::new(PgStockLedger::new(db.pool.clone()));
    let reservations: Arc<dyn ReservationRepository> =
        Arc::new(PgReservationRepository::new(db.pool.clone()));
    let orders: Arc<dyn OrderRepository> = Arc::new(PgOrderRepository::new(db.pool.clone()));

    // Capacity is seeded once; existing counters are never overwritten.
    for ticket_type in TicketType::ALL {
        let rule = config.business_rules.rule_for(ticket_type);
        stock
            .seed(ticket_type, rule.capacity)
            .await
            .expect("Failed to seed ticket stock");
    }

    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        NowPaymentsClient::new(
            &config.gateway.base_url,
            &config.gateway.api_key,
            StdDuration::from_secs(config.gateway.timeout_secs),
        )
        .expect("Failed to build gateway client"),
    );

    let notifier: Arc<dyn NotificationDispatcher> = Arc::new(SmtpDispatcher::new(
        config.email.smtp_server.clone(),
        config.email.smtp_port,
        config.email.smtp_username.clone(),
        config.email.smtp_password.clone(),
        config.email.from_email.clone(),
        config.email.from_name.clone(),
    ));

    let manager = Arc::new(ReservationManager::new(
        Arc::clone(&stock),
        Arc::clone(&reservations),
        Duration::minutes(config.business_rules.reservation_ttl_minutes),
    ));

    let engine = Arc::new(ReconciliationEngine::new(
        Arc::clone(&orders),
        Arc::clone(&manager),
        Arc::clone(&stock),
        Arc::clone(&gateway),
        Arc::clone(&notifier),
        Duration::seconds(config.business_rules.resend_cooldown_seconds),
    ));

    sweeper::spawn_sweeper(
        Arc::clone(&manager),
        config.business_rules.sweep_interval_secs,
    );

    let app_state = AppState {
        stock,
        orders,
        reservations: manager,
        gateway,
        engine,
        rules: config.business_rules.clone(),
        ipn_secret: config.gateway.ipn_secret.clone(),
        admin_api_key: config.admin.api_key.clone(),
        pay_currency: config.gateway.pay_currency.clone(),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
