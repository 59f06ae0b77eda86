//! Billing service binary: wires configuration, storage, the payment
//! processor client and the HTTP router.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use meditation_billing::adapters::http::{app_router, BillingAppState};
use meditation_billing::adapters::{
    PostgresBillingStore, PostgresCustomerRegistry, StripeConfig, StripePaymentAdapter,
};
use meditation_billing::application::RedirectUrls;
use meditation_billing::config::AppConfig;
use meditation_billing::domain::webhook::WebhookVerifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    let catalog = Arc::new(config.billing.load_catalog()?);
    tracing::info!(
        plans = catalog.plans().count(),
        packages = catalog.packages().count(),
        credits_per_minute = catalog.credits_per_minute(),
        "Catalog loaded"
    );

    let db = &config.database;
    let pool = db.pool_options().connect_with(db.connect_options()?).await?;

    if db.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    let payment = &config.payment;
    let mut stripe_config = StripeConfig::new(payment.api_key());
    if let Some(base) = &payment.stripe_api_base {
        stripe_config = stripe_config.with_base_url(base.clone());
    }
    let stripe = StripePaymentAdapter::new(stripe_config)?;

    let store = Arc::new(PostgresBillingStore::new(pool.clone()));
    let state = BillingAppState {
        store: store.clone(),
        guard: store,
        registry: Arc::new(PostgresCustomerRegistry::new(pool)),
        payment_provider: Arc::new(stripe),
        verifier: Arc::new(
            WebhookVerifier::new(payment.webhook_secret())
                .require_livemode(payment.require_livemode),
        ),
        catalog,
        urls: RedirectUrls::new(payment.site_origin()),
    };

    let router = app_router(state)
        .layer(TimeoutLayer::new(config.server.request_timeout()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http());

    let addr = config.server.bind;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, test_mode = payment.is_test_mode(), "Billing service listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Billing service stopped");
    Ok(())
}

/// JSON logs in production, human-readable elsewhere. `RUST_LOG` overrides
/// the configured filter.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
