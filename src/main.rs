use std::sync::Arc;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workshops::{
    api,
    clock::SystemClock,
    config::Settings,
    jobs,
    notifications::{log::LogNotifier, NotificationManager},
    payments::{memory::InMemoryProcessor, stripe_client::StripeClient, PaymentProcessor},
    service::ServiceContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workshops=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!("Starting workshops server on {}:{}", settings.server.host, settings.server.port);

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    // Payment processor
    let processor: Arc<dyn PaymentProcessor> = if settings.stripe.enabled {
        match (settings.stripe.secret_key.clone(), settings.stripe.webhook_secret.clone()) {
            (Some(api_key), Some(webhook_secret)) => {
                tracing::info!("Stripe payment processing enabled");
                Arc::new(StripeClient::new(api_key, webhook_secret))
            }
            _ => {
                anyhow::bail!("Stripe is enabled but secret_key or webhook_secret is missing");
            }
        }
    } else {
        match settings.stripe.webhook_secret.clone().filter(|secret| !secret.is_empty()) {
            Some(secret) => {
                tracing::warn!("Stripe payment processing disabled; using the in-memory processor with signed webhooks");
                Arc::new(InMemoryProcessor::with_webhook_secret(secret))
            }
            None => {
                tracing::warn!(
                    "Stripe payment processing disabled and no webhook secret set; payment webhooks will be rejected"
                );
                Arc::new(InMemoryProcessor::new())
            }
        }
    };

    // Notifications
    let notifications = Arc::new(NotificationManager::new());
    notifications.register(Arc::new(LogNotifier)).await;

    // Create service context
    let service_context = Arc::new(ServiceContext::new(
        db_pool.clone(),
        processor,
        notifications,
        Arc::new(SystemClock),
        &settings,
    ));

    // Background jobs
    let job_handles = jobs::spawn_scheduler(service_context.clone(), &settings.scheduler);

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app).await?;

    for handle in job_handles {
        handle.abort();
    }

    Ok(())
}
