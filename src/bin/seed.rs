use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::Parser;
use fake::{
    faker::{internet::en::SafeEmail, lorem::en::Sentence, name::en::Name},
    Fake,
};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use workshops::{
    clock::SystemClock,
    config::Settings,
    domain::{CreateWorkshopRequest, JoinWaitlistRequest},
    notifications::{LogNotifier, NotificationManager},
    payments::InMemoryProcessor,
    service::ServiceContext,
};

/// Fill a database with demo workshops and a waitlist
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://workshops.db?mode=rwc")]
    database_url: String,

    #[arg(long, default_value_t = 3)]
    workshops: usize,

    #[arg(long, default_value_t = 25)]
    waitlist: usize,

    /// Publish the workshops, which sends the first invitation batch
    #[arg(long)]
    publish: bool,
}

const TITLES: [&str; 5] = [
    "Intro to Welding",
    "Laser Cutter Basics",
    "3D Printing 101",
    "Woodshop Safety",
    "Soldering Fundamentals",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workshops=info,seed=info".into()),
        )
        .init();

    let args = Args::parse();
    println!("🌱 Seeding {}", args.database_url);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await?;

    println!("📋 Running migrations...");
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let settings = Settings::default();
    let notifications = Arc::new(NotificationManager::new());
    notifications.register(Arc::new(LogNotifier)).await;

    let ctx = ServiceContext::new(
        db_pool,
        Arc::new(InMemoryProcessor::new()),
        notifications,
        Arc::new(SystemClock),
        &settings,
    );

    println!("🧾 Adding {} people to the waitlist...", args.waitlist);
    for i in 0..args.waitlist {
        let member_id = if i % 3 == 0 { None } else { Some(Uuid::new_v4()) };
        ctx.waitlist_service
            .join(JoinWaitlistRequest {
                member_id,
                full_name: Name().fake(),
                email: SafeEmail().fake(),
                priority: 0,
            })
            .await?;
    }

    println!("🛠️  Creating {} workshops...", args.workshops);
    let now = Utc::now();
    for i in 0..args.workshops {
        let starts_at = now + Duration::days(14 + 7 * i as i64);
        let workshop = ctx.workshop_service
            .create(
                CreateWorkshopRequest {
                    title: TITLES[i % TITLES.len()].to_string(),
                    description: Sentence(6..12).fake(),
                    location: Some("Main shop".to_string()),
                    starts_at,
                    ends_at: starts_at + Duration::hours(3),
                    capacity: 6,
                    batch_size: Some(4),
                    cool_off_days: Some(3),
                    refund_window_days: Some(3),
                    price_cents: if i == 0 { 0 } else { 4500 },
                    currency: None,
                },
                None,
            )
            .await?;

        if args.publish {
            let outcome = ctx.workshop_service.publish(workshop.id).await?;
            println!(
                "  ✅ {} published, {} invited",
                workshop.title,
                outcome.invitations.len()
            );
        } else {
            println!("  ✅ {} (draft)", workshop.title);
        }
    }

    println!("🎉 Done");
    Ok(())
}
