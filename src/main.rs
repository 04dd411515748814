use chatcart::application::conversation::ConversationEngine;
use chatcart::application::ledger::{LedgerPolicy, OrderLedger};
use chatcart::application::registry::BrandRegistry;
use chatcart::application::reminders::{ReminderPolicy, ReminderSweep};
use chatcart::application::webhook::{PaymentWebhookHandler, WebhookAuthenticator};
use chatcart::config::Settings;
use chatcart::domain::ports::{
    SharedActivitySink, SharedGeocoder, SharedMessenger, SharedOrderStore, SharedSessionStore,
};
use chatcart::infrastructure::in_memory::{InMemoryOrderStore, InMemorySessionStore};
use chatcart::infrastructure::outbound::{GoogleGeocoder, PlaceholderPaymentLinks, TracingMessenger};
use chatcart::interfaces::csv::CsvActivityLog;
use chatcart::interfaces::http::{AppState, router};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML). Missing files fall back to defaults and the
    /// environment.
    #[arg(long, global = true, default_value = "chatcart.toml")]
    config: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server and the reminder jobs.
    Serve,
    /// Load and validate the settings, then list the configured brands.
    CheckConfig,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chatcart={level},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

struct Stores {
    sessions: SharedSessionStore,
    orders: SharedOrderStore,
    backend: String,
}

fn open_stores(db_path: Option<&Path>, settings: &Settings) -> Result<Stores> {
    let state_ttl = settings.sessions.state_ttl();
    let cart_ttl = settings.sessions.cart_ttl();

    #[cfg(feature = "storage-rocksdb")]
    if let Some(path) = db_path {
        let store = chatcart::infrastructure::rocksdb::RocksDbStore::open_with_ttls(path, state_ttl, cart_ttl)?;
        return Ok(Stores {
            sessions: Arc::new(store.clone()),
            orders: Arc::new(store),
            backend: format!("rocksdb at {}", path.display()),
        });
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }

    Ok(Stores {
        sessions: Arc::new(InMemorySessionStore::with_ttls(state_ttl, cart_ttl)),
        orders: Arc::new(InMemoryOrderStore::new()),
        backend: "in-memory".to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let settings = Settings::load(&cli.config)?;
    let db_path = cli.db_path.or_else(|| settings.storage.db_path.clone());
    let stores = open_stores(db_path.as_deref(), &settings)?;

    match cli.command {
        Command::CheckConfig => check_config(&settings, &stores),
        Command::Serve => serve(settings, stores).await,
    }
}

fn check_config(settings: &Settings, stores: &Stores) -> Result<()> {
    let registry = BrandRegistry::new(settings.brands.clone(), settings.default_brand.as_deref())?;
    let default = registry.default_brand();
    for brand in registry.brands() {
        println!(
            "{}\t{}\tchannel={}\tproducts={}\tbranches={}{}",
            brand.id,
            brand.name,
            brand.phone_number_id,
            brand.catalog.len(),
            brand.branches.len(),
            if brand.id == default.id { "\t(default)" } else { "" }
        );
    }
    println!("storage: {}", stores.backend);
    Ok(())
}

async fn serve(settings: Settings, stores: Stores) -> Result<()> {
    let Stores {
        sessions,
        orders,
        backend,
    } = stores;
    let registry = Arc::new(BrandRegistry::new(
        settings.brands.clone(),
        settings.default_brand.as_deref(),
    )?);
    let timeout = settings.external.timeout();

    let messenger: SharedMessenger = Arc::new(TracingMessenger);
    let geocoder: SharedGeocoder = Arc::new(GoogleGeocoder::new(
        settings.external.geocoding_api_key.clone(),
        timeout,
    )?);
    let activity: Option<SharedActivitySink> = settings
        .activity_log
        .as_ref()
        .map(|path| Arc::new(CsvActivityLog::new(path)) as SharedActivitySink);

    let mut ledger = OrderLedger::new(
        orders,
        sessions.clone(),
        messenger.clone(),
        Arc::new(PlaceholderPaymentLinks),
        LedgerPolicy {
            radius_km: settings.delivery.radius_km,
            external_timeout: timeout,
            max_status_retries: settings.ledger.max_status_retries,
        },
    );
    if let Some(sink) = &activity {
        ledger = ledger.with_activity(sink.clone());
    }

    let mut engine = ConversationEngine::new(sessions.clone(), ledger.clone(), messenger.clone(), geocoder);
    let mut reminders = ReminderSweep::new(
        registry.clone(),
        sessions,
        messenger,
        ReminderPolicy {
            idle_after: Duration::from_secs(settings.reminders.idle_after_secs),
            sweep_interval: Duration::from_secs(settings.reminders.sweep_interval_secs),
            daily_interval: Duration::from_secs(settings.reminders.daily_interval_secs),
            send_timeout: timeout,
        },
    );
    if let Some(sink) = activity {
        engine = engine.with_activity(sink.clone());
        reminders = reminders.with_activity(sink);
    }

    let payments = PaymentWebhookHandler::new(
        WebhookAuthenticator::new(registry.clone(), ledger.clone()),
        ledger,
    );
    let app = router(AppState {
        registry,
        engine,
        payments,
        verify_token: settings.server.verify_token.clone(),
    });

    let cancel = CancellationToken::new();
    let jobs = Arc::new(reminders).spawn(cancel.clone());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.into_diagnostic()?;
    info!(%addr, storage = %backend, "chatcart listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
            shutdown.cancel();
        })
        .await
        .into_diagnostic()?;

    cancel.cancel();
    for job in jobs {
        let _ = job.await;
    }
    Ok(())
}
