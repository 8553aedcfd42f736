use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use crate::clients::{AnilistClient, CatalogSource, TelegramClient};
use crate::config::Config;
use crate::constants::USER_AGENT;
use crate::db::Store;
use crate::services::{
    LogNotifier, NotificationDispatcher, PersistenceGateway, ScanDriver, SubscriptionService,
    TelegramNotifier,
};

/// Build a shared HTTP client for catalog calls so every clone of the client
/// reuses one connection pool.
fn build_shared_http_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build shared HTTP client: {e}"))
}

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub catalog: Arc<dyn CatalogSource>,

    pub gateway: PersistenceGateway,

    pub scanner: Arc<ScanDriver>,

    pub subscriptions: Arc<SubscriptionService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = build_shared_http_client(config.catalog.request_timeout_seconds)?;
        let catalog: Arc<dyn CatalogSource> = Arc::new(AnilistClient::with_shared_client(
            http_client,
            config.catalog.clone(),
        ));

        Self::with_catalog(config, catalog).await
    }

    /// Wires everything around an arbitrary catalog source.
    pub async fn with_catalog(
        config: Config,
        catalog: Arc<dyn CatalogSource>,
    ) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let dispatcher = build_dispatcher(&config)?;
        let gateway = PersistenceGateway::new(store.clone(), dispatcher);

        let scanner = Arc::new(ScanDriver::new(
            Arc::clone(&catalog),
            gateway.clone(),
            &config.catalog,
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            Arc::clone(&catalog),
            gateway.clone(),
        ));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            catalog,
            gateway,
            scanner,
            subscriptions,
        })
    }
}

fn build_dispatcher(config: &Config) -> anyhow::Result<Arc<dyn NotificationDispatcher>> {
    let notifications = &config.notifications;

    if !notifications.telegram_enabled {
        info!("Telegram delivery disabled, notifications go to the log");
        return Ok(Arc::new(LogNotifier));
    }

    let token = notifications
        .bot_token()
        .ok_or_else(|| anyhow::anyhow!("Telegram is enabled but no bot token is configured"))?;
    let client = TelegramClient::new(&notifications.telegram_api_url, token)?;

    info!("Telegram delivery enabled");
    Ok(Arc::new(TelegramNotifier::new(
        client,
        Duration::from_millis(notifications.send_delay_ms),
    )))
}
