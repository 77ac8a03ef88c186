use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use bazaar_agent::llm::LlmError;
use bazaar_agent::{build_client, AgentLoop, ConversationHistory, ToolBackend};
use bazaar_core::auth::TokenService;
use bazaar_core::config::{AppConfig, CacheBackend, ConfigError, LoadOptions};
use bazaar_core::pricing::{DeterministicPromoEngine, PromoEngine};
use bazaar_db::cart::CartStore;
use bazaar_db::identity::LocalIdentityProvider;
use bazaar_db::kv::{InMemoryKeyValueStore, KeyValueStore, StoreError};
use bazaar_db::repositories::{
    SqlBillRepository, SqlProductRepository, SqlShopRepository, SqlUserRepository,
};
use bazaar_db::{connect_with_settings, migrations, DbPool, RedisKeyValueStore};

use crate::app::AppState;
use crate::auth::GuestCookieSettings;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub kv: Arc<dyn KeyValueStore>,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("key-value store unavailable: {0}")]
    KeyValue(#[source] StoreError),
    #[error("llm client could not be built: {0}")]
    Llm(#[source] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let kv = key_value_store(&config).await?;
    info!(
        event_name = "system.bootstrap.cache_ready",
        correlation_id = "bootstrap",
        backend = kv.backend_name(),
        "key-value store ready"
    );

    let shops = Arc::new(SqlShopRepository::new(db_pool.clone()));
    let products = Arc::new(SqlProductRepository::new(db_pool.clone()));
    let engine: Arc<dyn PromoEngine> = Arc::new(DeterministicPromoEngine);
    let carts = Arc::new(CartStore::new(
        kv.clone(),
        shops.clone(),
        products.clone(),
        Arc::new(SqlBillRepository::new(db_pool.clone())),
        engine.clone(),
    ));
    let tokens = TokenService::from_config(&config.auth);
    let identity = Arc::new(LocalIdentityProvider::new(
        Arc::new(SqlUserRepository::new(db_pool.clone())),
        tokens.clone(),
    ));

    let llm = build_client(&config.llm).map_err(BootstrapError::Llm)?;
    let tools = Arc::new(ToolBackend::new(shops, products, carts.clone(), identity, engine));
    let assistant = AgentLoop::new(llm, tools, ConversationHistory::new(kv.clone()))
        .with_llm_timeout(Duration::from_secs(config.llm.timeout_secs));
    info!(
        event_name = "system.bootstrap.assistant_ready",
        correlation_id = "bootstrap",
        provider = assistant.provider_name(),
        model = %config.llm.model,
        "assistant ready"
    );

    let state = AppState {
        carts,
        assistant: Arc::new(assistant),
        tokens: Arc::new(tokens),
        guest_cookie: GuestCookieSettings {
            name: config.auth.guest_cookie_name.clone(),
            ttl_days: config.auth.guest_cookie_ttl_days,
        },
    };

    Ok(Application { config, db_pool, kv, state })
}

async fn key_value_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>, BootstrapError> {
    match (config.cache.backend, config.cache.redis_url.as_deref()) {
        (CacheBackend::Redis, Some(url)) => {
            let store = RedisKeyValueStore::connect(url).await.map_err(BootstrapError::KeyValue)?;
            Ok(Arc::new(store))
        }
        (CacheBackend::Redis, None) => Err(BootstrapError::KeyValue(StoreError::Connection(
            "cache.redis_url is required for the redis backend".to_string(),
        ))),
        (CacheBackend::Memory, _) => Ok(Arc::new(InMemoryKeyValueStore::new())),
    }
}
