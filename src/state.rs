use std::sync::Arc;

use axum::extract::FromRef;
use tracing::{info, warn};

use crate::auth::{
    handlers::AccountListener,
    jwt::JwtKeys,
    memory::InMemoryUserStore,
    password::Argon2Verifier,
    repo::{PgUserStore, UserStore},
    services::IdentityService,
};
use crate::config::{AppConfig, StoreBackend};
use crate::db;
use crate::events::{EventBus, EventSink, LogSink, NatsSink};
use crate::transport::AccountClient;

const ACCOUNT_QUEUE_CAPACITY: usize = 256;

/// Gateway state: the channel to the identity service plus the keys needed to
/// check bearer tokens.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub account: AccountClient,
    pub keys: JwtKeys,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl AppState {
    /// Wires the identity service and starts its listener and event dispatcher.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let users: Arc<dyn UserStore> = match &config.store {
            StoreBackend::Postgres { database_url } => {
                Arc::new(PgUserStore::new(db::connect(database_url).await?))
            }
            StoreBackend::Memory => {
                warn!("using in-memory user store; accounts are lost on restart");
                Arc::new(InMemoryUserStore::new())
            }
        };

        let sink: Arc<dyn EventSink> = match &config.events.nats_url {
            Some(url) => {
                let sink = NatsSink::connect(url, config.events.subject_prefix.as_deref()).await?;
                info!(%url, "publishing events to NATS");
                Arc::new(sink)
            }
            None => {
                info!("no event broker configured; events go to the log");
                Arc::new(LogSink)
            }
        };
        let (events, _dispatcher) = EventBus::spawn(sink, config.events.buffer);

        let keys = JwtKeys::from(&config.jwt);
        let service = IdentityService::new(
            users,
            Arc::new(Argon2Verifier::new(config.password)?),
            Arc::new(keys.clone()),
            Arc::new(events),
            config.frontend_url.clone(),
        );

        let (listener, account) =
            AccountListener::new(Arc::new(service), ACCOUNT_QUEUE_CAPACITY);
        tokio::spawn(listener.run());

        Ok(Self::from_parts(config, account, keys))
    }

    pub fn from_parts(config: Arc<AppConfig>, account: AccountClient, keys: JwtKeys) -> Self {
        Self {
            config,
            account,
            keys,
        }
    }
}
