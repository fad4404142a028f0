use std::sync::Arc;

use ed25519_dalek::SigningKey;

use lipwire_media::{MediaAgentFactory, TranscriberFactory};
use lipwire_store::Store;

use crate::calls::CallCoordinator;
use crate::config::ServerConfig;
use crate::login_guard::LoginGuard;
use crate::rate_limit::RateLimiter;
use crate::registry::SessionRegistry;
use crate::tokens::TokenService;

/// Everything a connection task needs, shared process-wide.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub tokens: TokenService,
    pub registry: SessionRegistry,
    pub calls: CallCoordinator,
    pub limiter: RateLimiter,
    pub login_guard: LoginGuard,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        signing_key: SigningKey,
        media: Arc<dyn MediaAgentFactory>,
        transcribers: Arc<dyn TranscriberFactory>,
    ) -> Arc<Self> {
        let tokens = TokenService::new(
            signing_key,
            store.clone(),
            config.access_ttl_minutes,
            config.refresh_ttl_days,
        );
        let registry = SessionRegistry::new();
        let calls = CallCoordinator::new(registry.clone(), store.clone(), media, transcribers);

        Arc::new(Self {
            config,
            store,
            tokens,
            registry,
            calls,
            limiter: RateLimiter::default(),
            login_guard: LoginGuard::default(),
        })
    }
}
