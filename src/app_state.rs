//! Shared server state
//!
//! Built once at startup from the loaded config and handed to the router
//! behind an Arc.

use std::sync::Arc;

use crate::analytics::CompletionRecorder;
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::errors::GateResult;
use crate::gateway::{GatewayDirectory, StaticGatewayDirectory};
use crate::progression::ProgressionEngine;
use crate::rate_limiter::RateLimiter;
use crate::session_store::SessionStore;
use crate::session_store_memory::MemorySessionStore;
use crate::session_store_sled::SledSessionStore;
use crate::stage_token::TokenCodec;
use crate::token_cipher::derive_token_key;
use crate::webhook::WebhookNotifier;

pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub directory: Arc<dyn GatewayDirectory>,
    pub engine: ProgressionEngine,
    pub recorder: CompletionRecorder,
    pub notifier: WebhookNotifier,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire up stores, directory, engine, and recorder from the config.
    pub fn from_config(config: &GatewayConfig, clock: Arc<dyn Clock>) -> GateResult<Self> {
        let store: Arc<dyn SessionStore> = match config.db_backend.as_str() {
            "memory" => Arc::new(MemorySessionStore::new(config.session_ttl(), clock.clone())),
            _ => Arc::new(SledSessionStore::open(
                &config.data_dir,
                config.session_ttl(),
                clock.clone(),
            )?),
        };

        let directory = Arc::new(StaticGatewayDirectory::new());
        for definition in &config.gateways {
            directory.register(definition.clone())?;
        }
        if let Some(path) = &config.gateway_file {
            let loaded = directory.load_from_file(path)?;
            tracing::info!(count = loaded, file = %path, "gateway definitions loaded");
        }

        let key = derive_token_key(&config.token_secret, &config.token_salt);
        let codec = TokenCodec::new(key, config.token_max_age(), clock.clone());
        let engine = ProgressionEngine::new(
            store.clone(),
            directory.clone(),
            codec,
            config.advance_window(),
            clock.clone(),
        );

        let recorder =
            CompletionRecorder::new(config.event_log_path.clone(), store.clone(), clock.clone());
        let notifier = WebhookNotifier::new(config.webhook_url.clone());
        let rate_limiter = RateLimiter::new(
            config.limits.rate_limit_requests,
            config.limits.rate_limit_window_seconds,
        );

        Ok(Self {
            store,
            directory,
            engine,
            recorder,
            notifier,
            rate_limiter,
        })
    }
}
