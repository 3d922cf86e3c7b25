//! Owns every subsystem instance for one running orchestrator (§9 design note:
//! "an App struct, constructed once at startup and passed explicitly to
//! subcomponents, replaces any notion of global singletons").
//!
//! `cli` constructs exactly one `App` and hands clones of its `Arc` fields to
//! the gateway, the executor task, and each CLI subcommand handler.

use crate::backend::{BackendInvoker, HttpBackend};
use crate::events::EventBus;
use crate::executor::Executor;
use crate::rate_coordinator::RateCoordinator;
use crate::router::{KeywordClassifier, Router};
use crate::scheduler::Scheduler;
use crate::store::Store;
use shared::config::OrchestratorConfig;
use shared::error::Result;
use shared::utils::current_timestamp_millis;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Everything a running orchestrator needs, built once from a loaded
/// `OrchestratorConfig`. `Store` is the single point of serialization for
/// task-queue, rate-coordinator and scheduler state (§9): every subsystem
/// that touches it takes the same `Arc<Mutex<Store>>` guard.
pub struct App {
    pub store: Arc<Mutex<Store>>,
    pub rate: Arc<RateCoordinator>,
    pub router: Arc<Router<KeywordClassifier>>,
    pub scheduler: Arc<Scheduler>,
    pub backend: Arc<dyn BackendInvoker>,
    pub events: Arc<EventBus>,
    pub config: OrchestratorConfig,
}

impl App {
    /// Opens the store, seeds rate windows for any model missing a row, and
    /// assembles the stateless subsystems (§4.2: "seeded into the store if
    /// absent").
    pub async fn new(config: OrchestratorConfig, data_dir: &Path) -> Result<Self> {
        let mut store = Store::new(data_dir, config.store.busy_timeout_secs)?;
        store.initialize()?;

        let rate = RateCoordinator::new(config.models.clone());
        rate.seed_if_absent(&mut store, current_timestamp_millis())?;

        let router = Router::new(KeywordClassifier::default(), config.routing.clone());
        let scheduler = Scheduler::new(
            config.routing.clone(),
            config.priority_weights(),
            config.executor.max_concurrent,
        );
        let backend = HttpBackend::new(config.backend.clone(), config.models.clone());

        info!(
            models = config.models.len(),
            categories = config.routing.len(),
            "orchestrator core assembled"
        );

        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            rate: Arc::new(rate),
            router: Arc::new(router),
            scheduler: Arc::new(scheduler),
            backend: Arc::new(backend),
            events: Arc::new(EventBus::default()),
            config,
        })
    }

    /// Builds the `Executor` for this app, wiring in the shared store,
    /// scheduler, rate coordinator, backend and event bus (§4.7).
    pub fn executor(&self, state_dir: &Path) -> Arc<Executor> {
        Arc::new(Executor::new(
            Arc::clone(&self.store),
            Scheduler::new(
                self.config.routing.clone(),
                self.config.priority_weights(),
                self.config.executor.max_concurrent,
            ),
            RateCoordinator::new(self.config.models.clone()),
            Arc::clone(&self.backend),
            self.config.executor.clone(),
            state_dir,
            Arc::clone(&self.events),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::{BackendConfig, ExecutorConfig, GatewayConfig, ModelConfig, StoreConfig};
    use shared::model::TaskCategory;
    use std::collections::HashMap;

    fn sample_config() -> OrchestratorConfig {
        let mut routing = HashMap::new();
        for category in TaskCategory::ALL {
            routing.insert(category, vec!["m".to_string()]);
        }
        OrchestratorConfig {
            models: vec![ModelConfig {
                key: "m".to_string(),
                max_requests: 10,
                window_duration_ms: 60_000,
                endpoint: Some("http://localhost:9000/invoke".to_string()),
            }],
            routing,
            priority_weights: None,
            backend: BackendConfig::default(),
            executor: ExecutorConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    #[tokio::test]
    async fn new_seeds_rate_window_for_every_configured_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(sample_config(), dir.path()).await.unwrap();
        let window = {
            let mut store = app.store.lock().await;
            store.get_rate_window("m").unwrap()
        };
        assert!(window.is_some());
        let _ = app.executor(dir.path());
        app.config.models.clear();
    }
}
