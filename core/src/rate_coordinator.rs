//! Per-model fixed-window rate limiting with atomic check-and-reserve (§4.2)
//!
//! The concurrency contract (§4.2, §5) calls for "a single process-wide
//! mutex around the coordinator"; this implementation gets that for free by
//! requiring every operation to go through a `&mut Store` reference — the
//! same `tokio::sync::Mutex<Store>` guard the task queue uses. Holding that
//! guard for the duration of `try_reserve`'s load-decide-write sequence is
//! the critical section. `is_available` is read-only and advisory (§4.2,
//! §9): callers may call it without intending to consume quota, but only
//! `try_reserve`'s return value may be trusted to mean a reservation
//! succeeded.

use crate::store::Store;
use shared::config::ModelConfig;
use shared::error::Result;
use shared::model::RateWindow;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Status snapshot for a single model, surfaced at `getQueueStatus` (§6).
#[derive(Debug, Clone)]
pub struct ModelRateStatus {
    pub available: bool,
    pub used: u32,
    pub limit: u32,
    pub resets_in_seconds: u64,
}

pub struct RateCoordinator {
    models: HashMap<String, ModelConfig>,
}

impl RateCoordinator {
    pub fn new(models: Vec<ModelConfig>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.key.clone(), m)).collect(),
        }
    }

    pub fn known_models(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// Seeds a zero-usage window for any configured model absent from the
    /// store, so a first-run store always has a row per model (§4.2: "Models
    /// and their per-window caps are configured at startup (seeded into the
    /// store if absent)").
    pub fn seed_if_absent(&self, store: &mut Store, now: u64) -> Result<()> {
        for config in self.models.values() {
            if store.get_rate_window(&config.key)?.is_none() {
                debug!(model = %config.key, "seeding rate window");
                store.upsert_rate_window(&RateWindow {
                    model: config.key.clone(),
                    current_usage: 0,
                    max_requests: config.max_requests,
                    window_start: now,
                    window_duration_ms: config.window_duration_ms,
                    updated_at: now,
                })?;
            }
        }
        Ok(())
    }

    fn window_for(&self, store: &mut Store, model: &str, now: u64) -> Result<RateWindow> {
        if let Some(window) = store.get_rate_window(model)? {
            return Ok(window);
        }
        let config = self.models.get(model).ok_or_else(|| {
            anyhow::anyhow!(
                shared::OrchestratorError::NotConfigured(format!("unknown model '{model}'"))
            )
        })?;
        Ok(RateWindow {
            model: model.to_string(),
            current_usage: 0,
            max_requests: config.max_requests,
            window_start: now,
            window_duration_ms: config.window_duration_ms,
            updated_at: now,
        })
    }

    /// Logical, read-only availability check (§4.2 `isAvailable`). May race
    /// with concurrent `try_reserve` calls; never used to decide whether a
    /// reservation is consumed.
    pub fn is_available(&self, store: &mut Store, model: &str, now: u64) -> Result<bool> {
        let window = self.window_for(store, model, now)?;
        Ok(window.is_available(now))
    }

    /// Atomic check-and-increment (§4.2 `tryReserve`). Caller must hold the
    /// store's exclusive guard across this call.
    pub fn try_reserve(&self, store: &mut Store, model: &str, now: u64) -> Result<bool> {
        let mut window = self.window_for(store, model, now)?;

        if window.is_elapsed(now) {
            window.current_usage = 1;
            window.window_start = now;
            window.updated_at = now;
            store.upsert_rate_window(&window)?;
            return Ok(true);
        }

        if window.current_usage < window.max_requests {
            window.current_usage += 1;
            window.updated_at = now;
            store.upsert_rate_window(&window)?;
            return Ok(true);
        }

        Ok(false)
    }

    pub fn get_next_available(&self, store: &mut Store, model: &str, now: u64) -> Result<u64> {
        let window = self.window_for(store, model, now)?;
        Ok(window.next_available_at(now))
    }

    /// Observed-429 feedback (§4.2): saturates the current window without
    /// shifting `windowStart`, so the reset deadline is unaffected.
    pub fn mark_exhausted(&self, store: &mut Store, model: &str, now: u64) -> Result<()> {
        let mut window = self.window_for(store, model, now)?;
        warn!(model, "marking model exhausted after observed rate limit");
        window.current_usage = window.max_requests;
        window.updated_at = now;
        store.upsert_rate_window(&window)
    }

    pub fn status(&self, store: &mut Store, now: u64) -> Result<HashMap<String, ModelRateStatus>> {
        let mut out = HashMap::new();
        for key in self.models.keys() {
            let window = self.window_for(store, key, now)?;
            let available = window.is_available(now);
            let used = if window.is_elapsed(now) {
                0
            } else {
                window.current_usage
            };
            let resets_in_seconds = window
                .next_available_at(now)
                .saturating_sub(now)
                .saturating_div(1000);
            out.insert(
                key.clone(),
                ModelRateStatus {
                    available,
                    used,
                    limit: window.max_requests,
                    resets_in_seconds,
                },
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();
        (dir, store)
    }

    fn model(key: &str, max_requests: u32, window_duration_ms: u64) -> ModelConfig {
        ModelConfig {
            key: key.to_string(),
            max_requests,
            window_duration_ms,
            endpoint: None,
        }
    }

    #[test]
    fn try_reserve_denies_beyond_cap() {
        let (_dir, mut store) = test_store();
        let coordinator = RateCoordinator::new(vec![model("m", 2, 60_000)]);
        coordinator.seed_if_absent(&mut store, 0).unwrap();

        assert!(coordinator.try_reserve(&mut store, "m", 0).unwrap());
        assert!(coordinator.try_reserve(&mut store, "m", 0).unwrap());
        assert!(!coordinator.try_reserve(&mut store, "m", 0).unwrap());
    }

    #[test]
    fn try_reserve_resets_after_window_elapses() {
        let (_dir, mut store) = test_store();
        let coordinator = RateCoordinator::new(vec![model("m", 1, 1_000)]);
        coordinator.seed_if_absent(&mut store, 0).unwrap();

        assert!(coordinator.try_reserve(&mut store, "m", 0).unwrap());
        assert!(!coordinator.try_reserve(&mut store, "m", 500).unwrap());
        assert!(coordinator.try_reserve(&mut store, "m", 2_000).unwrap());
    }

    #[test]
    fn mark_exhausted_saturates_without_shifting_window() {
        let (_dir, mut store) = test_store();
        let coordinator = RateCoordinator::new(vec![model("m", 5, 60_000)]);
        coordinator.seed_if_absent(&mut store, 0).unwrap();
        coordinator.try_reserve(&mut store, "m", 0).unwrap();

        coordinator.mark_exhausted(&mut store, "m", 10).unwrap();
        let window = store.get_rate_window("m").unwrap().unwrap();
        assert_eq!(window.current_usage, window.max_requests);
        assert_eq!(window.window_start, 0);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_exceed_cap() {
        let (_dir, store) = test_store();
        let store = std::sync::Arc::new(tokio::sync::Mutex::new(store));
        {
            let mut guard = store.lock().await;
            let coordinator = RateCoordinator::new(vec![model("m", 10, 60_000)]);
            coordinator.seed_if_absent(&mut guard, 0).unwrap();
        }

        let coordinator = std::sync::Arc::new(RateCoordinator::new(vec![model("m", 10, 60_000)]));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                let mut guard = store.lock().await;
                coordinator.try_reserve(&mut guard, "m", 0).unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
    }
}
