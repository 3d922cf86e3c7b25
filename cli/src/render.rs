//! Human-readable (non-`--json`) renderers for `config` and `status` (§6:
//! "The CLI renders human text with a status glyph and per-field
//! indentation; `--json` bypasses rendering").

use shared::config::OrchestratorConfig;
use shared::model::{QueueStats, TaskCategory};

pub fn print_config(config: &OrchestratorConfig) {
    println!("models:");
    for model in &config.models {
        println!(
            "  {}  max_requests={} window_ms={} endpoint={}",
            model.key,
            model.max_requests,
            model.window_duration_ms,
            model.endpoint.as_deref().unwrap_or("(backend default)")
        );
    }

    println!("routing:");
    for category in TaskCategory::ALL {
        let candidates = config.routing.get(&category).cloned().unwrap_or_default();
        println!("  {category}: {}", candidates.join(", "));
    }

    println!("executor:");
    println!("  max_concurrent={}", config.executor.max_concurrent);
    println!("  poll_interval_ms={}", config.executor.poll_interval_ms);
    println!(
        "  health_check_interval_ms={}",
        config.executor.health_check_interval_ms
    );
    println!(
        "  graceful_shutdown_timeout_ms={}",
        config.executor.graceful_shutdown_timeout_ms
    );

    println!("backend:");
    println!("  timeout_secs={}", config.backend.timeout_secs);
    println!("  max_output_bytes={}", config.backend.max_output_bytes);
    println!(
        "  local_fallback_url={}",
        config.backend.local_fallback_url.as_deref().unwrap_or("(none)")
    );

    println!("gateway:");
    println!("  bind={}", config.gateway.bind);
}

pub fn print_stats(stats: &QueueStats) {
    let rows: [(&str, u64); 7] = [
        ("pending", stats.pending),
        ("scheduled", stats.scheduled),
        ("running", stats.running),
        ("completed", stats.completed),
        ("failed", stats.failed),
        ("blocked", stats.blocked),
        ("cancelled", stats.cancelled),
    ];
    println!("queue:");
    for (label, count) in rows {
        let glyph = if count == 0 { " " } else { "*" };
        println!("  {glyph} {label:<10} {count}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_stats_does_not_panic_on_empty_queue() {
        print_stats(&QueueStats {
            pending: 0,
            scheduled: 0,
            running: 0,
            completed: 0,
            failed: 0,
            blocked: 0,
            cancelled: 0,
        });
    }

    #[test]
    fn print_config_does_not_panic_on_default_config() {
        let mut routing = std::collections::HashMap::new();
        for category in TaskCategory::ALL {
            routing.insert(category, vec!["local/default".to_string()]);
        }
        let config = OrchestratorConfig {
            models: vec![shared::config::ModelConfig {
                key: "local/default".to_string(),
                max_requests: 60,
                window_duration_ms: 60_000,
                endpoint: None,
            }],
            routing,
            priority_weights: None,
            backend: shared::config::BackendConfig::default(),
            executor: shared::config::ExecutorConfig::default(),
            store: shared::config::StoreConfig::default(),
            gateway: shared::config::GatewayConfig::default(),
        };
        print_config(&config);
    }
}
