//! Command-line entry point for the model orchestration core
//!
//! Mirrors the grounding project's binary shape: a `clap`-derived argument
//! struct, a `tracing_subscriber` installed once at startup with a daily
//! rolling file appender, jemalloc as the allocator on non-Windows targets,
//! and a `tokio::select!` between the running service and the shutdown
//! signal.

#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod gateway;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrator_core::app::App;
use orchestrator_core::executor::Executor;
use orchestrator_core::task_queue::TaskQueue;
use shared::config::{ModelConfig, OrchestratorConfig};
use shared::model::{Priority, TaskCategory, TaskInput, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "orchestrator")]
#[command(about = "Multi-model orchestration core: router, rate limiter, scheduler and executor daemon", long_about = None)]
struct CliArgs {
    /// Directory holding orchestrator.toml and the task-queue store.
    /// Defaults to `~/.orchestrator`.
    #[arg(long = "data-dir", global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Emit machine-readable JSON on stdout instead of human text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the data directory and a default orchestrator.toml if absent.
    Init,
    /// Print the resolved configuration.
    Config,
    /// List configured models and their rate limits.
    Agents,
    /// List task categories and their candidate model routing.
    Categories,
    /// Classify and dispatch a message's backend call synchronously.
    Select {
        message: String,
        #[arg(short = 'a', long = "agent", value_name = "MODEL")]
        agent: Option<String>,
        #[arg(short = 'c', long = "category", value_name = "CATEGORY")]
        category: Option<String>,
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Run the HTTP gateway and executor daemon until a shutdown signal.
    Gateway,
    /// Classify a message and print the candidate model list, without dispatching.
    Route { message: String },
    /// Enqueue a message as a persistent task, processed by the executor daemon.
    Spawn {
        message: String,
        #[arg(short = 'c', long = "category", value_name = "CATEGORY")]
        category: Option<String>,
    },
    /// Print queue and executor status.
    Status,
    /// List completed tasks and their results.
    Results,
    /// List every task regardless of status.
    List,
    /// Cancel a task by id.
    Cancel { id: String },
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".orchestrator")
}

fn parse_category(raw: &str) -> Result<TaskCategory> {
    TaskCategory::ALL
        .into_iter()
        .find(|c| c.as_str() == raw)
        .ok_or_else(|| anyhow::anyhow!("unknown category '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "orchestrator.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cli=info,orchestrator_core=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let args = CliArgs::parse();
    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);

    let exit_code = match run(args, &data_dir).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(args: CliArgs, data_dir: &PathBuf) -> Result<i32> {
    match args.command {
        Command::Init => cmd_init(data_dir, args.json).await,
        Command::Config => cmd_config(data_dir, args.json).await,
        Command::Agents => cmd_agents(data_dir, args.json).await,
        Command::Categories => cmd_categories(data_dir, args.json).await,
        Command::Select { message, agent, category, file } => {
            cmd_select(data_dir, message, agent, category, file, args.json).await
        }
        Command::Gateway => cmd_gateway(data_dir).await,
        Command::Route { message } => cmd_route(data_dir, message, args.json).await,
        Command::Spawn { message, category } => cmd_spawn(data_dir, message, category, args.json).await,
        Command::Status => cmd_status(data_dir, args.json).await,
        Command::Results => cmd_results(data_dir, args.json).await,
        Command::List => cmd_list(data_dir, args.json).await,
        Command::Cancel { id } => cmd_cancel(data_dir, id).await,
    }
}

async fn load_config(data_dir: &PathBuf) -> Result<OrchestratorConfig> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let mut manager = orchestrator_core::config::ConfigManager::new(data_dir.clone())?;
    let config = manager.load().await?.clone();
    Ok(config)
}

async fn cmd_init(data_dir: &PathBuf, json: bool) -> Result<i32> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let mut routing = std::collections::HashMap::new();
    for category in TaskCategory::ALL {
        routing.insert(category, vec!["local/default".to_string()]);
    }
    let default_config = OrchestratorConfig {
        models: vec![ModelConfig {
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

    let written =
        orchestrator_core::config::ConfigManager::write_if_absent(data_dir, &default_config).await?;

    if json {
        println!("{}", serde_json::json!({ "created": written, "data_dir": data_dir }));
    } else if written {
        println!("Initialized orchestrator.toml in {}", data_dir.display());
    } else {
        println!("orchestrator.toml already exists in {}", data_dir.display());
    }
    Ok(0)
}

async fn cmd_config(data_dir: &PathBuf, json: bool) -> Result<i32> {
    let config = load_config(data_dir).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        render::print_config(&config);
    }
    Ok(0)
}

async fn cmd_agents(data_dir: &PathBuf, json: bool) -> Result<i32> {
    let config = load_config(data_dir).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config.models)?);
    } else {
        for model in &config.models {
            println!(
                "{}  max_requests={} window_ms={}",
                model.key, model.max_requests, model.window_duration_ms
            );
        }
    }
    Ok(0)
}

async fn cmd_categories(data_dir: &PathBuf, json: bool) -> Result<i32> {
    let config = load_config(data_dir).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config.routing)?);
    } else {
        for category in TaskCategory::ALL {
            let candidates = config.routing.get(&category).cloned().unwrap_or_default();
            println!("{category}: {}", candidates.join(", "));
        }
    }
    Ok(0)
}

async fn cmd_route(data_dir: &PathBuf, message: String, json: bool) -> Result<i32> {
    let config = load_config(data_dir).await?;
    let app = App::new(config, data_dir).await?;
    let classification = app.router.classify(&message);
    let candidates = app.router.candidates(classification.category, None);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "category": classification.category,
                "confidence": classification.confidence,
                "reason": classification.reason,
                "candidates": candidates,
            })
        );
    } else {
        println!("category: {} (confidence {:.2})", classification.category, classification.confidence);
        println!("reason: {}", classification.reason);
        println!("candidates: {}", candidates.join(", "));
    }
    Ok(0)
}

async fn cmd_select(
    data_dir: &PathBuf,
    mut message: String,
    agent: Option<String>,
    category: Option<String>,
    file: Option<PathBuf>,
    json: bool,
) -> Result<i32> {
    if let Some(path) = &file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        message = format!("{message}\n{contents}");
    }

    let config = load_config(data_dir).await?;
    let app = App::new(config, data_dir).await?;

    let category = match category {
        Some(raw) => parse_category(&raw)?,
        None => app.router.classify(&message).category,
    };
    let candidates = app.router.candidates(category, agent.as_deref());

    let now = shared::utils::current_timestamp_millis();
    let mut chosen = None;
    {
        let mut store = app.store.lock().await;
        for model in &candidates {
            if app.rate.try_reserve(&mut store, model, now)? {
                chosen = Some(model.clone());
                break;
            }
        }
    }

    let Some(model) = chosen else {
        if json {
            println!("{}", serde_json::json!({ "error": "no model available" }));
        } else {
            println!("no model currently available for category {category}");
        }
        return Ok(1);
    };

    let result = app.backend.invoke(&model, &message).await;
    match result {
        Ok(text) => {
            if json {
                println!("{}", serde_json::json!({ "model": model, "category": category, "result": text }));
            } else {
                println!("[{model}] {text}");
            }
            Ok(0)
        }
        Err(e) => {
            if json {
                println!("{}", serde_json::json!({ "model": model, "error": e.to_string() }));
            } else {
                println!("invocation failed via {model}: {e}");
            }
            Ok(1)
        }
    }
}

async fn cmd_spawn(
    data_dir: &PathBuf,
    message: String,
    category: Option<String>,
    json: bool,
) -> Result<i32> {
    let config = load_config(data_dir).await?;
    let app = App::new(config, data_dir).await?;

    let category = match category {
        Some(raw) => Some(parse_category(&raw)?),
        None => None,
    };

    let input = TaskInput {
        project_id: None,
        title: shared::utils::truncate_string(&message, 60),
        prompt: message,
        category,
        priority: Priority::Medium,
        depends_on: vec![],
        preferred_model: None,
        deadline: None,
        estimated_duration: None,
        max_attempts: shared::defaults::default_max_attempts(),
    };

    let id = {
        let mut store = app.store.lock().await;
        TaskQueue::add(&mut store, input)?
    };

    if json {
        println!("{}", serde_json::json!({ "id": id }));
    } else {
        println!("spawned task {id}");
    }
    Ok(0)
}

async fn cmd_status(data_dir: &PathBuf, json: bool) -> Result<i32> {
    let config = load_config(data_dir).await?;
    let app = App::new(config, data_dir).await?;

    let now = shared::utils::current_timestamp_millis();
    let (stats, rate_status) = {
        let mut store = app.store.lock().await;
        (TaskQueue::stats(&mut store)?, app.rate.status(&mut store, now)?)
    };

    let executor_status = Executor::get_stored_status(&data_dir.join("executor.status.json"));

    if json {
        println!(
            "{}",
            serde_json::json!({
                "stats": stats,
                "rate_limits": rate_status.iter().map(|(k, v)| (k.clone(), serde_json::json!({
                    "available": v.available,
                    "used": v.used,
                    "limit": v.limit,
                    "resets_in_seconds": v.resets_in_seconds,
                }))).collect::<std::collections::HashMap<_, _>>(),
                "executor": executor_status,
            })
        );
    } else {
        render::print_stats(&stats);
        for (model, status) in &rate_status {
            println!(
                "  {model}: {}/{} available={} resets_in={}s",
                status.used, status.limit, status.available, status.resets_in_seconds
            );
        }
        match executor_status {
            Some(s) => println!("executor: running={} paused={} pid={}", s.running, s.paused, s.pid),
            None => println!("executor: not running"),
        }
    }
    Ok(0)
}

async fn cmd_results(data_dir: &PathBuf, json: bool) -> Result<i32> {
    let config = load_config(data_dir).await?;
    let app = App::new(config, data_dir).await?;

    let completed = {
        let mut store = app.store.lock().await;
        TaskQueue::get_by_status(&mut store, TaskStatus::Completed)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&completed)?);
    } else {
        for task in &completed {
            println!(
                "{}  {}  -> {}",
                task.id,
                task.title,
                task.result.as_deref().unwrap_or("")
            );
        }
    }
    Ok(0)
}

async fn cmd_list(data_dir: &PathBuf, json: bool) -> Result<i32> {
    let config = load_config(data_dir).await?;
    let app = App::new(config, data_dir).await?;

    let tasks = {
        let mut store = app.store.lock().await;
        TaskQueue::get_all(&mut store)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else {
        for task in &tasks {
            println!("{}  [{}]  {}", task.id, task.status, task.title);
        }
    }
    Ok(0)
}

async fn cmd_cancel(data_dir: &PathBuf, id: String) -> Result<i32> {
    let config = load_config(data_dir).await?;
    let app = App::new(config, data_dir).await?;
    let mut store = app.store.lock().await;
    TaskQueue::cancel(&mut store, &id)?;
    println!("cancelled {id}");
    Ok(0)
}

async fn cmd_gateway(data_dir: &PathBuf) -> Result<i32> {
    let config = load_config(data_dir).await?;
    let gateway_config = config.gateway.clone();
    let app = App::new(config, data_dir).await?;
    let executor = app.executor(data_dir);

    info!(bind = %gateway_config.bind, "starting gateway");
    let router = gateway::build_router(&app, Arc::clone(&executor));
    let listener = tokio::net::TcpListener::bind(&gateway_config.bind)
        .await
        .with_context(|| format!("failed to bind {}", gateway_config.bind))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let executor_handle = tokio::spawn(executor.run(shutdown_rx));

    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
            info!("received Ctrl+C");
        }
    };

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                error!(error = %e, "gateway server error");
            }
        }
        _ = shutdown_signal => {
            info!("shutdown requested");
        }
    }

    let _ = shutdown_tx.send(()).await;
    match executor_handle.await {
        Ok(Err(e)) => error!(error = %e, "executor exited with an error"),
        Err(e) => error!(error = %e, "executor task panicked"),
        Ok(Ok(())) => {}
    }
    info!("gateway stopped");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_category() {
        assert_eq!(parse_category("coding").unwrap(), TaskCategory::Coding);
        assert!(parse_category("nonsense").is_err());
    }

    #[test]
    fn default_data_dir_is_under_home() {
        let dir = default_data_dir();
        assert!(dir.ends_with(".orchestrator"));
    }
}
