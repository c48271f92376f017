//! flowsync: command-line client for the workflow backend
//!
//! Every read goes through the same `ApiClient` retry policy the library uses,
//! and `watch` drives a `SyncStore` subscription so the output reflects
//! exactly what a long-running consumer would see.
//!
//! # Subcommands
//! - `list`, `show <id>`, `agents`
//! - `watch <id> [--push]`: follow a workflow until it settles
//! - `watch-all`: follow the workflow list until Ctrl+C
//! - `create --name .. --requirement .. [--watch]`
//! - `cancel <id> [--watch]`, `delete <id>`

mod render;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowsync_core::{
    listen_workflow_push, ApiClient, FlowsyncConfig, Priority, Subscription, SyncPhase, SyncStore,
    WorkflowApi, WorkflowCreateRequest, WorkflowRecord,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "flowsync", version, about = "Follow and manage remote workflows")]
struct Cli {
    /// Config file; missing file means defaults
    #[arg(short, long, global = true, default_value = "flowsync.toml")]
    config: String,

    /// Backend URL (overrides `api.base_url`)
    #[arg(long, global = true, env = "FLOWSYNC_URL")]
    server: Option<String>,

    /// Print raw JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List workflows
    List,

    /// Show one workflow and its assigned agents
    Show { id: String },

    /// Follow a workflow until it settles or disappears
    Watch {
        id: String,

        /// Also re-fetch on push notifications
        #[arg(long)]
        push: bool,
    },

    /// Follow the workflow list until Ctrl+C
    WatchAll,

    /// Create a workflow
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        requirement: String,

        #[arg(long = "type", default_value = "general")]
        workflow_type: String,

        #[arg(long, default_value = "medium")]
        priority: Priority,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Follow the new workflow until it settles
        #[arg(long)]
        watch: bool,
    },

    /// Ask the server to cancel a workflow
    Cancel {
        id: String,

        /// Follow until the cancellation is confirmed
        #[arg(long)]
        watch: bool,
    },

    /// Delete a workflow
    Delete { id: String },

    /// List agents
    Agents,
}

// ============================================================================
// Commands
// ============================================================================

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn do_list(api: &dyn WorkflowApi, json: bool) -> anyhow::Result<()> {
    let workflows = api.list_workflows().await?;
    if json {
        return print_json(&workflows);
    }
    for wf in &workflows {
        println!("{}", render::workflow_line(wf));
    }
    println!("{}", render::list_summary(&workflows));
    Ok(())
}

async fn do_show(api: &dyn WorkflowApi, id: &str, json: bool) -> anyhow::Result<()> {
    let wf = api.fetch_workflow(id).await?;
    if json {
        return print_json(&wf);
    }
    // Agent names are cosmetic; fall back to IDs if the list is unavailable.
    let agents = match api.list_agents().await {
        Ok(agents) => agents,
        Err(e) => {
            tracing::warn!(error = %e, "Could not load agents");
            Vec::new()
        }
    };
    println!("{}", render::workflow_detail(&wf, &agents));
    Ok(())
}

async fn do_agents(api: &dyn WorkflowApi, json: bool) -> anyhow::Result<()> {
    let agents = api.list_agents().await?;
    if json {
        return print_json(&agents);
    }
    for agent in &agents {
        println!("{}", render::agent_line(agent));
    }
    Ok(())
}

/// Print each distinct sync line (or JSON record) until the workflow
/// settles, stops or Ctrl+C. Returns the final phase.
async fn watch_workflow(mut sub: Subscription<WorkflowRecord>, json: bool) -> anyhow::Result<SyncPhase> {
    let mut last_line: Option<String> = None;
    let mut state = sub.current();

    loop {
        if state.fetch_count > 0 {
            let line = if json {
                serde_json::to_string(&render::sync_json(&state))?
            } else {
                format!("{}  {}", sub.key(), render::sync_line(&state))
            };
            if last_line.as_deref() != Some(line.as_str()) {
                println!("{}", line);
                last_line = Some(line);
            }
        }

        if state.phase != SyncPhase::Polling {
            return Ok(state.phase);
        }

        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(SyncPhase::Polling),
            next = sub.changed() => next,
        };
        state = match next {
            Some(next) => next,
            None => return Ok(sub.current().phase),
        };
    }
}

async fn do_watch(
    store: &SyncStore,
    config: &FlowsyncConfig,
    id: &str,
    push: bool,
    json: bool,
) -> anyhow::Result<()> {
    let sub = store.subscribe_workflow(id);
    let cancel = CancellationToken::new();

    if push || config.push.enabled {
        let store = store.clone();
        let url = config.push.url.clone();
        let id = id.to_string();
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = listen_workflow_push(store, &url, &id, token).await {
                tracing::warn!(error = %e, "Push unavailable, relying on polling");
            }
        });
    }

    let phase = watch_workflow(sub, json).await;
    cancel.cancel();

    match phase? {
        SyncPhase::Gone => anyhow::bail!("workflow {} no longer exists", id),
        SyncPhase::Rejected => anyhow::bail!("server refused workflow {}", id),
        _ => Ok(()),
    }
}

async fn do_watch_all(store: &SyncStore, json: bool) -> anyhow::Result<()> {
    let mut sub = store.subscribe_workflows();
    let mut last_summary: Option<String> = None;

    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            next = sub.changed() => next,
        };
        let Some(state) = next else {
            return Ok(());
        };

        let Some(workflows) = &state.value else {
            if let Some(err) = &state.error {
                eprintln!("sync failing: {}", err);
            }
            continue;
        };

        if json {
            println!("{}", serde_json::to_string(workflows)?);
            continue;
        }

        let mut summary = render::list_summary(workflows);
        if let Some(err) = &state.error {
            summary.push_str(&format!(" (sync failing: {})", err));
        }
        if last_summary.as_deref() != Some(summary.as_str()) {
            println!("{}", summary);
            last_summary = Some(summary);
        }
    }
}

async fn do_create(
    store: &SyncStore,
    request: WorkflowCreateRequest,
    watch: bool,
    json: bool,
) -> anyhow::Result<()> {
    let created = store.create_workflow(&request).await?;
    if !request.is_echoed_by(&created) {
        tracing::warn!(workflow_id = %created.id, "Server altered client-supplied fields");
    }

    if json {
        print_json(&created)?;
    } else {
        println!("Created {}", render::workflow_line(&created));
    }

    if watch {
        let sub = store.subscribe_workflow(&created.id);
        watch_workflow(sub, json).await?;
    }
    Ok(())
}

async fn do_cancel(store: &SyncStore, id: &str, watch: bool, json: bool) -> anyhow::Result<()> {
    // Subscribe first so the post-cancel invalidation has a poller to wake.
    let sub = watch.then(|| store.subscribe_workflow(id));

    store
        .cancel_workflow(id)
        .await
        .with_context(|| format!("cancel {}", id))?;
    println!("Cancellation requested for {}", id);

    if let Some(sub) = sub {
        watch_workflow(sub, json).await?;
    }
    Ok(())
}

async fn do_delete(store: &SyncStore, id: &str) -> anyhow::Result<()> {
    store
        .delete_workflow(id)
        .await
        .with_context(|| format!("delete {}", id))?;
    println!("Deleted {}", id);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = FlowsyncConfig::load_or_default(&cli.config)
        .with_context(|| format!("load config {}", cli.config))?;
    if let Some(server) = cli.server {
        config.api.base_url = server;
    }

    let client = Arc::new(ApiClient::new(config.client_config())?);
    let store = SyncStore::new(client.clone(), config.polling);
    let json = cli.json;

    match cli.command {
        Commands::List => do_list(client.as_ref(), json).await,
        Commands::Show { id } => do_show(client.as_ref(), &id, json).await,
        Commands::Watch { id, push } => do_watch(&store, &config, &id, push, json).await,
        Commands::WatchAll => do_watch_all(&store, json).await,
        Commands::Create {
            name,
            requirement,
            workflow_type,
            priority,
            tags,
            watch,
        } => {
            let request = WorkflowCreateRequest {
                name,
                requirement,
                workflow_type,
                priority,
                tags,
            };
            do_create(&store, request, watch, json).await
        }
        Commands::Cancel { id, watch } => do_cancel(&store, &id, watch, json).await,
        Commands::Delete { id } => do_delete(&store, &id).await,
        Commands::Agents => do_agents(client.as_ref(), json).await,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable.
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("flowsync: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_args_parse() {
        let cli = Cli::try_parse_from([
            "flowsync",
            "create",
            "--name",
            "Nightly",
            "--requirement",
            "Build it",
            "--priority",
            "critical",
            "--tag",
            "ci",
            "--tag",
            "nightly",
        ])
        .unwrap();

        match cli.command {
            Commands::Create {
                name,
                workflow_type,
                priority,
                tags,
                watch,
                ..
            } => {
                assert_eq!(name, "Nightly");
                assert_eq!(workflow_type, "general");
                assert_eq!(priority, Priority::Critical);
                assert_eq!(tags, vec!["ci", "nightly"]);
                assert!(!watch);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_bad_priority_rejected() {
        let res = Cli::try_parse_from([
            "flowsync",
            "create",
            "--name",
            "x",
            "--requirement",
            "y",
            "--priority",
            "urgent",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn test_watch_flags_and_global_json() {
        let cli = Cli::try_parse_from(["flowsync", "watch", "wf-1", "--push", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Watch { ref id, push: true } if id == "wf-1"));

        let cli = Cli::try_parse_from(["flowsync", "cancel", "wf-2", "--watch"]).unwrap();
        assert!(matches!(cli.command, Commands::Cancel { watch: true, .. }));
    }

    #[test]
    fn test_server_and_config_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "flowsync",
            "watch",
            "wf-1",
            "--server",
            "http://10.0.0.5:9000",
            "--config",
            "other.toml",
        ])
        .unwrap();
        assert_eq!(cli.server.as_deref(), Some("http://10.0.0.5:9000"));
        assert_eq!(cli.config, "other.toml");
        assert!(matches!(cli.command, Commands::Watch { ref id, push: false } if id == "wf-1"));
    }

    #[test]
    fn test_config_default_path() {
        let cli = Cli::try_parse_from(["flowsync", "list"]).unwrap();
        assert_eq!(cli.config, "flowsync.toml");
        assert!(matches!(cli.command, Commands::List));
    }
}
