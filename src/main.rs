// prompt-toggle/src/main.rs

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{broadcast::error::RecvError, mpsc},
};
use tracing::{debug, info, warn};

use prompt_toggle::{
    apply_form, form_schema, spawn_sweeper, CommandContext, Config, ConfigManager, FormResult, HookRegistry,
    InboundMessage, ProviderRequest, SlashRegistry, StateRegistry, TogglePlugin,
};

#[derive(Parser)]
#[command(name = "prompt-toggle-host", version, about = "Drive the prompt toggle with JSON lines on stdin")]
struct Args {
    /// Config file; defaults to the per-user config directory
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seconds between expiry sweeps (0 disables the sweeper)
    #[arg(long, default_value_t = 30)]
    sweep_secs: u64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostInput {
    Message(InboundMessage),
    LlmRequest {
        event: InboundMessage,
        #[serde(default)]
        request: ProviderRequest,
    },
    Command {
        text: String,
        #[serde(default)]
        sender_id: String,
        #[serde(default)]
        is_admin: bool,
    },
    FormSchema,
    FormSubmit { data: Value },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostOutput {
    Replies { replies: Vec<String> },
    Request { request: ProviderRequest },
    Command { reply: Option<String> },
    Form { schema: Value },
    FormResult(FormResult),
    Error { message: String },
}

#[derive(Clone)]
struct Host {
    cfg: Arc<ConfigManager>,
    registry: Arc<StateRegistry>,
    hooks: Arc<HookRegistry>,
    slash: Arc<SlashRegistry>,
}

impl Host {
    async fn handle(&self, input: HostInput) -> HostOutput {
        match input {
            HostInput::Message(msg) => HostOutput::Replies { replies: self.hooks.emit_message(&msg).await },
            HostInput::LlmRequest { event, mut request } => {
                self.hooks.emit_llm_request(&event, &mut request).await;
                HostOutput::Request { request }
            }
            HostInput::Command { text, sender_id, is_admin } => {
                let ctx = CommandContext { sender_id, is_admin };
                HostOutput::Command { reply: self.slash.handle(&ctx, &text).await }
            }
            HostInput::FormSchema => HostOutput::Form { schema: form_schema(&self.cfg.get(), &self.registry) },
            HostInput::FormSubmit { data } => HostOutput::FormResult(apply_form(&self.cfg, data)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let path = match args.config {
        Some(p) => p,
        None => ConfigManager::default_path()?,
    };

    // stdout carries the protocol, logs go to stderr
    let fallback = Config::peek_log_level(&path).unwrap_or_else(|| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or(fallback))
        .with_writer(std::io::stderr)
        .init();

    let cfg = Arc::new(ConfigManager::load(&path));
    info!(path = %cfg.path().display(), "config loaded");
    if let Err(e) = cfg.start_watch() {
        warn!(error = %e, "config watcher unavailable, edits need a restart");
    }

    let registry = Arc::new(StateRegistry::new(cfg.get().max_concurrent_states));
    let mut updates = cfg.subscribe();
    let reg = registry.clone();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(c) => {
                    reg.set_capacity(c.max_concurrent_states);
                    info!(enabled = c.enabled, max = c.max_concurrent_states, "config updated");
                }
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "config updates lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
    if args.sweep_secs > 0 {
        spawn_sweeper(registry.clone(), Duration::from_secs(args.sweep_secs));
    }

    let hooks = Arc::new(HookRegistry::new());
    hooks.register(Arc::new(TogglePlugin::new(cfg.clone(), registry.clone()))).await;
    let slash = Arc::new(SlashRegistry::with_builtins(cfg.clone(), registry.clone()));
    let host = Host { cfg, registry, hooks, slash };

    let (tx, mut rx) = mpsc::unbounded_channel::<HostOutput>();
    let writer = tokio::spawn(async move {
        let mut out = tokio::io::stdout();
        while let Some(msg) = rx.recv().await {
            let mut line = match serde_json::to_string(&msg) {
                Ok(l) => l,
                Err(e) => { warn!(error = %e, "failed to encode output"); continue; }
            };
            line.push('\n');
            if out.write_all(line.as_bytes()).await.is_err() || out.flush().await.is_err() { break; }
        }
    });

    info!("reading events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => { info!("interrupted, shutting down"); break; }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break; };
        if line.trim().is_empty() { continue; }

        match serde_json::from_str::<HostInput>(&line) {
            Ok(input) => {
                let (host, tx) = (host.clone(), tx.clone());
                tokio::spawn(async move {
                    let _ = tx.send(host.handle(input).await);
                });
            }
            Err(e) => { let _ = tx.send(HostOutput::Error { message: format!("bad input: {e}") }); }
        }
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}
