// prompt-toggle/src/hooks.rs

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

/// What the plugin needs from a host chat event. Implemented once per host.
pub trait ChatEvent: Send + Sync {
    fn text(&self) -> &str;
    /// The message mentions or wakes the bot.
    fn is_addressed(&self) -> bool;
    fn sender_id(&self) -> &str;
    fn session_id(&self) -> &str;
    fn platform(&self) -> &str;
    /// Host role lookup; `None` when the host cannot tell.
    fn sender_is_admin(&self) -> Option<bool> { None }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundMessage {
    pub text: String,
    pub addressed: bool,
    pub sender_id: String,
    pub session_id: String,
    pub platform: String,
    pub sender_is_admin: Option<bool>,
}

impl ChatEvent for InboundMessage {
    fn text(&self) -> &str { &self.text }
    fn is_addressed(&self) -> bool { self.addressed }
    fn sender_id(&self) -> &str { &self.sender_id }
    fn session_id(&self) -> &str { &self.session_id }
    fn platform(&self) -> &str { &self.platform }
    fn sender_is_admin(&self) -> Option<bool> { self.sender_is_admin }
}

/// Outbound provider call; only the system prompt is touched here.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderRequest {
    pub system_prompt: Option<String>,
    pub prompt: String,
}

pub const GENERIC_FAILURE_REPLY: &str = "Something went wrong, please try again later.";

#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &'static str;
    /// `Some(text)` is sent back to the chat; `None` stays silent.
    async fn on_message(&self, event: &dyn ChatEvent) -> Result<Option<String>>;
    async fn on_llm_request(&self, event: &dyn ChatEvent, req: &mut ProviderRequest) -> Result<()>;
}

/// Fans host events out to registered hooks. A failing hook is logged and
/// answered with [`GENERIC_FAILURE_REPLY`]; it never takes the others down.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self { Self { hooks: RwLock::new(Vec::new()) } }
    pub async fn register(&self, hook: Arc<dyn Hook>) { self.hooks.write().await.push(hook); }
    pub async fn len(&self) -> usize { self.hooks.read().await.len() }

    pub async fn emit_message(&self, event: &dyn ChatEvent) -> Vec<String> {
        let hooks = self.hooks.read().await.clone();
        let results = join_all(hooks.iter().map(|h| async move { (h.name(), h.on_message(event).await) })).await;
        results.into_iter().filter_map(|(name, res)| match res {
            Ok(reply) => reply,
            Err(e) => {
                error!(hook = name, session = event.session_id(), error = %e, "message hook failed");
                Some(GENERIC_FAILURE_REPLY.to_string())
            }
        }).collect()
    }

    /// Hooks run in registration order; each sees the previous one's edits.
    pub async fn emit_llm_request(&self, event: &dyn ChatEvent, req: &mut ProviderRequest) {
        let hooks = self.hooks.read().await.clone();
        for h in hooks {
            if let Err(e) = h.on_llm_request(event, req).await {
                error!(hook = h.name(), session = event.session_id(), error = %e, "llm request hook failed");
            }
        }
    }
}
