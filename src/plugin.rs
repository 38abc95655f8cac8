// prompt-toggle/src/plugin.rs

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    config::ConfigManager,
    hooks::{ChatEvent, Hook, ProviderRequest},
    prompt::prepend_system_prompt,
    registry::{Rejection, SessionKey, StateRegistry},
    trigger::should_trigger,
};

/// The toggle itself: activates on trigger messages, injects while active.
#[derive(Clone)]
pub struct TogglePlugin {
    cfg: Arc<ConfigManager>,
    registry: Arc<StateRegistry>,
}

impl TogglePlugin {
    pub fn new(cfg: Arc<ConfigManager>, registry: Arc<StateRegistry>) -> Self { Self { cfg, registry } }
    pub fn registry(&self) -> &Arc<StateRegistry> { &self.registry }
    pub fn config(&self) -> &Arc<ConfigManager> { &self.cfg }
}

pub fn session_key(event: &(impl ChatEvent + ?Sized)) -> Option<SessionKey> {
    if event.session_id().is_empty() { return None; }
    Some(SessionKey::new(event.platform(), event.session_id()))
}

/// Chat text for a failed activation. Success stays silent so the model's
/// next reply carries the effect.
pub fn rejection_reply(r: &Rejection) -> String {
    match r {
        Rejection::CoolingDown { remaining_secs } => format!("Still recovering... try again in {remaining_secs}s."),
        Rejection::AlreadyActive { remaining_secs } => format!("Already in that state ({remaining_secs}s left)."),
        Rejection::CapacityExceeded { .. } => "Too many sessions are active right now, try again later.".to_string(),
    }
}

#[async_trait]
impl Hook for TogglePlugin {
    fn name(&self) -> &'static str { "prompt_toggle" }

    async fn on_message(&self, event: &dyn ChatEvent) -> Result<Option<String>> {
        let cfg = self.cfg.get();
        let decision = should_trigger(event, &cfg);
        debug!(sender = event.sender_id(), fire = decision.fire, reason = %decision.reason, "trigger check");
        if !decision.fire { return Ok(None); }

        let Some(key) = session_key(event) else {
            warn!("trigger matched but the event has no session id, skipping");
            return Ok(None);
        };

        self.registry.set_capacity(cfg.max_concurrent_states);
        match self.registry.activate(&key, cfg.state_duration_seconds, cfg.cooldown_seconds) {
            Ok(act) => {
                info!(sender = event.sender_id(), reason = %decision.reason, "{}", act.message());
                Ok(None)
            }
            Err(rejection) => {
                info!(session = %key, %rejection, "activation refused");
                Ok(Some(rejection_reply(&rejection)))
            }
        }
    }

    async fn on_llm_request(&self, event: &dyn ChatEvent, req: &mut ProviderRequest) -> Result<()> {
        let Some(key) = session_key(event) else { return Ok(()); };
        if !self.registry.is_active(&key) { return Ok(()); }

        let cfg = self.cfg.get();
        let block = cfg.template()?.render(&cfg.item_name, cfg.sensitivity_level);
        prepend_system_prompt(&mut req.system_prompt, &block);
        debug!(session = %key, sensitivity = cfg.sensitivity_level, "instruction injected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, config::Config, hooks::InboundMessage};
    use std::time::Duration;

    fn plugin(cfg: Config) -> (TogglePlugin, ManualClock) {
        let clock = ManualClock::new(0);
        let registry = Arc::new(StateRegistry::with_clock(cfg.max_concurrent_states, Arc::new(clock.clone())));
        let cfg = Arc::new(ConfigManager::in_memory(cfg).unwrap());
        (TogglePlugin::new(cfg, registry), clock)
    }

    fn trigger_msg(session: &str) -> InboundMessage {
        InboundMessage {
            text: "@bot 控制".into(), addressed: true, sender_id: "u1".into(),
            session_id: session.into(), platform: "qq".into(), sender_is_admin: None,
        }
    }

    #[tokio::test]
    async fn activation_is_silent_then_injects() {
        let cfg = Config {
            item_name: "Widget".into(), sensitivity_level: 75,
            prompt_template: "Use {item_name} at {sensitivity}.".into(),
            ..Config::default()
        };
        let (p, _) = plugin(cfg);
        let msg = trigger_msg("g1");

        assert_eq!(p.on_message(&msg).await.unwrap(), None);
        assert!(p.registry().is_active(&SessionKey::new("qq", "g1")));

        let mut req = ProviderRequest { system_prompt: Some("Be nice.".into()), ..Default::default() };
        p.on_llm_request(&msg, &mut req).await.unwrap();
        assert_eq!(req.system_prompt.as_deref(), Some("Use Widget at 75.\n\nBe nice."));
    }

    #[tokio::test]
    async fn other_sessions_are_untouched() {
        let (p, _) = plugin(Config::default());
        p.on_message(&trigger_msg("g1")).await.unwrap();
        let mut req = ProviderRequest::default();
        p.on_llm_request(&trigger_msg("g2"), &mut req).await.unwrap();
        assert_eq!(req.system_prompt, None);
    }

    #[tokio::test]
    async fn second_trigger_reports_cooldown() {
        let (p, clock) = plugin(Config::default());
        p.on_message(&trigger_msg("g1")).await.unwrap();
        clock.advance(Duration::from_secs(10));
        let reply = p.on_message(&trigger_msg("g1")).await.unwrap().unwrap();
        assert_eq!(reply, "Still recovering... try again in 20s.");
    }

    #[tokio::test]
    async fn expiry_stops_injection() {
        let (p, clock) = plugin(Config::default());
        p.on_message(&trigger_msg("g1")).await.unwrap();
        clock.advance(Duration::from_secs(180));
        let mut req = ProviderRequest::default();
        p.on_llm_request(&trigger_msg("g1"), &mut req).await.unwrap();
        assert_eq!(req.system_prompt, None);
    }

    #[tokio::test]
    async fn missing_session_id_is_ignored() {
        let (p, _) = plugin(Config::default());
        assert_eq!(p.on_message(&trigger_msg("")).await.unwrap(), None);
        assert!(p.registry().is_empty());
    }

    #[test]
    fn rejection_replies_differ_by_kind() {
        assert!(rejection_reply(&Rejection::AlreadyActive { remaining_secs: 3 }).contains("3s"));
        assert!(rejection_reply(&Rejection::CapacityExceeded { max: 1 }).contains("Too many"));
    }
}
